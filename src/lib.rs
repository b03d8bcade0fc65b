pub mod configuration;
pub mod connected_state;
pub mod controller;
pub mod error_handling;
pub mod namespace;
pub mod recording;
pub mod storage;
pub mod traffic;
pub mod traffic_management;
pub mod worker_management;

pub use controller::Agent;
