//! Agent control surface
//!
//! - `agent`: the [`Agent`] composing stores, topology, managers and the
//!   record pipeline.

pub mod agent;

pub use agent::{Agent, RegisterReport, StartReport};
