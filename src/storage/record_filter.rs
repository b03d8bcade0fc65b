//! Helpers for building `RecordFilter` values.

pub use crate::storage::types::RecordFilter;

use std::net::IpAddr;

/// Records of one source/destination pair.
pub fn by_pair(src: IpAddr, dst: IpAddr) -> RecordFilter {
    RecordFilter {
        src: Some(src),
        dst: Some(dst),
        ..Default::default()
    }
}

/// Records whose verdict is a policy violation.
pub fn violations() -> RecordFilter {
    RecordFilter {
        success: Some(false),
        ..Default::default()
    }
}
