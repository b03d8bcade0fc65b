use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::traffic::types::{Protocol, Record};

/// Criteria for the record verification queries. Unset fields match all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub src: Option<IpAddr>,
    pub dst: Option<IpAddr>,
    pub port: Option<u16>,
    pub protocol: Option<Protocol>,
    pub success: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl RecordFilter {
    pub fn matches(&self, record: &Record) -> bool {
        self.src.map_or(true, |src| record.src == src)
            && self.dst.map_or(true, |dst| record.dst == dst)
            && self.port.map_or(true, |port| record.port == port)
            && self.protocol.map_or(true, |protocol| record.protocol == protocol)
            && self.success.map_or(true, |success| record.success == success)
            && self.since.map_or(true, |since| record.created_time >= since)
            && self.until.map_or(true, |until| record.created_time <= until)
    }
}
