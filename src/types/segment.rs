use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Key of a segment blob in the store.
///
/// Allocated by the store when the request is created and **must** stay
/// the same for as long as the request record exists.
pub type SegmentId = i64;

/// One network/station/location/channel/time-window fetch unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub net: String,
    pub sta: String,
    #[serde(default)]
    pub loc: String,
    pub cha: String,
    pub start: String,
    pub end: String,

    /// Not part of the routing response, filled at persistence time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SegmentId>,
}

impl SegmentSpec {
    /// Query parameters of the dataselect request: every field except the id
    pub fn query_pairs(&self) -> [(&'static str, &str); 6] {
        [
            ("net", &self.net),
            ("sta", &self.sta),
            ("loc", &self.loc),
            ("cha", &self.cha),
            ("start", &self.start),
            ("end", &self.end),
        ]
    }
}

impl Display for SegmentSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{} {} - {}",
            self.net, self.sta, self.loc, self.cha, self.start, self.end
        )
    }
}
