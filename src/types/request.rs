use serde::{Deserialize, Serialize};

use super::{SegmentId, SegmentSpec};

/// Key of a request record in the store
pub type RequestId = i64;

/// MIME type of the assembled output
pub const MSEED_MIME: &str = "application/vnd.fdsn.mseed";

/// A routing-assigned cluster of segments served by one data center.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointGroup {
    /// The dataselect `query` URL of the data center
    pub url: String,

    /// Segments in download order
    pub params: Vec<SegmentSpec>,
}

/// One user-initiated download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSpec {
    /// Filled at persistence time, the store keeps it as the record key
    #[serde(skip)]
    pub id: Option<RequestId>,

    pub filename: String,

    #[serde(default = "default_format")]
    pub format: String,

    pub groups: Vec<EndpointGroup>,
}

fn default_format() -> String {
    "mseed".to_owned()
}

impl RequestSpec {
    pub fn new(filename: String, groups: Vec<EndpointGroup>) -> Self {
        Self {
            id: None,
            filename,
            format: default_format(),
            groups,
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &SegmentSpec> {
        self.groups.iter().flat_map(|group| group.params.iter())
    }

    pub fn segment_count(&self) -> usize {
        self.groups.iter().map(|group| group.params.len()).sum()
    }

    /// All allocated segment ids, in request order
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments().filter_map(|segment| segment.id).collect()
    }

    /// Assign the freshly allocated ids to the segments, in request order.
    ///
    /// Return false if the number of ids does not match the number of segments.
    pub fn assign_segment_ids(&mut self, ids: &[SegmentId]) -> bool {
        if ids.len() != self.segment_count() {
            return false;
        }

        let segments = self
            .groups
            .iter_mut()
            .flat_map(|group| group.params.iter_mut());
        for (segment, id) in segments.zip(ids) {
            segment.id = Some(*id);
        }
        true
    }
}

/// The combined output of a finished request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(filename: String, parts: Vec<Vec<u8>>) -> Self {
        Self {
            filename,
            mime: MSEED_MIME,
            bytes: parts.concat(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
