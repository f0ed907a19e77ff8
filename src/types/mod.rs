mod request;
mod segment;
mod status;

pub use request::{Artifact, EndpointGroup, RequestId, RequestSpec};
pub use segment::{SegmentId, SegmentSpec};
pub use status::{BlobState, SegmentStatus};
