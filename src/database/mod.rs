mod sqlite;

pub use sqlite::Sqlite;

use crate::{
    result::Result,
    types::{RequestId, RequestSpec, SegmentId},
};

/// Version of the on-disk schema written by this build
pub const SCHEMA_VERSION: i64 = 1;

/// Durable storage for the downloaded segments, the request records
/// and the user credential.
///
/// This is the single source of truth about what has been downloaded:
/// it survives restarts, and in-memory state **must** be reconciled with it
/// before a segment is trusted to be done.
///
/// Each segment id is written by exactly one fetcher, so concurrent writes
/// to different ids need no ordering between them.
pub trait BlobStore: Send + Sync {
    /// Store the segment blob. `None` resets it to the absent placeholder,
    /// an empty slice records that the data center had no data.
    fn put_segment(&self, id: SegmentId, blob: Option<&[u8]>) -> Result<()>;

    /// Read the segment blob, `None` if absent or unknown
    fn get_segment(&self, id: SegmentId) -> Result<Option<Vec<u8>>>;

    fn delete_segment(&self, id: SegmentId) -> Result<()>;

    /// Allocate `count` absent placeholders in a single transaction
    /// and return their ids in allocation order.
    fn allocate_segments(&self, count: usize) -> Result<Vec<SegmentId>>;

    /// Persist the request record and return its new id.
    ///
    /// The segment ids inside the spec **must** have been allocated before.
    fn create_request(&self, spec: &RequestSpec) -> Result<RequestId>;

    /// Every persisted request with its id filled, oldest first
    fn all_requests(&self) -> Result<Vec<RequestSpec>>;

    /// Delete the request record along with the given segments, all in one transaction
    fn delete_request(&self, id: RequestId, segments: &[SegmentId]) -> Result<()>;

    /// The stored auth token, if any
    fn credential(&self) -> Result<Option<String>>;

    /// Store the auth token, or remove it with `None`
    fn set_credential(&self, token: Option<&str>) -> Result<()>;

    /// Count the segment entries, placeholders included
    #[cfg(test)]
    fn count_segments(&self) -> Result<usize>;

    #[cfg(test)]
    fn count_requests(&self) -> Result<usize>;
}
