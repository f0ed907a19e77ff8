use std::fmt::Display;

/// What the store knows about a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobState {
    /// Placeholder, not fetched yet
    Absent,

    /// Fetched, the data center had nothing for this time window
    NoData,

    /// Fetched, holds this many bytes
    Data(usize),
}

impl BlobState {
    pub fn of(blob: Option<&[u8]>) -> Self {
        match blob {
            None => Self::Absent,
            Some([]) => Self::NoData,
            Some(bytes) => Self::Data(bytes.len()),
        }
    }
}

/// Per-segment status as shown to the user.
///
/// Only `Error` is not backed by the store: an errored segment stays
/// absent and gets fetched again on the next start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentStatus {
    Pending,
    Ok(usize),
    NoData,
    Error(String),
}

impl SegmentStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Ok(_) => "OK",
            Self::NoData => "NODATA",
            Self::Error(_) => "ERROR",
        }
    }
}

impl From<BlobState> for SegmentStatus {
    fn from(state: BlobState) -> Self {
        match state {
            BlobState::Absent => Self::Pending,
            BlobState::NoData => Self::NoData,
            BlobState::Data(len) => Self::Ok(len),
        }
    }
}

impl Display for SegmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ok(len) => write!(f, "OK {len} bytes"),
            Self::NoData => write!(f, "NODATA"),
            Self::Error(msg) => write!(f, "ERROR {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_tri_state() {
        assert_eq!(BlobState::of(None), BlobState::Absent);
        assert_eq!(BlobState::of(Some(&[])), BlobState::NoData);
        assert_eq!(BlobState::of(Some(b"abc")), BlobState::Data(3));

        assert_eq!(SegmentStatus::from(BlobState::Data(3)).to_string(), "OK 3 bytes");
        assert_eq!(SegmentStatus::from(BlobState::NoData).code(), "NODATA");
    }
}
