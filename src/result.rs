use miette::Diagnostic;
use thiserror::Error;

use crate::types::RequestId;

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Local storage is unavailable: {0}")]
    #[diagnostic(
        code(wavefetch::storage_unavailable),
        help("check that the `database` path in the configuration is writable")
    )]
    StorageUnavailable(String),

    #[error("Storage operation failed")]
    #[diagnostic(code(wavefetch::storage))]
    Storage(#[from] rusqlite::Error),

    #[error("Routing failed: {0}")]
    #[diagnostic(code(wavefetch::routing_failed))]
    RoutingFailed(String),

    #[error("Segment fetch failed: {0}")]
    SegmentFetchFailed(String),

    #[error("Authentication failed: {0}")]
    AuthChallengeFailed(String),

    #[error("Invalid auth token: {0}")]
    #[diagnostic(
        code(wavefetch::invalid_credential),
        help("the token must be the armored PGP message issued by the EIDA authentication service")
    )]
    InvalidCredential(String),

    #[error("{url} answered with HTTP {status}")]
    HttpStatus { status: u16, url: String },

    #[error("HTTP request failed")]
    Network(#[from] reqwest::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Request is already running")]
    AlreadyRunning,

    #[error("Request {0} is already persisted")]
    AlreadyCreated(RequestId),

    #[error("Request has been purged")]
    Purged,

    #[error("Request has no routed data loaded")]
    NotLoaded,

    #[error("No request with id {0}")]
    UnknownRequest(RequestId),

    #[error("Downloads are disabled because local storage is unavailable")]
    DownloadsDisabled,

    #[error("Invalid configuration")]
    #[diagnostic(code(wavefetch::config))]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn routing(msg: impl Into<String>) -> Self {
        Self::RoutingFailed(msg.into())
    }

    pub fn invalid_credential(msg: impl Into<String>) -> Self {
        Self::InvalidCredential(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
