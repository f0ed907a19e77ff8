mod digest;
#[cfg(test)]
pub mod fake;
mod http;

pub use http::HttpTransport;

use async_trait::async_trait;

use crate::{credential::DigestCredentials, result::Result};

/// Outcome of a dataselect request the fetcher has to tell apart
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `200 OK` with its body, possibly empty
    Body(Vec<u8>),

    /// Any other successful status, no data to keep
    Empty,

    /// `401 Unauthorized`, after digest authentication if credentials were given
    Unauthorized,
}

/// Interface to the FDSN web services.
///
/// Every other failure, including error statuses, is returned as an error.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET the dataselect URL with the given query parameters.
    ///
    /// With credentials, answer the digest challenge of the server.
    async fn get(
        &self,
        url: &str,
        query: &[(&'static str, &str)],
        credentials: Option<&DigestCredentials>,
    ) -> Result<Response>;

    /// POST a plain-text body and return the response text.
    ///
    /// A `204 No Content` gives an empty string.
    async fn post_text(&self, url: &str, body: String, accept: &'static str) -> Result<String>;
}
