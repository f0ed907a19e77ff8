mod armor;

use std::fmt::Debug;

use serde::Deserialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::result::{Error, Result};

pub use armor::read_armored_text;

/// Who the token was issued to and until when it is valid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    pub user_id: String,
    pub valid_until: OffsetDateTime,
}

impl AuthInfo {
    pub fn is_expired(&self) -> bool {
        self.valid_until < OffsetDateTime::now_utc()
    }
}

/// An EIDA auth token, as issued by the authentication service.
///
/// The token itself stays opaque: it is sent as-is to the data centers,
/// only its signed payload is read to know who it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    info: AuthInfo,
}

#[derive(Deserialize)]
struct TokenPayload {
    mail: Option<String>,
    valid_until: Option<String>,
}

impl Credential {
    /// Decode and validate the token
    pub fn parse(token: &str) -> Result<Self> {
        let text = read_armored_text(token)?;
        if text.trim().is_empty() {
            return Err(Error::invalid_credential("No auth data"));
        }

        let payload: TokenPayload = serde_json::from_str(&text)
            .map_err(|err| Error::invalid_credential(format!("auth data is not JSON: {err}")))?;

        let user_id = payload
            .mail
            .filter(|mail| !mail.is_empty())
            .ok_or_else(|| Error::invalid_credential("no user identity"))?;
        let valid_until = payload
            .valid_until
            .ok_or_else(|| Error::invalid_credential("no expiry"))
            .and_then(|s| parse_timestamp(&s))?;

        Ok(Self {
            token: token.trim().to_owned(),
            info: AuthInfo {
                user_id,
                valid_until,
            },
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn info(&self) -> &AuthInfo {
        &self.info
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Expiry dates come with or without an offset, the latter meaning UTC
fn parse_timestamp(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(&format!("{s}Z"), &Rfc3339))
        .map_err(|err| Error::invalid_credential(format!("bad expiry '{s}': {err}")))
}

/// The `username:password` pair a data center hands out in exchange for a token
#[derive(Clone, PartialEq, Eq)]
pub struct DigestCredentials {
    pub username: String,
    pub password: String,
}

impl DigestCredentials {
    pub fn parse(text: &str) -> Result<Self> {
        match text.trim().split_once(':') {
            Some((username, password)) if !username.is_empty() => Ok(Self {
                username: username.to_owned(),
                password: password.to_owned(),
            }),
            _ => Err(Error::AuthChallengeFailed(
                "the auth service did not answer with username:password".to_owned(),
            )),
        }
    }
}

impl Debug for DigestCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
