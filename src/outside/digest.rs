//! HTTP digest access authentication (RFC 2617), client side.

use md5::{Digest, Md5};

use crate::credential::DigestCredentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Md5,
    Md5Sess,
}

/// A parsed `WWW-Authenticate: Digest ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    algorithm: Algorithm,
    qop_auth: bool,
}

fn md5_hex(data: &str) -> String {
    format!("{:x}", Md5::digest(data.as_bytes()))
}

impl DigestChallenge {
    /// Parse a challenge header value.
    /// Return None if it is not a digest challenge or uses an unsupported algorithm.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim_start();
        let (scheme, params) = header.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = Algorithm::Md5;
        let mut qop_auth = false;

        for (key, value) in parse_params(params) {
            match key.as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => {
                    algorithm = match value.to_ascii_lowercase().as_str() {
                        "md5" => Algorithm::Md5,
                        "md5-sess" => Algorithm::Md5Sess,
                        _ => return None,
                    }
                }
                "qop" => qop_auth = value.split(',').any(|q| q.trim() == "auth"),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            nonce: nonce?,
            opaque,
            algorithm,
            qop_auth,
        })
    }

    /// Compute the `Authorization` header value answering this challenge
    pub fn authorization(
        &self,
        method: &str,
        uri: &str,
        creds: &DigestCredentials,
        cnonce: &str,
        nc: u32,
    ) -> String {
        let mut ha1 = md5_hex(&format!(
            "{}:{}:{}",
            creds.username, self.realm, creds.password
        ));
        if self.algorithm == Algorithm::Md5Sess {
            ha1 = md5_hex(&format!("{ha1}:{}:{cnonce}", self.nonce));
        }
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        let nc = format!("{nc:08x}");

        let response = if self.qop_auth {
            md5_hex(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", self.nonce))
        } else {
            md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce))
        };

        let algorithm = match self.algorithm {
            Algorithm::Md5 => "MD5",
            Algorithm::Md5Sess => "MD5-sess",
        };

        let mut header = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{uri}", algorithm={algorithm}, response="{response}""#,
            creds.username, self.realm, self.nonce
        );
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(r#", opaque="{opaque}""#));
        }
        if self.qop_auth {
            header.push_str(&format!(r#", qop=auth, nc={nc}, cnonce="{cnonce}""#));
        }
        header
    }
}

/// Split `key=value, key="quoted, value"` pairs. Keys are lowercased.
fn parse_params(s: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = s.chars().peekable();

    loop {
        while chars
            .peek()
            .is_some_and(|c| c.is_whitespace() || *c == ',')
        {
            chars.next();
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && *c != ',') {
            key.push(c);
        }
        if key.trim().is_empty() {
            break;
        }
        if chars.next_if_eq(&'=').is_none() {
            // Bare token without value
            continue;
        }

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',') {
                value.push(c);
            }
        }

        params.push((key.trim().to_ascii_lowercase(), value.trim().to_owned()));
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mufasa() -> DigestCredentials {
        DigestCredentials {
            username: "Mufasa".to_owned(),
            password: "Circle Of Life".to_owned(),
        }
    }

    #[test]
    fn rfc2617_example() {
        let challenge = DigestChallenge::parse(
            r#"Digest realm="testrealm@host.com",
                qop="auth,auth-int",
                nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093",
                opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .unwrap();

        let header = challenge.authorization("GET", "/dir/index.html", &mufasa(), "0a4f113b", 1);

        assert!(header.starts_with(r#"Digest username="Mufasa", realm="testrealm@host.com""#));
        assert!(header.contains(r#"response="6629fae49393a05397450978507c4ef1""#));
        assert!(header.contains(r#"opaque="5ccc069c403ebaf9f0171e9517f40e41""#));
        assert!(header.contains(r#"qop=auth, nc=00000001, cnonce="0a4f113b""#));
    }

    #[test]
    fn challenge_without_qop() {
        let challenge =
            DigestChallenge::parse(r#"digest realm="r", nonce="n", algorithm=MD5"#).unwrap();
        let header = challenge.authorization("GET", "/q", &mufasa(), "c", 1);

        let ha1 = md5_hex("Mufasa:r:Circle Of Life");
        let ha2 = md5_hex("GET:/q");
        let expected = md5_hex(&format!("{ha1}:n:{ha2}"));
        assert!(header.contains(&format!(r#"response="{expected}""#)));
        assert!(!header.contains("qop"));
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(DigestChallenge::parse(r#"Basic realm="r""#), None);
        assert_eq!(DigestChallenge::parse(r#"Digest realm="r""#), None);
        assert_eq!(
            DigestChallenge::parse(r#"Digest realm="r", nonce="n", algorithm=SHA-512"#),
            None
        );
    }

    #[test]
    fn quoted_values_keep_commas() {
        let params = parse_params(r#"Realm="a, b", nonce=xyz , qop="auth""#);
        assert_eq!(
            params,
            vec![
                ("realm".to_owned(), "a, b".to_owned()),
                ("nonce".to_owned(), "xyz".to_owned()),
                ("qop".to_owned(), "auth".to_owned()),
            ]
        );
    }
}
