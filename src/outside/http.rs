use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE},
    Client, StatusCode,
};
use tracing::{debug, trace};

use super::{digest::DigestChallenge, Response, Transport};
use crate::{
    credential::DigestCredentials,
    result::{Error, Result},
    settings::Settings,
};

/// [Transport] over a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()?;

        Ok(Self { client })
    }

    async fn classify(response: reqwest::Response) -> Result<Response> {
        let status = response.status();
        trace!("{} -> {status}", response.url());

        if status == StatusCode::OK {
            Ok(Response::Body(response.bytes().await?.to_vec()))
        } else if status == StatusCode::UNAUTHORIZED {
            Ok(Response::Unauthorized)
        } else if status.is_success() {
            Ok(Response::Empty)
        } else {
            Err(Error::HttpStatus {
                status: status.as_u16(),
                url: response.url().to_string(),
            })
        }
    }
}

fn cnonce() -> String {
    format!("{:016x}", fastrand::u64(..))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(&'static str, &str)],
        credentials: Option<&DigestCredentials>,
    ) -> Result<Response> {
        let response = self.client.get(url).query(query).send().await?;

        let creds = match credentials {
            Some(creds) if response.status() == StatusCode::UNAUTHORIZED => creds,
            _ => return Self::classify(response).await,
        };

        let challenge = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(DigestChallenge::parse);
        let Some(challenge) = challenge else {
            debug!("{url} did not offer digest authentication");
            return Self::classify(response).await;
        };

        let request_url = response.url();
        let uri = match request_url.query() {
            Some(q) => format!("{}?{q}", request_url.path()),
            None => request_url.path().to_owned(),
        };
        let authorization = challenge.authorization("GET", &uri, creds, &cnonce(), 1);

        let response = self
            .client
            .get(url)
            .query(query)
            .header(AUTHORIZATION, authorization)
            .send()
            .await?;
        Self::classify(response).await
    }

    async fn post_text(&self, url: &str, body: String, accept: &'static str) -> Result<String> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "text/plain")
            .header(ACCEPT, accept)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(String::new());
        }
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_owned(),
            });
        }

        Ok(response.text().await?)
    }
}
