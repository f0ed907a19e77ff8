//! Scripted [Transport] for tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{Response, Transport};
use crate::{
    credential::DigestCredentials,
    result::{Error, Result},
    utils::MutexUtils,
};

/// What the fake answers to one dataselect request
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(Response),
    Fail(u16),
    /// Never answer, until the request is dropped
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub url: String,
    pub sta: String,
    pub authenticated: bool,
}

/// Answers dataselect requests per station code.
///
/// Stations without scripted replies get their own code back as data.
#[derive(Debug, Default)]
pub struct FakeTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    /// `None` hangs like [Reply::Hang]
    auth_replies: Mutex<VecDeque<Option<Result<String>>>>,
    routing_reply: Mutex<Option<Result<String>>>,

    pub calls: Mutex<Vec<Call>>,
    pub auth_calls: Mutex<Vec<(String, String)>>,
    pub routing_calls: Mutex<Vec<(String, String)>>,

    /// Notified every time a request starts hanging
    pub hanging: Notify,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, sta: &str, reply: Reply) -> &Self {
        self.replies.with_lock(|mut replies| {
            replies.entry(sta.to_owned()).or_default().push_back(reply)
        });
        self
    }

    pub fn auth_reply(&self, reply: Result<String>) -> &Self {
        self.auth_replies
            .with_lock(|mut replies| replies.push_back(Some(reply)));
        self
    }

    /// The next token exchange never answers
    pub fn auth_hang(&self) -> &Self {
        self.auth_replies.with_lock(|mut replies| replies.push_back(None));
        self
    }

    pub fn routing_reply(&self, reply: Result<String>) -> &Self {
        self.routing_reply.with_lock(|mut slot| *slot = Some(reply));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.with_lock(|calls| calls.clone())
    }

    /// Stations fetched, in call order
    pub fn fetched(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.sta).collect()
    }

    pub fn auth_count(&self) -> usize {
        self.auth_calls.with_lock(|calls| calls.len())
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(&'static str, &str)],
        credentials: Option<&DigestCredentials>,
    ) -> Result<Response> {
        let sta = query
            .iter()
            .find(|(key, _)| *key == "sta")
            .map(|(_, value)| value.to_string())
            .unwrap_or_default();

        self.calls.with_lock(|mut calls| {
            calls.push(Call {
                url: url.to_owned(),
                sta: sta.clone(),
                authenticated: credentials.is_some(),
            })
        });

        let reply = self
            .replies
            .with_lock(|mut replies| replies.get_mut(&sta).and_then(VecDeque::pop_front));

        match reply {
            None => Ok(Response::Body(sta.into_bytes())),
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(status)) => Err(Error::HttpStatus {
                status,
                url: url.to_owned(),
            }),
            Some(Reply::Hang) => {
                self.hanging.notify_one();
                std::future::pending().await
            }
        }
    }

    async fn post_text(&self, url: &str, body: String, _accept: &'static str) -> Result<String> {
        if url.ends_with("/auth") {
            self.auth_calls
                .with_lock(|mut calls| calls.push((url.to_owned(), body)));
            let reply = self
                .auth_replies
                .with_lock(|mut replies| replies.pop_front())
                .unwrap_or_else(|| Some(Ok("user:password".to_owned())));
            return match reply {
                Some(reply) => reply,
                None => {
                    self.hanging.notify_one();
                    std::future::pending().await
                }
            };
        }

        self.routing_calls
            .with_lock(|mut calls| calls.push((url.to_owned(), body)));
        self.routing_reply
            .with_lock(|mut slot| slot.take())
            .unwrap_or_else(|| Ok(String::new()))
    }
}
