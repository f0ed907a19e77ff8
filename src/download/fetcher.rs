use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    credential::DigestCredentials,
    database::BlobStore,
    endpoint::{auth_url, queryauth_url},
    outside::{Response, Transport},
    result::{Error, Result},
    types::{BlobState, EndpointGroup, SegmentSpec, SegmentStatus},
    utils::MutexUtils,
};

/// Authentication state of one endpoint group.
///
/// The token is exchanged at most once; whatever happens afterwards only
/// ever removes credentials, so a failing endpoint degrades to anonymous access.
#[derive(Debug, Default)]
struct AuthState {
    token: Option<String>,
    credentials: Option<DigestCredentials>,
    exchanged: bool,
}

impl AuthState {
    /// Take the token for an exchange, if there is one left to try
    fn exchange_token(&mut self) -> Option<String> {
        if self.exchanged {
            return None;
        }
        let token = self.token.clone()?;
        self.exchanged = true;
        Some(token)
    }

    /// The exchange was interrupted before any answer, it may be tried again
    fn abort_exchange(&mut self) {
        self.exchanged = false;
    }

    fn invalidate(&mut self) {
        self.token = None;
        self.credentials = None;
    }
}

/// How processing a segment ended
enum Outcome {
    /// Persisted, found in the store, or marked as error
    Settled,
    Cancelled,
}

/// Fetches the segments of one endpoint group, one after the other.
///
/// A segment is only started once the outcome of the previous one is
/// stored, so after a restart every segment before [Self::reached] is known.
pub struct SegmentFetcher {
    group: EndpointGroup,
    store: Arc<dyn BlobStore>,
    transport: Arc<dyn Transport>,

    auth: Mutex<AuthState>,
    statuses: Mutex<Vec<SegmentStatus>>,
    reached: AtomicUsize,
    cancel: Mutex<CancellationToken>,
}

impl SegmentFetcher {
    pub fn new(
        group: EndpointGroup,
        store: Arc<dyn BlobStore>,
        transport: Arc<dyn Transport>,
        token: Option<String>,
    ) -> Self {
        let statuses = vec![SegmentStatus::Pending; group.params.len()];

        Self {
            group,
            store,
            transport,
            auth: Mutex::new(AuthState {
                token,
                ..AuthState::default()
            }),
            statuses: Mutex::new(statuses),
            reached: AtomicUsize::new(0),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn url(&self) -> &str {
        &self.group.url
    }

    pub fn segment_count(&self) -> usize {
        self.group.params.len()
    }

    /// Number of segments whose outcome is settled in the current run
    pub fn reached(&self) -> usize {
        self.reached.load(Ordering::SeqCst)
    }

    pub fn statuses(&self) -> Vec<SegmentStatus> {
        self.statuses.with_lock(|statuses| statuses.clone())
    }

    /// Prepare a new run and return the token that stops it.
    ///
    /// A [Self::stop] issued after this call is seen by the run
    /// even if the run has not been polled yet.
    pub fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        self.cancel.with_lock(|mut cancel| *cancel = token.clone());
        self.reached.store(0, Ordering::SeqCst);
        token
    }

    /// Arm and return the run
    #[cfg(test)]
    pub fn start(&self) -> impl Future<Output = ()> + Send + '_ {
        let token = self.arm();
        self.run(token)
    }

    /// Abort the in-flight request and do not start any new segment
    pub fn stop(&self) {
        self.cancel.with_lock(|cancel| cancel.cancel());
    }

    /// Process the segments in order until the end or until the token is cancelled
    pub async fn run(&self, token: CancellationToken) {
        debug!("Starting {} segments from {}", self.segment_count(), self.url());

        for (idx, segment) in self.group.params.iter().enumerate() {
            if token.is_cancelled() {
                break;
            }

            match self.process(idx, segment, &token).await {
                Outcome::Settled => {
                    self.reached.store(idx + 1, Ordering::SeqCst);
                }
                Outcome::Cancelled => break,
            }
        }

        if token.is_cancelled() {
            info!("{}: stopped after {}/{} time windows", self.url(), self.reached(), self.segment_count());
        } else {
            info!("{}: {} time windows done", self.url(), self.segment_count());
        }
    }

    fn set_status(&self, idx: usize, status: SegmentStatus) {
        self.statuses.with_lock(|mut statuses| {
            if let Some(slot) = statuses.get_mut(idx) {
                *slot = status;
            }
        });
    }

    async fn process(&self, idx: usize, segment: &SegmentSpec, token: &CancellationToken) -> Outcome {
        let Some(id) = segment.id else {
            error!("{segment}: segment has no storage id, skipping it");
            self.set_status(idx, SegmentStatus::Error("not persisted".to_owned()));
            return Outcome::Settled;
        };

        // Checking: anything already stored, even empty, is final
        match self.store.get_segment(id) {
            Ok(Some(blob)) => {
                debug!("{segment}: already downloaded");
                self.set_status(idx, BlobState::of(Some(&blob)).into());
                return Outcome::Settled;
            }
            Ok(None) => {}
            Err(err) => warn!("{segment}: could not check the store ({err}), fetching it"),
        }

        let data = match self.retrieve(segment, token).await {
            Ok(data) => data,
            Err(Error::Cancelled) => return Outcome::Cancelled,
            Err(err) => {
                warn!("{segment}: {err}");
                self.set_status(idx, SegmentStatus::Error(err.to_string()));
                return Outcome::Settled;
            }
        };

        // The write is not cancellable, a stop takes effect before the next segment
        let status: SegmentStatus = BlobState::of(Some(&data)).into();
        match self.store.put_segment(id, Some(&data)) {
            Ok(()) => {
                info!("{segment}: {status}");
                self.set_status(idx, status);
            }
            Err(err) => {
                error!("{segment}: could not store the data: {err}");
                self.set_status(idx, SegmentStatus::Error(err.to_string()));
            }
        }
        Outcome::Settled
    }

    /// Fetching, with the authentication detour when the endpoint asks for it
    async fn retrieve(&self, segment: &SegmentSpec, token: &CancellationToken) -> Result<Vec<u8>> {
        let query = segment.query_pairs();

        loop {
            let credentials = self.auth.with_lock(|auth| auth.credentials.clone());
            let url = match credentials {
                Some(_) => queryauth_url(self.url()),
                None => self.url().to_owned(),
            };

            let response = cancellable(
                token,
                self.transport.get(&url, &query, credentials.as_ref()),
            )
            .await?;

            match response {
                Response::Body(data) => return Ok(data),
                Response::Empty => return Ok(Vec::new()),
                Response::Unauthorized if credentials.is_some() => {
                    warn!("{url}: credentials rejected, continuing anonymously");
                    self.auth.with_lock(|mut auth| auth.invalidate());
                    return Err(Error::SegmentFetchFailed("401 Unauthorized".to_owned()));
                }
                Response::Unauthorized => {
                    let Some(auth_token) = self.auth.with_lock(|mut auth| auth.exchange_token())
                    else {
                        return Err(Error::SegmentFetchFailed("401 Unauthorized".to_owned()));
                    };

                    // Either way the next attempt will not come back here:
                    // credentials are set, or the token is gone
                    self.authenticate(auth_token, token).await?;
                }
            }
        }
    }

    /// Authenticating: exchange the token for a `username:password` pair.
    ///
    /// Only a cancellation is returned as an error, a failed exchange clears the token.
    async fn authenticate(&self, auth_token: String, token: &CancellationToken) -> Result<()> {
        let url = auth_url(self.url());
        debug!("Exchanging auth token at {url}");

        let res = cancellable(token, self.transport.post_text(&url, auth_token, "text/plain"))
            .await
            .and_then(|text| DigestCredentials::parse(&text));

        match res {
            Ok(credentials) => {
                info!("{url}: authenticated as {}", credentials.username);
                self.auth
                    .with_lock(|mut auth| auth.credentials = Some(credentials));
                Ok(())
            }
            Err(Error::Cancelled) => {
                self.auth.with_lock(|mut auth| auth.abort_exchange());
                Err(Error::Cancelled)
            }
            Err(err) => {
                error!("{url}: authentication failed: {err}");
                self.auth.with_lock(|mut auth| auth.invalidate());
                Ok(())
            }
        }
    }

    /// The stored blobs of the segments reached, in order, skipping the absent ones
    pub fn assemble_output(&self) -> Vec<Vec<u8>> {
        let reached = self.reached();

        self.group.params[..reached.min(self.segment_count())]
            .iter()
            .filter_map(|segment| {
                let id = segment.id?;
                match self.store.get_segment(id) {
                    Ok(blob) => blob,
                    Err(err) => {
                        warn!("{segment}: could not read the stored data: {err}");
                        None
                    }
                }
            })
            .collect()
    }
}

/// Run the future unless the token gets cancelled first
async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = token.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}
