use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::{
    context::AppContext,
    credential::{AuthInfo, Credential},
    download::{RequestOrchestrator, RunState},
    result::{Error, Result},
    routing,
    settings::Settings,
    types::{BlobState, RequestId, RequestSpec},
    utils::MutexUtils,
};

/// What the user asks for when submitting a new request
#[derive(Debug, Clone)]
pub struct SubmitParams {
    pub description: String,

    /// JSON array of `[start, end, net, sta, cha, loc]`
    pub timewindows: String,
}

/// What the store holds for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    pub id: RequestId,
    pub filename: String,
    pub groups: usize,
    pub total: usize,
    pub data: usize,
    pub nodata: usize,
    pub bytes: usize,
}

impl RequestSummary {
    fn new(id: RequestId, spec: &RequestSpec, states: impl Iterator<Item = BlobState>) -> Self {
        let mut summary = Self {
            id,
            filename: spec.filename.clone(),
            groups: spec.groups.len(),
            total: spec.segment_count(),
            data: 0,
            nodata: 0,
            bytes: 0,
        };
        for state in states {
            match state {
                BlobState::Absent => {}
                BlobState::NoData => summary.nodata += 1,
                BlobState::Data(len) => {
                    summary.data += 1;
                    summary.bytes += len;
                }
            }
        }
        summary
    }

    /// Segments still to download
    pub fn missing(&self) -> usize {
        self.total - self.data - self.nodata
    }
}

/// Entry point of the download machinery
#[async_trait]
pub trait DownloadControl: Send + Sync {
    /// Route the time windows, persist the new request and start it
    async fn submit(&self, params: SubmitParams) -> Result<Arc<RequestOrchestrator>>;

    /// Start every persisted request not registered yet, and return them
    fn restore_all(&self) -> Result<Vec<Arc<RequestOrchestrator>>>;

    /// Replace the auth token, or remove it with `None`
    fn set_credential(&self, token: Option<&str>) -> Result<Option<AuthInfo>>;

    fn auth_info(&self) -> Option<AuthInfo>;

    /// Registered requests, oldest first
    fn requests(&self) -> Vec<Arc<RequestOrchestrator>>;

    fn get(&self, id: RequestId) -> Option<Arc<RequestOrchestrator>>;

    /// Download state of every persisted request, read from the store
    fn summaries(&self) -> Result<Vec<RequestSummary>>;

    /// Stop the request and delete it with all its data
    async fn purge(&self, id: RequestId) -> Result<()>;

    /// Stop every request and wait for them to finish
    async fn shutdown(&self);
}

/// Open the storage and return the matching control.
///
/// Without storage, downloads are disabled but the application keeps working.
pub fn open_control(settings: &Settings) -> Result<Box<dyn DownloadControl>> {
    match AppContext::open(settings) {
        Ok(ctx) => Ok(Box::new(RequestRegistry::init(ctx)?)),
        Err(Error::StorageUnavailable(msg)) => {
            error!("Local storage is unavailable, downloads are disabled: {msg}");
            Ok(Box::new(DummyControl))
        }
        Err(err) => Err(err),
    }
}

/// Keeps track of every request, persisted in the store.
pub struct RequestRegistry {
    ctx: AppContext,
    credential: Mutex<Option<Credential>>,
    requests: Mutex<BTreeMap<RequestId, Arc<RequestOrchestrator>>>,
}

impl RequestRegistry {
    /// Load the stored credential. Requests are only loaded by [DownloadControl::restore_all].
    pub fn init(ctx: AppContext) -> Result<Self> {
        let credential = match ctx.store.credential()? {
            None => None,
            Some(token) => match Credential::parse(&token) {
                Ok(credential) => {
                    info!("Using the auth token of {}", credential.info().user_id);
                    Some(credential)
                }
                Err(err) => {
                    warn!("Ignoring the stored auth token: {err}");
                    None
                }
            },
        };

        Ok(Self {
            ctx,
            credential: Mutex::new(credential),
            requests: Mutex::new(BTreeMap::new()),
        })
    }

    /// Token given to the requests created from now on
    fn token(&self) -> Option<String> {
        self.credential
            .with_lock(|credential| credential.as_ref().map(|c| c.token().to_owned()))
    }

    fn register(&self, id: RequestId, orchestrator: Arc<RequestOrchestrator>) {
        self.requests
            .with_lock(|mut requests| requests.insert(id, orchestrator));
    }
}

#[async_trait]
impl DownloadControl for RequestRegistry {
    async fn submit(&self, params: SubmitParams) -> Result<Arc<RequestOrchestrator>> {
        let windows = routing::parse_timewindows(&params.timewindows)?;
        let filename = routing::filename_for(&params.description);

        let groups = routing::route(
            self.ctx.transport.as_ref(),
            &self.ctx.settings.router_url,
            &windows,
        )
        .await?;

        let orchestrator = Arc::new(RequestOrchestrator::new(self.ctx.clone(), self.token()));
        orchestrator.load(RequestSpec::new(filename, groups))?;
        // The run is followed through the orchestrator, not its handle
        let _handle = orchestrator.create()?;

        let id = orchestrator.id().ok_or(Error::NotLoaded)?;
        self.register(id, orchestrator.clone());
        Ok(orchestrator)
    }

    fn restore_all(&self) -> Result<Vec<Arc<RequestOrchestrator>>> {
        let mut restored = Vec::new();

        for spec in self.ctx.store.all_requests()? {
            let Some(id) = spec.id else {
                continue;
            };
            if self.get(id).is_some() {
                continue;
            }

            let orchestrator = Arc::new(RequestOrchestrator::new(self.ctx.clone(), self.token()));
            orchestrator.load(spec)?;
            match orchestrator.start() {
                Ok(_handle) => info!("Request {id} restored"),
                Err(err) => warn!("Request {id} could not be restarted: {err}"),
            }

            self.register(id, orchestrator.clone());
            restored.push(orchestrator);
        }

        Ok(restored)
    }

    fn set_credential(&self, token: Option<&str>) -> Result<Option<AuthInfo>> {
        let Some(token) = token else {
            self.ctx.store.set_credential(None)?;
            self.credential.with_lock(|mut credential| *credential = None);
            info!("Auth token removed");
            return Ok(None);
        };

        let credential = Credential::parse(token)?;
        let info = credential.info().clone();
        if info.is_expired() {
            warn!("The auth token of {} expired on {}", info.user_id, info.valid_until);
        }

        self.ctx.store.set_credential(Some(credential.token()))?;
        self.credential
            .with_lock(|mut slot| *slot = Some(credential));
        info!("Auth token of {} saved", info.user_id);
        Ok(Some(info))
    }

    fn auth_info(&self) -> Option<AuthInfo> {
        self.credential
            .with_lock(|credential| credential.as_ref().map(|c| c.info().clone()))
    }

    fn requests(&self) -> Vec<Arc<RequestOrchestrator>> {
        self.requests
            .with_lock(|requests| requests.values().cloned().collect())
    }

    fn get(&self, id: RequestId) -> Option<Arc<RequestOrchestrator>> {
        self.requests.with_lock(|requests| requests.get(&id).cloned())
    }

    fn summaries(&self) -> Result<Vec<RequestSummary>> {
        let store = &self.ctx.store;

        store
            .all_requests()?
            .into_iter()
            .filter_map(|spec| spec.id.map(|id| (id, spec)))
            .map(|(id, spec)| {
                let states = spec
                    .segment_ids()
                    .into_iter()
                    .map(|segment| {
                        let blob = store.get_segment(segment)?;
                        Ok(BlobState::of(blob.as_deref()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(RequestSummary::new(id, &spec, states.into_iter()))
            })
            .collect()
    }

    async fn purge(&self, id: RequestId) -> Result<()> {
        let orchestrator = match self.get(id) {
            Some(orchestrator) => orchestrator,
            None => {
                // Persisted but never started in this process
                let spec = self
                    .ctx
                    .store
                    .all_requests()?
                    .into_iter()
                    .find(|spec| spec.id == Some(id))
                    .ok_or(Error::UnknownRequest(id))?;
                let orchestrator = Arc::new(RequestOrchestrator::new(self.ctx.clone(), None));
                orchestrator.load(spec)?;
                orchestrator
            }
        };

        orchestrator.purge().await?;
        self.requests.with_lock(|mut requests| requests.remove(&id));
        Ok(())
    }

    async fn shutdown(&self) {
        let requests: Vec<_> = self
            .requests()
            .into_iter()
            .filter(|orchestrator| orchestrator.state() == RunState::Running)
            .collect();
        for orchestrator in &requests {
            orchestrator.stop();
        }
        join_all(requests.iter().map(|orchestrator| orchestrator.wait_idle())).await;
    }
}

/// Stand-in used when the storage cannot be opened: downloads are disabled
#[derive(Debug, Default)]
pub struct DummyControl;

#[async_trait]
impl DownloadControl for DummyControl {
    async fn submit(&self, _params: SubmitParams) -> Result<Arc<RequestOrchestrator>> {
        Err(Error::DownloadsDisabled)
    }

    fn restore_all(&self) -> Result<Vec<Arc<RequestOrchestrator>>> {
        Ok(Vec::new())
    }

    fn set_credential(&self, _token: Option<&str>) -> Result<Option<AuthInfo>> {
        Ok(None)
    }

    fn auth_info(&self) -> Option<AuthInfo> {
        None
    }

    fn requests(&self) -> Vec<Arc<RequestOrchestrator>> {
        Vec::new()
    }

    fn get(&self, _id: RequestId) -> Option<Arc<RequestOrchestrator>> {
        None
    }

    fn summaries(&self) -> Result<Vec<RequestSummary>> {
        Ok(Vec::new())
    }

    async fn purge(&self, id: RequestId) -> Result<()> {
        Err(Error::UnknownRequest(id))
    }

    async fn shutdown(&self) {}
}
