use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use futures::future::join_all;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::SegmentFetcher;
use crate::{
    context::AppContext,
    result::{Error, Result},
    types::{Artifact, RequestId, RequestSpec, SegmentStatus},
    utils::MutexUtils,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Purged,
}

/// Settled and total number of segments of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub settled: usize,
    pub total: usize,
}

/// Coordinates the fetchers of a request, one per endpoint group,
/// and assembles their output once they have all finished.
pub struct RequestOrchestrator {
    ctx: AppContext,

    /// Token snapshot at construction, later changes do not apply
    token: Option<String>,

    spec: Mutex<Option<RequestSpec>>,
    fetchers: Mutex<Vec<Arc<SegmentFetcher>>>,
    finished: AtomicUsize,
    artifact: Mutex<Option<Artifact>>,
    state: watch::Sender<RunState>,
}

impl RequestOrchestrator {
    pub fn new(ctx: AppContext, token: Option<String>) -> Self {
        Self {
            ctx,
            token,
            spec: Mutex::new(None),
            fetchers: Mutex::new(Vec::new()),
            finished: AtomicUsize::new(0),
            artifact: Mutex::new(None),
            state: watch::Sender::new(RunState::Idle),
        }
    }

    /// Bind to a request spec, persisted or not, without allocating anything.
    ///
    /// Only allowed while idle: the fetchers of a running request must stay reachable.
    pub fn load(&self, spec: RequestSpec) -> Result<()> {
        self.ensure_idle()?;
        self.spec.with_lock(|mut slot| *slot = Some(spec));
        self.fetchers.with_lock(|mut fetchers| fetchers.clear());
        Ok(())
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.state() {
            RunState::Idle => Ok(()),
            RunState::Running => Err(Error::AlreadyRunning),
            RunState::Purged => Err(Error::Purged),
        }
    }

    pub fn id(&self) -> Option<RequestId> {
        self.spec.with_lock(|spec| spec.as_ref().and_then(|spec| spec.id))
    }

    pub fn spec(&self) -> Option<RequestSpec> {
        self.spec.with_lock(|spec| spec.clone())
    }

    pub fn filename(&self) -> Option<String> {
        self.spec
            .with_lock(|spec| spec.as_ref().map(|spec| spec.filename.clone()))
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// The output of the last finished run
    pub fn artifact(&self) -> Option<Artifact> {
        self.artifact.with_lock(|artifact| artifact.clone())
    }

    /// Number of fetchers that finished the current run
    pub fn finished_groups(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> Progress {
        let total = self
            .spec
            .with_lock(|spec| spec.as_ref().map_or(0, RequestSpec::segment_count));
        let settled = self
            .fetchers
            .with_lock(|fetchers| fetchers.iter().map(|f| f.reached()).sum());
        Progress { settled, total }
    }

    /// Status of every segment, grouped by endpoint. Empty before the first start.
    pub fn statuses(&self) -> Vec<(String, Vec<SegmentStatus>)> {
        self.fetchers.with_lock(|fetchers| {
            fetchers
                .iter()
                .map(|f| (f.url().to_owned(), f.statuses()))
                .collect()
        })
    }

    /// Persist the loaded request and start it.
    ///
    /// Placeholders for all segments are allocated in one transaction,
    /// then the request record is written in another. The download only
    /// starts once both are committed.
    pub fn create(self: &Arc<Self>) -> Result<JoinHandle<Result<Artifact>>> {
        let mut spec = self.spec().ok_or(Error::NotLoaded)?;
        self.ensure_idle()?;
        if let Some(id) = spec.id {
            return Err(Error::AlreadyCreated(id));
        }
        let store = &self.ctx.store;

        let ids = store.allocate_segments(spec.segment_count())?;
        if !spec.assign_segment_ids(&ids) {
            return Err(Error::StorageUnavailable(
                "allocated segment ids do not match the request".to_owned(),
            ));
        }

        let id = match store.create_request(&spec) {
            Ok(id) => id,
            Err(err) => {
                // Do not leave orphan placeholders behind
                for id in &ids {
                    if let Err(err) = store.delete_segment(*id) {
                        warn!("Could not delete placeholder {id}: {err}");
                    }
                }
                return Err(err);
            }
        };
        spec.id = Some(id);
        info!(
            "Request {id} ({}) created with {} segments in {} groups",
            spec.filename,
            ids.len(),
            spec.groups.len()
        );

        self.load(spec)?;
        self.start()
    }

    /// Run every fetcher concurrently in the background until they all finish,
    /// completed or stopped. The task returns the assembled output.
    ///
    /// Refused while a previous run has not finished, and after a purge.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<Result<Artifact>>> {
        let armed = self.begin()?;

        let this = self.clone();
        let span = info_span!("request", id = self.id().unwrap_or_default());
        Ok(tokio::spawn(
            async move { this.execute(armed).await }.instrument(span),
        ))
    }

    /// [Self::start] without spawning
    #[cfg(test)]
    pub async fn run(&self) -> Result<Artifact> {
        let armed = self.begin()?;
        self.execute(armed).await
    }

    /// Switch to running if allowed, and arm the fetchers.
    ///
    /// Everything is ready when this returns, so a stop right after a start is not lost.
    fn begin(&self) -> Result<Vec<(Arc<SegmentFetcher>, CancellationToken)>> {
        if self.spec.with_lock(|spec| spec.is_none()) {
            return Err(Error::NotLoaded);
        }

        let mut res = Ok(());
        self.state.send_if_modified(|state| match *state {
            RunState::Idle => {
                *state = RunState::Running;
                true
            }
            RunState::Running => {
                res = Err(Error::AlreadyRunning);
                false
            }
            RunState::Purged => {
                res = Err(Error::Purged);
                false
            }
        });
        res?;

        self.finished.store(0, Ordering::SeqCst);
        self.artifact.with_lock(|mut artifact| *artifact = None);

        Ok(self
            .build_fetchers()
            .into_iter()
            .map(|fetcher| {
                let token = fetcher.arm();
                (fetcher, token)
            })
            .collect())
    }

    /// Construct the fetchers, unless they already are
    fn build_fetchers(&self) -> Vec<Arc<SegmentFetcher>> {
        let groups = self
            .spec
            .with_lock(|spec| spec.as_ref().map(|spec| spec.groups.clone()))
            .unwrap_or_default();

        self.fetchers.with_lock(|mut fetchers| {
            if fetchers.is_empty() {
                *fetchers = groups
                    .into_iter()
                    .map(|group| {
                        Arc::new(SegmentFetcher::new(
                            group,
                            self.ctx.store.clone(),
                            self.ctx.transport.clone(),
                            self.token.clone(),
                        ))
                    })
                    .collect();
            }
            fetchers.clone()
        })
    }

    async fn execute(&self, armed: Vec<(Arc<SegmentFetcher>, CancellationToken)>) -> Result<Artifact> {
        let runs = armed.iter().map(|(fetcher, token)| async move {
            fetcher.run(token.clone()).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
        });
        join_all(runs).await;

        debug!("{}/{} groups finished", self.finished_groups(), armed.len());

        // Group order, whatever the completion order was
        let parts = armed
            .iter()
            .flat_map(|(fetcher, _)| fetcher.assemble_output())
            .collect();
        let filename = self.filename().unwrap_or_default();
        let artifact = Artifact::new(filename, parts);
        info!("{} ready, {} bytes", artifact.filename, artifact.len());

        self.artifact
            .with_lock(|mut slot| *slot = Some(artifact.clone()));
        self.state.send_replace(RunState::Idle);
        Ok(artifact)
    }

    /// Stop every fetcher. The run still finishes normally with what was downloaded.
    pub fn stop(&self) {
        self.fetchers.with_lock(|fetchers| {
            for fetcher in fetchers.iter() {
                fetcher.stop();
            }
        });
    }

    /// Wait for the current run, if any, to finish
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in self, the channel cannot close while we borrow it
        let _ = rx.wait_for(|state| *state != RunState::Running).await;
    }

    /// Delete the request and all its segments from the store.
    /// The orchestrator cannot be started anymore afterwards.
    pub async fn purge(&self) -> Result<()> {
        self.stop();
        self.wait_idle().await;
        self.state.send_replace(RunState::Purged);
        self.artifact.with_lock(|mut artifact| *artifact = None);

        let Some(spec) = self.spec() else {
            return Ok(());
        };
        let Some(id) = spec.id else {
            // Never persisted
            return Ok(());
        };

        self.ctx.store.delete_request(id, &spec.segment_ids())?;
        info!("Request {id} ({}) deleted", spec.filename);
        Ok(())
    }
}
