use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::cache::StaleCache;
use crate::domain::{RawFeed, Source, SourceId, SourceRegistry};
use crate::error::{DataError, FetchError};
use crate::fetch::{FeedClient, fetch};
use crate::normalize;
use crate::reference::ReferenceData;
use crate::storage::StorageWriter;

#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOptions {
    /// Treat every feed as stale.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidUrl,
    ConnectionFailure,
    Timeout,
    UnknownTransport,
    InvalidData,
    Storage,
    Cache,
    RefreshInProgress,
    Internal,
}

impl FailureKind {
    pub fn status(&self) -> &'static str {
        match self {
            FailureKind::InvalidUrl => "Invalid URL",
            FailureKind::ConnectionFailure => "Unable to Connect to Internet",
            FailureKind::Timeout => "Connection Timeout",
            FailureKind::UnknownTransport | FailureKind::Internal => "Unknown",
            FailureKind::InvalidData => "Invalid Data",
            FailureKind::Storage => "Storage Error",
            FailureKind::Cache => "Cache Error",
            FailureKind::RefreshInProgress => "Refresh In Progress",
        }
    }
}

impl From<&DataError> for FailureKind {
    fn from(err: &DataError) -> Self {
        match err {
            DataError::Fetch { error, .. } => match error {
                FetchError::InvalidUrl { .. } => FailureKind::InvalidUrl,
                FetchError::ConnectionFailure(_) => FailureKind::ConnectionFailure,
                FetchError::Timeout(_) => FailureKind::Timeout,
                FetchError::UnknownTransport(_) => FailureKind::UnknownTransport,
            },
            DataError::MissingColumn { .. }
            | DataError::Malformed { .. }
            | DataError::UnknownStateCode(_)
            | DataError::Reference { .. } => FailureKind::InvalidData,
            DataError::Storage(_) => FailureKind::Storage,
            DataError::RefreshInProgress => FailureKind::RefreshInProgress,
            DataError::Filesystem(_) => FailureKind::Cache,
            DataError::ConfigRead(_)
            | DataError::ConfigParse(_)
            | DataError::UnknownSource(_)
            | DataError::HttpClient(_)
            | DataError::Internal(_) => FailureKind::Internal,
        }
    }
}

/// Result of one refresh as reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Success {
        updated_at: DateTime<Local>,
    },
    NoRefreshNeeded {
        last_update: Option<DateTime<Local>>,
    },
    Failed {
        kind: FailureKind,
        reason: String,
        last_update: Option<DateTime<Local>>,
    },
}

impl RefreshOutcome {
    fn failed(err: &DataError, last_update: Option<DateTime<Local>>) -> Self {
        RefreshOutcome::Failed {
            kind: FailureKind::from(err),
            reason: err.to_string(),
            last_update,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            RefreshOutcome::Success { .. } => "Success",
            RefreshOutcome::NoRefreshNeeded { .. } => "No download",
            RefreshOutcome::Failed { kind, .. } => kind.status(),
        }
    }

    /// Most recent moment the stored data is known to reflect.
    pub fn last_update(&self) -> Option<DateTime<Local>> {
        match self {
            RefreshOutcome::Success { updated_at } => Some(*updated_at),
            RefreshOutcome::NoRefreshNeeded { last_update }
            | RefreshOutcome::Failed { last_update, .. } => *last_update,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RefreshOutcome::Failed { .. })
    }

    pub fn reason(&self) -> String {
        match self {
            RefreshOutcome::Success { .. } => "database updated".to_string(),
            RefreshOutcome::NoRefreshNeeded { .. } => "all feeds are current".to_string(),
            RefreshOutcome::Failed { reason, .. } => reason.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Owns the single-refresh slot while a refresh runs.
struct FlightGuard(Arc<AtomicBool>);

impl FlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A refresh running on a worker thread.
#[derive(Debug)]
pub struct RefreshTask {
    receiver: Receiver<RefreshOutcome>,
    handle: JoinHandle<()>,
    /// Reported if the worker dies before sending an outcome.
    last_update: Option<DateTime<Local>>,
}

impl RefreshTask {
    /// Blocks until the refresh finishes.
    pub fn wait(self) -> RefreshOutcome {
        let outcome = self
            .receiver
            .recv()
            .unwrap_or_else(|_| worker_lost(self.last_update));
        let _ = self.handle.join();
        outcome
    }

    /// Non-blocking poll for the outcome.
    pub fn try_outcome(&self) -> Option<RefreshOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(worker_lost(self.last_update)),
        }
    }
}

fn worker_lost(last_update: Option<DateTime<Local>>) -> RefreshOutcome {
    RefreshOutcome::Failed {
        kind: FailureKind::Internal,
        reason: "refresh worker stopped without reporting".to_string(),
        last_update,
    }
}

/// Orchestrates staleness checks, downloads, normalization and the commit.
pub struct App<C: FeedClient, S: StorageWriter> {
    registry: SourceRegistry,
    cache: StaleCache,
    references: ReferenceData,
    client: C,
    storage: S,
    in_flight: Arc<AtomicBool>,
}

impl<C: FeedClient, S: StorageWriter> App<C, S> {
    pub fn new(
        registry: SourceRegistry,
        cache: StaleCache,
        references: ReferenceData,
        client: C,
        storage: S,
    ) -> Self {
        Self {
            registry,
            cache,
            references,
            client,
            storage,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &StaleCache {
        &self.cache
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Runs one refresh on the calling thread.
    pub fn refresh(&self, options: RefreshOptions, sink: &dyn ProgressSink) -> RefreshOutcome {
        let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
            let last_update = self.cache.last_update(self.registry.sources());
            return RefreshOutcome::failed(&DataError::RefreshInProgress, last_update);
        };
        self.refresh_exclusive(options, sink)
    }

    fn refresh_exclusive(&self, options: RefreshOptions, sink: &dyn ProgressSink) -> RefreshOutcome {
        let start = Instant::now();
        let last_update = self.cache.last_update(self.registry.sources());

        sink.event(ProgressEvent {
            message: "phase=Check; checking cached feeds".to_string(),
            elapsed: None,
        });
        let now = Local::now();
        let stale: Vec<&Source> = self
            .registry
            .sources()
            .iter()
            .filter(|source| options.force || self.cache.needs_refresh_at(source, now))
            .collect();

        if stale.is_empty() {
            tracing::info!("all feeds current, nothing to refresh");
            return RefreshOutcome::NoRefreshNeeded { last_update };
        }

        let outcome = match self.update(&stale, sink) {
            Ok(updated_at) => RefreshOutcome::Success { updated_at },
            Err(err) => {
                tracing::warn!(error = %err, "refresh failed");
                RefreshOutcome::failed(&err, last_update)
            }
        };
        sink.event(ProgressEvent {
            message: format!("phase=Done; {}", outcome.status()),
            elapsed: Some(start.elapsed()),
        });
        outcome
    }

    fn update(&self, stale: &[&Source], sink: &dyn ProgressSink) -> Result<DateTime<Local>, DataError> {
        self.cache.ensure_cache_root()?;

        sink.event(ProgressEvent {
            message: format!("phase=Fetch; downloading {} feed(s)", stale.len()),
            elapsed: None,
        });
        let fresh = self.fetch_all(stale)?;

        let mut feeds: BTreeMap<SourceId, RawFeed> = BTreeMap::new();
        for source in self.registry.sources() {
            if !fresh.iter().any(|feed| feed.source == source.id) {
                feeds.insert(source.id, self.cache.read(source)?);
            }
        }
        for feed in &fresh {
            feeds.insert(feed.source, feed.clone());
        }
        let bytes = |id: SourceId| {
            feeds
                .get(&id)
                .map(|feed| feed.bytes.as_slice())
                .ok_or_else(|| DataError::Filesystem(format!("no payload for {id}")))
        };

        sink.event(ProgressEvent {
            message: "phase=Normalize; reconciling feeds".to_string(),
            elapsed: None,
        });
        let global = normalize::global::normalize(bytes(SourceId::Global)?)?;
        let india_daily = normalize::india_daily::normalize(
            bytes(SourceId::IndiaDaily)?,
            &self.references.state_codes,
        )?;
        let india_total = normalize::india_total::normalize(
            bytes(SourceId::IndiaTotal)?,
            &self.references.population,
        )?;

        sink.event(ProgressEvent {
            message: "phase=Store; committing relations".to_string(),
            elapsed: None,
        });
        self.storage.commit(&global, &india_daily, &india_total)?;

        // A feed that fails to cache stays stale and is refetched next cycle.
        for feed in &fresh {
            if let Err(err) = self.cache.store(feed) {
                tracing::warn!(source = %feed.source, error = %err, "failed to cache feed");
            }
        }
        Ok(Local::now())
    }

    /// Downloads every stale feed concurrently and waits for all of them.
    /// The first failure in registry order wins.
    fn fetch_all(&self, stale: &[&Source]) -> Result<Vec<RawFeed>, DataError> {
        let client: &dyn FeedClient = &self.client;
        let cache = &self.cache;
        let results: Vec<Result<RawFeed, DataError>> = thread::scope(|scope| {
            let handles: Vec<_> = stale
                .iter()
                .map(|source| scope.spawn(move || fetch(client, cache, source)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(DataError::Internal("fetch worker panicked".to_string()))
                    })
                })
                .collect()
        });
        results.into_iter().collect()
    }
}

impl<C, S> App<C, S>
where
    C: FeedClient + 'static,
    S: StorageWriter + 'static,
{
    /// Starts a refresh on a worker thread. Fails fast with
    /// `RefreshInProgress` when another refresh holds the slot.
    pub fn spawn_refresh<P>(
        self: &Arc<Self>,
        options: RefreshOptions,
        sink: P,
    ) -> Result<RefreshTask, DataError>
    where
        P: ProgressSink + Send + 'static,
    {
        let guard = FlightGuard::acquire(&self.in_flight).ok_or(DataError::RefreshInProgress)?;
        let last_update = self.cache.last_update(self.registry.sources());
        let app = Arc::clone(self);
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("covid19-refresh".to_string())
            .spawn(move || {
                let _guard = guard;
                let outcome = app.refresh_exclusive(options, &sink);
                let _ = tx.send(outcome);
            })
            .map_err(|err| DataError::Internal(format!("spawn refresh worker: {err}")))?;
        Ok(RefreshTask {
            receiver: rx,
            handle,
            last_update,
        })
    }
}
