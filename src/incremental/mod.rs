//! Incrementally rebuilt matcher.
//!
//! [`IncrementalMatcher`] accepts pattern additions and deletions while it is
//! being queried. Mutations are queued to a single background loop, the
//! [`Runner`], which on each trigger from its [`Policy`] folds the queued
//! batch into the live pattern set, compiles a brand-new [`Quamina`] from
//! the whole live set on a blocking thread, and publishes it with a single
//! pointer swap. Queries always read the latest published snapshot and
//! never wait on a rebuild.
//!
//! ```no_run
//! use std::time::Duration;
//! use quamina::{CancellationToken, IncrementalMatcher, Quamina, RebuildConfig, TempoPolicy};
//!
//! # async fn demo() -> Result<(), quamina::QuaminaError> {
//! let (matcher, runner) = IncrementalMatcher::new(Quamina::new(), RebuildConfig::default());
//! let cancel = CancellationToken::new();
//! let loop_handle = tokio::spawn(runner.run(TempoPolicy::new(Duration::from_millis(100)), cancel.clone()));
//!
//! matcher.add_pattern(1, r#"{"a":[1]}"#, &cancel).await?;
//! // Visible once the next rebuild has been published
//! tokio::time::sleep(Duration::from_millis(250)).await;
//! assert_eq!(matcher.matches_for_event(br#"{"a":1}"#)?, vec![1]);
//!
//! cancel.cancel();
//! # let _ = loop_handle.await;
//! # Ok(())
//! # }
//! ```

mod live;
mod policy;

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use arc_swap::ArcSwap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{Field, Quamina, QuaminaError};
use live::LivePatterns;

pub use live::Mutation;
pub use policy::{Policy, TempoPolicy};

/// Rebuild loop settings.
#[derive(Clone, Debug)]
pub struct RebuildConfig {
    /// Initial capacity of the buffer collecting mutations between rebuilds
    pub initial_batch_capacity: usize,
    /// Capacity of the rebuild report channel; `None` disables reports
    pub report_capacity: Option<usize>,
}

impl RebuildConfig {
    pub const DEFAULT_BATCH_CAPACITY: usize = 1024;

    pub fn with_initial_batch_capacity(mut self, capacity: usize) -> Self {
        self.initial_batch_capacity = capacity;
        self
    }

    /// Deliver rebuild reports through a channel holding up to `capacity`
    /// undelivered reports. Reports that don't fit are dropped.
    pub fn with_reports(mut self, capacity: usize) -> Self {
        self.report_capacity = Some(capacity.max(1));
        self
    }
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            initial_batch_capacity: Self::DEFAULT_BATCH_CAPACITY,
            report_capacity: None,
        }
    }
}

/// The outcome of one rebuild.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebuildReport {
    /// When the rebuild started
    pub at: SystemTime,
    pub duration: Duration,
    /// Number of pattern texts in the live set after folding the batch
    pub live_set_size: usize,
    /// The compile error, for a failed rebuild
    pub error: Option<String>,
}

struct Submission<X> {
    mutation: Mutation<X>,
    accepted: oneshot::Sender<()>,
}

/// Handle for querying and mutating an incrementally rebuilt matcher.
///
/// Clones share one coordinator. Queries are lock-free reads of the latest
/// published snapshot; mutations take effect after the next rebuild.
pub struct IncrementalMatcher<X = String> {
    published: Arc<ArcSwap<Quamina<X>>>,
    mutations: mpsc::Sender<Submission<X>>,
    template: Quamina<X>,
}

impl<X> Clone for IncrementalMatcher<X> {
    fn clone(&self) -> Self {
        Self {
            published: self.published.clone(),
            mutations: self.mutations.clone(),
            template: self.template.clone(),
        }
    }
}

impl<X> fmt::Debug for IncrementalMatcher<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalMatcher")
            .field("published_patterns", &self.published.load().pattern_count())
            .field("closed", &self.mutations.is_closed())
            .finish()
    }
}

impl<X: Clone + Eq + Hash + Send + Sync + 'static> IncrementalMatcher<X> {
    /// Create a matcher and the loop that rebuilds it.
    ///
    /// `template` supplies the flattener and predicate parser used for
    /// every rebuild; its patterns are ignored. Nothing is rebuilt until
    /// [`Runner::run`] is driven.
    pub fn new(template: Quamina<X>, config: RebuildConfig) -> (Self, Runner<X>) {
        let template = template.empty_like();
        let published = Arc::new(ArcSwap::from_pointee(template.empty_like()));
        let (mutations_tx, mutations_rx) = mpsc::channel(1);
        let (reports_tx, reports_rx) = match config.report_capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };

        let matcher = Self {
            published: published.clone(),
            mutations: mutations_tx,
            template: template.clone(),
        };
        let runner = Runner {
            published,
            mutations: mutations_rx,
            template,
            config,
            reports_tx,
            reports_rx,
        };
        (matcher, runner)
    }

    /// Queue a pattern for addition under `id`.
    ///
    /// The pattern is compiled on its own first, so syntax and range errors
    /// are returned here and never reach the live set. This can't rule out
    /// every failure of the later full rebuild, such as a predicate parser
    /// that rejects a spec it accepted before.
    ///
    /// Waits until the rebuild loop has accepted the mutation. Returns
    /// `Cancelled` if `cancel` fires first, in which case the mutation may
    /// or may not have been accepted; retrying is safe because adding the
    /// same text twice under one id is a no-op. Returns `Closed` if the
    /// loop has exited.
    pub async fn add_pattern(&self, id: X, pattern: &str, cancel: &CancellationToken) -> Result<(), QuaminaError> {
        let mut check = self.template.empty_like();
        check.add_pattern(id.clone(), pattern)?;

        self.submit(
            Mutation::Add {
                id,
                pattern: pattern.to_string(),
            },
            cancel,
        )
        .await
    }

    /// Queue the deletion of every pattern under `id`.
    pub async fn delete_pattern(&self, id: X, cancel: &CancellationToken) -> Result<(), QuaminaError> {
        self.submit(Mutation::Delete { id }, cancel).await
    }

    async fn submit(&self, mutation: Mutation<X>, cancel: &CancellationToken) -> Result<(), QuaminaError> {
        let (accepted, ack) = oneshot::channel();
        let submission = Submission { mutation, accepted };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QuaminaError::Cancelled),
            delivered = async {
                self.mutations
                    .send(submission)
                    .await
                    .map_err(|_| QuaminaError::Closed)?;
                ack.await.map_err(|_| QuaminaError::Closed)
            } => delivered,
        }
    }

    /// Match an event against the latest published snapshot.
    pub fn matches_for_event(&self, event: &[u8]) -> Result<Vec<X>, QuaminaError> {
        self.published.load().matches_for_event(event)
    }

    /// Match flattened fields against the latest published snapshot.
    pub fn matches_for_fields(&self, fields: &[Field]) -> Result<Vec<X>, QuaminaError> {
        self.published.load().matches_for_fields(fields)
    }

    /// The latest published snapshot.
    pub fn published(&self) -> Arc<Quamina<X>> {
        self.published.load_full()
    }

    /// True once the rebuild loop has exited.
    pub fn is_closed(&self) -> bool {
        self.mutations.is_closed()
    }
}

struct RebuildOutcome<X> {
    live: LivePatterns<X>,
    result: Result<Quamina<X>, QuaminaError>,
    at: SystemTime,
    duration: Duration,
}

/// The rebuild loop behind an [`IncrementalMatcher`].
pub struct Runner<X = String> {
    published: Arc<ArcSwap<Quamina<X>>>,
    mutations: mpsc::Receiver<Submission<X>>,
    template: Quamina<X>,
    config: RebuildConfig,
    reports_tx: Option<mpsc::Sender<RebuildReport>>,
    reports_rx: Option<mpsc::Receiver<RebuildReport>>,
}

impl<X: Clone + Eq + Hash + Send + Sync + 'static> Runner<X> {
    /// Take the receiving end of the report channel. `None` if reports are
    /// disabled or the receiver was already taken.
    pub fn reports(&mut self) -> Option<mpsc::Receiver<RebuildReport>> {
        self.reports_rx.take()
    }

    /// Run the rebuild loop until `cancel` fires.
    ///
    /// Returns `Ok(())` on cancellation. A failed rebuild ends the loop with
    /// `Rebuild`: the last published snapshot keeps serving queries, and
    /// further mutations get `Closed`. A rebuild still compiling when the
    /// loop stops is discarded along with the mutations it carried.
    pub async fn run<P: Policy<X>>(mut self, mut policy: P, cancel: CancellationToken) -> Result<(), QuaminaError> {
        info!(
            initial_batch_capacity = self.config.initial_batch_capacity,
            "incremental matcher running"
        );
        self.reports_rx = None;

        let mut live = LivePatterns::default();
        let mut pending: Vec<Mutation<X>> = Vec::with_capacity(self.config.initial_batch_capacity);
        let mut in_flight: Option<JoinHandle<RebuildOutcome<X>>> = None;
        let mut senders_gone = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(pending = pending.len(), rebuilding = in_flight.is_some(), "incremental matcher stopped");
                    return Ok(());
                }
                joined = join_in_flight(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!(error = %e, "rebuild task failed");
                            return Err(QuaminaError::Rebuild(e.to_string()));
                        }
                    };
                    let live_set_size = outcome.live.size();
                    live = outcome.live;
                    match outcome.result {
                        Ok(q) => {
                            self.published.store(Arc::new(q));
                            info!(live_set_size, duration = ?outcome.duration, "published rebuilt matcher");
                            self.report(RebuildReport {
                                at: outcome.at,
                                duration: outcome.duration,
                                live_set_size,
                                error: None,
                            });
                        }
                        Err(e) => {
                            error!(error = %e, live_set_size, "rebuild failed");
                            self.report(RebuildReport {
                                at: outcome.at,
                                duration: outcome.duration,
                                live_set_size,
                                error: Some(e.to_string()),
                            });
                            return Err(QuaminaError::Rebuild(e.to_string()));
                        }
                    }
                }
                received = self.mutations.recv(), if !senders_gone => {
                    match received {
                        Some(Submission { mutation, accepted }) => {
                            debug!(kind = mutation.kind(), pending = pending.len() + 1, "heard mutation");
                            policy.observe(&mutation);
                            pending.push(mutation);
                            // The submitter may have given up waiting
                            let _ = accepted.send(());
                        }
                        None => {
                            debug!("all matcher handles dropped");
                            senders_gone = true;
                        }
                    }
                }
                _ = policy.triggered() => {
                    if in_flight.is_some() {
                        debug!(pending = pending.len(), "trigger dropped, rebuild in progress");
                        continue;
                    }
                    if pending.is_empty() {
                        debug!("trigger with no pending mutations");
                        continue;
                    }
                    let batch = std::mem::replace(
                        &mut pending,
                        Vec::with_capacity(self.config.initial_batch_capacity),
                    );
                    debug!(batch = batch.len(), "starting rebuild");
                    let patterns = std::mem::take(&mut live);
                    let template = self.template.clone();
                    in_flight = Some(tokio::task::spawn_blocking(move || {
                        rebuild(patterns, batch, &template)
                    }));
                }
            }
        }
    }

    fn report(&self, report: RebuildReport) {
        let Some(tx) = &self.reports_tx else {
            return;
        };
        match tx.try_send(report) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("rebuild report dropped, receiver is behind"),
            Err(TrySendError::Closed(_)) => debug!("rebuild report dropped, no receiver"),
        }
    }
}

async fn join_in_flight<T>(handle: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Fold `batch` into `live` and compile the result from scratch.
fn rebuild<X: Clone + Eq + Hash>(
    mut live: LivePatterns<X>,
    batch: Vec<Mutation<X>>,
    template: &Quamina<X>,
) -> RebuildOutcome<X> {
    let at = SystemTime::now();
    let started = Instant::now();
    live.fold(batch);
    let result = live.compile(template);
    RebuildOutcome {
        live,
        result,
        at,
        duration: started.elapsed(),
    }
}
