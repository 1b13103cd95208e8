//! Background polling that keeps watched documents in sync with their source.
//!
//! Every watched document gets one tokio task. The task sleeps for the current
//! interval, fetches the remote version, rebases the local document onto it,
//! and reports the outcome as a [`SyncEvent`]. Transport failures double the
//! interval; any other completed cycle resets it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RebaseFailure;
use crate::types::Difference;
use crate::workspace::{Rebase, Workspace};

const EVENT_CAPACITY: usize = 32;

/// Poll timing for a [`Watcher`].
///
/// # Example
///
/// ```rust
/// use json_magic::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::default()
///     .with_initial_interval(Duration::from_secs(2))
///     .with_max_interval(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Interval between polls while nothing fails.
    pub initial_interval: Duration,
    /// Cap for the doubled interval (None = uncapped).
    pub max_interval: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(5),
            max_interval: Some(Duration::from_secs(300)),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn without_max_interval(mut self) -> Self {
        self.max_interval = None;
        self
    }
}

/// Where a watched document is in its poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Polling,
    Applying,
    AwaitingConflictResolution,
    BackoffWait,
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Remote changes were applied without conflicts.
    Updated {
        name: String,
        applied: Vec<Difference>,
    },
    /// Conflicts need a decision; resolve them through the [`Rebase`].
    Conflicts(Rebase),
    NoChanges {
        name: String,
    },
    /// `retry_in` is `None` when the watch ended.
    Failed {
        name: String,
        failure: RebaseFailure,
        retry_in: Option<Duration>,
    },
}

#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    max: Option<Duration>,
    current: Duration,
    failures: u32,
}

impl Backoff {
    fn new(config: &SyncConfig) -> Self {
        Self {
            initial: config.initial_interval,
            max: config.max_interval,
            current: config.initial_interval,
            failures: 0,
        }
    }

    fn current(&self) -> Duration {
        self.current
    }

    fn is_backing_off(&self) -> bool {
        self.failures > 0
    }

    fn fail(&mut self) -> Duration {
        let doubled = self.current.saturating_mul(2);
        self.current = match self.max {
            Some(max) => doubled.min(max),
            None => doubled,
        };
        self.failures = self.failures.saturating_add(1);
        self.current
    }

    fn reset(&mut self) {
        self.current = self.initial;
        self.failures = 0;
    }
}

struct WatchHandle {
    stop: Arc<Notify>,
    active: Arc<AtomicBool>,
    state: watch::Receiver<SyncState>,
    task: JoinHandle<()>,
}

/// Runs one poll loop per watched document.
///
/// Dropping the watcher aborts every loop.
pub struct Watcher {
    workspace: Workspace,
    config: SyncConfig,
    events: mpsc::Sender<SyncEvent>,
    tasks: Mutex<HashMap<String, WatchHandle>>,
    /// Stopped loops that may still be settling a fetch.
    stopping: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Watcher {
    /// Create a watcher and the receiver its events are delivered to.
    pub fn new(workspace: Workspace, config: SyncConfig) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_CAPACITY);
        let watcher = Self {
            workspace,
            config,
            events,
            tasks: Mutex::new(HashMap::new()),
            stopping: Mutex::new(HashMap::new()),
        };
        (watcher, receiver)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<String, WatchHandle>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stopping(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.stopping.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start polling `name`. Must be called inside a tokio runtime.
    ///
    /// Watching a document that is already watched does nothing. After a
    /// [`stop`](Self::stop) the new loop first waits for the stopped one to
    /// settle its fetch.
    ///
    /// # Errors
    ///
    /// Returns `RebaseFailure::DocumentNotFound` or `RebaseFailure::NoSourceUrl`
    /// when there is nothing to poll.
    pub fn watch(&self, name: &str) -> Result<(), RebaseFailure> {
        if !self.workspace.contains(name) {
            return Err(RebaseFailure::DocumentNotFound {
                name: name.to_string(),
            });
        }
        if self.workspace.source_url(name).is_none() {
            return Err(RebaseFailure::NoSourceUrl {
                name: name.to_string(),
            });
        }

        let mut tasks = self.lock_tasks();
        if tasks.get(name).is_some_and(|handle| !handle.task.is_finished()) {
            return Ok(());
        }

        self.workspace
            .set_watch(name, true)
            .map_err(|_| RebaseFailure::DocumentNotFound {
                name: name.to_string(),
            })?;

        let stop = Arc::new(Notify::new());
        let active = Arc::new(AtomicBool::new(true));
        let (state_tx, state_rx) = watch::channel(SyncState::Idle);
        let previous = self
            .lock_stopping()
            .remove(name)
            .filter(|task| !task.is_finished());

        let poll = PollTask {
            name: name.to_string(),
            workspace: self.workspace.clone(),
            backoff: Backoff::new(&self.config),
            events: self.events.clone(),
            state: state_tx,
            stop: Arc::clone(&stop),
            active: Arc::clone(&active),
            previous,
        };
        info!(document = name, interval = ?self.config.initial_interval, "watching document");
        let task = tokio::spawn(poll.run());

        tasks.insert(
            name.to_string(),
            WatchHandle {
                stop,
                active,
                state: state_rx,
                task,
            },
        );
        Ok(())
    }

    /// Stop polling `name`.
    ///
    /// A scheduled poll is cancelled. A fetch already in flight completes and
    /// its result is discarded.
    pub fn stop(&self, name: &str) -> bool {
        self.workspace.set_watch(name, false).ok();

        let Some(handle) = self.lock_tasks().remove(name) else {
            return false;
        };
        handle.active.store(false, Ordering::Release);
        handle.stop.notify_one();
        if !handle.task.is_finished() {
            self.lock_stopping().insert(name.to_string(), handle.task);
        }
        debug!(document = name, "stopped watching");
        true
    }

    /// Current state of a watched document's loop.
    pub fn state(&self, name: &str) -> Option<SyncState> {
        self.lock_tasks().get(name).map(|handle| *handle.state.borrow())
    }

    pub fn watched(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_tasks().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in tasks.drain() {
            handle.task.abort();
        }
        let stopping = self.stopping.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, task) in stopping.drain() {
            task.abort();
        }
    }
}

/// Snapshot and generation at the time conflicts were reported.
struct Pending {
    snapshot: Option<Arc<Value>>,
    generation: Option<u64>,
}

struct PollTask {
    name: String,
    workspace: Workspace,
    backoff: Backoff,
    events: mpsc::Sender<SyncEvent>,
    state: watch::Sender<SyncState>,
    stop: Arc<Notify>,
    active: Arc<AtomicBool>,
    /// Loop this one replaces; it must finish before the first poll.
    previous: Option<JoinHandle<()>>,
}

impl PollTask {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.workspace.is_watching(&self.name)
    }

    fn pending(&self) -> Pending {
        Pending {
            snapshot: self.workspace.snapshot(&self.name),
            generation: self.workspace.generation(&self.name),
        }
    }

    /// Nothing was resolved or edited since conflicts were reported.
    fn still_pending(&self, pending: &Pending) -> bool {
        let snapshot_unchanged = match (&pending.snapshot, self.workspace.snapshot(&self.name)) {
            (Some(before), Some(now)) => Arc::ptr_eq(before, &now),
            _ => false,
        };
        snapshot_unchanged && pending.generation == self.workspace.generation(&self.name)
    }

    async fn run(mut self) {
        let mut pending: Option<Pending> = None;

        if let Some(previous) = self.previous.take() {
            debug!(document = %self.name, "waiting for stopped poll to settle");
            previous.await.ok();
        }

        loop {
            let waiting = if pending.is_some() {
                SyncState::AwaitingConflictResolution
            } else if self.backoff.is_backing_off() {
                SyncState::BackoffWait
            } else {
                SyncState::Idle
            };
            self.state.send_replace(waiting);

            tokio::select! {
                _ = self.stop.notified() => break,
                _ = tokio::time::sleep(self.backoff.current()) => {}
            }
            if !self.is_active() {
                break;
            }
            if let Some(marker) = &pending {
                if self.still_pending(marker) {
                    continue;
                }
                pending = None;
            }

            self.state.send_replace(SyncState::Polling);
            let fetched = self.workspace.fetch_remote(&self.name).await;
            if !self.is_active() {
                debug!(document = %self.name, "discarding poll result after stop");
                break;
            }

            let outcome = fetched.and_then(|remote| {
                self.state.send_replace(SyncState::Applying);
                self.workspace.rebase_document_with(&self.name, remote)
            });

            let mut finished = false;
            let event = match outcome {
                Ok(rebase) => {
                    self.backoff.reset();
                    if rebase.has_conflicts() {
                        pending = Some(self.pending());
                        self.state.send_replace(SyncState::AwaitingConflictResolution);
                        SyncEvent::Conflicts(rebase)
                    } else {
                        SyncEvent::Updated {
                            name: self.name.clone(),
                            applied: rebase.applied().to_vec(),
                        }
                    }
                }
                Err(RebaseFailure::NoChangesDetected) => {
                    self.backoff.reset();
                    SyncEvent::NoChanges {
                        name: self.name.clone(),
                    }
                }
                Err(failure) if failure.is_transport() => {
                    let retry_in = self.backoff.fail();
                    warn!(document = %self.name, error = %failure, ?retry_in, "poll failed, backing off");
                    SyncEvent::Failed {
                        name: self.name.clone(),
                        failure,
                        retry_in: Some(retry_in),
                    }
                }
                Err(
                    failure @ (RebaseFailure::DocumentNotFound { .. }
                    | RebaseFailure::NoSourceUrl { .. }),
                ) => {
                    warn!(document = %self.name, error = %failure, "stopping watch");
                    finished = true;
                    SyncEvent::Failed {
                        name: self.name.clone(),
                        failure,
                        retry_in: None,
                    }
                }
                Err(failure) => {
                    warn!(document = %self.name, error = %failure, "poll could not be applied");
                    SyncEvent::Failed {
                        name: self.name.clone(),
                        failure,
                        retry_in: Some(self.backoff.current()),
                    }
                }
            };

            if finished {
                self.workspace.set_watch(&self.name, false).ok();
                self.state.send_replace(SyncState::Idle);
            }
            if self.events.send(event).await.is_err() {
                debug!(document = %self.name, "event receiver dropped");
                break;
            }
            if finished {
                break;
            }
        }

        self.state.send_replace(SyncState::Idle);
    }
}
