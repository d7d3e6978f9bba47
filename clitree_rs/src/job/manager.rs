//! Job manager: the invoke / subscribe / cancel surface.
//!
//! - the translated tree is shared read-only (`Arc<[Command]>`)
//! - each job runs on its own tokio task; a semaphore caps how many run at
//!   once, the rest wait in `Pending`
//! - the executor hands events to a per-job collector over an unbounded mpsc
//!   channel; the collector appends them to an event log and bumps a `watch`
//!   counter so any number of subscribers can follow with their own cursor

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::stream::{self, Stream};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::behaviors::Behaviors;
use super::executor::{Behavior, execute};
use super::{CancelReason, Job, JobContext, JobEvent, JobId, JobOutcome, JobState};
use crate::config::ExecutorConfig;
use crate::model::{self, Command, CommandPath};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvokeError {
    #[error("no command at path '{0}'")]
    UnknownCommand(CommandPath),
    #[error("command '{0}' has no runnable behavior")]
    NoBehavior(CommandPath),
    #[error("unknown job '{0}'")]
    UnknownJob(JobId),
}

/// Returned by [`JobManager::invoke`].
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: JobId,
    token: CancellationToken,
}

impl JobHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub command_path: CommandPath,
    pub arguments: HashMap<String, String>,
    pub deadline_ms: Option<u64>,
    pub state: JobState,
    /// Number of progress events emitted so far.
    pub progress: u64,
    pub last_message: Option<String>,
    pub outcome: Option<JobOutcome>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Events after a cursor, as returned by [`JobManager::poll`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPoll {
    pub id: JobId,
    pub state: JobState,
    pub events: Vec<JobEvent>,
    /// Pass back as `since` to continue.
    pub next_cursor: usize,
    pub finished: bool,
}

struct Feed {
    events: Vec<JobEvent>,
    state: JobState,
    progress: u64,
    last_message: Option<String>,
    outcome: Option<JobOutcome>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

struct JobRecord {
    job: Job,
    token: CancellationToken,
    feed: Mutex<Feed>,
    changes: watch::Sender<usize>,
    finished: AtomicBool,
}

impl JobRecord {
    fn new(job: Job, token: CancellationToken) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            job,
            token,
            feed: Mutex::new(Feed {
                events: Vec::new(),
                state: JobState::Pending,
                progress: 0,
                last_message: None,
                outcome: None,
                started_at: None,
                finished_at: None,
            }),
            changes,
            finished: AtomicBool::new(false),
        }
    }

    async fn mark_running(&self) {
        let mut feed = self.feed.lock().await;
        match feed.state.advance(JobState::Running) {
            Ok(next) => {
                feed.state = next;
                feed.started_at = Some(Utc::now());
            }
            Err(e) => warn!(job = %self.job.id, "{e}"),
        }
    }

    async fn append(&self, event: JobEvent) {
        let mut feed = self.feed.lock().await;
        match &event {
            JobEvent::Started { .. } => {}
            JobEvent::Progress(progress) => {
                feed.progress += 1;
                feed.last_message = progress.message.clone();
            }
            JobEvent::Finished { outcome, at } => match feed.state.advance(outcome.state()) {
                Ok(next) => {
                    feed.state = next;
                    feed.outcome = Some(outcome.clone());
                    feed.finished_at = Some(*at);
                }
                Err(e) => warn!(job = %self.job.id, "{e}"),
            },
        }
        let finished = event.is_finished();
        feed.events.push(event);
        let len = feed.events.len();
        drop(feed);
        if finished {
            self.finished.store(true, Ordering::Release);
        }
        self.changes.send_replace(len);
    }

    async fn snapshot(&self) -> JobSnapshot {
        let feed = self.feed.lock().await;
        JobSnapshot {
            id: self.job.id.clone(),
            command_path: self.job.command_path.clone(),
            arguments: self.job.arguments.clone(),
            deadline_ms: self.job.deadline.map(|d| d.as_millis() as u64),
            state: feed.state,
            progress: feed.progress,
            last_message: feed.last_message.clone(),
            outcome: feed.outcome.clone(),
            created_at: self.job.created_at,
            started_at: feed.started_at,
            finished_at: feed.finished_at,
        }
    }
}

/// Follows one job's events from a cursor until `Finished`.
pub struct JobSubscription {
    record: Arc<JobRecord>,
    cursor: usize,
    changes: watch::Receiver<usize>,
}

impl JobSubscription {
    fn new(record: Arc<JobRecord>, cursor: usize) -> Self {
        let changes = record.changes.subscribe();
        Self {
            record,
            cursor,
            changes,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.record.job.id
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Next event in order, or `None` once the finished marker was delivered.
    pub async fn next(&mut self) -> Option<JobEvent> {
        loop {
            if let Some(event) = self.take_ready().await {
                return Some(event);
            }
            if self.record.finished.load(Ordering::Acquire) {
                // the finished marker is always the last event
                return self.take_ready().await;
            }
            if self.changes.changed().await.is_err() {
                return self.take_ready().await;
            }
        }
    }

    /// Everything already emitted past the cursor, without waiting.
    pub async fn drain_ready(&mut self) -> Vec<JobEvent> {
        let feed = self.record.feed.lock().await;
        let ready: Vec<JobEvent> = feed.events.iter().skip(self.cursor).cloned().collect();
        self.cursor += ready.len();
        ready
    }

    async fn take_ready(&mut self) -> Option<JobEvent> {
        let feed = self.record.feed.lock().await;
        let event = feed.events.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(event)
    }

    pub fn into_stream(self) -> impl Stream<Item = JobEvent> + Send {
        stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}

struct JobTable {
    order: VecDeque<JobId>,
    records: HashMap<JobId, Arc<JobRecord>>,
}

struct Inner {
    tree: Arc<[Command]>,
    behaviors: Behaviors,
    config: ExecutorConfig,
    permits: Arc<Semaphore>,
    jobs: Mutex<JobTable>,
    shutdown: CancellationToken,
}

/// Runs jobs against a translated command tree.
///
/// ```rust,no_run
/// use std::collections::HashMap;
/// use std::sync::Arc;
/// use clitree::{Behaviors, CommandPath, ExecutorConfig, JobManager, TickBehavior};
///
/// # async fn demo(tree: Vec<clitree::Command>) -> anyhow::Result<()> {
/// let config = ExecutorConfig::default();
/// let behaviors = Behaviors::new().with(
///     CommandPath::parse("run"),
///     Arc::new(TickBehavior::new(config.tick_interval)),
/// );
/// let manager = JobManager::new(tree, behaviors, config);
/// let handle = manager
///     .invoke(CommandPath::parse("run"), HashMap::new(), None)
///     .await?;
/// let mut events = manager.subscribe(&handle.id).await?;
/// while let Some(event) = events.next().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(tree: impl Into<Arc<[Command]>>, behaviors: Behaviors, config: ExecutorConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(Inner {
                tree: tree.into(),
                behaviors,
                config,
                permits,
                jobs: Mutex::new(JobTable {
                    order: VecDeque::new(),
                    records: HashMap::new(),
                }),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn tree(&self) -> &[Command] {
        &self.inner.tree
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Whether `path` resolves and has a behavior behind it.
    pub fn is_runnable(&self, path: &CommandPath) -> bool {
        model::resolve(&self.inner.tree, path.segments()).is_some()
            && self.inner.behaviors.get(path).is_some()
    }

    /// Start a job. A zero `deadline` means unbounded; `None` falls back to
    /// the configured default deadline.
    pub async fn invoke(
        &self,
        path: CommandPath,
        arguments: HashMap<String, String>,
        deadline: Option<Duration>,
    ) -> Result<JobHandle, InvokeError> {
        let command = model::resolve(&self.inner.tree, path.segments())
            .cloned()
            .ok_or_else(|| InvokeError::UnknownCommand(path.clone()))?;
        let behavior = self
            .inner
            .behaviors
            .get(&path)
            .ok_or_else(|| InvokeError::NoBehavior(path.clone()))?;

        let deadline = match deadline {
            Some(d) if d.is_zero() => None,
            Some(d) => Some(d),
            None => self.inner.config.default_deadline,
        };
        let job = Job {
            id: JobId::new(),
            command_path: path,
            arguments,
            deadline,
            created_at: Utc::now(),
        };
        let token = self.inner.shutdown.child_token();
        let record = Arc::new(JobRecord::new(job, token.clone()));
        let id = record.job.id.clone();

        info!(job = %id, command = %record.job.command_path, "job created");
        self.insert(Arc::clone(&record)).await;

        let permits = Arc::clone(&self.inner.permits);
        tokio::spawn(drive(record, command, behavior, permits));

        Ok(JobHandle { id, token })
    }

    /// Replay a job's events from the start, then follow it live.
    pub async fn subscribe(&self, id: &JobId) -> Result<JobSubscription, InvokeError> {
        self.subscribe_from(id, 0).await
    }

    pub async fn subscribe_from(
        &self,
        id: &JobId,
        cursor: usize,
    ) -> Result<JobSubscription, InvokeError> {
        let record = self.record(id).await?;
        Ok(JobSubscription::new(record, cursor))
    }

    /// Events after `since`; waits up to `wait` when none are ready yet.
    pub async fn poll(&self, id: &JobId, since: usize, wait: Duration) -> Result<JobPoll, InvokeError> {
        let mut sub = self.subscribe_from(id, since).await?;
        let mut events = sub.drain_ready().await;
        if events.is_empty()
            && !wait.is_zero()
            && let Ok(Some(event)) = tokio::time::timeout(wait, sub.next()).await
        {
            events.push(event);
            events.extend(sub.drain_ready().await);
        }
        let feed = sub.record.feed.lock().await;
        Ok(JobPoll {
            id: id.clone(),
            state: feed.state,
            finished: feed.state.is_terminal() && sub.cursor >= feed.events.len(),
            next_cursor: sub.cursor,
            events,
        })
    }

    pub async fn status(&self, id: &JobId) -> Result<JobSnapshot, InvokeError> {
        Ok(self.record(id).await?.snapshot().await)
    }

    /// Snapshots of all retained jobs, oldest first.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let records: Vec<Arc<JobRecord>> = {
            let table = self.inner.jobs.lock().await;
            table
                .order
                .iter()
                .filter_map(|id| table.records.get(id).cloned())
                .collect()
        };
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(record.snapshot().await);
        }
        out
    }

    pub async fn cancel(&self, id: &JobId) -> Result<(), InvokeError> {
        let record = self.record(id).await?;
        debug!(job = %id, "cancel requested");
        record.token.cancel();
        Ok(())
    }

    /// Drop a finished job from the table. Running jobs are kept.
    pub async fn forget(&self, id: &JobId) -> Result<bool, InvokeError> {
        let mut table = self.inner.jobs.lock().await;
        let finished = table
            .records
            .get(id)
            .map(|r| r.finished.load(Ordering::Acquire))
            .ok_or_else(|| InvokeError::UnknownJob(id.clone()))?;
        if finished {
            table.records.remove(id);
            table.order.retain(|known| known != id);
        }
        Ok(finished)
    }

    /// Cancel every job, running or pending.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    async fn record(&self, id: &JobId) -> Result<Arc<JobRecord>, InvokeError> {
        let table = self.inner.jobs.lock().await;
        table
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| InvokeError::UnknownJob(id.clone()))
    }

    async fn insert(&self, record: Arc<JobRecord>) {
        let mut table = self.inner.jobs.lock().await;
        let id = record.job.id.clone();
        table.order.push_back(id.clone());
        table.records.insert(id, record);

        let limit = self.inner.config.max_retained_jobs;
        let mut finished: Vec<JobId> = table
            .order
            .iter()
            .filter(|id| {
                table
                    .records
                    .get(*id)
                    .is_some_and(|r| r.finished.load(Ordering::Acquire))
            })
            .cloned()
            .collect();
        if finished.len() > limit {
            let excess = finished.len() - limit;
            finished.truncate(excess);
            for id in &finished {
                table.records.remove(id);
            }
            table.order.retain(|id| !finished.contains(id));
            debug!(evicted = excess, "evicted finished jobs");
        }
    }
}

async fn drive(
    record: Arc<JobRecord>,
    command: Command,
    behavior: Arc<dyn Behavior>,
    permits: Arc<Semaphore>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::join!(
        run_job(&record, &command, behavior.as_ref(), permits, tx),
        collect(&record, rx)
    );
}

async fn run_job(
    record: &JobRecord,
    command: &Command,
    behavior: &dyn Behavior,
    permits: Arc<Semaphore>,
    tx: UnboundedSender<JobEvent>,
) {
    // cancelled while waiting: finish without running, no Started marker
    let _permit = tokio::select! {
        biased;
        _ = record.token.cancelled() => {
            debug!(job = %record.job.id, "cancelled while pending");
            let _ = tx.send(JobEvent::Finished {
                outcome: JobOutcome::Cancelled {
                    reason: CancelReason::Interrupted,
                },
                at: Utc::now(),
            });
            return;
        }
        permit = permits.acquire_owned() => permit.ok(),
    };
    record.mark_running().await;

    let ctx = JobContext::start(record.job.id.as_str(), record.token.clone(), record.job.deadline);
    let run = execute(&ctx, command, behavior, &record.job.arguments, &tx);
    if AssertUnwindSafe(run).catch_unwind().await.is_err() {
        warn!(job = %record.job.id, "command panicked");
    }
}

async fn collect(record: &JobRecord, mut rx: UnboundedReceiver<JobEvent>) {
    while let Some(event) = rx.recv().await {
        record.append(event).await;
    }
}
