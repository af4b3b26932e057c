//! Test utilities for the transport.
//!
//! Deterministic stand-ins for the outbound ports: a scheduler driven by a
//! virtual clock and a channel provider that follows a script.
//! Enable with the `test-utils` feature flag.

use crate::domain::{ChannelError, RequestHandle, UaRequest};
use crate::ports::{Channel, ChannelProvider, ScheduledTask, Scheduler};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// =============================================================================
// ManualScheduler
// =============================================================================

struct ScheduledEntry {
    due: Duration,
    seq: u64,
    task: ScheduledTask,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    tasks: Vec<ScheduledEntry>,
    delays: Vec<Duration>,
}

/// Scheduler whose clock only moves when the test calls [`ManualScheduler::advance`].
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
    scheduled: Notify,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Tasks scheduled but not yet run.
    pub fn pending_tasks(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Every delay ever requested, in scheduling order.
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.state.lock().delays.clone()
    }

    /// Move the clock forward and run every task that became due.
    ///
    /// Due tasks run in deadline order, inline on the caller. Returns how
    /// many ran.
    pub async fn advance(&self, by: Duration) -> usize {
        let due = {
            let mut state = self.state.lock();
            state.now += by;
            let now = state.now;

            let (mut due, waiting): (Vec<_>, Vec<_>) =
                state.tasks.drain(..).partition(|entry| entry.due <= now);
            state.tasks = waiting;
            due.sort_by_key(|entry| (entry.due, entry.seq));
            due
        };

        let ran = due.len();
        for entry in due {
            entry.task.await;
        }
        ran
    }

    /// Drop every pending task without running it, as a scheduler shutting
    /// down would. Returns how many were dropped.
    pub fn drop_pending(&self) -> usize {
        let dropped: Vec<_> = self.state.lock().tasks.drain(..).collect();
        dropped.len()
    }

    /// Wait until at least `count` tasks are pending.
    pub async fn wait_for_tasks(&self, count: usize) {
        loop {
            let notified = self.scheduled.notified();
            if self.pending_tasks() >= count {
                return;
            }
            notified.await;
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_after(&self, delay: Duration, task: ScheduledTask) {
        {
            let mut state = self.state.lock();
            let due = state.now + delay;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.delays.push(delay);
            state.tasks.push(ScheduledEntry { due, seq, task });
        }
        self.scheduled.notify_waiters();
    }
}

// =============================================================================
// ScriptedChannelProvider
// =============================================================================

/// Scripted result of one `acquire` call.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Ok,
    Fail(ChannelError),
    /// Never completes
    Hang,
    /// Panics with the message
    Panic(&'static str),
}

/// Scripted result of one `write` call.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Ok,
    Fail(ChannelError),
    /// Completes with `result` after a Tokio sleep
    Delayed(Duration, Result<(), ChannelError>),
    /// Never completes
    Hang,
    /// Panics with the message
    Panic(&'static str),
}

#[derive(Default)]
struct ScriptState {
    acquires: VecDeque<AcquireOutcome>,
    writes: VecDeque<WriteOutcome>,
    per_handle: HashMap<RequestHandle, VecDeque<WriteOutcome>>,
    written: Vec<RequestHandle>,
}

#[derive(Default)]
struct ScriptInner {
    state: Mutex<ScriptState>,
    acquire_count: AtomicU64,
    write_count: AtomicU64,
    next_channel_id: AtomicU64,
    changed: Notify,
}

/// Channel provider that replays scripted outcomes.
///
/// Acquires pop from one queue; writes pop first from the queue scripted for
/// the request's handle, then from the shared queue. An empty queue means
/// success.
#[derive(Clone, Default)]
pub struct ScriptedChannelProvider {
    inner: Arc<ScriptInner>,
}

impl ScriptedChannelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_acquire(&self, outcome: AcquireOutcome) -> &Self {
        self.inner.state.lock().acquires.push_back(outcome);
        self
    }

    pub fn push_write(&self, outcome: WriteOutcome) -> &Self {
        self.inner.state.lock().writes.push_back(outcome);
        self
    }

    /// Script the writes of one request handle, in attempt order.
    pub fn script_writes(
        &self,
        handle: RequestHandle,
        outcomes: impl IntoIterator<Item = WriteOutcome>,
    ) -> &Self {
        self.inner
            .state
            .lock()
            .per_handle
            .entry(handle)
            .or_default()
            .extend(outcomes);
        self
    }

    pub fn acquire_count(&self) -> u64 {
        self.inner.acquire_count.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> u64 {
        self.inner.write_count.load(Ordering::SeqCst)
    }

    /// Write attempts seen for one handle
    pub fn writes_for(&self, handle: RequestHandle) -> usize {
        self.inner
            .state
            .lock()
            .written
            .iter()
            .filter(|h| **h == handle)
            .count()
    }

    /// Handles of every write attempt, in call order.
    pub fn written(&self) -> Vec<RequestHandle> {
        self.inner.state.lock().written.clone()
    }

    /// Wait until at least `count` acquires have been attempted.
    pub async fn wait_for_acquires(&self, count: u64) {
        self.wait_until(|p| p.acquire_count() >= count).await
    }

    /// Wait until at least `count` writes have been attempted.
    pub async fn wait_for_writes(&self, count: u64) {
        self.wait_until(|p| p.write_count() >= count).await
    }

    async fn wait_until(&self, done: impl Fn(&Self) -> bool) {
        loop {
            let notified = self.inner.changed.notified();
            if done(self) {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ChannelProvider for ScriptedChannelProvider {
    type Channel = ScriptedChannel;

    async fn acquire(&self) -> Result<ScriptedChannel, ChannelError> {
        let outcome = self.inner.state.lock().acquires.pop_front();
        self.inner.acquire_count.fetch_add(1, Ordering::SeqCst);
        self.inner.changed.notify_waiters();

        match outcome.unwrap_or(AcquireOutcome::Ok) {
            AcquireOutcome::Ok => Ok(ScriptedChannel {
                id: self.inner.next_channel_id.fetch_add(1, Ordering::SeqCst),
                inner: Arc::clone(&self.inner),
            }),
            AcquireOutcome::Fail(err) => Err(err),
            AcquireOutcome::Hang => futures::future::pending().await,
            AcquireOutcome::Panic(message) => panic!("{}", message),
        }
    }
}

/// Channel handed out by [`ScriptedChannelProvider`].
#[derive(Clone)]
pub struct ScriptedChannel {
    id: u64,
    inner: Arc<ScriptInner>,
}

impl ScriptedChannel {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    async fn write(&self, request: Arc<UaRequest>) -> Result<(), ChannelError> {
        let handle = request.request_handle();
        let outcome = {
            let mut state = self.inner.state.lock();
            state.written.push(handle);
            let scripted = state
                .per_handle
                .get_mut(&handle)
                .and_then(|queue| queue.pop_front());
            scripted.or_else(|| state.writes.pop_front())
        };
        self.inner.write_count.fetch_add(1, Ordering::SeqCst);
        self.inner.changed.notify_waiters();

        match outcome.unwrap_or(WriteOutcome::Ok) {
            WriteOutcome::Ok => Ok(()),
            WriteOutcome::Fail(err) => Err(err),
            WriteOutcome::Delayed(delay, result) => {
                tokio::time::sleep(delay).await;
                result
            }
            WriteOutcome::Hang => futures::future::pending().await,
            WriteOutcome::Panic(message) => panic!("{}", message),
        }
    }
}
