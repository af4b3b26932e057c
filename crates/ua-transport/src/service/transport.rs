//! Transport: request dispatch with a single channel-closed retry.
//!
//! ```text
//!  send(request)
//!       │ register correlation record, spawn dispatch task
//!       ▼
//!  ┌─────────────┐  fail   ┌──────────────────────────────┐
//!  │  acquire()  │ ──────► │ resolve caller: Acquire(err) │
//!  └─────┬───────┘         └──────────────────────────────┘
//!        ▼
//!  ┌─────────────┐  ok     ┌──────────────────────────────┐
//!  │   write()   │ ──────► │ await out-of-band response   │
//!  └─────┬───────┘         └──────────────────────────────┘
//!        │ fail
//!        ├── closed && first attempt ──► wait retry_delay ──► acquire() again
//!        └── otherwise ────────────────► resolve caller: Write(err)
//! ```

use crate::domain::{
    Attempt, ChannelError, RequestHandle, RetryDecision, RetryPolicy, SetupError, TransportConfig,
    TransportError, UaRequest,
};
use crate::ports::{Channel, ChannelProvider, Scheduler};
use crate::service::dispatcher::ResponseDispatcher;
use crate::service::future::ResponseFuture;
use crate::service::pending::{
    expiry_sweep_task, millis, PendingRequestStore, Ticket, TransportMetrics,
};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Why one dispatch attempt did not get the request onto the wire
#[derive(Debug)]
enum AttemptError {
    Acquire(ChannelError),
    Write(ChannelError),
}

struct TransportInner<P: ChannelProvider> {
    provider: P,
    scheduler: Arc<dyn Scheduler>,
    pending: Arc<PendingRequestStore>,
    config: TransportConfig,
    policy: RetryPolicy,
    runtime: Handle,
}

/// Turns outbound requests into completions.
///
/// Cheap to clone; clones share the same correlation records.
pub struct Transport<P: ChannelProvider> {
    inner: Arc<TransportInner<P>>,
}

impl<P: ChannelProvider> Clone for Transport<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: ChannelProvider> Transport<P> {
    /// Create a transport that spawns dispatch tasks on the current Tokio runtime.
    pub fn new(
        provider: P,
        scheduler: Arc<dyn Scheduler>,
        config: TransportConfig,
    ) -> Result<Self, SetupError> {
        let runtime = Handle::try_current().map_err(|e| SetupError::NoRuntime(e.to_string()))?;
        Self::with_runtime(provider, scheduler, config, runtime)
    }

    /// Create a transport that spawns dispatch tasks on `runtime`.
    pub fn with_runtime(
        provider: P,
        scheduler: Arc<dyn Scheduler>,
        config: TransportConfig,
        runtime: Handle,
    ) -> Result<Self, SetupError> {
        config.validate()?;

        let policy = if config.retry_on_channel_closed {
            RetryPolicy::new(config.retry_delay)
        } else {
            RetryPolicy::disabled()
        };

        Ok(Self {
            inner: Arc::new(TransportInner {
                provider,
                scheduler,
                pending: Arc::new(PendingRequestStore::new(config.max_pending_requests)),
                config,
                policy,
                runtime,
            }),
        })
    }

    /// Send a request.
    ///
    /// Never blocks: registers the correlation record, starts dispatch in the
    /// background and returns the completion handle. The handle resolves
    /// exactly once. A request whose handle is already in flight is rejected
    /// and the in-flight request is left untouched.
    pub fn send(&self, request: UaRequest) -> ResponseFuture {
        let request = Arc::new(request);
        let handle = request.request_handle();
        let timeout = self
            .inner
            .config
            .effective_timeout(request.header.timeout_hint);

        let (ticket, receiver) = match self.inner.pending.register(handle, request.service, timeout)
        {
            Ok(registration) => registration,
            Err(err) => {
                debug!(
                    request_handle = %handle,
                    service = %request.service,
                    error = %err,
                    "Rejected request"
                );
                return ResponseFuture::rejected(handle, err);
            }
        };

        let inner = Arc::clone(&self.inner);
        let task = self.inner.runtime.spawn(inner.run_dispatch(request, ticket));
        self.inner.pending.attach_dispatch(ticket, task.abort_handle());

        ResponseFuture::new(handle, receiver)
    }

    /// Cancel an in-flight request.
    ///
    /// The caller's completion resolves with `Cancelled` and any pending
    /// acquire, write or retry wait is abandoned. Returns false if the
    /// request was already resolved.
    pub fn cancel(&self, handle: RequestHandle) -> bool {
        self.inner.pending.cancel(handle)
    }

    /// Handle for the response demultiplexer.
    pub fn dispatcher(&self) -> ResponseDispatcher {
        ResponseDispatcher::new(Arc::clone(&self.inner.pending))
    }

    /// Start the background task that expires overdue requests.
    ///
    /// The task stops on its own after [`Transport::shutdown`].
    pub fn spawn_expiry_sweeper(&self) -> JoinHandle<()> {
        self.inner.runtime.spawn(expiry_sweep_task(
            Arc::clone(&self.inner.pending),
            self.inner.config.expiry_sweep_interval,
        ))
    }

    /// Reject new requests and fail every pending one with `Shutdown`.
    ///
    /// Returns the number of requests failed. Idempotent.
    pub fn shutdown(&self) -> usize {
        if self.inner.pending.is_closed() {
            return 0;
        }
        let failed = self.inner.pending.close(TransportError::Shutdown);
        info!(failed = failed, "Transport shut down");
        failed
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.pending.is_closed()
    }

    /// Number of requests currently in flight
    pub fn pending_count(&self) -> usize {
        self.inner.pending.pending_count()
    }

    pub fn is_pending(&self, handle: RequestHandle) -> bool {
        self.inner.pending.is_pending(&handle)
    }

    pub fn metrics(&self) -> TransportMetrics {
        self.inner.pending.metrics()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn provider(&self) -> &P {
        &self.inner.provider
    }
}

impl<P: ChannelProvider> TransportInner<P> {
    /// Run the dispatch loop, resolving the caller if a provider or channel
    /// panics under it.
    async fn run_dispatch(self: Arc<Self>, request: Arc<UaRequest>, ticket: Ticket) {
        let pending = Arc::clone(&self.pending);
        let dispatch = AssertUnwindSafe(self.dispatch(request, ticket)).catch_unwind();
        if let Err(panic) = dispatch.await {
            let message = panic_message(&*panic);
            error!(
                request_handle = %ticket.handle,
                panic = %message,
                "Dispatch panicked"
            );
            pending.fail_dispatch(ticket, TransportError::DispatchPanicked(message));
        }
    }

    /// Dispatch loop for one request, bounded at one retry.
    ///
    /// Every check and resolution goes through `ticket`, so once this request
    /// is resolved nothing here touches a newer request that reused its handle.
    async fn dispatch(self: Arc<Self>, request: Arc<UaRequest>, ticket: Ticket) {
        let handle = ticket.handle;
        let mut attempt = Attempt::First;

        loop {
            let err = match self.attempt(&request).await {
                Ok(()) => {
                    trace!(
                        request_handle = %handle,
                        service = %request.service,
                        attempt = attempt.number(),
                        "Write succeeded"
                    );
                    return;
                }
                Err(AttemptError::Acquire(err)) => {
                    debug!(
                        request_handle = %handle,
                        service = %request.service,
                        attempt = attempt.number(),
                        error = %err,
                        "Channel acquisition failed"
                    );
                    self.pending
                        .fail_dispatch(ticket, TransportError::Acquire(err));
                    return;
                }
                Err(AttemptError::Write(err)) => err,
            };

            // A response may already have raced ahead of the write outcome
            if !self.pending.is_current(ticket) {
                debug!(
                    request_handle = %handle,
                    error = %err,
                    "Write failed after request was resolved"
                );
                return;
            }

            match self.policy.on_write_failure(&err, attempt) {
                RetryDecision::RetryAfter(delay) => {
                    debug!(
                        request_handle = %handle,
                        service = %request.service,
                        delay_ms = millis(delay),
                        "Write failed, channel closed; retrying..."
                    );
                    self.pending.record_retry();

                    if let Err(err) = self.wait(delay).await {
                        self.pending.fail_dispatch(ticket, err);
                        return;
                    }
                    if !self.pending.is_current(ticket) {
                        debug!(
                            request_handle = %handle,
                            "Request resolved while waiting to retry"
                        );
                        return;
                    }
                    attempt = Attempt::Retry;
                }
                RetryDecision::Fail => {
                    debug!(
                        request_handle = %handle,
                        service = %request.service,
                        attempt = attempt.number(),
                        error = %err,
                        "Write failed"
                    );
                    self.pending.fail_dispatch(ticket, TransportError::Write(err));
                    return;
                }
            }
        }
    }

    /// Acquire a channel and write the request on it.
    async fn attempt(&self, request: &Arc<UaRequest>) -> Result<(), AttemptError> {
        let channel = self
            .provider
            .acquire()
            .await
            .map_err(AttemptError::Acquire)?;
        channel
            .write(Arc::clone(request))
            .await
            .map_err(AttemptError::Write)
    }

    /// Suspend until the scheduler fires after `delay`.
    ///
    /// The scheduled task only signals; the retry itself continues on this
    /// dispatch task.
    async fn wait(&self, delay: Duration) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.scheduler.schedule_after(
            delay,
            Box::pin(async move {
                let _ = tx.send(());
            }),
        );
        rx.await.map_err(|_| TransportError::SchedulerUnavailable)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
