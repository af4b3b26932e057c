//! Pending Request Store - correlation records for in-flight requests.
//!
//! Maps request handles to the completion sender the caller is waiting on.
//! Every resolution path (response, failure, cancel, expiry, shutdown) goes
//! through a single map removal, so whichever path removes the record first
//! resolves it and every later path observes it as gone.

use crate::domain::{RequestHandle, ServiceKind, TransportError, TransportResult, UaResponse};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Sender half of a caller's completion handle.
pub(crate) type CompletionSender = oneshot::Sender<TransportResult<UaResponse>>;

/// Receiver half of a caller's completion handle.
pub(crate) type CompletionReceiver = oneshot::Receiver<TransportResult<UaResponse>>;

/// One registration of a request handle.
///
/// Handles become free again once resolved, so the dispatch task carries the
/// generation to tell its own record apart from a later one with the same
/// handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket {
    pub(crate) handle: RequestHandle,
    generation: u64,
}

/// A request waiting for its terminal outcome
struct PendingRequest {
    /// Registration this record belongs to
    generation: u64,
    /// Channel to resolve the caller
    sender: CompletionSender,
    /// When the request was registered
    created_at: Instant,
    /// Service (for logging)
    service: ServiceKind,
    /// Deadline relative to `created_at`; None waits forever
    timeout: Option<Duration>,
    /// Dispatch task, aborted when the request is resolved from outside
    dispatch: Option<AbortHandle>,
}

/// Who is resolving a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// The request's own dispatch task
    Dispatch,
    /// Response demultiplexer
    Inbound,
    /// Cancellation, expiry or shutdown
    External,
}

/// Counters for the pending request store
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Requests registered
    pub total_registered: AtomicU64,
    /// Requests completed with a response
    pub total_completed: AtomicU64,
    /// Requests resolved with a failure (excluding timeouts and cancellations)
    pub total_failed: AtomicU64,
    /// Retries scheduled after a closed channel
    pub total_retries: AtomicU64,
    /// Requests expired by the sweeper
    pub total_timeouts: AtomicU64,
    /// Requests cancelled by the caller (or whose receiver was dropped)
    pub total_cancelled: AtomicU64,
    /// Inbound deliveries that matched no pending request
    pub total_unmatched: AtomicU64,
}

/// Point-in-time copy of [`PendingStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMetrics {
    pub pending: usize,
    pub total_registered: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_retries: u64,
    pub total_timeouts: u64,
    pub total_cancelled: u64,
    pub total_unmatched: u64,
}

/// Correlation records for one transport.
pub struct PendingRequestStore {
    /// Map of request handle to pending request
    pending: DashMap<RequestHandle, PendingRequest>,
    /// Registration limit
    max_pending: usize,
    /// Set once on shutdown; no registrations afterwards
    closed: AtomicBool,
    /// Source of registration generations
    next_generation: AtomicU64,
    /// Statistics
    stats: Arc<PendingStats>,
}

impl PendingRequestStore {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: DashMap::new(),
            max_pending,
            closed: AtomicBool::new(false),
            next_generation: AtomicU64::new(1),
            stats: Arc::new(PendingStats::default()),
        }
    }

    /// Register a request and get the receiver its caller will await, along
    /// with the ticket its dispatch task resolves through.
    ///
    /// Fails without touching existing records when the handle is already in
    /// flight, the limit is reached, or the store is closed.
    pub(crate) fn register(
        &self,
        handle: RequestHandle,
        service: ServiceKind,
        timeout: Option<Duration>,
    ) -> TransportResult<(Ticket, CompletionReceiver)> {
        if self.is_closed() {
            return Err(TransportError::Shutdown);
        }
        if self.pending.len() >= self.max_pending {
            return Err(TransportError::TooManyPending {
                limit: self.max_pending,
            });
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match self.pending.entry(handle) {
            Entry::Occupied(_) => return Err(TransportError::DuplicateRequestHandle(handle)),
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    generation,
                    sender: tx,
                    created_at: Instant::now(),
                    service,
                    timeout,
                    dispatch: None,
                });
            }
        }

        // Shutdown may have drained the map between the check and the insert
        if self.is_closed() {
            self.pending
                .remove_if(&handle, |_, request| request.generation == generation);
            return Err(TransportError::Shutdown);
        }

        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(
            request_handle = %handle,
            service = %service,
            "Registered pending request"
        );

        Ok((Ticket { handle, generation }, rx))
    }

    /// Remember the dispatch task so external resolution can interrupt it.
    ///
    /// If the ticket's record is already gone the task is aborted straight
    /// away, even when a newer request holds the same handle.
    pub(crate) fn attach_dispatch(&self, ticket: Ticket, dispatch: AbortHandle) {
        match self.pending.get_mut(&ticket.handle) {
            Some(mut request) if request.generation == ticket.generation => {
                request.dispatch = Some(dispatch)
            }
            _ => dispatch.abort(),
        }
    }

    /// Whether the record registered under `ticket` is still unresolved.
    pub(crate) fn is_current(&self, ticket: Ticket) -> bool {
        self.pending
            .get(&ticket.handle)
            .is_some_and(|request| request.generation == ticket.generation)
    }

    /// Complete a pending request with its response.
    ///
    /// Returns false if the handle is unknown or already resolved.
    pub fn complete(&self, response: UaResponse) -> bool {
        let handle = response.request_handle;
        self.resolve(handle, None, Ok(response), Origin::Inbound)
    }

    /// Fail a pending request on behalf of the response demultiplexer.
    pub fn fail(&self, handle: RequestHandle, error: TransportError) -> bool {
        self.resolve(handle, None, Err(error), Origin::Inbound)
    }

    /// Fail a pending request from its own dispatch task.
    ///
    /// A newer request that reused the handle is left alone.
    pub(crate) fn fail_dispatch(&self, ticket: Ticket, error: TransportError) -> bool {
        self.resolve(
            ticket.handle,
            Some(ticket.generation),
            Err(error),
            Origin::Dispatch,
        )
    }

    /// Cancel a pending request, interrupting its dispatch.
    pub fn cancel(&self, handle: RequestHandle) -> bool {
        self.resolve(
            handle,
            None,
            Err(TransportError::Cancelled(handle)),
            Origin::External,
        )
    }

    pub(crate) fn record_retry(&self) {
        self.stats.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove and resolve the record for `handle`.
    ///
    /// With a `generation`, only that registration is removed.
    fn resolve(
        &self,
        handle: RequestHandle,
        generation: Option<u64>,
        result: TransportResult<UaResponse>,
        origin: Origin,
    ) -> bool {
        let removed = self.pending.remove_if(&handle, |_, request| {
            generation.map_or(true, |generation| request.generation == generation)
        });
        let Some((_, pending)) = removed else {
            match origin {
                Origin::Inbound => {
                    self.stats.total_unmatched.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        request_handle = %handle,
                        outcome = outcome_label(&result),
                        "Discarding delivery for unknown or already resolved request"
                    );
                }
                Origin::Dispatch | Origin::External => {
                    debug!(
                        request_handle = %handle,
                        "Request already resolved"
                    );
                }
            }
            return false;
        };

        if origin == Origin::External {
            if let Some(dispatch) = &pending.dispatch {
                dispatch.abort();
            }
        }

        let elapsed = pending.created_at.elapsed();
        let counter = match &result {
            Ok(_) => &self.stats.total_completed,
            Err(TransportError::Timeout { .. }) => &self.stats.total_timeouts,
            Err(TransportError::Cancelled(_)) => &self.stats.total_cancelled,
            Err(_) => &self.stats.total_failed,
        };
        let label = outcome_label(&result);

        match pending.sender.send(result) {
            Ok(()) => {
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(
                    request_handle = %handle,
                    service = %pending.service,
                    outcome = label,
                    elapsed_ms = millis(elapsed),
                    "Resolved pending request"
                );
                true
            }
            Err(_) => {
                // Caller dropped its ResponseFuture
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    request_handle = %handle,
                    service = %pending.service,
                    "Pending request receiver dropped"
                );
                false
            }
        }
    }

    /// Fail every request whose timeout has elapsed.
    ///
    /// Returns the number of requests expired.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(RequestHandle, Duration)> = self
            .pending
            .iter()
            .filter_map(|entry| {
                let elapsed = now.duration_since(entry.created_at);
                match entry.timeout {
                    Some(timeout) if elapsed >= timeout => Some((*entry.key(), elapsed)),
                    _ => None,
                }
            })
            .collect();

        let mut removed = 0;
        for (handle, elapsed) in expired {
            warn!(
                request_handle = %handle,
                elapsed_ms = millis(elapsed),
                "Expiring pending request"
            );
            if self.resolve(
                handle,
                None,
                Err(TransportError::Timeout { handle, elapsed }),
                Origin::External,
            ) {
                removed += 1;
            }
        }

        removed
    }

    /// Close the store and fail everything still pending with `error`.
    ///
    /// Returns the number of requests failed.
    pub fn close(&self, error: TransportError) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let handles: Vec<RequestHandle> = self.pending.iter().map(|entry| *entry.key()).collect();
        handles
            .into_iter()
            .filter(|handle| self.resolve(*handle, None, Err(error.clone()), Origin::External))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests currently in flight
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a request handle is pending
    pub fn is_pending(&self, handle: &RequestHandle) -> bool {
        self.pending.contains_key(handle)
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }

    /// Snapshot of the counters
    pub fn metrics(&self) -> TransportMetrics {
        let stats = self.stats();
        TransportMetrics {
            pending: self.pending_count(),
            total_registered: stats.total_registered.load(Ordering::Relaxed),
            total_completed: stats.total_completed.load(Ordering::Relaxed),
            total_failed: stats.total_failed.load(Ordering::Relaxed),
            total_retries: stats.total_retries.load(Ordering::Relaxed),
            total_timeouts: stats.total_timeouts.load(Ordering::Relaxed),
            total_cancelled: stats.total_cancelled.load(Ordering::Relaxed),
            total_unmatched: stats.total_unmatched.load(Ordering::Relaxed),
        }
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn outcome_label(result: &TransportResult<UaResponse>) -> &'static str {
    match result {
        Ok(_) => "response",
        Err(TransportError::Timeout { .. }) => "timeout",
        Err(TransportError::Cancelled(_)) => "cancelled",
        Err(TransportError::Shutdown) => "shutdown",
        Err(_) => "failure",
    }
}

/// Background task that expires overdue requests until the store closes.
pub async fn expiry_sweep_task(store: Arc<PendingRequestStore>, interval: Duration) {
    let mut sweep_interval = tokio::time::interval(interval);
    sweep_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        sweep_interval.tick().await;
        if store.is_closed() {
            debug!("Pending request store closed, stopping expiry sweeper");
            break;
        }
        let removed = store.remove_expired();
        if removed > 0 {
            debug!(removed = removed, "Expired pending requests");
        }
    }
}
