//! # Exactly-Once Resolution
//!
//! Random write scripts and random caller/server behaviour; every request
//! must resolve once, with the outcome its script dictates, and the
//! correlation map must end up empty. Handles freed by a resolution are
//! reused while the earlier request's retry timer is still armed.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use ua_transport::test_utils::{ManualScheduler, ScriptedChannelProvider, WriteOutcome};
use ua_transport::{
    ChannelError, RequestHandle, RequestHeader, ResponseSink, ServiceKind, StatusCode, Transport,
    TransportConfig, TransportError, UaRequest, UaResponse,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    Ok,
    Closed,
    Fatal,
}

impl Write {
    fn outcome(self) -> WriteOutcome {
        match self {
            Write::Ok => WriteOutcome::Ok,
            Write::Closed => WriteOutcome::Fail(ChannelError::Closed),
            Write::Fatal => WriteOutcome::Fail(ChannelError::Encoding("bad body".into())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Respond,
    RespondTwice,
    Cancel,
    Abandon,
}

#[derive(Debug, Clone, Copy)]
struct Plan {
    first: Write,
    second: Write,
    action: Action,
}

impl Plan {
    fn retried(&self) -> bool {
        self.first == Write::Closed
    }

    /// Terminal write failure the dispatch reports itself
    fn write_error(&self) -> Option<ChannelError> {
        match (self.first, self.second) {
            (Write::Fatal, _) => Some(ChannelError::Encoding("bad body".into())),
            (Write::Closed, Write::Closed) => Some(ChannelError::Closed),
            (Write::Closed, Write::Fatal) => Some(ChannelError::Encoding("bad body".into())),
            _ => None,
        }
    }
}

/// How a request waiting to retry gets resolved before its timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Early {
    Respond,
    Fault,
    Cancel,
}

/// A request resolved during its retry wait, then a new request on its handle
#[derive(Debug, Clone, Copy)]
struct Reuse {
    early: Early,
    next: Write,
}

fn write() -> impl Strategy<Value = Write> {
    prop_oneof![Just(Write::Ok), Just(Write::Closed), Just(Write::Fatal)]
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Respond),
        Just(Action::RespondTwice),
        Just(Action::Cancel),
        Just(Action::Abandon),
    ]
}

fn plan() -> impl Strategy<Value = Plan> {
    (write(), write(), action()).prop_map(|(first, second, action)| Plan {
        first,
        second,
        action,
    })
}

fn reuse() -> impl Strategy<Value = Reuse> {
    let early = prop_oneof![Just(Early::Respond), Just(Early::Fault), Just(Early::Cancel)];
    (early, write()).prop_map(|(early, next)| Reuse { early, next })
}

fn request(handle: RequestHandle, body: u8) -> UaRequest {
    UaRequest::new(RequestHeader::new(handle), ServiceKind::Read, vec![body])
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_every_request_resolves_exactly_once(plans in prop::collection::vec(plan(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let provider = ScriptedChannelProvider::new();
            let scheduler = Arc::new(ManualScheduler::new());
            let transport =
                Transport::new(provider.clone(), scheduler.clone(), TransportConfig::default())
                    .unwrap();
            let dispatcher = transport.dispatcher();

            let handle = |i: usize| RequestHandle::new(i as u32 + 1);
            let mut futures = Vec::new();
            for (i, plan) in plans.iter().enumerate() {
                provider.script_writes(handle(i), [plan.first.outcome(), plan.second.outcome()]);
                futures.push(transport.send(UaRequest::new(
                    RequestHeader::new(handle(i)),
                    ServiceKind::Read,
                    vec![i as u8],
                )));
            }

            let retried = plans.iter().filter(|p| p.retried()).count();
            provider.wait_for_writes(plans.len() as u64).await;
            scheduler.wait_for_tasks(retried).await;
            prop_assert_eq!(scheduler.advance(Duration::from_secs(1)).await, retried);
            provider.wait_for_writes((plans.len() + retried) as u64).await;
            settle().await;

            for (i, plan) in plans.iter().enumerate() {
                let live = plan.write_error().is_none();
                let response = || UaResponse::good(handle(i), vec![i as u8]);
                match plan.action {
                    Action::Respond => {
                        prop_assert_eq!(dispatcher.deliver(response()), live);
                    }
                    Action::RespondTwice => {
                        prop_assert_eq!(dispatcher.deliver(response()), live);
                        prop_assert!(!dispatcher.deliver(response()));
                    }
                    Action::Cancel => {
                        prop_assert_eq!(transport.cancel(handle(i)), live);
                    }
                    Action::Abandon => {}
                }
            }

            let abandoned = plans
                .iter()
                .filter(|p| p.write_error().is_none() && p.action == Action::Abandon)
                .count();
            prop_assert_eq!(transport.shutdown(), abandoned);

            for (i, (plan, future)) in plans.iter().zip(futures).enumerate() {
                let result = future.await;
                match (plan.write_error(), plan.action) {
                    (Some(err), _) => prop_assert_eq!(result, Err(TransportError::Write(err))),
                    (None, Action::Respond | Action::RespondTwice) => {
                        let response = result.unwrap();
                        prop_assert_eq!(response.body.as_ref(), &[i as u8]);
                    }
                    (None, Action::Cancel) => {
                        prop_assert_eq!(result, Err(TransportError::Cancelled(handle(i))));
                    }
                    (None, Action::Abandon) => prop_assert_eq!(result, Err(TransportError::Shutdown)),
                }

                let expected_writes = if plan.retried() { 2 } else { 1 };
                prop_assert_eq!(provider.writes_for(handle(i)), expected_writes);
            }

            let metrics = transport.metrics();
            prop_assert_eq!(metrics.pending, 0);
            prop_assert_eq!(metrics.total_registered, plans.len() as u64);
            prop_assert_eq!(
                metrics.total_completed + metrics.total_failed + metrics.total_cancelled,
                plans.len() as u64
            );
            prop_assert_eq!(metrics.total_retries, retried as u64);

            Ok(())
        })?;
    }

    #[test]
    fn prop_reused_handles_resolve_independently(reuses in prop::collection::vec(reuse(), 1..16)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let provider = ScriptedChannelProvider::new();
            let scheduler = Arc::new(ManualScheduler::new());
            let transport =
                Transport::new(provider.clone(), scheduler.clone(), TransportConfig::default())
                    .unwrap();
            let dispatcher = transport.dispatcher();
            let n = reuses.len();
            let handle = |i: usize| RequestHandle::new(i as u32 + 1);

            // Every first request hits a closed channel and waits to retry
            let mut firsts = Vec::new();
            for i in 0..n {
                provider.script_writes(handle(i), [Write::Closed.outcome()]);
                firsts.push(transport.send(request(handle(i), 0)));
            }
            provider.wait_for_writes(n as u64).await;
            scheduler.wait_for_tasks(n).await;

            for (i, reuse) in reuses.iter().enumerate() {
                let resolved = match reuse.early {
                    Early::Respond => dispatcher.deliver(UaResponse::good(handle(i), vec![0])),
                    Early::Fault => dispatcher.deliver_failure(
                        handle(i),
                        TransportError::ServiceFault {
                            status: StatusCode::BAD_UNEXPECTED_ERROR,
                            message: "rejected".into(),
                        },
                    ),
                    Early::Cancel => transport.cancel(handle(i)),
                };
                prop_assert!(resolved);
            }

            // Same handles again, before the old retry timers fire
            let mut seconds = Vec::new();
            for (i, reuse) in reuses.iter().enumerate() {
                provider.script_writes(handle(i), [reuse.next.outcome(), Write::Ok.outcome()]);
                seconds.push(transport.send(request(handle(i), 1)));
            }
            let retried = reuses.iter().filter(|r| r.next == Write::Closed).count();
            provider.wait_for_writes(2 * n as u64).await;
            scheduler.wait_for_tasks(n + retried).await;

            prop_assert_eq!(scheduler.advance(Duration::from_secs(1)).await, n + retried);
            provider.wait_for_writes((2 * n + retried) as u64).await;
            settle().await;

            for (i, (reuse, first)) in reuses.iter().zip(firsts).enumerate() {
                let result = first.await;
                match reuse.early {
                    Early::Respond => {
                        let response = result.unwrap();
                        prop_assert_eq!(response.body.as_ref(), &[0]);
                    }
                    Early::Fault => prop_assert!(
                        matches!(result, Err(TransportError::ServiceFault { .. })),
                        "expected ServiceFault, got {:?}",
                        result
                    ),
                    Early::Cancel => {
                        prop_assert_eq!(result, Err(TransportError::Cancelled(handle(i))))
                    }
                }
            }

            for (i, (reuse, second)) in reuses.iter().zip(seconds).enumerate() {
                if reuse.next == Write::Fatal {
                    prop_assert_eq!(
                        second.await,
                        Err(TransportError::Write(ChannelError::Encoding("bad body".into())))
                    );
                } else {
                    prop_assert!(transport.is_pending(handle(i)));
                    prop_assert!(dispatcher.deliver(UaResponse::good(handle(i), vec![1])));
                    let response = second.await.unwrap();
                    prop_assert_eq!(response.body.as_ref(), &[1]);
                }

                let expected_writes = if reuse.next == Write::Closed { 3 } else { 2 };
                prop_assert_eq!(provider.writes_for(handle(i)), expected_writes);
            }

            let metrics = transport.metrics();
            prop_assert_eq!(metrics.pending, 0);
            prop_assert_eq!(metrics.total_registered, 2 * n as u64);
            prop_assert_eq!(metrics.total_retries, (n + retried) as u64);
            prop_assert_eq!(
                metrics.total_completed + metrics.total_failed + metrics.total_cancelled,
                2 * n as u64
            );

            Ok(())
        })?;
    }
}
