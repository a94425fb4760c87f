//! State Waiter
//!
//! Polls a resource's lifecycle state until it lands in the target set of a
//! transition. A state outside both sets fails immediately; running past the
//! deadline fails with the last observed snapshot attached.

use super::error::SyncError;
use super::retry::jitter;
use super::synchronizer::{
    Classification, LifecycleState, Mutation, Observation, Operation, Status, Transition,
};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Something that can report a resource's current status
#[async_trait]
pub trait StatusSource: Send {
    type Snapshot: Serialize + Send;

    async fn observe(&mut self) -> Result<Observation<Self::Snapshot>, SyncError>;
}

/// Interval between status fetches
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub use_jitter: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl PollConfig {
    /// Fixed interval, no jitter
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
            use_jitter: false,
        }
    }

    /// Sleep before the poll that follows `sleeps` earlier sleeps
    pub fn interval_for(&self, sleeps: u32) -> Duration {
        let exponent = i32::try_from(sleeps).unwrap_or(i32::MAX);
        let interval_ms = self.initial_interval.as_millis() as f64 * self.multiplier.powi(exponent);
        let interval = if interval_ms.is_finite() {
            Duration::from_millis(interval_ms as u64)
        } else {
            self.max_interval
        };
        let capped = interval.min(self.max_interval);

        if self.use_jitter {
            jitter(capped)
        } else {
            capped
        }
    }
}

/// Successful end of a wait
#[derive(Debug, Clone)]
pub struct Waited<S> {
    /// `None` when a delete observed the resource as gone
    pub status: Option<Status<S>>,
    pub fetches: u32,
    pub sleeps: u32,
}

/// Polls until a transition settles
#[derive(Debug, Clone)]
pub struct StateWaiter {
    poll: PollConfig,
    cancel: CancellationToken,
}

impl StateWaiter {
    pub fn new(poll: PollConfig, cancel: CancellationToken) -> Self {
        Self { poll, cancel }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait until `source` reports a state in `transition.target()`.
    ///
    /// With an empty target set the first fetch is returned unclassified. For
    /// deletes, a `Gone` observation counts as reaching the target. A fetch
    /// still running at the deadline is abandoned. A timeout too large to
    /// represent as an instant means no deadline.
    pub async fn wait<P>(
        &self,
        source: &mut P,
        resource_type: &str,
        mutation: Mutation,
        transition: &Transition,
        timeout: Duration,
    ) -> Result<Waited<P::Snapshot>, SyncError>
    where
        P: StatusSource,
    {
        let operation = Operation::from(mutation);
        let deadline = Instant::now().checked_add(timeout);
        let mut fetches = 0;
        let mut sleeps = 0;
        let mut last: Option<Status<P::Snapshot>> = None;

        loop {
            if self.cancel.is_cancelled() {
                return Err(cancelled(resource_type, operation, last.as_ref()));
            }

            let observed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(cancelled(resource_type, operation, last.as_ref()));
                }
                observed = source.observe() => observed?,
                _ = sleep_until(deadline) => {
                    tracing::warn!(
                        "{} {}: status fetch still running at the {:?} deadline",
                        resource_type,
                        operation,
                        timeout
                    );
                    return Err(timed_out(resource_type, operation, timeout, last.as_ref()));
                }
            };
            fetches += 1;

            let status = match observed {
                Observation::Gone if mutation == Mutation::Delete => {
                    tracing::debug!(
                        "{} delete: resource is gone after {} fetch(es)",
                        resource_type,
                        fetches
                    );
                    return Ok(Waited {
                        status: None,
                        fetches,
                        sleeps,
                    });
                }
                Observation::Gone => {
                    return Err(SyncError::NotFound {
                        resource_type: resource_type.to_string(),
                        operation,
                        attempts: fetches,
                    });
                }
                Observation::Found(status) => status,
            };

            if transition.target().is_empty() {
                return Ok(Waited {
                    status: Some(status),
                    fetches,
                    sleeps,
                });
            }

            match transition.classify(&status.state) {
                Classification::Target => {
                    tracing::debug!(
                        "{} {}: reached {} after {} poll(s)",
                        resource_type,
                        operation,
                        status.state,
                        sleeps
                    );
                    return Ok(Waited {
                        status: Some(status),
                        fetches,
                        sleeps,
                    });
                }
                Classification::Unexpected => {
                    tracing::warn!(
                        "{} {}: unexpected state {}",
                        resource_type,
                        operation,
                        status.state
                    );
                    return Err(SyncError::UnexpectedState {
                        resource_type: resource_type.to_string(),
                        operation,
                        state: status.state.clone(),
                        pending: transition.pending().clone(),
                        target: transition.target().clone(),
                        last_snapshot: snapshot_value(&status.snapshot),
                    });
                }
                Classification::Pending => {}
            }

            let mut pause = self.poll.interval_for(sleeps);
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    tracing::warn!(
                        "{} {}: timed out after {:?} in state {}",
                        resource_type,
                        operation,
                        timeout,
                        status.state
                    );
                    return Err(timed_out(resource_type, operation, timeout, Some(&status)));
                }
                pause = pause.min(deadline - now);
            }
            tracing::trace!(
                "{} {}: {} is pending, next poll in {:?}",
                resource_type,
                operation,
                status.state,
                pause
            );
            last = Some(status);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(cancelled(resource_type, operation, last.as_ref()));
                }
                _ = tokio::time::sleep(pause) => {}
            }
            sleeps += 1;
        }
    }
}

/// Resolves at `deadline`, or never when there is none
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn timed_out<S: Serialize>(
    resource_type: &str,
    operation: Operation,
    timeout: Duration,
    last: Option<&Status<S>>,
) -> SyncError {
    SyncError::Timeout {
        resource_type: resource_type.to_string(),
        operation,
        timeout,
        last_state: last.map(|status| status.state.clone()),
        last_snapshot: last.and_then(|status| snapshot_value(&status.snapshot)),
    }
}

fn snapshot_value<S: Serialize>(snapshot: &S) -> Option<serde_json::Value> {
    serde_json::to_value(snapshot).ok()
}

fn cancelled<S: Serialize>(
    resource_type: &str,
    operation: Operation,
    last: Option<&Status<S>>,
) -> SyncError {
    tracing::info!("{} {}: wait cancelled", resource_type, operation);
    SyncError::Cancelled {
        resource_type: resource_type.to_string(),
        operation,
        last_state: last.map(|status| status.state.clone()),
        last_snapshot: last.and_then(|status| snapshot_value(&status.snapshot)),
    }
}

/// Last state a failed wait observed, for log lines
pub fn describe_last_state(error: &SyncError) -> String {
    error
        .last_state()
        .map(LifecycleState::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::synchronizer::StateSet;
    use std::collections::VecDeque;

    struct Script {
        states: VecDeque<&'static str>,
    }

    impl Script {
        fn new(states: &[&'static str]) -> Self {
            Self {
                states: states.iter().copied().collect(),
            }
        }
    }

    #[async_trait]
    impl StatusSource for Script {
        type Snapshot = String;

        async fn observe(&mut self) -> Result<Observation<String>, SyncError> {
            match self.states.pop_front() {
                Some("<gone>") | None => Ok(Observation::Gone),
                Some(state) => Ok(Observation::Found(Status {
                    state: LifecycleState::new(state),
                    snapshot: format!("snapshot:{state}"),
                })),
            }
        }
    }

    fn create_transition() -> Transition {
        Transition::new(
            StateSet::from_states(&["PROVISIONING", "STARTING"]),
            StateSet::from_states(&["AVAILABLE"]),
        )
        .unwrap()
    }

    fn waiter() -> StateWaiter {
        StateWaiter::new(PollConfig::fixed(Duration::from_secs(5)), CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_stable_returns_without_sleeping() {
        let mut source = Script::new(&["AVAILABLE"]);
        let waited = waiter()
            .wait(
                &mut source,
                "db",
                Mutation::Create,
                &create_transition(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(waited.sleeps, 0);
        assert_eq!(waited.fetches, 1);
        assert_eq!(waited.status.unwrap().snapshot, "snapshot:AVAILABLE");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_target_skips_classification() {
        let transition = Transition::new(StateSet::default(), StateSet::default()).unwrap();
        let mut source = Script::new(&["SOMETHING_ODD"]);

        let waited = waiter()
            .wait(&mut source, "db", Mutation::Update, &transition, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(waited.status.unwrap().state.as_str(), "SOMETHING_ODD");
    }

    #[tokio::test(start_paused = true)]
    async fn test_gone_during_create_is_not_found() {
        let mut source = Script::new(&["PROVISIONING", "<gone>"]);
        let err = waiter()
            .wait(
                &mut source,
                "db",
                Mutation::Create,
                &create_transition(),
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gone_during_delete_counts_as_target() {
        let transition = Transition::new(
            StateSet::from_states(&["TERMINATING"]),
            StateSet::from_states(&["TERMINATED"]),
        )
        .unwrap();
        let mut source = Script::new(&["TERMINATING", "<gone>"]);

        let waited = waiter()
            .wait(&mut source, "db", Mutation::Delete, &transition, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(waited.status.is_none());
        assert_eq!(waited.sleeps, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let waiter = StateWaiter::new(PollConfig::fixed(Duration::from_secs(5)), cancel);
        let mut source = Script::new(&["PROVISIONING"]);

        let err = waiter
            .wait(
                &mut source,
                "db",
                Mutation::Create,
                &create_transition(),
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled { last_state: None, .. }));
        assert_eq!(describe_last_state(&err), "unknown");
    }

    /// Answers once, then never again
    struct Stalls {
        answered: bool,
    }

    #[async_trait]
    impl StatusSource for Stalls {
        type Snapshot = String;

        async fn observe(&mut self) -> Result<Observation<String>, SyncError> {
            if self.answered {
                return std::future::pending().await;
            }
            self.answered = true;
            Ok(Observation::Found(Status {
                state: LifecycleState::new("PROVISIONING"),
                snapshot: "snapshot:PROVISIONING".to_string(),
            }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_fetch_times_out_at_deadline() {
        let mut source = Stalls { answered: false };
        let started = Instant::now();

        let err = waiter()
            .wait(
                &mut source,
                "db",
                Mutation::Create,
                &create_transition(),
                Duration::from_secs(60),
            )
            .await
            .unwrap_err();

        match err {
            SyncError::Timeout {
                last_state,
                last_snapshot,
                ..
            } => {
                assert_eq!(last_state, Some(LifecycleState::new("PROVISIONING")));
                assert_eq!(last_snapshot, Some(serde_json::json!("snapshot:PROVISIONING")));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(started.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_means_no_deadline() {
        let mut source = Script::new(&["PROVISIONING", "STARTING", "AVAILABLE"]);

        let waited = waiter()
            .wait(
                &mut source,
                "db",
                Mutation::Create,
                &create_transition(),
                Duration::from_secs(u64::MAX),
            )
            .await
            .unwrap();

        assert_eq!(waited.sleeps, 2);
    }

    #[test]
    fn test_interval_grows_and_caps() {
        let poll = PollConfig {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            multiplier: 3.0,
            use_jitter: false,
        };

        assert_eq!(poll.interval_for(0), Duration::from_secs(1));
        assert_eq!(poll.interval_for(1), Duration::from_secs(3));
        assert_eq!(poll.interval_for(2), Duration::from_secs(9));
        assert_eq!(poll.interval_for(3), Duration::from_secs(10));
    }
}
