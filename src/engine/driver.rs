//! Lifecycle Driver
//!
//! Runs one operation against one resource as a fixed sequence of phases:
//! invoke the imperative call, wait for the resource to settle, then
//! materialize the observed attributes. Any failure ends in `Failed`.

use super::error::SyncError;
use super::retry::{NotFoundMode, Outcome, RemoteCall, RetryPolicy};
use super::synchronizer::{Mutation, Observation, Operation, Synchronizer};
use super::waiter::{describe_last_state, PollConfig, StateWaiter, StatusSource, Waited};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Process-wide timeout per operation category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(20 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(20 * 60),
            delete: Duration::from_secs(20 * 60),
        }
    }
}

impl Timeouts {
    pub fn for_operation(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Create => self.create,
            Operation::Read => self.read,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }

    pub fn with_overrides(&self, overrides: &TimeoutOverrides) -> Self {
        let pick =
            |secs: Option<u64>, fallback: Duration| secs.map_or(fallback, Duration::from_secs);
        Self {
            create: pick(overrides.create_secs, self.create),
            read: pick(overrides.read_secs, self.read),
            update: pick(overrides.update_secs, self.update),
            delete: pick(overrides.delete_secs, self.delete),
        }
    }
}

/// Per-resource-type timeout ceilings, in seconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutOverrides {
    #[serde(default)]
    pub create_secs: Option<u64>,
    #[serde(default)]
    pub read_secs: Option<u64>,
    #[serde(default)]
    pub update_secs: Option<u64>,
    #[serde(default)]
    pub delete_secs: Option<u64>,
}

/// Phase of the driver's state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Invoking,
    Waiting,
    Materializing,
    Done,
    Failed,
}

/// What happened during one `apply`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub operation: Operation,
    pub phases: Vec<Phase>,
    /// Sleeps between status fetches
    pub poll_iterations: u32,
    pub status_fetches: u32,
    /// Whether a create/update/delete request reached the remote system
    pub mutation_sent: bool,
    /// Whether the resource exists once the operation finished
    pub present: bool,
}

impl ApplyReport {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            phases: Vec::new(),
            poll_iterations: 0,
            status_fetches: 0,
            mutation_sent: false,
            present: false,
        }
    }

    fn enter(&mut self, phase: Phase, resource_type: &str) {
        tracing::debug!("{} {}: {:?}", resource_type, self.operation, phase);
        self.phases.push(phase);
    }

    fn record(&mut self, waited_fetches: u32, waited_sleeps: u32) {
        self.status_fetches += waited_fetches;
        self.poll_iterations += waited_sleeps;
    }

    pub fn waited(&self) -> bool {
        self.phases.contains(&Phase::Waiting)
    }
}

/// The operation to apply, with the declared state it reads and writes
pub enum Intent<'a, D> {
    Create(&'a mut D),
    Read(&'a mut D),
    Update { prior: &'a D, desired: &'a mut D },
    Delete,
}

impl<D> Intent<'_, D> {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Create(_) => Operation::Create,
            Self::Read(_) => Operation::Read,
            Self::Update { .. } => Operation::Update,
            Self::Delete => Operation::Delete,
        }
    }
}

/// Drives synchronizers through create, read, update and delete.
///
/// Holds no per-resource state: one driver can serve many resources
/// concurrently, each through its own synchronizer.
#[derive(Debug, Clone)]
pub struct LifecycleDriver {
    retry: RetryPolicy,
    waiter: StateWaiter,
    timeouts: Timeouts,
    overrides: HashMap<String, TimeoutOverrides>,
}

impl LifecycleDriver {
    pub fn new(
        retry: RetryPolicy,
        poll: PollConfig,
        timeouts: Timeouts,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            retry,
            waiter: StateWaiter::new(poll, cancel),
            timeouts,
            overrides: HashMap::new(),
        }
    }

    /// Timeout overrides keyed by resource type; these win over a synchronizer's own
    pub fn with_overrides(mut self, overrides: HashMap<String, TimeoutOverrides>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Effective timeout for an operation on this synchronizer's resource type
    pub fn timeout_for<S: Synchronizer>(&self, sync: &S, operation: Operation) -> Duration {
        let timeouts = match self.overrides.get(sync.resource_type()) {
            Some(overrides) => self.timeouts.with_overrides(overrides),
            None => match sync.timeout_overrides() {
                Some(overrides) => self.timeouts.with_overrides(overrides),
                None => self.timeouts.clone(),
            },
        };
        timeouts.for_operation(operation)
    }

    pub async fn apply<S: Synchronizer>(
        &self,
        sync: &mut S,
        intent: Intent<'_, S::Declared>,
    ) -> Result<ApplyReport, SyncError> {
        match intent {
            Intent::Create(declared) => self.create(sync, declared).await,
            Intent::Read(declared) => self.read(sync, declared).await,
            Intent::Update { prior, desired } => self.update(sync, prior, desired).await,
            Intent::Delete => self.delete(sync).await,
        }
    }

    pub async fn create<S: Synchronizer>(
        &self,
        sync: &mut S,
        declared: &mut S::Declared,
    ) -> Result<ApplyReport, SyncError> {
        let mut report = ApplyReport::new(Operation::Create);
        let result = self.run_create(sync, declared, &mut report).await;
        finish(&*sync, report, result)
    }

    /// Fetch once, within the read timeout, and materialize. A resource that
    /// no longer exists yields `present == false` rather than an error; the
    /// caller drops its state.
    pub async fn read<S: Synchronizer>(
        &self,
        sync: &mut S,
        declared: &mut S::Declared,
    ) -> Result<ApplyReport, SyncError> {
        let mut report = ApplyReport::new(Operation::Read);
        let result = self.run_read(sync, declared, &mut report).await;
        finish(&*sync, report, result)
    }

    /// Send only what changed between `prior` and `desired`; skip the remote
    /// call entirely when nothing did.
    pub async fn update<S: Synchronizer>(
        &self,
        sync: &mut S,
        prior: &S::Declared,
        desired: &mut S::Declared,
    ) -> Result<ApplyReport, SyncError> {
        let mut report = ApplyReport::new(Operation::Update);
        let result = self.run_update(sync, prior, desired, &mut report).await;
        finish(&*sync, report, result)
    }

    pub async fn delete<S: Synchronizer>(&self, sync: &mut S) -> Result<ApplyReport, SyncError> {
        let mut report = ApplyReport::new(Operation::Delete);
        let result = self.run_delete(sync, &mut report).await;
        finish(&*sync, report, result)
    }

    async fn run_create<S: Synchronizer>(
        &self,
        sync: &mut S,
        declared: &mut S::Declared,
        report: &mut ApplyReport,
    ) -> Result<(), SyncError> {
        let resource_type = sync.resource_type().to_string();

        report.enter(Phase::Invoking, &resource_type);
        let call = self.retry.call(&resource_type, Operation::Create, NotFoundMode::Retry);
        sync.create(declared, &call).await?;
        report.mutation_sent = true;

        if let Some(id) = sync.identity() {
            tracing::info!("{} create: remote accepted {}", resource_type, id);
        }
        require_identity(&*sync, Operation::Create)?;

        let waited = self.stabilize(sync, Mutation::Create, NotFoundMode::Retry, report).await?;
        if let Some(status) = waited.status {
            report.enter(Phase::Materializing, &resource_type);
            sync.materialize(&status.snapshot, declared);
        }
        report.present = true;
        Ok(())
    }

    async fn run_read<S: Synchronizer>(
        &self,
        sync: &mut S,
        declared: &mut S::Declared,
        report: &mut ApplyReport,
    ) -> Result<(), SyncError> {
        let resource_type = sync.resource_type().to_string();
        require_identity(&*sync, Operation::Read)?;

        report.enter(Phase::Invoking, &resource_type);
        let timeout = self.timeout_for(&*sync, Operation::Read);
        let call = self.retry.call(&resource_type, Operation::Read, NotFoundMode::Retry);
        let fetched = tokio::select! {
            biased;
            _ = self.waiter.cancel_token().cancelled() => {
                return Err(SyncError::Cancelled {
                    resource_type,
                    operation: Operation::Read,
                    last_state: None,
                    last_snapshot: None,
                });
            }
            fetched = tokio::time::timeout(timeout, sync.fetch_status(&call)) => fetched,
        };

        let observed = match fetched {
            Ok(Ok(observed)) => observed,
            Ok(Err(SyncError::NotFound { .. })) => Observation::Gone,
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                tracing::warn!("{} read: no answer within {:?}", resource_type, timeout);
                return Err(SyncError::Timeout {
                    resource_type,
                    operation: Operation::Read,
                    timeout,
                    last_state: None,
                    last_snapshot: None,
                });
            }
        };
        report.status_fetches += 1;

        match observed {
            Observation::Found(status) => {
                report.enter(Phase::Materializing, &resource_type);
                sync.materialize(&status.snapshot, declared);
                report.present = true;
            }
            Observation::Gone => {
                tracing::info!("{} read: resource no longer exists", resource_type);
                report.present = false;
            }
        }
        Ok(())
    }

    async fn run_update<S: Synchronizer>(
        &self,
        sync: &mut S,
        prior: &S::Declared,
        desired: &mut S::Declared,
        report: &mut ApplyReport,
    ) -> Result<(), SyncError> {
        let resource_type = sync.resource_type().to_string();
        require_identity(&*sync, Operation::Update)?;

        report.enter(Phase::Invoking, &resource_type);
        match sync.diff(prior, desired)? {
            Some(patch) => {
                tracing::debug!("{} update: sending {:?}", resource_type, patch);
                let call = self.retry.call(&resource_type, Operation::Update, NotFoundMode::Retry);
                sync.update(&patch, &call).await?;
                report.mutation_sent = true;
            }
            None => {
                tracing::info!(
                    "{} update: no attribute changes, skipping remote call",
                    resource_type
                );
            }
        }

        let waited = self.stabilize(sync, Mutation::Update, NotFoundMode::Retry, report).await?;
        if let Some(status) = waited.status {
            report.enter(Phase::Materializing, &resource_type);
            sync.materialize(&status.snapshot, desired);
        }
        report.present = true;
        Ok(())
    }

    async fn run_delete<S: Synchronizer>(
        &self,
        sync: &mut S,
        report: &mut ApplyReport,
    ) -> Result<(), SyncError> {
        let resource_type = sync.resource_type().to_string();
        require_identity(&*sync, Operation::Delete)?;

        report.enter(Phase::Invoking, &resource_type);
        let call = self.retry.call(&resource_type, Operation::Delete, NotFoundMode::Absent);
        if let Outcome::NotFound = sync.delete(&call).await? {
            tracing::info!("{} delete: resource was already gone", resource_type);
            report.present = false;
            return Ok(());
        }
        report.mutation_sent = true;

        self.stabilize(sync, Mutation::Delete, NotFoundMode::Absent, report).await?;
        report.present = false;
        Ok(())
    }

    async fn stabilize<S: Synchronizer>(
        &self,
        sync: &mut S,
        mutation: Mutation,
        not_found: NotFoundMode,
        report: &mut ApplyReport,
    ) -> Result<Waited<S::Snapshot>, SyncError> {
        let resource_type = sync.resource_type().to_string();
        let transition = sync.transition(mutation).clone();
        let timeout = self.timeout_for(&*sync, mutation.into());

        report.enter(Phase::Waiting, &resource_type);
        let call = self.retry.call(&resource_type, mutation.into(), not_found);
        let mut source = SyncSource { sync, call };
        let waited = self
            .waiter
            .wait(&mut source, &resource_type, mutation, &transition, timeout)
            .await?;

        report.record(waited.fetches, waited.sleeps);
        Ok(waited)
    }
}

fn require_identity<S: Synchronizer>(sync: &S, operation: Operation) -> Result<(), SyncError> {
    match sync.identity() {
        Some(_) => Ok(()),
        None => Err(SyncError::MissingIdentity {
            resource_type: sync.resource_type().to_string(),
            operation,
        }),
    }
}

fn finish<S: Synchronizer>(
    sync: &S,
    mut report: ApplyReport,
    result: Result<(), SyncError>,
) -> Result<ApplyReport, SyncError> {
    let resource_type = sync.resource_type();
    let identity = sync.identity().map_or_else(|| "-".to_string(), ToString::to_string);

    match result {
        Ok(()) => {
            report.enter(Phase::Done, resource_type);
            tracing::info!(
                "{} {} {}: done (polls={}, mutation_sent={}, present={})",
                resource_type,
                report.operation,
                identity,
                report.poll_iterations,
                report.mutation_sent,
                report.present
            );
            Ok(report)
        }
        Err(err) => {
            report.enter(Phase::Failed, resource_type);
            tracing::error!(
                "{} {} {}: failed in state {}: {}",
                resource_type,
                report.operation,
                identity,
                describe_last_state(&err),
                err
            );
            Err(err)
        }
    }
}

/// Adapts a synchronizer's status fetch to the waiter
struct SyncSource<'a, S> {
    sync: &'a mut S,
    call: RemoteCall<'a>,
}

#[async_trait]
impl<S: Synchronizer> StatusSource for SyncSource<'_, S> {
    type Snapshot = S::Snapshot;

    async fn observe(&mut self) -> Result<Observation<S::Snapshot>, SyncError> {
        self.sync.fetch_status(&self.call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_only_given_fields() {
        let base = Timeouts::default();
        let overrides = TimeoutOverrides {
            create_secs: Some(3600),
            ..TimeoutOverrides::default()
        };

        let merged = base.with_overrides(&overrides);
        assert_eq!(merged.create, Duration::from_secs(3600));
        assert_eq!(merged.delete, base.delete);
        assert_eq!(merged.for_operation(Operation::Read), base.read);
    }

    #[test]
    fn test_intent_operation() {
        let mut declared = 0u8;
        assert_eq!(Intent::Create(&mut declared).operation(), Operation::Create);
        assert_eq!(Intent::<u8>::Delete.operation(), Operation::Delete);
    }
}
