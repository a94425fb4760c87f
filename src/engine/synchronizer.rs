//! Resource Synchronizer contract
//!
//! Every resource type the engine can drive implements [`Synchronizer`].
//! The driver never sees a concrete resource: it only calls the imperative
//! steps, reads the per-operation state sets and hands snapshots back for
//! materialization.

use super::error::SyncError;
use super::retry::{Outcome, RemoteCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Handle assigned by the remote control plane when a resource is created
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Returns `None` for blank identifiers
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state reported by the remote system.
///
/// Kept as an open string rather than a closed enum: remote APIs add states
/// over time and a state no transition mentions still has to be reported.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct LifecycleState(String);

impl LifecycleState {
    pub fn new(state: &str) -> Self {
        Self(state.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LifecycleState {
    fn from(state: &str) -> Self {
        Self::new(state)
    }
}

impl From<String> for LifecycleState {
    fn from(state: String) -> Self {
        Self::new(&state)
    }
}

impl From<LifecycleState> for String {
    fn from(state: LifecycleState) -> Self {
        state.0
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Set of lifecycle states
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSet(BTreeSet<LifecycleState>);

impl StateSet {
    pub fn from_states(states: &[&str]) -> Self {
        states.iter().copied().map(LifecycleState::new).collect()
    }

    pub fn contains(&self, state: &LifecycleState) -> bool {
        self.0.contains(state)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LifecycleState> {
        self.0.iter()
    }

    fn overlap(&self, other: &StateSet) -> Vec<LifecycleState> {
        self.0.intersection(&other.0).cloned().collect()
    }
}

impl FromIterator<LifecycleState> for StateSet {
    fn from_iter<I: IntoIterator<Item = LifecycleState>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for StateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(LifecycleState::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// How an observed state relates to a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Pending,
    Target,
    Unexpected,
}

/// Pending and target states for one state-changing operation.
///
/// The two sets never share a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pending: StateSet,
    target: StateSet,
}

impl Transition {
    pub fn new(pending: StateSet, target: StateSet) -> Result<Self, SyncError> {
        let overlap = pending.overlap(&target);
        if !overlap.is_empty() {
            return Err(SyncError::InvalidTransition { overlap });
        }
        Ok(Self { pending, target })
    }

    pub fn pending(&self) -> &StateSet {
        &self.pending
    }

    pub fn target(&self) -> &StateSet {
        &self.target
    }

    pub fn classify(&self, state: &LifecycleState) -> Classification {
        if self.target.contains(state) {
            Classification::Target
        } else if self.pending.contains(state) {
            Classification::Pending
        } else {
            Classification::Unexpected
        }
    }
}

/// Transitions for create, update and delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transitions {
    pub create: Transition,
    pub update: Transition,
    pub delete: Transition,
}

impl Transitions {
    pub fn get(&self, mutation: Mutation) -> &Transition {
        match mutation {
            Mutation::Create => &self.create,
            Mutation::Update => &self.update,
            Mutation::Delete => &self.delete,
        }
    }
}

/// Top-level operations the driver performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations that change remote state and therefore need stabilizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutation {
    Create,
    Update,
    Delete,
}

impl From<Mutation> for Operation {
    fn from(mutation: Mutation) -> Self {
        match mutation {
            Mutation::Create => Operation::Create,
            Mutation::Update => Operation::Update,
            Mutation::Delete => Operation::Delete,
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Operation::from(*self).fmt(f)
    }
}

/// Current lifecycle state together with the full remote snapshot
#[derive(Debug, Clone)]
pub struct Status<S> {
    pub state: LifecycleState,
    pub snapshot: S,
}

/// Result of a status fetch
#[derive(Debug, Clone)]
pub enum Observation<S> {
    Found(Status<S>),
    /// The remote system no longer knows the identity
    Gone,
}

/// Per-resource-type implementation of the lifecycle contract.
///
/// Remote methods receive a [`RemoteCall`] carrying the retry policy and the
/// not-found behaviour chosen by the driver for that call site; implementors
/// wrap each request with [`RemoteCall::run`].
#[async_trait]
pub trait Synchronizer: Send {
    /// Caller-side declared state; desired attributes plus materialized ones
    type Declared: Send + Sync;
    /// Full status object returned by the remote system
    type Snapshot: Serialize + Clone + fmt::Debug + Send + Sync;
    /// The subset of attributes an update sends
    type Patch: fmt::Debug + Send + Sync;

    fn resource_type(&self) -> &str;

    /// Valid after a successful create or when constructed for an existing resource
    fn identity(&self) -> Option<&ResourceId>;

    fn transition(&self, mutation: Mutation) -> &Transition;

    fn pending_states(&self, mutation: Mutation) -> &StateSet {
        self.transition(mutation).pending()
    }

    fn target_states(&self, mutation: Mutation) -> &StateSet {
        self.transition(mutation).target()
    }

    /// Per-type timeout ceilings, if the type deviates from the process defaults
    fn timeout_overrides(&self) -> Option<&super::driver::TimeoutOverrides> {
        None
    }

    /// Issue the remote create. On success `identity()` must return the new id.
    async fn create(
        &mut self,
        declared: &Self::Declared,
        call: &RemoteCall<'_>,
    ) -> Result<(), SyncError>;

    /// Side-effect-free observation keyed by `identity()`
    async fn fetch_status(
        &mut self,
        call: &RemoteCall<'_>,
    ) -> Result<Observation<Self::Snapshot>, SyncError>;

    /// Attributes that differ between `prior` and `desired`, or `None` when nothing changed.
    ///
    /// Combinations the remote API refuses in a single request are rejected
    /// here, before any remote call is made.
    fn diff(
        &self,
        prior: &Self::Declared,
        desired: &Self::Declared,
    ) -> Result<Option<Self::Patch>, SyncError>;

    async fn update(&mut self, patch: &Self::Patch, call: &RemoteCall<'_>) -> Result<(), SyncError>;

    async fn delete(&mut self, call: &RemoteCall<'_>) -> Result<Outcome<()>, SyncError>;

    /// Write remote-observed attributes into the caller's declared state
    fn materialize(&self, snapshot: &Self::Snapshot, out: &mut Self::Declared);
}
