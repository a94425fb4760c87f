//! Resource lifecycle reconciliation engine
//!
//! Drives any remote, eventually-consistent resource through
//! create → stabilize → update → stabilize → delete → stabilize.
//!
//! # Module Structure
//!
//! - [`synchronizer`] - The per-resource-type contract and its state-set types
//! - [`retry`] - Retry policy wrapped around every remote call
//! - [`waiter`] - Polling state machine that waits for a target state
//! - [`driver`] - Orchestrates invoke → wait → materialize per operation
//! - [`error`] - Error taxonomy shared by all of the above
//!
//! # Example
//!
//! ```ignore
//! use cloudsync::engine::{LifecycleDriver, PollConfig, RetryPolicy, Timeouts};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example(
//!     sync: &mut impl cloudsync::engine::Synchronizer<Declared = MyState>,
//!     state: &mut MyState,
//! ) -> anyhow::Result<()> {
//!     let driver = LifecycleDriver::new(
//!         RetryPolicy::default(),
//!         PollConfig::default(),
//!         Timeouts::default(),
//!         CancellationToken::new(),
//!     );
//!     let report = driver.create(sync, state).await?;
//!     println!("settled after {} polls", report.poll_iterations);
//!     Ok(())
//! }
//! ```

pub mod driver;
pub mod error;
pub mod retry;
pub mod synchronizer;
pub mod waiter;

pub use driver::{ApplyReport, Intent, LifecycleDriver, Phase, TimeoutOverrides, Timeouts};
pub use error::{ErrorKind, SyncError};
pub use retry::{NotFoundMode, Outcome, RemoteCall, RetryPolicy};
pub use synchronizer::{
    Classification, LifecycleState, Mutation, Observation, Operation, ResourceId, StateSet, Status,
    Synchronizer, Transition, Transitions,
};
pub use waiter::{PollConfig, StateWaiter, StatusSource, Waited};
