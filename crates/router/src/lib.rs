//! # Costwise Router
//!
//! The load-balanced core between planned subtasks and model backends:
//!
//! ```text
//! DecomposedTask
//!   |-> LoadBalancer  - scored assignment under live-load constraints
//!   |-> JobTracker    - lifecycle state machine + event broadcast
//!   `-> Executor      - wave scheduling, dependency context, synthesis
//! ```
//!
//! Concurrency model: a bounded worker pool runs independent subtasks of
//! one job in parallel; multiple jobs progress concurrently. The job map
//! follows a readers-writer discipline, load tracking sits behind one
//! mutex, and every backend call honors the per-job deadline and the
//! cooperative cancellation check at wave boundaries.

mod balance;
mod error;
mod events;
mod execute;
mod jobs;
mod load;

pub use balance::{Assignment, LoadBalancer, RoutePriority};
pub use error::{Result, RouterError};
pub use events::{EventBus, JobEvent, JobEventKind};
pub use execute::{ExecutionOutcome, Executor, SubtaskOutcome};
pub use jobs::JobTracker;
pub use load::{LoadTracker, ModelLoad};
