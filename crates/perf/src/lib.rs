//! # Costwise Performance Store
//!
//! Rolling per-model statistics keyed by model id, updated after each
//! observed execution and consumed by the scoring engine. All averages are
//! exponential moving averages with a fixed smoothing factor; complexity
//! fit is a running mean gated on quality.
//!
//! The store is a single-writer structure: mutations go through one mutex,
//! readers receive cloned snapshots.

mod error;
mod store;

pub use error::{PerfError, Result};
pub use store::{ComplexityAnalysis, ExecutionObservation, ModelStats, PerfStore, EMA_ALPHA};
