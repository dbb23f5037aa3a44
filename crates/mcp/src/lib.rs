//! # Costwise MCP Server
//!
//! The outer surface of the cost-aware inference router. Exposes the
//! routing pipeline as MCP tools over stdio, a read-only resource surface
//! for observability, and the single-instance lock that pins one router
//! per state directory.
//!
//! ## Tools
//!
//! - `route_task` - decompose, score, assign, execute, synthesize
//! - `preemptive_route_task` - decide only
//! - `get_cost_estimate` - per-provider cost breakdown
//! - `cancel_job` - cooperative job cancellation
//! - `get_free_models` - the zero-cost model pool
//! - `benchmark_free_models` - feed the performance store

mod lock;
mod resources;
mod schemas;
mod service;
mod tools;

pub use lock::{InstanceLock, LockAcquisition};
pub use schemas::*;
pub use service::{CostwiseService, ServiceState};
