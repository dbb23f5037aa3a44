//! Typed job-event broadcast. Transport adapters (WebSocket or otherwise)
//! subscribe here; the tracker only knows the bus.

use costwise_protocol::job::unix_now;
use costwise_protocol::JobStatus;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    StatusChanged { from: JobStatus, to: JobStatus },
    Progress { progress: u8, eta_seconds: Option<u64> },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: String,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub at: u64,
}

/// Broadcast fan-out for job events. Slow subscribers lag and drop rather
/// than backpressure the tracker.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, job_id: &str, kind: JobEventKind) {
        let event = JobEvent {
            job_id: job_id.to_string(),
            kind,
            at: unix_now(),
        };
        // Zero subscribers is normal; delivery is best-effort.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
