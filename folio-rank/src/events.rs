//! Engine event broadcasting
//!
//! Post-commit notifications for outer layers (UI push, monitoring).
//! Send errors are ignored: no subscribers is a valid state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::Outcome;

/// Events emitted by the session coordinator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// A catalog scan finished and the present set was replaced.
    ScanCompleted {
        image_count: usize,
        new_digests: usize,
        timestamp: DateTime<Utc>,
    },

    /// A choice was committed and the round advanced.
    ChoiceRecorded {
        round: i64,
        outcome: Outcome,
        left_digest: String,
        right_digest: String,
        timestamp: DateTime<Utc>,
    },

    /// Convergence metrics changed after a commit.
    ProgressChanged {
        progress: f64,
        portfolio_ready: bool,
        timestamp: DateTime<Utc>,
    },

    /// All posteriors and the choice log were cleared.
    SessionReset { timestamp: DateTime<Utc> },
}

/// Broadcast bus for engine events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast an event to all subscribers.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
