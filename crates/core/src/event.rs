//! Run events and the outbound event multiplexer.
//!
//! A run emits a single ordered stream of [`RunEvent`]s to one remote
//! subscriber. The multiplexer never blocks, batches, or reorders, and it
//! seals itself after the first terminal event.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::EmitError;
use crate::provider::Usage;

/// Every event a run can emit, tagged by its wire name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RunEvent {
    /// Human-readable status of the current phase or tool
    ProgressNote { note: String },

    /// Structured summary surfaced by a read-augmentation tool
    Insight {
        tool: String,
        summary: String,
        #[serde(default)]
        details: serde_json::Value,
    },

    ArtifactBegin {
        artifact_id: String,
        content_type: String,
    },

    ArtifactChunk { artifact_id: String, text: String },

    ArtifactEnd {
        artifact_id: String,
        /// Persisted record, when the store accepted it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        record_id: Option<String>,
    },

    /// Live partial text of the current model turn
    TextDelta { text: String },

    FinalAnswer {
        conversation_id: String,
        answer: String,
    },

    Failure { kind: String, message: String },

    Completed {
        conversation_id: String,
        iterations: u32,
        usage: Usage,
    },
}

impl RunEvent {
    /// The wire name, also used as the SSE event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ProgressNote { .. } => "progress-note",
            Self::Insight { .. } => "insight",
            Self::ArtifactBegin { .. } => "artifact-begin",
            Self::ArtifactChunk { .. } => "artifact-chunk",
            Self::ArtifactEnd { .. } => "artifact-end",
            Self::TextDelta { .. } => "text-delta",
            Self::FinalAnswer { .. } => "final-answer",
            Self::Failure { .. } => "failure",
            Self::Completed { .. } => "completed",
        }
    }

    /// `completed` and `failure` close a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failure { .. })
    }
}

/// Single-writer, ordered, non-blocking outbound event channel.
///
/// Backed by an unbounded tokio channel so `emit` never waits on a slow
/// subscriber. Dropping the receiver is how the subscriber signals a
/// disconnect.
#[derive(Debug)]
pub struct EventMultiplexer {
    tx: mpsc::UnboundedSender<RunEvent>,
    closed: AtomicBool,
}

impl EventMultiplexer {
    pub fn new(tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Create a multiplexer and the subscriber end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Emit one event in production order.
    pub fn emit(&self, event: RunEvent) -> Result<(), EmitError> {
        if self.closed.load(Ordering::Acquire) {
            warn!(event = event.event_type(), "Emit after run closed");
            return Err(EmitError::Closed(event.event_type()));
        }

        let terminal = event.is_terminal();
        if terminal {
            self.closed.store(true, Ordering::Release);
        }

        self.tx.send(event).map_err(|_| EmitError::Disconnected)
    }

    /// Whether a terminal event has gone out.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether the subscriber has gone away.
    pub fn is_disconnected(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the subscriber has gone away.
    pub async fn disconnected(&self) {
        self.tx.closed().await
    }
}
