//! Per-run state and the outcome a run reports.

use draftsmith_core::message::{Conversation, ConversationId};
use draftsmith_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// The model stopped asking for tools.
    Completed,
    IterationCapReached,
    GenerationCapReached,
    /// A tool reported a failure the run cannot continue past.
    Unrecoverable,
    /// Transport failure, a failed write, or history that could not be loaded.
    Failed,
    /// The subscriber went away.
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::IterationCapReached => "iteration-cap-reached",
            Self::GenerationCapReached => "generation-cap-reached",
            Self::Unrecoverable => "unrecoverable",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the client received `final-answer` + `completed`.
    pub fn answered(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::IterationCapReached
                | Self::GenerationCapReached
                | Self::Unrecoverable
        )
    }
}

/// What a finished run hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub conversation_id: ConversationId,
    pub answer: String,
    pub iterations: u32,
    pub usage: Usage,
    pub status: RunStatus,
}

/// Mutable state owned by exactly one run.
#[derive(Debug)]
pub struct RunState {
    pub conversation: Conversation,

    /// Accumulated across every model turn of the run
    pub usage: Usage,

    /// Completed dispatch rounds
    pub iterations: u32,

    /// Round in which the generation tool first ran
    pub generation_round: Option<u32>,

    /// Assistant text produced during this run, one entry per turn
    pub texts: Vec<String>,

    pub last_error: Option<String>,

    pub terminal: bool,
}

impl RunState {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            usage: Usage::default(),
            iterations: 0,
            generation_round: None,
            texts: Vec::new(),
            last_error: None,
            terminal: false,
        }
    }

    /// Record text from one assistant turn.
    pub fn push_text(&mut self, text: String) {
        if !text.trim().is_empty() {
            self.texts.push(text);
        }
    }

    /// Everything the assistant said this run, turns separated by a blank
    /// line.
    pub fn answer(&self) -> String {
        self.texts.join("\n\n")
    }

    pub fn outcome(&self, answer: String, status: RunStatus) -> RunOutcome {
        RunOutcome {
            conversation_id: self.conversation.id.clone(),
            answer,
            iterations: self.iterations,
            usage: self.usage,
            status,
        }
    }
}
