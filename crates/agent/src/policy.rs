//! Termination policy, checked after every dispatch round.

use draftsmith_config::{AgentSettings, MAX_ITERATIONS_CEILING};
use tracing::warn;

use crate::state::RunStatus;

/// Name of the tool whose use starts the post-generation countdown.
pub const GENERATION_TOOL: &str = "generate_artifact";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    /// Dispatch rounds before the run is forced to finalize
    pub max_iterations: u32,

    /// Tool rounds still allowed once the generation tool has run and a
    /// second iteration has completed
    pub post_generation_rounds: u32,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS_CEILING,
            post_generation_rounds: 1,
        }
    }
}

impl From<&AgentSettings> for TerminationPolicy {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            max_iterations: settings.max_iterations.clamp(1, MAX_ITERATIONS_CEILING),
            post_generation_rounds: settings.post_generation_rounds,
        }
    }
}

impl TerminationPolicy {
    /// Decide whether the run must finalize instead of asking the model
    /// again. `iterations` counts completed dispatch rounds.
    pub fn check(&self, iterations: u32, generation_round: Option<u32>) -> Option<RunStatus> {
        if iterations >= self.max_iterations {
            warn!(iterations, cap = self.max_iterations, "iteration-cap-reached");
            return Some(RunStatus::IterationCapReached);
        }

        let generation_round = generation_round?;
        // The countdown starts once generation has run and two rounds are done.
        let limit = generation_round.max(2) + self.post_generation_rounds;
        if iterations >= limit {
            warn!(iterations, generation_round, "generation-cap-reached");
            return Some(RunStatus::GenerationCapReached);
        }
        None
    }
}
