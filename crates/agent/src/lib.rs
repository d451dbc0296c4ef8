//! The agentic control loop for Draftsmith.
//!
//! A run follows a **Request → Decode → Dispatch** cycle:
//!
//! 1. **Request** a model turn with the conversation and tool catalogue
//! 2. **Decode** its increments, forwarding text to the client live
//! 3. **Dispatch** every requested tool in order and append the results
//! 4. Loop back to step 1, or **finalize** when the model stops asking for
//!    tools or a termination policy fires
//!
//! The run ends with `final-answer` + `completed`, with `failure`, or with
//! nothing when the client has gone away.

pub mod loop_runner;
pub mod policy;
pub mod state;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use loop_runner::{AgentRunner, RunRequest};
pub use policy::{GENERATION_TOOL, TerminationPolicy};
pub use state::{RunOutcome, RunState, RunStatus};
