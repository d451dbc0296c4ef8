//! `draftsmith chat`: Interactive or single-message drafting.
//!
//! Events are rendered as they arrive: model text and artifact chunks go to
//! stdout, progress notes and insights to stderr.

use std::io::Write;
use std::sync::Arc;

use draftsmith_agent::{AgentRunner, RunOutcome, RunRequest};
use draftsmith_config::AppConfig;
use draftsmith_core::event::{EventMultiplexer, RunEvent};
use draftsmith_core::message::ConversationId;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::runtime;

pub async fn run(message: Option<String>, caller: String) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let runtime = runtime::build(&config).await?;
    let runner = runtime.runner;

    if let Some(msg) = message {
        // Single message mode
        run_once(&runner, RunRequest::new(msg, caller.as_str())).await?;
        return Ok(());
    }

    println!();
    println!("  Draftsmith (interactive)");
    println!("  Model:   {}", config.agent.model);
    println!("  Tools:   {}", runner.tools().names().join(", "));
    println!("  Caller:  {caller}");
    println!();
    println!("  Type your request and press Enter. Type 'exit' to quit.");
    println!();

    let mut conversation: Option<ConversationId> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line == "exit" || line == "quit" {
            break;
        }
        if line.is_empty() {
            prompt()?;
            continue;
        }

        let mut request = RunRequest::new(line, caller.as_str());
        if let Some(id) = &conversation {
            request = request.in_conversation(id.clone());
        }
        let outcome = run_once(&runner, request).await?;
        conversation = Some(outcome.conversation_id);
        prompt()?;
    }

    println!();
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

/// Run one message, rendering its events until the stream closes.
async fn run_once(
    runner: &Arc<AgentRunner>,
    request: RunRequest,
) -> Result<RunOutcome, Box<dyn std::error::Error>> {
    let (events, mut rx) = EventMultiplexer::channel();
    let task = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run(request, Arc::new(events)).await })
    };

    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            RunEvent::TextDelta { text } => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            RunEvent::ProgressNote { note } => eprintln!("\n  [{note}]"),
            RunEvent::Insight { tool, summary, .. } => eprintln!("  [{tool}] {summary}"),
            RunEvent::ArtifactBegin { content_type, .. } => {
                println!("\n\n----- artifact ({content_type}) -----");
            }
            RunEvent::ArtifactChunk { text, .. } => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            RunEvent::ArtifactEnd { record_id, .. } => match record_id {
                Some(id) => println!("\n----- saved as {id} -----\n"),
                None => println!("\n----- not saved -----\n"),
            },
            RunEvent::FinalAnswer { .. } => println!(),
            RunEvent::Failure { kind, message } => eprintln!("\n  [Error: {kind}] {message}"),
            RunEvent::Completed {
                iterations, usage, ..
            } => eprintln!(
                "  ({iterations} tool round(s), {} in / {} out tokens)",
                usage.input_tokens, usage.output_tokens
            ),
        }
    }

    Ok(task.await?)
}
