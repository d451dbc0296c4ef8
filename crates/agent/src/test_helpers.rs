//! Shared test helpers for loop tests.

use async_trait::async_trait;
use draftsmith_core::error::{ProviderError, StoreError, ToolError};
use draftsmith_core::provider::{
    Increment, IncrementStream, ModelProvider, ModelRequest, SegmentKind, StopReason, Usage,
};
use draftsmith_core::record::{Fields, Record, RecordStore};
use draftsmith_core::tool::{Tool, ToolContext, ToolOutput, ToolRegistry};
use draftsmith_stores::InMemoryRecordStore;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// A provider that replays one scripted increment sequence per call.
///
/// Once the script runs out, `stream_turn` fails with a network error.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<Increment>>>,
    requests: Mutex<Vec<ModelRequest>>,
    interrupt_after: Option<usize>,
    stall: bool,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Vec<Increment>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            interrupt_after: None,
            stall: false,
        }
    }

    /// Fail each stream with `StreamInterrupted` after `n` increments.
    pub fn interrupt_after(mut self, n: usize) -> Self {
        self.interrupt_after = Some(n);
        self
    }

    /// Keep each stream open after its last increment.
    pub fn stall(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> ModelRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_turn(&self, request: ModelRequest) -> Result<IncrementStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let Some(mut increments) = self.turns.lock().unwrap().pop_front() else {
            return Err(ProviderError::Network("script exhausted".into()));
        };

        let interrupted = match self.interrupt_after {
            Some(n) if n < increments.len() => {
                increments.truncate(n);
                true
            }
            _ => false,
        };
        let stall = self.stall;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for increment in increments {
                if tx.send(Ok(increment)).await.is_err() {
                    return;
                }
            }
            if interrupted {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted("connection reset".into())))
                    .await;
            } else if stall {
                tx.closed().await;
            }
        });
        Ok(rx)
    }
}

pub fn start_text(index: usize) -> Increment {
    Increment::SegmentStart {
        index,
        kind: SegmentKind::Text,
    }
}

pub fn start_tool(index: usize, id: &str, name: &str) -> Increment {
    Increment::SegmentStart {
        index,
        kind: SegmentKind::Tool {
            id: id.into(),
            name: name.into(),
        },
    }
}

pub fn delta(index: usize, fragment: &str) -> Increment {
    Increment::ContentDelta {
        index,
        fragment: fragment.into(),
    }
}

pub fn stop(index: usize) -> Increment {
    Increment::SegmentStop { index }
}

pub fn turn_stop(stop_reason: Option<StopReason>, usage: Usage) -> Increment {
    Increment::TurnStop { stop_reason, usage }
}

fn usage() -> Usage {
    Usage {
        input_tokens: 10,
        output_tokens: 5,
    }
}

/// A turn that streams `chunks` as one text segment and stops normally.
pub fn text_turn(chunks: &[&str]) -> Vec<Increment> {
    let mut turn = vec![start_text(0)];
    turn.extend(chunks.iter().map(|c| delta(0, c)));
    turn.push(stop(0));
    turn.push(turn_stop(Some(StopReason::Normal), usage()));
    turn
}

/// A turn made only of tool invocations `(id, name, raw_arguments)`.
pub fn tool_turn(calls: &[(&str, &str, &str)]) -> Vec<Increment> {
    let mut turn = Vec::new();
    for (index, (id, name, args)) in calls.iter().enumerate() {
        turn.push(start_tool(index, id, name));
        turn.push(delta(index, args));
        turn.push(stop(index));
    }
    turn.push(turn_stop(Some(StopReason::ToolRequested), usage()));
    turn
}

/// One tool invocation at `index`, then a tool-requested stop.
pub fn tool_turn_at(index: usize, id: &str, name: &str, args: &str) -> Vec<Increment> {
    vec![
        start_tool(index, id, name),
        delta(index, args),
        stop(index),
        turn_stop(Some(StopReason::ToolRequested), usage()),
    ]
}

/// Echoes its text back; `"explode"` is an unrecoverable failure.
pub struct EchoTool;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EchoArgs {
    text: String,
}

#[async_trait]
impl Tool for EchoTool {
    type Args = EchoArgs;

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the input"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: EchoArgs, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        if args.text == "explode" {
            return Err(ToolError::Unrecoverable {
                tool_name: "echo".into(),
                reason: "exploded on request".into(),
            });
        }
        Ok(ToolOutput::new(serde_json::json!({ "echo": args.text })))
    }
}

pub fn echo_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    registry
}

/// A tool that never finishes; abandonable like any read-only tool.
pub struct StuckTool;

#[derive(Deserialize)]
pub struct StuckArgs {}

#[async_trait]
impl Tool for StuckTool {
    type Args = StuckArgs;

    fn name(&self) -> &str {
        "stuck"
    }

    fn description(&self) -> &str {
        "Never returns"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: StuckArgs, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        std::future::pending().await
    }
}

/// A record store that rejects every write.
pub struct FailingStore;

#[async_trait]
impl RecordStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    async fn create_record(&self, _table: &str, _fields: Fields) -> Result<Record, StoreError> {
        Err(StoreError::Storage("database is locked".into()))
    }

    async fn put_record(&self, _table: &str, _id: &str, _fields: Fields) -> Result<Record, StoreError> {
        Err(StoreError::Storage("database is locked".into()))
    }

    async fn get_record(&self, _table: &str, _id: &str) -> Result<Option<Record>, StoreError> {
        Ok(None)
    }

    async fn update_record(&self, table: &str, id: &str, _fields: Fields) -> Result<Record, StoreError> {
        Err(StoreError::NotFound {
            table: table.into(),
            id: id.into(),
        })
    }
}

/// An in-memory store whose reads can be made to fail, and which can reject
/// writes to a single table.
pub struct FlakyStore {
    inner: InMemoryRecordStore,
    fail_reads: AtomicBool,
    rejected_table: Option<&'static str>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryRecordStore::new(),
            fail_reads: AtomicBool::new(false),
            rejected_table: None,
        }
    }

    pub fn rejecting(table: &'static str) -> Self {
        Self {
            rejected_table: Some(table),
            ..Self::new()
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub async fn count(&self, table: &str) -> usize {
        self.inner.count(table).await
    }

    fn check_write(&self, table: &str) -> Result<(), StoreError> {
        if self.rejected_table == Some(table) {
            return Err(StoreError::Storage(format!("{table} is read-only")));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn create_record(&self, table: &str, fields: Fields) -> Result<Record, StoreError> {
        self.check_write(table)?;
        self.inner.create_record(table, fields).await
    }

    async fn put_record(&self, table: &str, id: &str, fields: Fields) -> Result<Record, StoreError> {
        self.check_write(table)?;
        self.inner.put_record(table, id, fields).await
    }

    async fn get_record(&self, table: &str, id: &str) -> Result<Option<Record>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::QueryFailed("connection reset".into()));
        }
        self.inner.get_record(table, id).await
    }

    async fn update_record(&self, table: &str, id: &str, fields: Fields) -> Result<Record, StoreError> {
        self.check_write(table)?;
        self.inner.update_record(table, id, fields).await
    }
}
