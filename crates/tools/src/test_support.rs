//! Scripted collaborators for tool tests.

use async_trait::async_trait;
use draftsmith_core::error::{ProviderError, StoreError};
use draftsmith_core::event::{EventMultiplexer, RunEvent};
use draftsmith_core::message::ConversationId;
use draftsmith_core::provider::{
    Increment, IncrementStream, ModelProvider, ModelRequest, SegmentKind, StopReason, Usage,
};
use draftsmith_core::record::{Fields, Record, RecordStore};
use draftsmith_core::retrieval::{
    EmbeddingProvider, SearchDepth, WebSearchProvider, WebSearchResponse, WebSearchResult,
};
use draftsmith_core::tool::ToolContext;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub fn ctx() -> (ToolContext, mpsc::UnboundedReceiver<RunEvent>) {
    let (events, rx) = EventMultiplexer::channel();
    (
        ToolContext::new("acme", ConversationId::from("conv-1"), Arc::new(events)),
        rx,
    )
}

/// Everything currently queued on the subscriber end.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// A generator that streams one text segment made of `chunks`.
///
/// With `stall` set, the stream stays open after the last chunk until the
/// receiver is dropped.
pub struct ScriptedGenerator {
    chunks: Vec<String>,
    stall: bool,
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedGenerator {
    pub fn text(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            stall: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn stalling(chunks: &[&str]) -> Self {
        Self {
            stall: true,
            ..Self::text(chunks)
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_turn(&self, request: ModelRequest) -> Result<IncrementStream, ProviderError> {
        self.requests.lock().unwrap().push(request);

        let mut increments = vec![Increment::SegmentStart {
            index: 0,
            kind: SegmentKind::Text,
        }];
        for chunk in &self.chunks {
            increments.push(Increment::ContentDelta {
                index: 0,
                fragment: chunk.clone(),
            });
        }
        let stall = self.stall;
        if !stall {
            increments.push(Increment::SegmentStop { index: 0 });
            increments.push(Increment::TurnStop {
                stop_reason: Some(StopReason::Normal),
                usage: Usage {
                    input_tokens: 12,
                    output_tokens: 30,
                },
            });
        }

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for increment in increments {
                if tx.send(Ok(increment)).await.is_err() {
                    return;
                }
            }
            if stall {
                tx.closed().await;
            }
        });
        Ok(rx)
    }
}

/// A generator whose stream never opens.
#[derive(Default)]
pub struct PendingGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ModelProvider for PendingGenerator {
    fn name(&self) -> &str {
        "pending"
    }

    async fn stream_turn(&self, _request: ModelRequest) -> Result<IncrementStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Deterministic embedder: the vector is `[len, 1.0]`.
pub struct StubEmbedder {
    pub calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    fn name(&self) -> &str {
        "stub"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![text.len() as f32, 1.0])
    }
}

pub struct StubWebSearch {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl StubWebSearch {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearchProvider for StubWebSearch {
    fn name(&self) -> &str {
        "stub"
    }

    async fn search(
        &self,
        query: &str,
        _depth: SearchDepth,
        max_results: usize,
    ) -> Result<WebSearchResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Network("search host unreachable".into()));
        }
        Ok(WebSearchResponse {
            results: (0..max_results.min(2))
                .map(|i| WebSearchResult {
                    title: format!("{query} #{i}"),
                    url: format!("https://example.com/{i}"),
                    snippet: "snippet".into(),
                    score: 0.9 - i as f32 * 0.1,
                })
                .collect(),
            summary: Some(format!("About {query}")),
        })
    }
}

/// A record store whose writes always fail.
pub struct ReadOnlyStore;

#[async_trait]
impl RecordStore for ReadOnlyStore {
    fn name(&self) -> &str {
        "read_only"
    }

    async fn create_record(&self, _table: &str, _fields: Fields) -> Result<Record, StoreError> {
        Err(StoreError::Storage("disk full".into()))
    }

    async fn put_record(&self, _table: &str, _id: &str, _fields: Fields) -> Result<Record, StoreError> {
        Err(StoreError::Storage("disk full".into()))
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
