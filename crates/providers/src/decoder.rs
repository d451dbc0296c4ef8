//! Incremental response decoder.
//!
//! Turns the increments of one model turn into finished content segments.
//! Segments are addressed by index, so interleaved text and tool segments
//! assemble independently. Tool argument fragments are buffered raw and
//! parsed exactly once, when their segment stops; an invocation whose
//! buffer never parses is reported as malformed and never dispatched.

use draftsmith_core::error::ProviderError;
use draftsmith_core::message::ContentSegment;
use draftsmith_core::provider::{Increment, IncrementStream, SegmentKind, StopReason, Usage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A tool invocation whose arguments could not be assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedInvocation {
    pub id: String,
    pub name: String,
    /// The concatenated fragments as received
    pub raw_arguments: String,
    pub reason: String,
}

/// Everything one model turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTurn {
    /// Finished segments in index order
    pub segments: Vec<ContentSegment>,
    pub malformed: Vec<MalformedInvocation>,
    pub stop_reason: StopReason,
    pub usage: Usage,
    /// Increments that violated the segment protocol and were dropped
    pub anomalies: usize,
}

impl DecodedTurn {
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                ContentSegment::Text { value } => Some(value.as_str()),
                ContentSegment::ToolInvocation { .. } => None,
            })
            .collect()
    }

    pub fn has_invocations(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, ContentSegment::ToolInvocation { .. }))
    }

    /// Whether the model asked for tool work this turn.
    pub fn wants_tools(&self) -> bool {
        self.stop_reason == StopReason::ToolRequested
            && (self.has_invocations() || !self.malformed.is_empty())
    }
}

#[derive(Debug)]
enum Slot {
    Text {
        buffer: String,
        stopped: bool,
    },
    Tool {
        id: String,
        name: String,
        fragments: String,
        /// Set on stop; `Err` holds the parse failure.
        parsed: Option<Result<serde_json::Value, String>>,
    },
}

impl Slot {
    fn is_stopped(&self) -> bool {
        match self {
            Slot::Text { stopped, .. } => *stopped,
            Slot::Tool { parsed, .. } => parsed.is_some(),
        }
    }
}

/// How far past the highest open segment a new index may jump.
const MAX_INDEX_GAP: usize = 64;

/// Stateful decoder for a single model turn.
#[derive(Debug, Default)]
pub struct ResponseDecoder {
    slots: Vec<Option<Slot>>,
    stop_reason: Option<StopReason>,
    turn_stopped: bool,
    usage: Usage,
    anomalies: usize,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one increment. Returns the text to surface live, if the
    /// increment extended an open text segment.
    pub fn apply(&mut self, increment: Increment) -> Option<String> {
        if self.turn_stopped {
            self.anomaly("increment after turn stop", None);
            return None;
        }

        match increment {
            Increment::SegmentStart { index, kind } => {
                if index > self.slots.len().saturating_add(MAX_INDEX_GAP) {
                    self.anomaly("segment index out of range", Some(index));
                    return None;
                }
                if self.slots.len() <= index {
                    self.slots.resize_with(index + 1, || None);
                }
                if self.slots[index].is_some() {
                    self.anomaly("segment started twice", Some(index));
                    return None;
                }
                self.slots[index] = Some(match kind {
                    SegmentKind::Text => Slot::Text {
                        buffer: String::new(),
                        stopped: false,
                    },
                    SegmentKind::Tool { id, name } => Slot::Tool {
                        id,
                        name,
                        fragments: String::new(),
                        parsed: None,
                    },
                });
                None
            }

            Increment::ContentDelta { index, fragment } => {
                let Some(slot) = self.slots.get_mut(index).and_then(Option::as_mut) else {
                    self.anomaly("delta for unopened segment", Some(index));
                    return None;
                };
                if slot.is_stopped() {
                    self.anomaly("delta after segment stop", Some(index));
                    return None;
                }
                match slot {
                    Slot::Text { buffer, .. } => {
                        buffer.push_str(&fragment);
                        Some(fragment)
                    }
                    Slot::Tool { fragments, .. } => {
                        fragments.push_str(&fragment);
                        None
                    }
                }
            }

            Increment::SegmentStop { index } => {
                let Some(slot) = self.slots.get_mut(index).and_then(Option::as_mut) else {
                    self.anomaly("stop for unopened segment", Some(index));
                    return None;
                };
                if slot.is_stopped() {
                    self.anomaly("segment stopped twice", Some(index));
                    return None;
                }
                match slot {
                    Slot::Text { stopped, .. } => *stopped = true,
                    Slot::Tool {
                        id,
                        name,
                        fragments,
                        parsed,
                    } => {
                        let result = parse_arguments(fragments);
                        if let Err(reason) = &result {
                            warn!(
                                invocation = %id,
                                tool = %name,
                                error = %reason,
                                "Discarding tool invocation with malformed arguments"
                            );
                        }
                        *parsed = Some(result);
                    }
                }
                None
            }

            Increment::TurnStop { stop_reason, usage } => {
                self.turn_stopped = true;
                self.stop_reason = stop_reason;
                self.usage = usage;
                None
            }
        }
    }

    /// Close the turn and assemble its segments.
    pub fn finish(self) -> DecodedTurn {
        let mut segments = Vec::new();
        let mut malformed = Vec::new();
        let mut opened_tools = false;

        for slot in self.slots.into_iter().flatten() {
            match slot {
                Slot::Text { buffer, .. } => {
                    if !buffer.is_empty() {
                        segments.push(ContentSegment::Text { value: buffer });
                    }
                }
                Slot::Tool {
                    id,
                    name,
                    fragments,
                    parsed,
                } => {
                    opened_tools = true;
                    match parsed {
                        Some(Ok(arguments)) => segments.push(ContentSegment::ToolInvocation {
                            id,
                            name,
                            arguments,
                        }),
                        Some(Err(reason)) => malformed.push(MalformedInvocation {
                            id,
                            name,
                            raw_arguments: fragments,
                            reason,
                        }),
                        None => {
                            warn!(invocation = %id, tool = %name, "Turn ended with unterminated tool arguments");
                            malformed.push(MalformedInvocation {
                                id,
                                name,
                                raw_arguments: fragments,
                                reason: "argument stream ended before the segment closed".into(),
                            });
                        }
                    }
                }
            }
        }

        let stop_reason = match self.stop_reason {
            Some(declared) => declared,
            None if opened_tools => StopReason::ToolRequested,
            None if self.turn_stopped => StopReason::Normal,
            None => StopReason::Other,
        };

        debug!(
            segments = segments.len(),
            malformed = malformed.len(),
            stop_reason = stop_reason.as_str(),
            "Decoded model turn"
        );

        DecodedTurn {
            segments,
            malformed,
            stop_reason,
            usage: self.usage,
            anomalies: self.anomalies,
        }
    }

    fn anomaly(&mut self, what: &str, index: Option<usize>) {
        self.anomalies += 1;
        warn!(index = ?index, "Protocol anomaly in increment stream: {what}");
    }
}

/// Zero-argument tools may stream no fragments at all.
fn parse_arguments(fragments: &str) -> Result<serde_json::Value, String> {
    if fragments.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(fragments).map_err(|e| e.to_string())
}

/// Pull a whole turn through a decoder, one suspension per increment.
///
/// `on_text` sees every live text delta as it arrives. An `Err` item on the
/// stream is a transport failure and aborts decoding.
pub async fn decode_stream<F>(
    mut stream: IncrementStream,
    mut on_text: F,
) -> Result<DecodedTurn, ProviderError>
where
    F: FnMut(&str),
{
    let mut decoder = ResponseDecoder::new();
    while let Some(item) = stream.recv().await {
        if let Some(delta) = decoder.apply(item?) {
            on_text(&delta);
        }
    }
    Ok(decoder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn start_text(index: usize) -> Increment {
        Increment::SegmentStart {
            index,
            kind: SegmentKind::Text,
        }
    }

    fn start_tool(index: usize, id: &str, name: &str) -> Increment {
        Increment::SegmentStart {
            index,
            kind: SegmentKind::Tool {
                id: id.into(),
                name: name.into(),
            },
        }
    }

    fn delta(index: usize, fragment: &str) -> Increment {
        Increment::ContentDelta {
            index,
            fragment: fragment.into(),
        }
    }

    fn stop(index: usize) -> Increment {
        Increment::SegmentStop { index }
    }

    fn turn_stop(reason: StopReason) -> Increment {
        Increment::TurnStop {
            stop_reason: Some(reason),
            usage: Usage {
                input_tokens: 12,
                output_tokens: 7,
            },
        }
    }

    fn decode(increments: Vec<Increment>) -> (DecodedTurn, Vec<String>) {
        let mut decoder = ResponseDecoder::new();
        let live: Vec<String> = increments
            .into_iter()
            .filter_map(|i| decoder.apply(i))
            .collect();
        (decoder.finish(), live)
    }

    #[test]
    fn text_deltas_concatenate_exactly() {
        let pieces = ["Hel", "lo, ", "wörld", "", "!"];
        let mut incs = vec![start_text(0)];
        incs.extend(pieces.iter().map(|p| delta(0, p)));
        incs.push(stop(0));
        incs.push(turn_stop(StopReason::Normal));

        let (turn, live) = decode(incs);
        assert_eq!(turn.text(), pieces.concat());
        assert_eq!(live.concat(), pieces.concat());
        assert_eq!(turn.stop_reason, StopReason::Normal);
        assert_eq!(turn.usage.total(), 19);
        assert!(!turn.wants_tools());
    }

    #[test]
    fn split_argument_fragments_parse_once() {
        let (turn, live) = decode(vec![
            start_text(0),
            delta(0, "Checking."),
            stop(0),
            start_tool(1, "toolu_1", "reference_lookup"),
            delta(1, r#"{"que"#),
            delta(1, r#"ry": "welcome "#),
            delta(1, r#"email guidance"}"#),
            stop(1),
            turn_stop(StopReason::ToolRequested),
        ]);

        assert_eq!(live, vec!["Checking."]);
        assert_eq!(turn.segments.len(), 2);
        match &turn.segments[1] {
            ContentSegment::ToolInvocation { id, name, arguments } => {
                assert_eq!(id, "toolu_1");
                assert_eq!(name, "reference_lookup");
                assert_eq!(arguments["query"], "welcome email guidance");
            }
            other => panic!("expected invocation, got {other:?}"),
        }
        assert!(turn.malformed.is_empty());
        assert!(turn.wants_tools());
    }

    #[test]
    fn invalid_concatenation_is_malformed_not_dispatched() {
        let (turn, _) = decode(vec![
            start_tool(0, "toolu_1", "web_research"),
            delta(0, r#"{"query": "#),
            delta(0, r#"oops}"#),
            stop(0),
            turn_stop(StopReason::ToolRequested),
        ]);
        assert!(!turn.has_invocations());
        assert_eq!(turn.malformed.len(), 1);
        assert_eq!(turn.malformed[0].raw_arguments, r#"{"query": oops}"#);
        assert!(turn.wants_tools());
    }

    #[test]
    fn stream_ending_mid_fragment_is_malformed() {
        let (turn, _) = decode(vec![
            start_text(0),
            delta(0, "Let me draft that."),
            stop(0),
            start_tool(1, "toolu_9", "generate_artifact"),
            delta(1, r#"{"brief": "Welcome em"#),
        ]);
        assert!(!turn.has_invocations());
        assert_eq!(turn.malformed.len(), 1);
        assert_eq!(turn.malformed[0].id, "toolu_9");
        assert_eq!(turn.stop_reason, StopReason::ToolRequested);
        assert_eq!(turn.text(), "Let me draft that.");
    }

    #[test]
    fn deltas_after_stop_are_ignored() {
        let (turn, live) = decode(vec![
            start_text(0),
            delta(0, "done"),
            stop(0),
            delta(0, " LATE"),
            turn_stop(StopReason::Normal),
        ]);
        assert_eq!(turn.text(), "done");
        assert_eq!(live, vec!["done"]);
        assert_eq!(turn.anomalies, 1);
    }

    #[test]
    fn interleaved_segments_assemble_by_index() {
        let (turn, _) = decode(vec![
            start_text(0),
            start_tool(1, "a", "web_research"),
            delta(1, r#"{"query":"#),
            delta(0, "Looking "),
            delta(1, r#""onboarding"}"#),
            delta(0, "it up."),
            stop(1),
            stop(0),
            turn_stop(StopReason::ToolRequested),
        ]);
        assert_eq!(turn.text(), "Looking it up.");
        assert!(matches!(
            &turn.segments[1],
            ContentSegment::ToolInvocation { arguments, .. } if arguments["query"] == "onboarding"
        ));
    }

    #[test]
    fn empty_argument_buffer_is_an_empty_object() {
        let (turn, _) = decode(vec![
            start_tool(0, "t", "validate_content"),
            stop(0),
            turn_stop(StopReason::ToolRequested),
        ]);
        assert!(matches!(
            &turn.segments[0],
            ContentSegment::ToolInvocation { arguments, .. } if arguments == &serde_json::json!({})
        ));
    }

    #[test]
    fn unopened_indices_are_anomalies() {
        let (turn, live) = decode(vec![delta(3, "ghost"), stop(4), turn_stop(StopReason::Normal)]);
        assert!(turn.segments.is_empty());
        assert!(live.is_empty());
        assert_eq!(turn.anomalies, 2);
    }

    #[test]
    fn far_out_of_range_index_is_an_anomaly() {
        let (turn, live) = decode(vec![
            start_text(usize::MAX),
            start_tool(1 << 40, "call_far", "reference_lookup"),
            start_text(0),
            delta(0, "still fine"),
            stop(0),
            turn_stop(StopReason::Normal),
        ]);
        assert_eq!(turn.anomalies, 2);
        assert_eq!(turn.text(), "still fine");
        assert_eq!(live, vec!["still fine"]);
    }

    #[test]
    fn missing_turn_stop_without_tools_is_other() {
        let (turn, _) = decode(vec![start_text(0), delta(0, "partial")]);
        assert_eq!(turn.stop_reason, StopReason::Other);
        assert_eq!(turn.text(), "partial");
    }

    #[tokio::test]
    async fn decode_stream_surfaces_transport_errors() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(Ok(start_text(0))).await.unwrap();
        tx.send(Ok(delta(0, "hi"))).await.unwrap();
        tx.send(Err(ProviderError::StreamInterrupted("reset".into())))
            .await
            .unwrap();
        drop(tx);

        let mut seen = String::new();
        let err = decode_stream(rx, |d| seen.push_str(d)).await.unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(_)));
        assert_eq!(seen, "hi");
    }

    #[tokio::test]
    async fn decode_stream_assembles_a_turn() {
        let (tx, rx) = mpsc::channel(8);
        for inc in [
            start_text(0),
            delta(0, "a"),
            delta(0, "b"),
            stop(0),
            turn_stop(StopReason::LengthLimit),
        ] {
            tx.send(Ok(inc)).await.unwrap();
        }
        drop(tx);

        let turn = decode_stream(rx, |_| {}).await.unwrap();
        assert_eq!(turn.text(), "ab");
        assert_eq!(turn.stop_reason, StopReason::LengthLimit);
    }
}
