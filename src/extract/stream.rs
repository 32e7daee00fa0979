//! Streaming tool-call extractor.
//!
//! One [`StreamExtractor`] is owned by exactly one response; there is no
//! global state — each extractor owns its own buffer and phase.

use crate::protocol::{Phase, Protocol, StreamState};
use crate::types::{FinishReason, StreamEvent, ToolDescriptor};

/// Owns the per-response streaming state and drives one protocol's state
/// machine chunk by chunk.
pub struct StreamExtractor {
    protocol: Protocol,
    tools: Vec<ToolDescriptor>,
    state: StreamState,
}

impl StreamExtractor {
    pub fn new(protocol: Protocol, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            protocol,
            tools,
            state: StreamState::new(),
        }
    }

    /// Advances the state machine by one text delta, returning the events it
    /// implies. Never suspends: given a chunk, every implied event is
    /// produced before returning.
    pub fn process_chunk(&mut self, chunk: &str, on_error: &mut dyn FnMut(&str)) -> Vec<StreamEvent> {
        self.protocol.parse_stream_chunk(&mut self.state, chunk, &self.tools, on_error)
    }

    /// Called once the host's chunk iterator is exhausted. If the stream
    /// ended inside a call region, the ambiguity is resolved in favour of
    /// text and an `Error` event is surfaced,
    /// alongside the recoverable `onError` callback .
    pub fn finalize(&mut self, on_error: &mut dyn FnMut(&str)) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if self.state.phase == Phase::InsideToolCall {
            if let Some(call) = self.state.current_call.take() {
                // Whatever marker text was already consumed into the
                // in-progress call plus whatever remains unflushed in the
                // buffer is, in total, ordinary text once we give up on the
                // call ever closing.
                let mut recovered = String::new();
                if call.started {
                    recovered.push_str(&call.args_buffer);
                }
                recovered.push_str(&self.state.buffer);
                self.state.buffer.clear();
                if !recovered.is_empty() {
                    events.push(StreamEvent::TextDelta { id: "text".into(), delta: recovered });
                }
            }
            let message = "stream ended inside an unterminated tool-call region";
            on_error(message);
            events.push(StreamEvent::Error { error: message.to_string() });
            self.state.phase = Phase::Outside;
        } else if !self.state.buffer.is_empty() {
            events.push(StreamEvent::TextDelta { id: "text".into(), delta: std::mem::take(&mut self.state.buffer) });
        }

        events.push(StreamEvent::Finish { reason: FinishReason::Stop });
        events
    }

    /// Drops all buffered state without emitting anything further: no
    /// partial `ToolCall` is ever emitted without its matching
    /// `ToolInputEnd`, which holds trivially since this path emits nothing
    /// at all.
    pub fn cancel(&mut self) {
        self.state = StreamState::new();
    }
}
