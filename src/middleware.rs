//! The middleware entry point: ties the prompt transformer,
//! the generate/stream extractors, and the tool-choice adapter together
//! behind the three hooks a host calls — `transform_params`,
//! `wrap_generate`, `wrap_stream`.
//!
//! Mirrors the SDK's `client.rs` in spirit (it's the module that
//! turns the library's separate pieces into the thing a host actually
//! drives) but the thing being driven is text in and structured events out,
//! not an HTTP round trip — the provider call itself stays the host's job.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::stream::{Stream, StreamExt};
use serde_json::Value;

use crate::config::{Placement, ToolChoiceConfig};
use crate::error::{Error, Result};
use crate::extract::generate::{self, DebugSummary};
use crate::extract::stream::StreamExtractor;
use crate::ids::next_call_id;
use crate::prompt::{self, TransformedPrompt};
use crate::protocol::{ParseOptions, Protocol};
use crate::tool_choice;
use crate::types::{ContentPart, FinishReason, Message, StreamEvent, ToolDescriptor};

/// Output of [`Middleware::transform_params`]: the rewritten messages plus
/// everything the host needs to finish constructing its provider request.
pub struct TransformParamsResult {
    /// The rewritten message list to ship to the provider.
    pub messages: Vec<Message>,
    /// The tools as originally declared, to hand back to `wrap_generate`/
    /// `wrap_stream` when the response comes in.
    pub original_tools: Vec<ToolDescriptor>,
    /// When tool-choice is `required` or a specific tool, the synthesised
    /// JSON-Schema the host should switch its provider request to JSON-object
    /// response mode with. `None` under `auto`.
    pub forced_response_schema: Option<Value>,
}

/// Output of [`Middleware::wrap_generate`].
pub struct GenerateResult {
    pub content: Vec<ContentPart>,
    /// Populated only when the caller asked for it via
    /// [`crate::config::ToolCallMiddlewareOptions::want_debug_summary`].
    pub debug_summary: Option<DebugSummary>,
}

type OnError = Option<Box<dyn Fn(&str) + Send + Sync>>;

fn report(on_error: &OnError, message: &str) {
    if let Some(f) = on_error {
        f(message);
    }
}

/// One configured middleware instance.
///
/// Immutable once built — safely shared across threads/requests, matching
/// the protocol objects' own stateless, side-effect-free design.
#[derive(Debug, Clone)]
pub struct Middleware {
    protocol: Protocol,
    system_template: String,
    placement: Placement,
    parse_options: ParseOptions,
}

impl Middleware {
    /// `create(protocol, toolSystemPromptTemplate, placement)`.
    ///
    /// The per-protocol tool-response template is not a caller-supplied
    /// string in this crate: each protocol fixes its own default response
    /// rendering to its own call-serialisation convention, so there is
    /// nothing to override here — `format_tools`'s `{{tools}}` substitution
    /// is the only templating surface.
    pub fn create(protocol: Protocol, tool_system_prompt_template: impl Into<String>, placement: Placement) -> Self {
        Self {
            protocol,
            system_template: tool_system_prompt_template.into(),
            placement,
            parse_options: ParseOptions::default(),
        }
    }

    /// Overrides how morph-XML/YAML-in-XML scaffolding resolves duplicate
    /// sibling tags. Defaults to first-wins.
    pub fn with_parse_options(mut self, options: ParseOptions) -> Self {
        self.parse_options = options;
        self
    }

    /// `transform_params(params)`: rewrites the outgoing message
    /// list and, when `tool_choice` constrains the model to a
    /// forced call, synthesises the JSON-Schema the host should switch its
    /// provider request to.
    ///
    /// Configuration failures are raised synchronously here, never routed
    /// through `on_error`.
    pub fn transform_params(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        tool_choice: &ToolChoiceConfig,
        on_error: &mut dyn FnMut(&str),
    ) -> Result<TransformParamsResult> {
        tool_choice.validate(tools)?;

        let TransformedPrompt { messages, original_tools } =
            prompt::transform_prompt(messages, tools, self.protocol, &self.system_template, self.placement, on_error)?;

        let forced_response_schema = match tool_choice {
            ToolChoiceConfig::Required | ToolChoiceConfig::Tool { .. } => {
                Some(tool_choice::synthesize_schema(tool_choice, &original_tools))
            }
            ToolChoiceConfig::Auto | ToolChoiceConfig::None => None,
        };

        Ok(TransformParamsResult { messages, original_tools, forced_response_schema })
    }

    /// `wrap_generate(do_generate, params)`: parses a completed
    /// provider response. Under a forced tool-choice, the response is the
    /// JSON-object-mode payload; otherwise it's free text parsed
    /// through the active protocol's grammar.
    pub fn wrap_generate(
        &self,
        text: &str,
        original_tools: &[ToolDescriptor],
        tool_choice: &ToolChoiceConfig,
        want_debug_summary: bool,
        on_error: &OnError,
    ) -> Result<GenerateResult> {
        match tool_choice {
            ToolChoiceConfig::Required | ToolChoiceConfig::Tool { .. } => {
                let call = tool_choice::parse_forced_response(text, tool_choice, original_tools)?;
                Ok(GenerateResult { content: vec![ContentPart::tool_call(call)], debug_summary: None })
            }
            ToolChoiceConfig::Auto | ToolChoiceConfig::None => {
                let mut errs = Vec::new();
                let content = generate::extract_generated(self.protocol, text, original_tools, &self.parse_options, &mut |m| errs.push(m.to_string()));
                for message in &errs {
                    report(on_error, message);
                }
                let debug_summary = want_debug_summary.then(|| generate::debug_summary(self.protocol, text, original_tools, &content));
                Ok(GenerateResult { content, debug_summary })
            }
        }
    }

    /// `wrap_stream(do_stream, params)`: returns a transformed
    /// stream of [`StreamEvent`]s driven cooperatively by the host's chunk
    /// stream (only inside the host's delta
    /// iterator).
    pub fn wrap_stream<S>(
        &self,
        chunks: S,
        original_tools: Vec<ToolDescriptor>,
        tool_choice: ToolChoiceConfig,
        on_error: OnError,
    ) -> Pin<Box<dyn Stream<Item = StreamEvent> + Send>>
    where
        S: Stream<Item = String> + Send + 'static,
    {
        match tool_choice {
            ToolChoiceConfig::Required | ToolChoiceConfig::Tool { .. } => {
                Box::pin(forced_stream(chunks, original_tools, tool_choice, on_error))
            }
            ToolChoiceConfig::Auto | ToolChoiceConfig::None => {
                Box::pin(protocol_stream(self.protocol, chunks, original_tools, on_error))
            }
        }
    }
}

/// Drives one protocol's [`StreamExtractor`] over the host's chunk stream,
/// flattening each chunk's implied events into the output stream and
/// running finalisation once the host's iterator is exhausted.
fn protocol_stream<S>(protocol: Protocol, chunks: S, tools: Vec<ToolDescriptor>, on_error: OnError) -> impl Stream<Item = StreamEvent>
where
    S: Stream<Item = String> + Send + 'static,
{
    struct State<S> {
        inner: Pin<Box<S>>,
        extractor: StreamExtractor,
        on_error: OnError,
        pending: VecDeque<StreamEvent>,
        exhausted: bool,
    }

    let state = State {
        inner: Box::pin(chunks),
        extractor: StreamExtractor::new(protocol, tools),
        on_error,
        pending: VecDeque::new(),
        exhausted: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.exhausted {
                return None;
            }
            match state.inner.next().await {
                Some(chunk) => {
                    let events = state.extractor.process_chunk(&chunk, &mut |m| report(&state.on_error, m));
                    state.pending.extend(events);
                }
                None => {
                    state.exhausted = true;
                    let events = state.extractor.finalize(&mut |m| report(&state.on_error, m));
                    state.pending.extend(events);
                }
            }
        }
    })
}

/// Accumulates the host's chunk stream verbatim under a forced tool-choice
///: the provider is in JSON-object response mode, so every byte
/// belongs to the one call being built, never to ordinary text.
fn forced_stream<S>(
    chunks: S,
    tools: Vec<ToolDescriptor>,
    tool_choice: ToolChoiceConfig,
    on_error: OnError,
) -> impl Stream<Item = StreamEvent>
where
    S: Stream<Item = String> + Send + 'static,
{
    struct State<S> {
        inner: Pin<Box<S>>,
        buffer: String,
        call_id: Option<String>,
        tools: Vec<ToolDescriptor>,
        tool_choice: ToolChoiceConfig,
        on_error: OnError,
        pending: VecDeque<StreamEvent>,
        exhausted: bool,
    }

    let state = State {
        inner: Box::pin(chunks),
        buffer: String::new(),
        call_id: None,
        tools,
        tool_choice,
        on_error,
        pending: VecDeque::new(),
        exhausted: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.exhausted {
                return None;
            }
            match state.inner.next().await {
                Some(chunk) => {
                    if state.call_id.is_none() {
                        let id = next_call_id();
                        let tool_name = match &state.tool_choice {
                            ToolChoiceConfig::Tool { tool_name } => tool_name.clone(),
                            _ => String::new(),
                        };
                        state.pending.push_back(StreamEvent::ToolInputStart { id: id.clone(), tool_name });
                        state.call_id = Some(id);
                    }
                    let id = state.call_id.clone().expect("set above");
                    state.buffer.push_str(&chunk);
                    state.pending.push_back(StreamEvent::ToolInputDelta { id, delta: chunk });
                }
                None => {
                    state.exhausted = true;
                    if let Some(id) = state.call_id.take() {
                        state.pending.push_back(StreamEvent::ToolInputEnd { id: id.clone() });
                        match tool_choice::parse_forced_response(&state.buffer, &state.tool_choice, &state.tools) {
                            Ok(call) => {
                                state.pending.push_back(StreamEvent::ToolCall {
                                    tool_call_id: call.tool_call_id,
                                    tool_name: call.tool_name,
                                    input: call.input,
                                });
                                state.pending.push_back(StreamEvent::Finish { reason: FinishReason::ToolCalls });
                            }
                            Err(err) => {
                                let message = format!("forced tool-choice stream did not parse: {err}");
                                report(&state.on_error, &message);
                                state.pending.push_back(StreamEvent::Error { error: message });
                                state.pending.push_back(StreamEvent::Finish { reason: FinishReason::Stop });
                            }
                        }
                    } else {
                        state.pending.push_back(StreamEvent::Finish { reason: FinishReason::Stop });
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolCallMiddlewareOptions;
    use crate::types::{ContentPart, Role, ToolCall};
    use serde_json::json;

    fn tools() -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new(
            "get_weather",
            "weather lookup",
            json!({"type":"object","properties":{"city":{"type":"string"}}}),
        )]
    }

    #[test]
    fn transform_params_auto_has_no_forced_schema() {
        let mw = Middleware::create(Protocol::Hermes, "{{tools}}", Placement::Prepend);
        let mut errs = vec![];
        let result = mw
            .transform_params(&[Message::user("hi")], &tools(), &ToolChoiceConfig::Auto, &mut |m| errs.push(m.to_string()))
            .unwrap();
        assert!(result.forced_response_schema.is_none());
    }

    #[test]
    fn transform_params_required_synthesises_schema() {
        let mw = Middleware::create(Protocol::Hermes, "{{tools}}", Placement::Prepend);
        let mut errs = vec![];
        let result = mw
            .transform_params(&[Message::user("hi")], &tools(), &ToolChoiceConfig::Required, &mut |m| errs.push(m.to_string()))
            .unwrap();
        assert!(result.forced_response_schema.is_some());
    }

    #[test]
    fn transform_params_none_is_fatal() {
        let mw = Middleware::create(Protocol::Hermes, "{{tools}}", Placement::Prepend);
        let mut errs = vec![];
        let result = mw.transform_params(&[], &tools(), &ToolChoiceConfig::None, &mut |m| errs.push(m.to_string()));
        assert!(matches!(result, Err(Error::NoneToolChoice)));
    }

    #[test]
    fn wrap_generate_auto_parses_hermes_text() {
        let mw = Middleware::create(Protocol::Hermes, "{{tools}}", Placement::Prepend);
        let text = r#"<tool_call>{"name":"get_weather","arguments":{"city":"Seoul"}}</tool_call>"#;
        let result = mw.wrap_generate(text, &tools(), &ToolChoiceConfig::Auto, true, &None).unwrap();
        assert!(matches!(result.content[0], ContentPart::ToolCall { .. }));
        assert!(result.debug_summary.is_some());
    }

    #[test]
    fn wrap_generate_required_parses_json_object_mode() {
        let mw = Middleware::create(Protocol::Hermes, "{{tools}}", Placement::Prepend);
        let text = r#"{"name":"get_weather","arguments":{"city":"Seoul"}}"#;
        let result = mw.wrap_generate(text, &tools(), &ToolChoiceConfig::Required, false, &None).unwrap();
        assert_eq!(result.content.len(), 1);
        match &result.content[0] {
            ContentPart::ToolCall { tool_name, .. } => assert_eq!(tool_name, "get_weather"),
            _ => panic!("expected ToolCall"),
        }
    }

    #[tokio::test]
    async fn wrap_stream_auto_reassembles_hermes_call_across_chunks() {
        let mw = Middleware::create(Protocol::Hermes, "{{tools}}", Placement::Prepend);
        let chunks = vec![
            "before ".to_string(),
            "<tool_call>{\"name\":\"get_".to_string(),
            "weather\",\"arguments\":{\"city\":\"Seoul\"}}</tool_call>".to_string(),
            " after".to_string(),
        ];
        let stream = mw.wrap_stream(futures::stream::iter(chunks), tools(), ToolChoiceConfig::Auto, None);
        let events: Vec<StreamEvent> = stream.collect().await;

        assert!(events.iter().any(|e| matches!(e, StreamEvent::ToolInputStart { .. })));
        assert!(events.iter().any(|e| matches!(e, StreamEvent::ToolCall { tool_name, .. } if tool_name == "get_weather")));
        assert!(matches!(events.last(), Some(StreamEvent::Finish { reason: FinishReason::Stop })));
    }

    #[tokio::test]
    async fn wrap_stream_required_emits_one_forced_call() {
        let chunks = vec![
            r#"{"name":"get_weather","#.to_string(),
            r#""arguments":{"city":"Seoul"}}"#.to_string(),
        ];
        let mw = Middleware::create(Protocol::Hermes, "{{tools}}", Placement::Prepend);
        let stream = mw.wrap_stream(futures::stream::iter(chunks), tools(), ToolChoiceConfig::Required, None);
        let events: Vec<StreamEvent> = stream.collect().await;

        let starts = events.iter().filter(|e| matches!(e, StreamEvent::ToolInputStart { .. })).count();
        assert_eq!(starts, 1);
        assert!(matches!(events.last(), Some(StreamEvent::Finish { reason: FinishReason::ToolCalls })));
        assert!(events.iter().any(|e| matches!(e, StreamEvent::ToolCall { tool_name, .. } if tool_name == "get_weather")));
    }

    #[test]
    fn on_error_options_wire_into_middleware_options() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let mw = Middleware::create(Protocol::Hermes, "{{tools}}", Placement::Prepend);
        let seen = Arc::new(AtomicBool::new(false));
        let seen2 = seen.clone();
        let options = ToolCallMiddlewareOptions::new().on_error(move |_| seen2.store(true, Ordering::SeqCst));

        // Malformed JSON inside the tag triggers the recoverable path.
        let text = "<tool_call>not json</tool_call>";
        let result = mw.wrap_generate(text, &tools(), &ToolChoiceConfig::Auto, false, &options.on_error).unwrap();
        assert!(result.content.iter().any(|p| matches!(p, ContentPart::Text { .. })));
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn tool_call_round_trip_through_transform_and_format() {
        let call = ToolCall::new("call_1", "get_weather", r#"{"city":"Seoul"}"#);
        let messages = vec![Message::assistant(vec![ContentPart::tool_call(call)])];
        let mw = Middleware::create(Protocol::Hermes, "{{tools}}", Placement::Prepend);
        let mut errs = vec![];
        let result = mw.transform_params(&messages, &tools(), &ToolChoiceConfig::Auto, &mut |m| errs.push(m.to_string())).unwrap();
        let assistant = result.messages.iter().find(|m| m.role == Role::Assistant).unwrap();
        assert!(assistant.content[0].as_text().unwrap().contains("get_weather"));
    }
}
