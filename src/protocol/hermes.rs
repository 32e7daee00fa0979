//! Hermes protocol: `<tool_call>{"name":...,"arguments":{...}}</tool_call>`.

use super::{find_tool, locate_json_object, render_denied, tool_result_content_json, tool_result_denial_reason};
use super::{Phase, StreamState};
use crate::buffer::earliest_index;
use crate::coerce::coerce;
use crate::ids::next_call_id;
use crate::types::{ContentPart, FinishReason, StreamEvent, ToolCall, ToolDescriptor, ToolResultOutput};

const OPEN: &str = "<tool_call>";
const CLOSE: &str = "</tool_call>";

pub fn format_tools(tools: &[ToolDescriptor]) -> String {
    let mut out = String::from("You have access to the following tools. To call a tool, respond with:\n<tool_call>\n{\"name\": <tool name>, \"arguments\": <args as JSON object>}\n</tool_call>\n\nAvailable tools:\n");
    for tool in tools {
        out.push_str(&format!(
            "- {}: {}\n  parameters: {}\n",
            tool.name,
            tool.description.as_deref().unwrap_or(""),
            tool.input_schema
        ));
    }
    out
}

pub fn format_tool_call(call: &ToolCall) -> String {
    let args: serde_json::Value = serde_json::from_str(&call.input).unwrap_or(serde_json::Value::Null);
    let payload = serde_json::json!({"name": call.tool_name, "arguments": args});
    format!("{OPEN}{payload}{CLOSE}")
}

pub fn format_tool_response(tool_name: &str, output: &ToolResultOutput) -> String {
    if let Some(reason) = tool_result_denial_reason(output) {
        return render_denied(reason);
    }
    let payload = serde_json::json!({"name": tool_name, "content": tool_result_content_json(output)});
    format!("<tool_response>{payload}</tool_response>")
}

pub fn extract_tool_call_segments(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut pos = 0;
    while let Some(open_rel) = text[pos..].find(OPEN) {
        let open_abs = pos + open_rel;
        let body_start = open_abs + OPEN.len();
        match text[body_start..].find(CLOSE) {
            Some(close_rel) => {
                let close_abs = body_start + close_rel;
                segments.push(text[open_abs..close_abs + CLOSE.len()].to_string());
                pos = close_abs + CLOSE.len();
            }
            None => break,
        }
    }
    segments
}

pub fn parse_generated_text(text: &str, tools: &[ToolDescriptor], on_error: &mut dyn FnMut(&str)) -> Vec<ContentPart> {
    let mut parts = Vec::new();
    let mut pos = 0;

    loop {
        let Some(open_rel) = text[pos..].find(OPEN) else {
            if pos < text.len() {
                parts.push(ContentPart::text(&text[pos..]));
            }
            break;
        };
        let open_abs = pos + open_rel;
        if open_abs > pos {
            parts.push(ContentPart::text(&text[pos..open_abs]));
        }

        let body_start = open_abs + OPEN.len();
        let Some(close_rel) = text[body_start..].find(CLOSE) else {
            // Unterminated: try JSON recovery over the remaining text, per
            // the generate-side extractor's fallback.
            if let Some(call) = recover_json_call(&text[open_abs..], tools) {
                log::debug!("recovered tool call {} from an unterminated tool_call region", call.tool_name);
                parts.push(ContentPart::tool_call(call));
            } else {
                log::warn!("unterminated tool_call region at byte {open_abs} had no recoverable JSON object");
                on_error("hermes: unterminated tool_call region, no recoverable JSON object found");
                parts.push(ContentPart::text(&text[open_abs..]));
            }
            return parts;
        };
        let close_abs = body_start + close_rel;
        let body = &text[body_start..close_abs];

        match parse_call_body(body, tools) {
            Some(call) => parts.push(ContentPart::tool_call(call)),
            None => {
                on_error("hermes: malformed JSON inside tool_call region");
                parts.push(ContentPart::text(&text[open_abs..close_abs + CLOSE.len()]));
            }
        }
        pos = close_abs + CLOSE.len();
    }

    parts
}

fn parse_call_body(body: &str, tools: &[ToolDescriptor]) -> Option<ToolCall> {
    let (start, end) = locate_json_object(body, 0)?;
    let value: serde_json::Value = serde_json::from_str(&body[start..end]).ok()?;
    build_call(&value, tools)
}

fn recover_json_call(text: &str, tools: &[ToolDescriptor]) -> Option<ToolCall> {
    let mut from = 0;
    while let Some((start, end)) = locate_json_object(text, from) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text[start..end]) {
            if let Some(call) = build_call(&value, tools) {
                return Some(call);
            }
        }
        from = end;
    }
    None
}

fn build_call(value: &serde_json::Value, tools: &[ToolDescriptor]) -> Option<ToolCall> {
    let name = value.get("name")?.as_str()?.to_string();
    if find_tool(tools, &name).is_none() {
        return None;
    }
    let raw_args = value.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));
    let schema = find_tool(tools, &name).map(|t| &t.input_schema).cloned().unwrap_or(serde_json::Value::Null);
    let coerced = coerce(&raw_args, &schema);
    Some(ToolCall::new(next_call_id(), name, coerced.to_string()))
}

pub fn parse_stream_chunk(
    state: &mut StreamState,
    chunk: &str,
    tools: &[ToolDescriptor],
    on_error: &mut dyn FnMut(&str),
) -> Vec<StreamEvent> {
    state.buffer.push_str(chunk);
    let mut events = Vec::new();

    loop {
        match state.phase {
            Phase::Outside => {
                match earliest_index(state.buffer.as_bytes(), OPEN.as_bytes()) {
                    None => {
                        if !state.buffer.is_empty() {
                            events.push(StreamEvent::TextDelta { id: "text".into(), delta: std::mem::take(&mut state.buffer) });
                        }
                        break;
                    }
                    Some(idx) => {
                        let is_full_match = state.buffer[idx..].as_bytes().len() >= OPEN.len()
                            && &state.buffer[idx..idx + OPEN.len()] == OPEN;
                        if !is_full_match {
                            if idx > 0 {
                                let flushed = state.buffer[..idx].to_string();
                                events.push(StreamEvent::TextDelta { id: "text".into(), delta: flushed });
                            }
                            state.buffer = state.buffer[idx..].to_string();
                            break;
                        }
                        if idx > 0 {
                            let flushed = state.buffer[..idx].to_string();
                            events.push(StreamEvent::TextDelta { id: "text".into(), delta: flushed });
                        }
                        state.buffer = state.buffer[idx + OPEN.len()..].to_string();
                        let id = next_call_id();
                        state.current_call = Some(super::PartialCall {
                            id,
                            tool_name: None,
                            args_buffer: String::new(),
                            started: false,
                        });
                        state.phase = Phase::InsideToolCall;
                    }
                }
            }
            Phase::InsideToolCall => {
                match earliest_index(state.buffer.as_bytes(), CLOSE.as_bytes()) {
                    None => {
                        let delta = std::mem::take(&mut state.buffer);
                        let call = state.current_call.as_mut().expect("phase invariant");
                        emit_start_if_needed(call, &mut events, &delta, tools);
                        call.args_buffer.push_str(&delta);
                        if call.started {
                            events.push(StreamEvent::ToolInputDelta { id: call.id.clone(), delta });
                        }
                        break;
                    }
                    Some(idx) => {
                        let is_full_match = state.buffer[idx..].len() >= CLOSE.len()
                            && &state.buffer[idx..idx + CLOSE.len()] == CLOSE;
                        if !is_full_match {
                            let delta = state.buffer[..idx].to_string();
                            state.buffer = state.buffer[idx..].to_string();
                            let call = state.current_call.as_mut().expect("phase invariant");
                            emit_start_if_needed(call, &mut events, &delta, tools);
                            call.args_buffer.push_str(&delta);
                            if call.started {
                                events.push(StreamEvent::ToolInputDelta { id: call.id.clone(), delta });
                            }
                            break;
                        }

                        let delta = state.buffer[..idx].to_string();
                        let mut call = state.current_call.take().expect("phase invariant");
                        emit_start_if_needed(&mut call, &mut events, &delta, tools);
                        call.args_buffer.push_str(&delta);
                        if call.started && !delta.is_empty() {
                            events.push(StreamEvent::ToolInputDelta { id: call.id.clone(), delta });
                        }

                        state.buffer = state.buffer[idx + CLOSE.len()..].to_string();

                        let value: serde_json::Value = serde_json::from_str(&call.args_buffer).unwrap_or(serde_json::Value::Null);
                        let (tool_name, schema) = match value.get("name").and_then(|v| v.as_str()) {
                            Some(name) => (name.to_string(), find_tool(tools, name).map(|t| t.input_schema.clone()).unwrap_or(serde_json::Value::Null)),
                            None => {
                                on_error("hermes: streamed tool_call closed without a resolvable name");
                                (call.tool_name.clone().unwrap_or_default(), serde_json::Value::Null)
                            }
                        };
                        let raw_args = value.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));
                        let coerced = coerce(&raw_args, &schema);

                        events.push(StreamEvent::ToolInputEnd { id: call.id.clone() });
                        events.push(StreamEvent::ToolCall {
                            tool_call_id: call.id,
                            tool_name,
                            input: coerced.to_string(),
                        });

                        state.phase = Phase::Outside;
                    }
                }
            }
        }
    }

    events
}

/// Hermes's call name isn't known until the whole JSON body parses. Waiting
/// for it would mean retaining bytes silently for effectively the whole
/// body, so instead we emit `ToolInputStart` with a placeholder name up
/// front once any byte has entered the call region, and accept that the
/// name becomes authoritative only in the trailing `ToolCall` event;
/// deferring indefinitely would mean never emitting `ToolInputDelta` at
/// all, breaking delta-concatenation-equals-final-input for any genuinely
/// streamed Hermes call.
fn emit_start_if_needed(call: &mut super::PartialCall, events: &mut Vec<StreamEvent>, delta: &str, _tools: &[ToolDescriptor]) {
    if !call.started && !delta.is_empty() {
        call.started = true;
        call.tool_name = Some(String::new());
        events.push(StreamEvent::ToolInputStart { id: call.id.clone(), tool_name: String::new() });
    }
}
