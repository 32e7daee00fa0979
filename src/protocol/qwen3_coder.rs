//! Qwen3-Coder protocol: nested `<tool_call><function=NAME><parameter=KEY>
//! VALUE</parameter>…</function></tool_call>` XML.

use super::{find_tool, render_denied, tool_result_content_json, tool_result_denial_reason};
use super::{Phase, StreamState};
use crate::buffer::earliest_index;
use crate::coerce::coerce;
use crate::ids::next_call_id;
use crate::types::{ContentPart, StreamEvent, ToolCall, ToolDescriptor, ToolResultOutput};

const OPEN: &str = "<tool_call>";
const CLOSE: &str = "</tool_call>";

pub fn format_tools(tools: &[ToolDescriptor]) -> String {
    let mut out = String::from("You have access to the following tools. To call one, emit:\n<tool_call>\n<function=NAME>\n<parameter=KEY>VALUE</parameter>\n</function>\n</tool_call>\n\nAvailable tools:\n");
    for tool in tools {
        out.push_str(&format!("- {}: {}\n  parameters: {}\n", tool.name, tool.description.as_deref().unwrap_or(""), tool.input_schema));
    }
    out
}

pub fn format_tool_call(call: &ToolCall) -> String {
    let args: serde_json::Value = serde_json::from_str(&call.input).unwrap_or(serde_json::Value::Null);
    let mut body = format!("<function={}>", call.tool_name);
    if let Some(obj) = args.as_object() {
        for (key, value) in obj {
            body.push_str(&format!("<parameter={key}>{}</parameter>", render_value(value)));
        }
    }
    body.push_str("</function>");
    format!("{OPEN}{body}{CLOSE}")
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Bool(true) => "True".to_string(),
        serde_json::Value::Bool(false) => "False".to_string(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn format_tool_response(tool_name: &str, output: &ToolResultOutput) -> String {
    if let Some(reason) = tool_result_denial_reason(output) {
        return render_denied(reason);
    }
    let content = tool_result_content_json(output);
    format!("{OPEN}<function={tool_name}><parameter=output>{}</parameter></function>{CLOSE}", render_value(&content))
}

pub fn extract_tool_call_segments(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut pos = 0;
    while let Some(open_rel) = text[pos..].find(OPEN) {
        let open_abs = pos + open_rel;
        match text[open_abs + OPEN.len()..].find(CLOSE) {
            Some(close_rel) => {
                let close_abs = open_abs + OPEN.len() + close_rel + CLOSE.len();
                segments.push(text[open_abs..close_abs].to_string());
                pos = close_abs;
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
            on_error("qwen3-coder: unterminated tool_call region");
            parts.push(ContentPart::text(&text[open_abs..]));
            break;
        };
        let close_abs = body_start + close_rel;
        let body = &text[body_start..close_abs];

        let calls = parse_functions(body, tools, on_error);
        if calls.is_empty() {
            on_error("qwen3-coder: tool_call region contained no recognisable function blocks");
            parts.push(ContentPart::text(&text[open_abs..close_abs + CLOSE.len()]));
        } else {
            for call in calls {
                parts.push(ContentPart::tool_call(call));
            }
        }
        pos = close_abs + CLOSE.len();
    }

    parts
}

fn parse_functions(body: &str, tools: &[ToolDescriptor], on_error: &mut dyn FnMut(&str)) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut pos = 0;
    while let Some((name, _tag_start, tag_end)) = scan_attr_tag(body, pos, "function") {
        let close_marker = "</function>";
        let Some(close_rel) = body[tag_end..].find(close_marker) else {
            on_error("qwen3-coder: unterminated function block");
            break;
        };
        let close_abs = tag_end + close_rel;
        let params_body = &body[tag_end..close_abs];
        let schema = find_tool(tools, &name).map(|t| t.input_schema.clone()).unwrap_or(serde_json::Value::Null);
        let raw = parse_parameters(params_body, &schema);
        let coerced = coerce(&raw, &schema);
        calls.push(ToolCall::new(next_call_id(), name, coerced.to_string()));
        pos = close_abs + close_marker.len();
    }
    calls
}

fn parse_parameters(body: &str, schema: &serde_json::Value) -> serde_json::Value {
    let properties = schema.get("properties").and_then(|v| v.as_object());
    let mut obj = serde_json::Map::new();
    let mut pos = 0;
    while let Some((key, _tag_start, tag_end)) = scan_attr_tag(body, pos, "parameter") {
        let close_marker = "</parameter>";
        let Some(close_rel) = body[tag_end..].find(close_marker) else {
            break;
        };
        let close_abs = tag_end + close_rel;
        let raw_value = body[tag_end..close_abs].trim();

        let prop_type = properties.and_then(|p| p.get(&key)).and_then(|s| s.get("type")).and_then(|t| t.as_str());
        let value = match prop_type {
            Some("array") | Some("object") => {
                serde_json::from_str::<serde_json::Value>(raw_value).unwrap_or_else(|_| serde_json::Value::String(raw_value.to_string()))
            }
            _ => serde_json::Value::String(raw_value.to_string()),
        };
        obj.insert(key, value);
        pos = close_abs + close_marker.len();
    }
    serde_json::Value::Object(obj)
}

/// Scans an attribute-style tag of the form `<{tag}=NAME>` starting at or
/// after `from`. Returns the `NAME`, the tag's start offset, and the offset
/// just past its closing `>`.
fn scan_attr_tag(text: &str, from: usize, tag: &str) -> Option<(String, usize, usize)> {
    let marker = format!("<{tag}=");
    let rest = &text[from..];
    let start_rel = rest.find(&marker)?;
    let after_marker = from + start_rel + marker.len();
    let gt_rel = text[after_marker..].find('>')?;
    let name = text[after_marker..after_marker + gt_rel].to_string();
    Some((name, from + start_rel, after_marker + gt_rel + 1))
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
            Phase::Outside => match earliest_index(state.buffer.as_bytes(), OPEN.as_bytes()) {
                None => {
                    if !state.buffer.is_empty() {
                        events.push(StreamEvent::TextDelta { id: "text".into(), delta: std::mem::take(&mut state.buffer) });
                    }
                    break;
                }
                Some(idx) => {
                    let full = state.buffer[idx..].len() >= OPEN.len() && &state.buffer[idx..idx + OPEN.len()] == OPEN;
                    if !full {
                        if idx > 0 {
                            events.push(StreamEvent::TextDelta { id: "text".into(), delta: state.buffer[..idx].to_string() });
                        }
                        state.buffer = state.buffer[idx..].to_string();
                        break;
                    }
                    if idx > 0 {
                        events.push(StreamEvent::TextDelta { id: "text".into(), delta: state.buffer[..idx].to_string() });
                    }
                    state.buffer = state.buffer[idx + OPEN.len()..].to_string();
                    state.phase = Phase::InsideToolCall;
                    state.current_call = None; // tool_name resolved per function block below
                }
            },
            Phase::InsideToolCall => {
                const FUNCTION_CLOSE: &str = "</function>";

                // Defer ToolInputStart until `<function=NAME>` is fully visible.
                // A `tool_call` region may wrap more than one function block;
                // each becomes its own call in sequence.
                if state.current_call.is_none() {
                    match scan_attr_tag(&state.buffer, 0, "function") {
                        Some((name, _start, tag_end)) => {
                            let id = next_call_id();
                            events.push(StreamEvent::ToolInputStart { id: id.clone(), tool_name: name.clone() });
                            state.current_call = Some(super::PartialCall { id, tool_name: Some(name), args_buffer: String::new(), started: true });
                            state.buffer = state.buffer[tag_end..].to_string();
                            continue;
                        }
                        None => {
                            let full_close = state.buffer.len() >= CLOSE.len() && &state.buffer[..CLOSE.len()] == CLOSE;
                            if full_close {
                                state.buffer = state.buffer[CLOSE.len()..].to_string();
                                state.phase = Phase::Outside;
                                continue;
                            }
                            break; // wait for more bytes to resolve the function name or close marker
                        }
                    }
                }

                match earliest_index(state.buffer.as_bytes(), FUNCTION_CLOSE.as_bytes()) {
                    None => {
                        let delta = std::mem::take(&mut state.buffer);
                        let call = state.current_call.as_mut().expect("checked above");
                        call.args_buffer.push_str(&delta);
                        if !delta.is_empty() {
                            events.push(StreamEvent::ToolInputDelta { id: call.id.clone(), delta });
                        }
                        break;
                    }
                    Some(idx) => {
                        let full = state.buffer[idx..].len() >= FUNCTION_CLOSE.len()
                            && &state.buffer[idx..idx + FUNCTION_CLOSE.len()] == FUNCTION_CLOSE;
                        if !full {
                            let delta = state.buffer[..idx].to_string();
                            state.buffer = state.buffer[idx..].to_string();
                            let call = state.current_call.as_mut().expect("checked above");
                            call.args_buffer.push_str(&delta);
                            if !delta.is_empty() {
                                events.push(StreamEvent::ToolInputDelta { id: call.id.clone(), delta });
                            }
                            break;
                        }

                        let delta = state.buffer[..idx].to_string();
                        let mut call = state.current_call.take().expect("checked above");
                        call.args_buffer.push_str(&delta);
                        if !delta.is_empty() {
                            events.push(StreamEvent::ToolInputDelta { id: call.id.clone(), delta });
                        }

                        state.buffer = state.buffer[idx + FUNCTION_CLOSE.len()..].to_string();

                        let tool_name = call.tool_name.clone().unwrap_or_default();
                        let schema = find_tool(tools, &tool_name).map(|t| t.input_schema.clone()).unwrap_or(serde_json::Value::Null);
                        let raw = parse_parameters(&call.args_buffer, &schema);
                        let coerced = coerce(&raw, &schema);

                        events.push(StreamEvent::ToolInputEnd { id: call.id.clone() });
                        events.push(StreamEvent::ToolCall { tool_call_id: call.id, tool_name, input: coerced.to_string() });

                        // Stay InsideToolCall: loop back around to look for
                        // another `<function=...>` or the region's `</tool_call>`.
                    }
                }
            }
        }
    }

    let _ = on_error;
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new(
            "get_weather",
            "weather",
            serde_json::json!({"type":"object","properties":{"city":{"type":"string"},"days":{"type":"integer"}}}),
        )]
    }

    #[test]
    fn qwen3_two_parameter_scenario() {
        let text = "<tool_call><function=get_weather><parameter=city>Seoul</parameter><parameter=days>3</parameter></function></tool_call>";
        let mut errs = vec![];
        let parts = parse_generated_text(text, &tools(), &mut |m| errs.push(m.to_string()));
        assert_eq!(parts.len(), 1);
        match &parts[0] {
            ContentPart::ToolCall { tool_name, input, .. } => {
                assert_eq!(tool_name, "get_weather");
                let value: serde_json::Value = serde_json::from_str(input).unwrap();
                assert_eq!(value["city"], "Seoul");
                assert_eq!(value["days"], 3);
            }
            _ => panic!("expected ToolCall"),
        }
    }

    #[test]
    fn boolean_parameter_accepts_capitalised_literal() {
        let tools = vec![ToolDescriptor::new("toggle", "", serde_json::json!({"type":"object","properties":{"on":{"type":"boolean"}}}))];
        let text = "<tool_call><function=toggle><parameter=on>True</parameter></function></tool_call>";
        let mut errs = vec![];
        let parts = parse_generated_text(text, &tools, &mut |m| errs.push(m.to_string()));
        match &parts[0] {
            ContentPart::ToolCall { input, .. } => assert_eq!(serde_json::from_str::<serde_json::Value>(input).unwrap()["on"], true),
            _ => panic!("expected ToolCall"),
        }
    }

    #[test]
    fn format_tool_call_renders_booleans_capitalised() {
        let call = ToolCall::new("call_1", "toggle", r#"{"on":true}"#);
        let rendered = format_tool_call(&call);
        assert!(rendered.contains("<parameter=on>True</parameter>"));
    }

    #[test]
    fn single_byte_chunking_does_not_panic_and_matches_whole_chunk_feed() {
        use super::super::StreamState;

        let text = "<tool_call><function=get_weather><parameter=city>Seoul</parameter></function></tool_call>";
        let tools = tools();

        let mut whole_state = StreamState::new();
        let mut errs = vec![];
        let whole_events = parse_stream_chunk(&mut whole_state, text, &tools, &mut |m| errs.push(m.to_string()));

        let mut chunked_state = StreamState::new();
        let mut chunked_events = Vec::new();
        for ch in text.chars() {
            chunked_events.extend(parse_stream_chunk(&mut chunked_state, &ch.to_string(), &tools, &mut |m| errs.push(m.to_string())));
        }

        let reassemble = |events: &[StreamEvent]| -> String {
            let mut out = String::new();
            for e in events {
                match e {
                    StreamEvent::TextDelta { delta, .. } => out.push_str(delta),
                    StreamEvent::ToolCall { tool_name, input, .. } => out.push_str(&format!("[{tool_name}:{input}]")),
                    _ => {}
                }
            }
            out
        };

        assert_eq!(reassemble(&whole_events), reassemble(&chunked_events));
        assert!(chunked_events.iter().any(|e| matches!(e, StreamEvent::ToolCall { tool_name, .. } if tool_name == "get_weather")));
    }
}
