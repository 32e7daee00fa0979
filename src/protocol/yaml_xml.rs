//! YAML-in-XML protocol: `<toolName>\nkey: value\n</toolName>`.

use super::{render_denied, scan_element, tool_result_content_json, tool_result_denial_reason, yaml_to_json};
use super::{Phase, StreamState};
use crate::buffer::earliest_index;
use crate::coerce::coerce;
use crate::ids::next_call_id;
use crate::types::{ContentPart, StreamEvent, ToolCall, ToolDescriptor, ToolResultOutput};
use serde_json::Value;

pub fn format_tools(tools: &[ToolDescriptor]) -> String {
    let mut out = String::from("You have access to the following tools. To call one, emit a single XML element named after the tool, with its arguments as a YAML document in the body:\n<toolName>\narg: value\n</toolName>\n\nAvailable tools:\n");
    for tool in tools {
        out.push_str(&format!("- {}: {}\n  parameters: {}\n", tool.name, tool.description.as_deref().unwrap_or(""), tool.input_schema));
    }
    out
}

pub fn format_tool_call(call: &ToolCall) -> String {
    let args: Value = serde_json::from_str(&call.input).unwrap_or(Value::Null);
    let yaml = serde_yaml::to_string(&args).unwrap_or_default();
    format!("<{}>\n{yaml}</{}>", call.tool_name, call.tool_name)
}

pub fn format_tool_response(tool_name: &str, output: &ToolResultOutput) -> String {
    if let Some(reason) = tool_result_denial_reason(output) {
        return render_denied(reason);
    }
    let content = tool_result_content_json(output);
    let yaml = serde_yaml::to_string(&content).unwrap_or_default();
    let tag = format!("{tool_name}-result");
    format!("<{tag}>\n{yaml}</{tag}>")
}

pub fn extract_tool_call_segments(text: &str, tools: &[ToolDescriptor]) -> Vec<String> {
    let mut segments = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let Some(rel) = text[pos..].find('<') else { break };
        let abs = pos + rel;
        match scan_element(text, abs) {
            Some((el, end)) if tools.iter().any(|t| t.name == el.name) => {
                segments.push(text[abs..end].to_string());
                pos = end;
            }
            _ => pos = abs + 1,
        }
    }
    segments
}

pub fn parse_generated_text(text: &str, tools: &[ToolDescriptor], on_error: &mut dyn FnMut(&str)) -> Vec<ContentPart> {
    let mut parts = Vec::new();
    let mut text_acc = String::new();
    let mut pos = 0;

    while pos < text.len() {
        let Some(rel) = text[pos..].find('<') else {
            text_acc.push_str(&text[pos..]);
            break;
        };
        let abs = pos + rel;
        text_acc.push_str(&text[pos..abs]);

        match scan_element(text, abs) {
            Some((el, end)) if tools.iter().any(|t| t.name == el.name) => {
                if !text_acc.is_empty() {
                    parts.push(ContentPart::text(std::mem::take(&mut text_acc)));
                }
                let tool = tools.iter().find(|t| t.name == el.name).expect("checked above");
                let raw = if el.self_closing { Value::Object(Default::default()) } else { yaml_to_json(&el.text) };
                let coerced = coerce(&raw, &tool.input_schema);
                if !raw.is_object() && !coerced.is_object() {
                    on_error("yaml-xml: tool-call body did not parse as a YAML mapping");
                }
                parts.push(ContentPart::tool_call(ToolCall::new(next_call_id(), el.name, coerced.to_string())));
                pos = end;
            }
            _ => {
                text_acc.push('<');
                pos = abs + 1;
            }
        }
    }

    if !text_acc.is_empty() {
        parts.push(ContentPart::text(text_acc));
    }

    parts
}

pub fn parse_stream_chunk(
    state: &mut StreamState,
    chunk: &str,
    tools: &[ToolDescriptor],
    _on_error: &mut dyn FnMut(&str),
) -> Vec<StreamEvent> {
    state.buffer.push_str(chunk);
    let mut events = Vec::new();

    loop {
        match state.phase {
            Phase::Outside => {
                let markers: Vec<String> = tools.iter().map(|t| format!("<{}>", t.name)).collect();
                match earliest_among(state.buffer.as_bytes(), &markers) {
                    None => {
                        if !state.buffer.is_empty() {
                            events.push(StreamEvent::TextDelta { id: "text".into(), delta: std::mem::take(&mut state.buffer) });
                        }
                        break;
                    }
                    Some((idx, marker_i, full)) => {
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
                        let tool_name = tools[marker_i].name.clone();
                        let marker = &markers[marker_i];
                        state.buffer = state.buffer[idx + marker.len()..].to_string();
                        let id = next_call_id();
                        events.push(StreamEvent::ToolInputStart { id: id.clone(), tool_name: tool_name.clone() });
                        state.current_call = Some(super::PartialCall { id, tool_name: Some(tool_name), args_buffer: String::new(), started: true });
                        state.phase = Phase::InsideToolCall;
                    }
                }
            }
            Phase::InsideToolCall => {
                let call = state.current_call.as_ref().expect("phase invariant");
                let close_marker = format!("</{}>", call.tool_name.as_deref().unwrap_or_default());

                match earliest_index(state.buffer.as_bytes(), close_marker.as_bytes()) {
                    None => {
                        let delta = std::mem::take(&mut state.buffer);
                        let call = state.current_call.as_mut().expect("phase invariant");
                        call.args_buffer.push_str(&delta);
                        if !delta.is_empty() {
                            events.push(StreamEvent::ToolInputDelta { id: call.id.clone(), delta });
                        }
                        break;
                    }
                    Some(idx) => {
                        let full = state.buffer[idx..].len() >= close_marker.len()
                            && &state.buffer[idx..idx + close_marker.len()] == close_marker;
                        if !full {
                            let delta = state.buffer[..idx].to_string();
                            state.buffer = state.buffer[idx..].to_string();
                            let call = state.current_call.as_mut().expect("phase invariant");
                            call.args_buffer.push_str(&delta);
                            if !delta.is_empty() {
                                events.push(StreamEvent::ToolInputDelta { id: call.id.clone(), delta });
                            }
                            break;
                        }

                        let delta = state.buffer[..idx].to_string();
                        let mut call = state.current_call.take().expect("phase invariant");
                        call.args_buffer.push_str(&delta);
                        if !delta.is_empty() {
                            events.push(StreamEvent::ToolInputDelta { id: call.id.clone(), delta });
                        }

                        state.buffer = state.buffer[idx + close_marker.len()..].to_string();

                        let tool_name = call.tool_name.clone().unwrap_or_default();
                        let schema = tools.iter().find(|t| t.name == tool_name).map(|t| t.input_schema.clone()).unwrap_or(Value::Null);
                        let raw = yaml_to_json(&call.args_buffer);
                        let coerced = coerce(&raw, &schema);

                        events.push(StreamEvent::ToolInputEnd { id: call.id.clone() });
                        events.push(StreamEvent::ToolCall { tool_call_id: call.id, tool_name, input: coerced.to_string() });

                        state.phase = Phase::Outside;
                    }
                }
            }
        }
    }

    events
}

fn earliest_among(buf: &[u8], markers: &[String]) -> Option<(usize, usize, bool)> {
    let mut best: Option<(usize, usize, bool)> = None;
    for (i, marker) in markers.iter().enumerate() {
        if let Some(idx) = earliest_index(buf, marker.as_bytes()) {
            let full = buf.len() >= idx + marker.len() && &buf[idx..idx + marker.len()] == marker.as_bytes();
            let is_better = match &best {
                None => true,
                Some((best_idx, _, best_full)) => idx < *best_idx || (idx == *best_idx && full && !best_full),
            };
            if is_better {
                best = Some((idx, i, full));
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new("get_weather", "weather", serde_json::json!({"type":"object","properties":{"city":{"type":"string"},"days":{"type":"integer"}}}))]
    }

    #[test]
    fn yaml_mapping_body_becomes_arguments() {
        let text = "<get_weather>\ncity: Seoul\ndays: 3\n</get_weather>";
        let mut errs = vec![];
        let parts = parse_generated_text(text, &tools(), &mut |m| errs.push(m.to_string()));
        match &parts[0] {
            ContentPart::ToolCall { input, .. } => {
                let value: Value = serde_json::from_str(input).unwrap();
                assert_eq!(value["city"], "Seoul");
                assert_eq!(value["days"], 3);
            }
            _ => panic!("expected ToolCall"),
        }
    }

    #[test]
    fn round_trips_through_format_tool_call() {
        let call = ToolCall::new("call_1", "get_weather", r#"{"city":"Seoul"}"#);
        let rendered = format_tool_call(&call);
        let mut errs = vec![];
        let parts = parse_generated_text(&rendered, &tools(), &mut |m| errs.push(m.to_string()));
        match &parts[0] {
            ContentPart::ToolCall { input, .. } => assert_eq!(input, r#"{"city":"Seoul"}"#),
            _ => panic!("expected ToolCall, got {parts:?}"),
        }
    }
}
