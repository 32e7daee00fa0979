//! morph XML protocol: `<toolName><key>value</key>…</toolName>`, self-closing
//! for no-argument calls.

use std::collections::HashMap;

use super::{render_denied, scan_element, tool_result_content_json, tool_result_denial_reason};
use super::{DuplicateTagPolicy, ParseOptions, Phase, StreamState, XmlElement};
use crate::buffer::earliest_index;
use crate::coerce::coerce;
use crate::ids::next_call_id;
use crate::types::{ContentPart, StreamEvent, ToolCall, ToolDescriptor, ToolResultOutput};
use serde_json::{Map, Value};

pub fn format_tools(tools: &[ToolDescriptor]) -> String {
    let mut out = String::from("You have access to the following tools. To call one, emit a single XML element named after the tool, with its arguments as child elements:\n<toolName><argName>value</argName></toolName>\nA tool with no arguments may be self-closing: <toolName/>\n\nAvailable tools:\n");
    for tool in tools {
        out.push_str(&format!("- {}: {}\n  parameters: {}\n", tool.name, tool.description.as_deref().unwrap_or(""), tool.input_schema));
    }
    out
}

pub fn format_tool_call(call: &ToolCall) -> String {
    let args: Value = serde_json::from_str(&call.input).unwrap_or(Value::Null);
    render_element(&call.tool_name, &args)
}

fn render_element(tag: &str, value: &Value) -> String {
    match value {
        Value::Object(obj) if obj.is_empty() => format!("<{tag}/>"),
        Value::Object(obj) => {
            let mut body = String::new();
            for (key, v) in obj {
                body.push_str(&render_child(key, v));
            }
            format!("<{tag}>{body}</{tag}>")
        }
        Value::Null => format!("<{tag}/>"),
        Value::Array(items) => {
            let mut body = String::new();
            for item in items {
                body.push_str(&render_element(tag, item));
            }
            body
        }
        Value::Bool(b) => format!("<{tag}>{b}</{tag}>"),
        Value::Number(n) => format!("<{tag}>{n}</{tag}>"),
        Value::String(s) => format!("<{tag}>{s}</{tag}>"),
    }
}

fn render_child(key: &str, value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(|item| render_element(key, item)).collect(),
        other => render_element(key, other),
    }
}

pub fn format_tool_response(tool_name: &str, output: &ToolResultOutput) -> String {
    if let Some(reason) = tool_result_denial_reason(output) {
        return render_denied(reason);
    }
    let content = tool_result_content_json(output);
    let tag = format!("{tool_name}-result");
    render_element(&tag, &content)
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

pub fn parse_generated_text(
    text: &str,
    tools: &[ToolDescriptor],
    options: &ParseOptions,
    on_error: &mut dyn FnMut(&str),
) -> Vec<ContentPart> {
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
                let raw = element_to_raw(&el, options, on_error);
                let coerced = coerce(&raw, &tool.input_schema);
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

fn element_to_raw(element: &XmlElement, options: &ParseOptions, on_error: &mut dyn FnMut(&str)) -> Value {
    if element.self_closing {
        return Value::Object(Map::new());
    }
    if element.children.is_empty() {
        return Value::String(element.text.trim().to_string());
    }

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&XmlElement>> = HashMap::new();
    for child in &element.children {
        groups.entry(child.name.clone()).or_insert_with(|| {
            order.push(child.name.clone());
            Vec::new()
        }).push(child);
    }

    let mut obj = Map::new();
    for name in order {
        let group = &groups[&name];
        if group.len() == 1 {
            obj.insert(name, element_to_raw(group[0], options, on_error));
        } else {
            if options.duplicate_tag_policy == DuplicateTagPolicy::Strict {
                on_error(&format!("morph-xml: duplicate <{name}> tags at the same nesting level"));
            }
            let items: Vec<Value> = group.iter().map(|child| element_to_raw(child, options, on_error)).collect();
            obj.insert(name, Value::Array(items));
        }
    }
    Value::Object(obj)
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
                let markers: Vec<(String, String, bool)> = tools
                    .iter()
                    .map(|t| (format!("<{}>", t.name), t.name.clone(), false))
                    .chain(tools.iter().map(|t| (format!("<{}/>", t.name), t.name.clone(), true)))
                    .collect();

                match earliest_among(state.buffer.as_bytes(), &markers) {
                    None => {
                        if !state.buffer.is_empty() {
                            events.push(StreamEvent::TextDelta { id: "text".into(), delta: std::mem::take(&mut state.buffer) });
                        }
                        break;
                    }
                    Some((idx, tool_name, is_self_closing, full)) => {
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

                        if is_self_closing {
                            let marker = format!("<{tool_name}/>");
                            state.buffer = state.buffer[idx + marker.len()..].to_string();
                            let id = next_call_id();
                            events.push(StreamEvent::ToolInputStart { id: id.clone(), tool_name: tool_name.clone() });
                            events.push(StreamEvent::ToolInputEnd { id: id.clone() });
                            events.push(StreamEvent::ToolCall { tool_call_id: id, tool_name, input: "{}".to_string() });
                        } else {
                            let marker = format!("<{tool_name}>");
                            state.buffer = state.buffer[idx + marker.len()..].to_string();
                            let id = next_call_id();
                            events.push(StreamEvent::ToolInputStart { id: id.clone(), tool_name: tool_name.clone() });
                            state.current_call = Some(super::PartialCall { id, tool_name: Some(tool_name), args_buffer: String::new(), started: true });
                            state.phase = Phase::InsideToolCall;
                        }
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
                        // Re-parse the accumulated body as a one-off element to
                        // reuse the tolerant child scanner.
                        let wrapped = format!("<{tool_name}>{}</{tool_name}>", call.args_buffer);
                        let raw = match scan_element(&wrapped, 0) {
                            Some((el, _)) => element_to_raw(&el, &ParseOptions::default(), on_error),
                            None => Value::Object(Map::new()),
                        };
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

/// Picks the earliest marker match across every `(marker, tool_name,
/// is_self_closing)` candidate, breaking ties toward a full match over a
/// merely-partial one.
fn earliest_among(buf: &[u8], markers: &[(String, String, bool)]) -> Option<(usize, String, bool, bool)> {
    let mut best: Option<(usize, String, bool, bool)> = None;
    for (marker, tool_name, is_self_closing) in markers {
        if let Some(idx) = earliest_index(buf, marker.as_bytes()) {
            let full = buf.len() >= idx + marker.len() && &buf[idx..idx + marker.len()] == marker.as_bytes();
            let is_better = match &best {
                None => true,
                Some((best_idx, _, _, best_full)) => idx < *best_idx || (idx == *best_idx && full && !best_full),
            };
            if is_better {
                best = Some((idx, tool_name.clone(), *is_self_closing, full));
            }
        }
    }
    best
}
