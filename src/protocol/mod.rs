//! Format parsers — the pluggable protocol layer.
//!
//! One variant per textual convention, dispatched through a tagged union
//! rather than a trait object, since the set of protocols is closed and
//! fixed at construction time — protocols are never auto-detected.

mod hermes;
mod morph_xml;
mod qwen3_coder;
mod yaml_xml;

use crate::types::{ContentPart, StreamEvent, ToolCall, ToolDescriptor, ToolResultOutput};

/// Caller-supplied knobs that affect parsing but aren't part of the grammar
/// itself.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// How to resolve duplicate sibling tags at the same XML nesting level
    /// (morph XML and YAML-in-XML scaffolding). Hermes and Qwen3-Coder don't
    /// consult this since their grammars don't nest repeated leaf tags the
    /// same way.
    pub duplicate_tag_policy: DuplicateTagPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateTagPolicy {
    #[default]
    FirstWins,
    Strict,
}

/// One textual tool-call convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Hermes,
    Qwen3Coder,
    MorphXml,
    YamlXml,
}

impl Protocol {
    /// Renders the tools-system text block substituted into `system_template`
    /// at its `{{tools}}` placeholder.
    pub fn format_tools(&self, tools: &[ToolDescriptor], system_template: &str) -> String {
        let rendered = match self {
            Protocol::Hermes => hermes::format_tools(tools),
            Protocol::Qwen3Coder => qwen3_coder::format_tools(tools),
            Protocol::MorphXml => morph_xml::format_tools(tools),
            Protocol::YamlXml => yaml_xml::format_tools(tools),
        };
        system_template.replace("{{tools}}", &rendered)
    }

    /// Assistant-side textual serialisation of one call, used when rewriting
    /// conversation history.
    pub fn format_tool_call(&self, call: &ToolCall) -> String {
        match self {
            Protocol::Hermes => hermes::format_tool_call(call),
            Protocol::Qwen3Coder => qwen3_coder::format_tool_call(call),
            Protocol::MorphXml => morph_xml::format_tool_call(call),
            Protocol::YamlXml => yaml_xml::format_tool_call(call),
        }
    }

    /// User-facing textual rendering of a tool result, used when rewriting a
    /// `tool` message into `user` text.
    pub fn format_tool_response(&self, tool_name: &str, output: &ToolResultOutput) -> String {
        match self {
            Protocol::Hermes => hermes::format_tool_response(tool_name, output),
            Protocol::Qwen3Coder => qwen3_coder::format_tool_response(tool_name, output),
            Protocol::MorphXml => morph_xml::format_tool_response(tool_name, output),
            Protocol::YamlXml => yaml_xml::format_tool_response(tool_name, output),
        }
    }

    /// Splits a completed text into interleaved `Text`/`ToolCall` parts via
    /// the active protocol's grammar.
    pub fn parse_generated_text(
        &self,
        text: &str,
        tools: &[ToolDescriptor],
        options: &ParseOptions,
        on_error: &mut dyn FnMut(&str),
    ) -> Vec<ContentPart> {
        match self {
            Protocol::Hermes => hermes::parse_generated_text(text, tools, on_error),
            Protocol::Qwen3Coder => qwen3_coder::parse_generated_text(text, tools, on_error),
            Protocol::MorphXml => morph_xml::parse_generated_text(text, tools, options, on_error),
            Protocol::YamlXml => yaml_xml::parse_generated_text(text, tools, on_error),
        }
    }

    /// Recognised call substrings, for debug summaries.
    pub fn extract_tool_call_segments(&self, text: &str, tools: &[ToolDescriptor]) -> Vec<String> {
        match self {
            Protocol::Hermes => hermes::extract_tool_call_segments(text),
            Protocol::Qwen3Coder => qwen3_coder::extract_tool_call_segments(text),
            Protocol::MorphXml => morph_xml::extract_tool_call_segments(text, tools),
            Protocol::YamlXml => yaml_xml::extract_tool_call_segments(text, tools),
        }
    }

    /// Advances this protocol's streaming state machine by one chunk.
    pub fn parse_stream_chunk(
        &self,
        state: &mut StreamState,
        chunk: &str,
        tools: &[ToolDescriptor],
        on_error: &mut dyn FnMut(&str),
    ) -> Vec<StreamEvent> {
        match self {
            Protocol::Hermes => hermes::parse_stream_chunk(state, chunk, tools, on_error),
            Protocol::Qwen3Coder => qwen3_coder::parse_stream_chunk(state, chunk, tools, on_error),
            Protocol::MorphXml => morph_xml::parse_stream_chunk(state, chunk, tools, on_error),
            Protocol::YamlXml => yaml_xml::parse_stream_chunk(state, chunk, tools, on_error),
        }
    }
}

/// Streaming buffer state: lives for the
/// duration of one model response, owned by exactly one stream.
#[derive(Debug, Default)]
pub struct StreamState {
    pub buffer: String,
    pub phase: Phase,
    /// Monotonic counter used both to mint call ids (see
    /// `crate::ids::next_call_id`) and, while inside a call, to name the
    /// event `id` the tool-input-start/delta/end triple shares with the
    /// final `ToolCall`.
    pub call_counter: u64,
    /// Set once a call region is entered and cleared on completion; carries
    /// the in-progress call's id and (once known) its tool name.
    pub current_call: Option<PartialCall>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Outside,
    InsideToolCall,
}

#[derive(Debug, Clone)]
pub struct PartialCall {
    pub id: String,
    pub tool_name: Option<String>,
    pub args_buffer: String,
    /// Whether `ToolInputStart` has already been emitted (deferred until the
    /// tool name is known).
    pub started: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------
// Shared sub-parsers ("share an XML scaffolding sub-parser")
// ---------------------------------------------------------------------

/// Locates the first syntactically complete top-level JSON object in `text`
/// starting at or after `from`, tolerating surrounding prose. Returns
/// `(start, end)` byte offsets of the object, `end` exclusive.
///
/// Used by Hermes (JSON inside `<tool_call>`) and by the generate-side
/// extractor's JSON-recovery fallback.
pub(crate) fn locate_json_object(text: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = scan_balanced_braces(bytes, i) {
                return Some((i, end));
            }
        }
        i += 1;
    }
    None
}

fn scan_balanced_braces(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// A tolerantly-scanned XML-ish element: a tag name plus either a list of
/// child elements or a raw text body, matching whichever is present in the
/// source.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XmlElement {
    pub name: String,
    pub children: Vec<XmlElement>,
    pub text: String,
    pub self_closing: bool,
}

/// Scans one tolerant XML element named `tag` starting at byte offset
/// `from`, returning the element and the offset just past its closing tag.
///
/// Tolerates stray whitespace and unescaped `&`/`<` inside text nodes.
/// Duplicate same-named children are resolved per `policy` when the
/// caller asks for a specific child by name; this function itself returns
/// every child it finds, in document order.
pub(crate) fn scan_element(text: &str, from: usize) -> Option<(XmlElement, usize)> {
    let rest = &text[from..];
    let open_start = rest.find('<')?;
    let after_lt = &rest[open_start + 1..];
    let name_end = after_lt.find(|c: char| c == '>' || c == ' ' || c == '/')?;
    let name = after_lt[..name_end].to_string();
    if name.is_empty() {
        return None;
    }

    let tag_close = after_lt.find('>')?;
    let is_self_closing = after_lt[..tag_close].trim_end().ends_with('/');
    let tag_end_abs = from + open_start + 1 + tag_close + 1;

    if is_self_closing {
        return Some((
            XmlElement {
                name,
                children: Vec::new(),
                text: String::new(),
                self_closing: true,
            },
            tag_end_abs,
        ));
    }

    let close_tag = format!("</{name}>");
    let body_start = tag_end_abs;
    let body_end = text[body_start..].find(&close_tag)? + body_start;
    let body = &text[body_start..body_end];

    let children = scan_children(body);
    Some((
        XmlElement {
            name,
            children,
            text: body.to_string(),
            self_closing: false,
        },
        body_end + close_tag.len(),
    ))
}

fn scan_children(body: &str) -> Vec<XmlElement> {
    let mut children = Vec::new();
    let mut pos = 0;
    while pos < body.len() {
        match body[pos..].find('<') {
            Some(rel) => {
                let tag_start = pos + rel;
                match scan_element(body, tag_start) {
                    Some((child, next)) => {
                        children.push(child);
                        pos = next;
                    }
                    None => break,
                }
            }
            None => break,
        }
    }
    children
}

/// Converts a YAML document to a JSON value for the YAML-in-XML protocol.
/// Falls back to a JSON-string leaf if the body doesn't parse as YAML,
/// consistent with coercion's never-fail posture.
pub(crate) fn yaml_to_json(yaml_text: &str) -> serde_json::Value {
    match serde_yaml::from_str::<serde_yaml::Value>(yaml_text) {
        Ok(value) => serde_yaml_to_serde_json(&value),
        Err(err) => {
            log::debug!("yaml-xml body did not parse as YAML ({err}), falling back to a string leaf");
            serde_json::Value::String(yaml_text.to_string())
        }
    }
}

fn serde_yaml_to_serde_json(value: &serde_yaml::Value) -> serde_json::Value {
    match value {
        serde_yaml::Value::Null => serde_json::Value::Null,
        serde_yaml::Value::Bool(b) => serde_json::Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::json!(i)
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            } else {
                serde_json::Value::Null
            }
        }
        serde_yaml::Value::String(s) => serde_json::Value::String(s.clone()),
        serde_yaml::Value::Sequence(seq) => {
            serde_json::Value::Array(seq.iter().map(serde_yaml_to_serde_json).collect())
        }
        serde_yaml::Value::Mapping(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map {
                if let Some(key) = k.as_str() {
                    obj.insert(key.to_string(), serde_yaml_to_serde_json(v));
                }
            }
            serde_json::Value::Object(obj)
        }
        serde_yaml::Value::Tagged(tagged) => serde_yaml_to_serde_json(&tagged.value),
    }
}

/// Looks up a tool descriptor by name.
pub(crate) fn find_tool<'a>(tools: &'a [ToolDescriptor], name: &str) -> Option<&'a ToolDescriptor> {
    tools.iter().find(|t| t.name == name)
}

/// Renders a tool-result output's payload as JSON, for protocols whose
/// tool-response template embeds a JSON `content` field. `ExecutionDenied`
/// has no JSON form — callers check for it first via
/// [`tool_result_denial_reason`] and render bracketed text instead.
pub(crate) fn tool_result_content_json(output: &ToolResultOutput) -> serde_json::Value {
    match output {
        ToolResultOutput::Text { value } => serde_json::Value::String(value.clone()),
        ToolResultOutput::Json { value } => value.clone(),
        ToolResultOutput::Content { value } => {
            let texts: Vec<String> = value.iter().filter_map(|p| p.as_text().map(str::to_string)).collect();
            serde_json::Value::String(texts.join("\n"))
        }
        ToolResultOutput::ErrorText { value } => serde_json::json!({"error": value}),
        ToolResultOutput::ErrorJson { value } => serde_json::json!({"error": value}),
        ToolResultOutput::ExecutionDenied { reason } => serde_json::json!({"error": reason}),
    }
}

pub(crate) fn tool_result_denial_reason(output: &ToolResultOutput) -> Option<&str> {
    match output {
        ToolResultOutput::ExecutionDenied { reason } => Some(reason),
        _ => None,
    }
}

/// Bracketed rendering for a denied tool execution, shared across all
/// protocols.
pub(crate) fn render_denied(reason: &str) -> String {
    format!("[execution denied: {reason}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_json_object_finds_simple_object() {
        let text = r#"prefix {"name":"x","arguments":{}} suffix"#;
        let (start, end) = locate_json_object(text, 0).unwrap();
        assert_eq!(&text[start..end], r#"{"name":"x","arguments":{}}"#);
    }

    #[test]
    fn locate_json_object_ignores_braces_in_strings() {
        let text = r#"{"name":"x}y","arguments":{}}"#;
        let (start, end) = locate_json_object(text, 0).unwrap();
        assert_eq!(&text[start..end], text);
    }

    #[test]
    fn scan_element_self_closing() {
        let (el, end) = scan_element("<get_weather/>", 0).unwrap();
        assert_eq!(el.name, "get_weather");
        assert!(el.self_closing);
        assert_eq!(end, "<get_weather/>".len());
    }

    #[test]
    fn scan_element_with_children() {
        let (el, _) = scan_element("<get_weather><city>Seoul</city></get_weather>", 0).unwrap();
        assert_eq!(el.name, "get_weather");
        assert_eq!(el.children.len(), 1);
        assert_eq!(el.children[0].name, "city");
        assert_eq!(el.children[0].text, "Seoul");
    }

    #[test]
    fn yaml_to_json_mapping() {
        let json = yaml_to_json("city: Seoul\ndays: 3\n");
        assert_eq!(json["city"], "Seoul");
        assert_eq!(json["days"], 3);
    }
}
