//! Core data model for the tool-call middleware.
//!
//! Three families of types flow through the crate:
//!
//! - **Descriptors and calls**: [`ToolDescriptor`] is what the host provides;
//!   [`ToolCall`] is what the parser layer produces. Both are immutable
//!   through a request.
//! - **Content**: [`ContentPart`] is the parsed shape of a completed
//!   generation; [`StreamEvent`] is its incremental counterpart. Both are
//!   open-ended — an `Unknown` arm absorbs content the crate doesn't
//!   recognise instead of panicking.
//! - **Messages**: [`Message`]/[`Role`] are the host's conversation shape,
//!   consumed and produced by the prompt transformer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool the host has made available to the model.
///
/// Immutable through a request: the middleware never mutates a descriptor,
/// only reads `name`/`description` to render the tools-system block and
/// reads `input_schema` to drive coercion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique name the model uses to select this tool.
    pub name: String,
    /// Human-readable description rendered into the tools-system block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON-Schema fragment describing the tool's arguments (object-typed at
    /// the top level in practice).
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Creates a descriptor from a name, description, and a schema in any of
    /// the shapes [`ToolDescriptorBuilder`] accepts, normalising it to full
    /// JSON Schema via [`normalize_schema`].
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema: normalize_schema(input_schema),
        }
    }

    /// Starts a fluent builder, mirroring the SDK's `tool()` entry
    /// point but without a handler — tool execution is the host's
    /// responsibility.
    pub fn builder(name: impl Into<String>) -> ToolDescriptorBuilder {
        ToolDescriptorBuilder::new(name)
    }
}

/// Fluent builder for [`ToolDescriptor`].
///
/// ```
/// use tool_call_middleware::ToolDescriptor;
///
/// let weather = ToolDescriptor::builder("get_weather")
///     .description("Get current weather for a location")
///     .param("city", "string")
///     .param("days", "integer")
///     .build();
///
/// assert_eq!(weather.input_schema["required"], serde_json::json!(["city", "days"]));
/// ```
pub struct ToolDescriptorBuilder {
    name: String,
    description: String,
    schema: Value,
}

impl ToolDescriptorBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            schema: Value::Object(serde_json::Map::new()),
        }
    }

    /// Sets the human-readable description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a simple-notation parameter (`"string"`, `"integer"`, ...). See
    /// [`type_to_json_schema`] for the accepted aliases.
    pub fn param(mut self, name: impl Into<String>, type_str: impl Into<String>) -> Self {
        let obj = self
            .schema
            .as_object_mut()
            .expect("schema is always constructed as an object");
        obj.insert(name.into(), Value::String(type_str.into()));
        self
    }

    /// Replaces the schema outright with a pre-built fragment (simple
    /// notation, extended per-property notation, or full JSON Schema — all
    /// three are accepted, see [`normalize_schema`]).
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    /// Finalises the descriptor, normalising whatever schema shape was
    /// accumulated into full JSON Schema.
    pub fn build(self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name,
            description: if self.description.is_empty() {
                None
            } else {
                Some(self.description)
            },
            input_schema: normalize_schema(self.schema),
        }
    }
}

/// Converts simple-notation or extended-notation schemas to full JSON Schema,
/// passing already-complete schemas through unchanged.
///
/// Kept from the SDK's `convert_schema_to_openai` almost verbatim —
/// the shape-sniffing rules (flat type strings vs. `{type, optional}` maps
/// vs. a schema that already has `type`+`properties`) are provider-agnostic
/// JSON-Schema ergonomics, not an OpenAI-specific convention.
pub fn normalize_schema(schema: Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return serde_json::json!({"type": "object", "properties": {}, "required": []});
    };

    if obj.contains_key("type") && obj.contains_key("properties") {
        return schema;
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for (param_name, param_type) in obj {
        if let Some(type_str) = param_type.as_str() {
            properties.insert(param_name.clone(), type_to_json_schema(type_str));
            required.push(Value::String(param_name.clone()));
        } else if param_type.is_object() {
            let mut prop = param_type.clone();
            let prop_obj = prop
                .as_object_mut()
                .expect("is_object() checked above");

            let is_optional = prop_obj
                .remove("optional")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let is_required = prop_obj.remove("required").and_then(|v| v.as_bool());
            let has_default = prop_obj.contains_key("default");

            properties.insert(param_name.clone(), prop);

            if is_required == Some(true) {
                required.push(Value::String(param_name.clone()));
            } else if is_optional || is_required == Some(false) {
                // explicitly optional
            } else if !has_default {
                required.push(Value::String(param_name.clone()));
            }
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Maps a friendly type alias to a JSON-Schema `{"type": ...}` fragment.
/// Unknown aliases default to `"string"` rather than erroring — consistent
/// with the coercion engine's never-fail posture.
pub fn type_to_json_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        _ => "string",
    };
    serde_json::json!({ "type": json_type })
}

/// A parsed or synthesised tool call.
///
/// `input` is always a JSON-encoded string of the coerced argument object —
/// downstream consumers get one canonical form regardless of which protocol
/// produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Middleware-assigned id correlating this call with its later result.
    pub tool_call_id: String,
    /// Name of the tool being called.
    pub tool_name: String,
    /// Canonical JSON encoding of the coerced arguments.
    pub input: String,
}

impl ToolCall {
    pub fn new(tool_call_id: impl Into<String>, tool_name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input: input.into(),
        }
    }
}

/// Output of an executed tool, as reported back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultOutput {
    /// Plain-text result.
    Text { value: String },
    /// Structured JSON result.
    Json { value: Value },
    /// Rich content (e.g. produced by a tool that itself emits `ContentPart`s).
    Content { value: Vec<ContentPart> },
    /// The host denied execution (e.g. a human-in-the-loop approval gate).
    ExecutionDenied { reason: String },
    /// Execution failed; error reported as text.
    ErrorText { value: String },
    /// Execution failed; error reported as structured JSON.
    ErrorJson { value: Value },
}

/// A single piece of parsed model output.
///
/// Open-ended on purpose: [`ContentPart::Unknown`] absorbs anything a future
/// protocol or host extension introduces so the parser never has to panic on
/// a variant it wasn't built to understand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Reasoning { text: String },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: String,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: ToolResultOutput,
    },
    File { media_type: String, data: String },
    /// Fallback for content the crate doesn't have a dedicated arm for.
    /// Carries the original value so a caller can still recover it.
    Unknown { raw: Value },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        ContentPart::ToolCall {
            tool_call_id: call.tool_call_id,
            tool_name: call.tool_name,
            input: call.input,
        }
    }

    /// Returns the text of this part if it is a `Text` part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Reason generation stopped, carried by [`StreamEvent::Finish`]/`FinishStep`.
/// Mirrors the SDK's `OpenAIChoice::finish_reason` strings but as a
/// closed enum with an `Other` escape hatch, since providers are free to
/// invent their own reason strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

/// A single event emitted by the streaming extractor.
///
/// `id` groups a `ToolInputStart`/`ToolInputDelta`*/`ToolInputEnd` triple
/// with the final `ToolCall` that shares the same call id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta { id: String, delta: String },
    ReasoningDelta { id: String, delta: String },
    ToolInputStart { id: String, tool_name: String },
    ToolInputDelta { id: String, delta: String },
    ToolInputEnd { id: String },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: String,
    },
    FinishStep { reason: FinishReason },
    Finish { reason: FinishReason },
    Error { error: String },
}

/// Conversation role, mirroring the SDK's `MessageRole` but with
/// `Tool` kept distinct from `Assistant` since the prompt transformer treats
/// them very differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the host's conversation shape, consumed and produced by the
/// prompt transformer.
///
/// Unlike the SDK's `Message` (which fixes content to vision-capable
/// blocks), this crate's `content` is a `Vec<ContentPart>` so that assistant
/// tool calls and tool results — the two shapes the transformer actually
/// rewrites — are representable without a second content type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn assistant(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn tool(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Tool,
            content,
        }
    }
}
