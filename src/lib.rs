//! # Tool-Call Middleware
//!
//! Middleware that emulates structured tool-calling on top of language-model
//! providers that don't natively expose a tool-call channel — the kind of
//! provider that only ever gives you plain text completions or a plain text
//! token stream.
//!
//! Given a provider like that, this crate lets a host still program against
//! the usual shape: declare tools with JSON-Schema arguments, send a normal
//! conversation, and get back structured [`ContentPart::ToolCall`]s or
//! [`StreamEvent::ToolCall`]s — by rendering the tool list into the system
//! prompt in one of several well-known textual conventions, and parsing the
//! model's free-form output back out the other side.
//!
//! ## Key Features
//!
//! - **Four textual protocols**: Hermes-style `<tool_call>` JSON, Qwen3-Coder
//!   nested `<function=NAME>` tags, morph XML (tag-named-after-tool), and
//!   YAML-in-XML. Fixed per [`Middleware`] instance — never auto-detected.
//! - **Boundary-safe streaming**: the extractor never emits ambiguous bytes
//!   twice and never loses a byte at a chunk boundary, however the host's
//!   provider happens to chunk its output.
//! - **Schema-guided coercion**: loosely-typed JSON a model actually emits
//!   (stringified numbers, single-item-wrapped arrays, camelCase vs
//!   snake_case keys) is coerced toward a tool's declared schema on a
//!   best-effort basis, never erroring.
//! - **Tool-choice forcing**: `required` and a specific-tool choice switch
//!   the provider into JSON-object response mode against a synthesised
//!   schema instead of going through protocol parsing at all.
//!
//! ## Usage
//!
//! ```
//! use tool_call_middleware::{Middleware, Protocol, Placement, Message, ToolChoiceConfig, ToolDescriptor};
//! use serde_json::json;
//!
//! let weather = ToolDescriptor::builder("get_weather")
//!     .description("Get current weather for a city")
//!     .param("city", "string")
//!     .build();
//!
//! let middleware = Middleware::create(
//!     Protocol::Hermes,
//!     "You can call tools.\n{{tools}}",
//!     Placement::Prepend,
//! );
//!
//! let mut errors = Vec::new();
//! let params = middleware
//!     .transform_params(&[Message::user("What's the weather in Seoul?")], &[weather], &ToolChoiceConfig::Auto, &mut |e| errors.push(e.to_string()))
//!     .unwrap();
//! assert!(params.messages[0].content[0].as_text().unwrap().contains("get_weather"));
//! ```
//!
//! ## Architecture
//!
//! - **protocol**: the four textual conventions, each implementing rendering
//!   (tools block, one call, one tool response) and parsing (whole-response
//!   and streaming-chunk) behind a shared [`Protocol`] dispatch enum.
//! - **buffer**: the chunk-boundary scanning primitive the streaming parsers
//!   are all built on.
//! - **coerce**: the schema-guided argument-coercion engine.
//! - **prompt**: the seven-step outgoing-message rewrite.
//! - **tool_choice**: the forced-response adapter for `required`/specific-tool
//!   configurations.
//! - **extract**: the crate-facing generate/stream entry points built on top
//!   of `protocol`.
//! - **middleware**: [`Middleware`], the struct tying all of the above
//!   together into the three hooks a host actually calls.
//! - **types**: the data model shared by every other module.
//! - **config**: construction-time options (`Placement`, error/debug hooks,
//!   tool-choice configuration).
//! - **error**: the `Error` enum and `Result` alias for the synchronous,
//!   fatal, configuration-only failures this crate can raise.
//! - **ids**: call-id generation.

pub mod buffer;
pub mod coerce;
pub mod config;
mod error;
pub mod extract;
mod ids;
mod middleware;
mod prompt;
pub mod protocol;
mod tool_choice;
mod types;

// --- Middleware entry point ---

pub use middleware::{GenerateResult, Middleware, TransformParamsResult};

// --- Configuration ---

pub use config::{Placement, ToolCallMiddlewareOptions, ToolChoiceConfig};

// --- Error handling ---

pub use error::{Error, Result};

// --- Protocol layer ---

pub use protocol::{DuplicateTagPolicy, ParseOptions, Protocol};

// --- Generate/stream extraction ---

pub use extract::generate::DebugSummary;
pub use extract::stream::StreamExtractor;

// --- Prompt transform ---

pub use prompt::TransformedPrompt;

// --- Core types ---

pub use types::{
    ContentPart, FinishReason, Message, Role, StreamEvent, ToolCall, ToolDescriptor,
    ToolDescriptorBuilder, ToolResultOutput,
};

// --- Call-id generation ---

pub use ids::next_call_id;

// --- Micro-benchmarkable primitives ---
//
// `earliest_index` and `coerce` are re-exported at the crate root (rather
// than left as implementation details behind `protocol`/`extract`) because
// they are the two hot paths benchmarked directly — see `benches/performance.rs`.

pub use buffer::earliest_index;
pub use coerce::coerce;

/// Convenience module bundling the most commonly used types and functions.
/// Import with `use tool_call_middleware::prelude::*;` for typical usage.
pub mod prelude {
    pub use crate::{
        ContentPart, Error, Message, Middleware, Placement, Protocol, Result, Role, StreamEvent,
        ToolCall, ToolCallMiddlewareOptions, ToolChoiceConfig, ToolDescriptor,
    };
}
