//! Walks a simulated token stream through `Middleware::wrap_stream`,
//! printing every emitted event as it arrives — including across a call
//! region split awkwardly across chunk boundaries, to show the extractor
//! never double-emits or drops a byte.

use futures::StreamExt;
use tool_call_middleware::{Placement, Protocol, StreamEvent, ToolChoiceConfig, ToolDescriptor, Middleware};

#[tokio::main]
async fn main() {
    let get_weather = ToolDescriptor::builder("get_weather")
        .description("Get the current weather for a city")
        .param("city", "string")
        .build();

    let middleware = Middleware::create(Protocol::MorphXml, "{{tools}}", Placement::Prepend);

    // A provider streaming token-by-token rarely respects tag boundaries —
    // here the opening tag itself is split across two chunks.
    let chunks = vec![
        "Sure, let me look that up. ".to_string(),
        "<get_we".to_string(),
        "ather><city>Seoul</city></get_weather>".to_string(),
        " Here's what I found.".to_string(),
    ];

    let mut stream = middleware.wrap_stream(
        futures::stream::iter(chunks),
        vec![get_weather],
        ToolChoiceConfig::Auto,
        Some(Box::new(|message: &str| eprintln!("recoverable: {message}"))),
    );

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::TextDelta { delta, .. } => print!("{delta}"),
            StreamEvent::ToolInputStart { tool_name, .. } => println!("\n[tool input start: {tool_name}]"),
            StreamEvent::ToolInputDelta { delta, .. } => print!("{delta}"),
            StreamEvent::ToolInputEnd { .. } => println!("\n[tool input end]"),
            StreamEvent::ToolCall { tool_name, input, .. } => println!("[tool call: {tool_name}({input})]"),
            StreamEvent::Finish { reason } => println!("\n[finished: {reason:?}]"),
            other => println!("[{other:?}]"),
        }
    }
}
