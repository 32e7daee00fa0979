//! Minimal end-to-end walkthrough of the Hermes protocol: declare a tool,
//! transform an outgoing conversation, then parse a (simulated) model
//! response back into a structured tool call.

use serde_json::json;
use tool_call_middleware::{ContentPart, Message, Middleware, Placement, Protocol, ToolChoiceConfig, ToolDescriptor};

fn main() {
    let get_weather = ToolDescriptor::builder("get_weather")
        .description("Get the current weather for a city")
        .param("city", "string")
        .build();

    let middleware = Middleware::create(
        Protocol::Hermes,
        "You can call the following tools when needed.\n{{tools}}",
        Placement::Prepend,
    );

    let messages = vec![Message::user("What's the weather like in Seoul?")];

    let mut transform_errors = Vec::new();
    let transformed = middleware
        .transform_params(&messages, &[get_weather.clone()], &ToolChoiceConfig::Auto, &mut |e| {
            transform_errors.push(e.to_string())
        })
        .expect("valid tool-choice configuration");

    println!("--- outgoing system message ---");
    println!("{}", transformed.messages[0].content[0].as_text().unwrap());

    // A real host would ship `transformed.messages` to its provider here and
    // read the completion text back. We stand in for that round trip with a
    // literal example of what a Hermes-speaking model tends to emit.
    let model_output = r#"Let me check that for you.
<tool_call>{"name":"get_weather","arguments":{"city":"Seoul"}}</tool_call>"#;

    let result = middleware
        .wrap_generate(model_output, &transformed.original_tools, &ToolChoiceConfig::Auto, true, &None)
        .expect("well-formed response");

    println!("\n--- parsed content parts ---");
    for part in &result.content {
        match part {
            ContentPart::Text { text } => println!("text: {text:?}"),
            ContentPart::ToolCall { tool_name, input, .. } => println!("tool_call: {tool_name}({input})"),
            other => println!("other: {other:?}"),
        }
    }

    if let Some(summary) = result.debug_summary {
        println!("\n--- debug summary ---");
        println!("recognised source: {:?}", summary.original_text);
        println!("calls: {:?}", summary.tool_calls);
    }

    // Tool-choice can also force a specific call instead of letting the
    // model decide whether to use one at all.
    let forced = ToolChoiceConfig::Tool { tool_name: "get_weather".into() };
    let forced_params = middleware
        .transform_params(&messages, &[get_weather], &forced, &mut |e| transform_errors.push(e.to_string()))
        .expect("valid forced tool-choice");
    println!("\n--- forced response schema ---");
    println!("{}", json!(forced_params.forced_response_schema));
}
