//! End-to-end `Middleware` scenarios not already covered by the in-module
//! unit tests: a full prompt transform -> simulated provider stream ->
//! reassembled tool call round trip, for each protocol variant.

use futures::StreamExt;
use serde_json::json;
use tool_call_middleware::{
    Message, Middleware, Placement, Protocol, StreamEvent, ToolChoiceConfig, ToolDescriptor,
};

fn weather_tool() -> ToolDescriptor {
    ToolDescriptor::new(
        "get_weather",
        "Look up the current weather for a city",
        json!({
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"],
        }),
    )
}

#[test]
fn transform_params_then_wrap_stream_round_trips_a_hermes_call() {
    let mw = Middleware::create(Protocol::Hermes, "Available tools:\n{{tools}}", Placement::Prepend);
    let messages = vec![Message::user("What's the weather in Seoul?")];

    let mut errors = Vec::new();
    let transformed = mw
        .transform_params(&messages, &[weather_tool()], &ToolChoiceConfig::Auto, &mut |m| errors.push(m.to_string()))
        .unwrap();

    assert!(transformed.messages.iter().any(|m| m.role == tool_call_middleware::Role::System));
    assert!(transformed.forced_response_schema.is_none());

    // Simulate the provider echoing the tool descriptor back as a call,
    // split across chunk boundaries the way a real token stream would be.
    let chunks = vec![
        "Sure, let me check. ".to_string(),
        "<tool_call>{\"name\":\"get_wea".to_string(),
        "ther\",\"arguments\":{\"city\":\"Seoul\"}}</tool_call>".to_string(),
    ];

    let events: Vec<StreamEvent> = tokio_test::block_on(async {
        mw.wrap_stream(futures::stream::iter(chunks), transformed.original_tools, ToolChoiceConfig::Auto, None)
            .collect()
            .await
    });

    let call = events.iter().find_map(|e| match e {
        StreamEvent::ToolCall { tool_name, input, .. } if tool_name == "get_weather" => Some(input.clone()),
        _ => None,
    });
    assert_eq!(call, Some(r#"{"city":"Seoul"}"#.to_string()));
}

#[test]
fn transform_params_rejects_provider_defined_tools() {
    let mw = Middleware::create(Protocol::Hermes, "{{tools}}", Placement::Prepend);
    let provider_defined = ToolDescriptor {
        name: "native_search".into(),
        description: None,
        input_schema: serde_json::Value::Null,
    };

    let mut errors = Vec::new();
    let result = mw.transform_params(&[], &[provider_defined], &ToolChoiceConfig::Auto, &mut |m| errors.push(m.to_string()));
    assert!(result.is_err());
}
