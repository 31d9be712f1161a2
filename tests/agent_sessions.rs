//! End-to-end behaviour of the agent-backed provider through the facade.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use schemars::JsonSchema;
use serde::Deserialize;

use common::{FakeAgent, RecordingNotifier, delta, idle, message, reasoning, session_error};
use llm_adapter::message::{assistant_message, system_message, user_message};
use llm_adapter::{
    AdapterError, DispatchPolicy, GenerationRequest, ImageRequest, LlmAdapter, Notice,
    ProviderHandle, ProviderRegistry, SessionOptions, TextStream,
};

fn adapter_with(agent: &FakeAgent, options: SessionOptions) -> LlmAdapter {
    let mut registry = ProviderRegistry::new();
    registry.register("agent", ProviderHandle::Agent(Arc::new(agent.clone())));
    LlmAdapter::with_options(registry, options)
}

fn adapter(agent: &FakeAgent) -> LlmAdapter {
    adapter_with(agent, SessionOptions::default())
}

fn hi() -> GenerationRequest {
    GenerationRequest::new("agent", "gpt-5", vec![user_message("hi")])
}

async fn collect(stream: TextStream) -> Vec<Result<String, AdapterError>> {
    tokio::time::timeout(Duration::from_secs(1), stream.collect::<Vec<_>>())
        .await
        .expect("stream did not end")
}

#[tokio::test]
async fn test_deltas_stream_in_order_then_end() {
    let agent = FakeAgent::scripted(vec![delta("He"), delta("llo"), delta("!"), idle()]);
    let adapter = adapter(&agent);

    let response = adapter.stream_text(&hi()).await.unwrap();
    let text: Vec<String> = collect(response.text)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(text, vec!["He", "llo", "!"]);
    assert!(collect(response.reasoning).await.is_empty());

    response.control.cleanup().await;
    response.control.cleanup().await;
    assert_eq!(agent.created(), 1);
    assert_eq!(agent.destroyed(), 1);
    assert_eq!(agent.prompts(), vec!["hi"]);
}

#[tokio::test]
async fn test_reasoning_is_routed_separately() {
    let agent = FakeAgent::scripted(vec![
        reasoning("thinking"),
        delta("answer"),
        reasoning(" more"),
        idle(),
    ]);
    let response = adapter(&agent).stream_text(&hi()).await.unwrap();

    let text: Vec<_> = collect(response.text).await.into_iter().flatten().collect();
    let thoughts: Vec<_> = collect(response.reasoning)
        .await
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(text, vec!["answer"]);
    assert_eq!(thoughts, vec!["thinking", " more"]);
    response.control.cleanup().await;
}

#[tokio::test]
async fn test_session_error_fails_streams_and_destroys_once() {
    let agent = FakeAgent::scripted(vec![delta("He"), session_error("rate limited")]);
    let notifier = RecordingNotifier::default();
    let options = SessionOptions {
        notifier: Arc::new(notifier.clone()),
        ..SessionOptions::default()
    };
    let response = adapter_with(&agent, options).stream_text(&hi()).await.unwrap();

    let items = collect(response.text).await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().ok(), Some("He"));
    match &items[1] {
        Err(AdapterError::Session { message, .. }) => assert!(message.contains("rate limited")),
        other => panic!("expected session error, got {other:?}"),
    }
    let thoughts = collect(response.reasoning).await;
    assert!(matches!(thoughts.as_slice(), [Err(AdapterError::Session { .. })]));

    agent.wait_destroyed(1).await;
    response.control.cleanup().await;
    assert_eq!(agent.destroyed(), 1);
    assert_eq!(
        notifier.notices(),
        vec![Notice::SessionError {
            message: "rate limited".into()
        }]
    );
}

#[tokio::test]
async fn test_abort_ends_streams_cleanly_and_ignores_late_events() {
    let agent = FakeAgent::scripted(vec![delta("He")]);
    let mut response = adapter(&agent).stream_text(&hi()).await.unwrap();

    let first = response.text.next().await;
    assert_eq!(first.and_then(Result::ok).as_deref(), Some("He"));

    response.control.abort().await;
    agent.emit(delta("late"));
    agent.emit(idle());

    assert!(collect(response.text).await.is_empty());
    assert!(collect(response.reasoning).await.is_empty());
    assert_eq!(agent.aborted(), 1);
    assert_eq!(agent.destroyed(), 1);

    response.control.abort().await;
    response.control.cleanup().await;
    assert_eq!(agent.aborted(), 1);
    assert_eq!(agent.destroyed(), 1);
}

#[tokio::test]
async fn test_no_user_message_rejects_before_session() {
    let agent = FakeAgent::scripted(vec![idle()]);
    let request = GenerationRequest::new(
        "agent",
        "gpt-5",
        vec![system_message("be brief"), assistant_message("hello")],
    );

    let result = adapter(&agent).stream_text(&request).await;
    assert!(matches!(result, Err(AdapterError::Configuration { .. })));
    assert_eq!(agent.created(), 0);
}

#[tokio::test]
async fn test_empty_conversation_is_a_validation_error() {
    let agent = FakeAgent::default();
    let request = GenerationRequest::new("agent", "gpt-5", Vec::new());
    let result = adapter(&agent).complete_text(&request).await;
    assert!(matches!(result, Err(AdapterError::Validation { .. })));
    assert_eq!(agent.created(), 0);
}

#[tokio::test]
async fn test_dispatch_failure_tears_down_before_returning() {
    let agent = FakeAgent::failing_send();
    let result = adapter(&agent).stream_text(&hi()).await;

    assert!(matches!(result, Err(AdapterError::Dispatch { .. })));
    assert_eq!(agent.created(), 1);
    assert_eq!(agent.destroyed(), 1);
}

#[tokio::test]
async fn test_concurrent_teardown_destroys_exactly_once() {
    let agent = FakeAgent::scripted(vec![delta("He")]);
    let response = adapter(&agent).stream_text(&hi()).await.unwrap();

    agent.emit(session_error("boom"));
    let control = &response.control;
    tokio::join!(
        control.cleanup(),
        control.cleanup(),
        control.abort(),
        control.cleanup()
    );

    agent.wait_destroyed(1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(agent.destroyed(), 1);
}

#[tokio::test]
async fn test_complete_prefers_final_message() {
    let agent = FakeAgent::scripted(vec![delta("He"), delta("llo"), message("Hello!"), idle()]);
    let text = adapter(&agent).complete_text(&hi()).await.unwrap();

    assert_eq!(text, "Hello!");
    assert_eq!(agent.destroyed(), 1);
    let configs = agent.configs();
    assert!(!configs[0].streaming);
    assert_eq!(configs[0].model, "gpt-5");
}

#[tokio::test]
async fn test_complete_session_error_is_returned() {
    let agent = FakeAgent::scripted(vec![session_error("quota exceeded")]);
    let result = adapter(&agent).complete_text(&hi()).await;

    assert!(matches!(result, Err(AdapterError::Session { message, .. }) if message == "quota exceeded"));
    assert_eq!(agent.destroyed(), 1);
}

#[tokio::test]
async fn test_complete_times_out_and_aborts() {
    let agent = FakeAgent::scripted(vec![delta("never finishes")]);
    let options = SessionOptions {
        wait_timeout: Some(Duration::from_millis(50)),
        ..SessionOptions::default()
    };
    let result = adapter_with(&agent, options).complete_text(&hi()).await;

    assert!(matches!(
        result,
        Err(AdapterError::Session { kind: Some(kind), .. }) if kind == "timeout"
    ));
    assert_eq!(agent.aborted(), 1);
    assert_eq!(agent.destroyed(), 1);
}

#[tokio::test]
async fn test_complete_send_failure_is_a_dispatch_error() {
    let agent = FakeAgent::failing_send();
    let result = adapter(&agent).complete_text(&hi()).await;

    assert!(matches!(result, Err(AdapterError::Dispatch { message }) if message.contains("pipe closed")));
    assert_eq!(agent.created(), 1);
    assert_eq!(agent.destroyed(), 1);
}

#[tokio::test]
async fn test_complete_waits_without_a_timeout_by_default() {
    let agent = FakeAgent::scripted(vec![delta("slow")]);
    let adapter = adapter(&agent);

    let late_idle = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        agent.emit(idle());
    };
    let request = hi();
    let (result, ()) = tokio::join!(adapter.complete_text(&request), late_idle);

    assert_eq!(result.unwrap(), "slow");
    assert_eq!(agent.aborted(), 0);
    assert_eq!(agent.destroyed(), 1);
}

#[tokio::test]
async fn test_system_prompt_reaches_session() {
    let agent = FakeAgent::scripted(vec![idle()]);
    let request = GenerationRequest::new(
        "agent",
        "gpt-5",
        vec![system_message("from conversation"), user_message("hi")],
    );
    adapter(&agent).complete_text(&request).await.unwrap();
    adapter(&agent)
        .complete_text(&request.clone().with_system_message("explicit"))
        .await
        .unwrap();

    let configs = agent.configs();
    assert_eq!(configs[0].system_message.as_deref(), Some("from conversation"));
    assert_eq!(configs[1].system_message.as_deref(), Some("explicit"));
}

#[tokio::test]
async fn test_dispatch_policy_controls_prompt() {
    let conversation = vec![
        user_message("first"),
        assistant_message("reply"),
        user_message("second"),
    ];
    let request = GenerationRequest::new("agent", "gpt-5", conversation);

    let agent = FakeAgent::scripted(vec![idle()]);
    adapter(&agent).complete_text(&request).await.unwrap();
    assert_eq!(agent.prompts(), vec!["second"]);

    let agent = FakeAgent::scripted(vec![idle()]);
    let options = SessionOptions {
        dispatch_policy: DispatchPolicy::Transcript,
        ..SessionOptions::default()
    };
    adapter_with(&agent, options)
        .complete_text(&request)
        .await
        .unwrap();
    assert_eq!(
        agent.prompts(),
        vec!["User: first\n\nAssistant: reply\n\nUser: second"]
    );
}

#[derive(Debug, Deserialize, JsonSchema, PartialEq)]
struct Answer {
    answer: u32,
}

#[tokio::test]
async fn test_generate_object_from_agent() {
    let agent = FakeAgent::scripted(vec![message("```json\n{\"answer\": 42}\n```"), idle()]);
    let answer: Answer = adapter(&agent).generate_object(&hi()).await.unwrap();

    assert_eq!(answer, Answer { answer: 42 });
    let system = agent.configs()[0].system_message.clone().unwrap();
    assert!(system.contains("JSON schema"));
    assert!(system.contains("answer"));
}

#[tokio::test]
async fn test_generate_object_rejects_nonconforming_output() {
    let agent = FakeAgent::scripted(vec![message("forty-two"), idle()]);
    let result = adapter(&agent).generate_object::<Answer>(&hi()).await;

    assert!(matches!(
        result,
        Err(AdapterError::SchemaValidation { output, .. }) if output == "forty-two"
    ));
}

#[tokio::test]
async fn test_agent_does_not_generate_images() {
    let agent = FakeAgent::default();
    let request = ImageRequest {
        model: "gpt-5".into(),
        prompt: "a cat".into(),
        size: None,
    };
    let result = adapter(&agent).generate_image("agent", &request).await;

    assert!(matches!(result, Err(AdapterError::Unsupported { provider, .. }) if provider == "agent"));
    assert_eq!(agent.created(), 0);
}
