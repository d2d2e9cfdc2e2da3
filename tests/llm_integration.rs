//! Integration tests against a live model endpoint.
//!
//! These tests make real API calls to OpenRouter.
//! Run with: OPENROUTER_API_KEY=your_key cargo test --test llm_integration -- --ignored

use std::sync::Arc;

use trajforge::coordinator::{CancelSignal, CoordinatorConfig, InteractionCoordinator, Rollout};
use trajforge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message, RateLimitedProvider, RetryPolicy};
use trajforge::simulation::{
    LlmAgentSimulator, LlmUserSimulator, ModelSettings, TemplateSynthesizer,
};
use trajforge::trajectory::{
    validate_transcript, AgentConfig, Task, ToolDefinition, ToolParameter, UserPersona,
};

fn get_test_api_key() -> String {
    std::env::var("OPENROUTER_API_KEY")
        .expect("OPENROUTER_API_KEY environment variable must be set for integration tests")
}

fn create_test_client() -> LiteLlmClient {
    LiteLlmClient::new_with_defaults(get_test_api_key())
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        "",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(
        content.contains('4'),
        "Response should contain '4', got: {}",
        content
    );
    assert!(response.usage.total_tokens > 0, "Should have token usage");
}

#[tokio::test]
#[ignore]
async fn test_invalid_api_key() {
    let client = LiteLlmClient::new_with_defaults("invalid-key".to_string());
    let request = GenerationRequest::new("", vec![Message::user("test")]).with_max_tokens(5);

    let err = client.generate(request).await.expect_err("Should fail with invalid API key");
    assert!(!err.is_transient(), "Auth failures are fatal: {err}");
}

#[tokio::test]
#[ignore]
async fn test_live_rollout_is_well_formed() {
    let llm: Arc<dyn LlmProvider> = Arc::new(RateLimitedProvider::new(
        Arc::new(create_test_client()),
        2,
        RetryPolicy::default(),
    ));

    let tool = ToolDefinition {
        id: "weather".into(),
        name: "get_weather".into(),
        description: "Current weather for a city".into(),
        parameters: vec![ToolParameter {
            name: "city".into(),
            param_type: "string".into(),
            description: "City name".into(),
            required: true,
            enum_values: None,
            default: None,
        }],
        examples: vec![],
    };
    let agent = AgentConfig::new(
        "assistant",
        "You are a helpful assistant with a weather tool.",
        vec![Arc::new(tool)],
    );
    let task = Task {
        id: "weather-paris".into(),
        agent_id: "assistant".into(),
        title: String::new(),
        description: "Find out whether you need an umbrella in Paris today".into(),
        difficulty: Default::default(),
        expected_tools: vec!["get_weather".into()],
        rubric: Default::default(),
    };
    let persona = UserPersona {
        id: "p1".into(),
        name: "Alex".into(),
        personality: Default::default(),
        style: Default::default(),
    };

    let config = CoordinatorConfig::default().with_max_turns(4);
    let coordinator = InteractionCoordinator::new(
        Arc::new(LlmUserSimulator::new(
            Arc::clone(&llm),
            ModelSettings::default(),
            config.completion.sentinel.clone(),
        )),
        Arc::new(LlmAgentSimulator::new(Arc::clone(&llm), ModelSettings::default())),
        Arc::new(TemplateSynthesizer),
        config,
    );

    let rollout = Rollout::new(Arc::new(task), Arc::new(agent), Arc::new(persona), 0);
    let trajectory = coordinator.run(&rollout, CancelSignal::never()).await;

    assert!(trajectory.turn_count >= 1);
    validate_transcript(&trajectory, Some(4)).expect("live transcript must be well-formed");
}
