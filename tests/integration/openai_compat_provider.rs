//! OpenAI-compatible provider against a mock HTTP server.

use std::sync::Arc;
use std::time::Duration;

use kestrel::mode::probes::{NetworkSnapshot, ThermalSnapshot};
use kestrel::routing::{OpenAiCompatProvider, QueryOptions};
use kestrel::tools::FetchStatusTool;
use kestrel::{
    CapabilityProvider, FailureKind, FallbackRouter, HealthState, HealthTracker, KestrelError,
    OperationalMode, ProviderDescriptor, ProviderKind, RequestContext, Tool, ToolContext,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn descriptor(server: &MockServer) -> ProviderDescriptor {
    ProviderDescriptor::new("mock", ProviderKind::RemoteApi)
        .with_timeout(Duration::from_secs(5))
        .with_option("base_url", format!("{}/v1", server.uri()))
        .with_option("model", "test-model")
}

fn provider(descriptor: &ProviderDescriptor) -> OpenAiCompatProvider {
    OpenAiCompatProvider::from_descriptor(descriptor).unwrap()
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20 }
    })
}

async fn query_err(provider: &OpenAiCompatProvider) -> KestrelError {
    provider
        .query("hi", &RequestContext::new("hi"), &QueryOptions::default())
        .await
        .unwrap_err()
}

#[tokio::test]
async fn completion_fills_content_tokens_and_cost() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "stream": false,
            "user": "session-7",
            "messages": [{ "role": "user", "content": "What is 2+2?" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("4")))
        .expect(1)
        .mount(&server)
        .await;

    let desc = descriptor(&server).with_option("cost_per_1k_tokens", "0.5");
    let provider = provider(&desc);
    let request = RequestContext::new("What is 2+2?").with_session("session-7");
    let envelope = provider
        .query(&request.prompt, &request, &QueryOptions::for_request(&request, &desc))
        .await
        .unwrap();

    assert!(envelope.success);
    assert_eq!(envelope.content, "4");
    assert_eq!(envelope.tokens, 20);
    assert!((envelope.cost_usd - 0.01).abs() < 1e-9);
    assert_eq!(envelope.metadata.get("model"), Some(&json!("test-model")));
}

#[tokio::test]
async fn api_key_from_environment_is_sent_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(1)
        .mount(&server)
        .await;

    // SAFETY: the variable name is unique to this test.
    unsafe { std::env::set_var("KESTREL_TEST_BEARER_KEY", "sk-test-123") };
    let desc = descriptor(&server).with_option("api_key_env", "KESTREL_TEST_BEARER_KEY");
    let envelope = provider(&desc)
        .query("hi", &RequestContext::new("hi"), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(envelope.content, "ok");
}

#[tokio::test]
async fn thermal_stress_caps_max_tokens_for_integrated_providers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "max_tokens": 64 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("short")))
        .expect(1)
        .mount(&server)
        .await;

    let desc = descriptor(&server)
        .with_thermal_integration(true)
        .with_option("thermal_max_tokens", "64");
    let request = RequestContext::new("long answer please")
        .with_snapshots(NetworkSnapshot::online(), ThermalSnapshot::hot(90.0));
    let envelope = provider(&desc)
        .query(&request.prompt, &request, &QueryOptions::for_request(&request, &desc))
        .await
        .unwrap();
    assert_eq!(envelope.metadata.get("thermal_throttled"), Some(&json!(true)));
}

#[tokio::test]
async fn http_errors_map_to_failure_kinds() {
    let cases = [
        (401, FailureKind::Auth, false),
        (403, FailureKind::Auth, false),
        (429, FailureKind::RateLimit, true),
        (500, FailureKind::Server, true),
        (503, FailureKind::Server, true),
        (404, FailureKind::Other, false),
    ];

    for (status, kind, retryable) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": { "message": format!("status {status}"), "type": "test" }
            })))
            .mount(&server)
            .await;

        let err = query_err(&provider(&descriptor(&server))).await;
        assert_eq!(err.failure_kind(), Some(kind), "status {status}");
        assert_eq!(err.is_retryable(), retryable, "status {status}");
        assert!(err.to_string().contains(&format!("status {status}")), "{err}");
    }
}

#[tokio::test]
async fn missing_choices_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let err = query_err(&provider(&descriptor(&server))).await;
    assert_eq!(err.failure_kind(), Some(FailureKind::InvalidResponse));
}

#[tokio::test]
async fn unreachable_endpoint_is_network_failure() {
    let desc = ProviderDescriptor::new("dead", ProviderKind::RemoteDaemon)
        .with_timeout(Duration::from_secs(2))
        .with_option("base_url", "http://127.0.0.1:9/v1")
        .with_option("model", "m");
    let provider = provider(&desc);

    let err = query_err(&provider).await;
    assert!(matches!(
        err.failure_kind(),
        Some(FailureKind::Network | FailureKind::Timeout)
    ));
    assert!(provider.health_check().await.is_err());
}

#[tokio::test]
async fn health_check_reads_models_endpoint() {
    for (status, expected) in [
        (200, HealthState::Healthy),
        (429, HealthState::Degraded),
        (500, HealthState::Unavailable),
    ] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({ "data": [] })))
            .mount(&server)
            .await;

        let state = provider(&descriptor(&server)).health_check().await.unwrap();
        assert_eq!(state, expected, "status {status}");
    }
}

#[tokio::test]
async fn router_falls_back_from_rate_limited_to_healthy_backend() {
    let limited = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&limited)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "message": "slow down" }
        })))
        .expect(2)
        .mount(&limited)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&healthy)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("from backup")))
        .mount(&healthy)
        .await;

    let primary = descriptor(&limited).with_priority(1).with_max_retries(1);
    let backup = ProviderDescriptor::new("backup", ProviderKind::CredentialProxy)
        .with_priority(2)
        .with_option("base_url", format!("{}/v1", healthy.uri()))
        .with_option("model", "test-model");

    let mut router = FallbackRouter::new(Arc::new(HealthTracker::new()));
    router
        .register(primary.clone(), Arc::new(provider(&primary)))
        .unwrap();
    router
        .register(backup.clone(), Arc::new(provider(&backup)))
        .unwrap();

    let env = router.route_default(&RequestContext::new("hi")).await;
    assert!(env.success);
    assert_eq!(env.provider_id, "backup");
    assert_eq!(env.content, "from backup");
    assert_eq!(router.health().state("mock"), HealthState::Unavailable);
}

#[tokio::test]
async fn fetch_status_tool_reports_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let tool = FetchStatusTool::new();
    let ctx = ToolContext::new(OperationalMode::Full, std::env::temp_dir());
    let result = tool
        .execute(&ctx, json!({ "url": format!("{}/status", server.uri()) }))
        .await
        .unwrap();
    assert_eq!(result.content, "HTTP 200 OK");

    let err = tool
        .execute(&ctx, json!({ "url": "ftp://example.com/file" }))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unsupported scheme"));
}
