//! Fallback router behaviour against scripted providers.

use std::sync::Arc;

use kestrel::routing::{AttemptOutcome, RECOVERY_PROVIDER_ID};
use kestrel::{FailureKind, FallbackRouter, HealthState, HealthTracker, ProviderKind, RequestContext};

use crate::helpers::{Backend, Script, call_log, calls, scripted_router};

fn ids(chain: &[&str]) -> Vec<String> {
    chain.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn skips_unhealthy_falls_past_timeout_and_serves_from_third() {
    let log = call_log();
    let (router, providers) = scripted_router(
        vec![
            Backend::new("X", Script::Succeed).health(HealthState::Unavailable),
            Backend::new("Y", Script::Hang),
            Backend::new("Z", Script::Succeed),
        ],
        Arc::new(HealthTracker::new()),
        &log,
    );

    let env = router
        .route(&RequestContext::new("hello"), &ids(&["X", "Y", "Z"]), None)
        .await;

    assert!(env.success);
    assert_eq!(env.provider_id, "Z");
    assert_eq!(env.content, "Z");
    assert_eq!(providers[0].queries(), 0, "X must not be invoked");
    assert_eq!(calls(&log), vec!["Y", "Z"]);
    assert_eq!(router.health().state("Y"), HealthState::Unavailable);
    assert_eq!(router.health().state("Z"), HealthState::Healthy);

    match &env.attempts[0].outcome {
        AttemptOutcome::Skipped { reason } => {
            assert!(reason.starts_with("[PROVIDER_UNAVAILABLE] provider 'X'"), "{reason}");
            assert!(reason.contains("health state unavailable"), "{reason}");
        }
        other => panic!("expected X to be skipped, got {other:?}"),
    }
    match &env.attempts[1].outcome {
        AttemptOutcome::Failed { kind, .. } => assert_eq!(kind, FailureKind::Timeout.as_str()),
        other => panic!("expected Y to fail, got {other:?}"),
    }
    assert_eq!(env.attempts[2].outcome, AttemptOutcome::Succeeded);
}

#[tokio::test]
async fn attempt_order_is_deterministic() {
    let log = call_log();
    let health = Arc::new(HealthTracker::new());
    let (router, _) = scripted_router(
        vec![
            Backend::new("c", Script::Fail(FailureKind::Server)).priority(30),
            Backend::new("a", Script::Fail(FailureKind::Server)).priority(10),
            Backend::new("b", Script::Fail(FailureKind::Server)).priority(20),
        ],
        Arc::clone(&health),
        &log,
    );

    let first = router.route_default(&RequestContext::new("q")).await;
    health.reset();
    let second = router.route_default(&RequestContext::new("q")).await;

    let order = |env: &kestrel::ResponseEnvelope| -> Vec<String> {
        env.attempts.iter().map(|a| a.provider_id.clone()).collect()
    };
    assert_eq!(order(&first), vec!["a", "b", "c"]);
    assert_eq!(order(&first), order(&second));
    assert_eq!(calls(&log), vec!["a", "b", "c", "a", "b", "c"]);
}

#[tokio::test]
async fn preferred_provider_goes_first() {
    let log = call_log();
    let (router, _) = scripted_router(
        vec![
            Backend::new("a", Script::Succeed).priority(1),
            Backend::new("b", Script::Succeed).priority(2),
            Backend::new("c", Script::Succeed).priority(3),
        ],
        Arc::new(HealthTracker::new()),
        &log,
    );

    let env = router
        .route_default(&RequestContext::new("q").with_preferred("c"))
        .await;
    assert_eq!(env.provider_id, "c");
    assert_eq!(calls(&log), vec!["c"]);
}

#[tokio::test]
async fn failing_preferred_falls_back_in_declared_order() {
    let log = call_log();
    let (router, _) = scripted_router(
        vec![
            Backend::new("a", Script::Succeed).priority(1),
            Backend::new("b", Script::Succeed).priority(2),
            Backend::new("c", Script::Fail(FailureKind::RateLimit)).priority(3),
        ],
        Arc::new(HealthTracker::new()),
        &log,
    );

    let env = router
        .route_default(&RequestContext::new("q").with_preferred("c"))
        .await;
    assert_eq!(env.provider_id, "a");
    assert_eq!(calls(&log), vec!["c", "a"]);
}

#[tokio::test]
async fn all_failing_returns_recovery_envelope() {
    let log = call_log();
    let (router, _) = scripted_router(
        vec![
            Backend::new("a", Script::Fail(FailureKind::Auth)),
            Backend::new("b", Script::Unsuccessful),
            Backend::new("c", Script::Succeed).health(HealthState::Unavailable),
        ],
        Arc::new(HealthTracker::new()),
        &log,
    );

    let env = router.route_default(&RequestContext::new("q")).await;
    assert!(!env.success);
    assert_eq!(env.provider_id, RECOVERY_PROVIDER_ID);
    let error = env.error.clone().unwrap();
    assert!(error.contains("All providers failed"), "{error}");
    assert!(error.contains("model refused"), "last error is aggregated: {error}");
    assert_eq!(
        env.metadata.get("attempted_providers"),
        Some(&serde_json::json!(["a", "b", "c"]))
    );
    assert!(env.metadata.contains_key("remediation"));
    assert_eq!(env.invoked_providers(), vec!["a", "b"]);
}

#[tokio::test]
async fn first_success_wins_and_outputs_are_not_merged() {
    let log = call_log();
    let (router, providers) = scripted_router(
        vec![
            Backend::new("a", Script::Succeed),
            Backend::new("b", Script::Succeed),
        ],
        Arc::new(HealthTracker::new()),
        &log,
    );

    let env = router.route_default(&RequestContext::new("q")).await;
    assert_eq!(env.content, "a");
    assert_eq!(providers[1].queries(), 0);
}

#[tokio::test]
async fn offline_snapshot_skips_remote_but_not_local() {
    let log = call_log();
    let (router, _) = scripted_router(
        vec![
            Backend::new("cloud", Script::Succeed).priority(1),
            Backend::new("ollama", Script::Succeed)
                .kind(ProviderKind::LocalDaemon)
                .priority(2),
        ],
        Arc::new(HealthTracker::new()),
        &log,
    );

    let request = RequestContext::new("q").with_snapshots(
        kestrel::mode::probes::NetworkSnapshot::offline(),
        kestrel::mode::probes::ThermalSnapshot::safe(),
    );
    let env = router.route_default(&request).await;
    assert_eq!(env.provider_id, "ollama");
    assert_eq!(calls(&log), vec!["ollama"]);
}

#[tokio::test]
async fn failure_threshold_keeps_provider_in_rotation() {
    let log = call_log();
    let (router, _) = scripted_router(
        vec![
            Backend::new("a", Script::Fail(FailureKind::Server)),
            Backend::new("b", Script::Succeed),
        ],
        Arc::new(HealthTracker::with_failure_threshold(2)),
        &log,
    );

    router.route_default(&RequestContext::new("q")).await;
    assert_eq!(router.health().state("a"), HealthState::Degraded);

    router.route_default(&RequestContext::new("q")).await;
    assert_eq!(router.health().state("a"), HealthState::Unavailable);

    router.route_default(&RequestContext::new("q")).await;
    assert_eq!(calls(&log), vec!["a", "b", "a", "b", "b"]);
}

#[tokio::test]
async fn concurrent_routes_share_one_router() {
    let log = call_log();
    let (router, providers) = scripted_router(
        vec![Backend::new("a", Script::Succeed)],
        Arc::new(HealthTracker::new()),
        &log,
    );
    let router: Arc<FallbackRouter> = Arc::new(router);

    let routes = (0..16).map(|i| {
        let router = Arc::clone(&router);
        async move { router.route_default(&RequestContext::new(format!("q{i}"))).await }
    });
    let results = futures_util::future::join_all(routes).await;

    assert!(results.iter().all(|env| env.success && env.provider_id == "a"));
    assert_eq!(providers[0].queries(), 16);
}
