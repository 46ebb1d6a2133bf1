//! Dispatcher behaviour as the operational mode moves.

use std::sync::Arc;

use kestrel::mode::TransitionTrigger;
use kestrel::mode::probes::{
    NetworkSnapshot, StaticNetworkProbe, StaticThermalProbe, ThermalSnapshot,
};
use kestrel::tools::register_builtins;
use kestrel::{
    Dispatcher, HealthTracker, KestrelConfig, KestrelError, ModeController, OperationalMode,
    ProviderKind, RequestContext, ToolCapabilityRegistry,
};
use serde_json::json;

use crate::helpers::{Backend, Script, call_log, calls, scripted_router};

struct Rig {
    dispatcher: Dispatcher,
    network: Arc<StaticNetworkProbe>,
    thermal: Arc<StaticThermalProbe>,
    _workspace: tempfile::TempDir,
}

fn rig(backends: Vec<Backend>, log: &crate::helpers::CallLog) -> Rig {
    let workspace = tempfile::tempdir().unwrap();
    let (router, _) = scripted_router(backends, Arc::new(HealthTracker::new()), log);

    let registry = ToolCapabilityRegistry::new();
    register_builtins(&registry, &Default::default()).unwrap();

    let network = Arc::new(StaticNetworkProbe::new(NetworkSnapshot::online()));
    let thermal = Arc::new(StaticThermalProbe::new(ThermalSnapshot::safe()));
    let mode = ModeController::new(OperationalMode::Full, network.clone(), thermal.clone());

    Rig {
        dispatcher: Dispatcher::new(
            Arc::new(router),
            Arc::new(registry),
            Arc::new(mode),
            workspace.path(),
        ),
        network,
        thermal,
        _workspace: workspace,
    }
}

#[tokio::test]
async fn losing_network_steps_down_then_recovers_in_one_jump() {
    let log = call_log();
    let rig = rig(vec![Backend::new("cloud", Script::Succeed)], &log);
    let d = &rig.dispatcher;

    rig.network.set(NetworkSnapshot::offline());
    let first = d.evaluate_and_adapt().await;
    assert!(first.changed);
    assert_eq!(first.mode, OperationalMode::Degraded);

    let second = d.evaluate_and_adapt().await;
    assert_eq!(second.mode, OperationalMode::Autonomous);

    let third = d.evaluate_and_adapt().await;
    assert!(!third.changed, "offline and cool settles at Autonomous");

    rig.network.set(NetworkSnapshot::online());
    let back = d.evaluate_and_adapt().await;
    assert_eq!(back.mode, OperationalMode::Full);

    let history = d.mode_controller().history();
    let path: Vec<_> = history.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        path,
        vec![
            (OperationalMode::Full, OperationalMode::Degraded),
            (OperationalMode::Degraded, OperationalMode::Autonomous),
            (OperationalMode::Autonomous, OperationalMode::Full),
        ]
    );
    assert!(history.iter().all(|t| t.trigger == TransitionTrigger::Evaluation));
}

#[tokio::test]
async fn subscribers_see_failure_transitions() {
    let log = call_log();
    let rig = rig(
        vec![Backend::new("cloud", Script::Fail(kestrel::FailureKind::Server))],
        &log,
    );
    let mut rx = rig.dispatcher.mode_controller().subscribe();

    let env = rig.dispatcher.route(RequestContext::new("hi")).await;
    assert!(!env.success);

    let transition = rx.recv().await.unwrap();
    assert_eq!(transition.from, OperationalMode::Full);
    assert_eq!(transition.to, OperationalMode::Degraded);
    assert!(matches!(transition.trigger, TransitionTrigger::Failure(_)));
    assert!(transition.reason.contains("exhausted"), "{}", transition.reason);
}

#[tokio::test]
async fn autonomous_mode_routes_local_and_blocks_remote_tools() {
    let log = call_log();
    let rig = rig(
        vec![
            Backend::new("cloud", Script::Succeed).priority(1),
            Backend::new("ollama", Script::Succeed)
                .kind(ProviderKind::LocalDaemon)
                .priority(2),
        ],
        &log,
    );
    let d = &rig.dispatcher;
    d.force_mode(OperationalMode::Autonomous, "operator");

    let env = d.route(RequestContext::new("hi").with_preferred("cloud")).await;
    assert!(env.success);
    assert_eq!(env.provider_id, "ollama");
    assert_eq!(calls(&log), vec!["ollama"]);
    assert_eq!(env.metadata.get("mode"), Some(&json!("autonomous")));

    let err = d
        .execute("write_file", json!({"path": "a.txt", "content": "x"}))
        .await
        .unwrap_err();
    assert!(matches!(err, KestrelError::ModeGateRejection { .. }));

    let listed = d
        .execute("list_dir", json!({}))
        .await
        .unwrap();
    assert!(listed.success);

    assert!(!d.available_tools().contains(&"fetch_status".to_string()));
    assert!(d.available_tools().contains(&"run_command".to_string()));
}

#[tokio::test]
async fn hot_device_vetoes_run_command_after_evaluation() {
    let log = call_log();
    let rig = rig(vec![Backend::new("cloud", Script::Succeed)], &log);
    let d = &rig.dispatcher;

    rig.thermal.set(ThermalSnapshot::hot(95.0));
    let eval = d.evaluate_and_adapt().await;
    assert_eq!(eval.mode, OperationalMode::Degraded);

    let err = d
        .execute("run_command", json!({"program": "true"}))
        .await
        .unwrap_err();
    assert!(matches!(err, KestrelError::ContextValidationFailure { .. }), "{err}");
    assert_eq!(d.stats().total_executions, 0);
}

#[tokio::test]
async fn recovery_mode_serves_nothing_and_keeps_local_tools() {
    let log = call_log();
    let rig = rig(
        vec![Backend::new("ollama", Script::Succeed).kind(ProviderKind::LocalDaemon)],
        &log,
    );
    let d = &rig.dispatcher;
    d.force_mode(OperationalMode::Recovery, "operator");

    let env = d.route(RequestContext::new("hi")).await;
    assert!(!env.success);
    assert!(calls(&log).is_empty());
    assert_eq!(d.mode(), OperationalMode::Recovery);

    let status = d.execute("system_status", json!({})).await.unwrap();
    assert!(status.content.contains("recovery"));
}

#[tokio::test]
async fn from_config_skips_bad_providers_and_registers_builtins() {
    let dir = tempfile::tempdir().unwrap();
    let toml = format!(
        r#"
[[providers]]
id = "ollama"
kind = "local_daemon"
options = {{ base_url = "http://127.0.0.1:9/v1", model = "llama3" }}

[[providers]]
id = "broken"
kind = "remote_api"
options = {{ base_url = "https://api.example.com/v1" }}

[mode]
initial_mode = "degraded"

[tools]
working_directory = "{}"
"#,
        dir.path().display()
    );
    let config = KestrelConfig::from_toml_str(&toml).unwrap();

    let d = Dispatcher::from_config(&config).unwrap();
    assert_eq!(d.router().declared_order(), vec!["ollama"]);
    assert_eq!(d.registry().len(), 6);
    assert_eq!(d.mode(), OperationalMode::Degraded);
}
