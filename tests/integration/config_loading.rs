//! Configuration files and router construction from them.

use kestrel::config::ProviderConfig;
use kestrel::{FallbackRouter, KestrelConfig, KestrelError, OperationalMode, ProviderKind};

const SAMPLE: &str = r#"
[router]
failure_threshold = 3

[mode]
initial_mode = "full"
evaluate_interval_secs = 15
thermal_limit_c = 80.0

[tools]
default_max_exec_ms = 5000

[logging]
level = "kestrel=debug"

[[providers]]
id = "proxy"
kind = "credential_proxy"
priority = 10
max_retries = 2
options = { base_url = "https://proxy.internal/v1", model = "gpt-4o-mini" }

[[providers]]
id = "ollama"
kind = "local_daemon"
priority = 20
timeout_ms = 120000
options = { base_url = "http://localhost:11434/v1", model = "llama3:8b", thermal_max_tokens = "128" }

[[providers]]
id = ""
kind = "remote_api"
options = { base_url = "https://api.example.com/v1", model = "x" }

[[providers]]
id = "no-model"
kind = "remote_daemon"
options = { base_url = "http://gpu-box:8000/v1" }
"#;

#[test]
fn loads_all_sections_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let config = KestrelConfig::from_file(&path).unwrap();
    assert_eq!(config.router.failure_threshold, 3);
    assert_eq!(config.mode.initial_mode, OperationalMode::Full);
    assert_eq!(config.mode.evaluate_interval().as_secs(), 15);
    assert_eq!(config.tools.default_max_exec().as_millis(), 5000);
    assert_eq!(config.logging.level, "kestrel=debug");
    assert_eq!(config.providers.len(), 4);

    let ollama = config.providers[1].to_descriptor().unwrap();
    assert_eq!(ollama.kind, ProviderKind::LocalDaemon);
    assert!(ollama.supports_thermal_integration);
    assert_eq!(ollama.timeout.as_secs(), 120);
}

#[test]
fn router_from_config_skips_malformed_entries() {
    let config = KestrelConfig::from_toml_str(SAMPLE).unwrap();
    let router = FallbackRouter::from_config(&config);

    assert_eq!(router.declared_order(), vec!["proxy", "ollama"]);
    assert_eq!(router.health().failure_threshold(), 3);
    assert_eq!(router.handle("proxy").unwrap().descriptor().max_retries, 2);
}

#[test]
fn saved_config_loads_back_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("kestrel.toml");
    let config = KestrelConfig::from_toml_str(SAMPLE).unwrap();

    config.save_to_file(&path).unwrap();
    let reloaded = KestrelConfig::from_file(&path).unwrap();
    assert_eq!(reloaded, config);
}

#[test]
fn invalid_sections_are_rejected() {
    let err = KestrelConfig::from_toml_str("[router]\nfailure_threshold = 0\n").unwrap_err();
    assert!(matches!(err, KestrelError::Configuration(_)));
    assert!(err.message().contains("failure_threshold"));

    let err = KestrelConfig::from_toml_str("[mode]\ninitial_mode = \"turbo\"\n").unwrap_err();
    assert!(matches!(err, KestrelError::Configuration(_)));
}

#[test]
fn missing_file_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = KestrelConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, KestrelError::Configuration(_)));
}

#[test]
fn provider_entry_rejects_zero_timeout() {
    let entry = ProviderConfig {
        id: "p".into(),
        kind: ProviderKind::RemoteApi,
        enabled: true,
        timeout_ms: 0,
        max_retries: 0,
        health_check_interval_secs: 60,
        priority: 100,
        supports_thermal_integration: None,
        options: Default::default(),
    };
    assert!(entry.to_descriptor().is_err());
}
