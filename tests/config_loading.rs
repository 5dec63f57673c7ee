use std::io::Write;

use stepwise_core::config::{AppConfig, UnknownToolPolicy};
use stepwise_core::error::StepwiseError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
max_steps = 12
max_duration_secs = 30

[agent]
instructions = "Answer with numbers only."
unknown_tool_policy = "error_turn"
default_session = "main"

[model]
provider = "openai"
model_id = "gpt-4o-mini"
api_key = "sk-test-key"
base_url = "http://localhost:11434/v1"
max_tokens = 1024
temperature = 0.2

[model.retry]
max_retries = 2
initial_backoff_ms = 10

[[fallback_models]]
model_id = "gpt-4o"

[gateway]
bind = "0.0.0.0:9999"

[log]
log_dir = "/tmp/stepwise-logs"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_steps, 12);
    assert_eq!(config.engine.max_duration_secs, Some(30));
    assert_eq!(config.agent.instructions, "Answer with numbers only.");
    assert_eq!(config.agent.unknown_tool_policy, UnknownToolPolicy::ErrorTurn);
    assert_eq!(config.agent.default_session, "main");
    assert_eq!(config.model.model_id, "gpt-4o-mini");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, Some(1024));

    let retry = config.model.retry.expect("retry section");
    assert_eq!(retry.max_retries, 2);
    assert_eq!(retry.initial_backoff_ms, 10);
    assert_eq!(retry.max_backoff_ms, 30000);

    assert_eq!(config.fallback_models.len(), 1);
    assert_eq!(config.fallback_models[0].provider, "openai");
    assert_eq!(config.gateway.expect("gateway").bind, "0.0.0.0:9999");

    let log = config.log.expect("log section");
    assert!(log.enabled);
    assert_eq!(log.dir(), std::path::PathBuf::from("/tmp/stepwise-logs"));
}

#[test]
fn test_env_var_expansion_in_file() {
    std::env::set_var("STEPWISE_IT_API_KEY", "sk-from-env");
    let tmp = stepwise_test_utils::temp_config_file(
        r#"
[model]
model_id = "gpt-4o-mini"
api_key = "${STEPWISE_IT_API_KEY}"
"#,
    );
    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.model.api_key.as_deref(), Some("sk-from-env"));
    std::env::remove_var("STEPWISE_IT_API_KEY");
}

#[test]
fn test_missing_file_reports_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.toml");
    let err = AppConfig::load(&path).unwrap_err();
    match err {
        StepwiseError::ConfigNotFound(p) => assert!(p.ends_with("absent.toml")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_invalid_toml_rejected() {
    let tmp = stepwise_test_utils::temp_config_file("[model\nmodel_id = ");
    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, StepwiseError::Config(_)));
}

#[test]
fn test_config_serializes_back_to_toml() {
    let config = stepwise_test_utils::test_config();
    let text = toml::to_string_pretty(&config).expect("serialize");
    let reparsed = AppConfig::from_toml(&text).expect("reparse");
    assert_eq!(reparsed.model.model_id, "test-model");
    assert_eq!(reparsed.engine.max_steps, config.engine.max_steps);
}
