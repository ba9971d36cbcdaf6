use crate::config::{AppConfig, CliOverrides, FileConfig, PartialLlmConfig, load_project_config};
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn test_load_project_config() {
    let temp_dir = TempDir::new().unwrap();
    let project_root = temp_dir.path();

    let quill_dir = project_root.join(".quill");
    fs::create_dir_all(&quill_dir).unwrap();

    let config_content = r#"
model = "gpt-4o"

[llm]
max_rounds = 4
native_tools = false
tool_choice_rejection_markers = ["no tools here"]
"#;

    fs::write(quill_dir.join("config.toml"), config_content).unwrap();

    let project_cfg = load_project_config(project_root).unwrap();

    assert_eq!(project_cfg.model, Some("gpt-4o".to_string()));
    let llm_cfg = project_cfg.llm.unwrap();
    assert_eq!(llm_cfg.max_rounds, Some(4));
    assert_eq!(llm_cfg.native_tools, Some(false));
    assert_eq!(
        llm_cfg.tool_choice_rejection_markers,
        Some(vec!["no tools here".to_string()])
    );
}

#[test]
fn test_load_project_config_not_exists() {
    let temp_dir = TempDir::new().unwrap();
    let project_cfg = load_project_config(temp_dir.path()).unwrap();
    assert_eq!(project_cfg, FileConfig::default());
}

#[test]
fn test_malformed_project_config_is_ignored() {
    let temp_dir = TempDir::new().unwrap();
    let quill_dir = temp_dir.path().join(".quill");
    fs::create_dir_all(&quill_dir).unwrap();
    fs::write(quill_dir.join("config.toml"), "model = [unterminated").unwrap();
    let project_cfg = load_project_config(temp_dir.path()).unwrap();
    assert_eq!(project_cfg, FileConfig::default());
}

#[test]
fn test_resolution_order() {
    let project = FileConfig {
        model: Some("project-model".into()),
        base_url: Some("http://project".into()),
        llm: Some(PartialLlmConfig {
            max_rounds: Some(3),
            temperature: Some(0.2),
            ..Default::default()
        }),
        ..Default::default()
    };
    let global = FileConfig {
        model: Some("global-model".into()),
        api_key: Some("global-key".into()),
        llm: Some(PartialLlmConfig {
            max_rounds: Some(8),
            request_timeout_ms: Some(1_000),
            ..Default::default()
        }),
        ..Default::default()
    };
    let cli = CliOverrides {
        max_rounds: Some(5),
        ..Default::default()
    };
    let env = env_of(&[("OPENAI_BASE_URL", "http://env"), ("QUILL_NATIVE_TOOLS", "false")]);

    let cfg = AppConfig::merge(cli, env, project, global);
    assert_eq!(cfg.base_url, "http://env");
    assert_eq!(cfg.model, "project-model");
    assert_eq!(cfg.api_key.as_deref(), Some("global-key"));
    assert_eq!(cfg.llm.max_rounds, 5);
    assert_eq!(cfg.llm.temperature, 0.2);
    assert_eq!(cfg.llm.request_timeout_ms, 1_000);
    assert!(!cfg.llm.native_tools);
    assert!(cfg.llm.stream);
}

#[test]
fn test_defaults_when_nothing_is_set() {
    let cfg = AppConfig::merge(
        CliOverrides::default(),
        env_of(&[]),
        FileConfig::default(),
        FileConfig::default(),
    );
    assert_eq!(cfg.base_url, "https://api.openai.com/v1");
    assert_eq!(cfg.model, "gpt-4o-mini");
    assert!(cfg.api_key.is_none());
    assert_eq!(cfg.llm.max_rounds, 10);
    assert_eq!(cfg.llm.request_timeout_ms, 60_000);
    assert!(cfg.llm.native_tools);
    assert!(!cfg.llm.tool_choice_rejection_markers.is_empty());
}
