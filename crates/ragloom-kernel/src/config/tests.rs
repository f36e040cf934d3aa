//! Loader tests across formats, env substitution and settings defaults.

use super::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn create_test_file(dir: &TempDir, filename: &str, content: &str) -> PathBuf {
    let path = dir.path().join(filename);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_detect_format() {
    assert_eq!(detect_format("ragloom.yaml").unwrap(), FileFormat::Yaml);
    assert_eq!(detect_format("ragloom.yml").unwrap(), FileFormat::Yaml);
    assert_eq!(detect_format("ragloom.toml").unwrap(), FileFormat::Toml);
    assert_eq!(detect_format("ragloom.json").unwrap(), FileFormat::Json);
    assert_eq!(detect_format("ragloom.ini").unwrap(), FileFormat::Ini);
    assert_eq!(detect_format("ragloom.ron").unwrap(), FileFormat::Ron);
    assert_eq!(detect_format("ragloom.json5").unwrap(), FileFormat::Json5);
    assert!(detect_format("ragloom.txt").is_err());
    assert!(detect_format("ragloom").is_err());
}

#[test]
fn unsupported_format_report_carries_path() {
    let report = detect_format("settings.xml").unwrap_err();
    let rendered = format!("{report:?}");
    assert!(rendered.contains("xml"));
    assert!(rendered.contains("settings.xml"));
}

#[test]
fn empty_source_yields_defaults() {
    let settings: RagloomSettings = load_config_from_str("{}", FileFormat::Json).unwrap();
    assert_eq!(settings, RagloomSettings::default());
    assert_eq!(settings.parser.chunk_size, 1024);
    assert_eq!(settings.parser.chunk_overlap, 200);
    assert_eq!(settings.extractors.num_workers, 4);
    assert_eq!(settings.memory.token_limit, 3000);
    assert_eq!(settings.callbacks.default_trace_id, "llama-index");
    assert_eq!(settings.callbacks.root_event_id, "root");
    assert_eq!(
        settings.callbacks.leaf_events,
        vec!["chunking", "llm", "embedding"]
    );
}

#[test]
fn toml_overrides_only_given_keys() {
    let toml = r#"
[parser]
chunk_size = 512
chunk_overlap = 64

[workflow]
num_workers = 2
timeout_ms = 5000

[logging]
format = "json"
"#;
    let settings: RagloomSettings = load_config_from_str(toml, FileFormat::Toml).unwrap();
    assert_eq!(settings.parser.chunk_size, 512);
    assert_eq!(settings.parser.chunk_overlap, 64);
    assert!(settings.parser.include_prev_next_rel);
    assert_eq!(settings.workflow.num_workers, Some(2));
    assert_eq!(settings.workflow.timeout_ms, Some(5000));
    assert_eq!(settings.logging.format, LogFormat::Json);
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn yaml_file_with_env_substitution() {
    // SAFETY: test-local variable name, not read elsewhere.
    unsafe { std::env::set_var("RAGLOOM_TEST_TRACE_ID", "ingest") };

    let temp_dir = TempDir::new().unwrap();
    let yaml = r#"
callbacks:
  default_trace_id: ${RAGLOOM_TEST_TRACE_ID}
  leaf_events: [llm]
memory:
  token_limit: 128
"#;
    let path = create_test_file(&temp_dir, "ragloom.yml", yaml);
    let settings: RagloomSettings = load_config(path.to_str().unwrap()).unwrap();

    assert_eq!(settings.callbacks.default_trace_id, "ingest");
    assert_eq!(settings.callbacks.leaf_events, vec!["llm"]);
    assert_eq!(settings.memory.token_limit, 128);

    unsafe { std::env::remove_var("RAGLOOM_TEST_TRACE_ID") };
}

#[test]
fn unknown_env_vars_are_left_untouched() {
    let out = substitute_env_vars("a: ${RAGLOOM_SURELY_UNSET_VAR} b: $RAGLOOM_ALSO_UNSET");
    assert_eq!(out, "a: ${RAGLOOM_SURELY_UNSET_VAR} b: $RAGLOOM_ALSO_UNSET");
}

#[test]
fn merge_later_sources_win() {
    let base = r#"{ "parser": { "chunk_size": 256, "chunk_overlap": 32 } }"#;
    let overlay = r#"{ "parser": { "chunk_overlap": 16 } }"#;

    let settings: RagloomSettings =
        merge_configs(&[(base, FileFormat::Json), (overlay, FileFormat::Json)]).unwrap();
    assert_eq!(settings.parser.chunk_size, 256);
    assert_eq!(settings.parser.chunk_overlap, 16);
}

#[test]
fn missing_file_is_io_error() {
    let report = load_config::<RagloomSettings>("/definitely/not/here/ragloom.toml").unwrap_err();
    assert!(matches!(report.current_context(), ConfigError::Io(_)));
}

#[test]
fn config_error_converts_to_kernel_error() {
    let err: crate::error::KernelError = ConfigError::UnsupportedFormat("xml".into()).into();
    assert_eq!(err.kind(), crate::error::ErrorKind::ConfigInvalid);
    assert!(err.to_string().contains("xml"));
}

#[test]
fn rendered_settings_load_back() {
    let mut settings = RagloomSettings::default();
    settings.parser.chunk_size = 512;
    settings.memory.token_limit = 99;
    for format in [FileFormat::Yaml, FileFormat::Toml, FileFormat::Json] {
        let text = render_config(&settings, format).unwrap();
        let loaded: RagloomSettings = load_config_from_str(&text, format).unwrap();
        assert_eq!(loaded, settings);
    }
}

#[test]
fn ini_cannot_be_rendered() {
    let report = render_config(&RagloomSettings::default(), FileFormat::Ini).unwrap_err();
    assert!(matches!(report.current_context(), ConfigError::UnsupportedFormat(_)));
}
