//! One settings file drives every configurable component.

use ragloom_foundation::callbacks::CallbackManager;
use ragloom_foundation::extractors::ExtractorCore;
use ragloom_foundation::memory::TokenBufferMemory;
use ragloom_foundation::node_parser::SentenceSplitter;
use ragloom_foundation::workflow::Workflow;
use ragloom_kernel::config::{FileFormat, RagloomSettings, load_config, load_config_from_str};
use ragloom_kernel::error::ErrorKind;
use std::fs;
use tempfile::TempDir;

const SETTINGS: &str = r#"
[workflow]
num_workers = 2
timeout_ms = 1500

[workflow.retry]
max_retries = 5

[parser]
chunk_size = 256
chunk_overlap = 32

[extractors]
num_workers = 8

[memory]
token_limit = 64

[callbacks]
leaf_events = ["llm", "embedding"]
"#;

fn load(dir: &TempDir) -> RagloomSettings {
    let path = dir.path().join("ragloom.toml");
    fs::write(&path, SETTINGS).unwrap();
    load_config(path.to_str().unwrap()).unwrap()
}

#[test]
fn components_follow_the_loaded_file() {
    let dir = TempDir::new().unwrap();
    let settings = load(&dir);

    let splitter = SentenceSplitter::from_settings(&settings.parser).unwrap();
    assert_eq!(splitter.chunk_size(), 256);
    assert_eq!(splitter.chunk_overlap(), 32);

    let workflow = Workflow::from_settings("configured", &settings.workflow);
    assert_eq!(workflow.num_workers(), 2);

    assert_eq!(ExtractorCore::from_settings(&settings.extractors).num_workers(), 8);
    assert_eq!(TokenBufferMemory::from_settings(&settings.memory).token_limit(), 64);

    let manager = CallbackManager::from_settings(&settings.callbacks).unwrap();
    assert!(!manager.is_leaf(ragloom_kernel::callbacks::CBEventType::Chunking));
    assert!(manager.is_leaf(ragloom_kernel::callbacks::CBEventType::Llm));
}

#[test]
fn unspecified_sections_keep_defaults() {
    let dir = TempDir::new().unwrap();
    let settings = load(&dir);
    assert_eq!(settings.logging, RagloomSettings::default().logging);
    assert_eq!(settings.callbacks.root_event_id, "root");
    let retry = settings.workflow.retry.unwrap();
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_delay_ms, 100);
}

#[test]
fn invalid_values_surface_as_config_invalid() {
    let settings: RagloomSettings = load_config_from_str(
        r#"{"parser": {"chunk_size": 10, "chunk_overlap": 10}, "callbacks": {"leaf_events": ["nope"]}}"#,
        FileFormat::Json,
    )
    .unwrap();
    let err = SentenceSplitter::from_settings(&settings.parser).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    let err = CallbackManager::from_settings(&settings.callbacks).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
}
