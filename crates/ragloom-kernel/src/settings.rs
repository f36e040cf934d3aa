//! Typed settings tree.
//!
//! Every section is `#[serde(default)]`, so a file only needs the keys it
//! overrides.

use serde::{Deserialize, Serialize};

/// Root settings for the toolkit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagloomSettings {
    pub workflow: WorkflowSettings,
    pub parser: ParserSettings,
    pub extractors: ExtractorSettings,
    pub memory: MemorySettings,
    pub callbacks: CallbackSettings,
    pub logging: LoggingSettings,
}

/// Workflow engine tunables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Concurrent handler invocations per run; `None` means one per logical core.
    pub num_workers: Option<usize>,
    /// Wall-clock deadline per run in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Default retry policy applied to steps that do not set their own.
    pub retry: Option<RetrySettings>,
}

/// Serializable form of a step retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

/// Node parser tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub paragraph_separator: String,
    pub include_metadata: bool,
    pub include_prev_next_rel: bool,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            chunk_overlap: 200,
            paragraph_separator: "\n\n\n".to_string(),
            include_metadata: true,
            include_prev_next_rel: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorSettings {
    pub num_workers: usize,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self { num_workers: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub token_limit: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self { token_limit: 3000 }
    }
}

/// Callback manager tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackSettings {
    /// Trace id started implicitly when an event arrives outside any trace.
    pub default_trace_id: String,
    /// Id of the synthetic root of every trace tree.
    pub root_event_id: String,
    /// Event kinds that never become parents (wire names, e.g. `"llm"`).
    pub leaf_events: Vec<String>,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            default_trace_id: "llama-index".to_string(),
            root_event_id: "root".to_string(),
            leaf_events: vec![
                "chunking".to_string(),
                "llm".to_string(),
                "embedding".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging bootstrap settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
