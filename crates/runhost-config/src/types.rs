//! Configuration types

use runhost_core::{Error, ExecutionPolicy, LogMode, Result, ScriptEncoding, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Lower bound for `max_concurrency`
pub const MIN_CONCURRENCY: usize = 1;

/// Upper bound for `max_concurrency`
pub const MAX_CONCURRENCY: usize = 64;

/// Hook invoked once with the object parameter map before sessions are opened
pub type InitHook = Arc<dyn Fn(&mut HashMap<String, Value>) + Send + Sync>;

/// Host configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Script files and/or directories of script files to pre-import
    #[serde(default)]
    pub scripts: Vec<PathBuf>,

    /// Maximum concurrently active contexts (1 = single shared context)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// String-valued session variables (`!name` = constant)
    #[serde(default)]
    pub parameters: HashMap<String, String>,

    /// Arbitrary-valued session variables (`!name` = constant)
    #[serde(default)]
    pub object_parameters: HashMap<String, Value>,

    /// Field separator for buffered log lines
    #[serde(default = "default_log_separator")]
    pub log_separator: String,

    /// Diagnostic emission policy
    #[serde(default)]
    pub log_mode: LogMode,

    /// Filename glob used when expanding script directories
    #[serde(default = "default_script_pattern")]
    pub script_pattern: String,

    /// Directory recursion depth (1 = top level only)
    #[serde(default = "default_search_depth")]
    pub search_depth: usize,

    /// Execution policy for every session
    #[serde(default)]
    pub execution_policy: ExecutionPolicy,

    /// Encoding of script files on disk
    #[serde(default)]
    pub encoding: ScriptEncoding,

    /// Host identity exposed to scripts as `HostApp`
    #[serde(default)]
    pub host_app: Option<String>,

    /// Engine resource limits
    #[serde(default)]
    pub limits: EngineLimits,

    /// Late seeding of non-string parameters
    #[serde(skip)]
    pub init: Option<InitHook>,
}

impl HostConfig {
    /// Whether the host runs a bounded pool instead of a single context
    pub fn is_pool(&self) -> bool {
        self.max_concurrency > 1
    }

    /// Run the init hook (if any) against the object parameters
    pub fn run_init(&mut self) {
        if let Some(init) = self.init.clone() {
            init(&mut self.object_parameters);
        }
    }

    /// Merge string and object parameters into one map
    ///
    /// A key may only appear in one of the two maps.
    pub fn merged_parameters(&self) -> Result<HashMap<String, Value>> {
        let mut merged: HashMap<String, Value> = self
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        for (key, value) in &self.object_parameters {
            if merged.contains_key(key) {
                return Err(Error::Config(format!(
                    "Parameter '{key}' is defined in both parameters and object_parameters"
                )));
            }
            merged.insert(key.clone(), value.clone());
        }

        Ok(merged)
    }

    /// Set the init hook
    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: Fn(&mut HashMap<String, Value>) + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            scripts: Vec::new(),
            max_concurrency: default_max_concurrency(),
            parameters: HashMap::new(),
            object_parameters: HashMap::new(),
            log_separator: default_log_separator(),
            log_mode: LogMode::default(),
            script_pattern: default_script_pattern(),
            search_depth: default_search_depth(),
            execution_policy: ExecutionPolicy::default(),
            encoding: ScriptEncoding::default(),
            host_app: None,
            limits: EngineLimits::default(),
            init: None,
        }
    }
}

impl fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostConfig")
            .field("scripts", &self.scripts)
            .field("max_concurrency", &self.max_concurrency)
            .field("parameters", &self.parameters.keys().collect::<Vec<_>>())
            .field(
                "object_parameters",
                &self.object_parameters.keys().collect::<Vec<_>>(),
            )
            .field("log_separator", &self.log_separator)
            .field("log_mode", &self.log_mode)
            .field("script_pattern", &self.script_pattern)
            .field("search_depth", &self.search_depth)
            .field("execution_policy", &self.execution_policy)
            .field("encoding", &self.encoding)
            .field("host_app", &self.host_app)
            .field("limits", &self.limits)
            .field("init", &self.init.is_some())
            .finish()
    }
}

/// Resource limits applied to each engine session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineLimits {
    /// Maximum operations per run (0 = unlimited)
    #[serde(default)]
    pub max_operations: u64,

    /// Maximum string length in bytes (0 = unlimited)
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,

    /// Maximum function call nesting
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_string_size: default_max_string_size(),
            max_call_levels: default_max_call_levels(),
        }
    }
}

fn default_max_concurrency() -> usize {
    1
}

fn default_log_separator() -> String {
    ";".to_string()
}

fn default_script_pattern() -> String {
    "*.rhai".to_string()
}

fn default_search_depth() -> usize {
    1
}

fn default_max_string_size() -> usize {
    10 * 1024 * 1024
}

fn default_max_call_levels() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.max_concurrency, 1);
        assert!(!config.is_pool());
        assert_eq!(config.log_separator, ";");
        assert_eq!(config.log_mode, LogMode::Bulk);
        assert_eq!(config.script_pattern, "*.rhai");
        assert_eq!(config.search_depth, 1);
    }

    #[test]
    fn test_merged_parameters() {
        let mut config = HostConfig::default();
        config.parameters.insert("Name".to_string(), "svc".to_string());
        config
            .object_parameters
            .insert("Retries".to_string(), serde_json::json!(3));

        let merged = config.merged_parameters().unwrap();
        assert_eq!(merged["Name"], serde_json::json!("svc"));
        assert_eq!(merged["Retries"], serde_json::json!(3));
    }

    #[test]
    fn test_merged_parameters_duplicate_key() {
        let mut config = HostConfig::default();
        config.parameters.insert("Name".to_string(), "a".to_string());
        config
            .object_parameters
            .insert("Name".to_string(), serde_json::json!("b"));

        assert!(config.merged_parameters().is_err());
    }

    #[test]
    fn test_init_hook_seeds_object_parameters() {
        let mut config = HostConfig::default().with_init(|params| {
            params.insert("Seeded".to_string(), serde_json::json!({"a": 1}));
        });
        config.run_init();
        assert_eq!(config.object_parameters["Seeded"]["a"], serde_json::json!(1));
    }
}
