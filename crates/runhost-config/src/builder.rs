//! Configuration builder

use crate::types::{EngineLimits, HostConfig};
use runhost_core::{ExecutionPolicy, LogMode, Result, ScriptEncoding, Value};
use std::collections::HashMap;
use std::path::PathBuf;

/// Builder for constructing configuration programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: HostConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script file or directory
    pub fn script(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.scripts.push(path.into());
        self
    }

    /// Set the maximum concurrency
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max;
        self
    }

    /// Add a string parameter
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.parameters.insert(name.into(), value.into());
        self
    }

    /// Add an arbitrary-valued parameter
    pub fn object_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.config.object_parameters.insert(name.into(), value);
        self
    }

    /// Set the log separator
    pub fn log_separator(mut self, separator: impl Into<String>) -> Self {
        self.config.log_separator = separator.into();
        self
    }

    /// Set the log mode
    pub fn log_mode(mut self, mode: LogMode) -> Self {
        self.config.log_mode = mode;
        self
    }

    /// Set the directory glob and recursion depth
    pub fn script_pattern(mut self, pattern: impl Into<String>, depth: usize) -> Self {
        self.config.script_pattern = pattern.into();
        self.config.search_depth = depth;
        self
    }

    /// Set the execution policy
    pub fn execution_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.config.execution_policy = policy;
        self
    }

    /// Set the script file encoding
    pub fn encoding(mut self, encoding: ScriptEncoding) -> Self {
        self.config.encoding = encoding;
        self
    }

    /// Set the host identity
    pub fn host_app(mut self, host_app: impl Into<String>) -> Self {
        self.config.host_app = Some(host_app.into());
        self
    }

    /// Set engine limits
    pub fn limits(mut self, limits: EngineLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Set the init hook
    pub fn init<F>(mut self, init: F) -> Self
    where
        F: Fn(&mut HashMap<String, Value>) + Send + Sync + 'static,
    {
        self.config = self.config.with_init(init);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<HostConfig> {
        crate::validator::validate_config(&self.config)?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .max_concurrency(4)
            .parameter("!Stage", "prod")
            .log_mode(LogMode::Direct)
            .host_app("orders")
            .build()
            .unwrap();

        assert!(config.is_pool());
        assert_eq!(config.parameters["!Stage"], "prod");
        assert_eq!(config.log_mode, LogMode::Direct);
        assert_eq!(config.host_app.as_deref(), Some("orders"));
    }

    #[test]
    fn test_builder_rejects_out_of_range_concurrency() {
        assert!(ConfigBuilder::new().max_concurrency(0).build().is_err());
        assert!(ConfigBuilder::new().max_concurrency(65).build().is_err());
    }
}
