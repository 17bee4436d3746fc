//! Configuration validation

use crate::types::{HostConfig, MAX_CONCURRENCY, MIN_CONCURRENCY};
use runhost_core::{Error, Result};

/// Validate configuration
pub fn validate_config(config: &HostConfig) -> Result<()> {
    validate_concurrency(config.max_concurrency)?;
    validate_sources(config)?;
    validate_parameters(config)?;
    validate_limits(config)?;

    Ok(())
}

/// Check a concurrency bound against the supported `1..=64` range
pub fn validate_concurrency(max_concurrency: usize) -> Result<()> {
    if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&max_concurrency) {
        return Err(Error::validation(format!(
            "max_concurrency must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}, got {max_concurrency}"
        )));
    }
    Ok(())
}

fn validate_sources(config: &HostConfig) -> Result<()> {
    if config.script_pattern.trim().is_empty() {
        return Err(Error::Config("script_pattern cannot be empty".to_string()));
    }

    if config.search_depth == 0 {
        return Err(Error::Config("search_depth must be >= 1".to_string()));
    }

    for script in &config.scripts {
        if script.as_os_str().is_empty() {
            return Err(Error::Config("script path cannot be empty".to_string()));
        }
        if !script.exists() {
            tracing::warn!(path = %script.display(), "Configured script source does not exist");
        }
    }

    Ok(())
}

fn validate_parameters(config: &HostConfig) -> Result<()> {
    config.merged_parameters()?;

    for key in config
        .parameters
        .keys()
        .chain(config.object_parameters.keys())
    {
        let name = key.strip_prefix('!').unwrap_or(key);
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!("Invalid parameter name: '{key}'")));
        }
    }

    Ok(())
}

fn validate_limits(config: &HostConfig) -> Result<()> {
    if config.limits.max_call_levels == 0 {
        return Err(Error::Config("limits.max_call_levels must be > 0".to_string()));
    }
    Ok(())
}
