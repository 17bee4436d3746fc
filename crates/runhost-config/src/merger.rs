//! Configuration file merging
//!
//! Later files override earlier files, allowing layered configuration:
//! - base.yaml (shared script sources and defaults)
//! - environment.yaml (concurrency, log mode)
//! - local.yaml (developer overrides)

use crate::types::HostConfig;
use runhost_core::{Error, Result};

/// Merge multiple configurations together
///
/// Scalars from later configs win. Script lists are concatenated without
/// duplicates and parameter maps are merged key by key.
pub fn merge_configs(configs: Vec<HostConfig>) -> Result<HostConfig> {
    let mut configs = configs.into_iter();
    let mut result = configs
        .next()
        .ok_or_else(|| Error::Config("No configurations to merge".to_string()))?;

    for config in configs {
        result = merge_two_configs(result, config);
    }

    Ok(result)
}

fn merge_two_configs(mut base: HostConfig, overlay: HostConfig) -> HostConfig {
    for script in overlay.scripts {
        if !base.scripts.contains(&script) {
            base.scripts.push(script);
        }
    }

    base.parameters.extend(overlay.parameters);
    base.object_parameters.extend(overlay.object_parameters);

    base.max_concurrency = overlay.max_concurrency;
    base.log_separator = overlay.log_separator;
    base.log_mode = overlay.log_mode;
    base.script_pattern = overlay.script_pattern;
    base.search_depth = overlay.search_depth;
    base.execution_policy = overlay.execution_policy;
    base.encoding = overlay.encoding;
    base.host_app = overlay.host_app.or(base.host_app);
    base.limits = overlay.limits;
    base.init = overlay.init.or(base.init);

    base
}
