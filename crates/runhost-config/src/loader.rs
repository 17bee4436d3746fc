//! Configuration loading

use crate::types::HostConfig;
use regex::Regex;
use runhost_core::{Error, Result};
use std::env;
use std::fs;
use std::path::Path;

/// Configuration file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.yaml` / `.yml`
    Yaml,
    /// `.toml`
    Toml,
    /// `.json`
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension, ignoring case
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| {
                Error::Config(format!(
                    "Config file has no extension: {}",
                    path.display()
                ))
            })?;

        match ext.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            _ => Err(Error::Config(format!("Unsupported config format: {ext}"))),
        }
    }
}

/// Load configuration from a file
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<HostConfig> {
    let path = path.as_ref();

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    let format = ConfigFormat::from_path(path)?;

    load_from_str(&content, format)
}

/// Expand environment variables in configuration string
/// Supports syntax: ${VAR} and ${VAR:-default}
fn expand_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}")
        .map_err(|e| Error::Config(format!("Invalid regex: {e}")))?;

    let mut result = String::with_capacity(content.len());
    let mut last_match = 0;

    for cap in re.captures_iter(content) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let var_name = var_name.as_str();
        let default_value = cap.get(3).map(|m| m.as_str());

        let value = match (env::var(var_name), default_value) {
            (Ok(val), _) => val,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                return Err(Error::Config(format!(
                    "Environment variable '{var_name}' not set and no default provided"
                )));
            }
        };

        result.push_str(&content[last_match..full_match.start()]);
        result.push_str(&value);
        last_match = full_match.end();
    }

    result.push_str(&content[last_match..]);

    Ok(result)
}

/// Load configuration from a string
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<HostConfig> {
    let expanded_content = expand_env_vars(content)?;

    let config = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {e}")))?,
        ConfigFormat::Toml => toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {e}")))?,
        ConfigFormat::Json => serde_json::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse JSON: {e}")))?,
    };

    Ok(config)
}

/// Load and validate a configuration file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<HostConfig> {
    let config = load_from_file(path)?;
    crate::validator::validate_config(&config)?;
    Ok(config)
}

/// Load and merge multiple configuration files
///
/// Files are merged in order, with later files overriding earlier ones,
/// so a shared base file can be refined per deployment.
pub fn load_and_merge<P: AsRef<Path>>(paths: Vec<P>) -> Result<HostConfig> {
    if paths.is_empty() {
        return Err(Error::Config("No configuration files provided".to_string()));
    }

    let mut configs = Vec::with_capacity(paths.len());
    for path in paths {
        configs.push(load_from_file(path)?);
    }

    let merged = crate::merger::merge_configs(configs)?;
    crate::validator::validate_config(&merged)?;

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use runhost_core::LogMode;
    use std::io::Write;

    const YAML_CONFIG: &str = r#"
scripts:
  - "./scripts"
  - "./extra/helpers.rhai"
max_concurrency: 4
parameters:
  "!Environment": "production"
  Region: "eu-west-1"
object_parameters:
  Limits:
    cpu: 2
log_separator: "|"
log_mode: "direct"
"#;

    #[test]
    fn test_load_yaml() {
        let config = load_from_str(YAML_CONFIG, ConfigFormat::Yaml).unwrap();

        assert_eq!(config.scripts.len(), 2);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.parameters["!Environment"], "production");
        assert_eq!(config.object_parameters["Limits"]["cpu"], serde_json::json!(2));
        assert_eq!(config.log_separator, "|");
        assert_eq!(config.log_mode, LogMode::Direct);
    }

    #[test]
    fn test_load_toml() {
        let content = r#"
scripts = ["a.rhai"]
max_concurrency = 2
execution_policy = "restricted"
"#;
        let config = load_from_str(content, ConfigFormat::Toml).unwrap();
        assert_eq!(config.max_concurrency, 2);
        assert!(config.execution_policy.is_restricted());
    }

    #[test]
    fn test_invalid_yaml() {
        let invalid = "scripts: [yaml";
        let result = load_from_str(invalid, ConfigFormat::Yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_env_var_with_default() {
        env::remove_var("RUNHOST_UNDEFINED_VAR");

        let content = r#"
host_app: "${RUNHOST_UNDEFINED_VAR:-billing}"
"#;
        let config = load_from_str(content, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.host_app.as_deref(), Some("billing"));
    }

    #[test]
    fn test_env_var_override_default() {
        env::set_var("RUNHOST_OVERRIDE_VAR", "orders");

        let content = r#"
host_app: "${RUNHOST_OVERRIDE_VAR:-billing}"
"#;
        let config = load_from_str(content, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.host_app.as_deref(), Some("orders"));

        env::remove_var("RUNHOST_OVERRIDE_VAR");
    }

    #[test]
    fn test_missing_env_var_no_default() {
        env::remove_var("RUNHOST_MISSING_VAR");

        let result = load_from_str("host_app: \"${RUNHOST_MISSING_VAR}\"", ConfigFormat::Yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("RUNHOST_MISSING_VAR"));
    }

    #[test]
    fn test_multiple_env_vars() {
        env::set_var("RUNHOST_DIR", "/opt/scripts");
        env::set_var("RUNHOST_FILE", "init.rhai");

        let expanded = expand_env_vars("${RUNHOST_DIR}/${RUNHOST_FILE}").unwrap();
        assert_eq!(expanded, "/opt/scripts/init.rhai");

        env::remove_var("RUNHOST_DIR");
        env::remove_var("RUNHOST_FILE");
    }

    #[test]
    fn test_format_follows_extension() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("runhost.YML")).unwrap(),
            ConfigFormat::Yaml
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("hosts/prod.toml")).unwrap(),
            ConfigFormat::Toml
        );
        assert!(ConfigFormat::from_path(Path::new("scripts/deploy.rhai")).is_err());
        assert!(ConfigFormat::from_path(Path::new("runhost")).is_err());
    }

    #[test]
    fn test_load_json_object_parameters() {
        let content = r#"{"object_parameters": {"Ports": [80, 443]}, "encoding": "latin1"}"#;
        let config = load_from_str(content, ConfigFormat::Json).unwrap();
        assert_eq!(
            config.object_parameters["Ports"],
            serde_json::json!([80, 443])
        );
    }

    #[test]
    fn test_load_config_validates() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "max_concurrency: 65").unwrap();

        let result = load_config(file.path());
        assert!(result.is_err());
    }
}
