//! # Runhost Configuration
//!
//! Configuration management with support for:
//! - Multiple formats (YAML, TOML, JSON)
//! - Environment variable expansion (`${VAR}`, `${VAR:-default}`)
//! - Layered files merged in order
//! - Validation
//! - Default values

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod builder;
pub mod loader;
pub mod merger;
pub mod types;
pub mod validator;

pub use builder::ConfigBuilder;
pub use loader::{load_and_merge, load_config, load_from_file, load_from_str, ConfigFormat};
pub use merger::merge_configs;
pub use types::{EngineLimits, HostConfig, InitHook, MAX_CONCURRENCY, MIN_CONCURRENCY};
pub use validator::{validate_concurrency, validate_config};
