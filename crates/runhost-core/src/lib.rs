//! # Runhost Core
//!
//! Shared building blocks for the runhost scripting host:
//!
//! - The [`Error`] taxonomy used by every crate in the workspace
//! - Diagnostic [`Severity`] levels and the [`LogMode`] emission policy
//! - Session-level enums ([`ExecutionPolicy`], [`ScriptEncoding`])

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ExecutionPolicy, LogMode, ScriptEncoding, Severity, Value};

/// Prelude with commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{ExecutionPolicy, LogMode, ScriptEncoding, Severity, Value};
}
