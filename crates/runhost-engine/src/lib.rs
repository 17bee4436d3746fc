//! # Runhost Engine
//!
//! Execution core of the runhost scripting host.
//!
//! ## Components
//!
//! - [`ExecutionContext`] - one engine session with a staged pipeline,
//!   blocking and cancellable async runs, and its own [`LogAggregator`]
//! - [`ExecutionContextPool`] - bounded set of sessions handing out contexts
//! - [`ExecutionService`] - picks single-context or pooled execution from a
//!   [`HostConfig`](runhost_config::HostConfig)
//! - [`bind_parameters`] - narrows caller parameters to a command signature
//! - [`RhaiEngine`] - the bundled [`ScriptEngine`] backed by Rhai
//!
//! ## Example
//!
//! ```no_run
//! use runhost_config::ConfigBuilder;
//! use runhost_engine::ExecutionService;
//!
//! # fn main() -> runhost_core::Result<()> {
//! let config = ConfigBuilder::new().script("scripts/").build()?;
//! let service = ExecutionService::new(config)?;
//!
//! let context = service.get_execution_context(None)?;
//! let output = context.blocking_lock().run_script("1 + 1")?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod binder;
pub mod context;
pub mod discovery;
pub mod engine;
pub mod log;
pub mod pool;
pub mod registry;
pub mod rhai_engine;
pub mod service;
pub mod testing;

pub use binder::{bind_parameters, ParamType, ParameterSignature, ParameterSpec};
pub use context::{ContextOptions, ExecutionContext};
pub use engine::{
    Diagnostic, DiagnosticStream, EngineSession, PipelineStep, ScriptEngine, SessionInit,
    StopSignal,
};
pub use log::{LogAggregator, LogSink, TracingSink};
pub use pool::ExecutionContextPool;
pub use registry::{CommandArgs, CommandDefinition, CommandRegistry};
pub use rhai_engine::RhaiEngine;
pub use service::{ExecutionService, SharedContext};

/// Prelude with commonly used types
pub mod prelude {
    pub use crate::binder::{ParamType, ParameterSignature};
    pub use crate::context::{ContextOptions, ExecutionContext};
    pub use crate::engine::{ScriptEngine, SessionInit};
    pub use crate::log::{LogSink, TracingSink};
    pub use crate::pool::ExecutionContextPool;
    pub use crate::registry::{CommandDefinition, CommandRegistry};
    pub use crate::service::{ExecutionService, SharedContext};
    pub use runhost_core::{Error, LogMode, Result, Severity, Value};
}
