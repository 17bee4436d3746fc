//! Script engine capability traits
//!
//! The execution core only talks to an engine through [`ScriptEngine`]
//! (opening sessions) and [`EngineSession`] (resolving commands, invoking
//! pipelines, emitting diagnostics). Nothing above this module knows which
//! scripting language is underneath.

use crate::binder::ParameterSignature;
use chrono::{DateTime, Local};
use runhost_config::EngineLimits;
use runhost_core::{ExecutionPolicy, Result, ScriptEncoding, Severity, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Prefix marking a seeded parameter as a constant variable
pub const CONSTANT_MARKER: char = '!';

/// Name of the constant variable holding the host identity
pub const HOST_APP_VARIABLE: &str = "HostApp";

/// Scope qualifier for session-wide variables
pub const GLOBAL_QUALIFIER: &str = "global:";

/// Prefix `name` with the global scope qualifier unless it already has it
pub fn qualify_variable_name(name: &str) -> String {
    if strip_scope_qualifier(name).len() == name.len() {
        format!("{GLOBAL_QUALIFIER}{name}")
    } else {
        name.to_string()
    }
}

/// Strip a leading global scope qualifier (case-insensitive)
pub fn strip_scope_qualifier(name: &str) -> &str {
    match name.get(..GLOBAL_QUALIFIER.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(GLOBAL_QUALIFIER) => {
            &name[GLOBAL_QUALIFIER.len()..]
        }
        _ => name,
    }
}

/// Diagnostic stream a message was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticStream {
    /// Verbose output
    Verbose,
    /// Debug output
    Debug,
    /// Informational output
    Information,
    /// Warnings
    Warning,
    /// Errors
    Error,
}

impl DiagnosticStream {
    /// Severity assigned to messages on this stream
    pub fn severity(&self) -> Severity {
        match self {
            Self::Verbose => Severity::Trace,
            Self::Debug => Severity::Debug,
            Self::Information => Severity::Information,
            Self::Warning => Severity::Warning,
            Self::Error => Severity::Error,
        }
    }
}

/// One diagnostic event produced by the engine
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// When the event was produced
    pub timestamp: DateTime<Local>,
    /// Originating stream
    pub stream: DiagnosticStream,
    /// Message text
    pub message: String,
    /// Source position text (error records only)
    pub position: Option<String>,
}

impl Diagnostic {
    /// Create a diagnostic stamped with the current time
    pub fn new(stream: DiagnosticStream, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            stream,
            message: message.into(),
            position: None,
        }
    }

    /// Attach source position text
    pub fn with_position(mut self, position: Option<String>) -> Self {
        self.position = position.filter(|p| !p.is_empty());
        self
    }

    /// Severity of this event
    pub fn severity(&self) -> Severity {
        self.stream.severity()
    }
}

/// Callback receiving diagnostics as the engine emits them
pub type DiagnosticHandler = Arc<dyn Fn(Diagnostic) + Send + Sync>;

/// Cooperative stop flag shared between a session and its owner
///
/// The engine polls the flag between operations; once raised, the running
/// pipeline aborts with [`runhost_core::Error::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    /// Create a lowered stop flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Lower the flag
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Whether the flag is raised
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One staged element of a pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStep {
    /// Raw script text
    Script(String),
    /// Named command with already-bound parameters (declared names, declared order)
    Command {
        /// Command name
        name: String,
        /// Bound parameters
        parameters: Vec<(String, Value)>,
    },
}

/// Variable seeded into every new session
#[derive(Debug, Clone, PartialEq)]
pub struct VariableEntry {
    /// Variable name
    pub name: String,
    /// Initial value
    pub value: Value,
    /// Read-only
    pub constant: bool,
}

impl VariableEntry {
    /// Parse a parameter key; a leading `!` marks the variable constant
    pub fn from_parameter(key: &str, value: Value) -> Self {
        match key.strip_prefix(CONSTANT_MARKER) {
            Some(name) => Self {
                name: name.to_string(),
                value,
                constant: true,
            },
            None => Self {
                name: key.to_string(),
                value,
                constant: false,
            },
        }
    }
}

/// Initial state applied to every session an engine opens
#[derive(Debug, Clone, Default)]
pub struct SessionInit {
    /// Execution policy
    pub policy: ExecutionPolicy,
    /// Script files whose functions are pre-imported into the global namespace
    pub modules: Vec<PathBuf>,
    /// Directories searched by [`EngineSession::import_module`]
    pub module_paths: Vec<PathBuf>,
    /// Seeded variables
    pub variables: Vec<VariableEntry>,
    /// Host identity stored in the constant `HostApp` variable
    pub host_app: String,
    /// Encoding used for module files
    pub encoding: ScriptEncoding,
    /// Resource limits
    pub limits: EngineLimits,
}

impl SessionInit {
    /// Create initial state with the given policy and host identity
    pub fn new(policy: ExecutionPolicy, host_app: impl Into<String>) -> Self {
        Self {
            policy,
            host_app: host_app.into(),
            ..Default::default()
        }
    }

    /// Add modules to pre-import
    pub fn with_modules(mut self, modules: impl IntoIterator<Item = PathBuf>) -> Self {
        self.modules.extend(modules);
        self
    }

    /// Add module search directories
    pub fn with_module_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.module_paths.extend(paths);
        self
    }

    /// Seed variables from a parameter map (`!name` = constant)
    pub fn with_parameters(mut self, parameters: &HashMap<String, Value>) -> Self {
        let mut keys: Vec<&String> = parameters.keys().collect();
        keys.sort();
        for key in keys {
            self.variables
                .push(VariableEntry::from_parameter(key, parameters[key].clone()));
        }
        self
    }

    /// Set the module file encoding
    pub fn with_encoding(mut self, encoding: ScriptEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set resource limits
    pub fn with_limits(mut self, limits: EngineLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// One live engine instance with its own variable scope
///
/// A session is driven by exactly one caller at a time; concurrency comes
/// from holding several sessions, never from sharing one.
pub trait EngineSession: Send {
    /// Declared parameters of a command, or `None` if it cannot be resolved
    fn resolve_command(&self, name: &str) -> Option<ParameterSignature>;

    /// Every resolvable command with its signature, sorted by name
    fn commands(&self) -> Vec<(String, ParameterSignature)>;

    /// Execute the staged pipeline and return the final step's output
    fn invoke(&mut self, pipeline: &[PipelineStep]) -> Result<Vec<Value>>;

    /// Flag observed by [`EngineSession::invoke`] between operations
    fn stop_signal(&self) -> StopSignal;

    /// Route diagnostics to `handler`, replacing any previous handler
    fn subscribe_diagnostics(&mut self, handler: DiagnosticHandler);

    /// Write a session variable
    fn set_variable(&mut self, name: &str, value: Value, constant: bool) -> Result<()>;

    /// Read a session variable
    fn get_variable(&self, name: &str) -> Result<Option<Value>>;

    /// Import a named module under its own namespace
    fn import_module(&mut self, name: &str) -> Result<()>;

    /// Policy this session was opened with
    fn execution_policy(&self) -> ExecutionPolicy;
}

/// Factory for engine sessions
pub trait ScriptEngine: Send + Sync + fmt::Debug {
    /// Name of the scripting language
    fn language(&self) -> &'static str;

    /// Open a new session seeded with `init`
    fn open_session(&self, init: &SessionInit) -> Result<Box<dyn EngineSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_severity_mapping() {
        assert_eq!(DiagnosticStream::Verbose.severity(), Severity::Trace);
        assert_eq!(DiagnosticStream::Debug.severity(), Severity::Debug);
        assert_eq!(DiagnosticStream::Information.severity(), Severity::Information);
        assert_eq!(DiagnosticStream::Warning.severity(), Severity::Warning);
        assert_eq!(DiagnosticStream::Error.severity(), Severity::Error);
    }

    #[test]
    fn test_constant_marker() {
        let constant = VariableEntry::from_parameter("!Stage", json!("prod"));
        assert_eq!(constant.name, "Stage");
        assert!(constant.constant);

        let mutable = VariableEntry::from_parameter("Region", json!("eu"));
        assert_eq!(mutable.name, "Region");
        assert!(!mutable.constant);
    }

    #[test]
    fn test_session_init_parameters_sorted() {
        let mut params = HashMap::new();
        params.insert("b".to_string(), json!(2));
        params.insert("!a".to_string(), json!(1));

        let init = SessionInit::new(ExecutionPolicy::Unrestricted, "host").with_parameters(&params);
        assert_eq!(init.variables.len(), 2);
        assert_eq!(init.variables[0].name, "a");
        assert!(init.variables[0].constant);
    }

    #[test]
    fn test_stop_signal_shared() {
        let signal = StopSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_stopped());
        signal.stop();
        assert!(observer.is_stopped());
        signal.reset();
        assert!(!observer.is_stopped());
    }

    #[test]
    fn test_scope_qualifier() {
        assert_eq!(qualify_variable_name("Retries"), "global:Retries");
        assert_eq!(qualify_variable_name("Global:Retries"), "Global:Retries");
        assert_eq!(strip_scope_qualifier("GLOBAL:x"), "x");
        assert_eq!(strip_scope_qualifier("x"), "x");
    }

    #[test]
    fn test_empty_position_dropped() {
        let diag = Diagnostic::new(DiagnosticStream::Error, "boom").with_position(Some(String::new()));
        assert!(diag.position.is_none());
    }
}
