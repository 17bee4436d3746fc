//! Execution context
//!
//! An [`ExecutionContext`] exclusively owns one engine session, either a
//! private one or one leased from an [`ExecutionContextPool`]. It stages a
//! pipeline of commands and scripts, runs it (blocking or on a background
//! thread with cooperative cancellation) and routes the session's
//! diagnostics into its own [`LogAggregator`].
//!
//! A context is driven by one caller at a time. Once disposed it rejects
//! every operation; owners obtain a fresh one instead.
//!
//! [`ExecutionContextPool`]: crate::pool::ExecutionContextPool

use crate::binder::{bind_parameters, ParameterSignature};
use crate::discovery::resolve_script_sources;
use crate::engine::{
    qualify_variable_name, Diagnostic, DiagnosticStream, EngineSession, PipelineStep,
    ScriptEngine, SessionInit, StopSignal,
};
use crate::log::{LogAggregator, LogSink, TracingSink};
use crate::pool::PoolLease;
use parking_lot::Mutex;
use runhost_core::{Error, LogMode, Result, ScriptEncoding, Severity, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Identity used when the host does not configure one
pub const DEFAULT_HOST_APP: &str = "runhost";

/// Default log field separator
pub const DEFAULT_SEPARATOR: &str = ";";

const RESOURCE: &str = "execution context";

/// Host identity derived from the running executable
pub fn default_host_app() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| DEFAULT_HOST_APP.to_string())
}

/// Session shared with the background thread of an async run
type SessionSlot = Arc<Mutex<Option<Box<dyn EngineSession>>>>;

/// Per-context settings; unset fields fall back to the owner's defaults
#[derive(Clone, Default)]
pub struct ContextOptions {
    /// Log sink
    pub sink: Option<Arc<dyn LogSink>>,
    /// Log emission mode
    pub log_mode: Option<LogMode>,
    /// Log field separator
    pub separator: Option<String>,
    /// Host identity
    pub host_app: Option<String>,
    /// Encoding for file-based scripts
    pub encoding: Option<ScriptEncoding>,
}

impl ContextOptions {
    /// No overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log sink
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the log mode
    pub fn with_log_mode(mut self, mode: LogMode) -> Self {
        self.log_mode = Some(mode);
        self
    }

    /// Set the log field separator
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    /// Set the host identity
    pub fn with_host_app(mut self, host_app: impl Into<String>) -> Self {
        self.host_app = Some(host_app.into());
        self
    }

    /// Set the script file encoding
    pub fn with_encoding(mut self, encoding: ScriptEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Fill unset fields from `defaults`
    pub fn or(self, defaults: &ContextOptions) -> Self {
        Self {
            sink: self.sink.or_else(|| defaults.sink.clone()),
            log_mode: self.log_mode.or(defaults.log_mode),
            separator: self.separator.or_else(|| defaults.separator.clone()),
            host_app: self.host_app.or_else(|| defaults.host_app.clone()),
            encoding: self.encoding.or(defaults.encoding),
        }
    }
}

impl fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextOptions")
            .field("sink", &self.sink.is_some())
            .field("log_mode", &self.log_mode)
            .field("separator", &self.separator)
            .field("host_app", &self.host_app)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// What the session belongs to
enum Binding {
    Private,
    Pooled(PoolLease),
}

/// Flushes the log when a run ends, on every exit path
struct FlushGuard {
    log: Arc<Mutex<LogAggregator>>,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        self.log.lock().flush();
    }
}

/// Raises the stop flag if an async run is abandoned mid-flight
struct StopOnDrop(Option<StopSignal>);

impl StopOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if let Some(stop) = self.0.take() {
            stop.stop();
        }
    }
}

/// One reusable handle to a script engine session
pub struct ExecutionContext {
    slot: SessionSlot,
    stop: StopSignal,
    log: Arc<Mutex<LogAggregator>>,
    pipeline: Vec<PipelineStep>,
    encoding: ScriptEncoding,
    host_app: String,
    restricted: bool,
    language: &'static str,
    binding: Binding,
    disposed: bool,
}

impl ExecutionContext {
    /// Create a context over a private session
    pub fn new(engine: &dyn ScriptEngine, init: &SessionInit, options: ContextOptions) -> Result<Self> {
        let session = engine.open_session(init)?;
        let options = options.or(&ContextOptions::new().with_host_app(init.host_app.clone()));
        Ok(Self::from_session(session, Binding::Private, options, engine.language()))
    }

    pub(crate) fn pooled(
        session: Box<dyn EngineSession>,
        lease: PoolLease,
        options: ContextOptions,
        language: &'static str,
    ) -> Self {
        Self::from_session(session, Binding::Pooled(lease), options, language)
    }

    fn from_session(
        mut session: Box<dyn EngineSession>,
        binding: Binding,
        options: ContextOptions,
        language: &'static str,
    ) -> Self {
        let host_app = options
            .host_app
            .filter(|h| !h.is_empty())
            .unwrap_or_else(default_host_app);
        let sink = options
            .sink
            .unwrap_or_else(|| Arc::new(TracingSink::new(host_app.clone())) as Arc<dyn LogSink>);
        let log = Arc::new(Mutex::new(LogAggregator::new(
            options.log_mode.unwrap_or_default(),
            options
                .separator
                .unwrap_or_else(|| DEFAULT_SEPARATOR.to_string()),
            sink,
        )));

        let events = Arc::clone(&log);
        session.subscribe_diagnostics(Arc::new(move |diagnostic: Diagnostic| {
            events.lock().record(&diagnostic);
        }));

        let stop = session.stop_signal();
        let restricted = session.execution_policy().is_restricted();

        Self {
            slot: Arc::new(Mutex::new(Some(session))),
            stop,
            log,
            pipeline: Vec::new(),
            encoding: options.encoding.unwrap_or_default(),
            host_app,
            restricted,
            language,
            binding,
            disposed: false,
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::disposed(RESOURCE));
        }
        Ok(())
    }

    fn ensure_file_loading(&self, path: &Path) -> Result<()> {
        if self.restricted {
            return Err(Error::Restricted(format!(
                "running script files is not allowed: {}",
                path.display()
            )));
        }
        Ok(())
    }

    fn with_session<T>(&self, f: impl FnOnce(&mut dyn EngineSession) -> Result<T>) -> Result<T> {
        self.ensure_ready()?;
        let mut slot = self.slot.lock();
        match slot.as_deref_mut() {
            Some(session) => f(session),
            None => Err(Error::disposed(RESOURCE)),
        }
    }

    /// Stage a named command
    ///
    /// The command is resolved first; an unknown command fails with
    /// [`Error::CommandNotFound`] and leaves the staged pipeline untouched.
    /// Supplied parameters are narrowed to the command's signature.
    pub fn add_command(
        &mut self,
        name: &str,
        parameters: Option<&HashMap<String, Value>>,
        clear_pipeline: bool,
    ) -> Result<&mut Self> {
        let signature = self
            .with_session(|session| Ok(session.resolve_command(name)))?
            .ok_or_else(|| Error::CommandNotFound(name.to_string()))?;

        let parameters = match parameters {
            Some(parameters) => bind_parameters(&signature, parameters)?,
            None => Vec::new(),
        };

        if clear_pipeline {
            self.pipeline.clear();
        }
        trace!(command = name, parameters = parameters.len(), "Command staged");
        self.pipeline.push(PipelineStep::Command {
            name: name.to_string(),
            parameters,
        });
        Ok(self)
    }

    /// Stage raw script text
    pub fn add_script(&mut self, script: impl Into<String>, clear_pipeline: bool) -> Result<&mut Self> {
        self.ensure_ready()?;
        if clear_pipeline {
            self.pipeline.clear();
        }
        self.pipeline.push(PipelineStep::Script(script.into()));
        Ok(self)
    }

    /// Staged pipeline
    pub fn pipeline(&self) -> &[PipelineStep] {
        &self.pipeline
    }

    /// Discard the staged pipeline
    pub fn clear_pipeline(&mut self) {
        self.pipeline.clear();
    }

    fn begin_run(&self) -> FlushGuard {
        self.stop.reset();
        self.log.lock().clear();
        FlushGuard {
            log: Arc::clone(&self.log),
        }
    }

    /// Record an engine failure as an error diagnostic before it is returned
    fn finish(&self, result: Result<Vec<Value>>) -> Result<Vec<Value>> {
        if let Err(e) = &result {
            if !e.is_cancelled() && !e.is_disposed() {
                let diagnostic = Diagnostic::new(DiagnosticStream::Error, e.to_string())
                    .with_position(e.position().map(str::to_string));
                self.log.lock().record(&diagnostic);
            }
        }
        result
    }

    /// Run the staged pipeline, blocking the caller
    pub fn run(&mut self) -> Result<Vec<Value>> {
        self.ensure_ready()?;
        let _flush = self.begin_run();

        let result = {
            let mut slot = self.slot.lock();
            match slot.as_deref_mut() {
                Some(session) => session.invoke(&self.pipeline),
                None => Err(Error::disposed(RESOURCE)),
            }
        };

        self.finish(result)
    }

    /// Run the staged pipeline on a blocking worker thread
    ///
    /// If `cancel` fires first the pipeline is stopped and awaited before
    /// [`Error::Cancelled`] is returned, so nothing keeps running on the
    /// session once this returns. A pipeline that completes regardless
    /// returns its output.
    pub async fn run_async(&mut self, cancel: &CancellationToken) -> Result<Vec<Value>> {
        self.ensure_ready()?;
        let _flush = self.begin_run();

        if cancel.is_cancelled() {
            return self.finish(Err(Error::Cancelled));
        }

        let slot = Arc::clone(&self.slot);
        let pipeline = self.pipeline.clone();
        let abandon = StopOnDrop(Some(self.stop.clone()));

        let mut task = tokio::task::spawn_blocking(move || {
            let mut slot = slot.lock();
            match slot.as_deref_mut() {
                Some(session) => session.invoke(&pipeline),
                None => Err(Error::disposed(RESOURCE)),
            }
        });

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.stop.stop();
                match (&mut task).await {
                    // finished before the stop was observed
                    Ok(Ok(output)) => Ok(output),
                    _ => {
                        debug!(host_app = %self.host_app, "Pipeline stopped on cancellation");
                        Err(Error::Cancelled)
                    }
                }
            }
            joined = &mut task => joined
                .unwrap_or_else(|e| Err(Error::Internal(format!("Pipeline worker failed: {e}")))),
        };

        abandon.disarm();
        self.stop.reset();
        self.finish(result)
    }

    /// Stage a single command (clearing the pipeline) and run it
    pub fn run_command(
        &mut self,
        name: &str,
        parameters: Option<&HashMap<String, Value>>,
    ) -> Result<Vec<Value>> {
        self.add_command(name, parameters, true)?;
        self.run()
    }

    /// Async [`ExecutionContext::run_command`]
    pub async fn run_command_async(
        &mut self,
        name: &str,
        parameters: Option<&HashMap<String, Value>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        self.add_command(name, parameters, true)?;
        self.run_async(cancel).await
    }

    /// Stage a single script (clearing the pipeline) and run it
    pub fn run_script(&mut self, script: impl Into<String>) -> Result<Vec<Value>> {
        self.add_script(script, true)?;
        self.run()
    }

    /// Async [`ExecutionContext::run_script`]
    pub async fn run_script_async(
        &mut self,
        script: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        self.add_script(script, true)?;
        self.run_async(cancel).await
    }

    /// Read a script file and run it; `encoding` overrides the context default
    pub fn run_script_from_file(
        &mut self,
        path: impl AsRef<Path>,
        encoding: Option<ScriptEncoding>,
    ) -> Result<Vec<Value>> {
        let path = path.as_ref();
        self.ensure_ready()?;
        self.ensure_file_loading(path)?;
        let script = encoding.unwrap_or(self.encoding).read_to_string(path)?;
        self.run_script(script)
    }

    /// Async [`ExecutionContext::run_script_from_file`]
    pub async fn run_script_from_file_async(
        &mut self,
        path: impl AsRef<Path>,
        encoding: Option<ScriptEncoding>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        let path = path.as_ref();
        self.ensure_ready()?;
        self.ensure_file_loading(path)?;
        let bytes = tokio::fs::read(path).await?;
        let script = encoding.unwrap_or(self.encoding).decode(&bytes)?;
        self.run_script_async(script, cancel).await
    }

    /// Run several script files as one pipeline, in order
    pub fn run_script_from_files(&mut self, paths: &[PathBuf]) -> Result<Vec<Value>> {
        self.stage_files(paths)?;
        self.run()
    }

    /// Async [`ExecutionContext::run_script_from_files`]
    pub async fn run_script_from_files_async(
        &mut self,
        paths: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        self.ensure_ready()?;
        let mut scripts = Vec::with_capacity(paths.len());
        for path in paths {
            self.ensure_file_loading(path)?;
            let bytes = tokio::fs::read(path).await?;
            scripts.push(self.encoding.decode(&bytes)?);
        }
        self.stage_scripts(scripts)?;
        self.run_async(cancel).await
    }

    /// Run every file matching `pattern` under `path` (down to `depth` levels)
    pub fn run_script_from_path(
        &mut self,
        path: impl AsRef<Path>,
        pattern: &str,
        depth: usize,
    ) -> Result<Vec<Value>> {
        let files = resolve_script_sources(&[path.as_ref().to_path_buf()], pattern, depth)?;
        self.run_script_from_files(&files)
    }

    /// Async [`ExecutionContext::run_script_from_path`]
    pub async fn run_script_from_path_async(
        &mut self,
        path: impl AsRef<Path>,
        pattern: &str,
        depth: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        let root = path.as_ref().to_path_buf();
        let pattern = pattern.to_string();
        let files = tokio::task::spawn_blocking(move || resolve_script_sources(&[root], &pattern, depth))
            .await
            .map_err(|e| Error::Internal(format!("Script discovery failed: {e}")))??;
        self.run_script_from_files_async(&files, cancel).await
    }

    fn stage_files(&mut self, paths: &[PathBuf]) -> Result<()> {
        self.ensure_ready()?;
        let mut scripts = Vec::with_capacity(paths.len());
        for path in paths {
            self.ensure_file_loading(path)?;
            scripts.push(self.encoding.read_to_string(path)?);
        }
        self.stage_scripts(scripts)
    }

    fn stage_scripts(&mut self, scripts: Vec<String>) -> Result<()> {
        if scripts.is_empty() {
            return Err(Error::validation("No script files to run"));
        }
        self.pipeline.clear();
        self.pipeline
            .extend(scripts.into_iter().map(PipelineStep::Script));
        Ok(())
    }

    /// Write a variable; `global` qualifies the name into the global scope
    pub fn set_variable(
        &mut self,
        name: &str,
        value: Value,
        constant: bool,
        global: bool,
    ) -> Result<()> {
        let name = if global {
            qualify_variable_name(name)
        } else {
            name.to_string()
        };
        self.with_session(|session| session.set_variable(&name, value, constant))
    }

    /// Read a variable
    pub fn get_variable(&self, name: &str) -> Result<Option<Value>> {
        self.with_session(|session| session.get_variable(name))
    }

    /// Import a module under its own namespace
    ///
    /// Names containing whitespace are rejected before the engine is touched.
    pub fn load_module(&mut self, name: &str) -> Result<()> {
        validate_module_name(name)?;
        self.with_session(|session| session.import_module(name))
    }

    /// Async [`ExecutionContext::load_module`], importing on a worker thread
    pub async fn load_module_async(&mut self, name: &str) -> Result<()> {
        validate_module_name(name)?;
        self.ensure_ready()?;

        let slot = Arc::clone(&self.slot);
        let name = name.to_string();
        tokio::task::spawn_blocking(move || {
            let mut slot = slot.lock();
            match slot.as_deref_mut() {
                Some(session) => session.import_module(&name),
                None => Err(Error::disposed(RESOURCE)),
            }
        })
        .await
        .map_err(|e| Error::Internal(format!("Module import failed: {e}")))?
    }

    /// Declared parameters of a command, if it resolves
    pub fn parameters_of(&self, command: &str) -> Result<Option<ParameterSignature>> {
        self.with_session(|session| Ok(session.resolve_command(command)))
    }

    /// Whether `command` resolves and declares `parameter` (ignoring case)
    pub fn contains_parameter(&self, command: &str, parameter: &str) -> Result<bool> {
        Ok(self
            .parameters_of(command)?
            .map(|signature| signature.contains(parameter))
            .unwrap_or(false))
    }

    /// Every resolvable command with its signature
    pub fn functions(&self) -> Result<Vec<(String, ParameterSignature)>> {
        self.with_session(|session| Ok(session.commands()))
    }

    /// Log buffer of the last run
    pub fn log(&self) -> String {
        self.log.lock().buffer().to_string()
    }

    /// Worst severity of the last run
    pub fn max_severity(&self) -> Severity {
        self.log.lock().max_severity()
    }

    /// Log emission mode
    pub fn log_mode(&self) -> LogMode {
        self.log.lock().mode()
    }

    /// Host identity
    pub fn host_app(&self) -> &str {
        &self.host_app
    }

    /// Encoding used for file-based scripts
    pub fn encoding(&self) -> ScriptEncoding {
        self.encoding
    }

    /// Whether the session runs under the restricted policy
    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    /// Whether the session is leased from a pool
    pub fn is_pooled(&self) -> bool {
        matches!(self.binding, Binding::Pooled(_))
    }

    /// Scripting language of the session
    pub fn language(&self) -> &'static str {
        self.language
    }

    /// Whether the context was disposed or its pool closed
    pub fn is_disposed(&self) -> bool {
        match &self.binding {
            _ if self.disposed => true,
            Binding::Pooled(lease) => lease.is_closed(),
            Binding::Private => false,
        }
    }

    /// Release the session; pooled sessions go back to their pool
    ///
    /// Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.stop.stop();
        self.pipeline.clear();

        let session = self.slot.lock().take();
        match std::mem::replace(&mut self.binding, Binding::Private) {
            Binding::Pooled(lease) => {
                if let Some(session) = session {
                    session.stop_signal().reset();
                    lease.release(session);
                }
            }
            Binding::Private => drop(session),
        }

        debug!(host_app = %self.host_app, "Execution context disposed");
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("host_app", &self.host_app)
            .field("language", &self.language)
            .field("pooled", &self.is_pooled())
            .field("staged", &self.pipeline.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn validate_module_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("Module name cannot be empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(Error::validation(format!(
            "Module name cannot contain whitespace: '{name}'"
        )));
    }
    Ok(())
}
