//! Rhai script engine implementation

use crate::binder::ParameterSignature;
use crate::engine::{
    strip_scope_qualifier, Diagnostic, DiagnosticHandler, DiagnosticStream, EngineSession,
    PipelineStep, ScriptEngine, SessionInit, StopSignal, HOST_APP_VARIABLE,
};
use crate::registry::{is_identifier, CommandArgs, CommandRegistry};
use parking_lot::RwLock;
use rhai::{Dynamic, Engine, EvalAltResult, Module, Position, Scope, AST};
use runhost_core::{Error, ExecutionPolicy, Result, ScriptEncoding, Value};
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Variable holding the previous pipeline step's output
const INPUT_VARIABLE: &str = "input";

/// Prefix of the temporary variables carrying command arguments
const ARG_PREFIX: &str = "runhost_arg_";

/// File extension of module scripts
const MODULE_EXTENSION: &str = "rhai";

type DiagnosticSlot = Arc<RwLock<Option<DiagnosticHandler>>>;

/// Rhai engine factory
///
/// Every session gets its own `rhai::Engine` with the diagnostic functions,
/// the registered host commands and a stop hook installed.
#[derive(Debug, Clone, Default)]
pub struct RhaiEngine {
    registry: CommandRegistry,
}

impl RhaiEngine {
    /// Create an engine without host commands
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine exposing the given host commands
    pub fn with_registry(registry: CommandRegistry) -> Self {
        Self { registry }
    }

    /// Registered host commands
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    fn build_engine(&self, init: &SessionInit, slot: &DiagnosticSlot, stop: &StopSignal) -> Engine {
        let mut engine = Engine::new();

        engine.set_max_operations(init.limits.max_operations);
        engine.set_max_string_size(init.limits.max_string_size);
        engine.set_max_call_levels(init.limits.max_call_levels);

        if init.policy.is_restricted() {
            engine.disable_symbol("eval");
        }

        register_diagnostics(&mut engine, slot);
        register_commands(&mut engine, &self.registry);

        // seeded constants cannot be shadowed by `let`/`const` at run time
        #[allow(deprecated)]
        engine.on_def_var(|is_runtime, info, context| {
            Ok(!is_runtime || context.scope().is_constant(info.name()) != Some(true))
        });

        let stop = stop.clone();
        engine.on_progress(move |_| {
            if stop.is_stopped() {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        engine
    }
}

impl ScriptEngine for RhaiEngine {
    fn language(&self) -> &'static str {
        "rhai"
    }

    fn open_session(&self, init: &SessionInit) -> Result<Box<dyn EngineSession>> {
        Ok(Box::new(RhaiSession::open(self, init)?))
    }
}

/// Script output functions, one per diagnostic stream
fn register_diagnostics(engine: &mut Engine, slot: &DiagnosticSlot) {
    const STREAMS: [(&str, DiagnosticStream); 5] = [
        ("write_verbose", DiagnosticStream::Verbose),
        ("write_debug", DiagnosticStream::Debug),
        ("write_information", DiagnosticStream::Information),
        ("write_warning", DiagnosticStream::Warning),
        ("write_error", DiagnosticStream::Error),
    ];

    for (name, stream) in STREAMS {
        let slot = Arc::clone(slot);
        engine.register_fn(name, move |message: Dynamic| {
            emit(&slot, Diagnostic::new(stream, message.to_string()));
        });
    }

    let print_slot = Arc::clone(slot);
    engine.on_print(move |text| {
        emit(&print_slot, Diagnostic::new(DiagnosticStream::Information, text));
    });

    let debug_slot = Arc::clone(slot);
    engine.on_debug(move |text, _source, pos| {
        emit(
            &debug_slot,
            Diagnostic::new(DiagnosticStream::Debug, text).with_position(position_text(pos)),
        );
    });
}

fn register_commands(engine: &mut Engine, registry: &CommandRegistry) {
    for command in registry.iter() {
        let name = command.name().to_string();
        let arg_types = vec![TypeId::of::<Dynamic>(); command.signature().len()];
        let param_names: Vec<String> = command.signature().iter().map(|p| p.name.clone()).collect();
        let command = command.clone();

        engine.register_raw_fn(name, arg_types, move |_context, args| {
            let mut values = Vec::with_capacity(args.len());
            for (param, arg) in param_names.iter().zip(args.iter()) {
                let value: Value = rhai::serde::from_dynamic(&**arg)?;
                values.push((param.clone(), value));
            }

            let output = command
                .call(&CommandArgs::new(values))
                .map_err(|e| -> Box<EvalAltResult> { e.to_string().into() })?;
            let output: Dynamic = rhai::serde::to_dynamic(output)?;
            Ok(output)
        });
    }
}

fn emit(slot: &DiagnosticSlot, diagnostic: Diagnostic) {
    let handler = slot.read().clone();
    if let Some(handler) = handler {
        handler(diagnostic);
    }
}

fn position_text(pos: Position) -> Option<String> {
    if pos.is_none() {
        None
    } else {
        Some(pos.to_string())
    }
}

fn map_eval_error(err: Box<EvalAltResult>) -> Error {
    match *err {
        EvalAltResult::ErrorTerminated(..) => Error::Cancelled,
        EvalAltResult::ErrorForbiddenVariable(ref name, _) => {
            Error::VariableReadOnly(name.clone())
        }
        ref other => Error::Execution {
            message: other.to_string(),
            position: position_text(other.position()),
        },
    }
}

/// Split step output into pipeline items: arrays flatten, unit is empty
fn into_items(output: Dynamic) -> Vec<Dynamic> {
    if output.is_unit() {
        Vec::new()
    } else if output.is_array() {
        output.into_array().unwrap_or_default()
    } else {
        vec![output]
    }
}

/// Longest overload of `name` defined in `ast`
fn function_signature(ast: &AST, name: &str) -> Option<ParameterSignature> {
    ast.iter_functions()
        .filter(|f| f.name == name)
        .max_by_key(|f| f.params.len())
        .map(|f| ParameterSignature::untyped(f.params.iter().copied()))
}

fn function_signatures(ast: &AST, prefix: &str, out: &mut BTreeMap<String, ParameterSignature>) {
    for f in ast.iter_functions() {
        let name = format!("{prefix}{}", f.name);
        let signature = ParameterSignature::untyped(f.params.iter().copied());
        match out.get(&name) {
            Some(existing) if existing.len() >= signature.len() => {}
            _ => {
                out.insert(name, signature);
            }
        }
    }
}

/// `name` or `namespace::name`
fn is_command_name(name: &str) -> bool {
    match name.split_once("::") {
        Some((namespace, function)) => is_identifier(namespace) && is_identifier(function),
        None => is_identifier(name),
    }
}

/// One Rhai engine with its persistent scope and accumulated functions
pub struct RhaiSession {
    engine: Engine,
    scope: Scope<'static>,
    functions: AST,
    modules: HashMap<String, AST>,
    registry: CommandRegistry,
    policy: ExecutionPolicy,
    encoding: ScriptEncoding,
    module_paths: Vec<PathBuf>,
    diagnostics: DiagnosticSlot,
    stop: StopSignal,
}

impl RhaiSession {
    fn open(owner: &RhaiEngine, init: &SessionInit) -> Result<Self> {
        let diagnostics: DiagnosticSlot = Arc::new(RwLock::new(None));
        let stop = StopSignal::new();
        let engine = owner.build_engine(init, &diagnostics, &stop);

        let mut session = Self {
            engine,
            scope: Scope::new(),
            functions: AST::empty(),
            modules: HashMap::new(),
            registry: owner.registry.clone(),
            policy: init.policy,
            encoding: init.encoding,
            module_paths: init.module_paths.clone(),
            diagnostics,
            stop,
        };

        for module in &init.modules {
            session.preload(module)?;
        }

        for variable in &init.variables {
            session.set_variable(&variable.name, variable.value.clone(), variable.constant)?;
        }

        if session.scope.is_constant(HOST_APP_VARIABLE).is_none() {
            session.set_variable(
                HOST_APP_VARIABLE,
                Value::String(init.host_app.clone()),
                true,
            )?;
        }

        debug!(
            modules = init.modules.len(),
            variables = init.variables.len(),
            policy = ?init.policy,
            "Rhai session opened"
        );

        Ok(session)
    }

    /// Merge a module file's functions into the global namespace
    fn preload(&mut self, path: &Path) -> Result<()> {
        let text = self.encoding.read_to_string(path)?;
        let ast = self.compile(&text).map_err(|e| match e {
            Error::Parse { message, position } => Error::Parse {
                message: format!("{}: {message}", path.display()),
                position,
            },
            other => other,
        })?;
        self.functions = self.functions.merge(&ast.clone_functions_only());
        trace!(module = %path.display(), "Module functions imported");
        Ok(())
    }

    fn compile(&self, script: &str) -> Result<AST> {
        self.engine.compile(script).map_err(|e| Error::Parse {
            message: e.to_string(),
            position: position_text(e.position()),
        })
    }

    fn eval(&mut self, ast: &AST) -> Result<Dynamic> {
        let combined = self.functions.merge(ast);
        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut self.scope, &combined)
            .map_err(map_eval_error)
    }

    fn run_script(&mut self, text: &str, input: Vec<Dynamic>) -> Result<Vec<Dynamic>> {
        let ast = self.compile(text)?;
        self.scope.set_or_push(INPUT_VARIABLE, input);

        let mark = self.scope.len();
        let output = self.eval(&ast);
        self.compact_scope(mark);

        let output = output?;
        self.functions = self.functions.merge(&ast.clone_functions_only());

        Ok(into_items(output))
    }

    /// Fold variables declared past `mark` into existing entries of the same name
    ///
    /// Rhai pushes a fresh scope entry for every top-level `let`, even when
    /// the name already exists.
    fn compact_scope(&mut self, mark: usize) {
        if self.scope.len() <= mark {
            return;
        }

        let declared: Vec<(String, bool, Dynamic)> = self
            .scope
            .iter()
            .skip(mark)
            .map(|(name, constant, value)| (name.to_string(), constant, value))
            .collect();
        self.scope.rewind(mark);

        for (name, constant, value) in declared {
            match self.scope.is_constant(&name) {
                Some(false) if !constant => {
                    if let Some(existing) = self.scope.get_mut(&name) {
                        *existing = value;
                    }
                }
                _ if constant => {
                    self.scope.push_constant_dynamic(name, value);
                }
                _ => {
                    self.scope.push_dynamic(name, value);
                }
            }
        }
    }

    fn run_command(&mut self, name: &str, parameters: &[(String, Value)]) -> Result<Vec<Dynamic>> {
        let signature = self
            .resolve_command(name)
            .ok_or_else(|| Error::CommandNotFound(name.to_string()))?;

        let mut args = Vec::with_capacity(signature.len());
        for param in signature.iter() {
            let arg = match parameters
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(&param.name))
            {
                Some((_, value)) => rhai::serde::to_dynamic(value).map_err(map_eval_error)?,
                None => Dynamic::UNIT,
            };
            args.push(arg);
        }

        let arg_names: Vec<String> = (0..args.len()).map(|i| format!("{ARG_PREFIX}{i}")).collect();
        let ast = self.compile(&format!("{name}({})", arg_names.join(", ")))?;

        let mark = self.scope.len();
        for (arg_name, arg) in arg_names.into_iter().zip(args) {
            self.scope.push_dynamic(arg_name, arg);
        }
        let output = self.eval(&ast);
        self.scope.rewind(mark);

        Ok(into_items(output?))
    }

    fn find_module(&self, name: &str) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.is_file() {
            return Some(direct.to_path_buf());
        }

        self.module_paths
            .iter()
            .map(|dir| dir.join(format!("{name}.{MODULE_EXTENSION}")))
            .find(|candidate| candidate.is_file())
    }
}

impl EngineSession for RhaiSession {
    fn resolve_command(&self, name: &str) -> Option<ParameterSignature> {
        if !is_command_name(name) {
            return None;
        }

        if let Some(command) = self.registry.get(name) {
            return Some(command.signature().clone());
        }

        match name.split_once("::") {
            Some((namespace, function)) => self
                .modules
                .get(namespace)
                .and_then(|ast| function_signature(ast, function)),
            None => function_signature(&self.functions, name),
        }
    }

    fn commands(&self) -> Vec<(String, ParameterSignature)> {
        let mut all = BTreeMap::new();

        function_signatures(&self.functions, "", &mut all);
        for (namespace, ast) in &self.modules {
            function_signatures(ast, &format!("{namespace}::"), &mut all);
        }
        for command in self.registry.iter() {
            all.insert(command.name().to_string(), command.signature().clone());
        }

        all.into_iter().collect()
    }

    fn invoke(&mut self, pipeline: &[PipelineStep]) -> Result<Vec<Value>> {
        let mut items: Vec<Dynamic> = Vec::new();

        for step in pipeline {
            if self.stop.is_stopped() {
                return Err(Error::Cancelled);
            }

            let output = match step {
                PipelineStep::Script(text) => self.run_script(text, items),
                PipelineStep::Command { name, parameters } => self.run_command(name, parameters),
            };

            items = match output {
                Ok(items) => items,
                Err(_) if self.stop.is_stopped() => return Err(Error::Cancelled),
                Err(e) => return Err(e),
            };
        }

        items
            .iter()
            .map(|item| {
                rhai::serde::from_dynamic::<Value>(item)
                    .map_err(|e| Error::execution(format!("Unsupported pipeline output: {e}")))
            })
            .collect()
    }

    fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    fn subscribe_diagnostics(&mut self, handler: DiagnosticHandler) {
        *self.diagnostics.write() = Some(handler);
    }

    fn set_variable(&mut self, name: &str, value: Value, constant: bool) -> Result<()> {
        let name = strip_scope_qualifier(name);
        if !is_identifier(name) {
            return Err(Error::validation(format!("Invalid variable name: '{name}'")));
        }

        let value = rhai::serde::to_dynamic(&value).map_err(map_eval_error)?;

        match self.scope.is_constant(name) {
            Some(true) => Err(Error::VariableReadOnly(name.to_string())),
            Some(false) if constant => Err(Error::validation(format!(
                "Existing variable '{name}' cannot be made constant"
            ))),
            Some(false) => {
                self.scope.set_or_push(name.to_string(), value);
                Ok(())
            }
            None if constant => {
                self.scope.push_constant_dynamic(name.to_string(), value);
                Ok(())
            }
            None => {
                self.scope.push_dynamic(name.to_string(), value);
                Ok(())
            }
        }
    }

    fn get_variable(&self, name: &str) -> Result<Option<Value>> {
        let name = strip_scope_qualifier(name);
        match self.scope.get_value::<Dynamic>(name) {
            Some(value) => Ok(Some(
                rhai::serde::from_dynamic::<Value>(&value).map_err(map_eval_error)?,
            )),
            None => Ok(None),
        }
    }

    fn import_module(&mut self, name: &str) -> Result<()> {
        if self.policy.is_restricted() {
            return Err(Error::Restricted(format!(
                "importing module '{name}' is not allowed"
            )));
        }

        let path = self
            .find_module(name)
            .ok_or_else(|| Error::validation(format!("Module '{name}' was not found")))?;
        let namespace = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| is_identifier(stem))
            .ok_or_else(|| {
                Error::validation(format!("Module file name is not an identifier: {}", path.display()))
            })?
            .to_string();

        let text = self.encoding.read_to_string(&path)?;
        let ast = self.compile(&text)?;
        let module = Module::eval_ast_as_new(Scope::new(), &ast, &self.engine)
            .map_err(map_eval_error)?;

        self.engine
            .register_static_module(namespace.as_str(), module.into());
        self.modules.insert(namespace.clone(), ast);

        emit(
            &self.diagnostics,
            Diagnostic::new(
                DiagnosticStream::Verbose,
                format!("Imported module '{namespace}' from {}", path.display()),
            ),
        );
        Ok(())
    }

    fn execution_policy(&self) -> ExecutionPolicy {
        self.policy
    }
}

impl fmt::Debug for RhaiSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhaiSession")
            .field("variables", &self.scope.len())
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish()
    }
}
