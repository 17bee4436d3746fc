//! Host command registry
//!
//! Native commands are supplied explicitly by the embedding application and
//! registered into every session the engine opens.

use crate::binder::{ParamType, ParameterSignature};
use runhost_core::{Error, Result, Value};
use std::fmt;
use std::sync::Arc;

/// Arguments passed to a native command, keyed by declared parameter name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandArgs {
    values: Vec<(String, Value)>,
}

impl CommandArgs {
    /// Build from `(name, value)` pairs
    pub fn new(values: Vec<(String, Value)>) -> Self {
        Self { values }
    }

    /// Argument by name (ignoring case); unbound parameters read as `Null`
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// String argument by name
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// All arguments in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Native command implementation
pub type CommandHandler = Arc<dyn Fn(&CommandArgs) -> Result<Value> + Send + Sync>;

/// A named native command with a typed signature
#[derive(Clone)]
pub struct CommandDefinition {
    name: String,
    signature: ParameterSignature,
    handler: CommandHandler,
}

impl CommandDefinition {
    /// Create a command with no parameters
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CommandArgs) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            signature: ParameterSignature::new(),
            handler: Arc::new(handler),
        }
    }

    /// Declare a parameter
    pub fn param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.signature = self.signature.with(name, ty);
        self
    }

    /// Command name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters
    pub fn signature(&self) -> &ParameterSignature {
        &self.signature
    }

    /// Invoke the handler
    pub fn call(&self, args: &CommandArgs) -> Result<Value> {
        (self.handler)(args)
    }
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

/// Set of native commands shared by every session
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: Vec<CommandDefinition>,
}

impl CommandRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command
    pub fn register(&mut self, command: CommandDefinition) -> Result<()> {
        if !is_identifier(&command.name) {
            return Err(Error::validation(format!(
                "Invalid command name: '{}'",
                command.name
            )));
        }
        if self.get(&command.name).is_some() {
            return Err(Error::validation(format!(
                "Command '{}' is already registered",
                command.name
            )));
        }
        self.commands.push(command);
        Ok(())
    }

    /// Register a command, builder style
    pub fn with(mut self, command: CommandDefinition) -> Result<Self> {
        self.register(command)?;
        Ok(self)
    }

    /// Command by exact name
    pub fn get(&self, name: &str) -> Option<&CommandDefinition> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// All registered commands
    pub fn iter(&self) -> impl Iterator<Item = &CommandDefinition> {
        self.commands.iter()
    }

    /// Number of registered commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Whether `name` is a plain script identifier
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_call() {
        let registry = CommandRegistry::new()
            .with(
                CommandDefinition::new("greet", |args| {
                    Ok(json!(format!("hello {}", args.get_str("name").unwrap_or("?"))))
                })
                .param("name", ParamType::String),
            )
            .unwrap();

        let command = registry.get("greet").unwrap();
        assert_eq!(command.signature().len(), 1);

        let args = CommandArgs::new(vec![("name".to_string(), json!("ops"))]);
        assert_eq!(command.call(&args).unwrap(), json!("hello ops"));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = CommandRegistry::new();
        registry
            .register(CommandDefinition::new("noop", |_| Ok(Value::Null)))
            .unwrap();
        assert!(registry
            .register(CommandDefinition::new("noop", |_| Ok(Value::Null)))
            .is_err());
    }

    #[test]
    fn test_invalid_names() {
        let mut registry = CommandRegistry::new();
        for name in ["", "1abc", "get-item", "a b"] {
            assert!(registry
                .register(CommandDefinition::new(name, |_| Ok(Value::Null)))
                .is_err());
        }
    }

    #[test]
    fn test_args_case_insensitive() {
        let args = CommandArgs::new(vec![("Name".to_string(), json!("x"))]);
        assert_eq!(args.get("NAME"), Some(&json!("x")));
        assert_eq!(args.get("other"), None);
    }
}
