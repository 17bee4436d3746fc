//! Execution service
//!
//! Front door for hosts: resolves the configured script sources, then backs
//! every request with either one long-lived context (`max_concurrency == 1`)
//! or a pool sized `1..=max_concurrency`.

use crate::context::{default_host_app, ContextOptions, ExecutionContext};
use crate::discovery::{module_search_paths, resolve_script_sources};
use crate::engine::{ScriptEngine, SessionInit};
use crate::log::LogSink;
use crate::pool::ExecutionContextPool;
use crate::registry::CommandRegistry;
use crate::rhai_engine::RhaiEngine;
use runhost_config::{validate_config, HostConfig};
use runhost_core::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Context handle returned by the service
///
/// Single mode hands out the same context on every call; callers in that
/// mode must not run it from two places at once.
pub type SharedContext = Arc<tokio::sync::Mutex<ExecutionContext>>;

enum Backend {
    Single(parking_lot::Mutex<SharedContext>),
    Pooled(ExecutionContextPool),
}

/// Orchestrates single-context or pooled execution from a [`HostConfig`]
pub struct ExecutionService {
    config: HostConfig,
    engine: Arc<dyn ScriptEngine>,
    init: SessionInit,
    modules: Vec<PathBuf>,
    defaults: ContextOptions,
    backend: Backend,
}

impl ExecutionService {
    /// Create a service on the Rhai engine without host commands
    pub fn new(config: HostConfig) -> Result<Self> {
        Self::with_engine(config, Arc::new(RhaiEngine::new()))
    }

    /// Create a service on the Rhai engine exposing host commands
    pub fn with_registry(config: HostConfig, registry: CommandRegistry) -> Result<Self> {
        Self::with_engine(config, Arc::new(RhaiEngine::with_registry(registry)))
    }

    /// Create a service on any engine
    pub fn with_engine(mut config: HostConfig, engine: Arc<dyn ScriptEngine>) -> Result<Self> {
        validate_config(&config)?;
        config.run_init();
        let parameters = config.merged_parameters()?;

        let modules =
            resolve_script_sources(&config.scripts, &config.script_pattern, config.search_depth)?;
        let host_app = config
            .host_app
            .clone()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(default_host_app);

        let init = SessionInit::new(config.execution_policy, host_app.clone())
            .with_modules(modules.iter().cloned())
            .with_module_paths(module_search_paths(&config.scripts))
            .with_parameters(&parameters)
            .with_encoding(config.encoding)
            .with_limits(config.limits.clone());

        let defaults = ContextOptions::new()
            .with_log_mode(config.log_mode)
            .with_separator(config.log_separator.clone())
            .with_host_app(host_app.clone())
            .with_encoding(config.encoding);

        info!(
            host_app = %host_app,
            version = env!("CARGO_PKG_VERSION"),
            language = engine.language(),
            modules = modules.len(),
            pooled = config.is_pool(),
            "Starting execution service"
        );
        for module in &modules {
            debug!(module = %module.display(), "Module loaded");
        }

        let backend = if config.is_pool() {
            Backend::Pooled(ExecutionContextPool::open(
                Arc::clone(&engine),
                init.clone(),
                1,
                config.max_concurrency,
                defaults.clone(),
            )?)
        } else {
            let context = ExecutionContext::new(engine.as_ref(), &init, defaults.clone())?;
            Backend::Single(parking_lot::Mutex::new(Arc::new(tokio::sync::Mutex::new(
                context,
            ))))
        };

        Ok(Self {
            config,
            engine,
            init,
            modules,
            defaults,
            backend,
        })
    }

    fn options(&self, sink: Option<Arc<dyn LogSink>>) -> ContextOptions {
        let overrides = match sink {
            Some(sink) => ContextOptions::new().with_sink(sink),
            None => ContextOptions::new(),
        };
        overrides.or(&self.defaults)
    }

    /// Obtain a context
    ///
    /// Pooled mode mints a fresh context (blocking while the pool is full).
    /// Single mode returns the cached context, replacing it first if it was
    /// disposed; `sink` only applies to a newly created context.
    pub fn get_execution_context(&self, sink: Option<Arc<dyn LogSink>>) -> Result<SharedContext> {
        match &self.backend {
            Backend::Pooled(pool) => {
                let context = pool.get_execution_context(self.options(sink))?;
                Ok(Arc::new(tokio::sync::Mutex::new(context)))
            }
            Backend::Single(current) => {
                let mut current = current.lock();
                if is_disposed(&current) {
                    debug!("Recreating disposed execution context");
                    let context =
                        ExecutionContext::new(self.engine.as_ref(), &self.init, self.options(sink))?;
                    *current = Arc::new(tokio::sync::Mutex::new(context));
                }
                Ok(Arc::clone(&current))
            }
        }
    }

    /// Async [`ExecutionService::get_execution_context`]
    ///
    /// Session start-up for a replacement context runs on a blocking worker.
    pub async fn get_execution_context_async(
        &self,
        sink: Option<Arc<dyn LogSink>>,
    ) -> Result<SharedContext> {
        match &self.backend {
            Backend::Pooled(pool) => {
                let context = pool.get_execution_context_async(self.options(sink)).await?;
                Ok(Arc::new(tokio::sync::Mutex::new(context)))
            }
            Backend::Single(current) => {
                let cached = Arc::clone(&current.lock());
                if !cached.lock().await.is_disposed() {
                    return Ok(cached);
                }

                debug!("Recreating disposed execution context");
                let engine = Arc::clone(&self.engine);
                let init = self.init.clone();
                let options = self.options(sink);
                let context = tokio::task::spawn_blocking(move || {
                    ExecutionContext::new(engine.as_ref(), &init, options)
                })
                .await
                .map_err(|e| Error::Internal(format!("Context start-up failed: {e}")))??;

                let mut current = current.lock();
                if Arc::ptr_eq(&current, &cached) {
                    *current = Arc::new(tokio::sync::Mutex::new(context));
                }
                Ok(Arc::clone(&current))
            }
        }
    }

    /// Whether requests are served from a pool
    pub fn is_pool(&self) -> bool {
        matches!(self.backend, Backend::Pooled(_))
    }

    /// The pool, in pooled mode
    pub fn pool(&self) -> Option<&ExecutionContextPool> {
        match &self.backend {
            Backend::Pooled(pool) => Some(pool),
            Backend::Single(_) => None,
        }
    }

    /// Resolved module files, in load order
    pub fn modules(&self) -> &[PathBuf] {
        &self.modules
    }

    /// Service configuration
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Close the pool or dispose the single context
    ///
    /// A single context busy in another task is left alone; use
    /// [`ExecutionService::shutdown`] to wait for it.
    pub fn dispose(&self) {
        match &self.backend {
            Backend::Pooled(pool) => pool.close(),
            Backend::Single(current) => match current.lock().try_lock() {
                Ok(mut context) => context.dispose(),
                Err(_) => warn!("Execution context busy, not disposed"),
            },
        }
    }

    /// Close the pool or dispose the single context, waiting for it if busy
    pub async fn shutdown(&self) {
        match &self.backend {
            Backend::Pooled(pool) => pool.close(),
            Backend::Single(current) => {
                let cached = Arc::clone(&current.lock());
                cached.lock().await.dispose();
            }
        }
        info!("Execution service stopped");
    }
}

fn is_disposed(context: &SharedContext) -> bool {
    // a context locked elsewhere is in use, hence alive
    context
        .try_lock()
        .map(|context| context.is_disposed())
        .unwrap_or(false)
}

impl std::fmt::Debug for ExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionService")
            .field("engine", &self.engine)
            .field("modules", &self.modules)
            .field("pooled", &self.is_pool())
            .finish()
    }
}
