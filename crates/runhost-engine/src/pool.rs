//! Bounded pool of engine sessions
//!
//! The pool hands out [`ExecutionContext`] wrappers, each holding one leased
//! session and one semaphore permit. At most `max` contexts are alive at
//! once; further requests wait for a permit. Sessions return to the idle
//! list when their context is disposed.

use crate::context::{ContextOptions, ExecutionContext};
use crate::engine::{EngineSession, ScriptEngine, SessionInit};
use parking_lot::Mutex;
use runhost_config::{validate_concurrency, MIN_CONCURRENCY};
use runhost_core::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info};

const RESOURCE: &str = "execution context pool";

/// State shared between the pool and its leases
struct PoolShared {
    engine: Arc<dyn ScriptEngine>,
    init: SessionInit,
    idle: Mutex<Vec<Box<dyn EngineSession>>>,
    permits: Arc<Semaphore>,
    active: AtomicUsize,
    closed: AtomicBool,
}

impl PoolShared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A context's claim on one pool slot
pub(crate) struct PoolLease {
    shared: Arc<PoolShared>,
    _permit: OwnedSemaphorePermit,
}

impl PoolLease {
    fn new(shared: Arc<PoolShared>, permit: OwnedSemaphorePermit) -> Self {
        shared.active.fetch_add(1, Ordering::SeqCst);
        Self {
            shared,
            _permit: permit,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Return the session for reuse and free the slot
    pub(crate) fn release(self, session: Box<dyn EngineSession>) {
        if !self.shared.is_closed() {
            self.shared.idle.lock().push(session);
        }
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded, shared set of engine sessions
pub struct ExecutionContextPool {
    shared: Arc<PoolShared>,
    defaults: ContextOptions,
    min: usize,
    max: usize,
}

impl ExecutionContextPool {
    /// Open a pool of `min..=max` sessions
    ///
    /// `min` sessions are opened eagerly; the rest on demand.
    pub fn open(
        engine: Arc<dyn ScriptEngine>,
        init: SessionInit,
        min: usize,
        max: usize,
        defaults: ContextOptions,
    ) -> Result<Self> {
        validate_concurrency(max)?;
        if min < MIN_CONCURRENCY || min > max {
            return Err(Error::validation(format!(
                "Pool minimum must be between {MIN_CONCURRENCY} and {max}, got {min}"
            )));
        }

        let mut idle = Vec::with_capacity(max);
        for _ in 0..min {
            idle.push(engine.open_session(&init)?);
        }

        info!(
            min,
            max,
            language = engine.language(),
            policy = ?init.policy,
            modules = init.modules.len(),
            "Execution context pool opened"
        );

        let defaults = ContextOptions {
            host_app: defaults.host_app.or_else(|| Some(init.host_app.clone())),
            ..defaults
        };

        Ok(Self {
            shared: Arc::new(PoolShared {
                engine,
                init,
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(max)),
                active: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
            defaults,
            min,
            max,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.is_closed() {
            return Err(Error::disposed(RESOURCE));
        }
        Ok(())
    }

    /// Mint a context, blocking while the pool is at capacity
    ///
    /// Blocks the calling thread; async callers should use
    /// [`ExecutionContextPool::get_execution_context_async`].
    pub fn get_execution_context(&self, overrides: ContextOptions) -> Result<ExecutionContext> {
        self.ensure_open()?;
        let permit = match Arc::clone(&self.shared.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(Error::disposed(RESOURCE)),
            Err(TryAcquireError::NoPermits) => {
                debug!(max = self.max, "Pool exhausted, waiting for a free slot");
                futures::executor::block_on(Arc::clone(&self.shared.permits).acquire_owned())
                    .map_err(|_| Error::disposed(RESOURCE))?
            }
        };
        self.mint(permit, overrides)
    }

    /// Mint a context, waiting asynchronously while the pool is at capacity
    pub async fn get_execution_context_async(
        &self,
        overrides: ContextOptions,
    ) -> Result<ExecutionContext> {
        self.ensure_open()?;
        let permit = Arc::clone(&self.shared.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::disposed(RESOURCE))?;
        self.mint(permit, overrides)
    }

    /// Mint a context only if a slot is free right now
    pub fn try_get_execution_context(
        &self,
        overrides: ContextOptions,
    ) -> Result<Option<ExecutionContext>> {
        self.ensure_open()?;
        match Arc::clone(&self.shared.permits).try_acquire_owned() {
            Ok(permit) => self.mint(permit, overrides).map(Some),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(Error::disposed(RESOURCE)),
        }
    }

    fn mint(&self, permit: OwnedSemaphorePermit, overrides: ContextOptions) -> Result<ExecutionContext> {
        let reused = self.shared.idle.lock().pop();
        let session = match reused {
            Some(session) => session,
            None => {
                debug!("Opening additional pool session");
                self.shared.engine.open_session(&self.shared.init)?
            }
        };

        let lease = PoolLease::new(Arc::clone(&self.shared), permit);
        Ok(ExecutionContext::pooled(
            session,
            lease,
            overrides.or(&self.defaults),
            self.shared.engine.language(),
        ))
    }

    /// Close the pool; bound contexts reject further work
    ///
    /// Only the first call has any effect.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.permits.close();
        self.shared.idle.lock().clear();
        info!(
            active = self.active_contexts(),
            "Execution context pool closed"
        );
    }

    /// Whether the pool was closed
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Sessions opened but not leased
    pub fn idle_sessions(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Contexts currently holding a slot
    pub fn active_contexts(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Lower size bound
    pub fn min_size(&self) -> usize {
        self.min
    }

    /// Upper size bound
    pub fn max_size(&self) -> usize {
        self.max
    }

    /// Defaults applied to every minted context
    pub fn defaults(&self) -> &ContextOptions {
        &self.defaults
    }
}

impl Drop for ExecutionContextPool {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ExecutionContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContextPool")
            .field("min", &self.min)
            .field("max", &self.max)
            .field("active", &self.active_contexts())
            .field("idle", &self.idle_sessions())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhai_engine::RhaiEngine;
    use runhost_core::ExecutionPolicy;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn pool(min: usize, max: usize) -> ExecutionContextPool {
        let mut params = HashMap::new();
        params.insert("!Stage".to_string(), json!("prod"));
        params.insert("Retries".to_string(), json!(2));

        ExecutionContextPool::open(
            Arc::new(RhaiEngine::new()),
            SessionInit::new(ExecutionPolicy::Unrestricted, "pool-tests").with_parameters(&params),
            min,
            max,
            ContextOptions::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_bounds_validated() {
        let engine: Arc<dyn ScriptEngine> = Arc::new(RhaiEngine::new());
        for (min, max) in [(0, 2), (3, 2), (1, 65)] {
            let result = ExecutionContextPool::open(
                Arc::clone(&engine),
                SessionInit::default(),
                min,
                max,
                ContextOptions::new(),
            );
            assert!(matches!(result, Err(Error::Validation(_))), "{min}..{max}");
        }
    }

    #[test]
    fn test_preopens_min_sessions() {
        let pool = pool(2, 4);
        assert_eq!(pool.idle_sessions(), 2);
        assert_eq!(pool.active_contexts(), 0);
    }

    #[test]
    fn test_seeded_variables() {
        let pool = pool(1, 2);
        let mut context = pool.get_execution_context(ContextOptions::new()).unwrap();
        assert!(context.is_pooled());
        assert_eq!(context.host_app(), "pool-tests");
        assert_eq!(context.get_variable("Stage").unwrap(), Some(json!("prod")));
        assert!(matches!(
            context.set_variable("Stage", json!("dev"), false, false),
            Err(Error::VariableReadOnly(_))
        ));
        context.set_variable("Retries", json!(5), false, false).unwrap();
    }

    #[test]
    fn test_try_get_never_exceeds_max() {
        let pool = pool(1, 2);
        let first = pool.try_get_execution_context(ContextOptions::new()).unwrap();
        let second = pool.try_get_execution_context(ContextOptions::new()).unwrap();
        assert!(first.is_some() && second.is_some());
        assert!(pool
            .try_get_execution_context(ContextOptions::new())
            .unwrap()
            .is_none());
        assert_eq!(pool.active_contexts(), 2);

        drop(first);
        assert_eq!(pool.active_contexts(), 1);
        assert_eq!(pool.idle_sessions(), 1);
        assert!(pool
            .try_get_execution_context(ContextOptions::new())
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_close_invalidates_contexts() {
        let pool = pool(1, 2);
        let mut context = pool.get_execution_context(ContextOptions::new()).unwrap();
        pool.close();
        pool.close();

        assert!(pool.is_closed());
        assert!(context.is_disposed());
        assert!(context.run_script("1").unwrap_err().is_disposed());
        assert!(pool
            .get_execution_context(ContextOptions::new())
            .unwrap_err()
            .is_disposed());
        assert_eq!(pool.idle_sessions(), 0);
    }

    #[test]
    fn test_overrides_apply_per_context() {
        let pool = pool(1, 2);
        let context = pool
            .get_execution_context(ContextOptions::new().with_host_app("custom"))
            .unwrap();
        assert_eq!(context.host_app(), "custom");
    }

    #[tokio::test]
    async fn test_async_acquire_waits_for_release() {
        let pool = Arc::new(pool(1, 1));
        let held = pool
            .get_execution_context_async(ContextOptions::new())
            .await
            .unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.get_execution_context_async(ContextOptions::new())
                    .await
                    .map(|context| context.is_pooled())
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(waiter.await.unwrap().unwrap());
    }

    #[test]
    fn test_blocking_acquire_waits_for_release() {
        let pool = Arc::new(pool(1, 1));
        let held = pool.get_execution_context(ContextOptions::new()).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                let context = pool.get_execution_context(ContextOptions::new());
                let _ = tx.send(context.map(|context| context.is_pooled()));
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(pool.active_contexts(), 1);

        drop(held);
        let acquired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(acquired.unwrap());
        waiter.join().unwrap();
        assert_eq!(pool.active_contexts(), 0);
    }
}
