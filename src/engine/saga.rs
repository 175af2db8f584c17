//! Local compensation log for multi-store operations.
//!
//! Each applied step registers how to undo itself. When a later step fails
//! the registered compensations run in reverse order before the error is
//! handed back. If an undo step fails as well the error names it, since the
//! operation is then still partly applied.

use std::future::Future;

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use crate::engine::error::{EngineError, EngineResult};

type Compensation = Box<dyn FnOnce() -> BoxFuture<'static, EngineResult<()>> + Send>;

pub struct Saga {
    name: &'static str,
    compensations: Vec<(&'static str, Compensation)>,
}

impl Saga {
    pub fn new(name: &'static str) -> Self {
        Self { name, compensations: Vec::new() }
    }

    pub fn pending(&self) -> usize {
        self.compensations.len()
    }

    /// Register the undo action for a step that has just been applied.
    pub fn on_rollback<F, Fut>(&mut self, step: &'static str, undo: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        self.compensations.push((step, Box::new(move || Box::pin(undo()))));
    }

    /// Await one step. On failure every registered compensation runs first.
    ///
    /// A failure before anything was applied is returned unchanged; later
    /// failures come back as [`EngineError::TransactionFailed`], or as
    /// [`EngineError::CompensationFailed`] when some undo step failed too.
    pub async fn run<T, Fut>(&mut self, step: &'static str, action: Fut) -> EngineResult<T>
    where
        Fut: Future<Output = EngineResult<T>>,
    {
        match action.await {
            Ok(value) => Ok(value),
            Err(cause) => {
                warn!(saga = self.name, step, error = %cause, "Saga step failed");
                Err(self.rollback(cause).await)
            }
        }
    }

    pub async fn rollback(&mut self, cause: EngineError) -> EngineError {
        if self.compensations.is_empty() {
            return cause;
        }
        metrics::counter!("startrade_saga_rollbacks_total", "saga" => self.name).increment(1);
        let mut failed_steps = Vec::new();
        while let Some((step, undo)) = self.compensations.pop() {
            match undo().await {
                Ok(()) => debug!(saga = self.name, step, "Compensated"),
                Err(e) => {
                    error!(saga = self.name, step, error = %e, "Compensation failed");
                    failed_steps.push(step);
                }
            }
        }
        if failed_steps.is_empty() {
            EngineError::rolled_back(cause)
        } else {
            metrics::counter!("startrade_saga_stuck_total", "saga" => self.name).increment(1);
            EngineError::rollback_incomplete(cause, failed_steps)
        }
    }

    /// Discard the compensation log once every step has been applied.
    pub fn commit(mut self) {
        debug!(saga = self.name, steps = self.compensations.len(), "Saga committed");
        self.compensations.clear();
    }
}
