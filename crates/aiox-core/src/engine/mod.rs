//! Plan Executor.
//!
//! Interpreta un plan de forma secuencial: valida, obtiene las capabilities
//! declaradas una sola vez, ejecuta cada step contra el sandbox y registra
//! todo en el `TxStore`. Fail-fast sin reintentos ni rollback.

pub mod builder;
pub mod core;
pub mod undo;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use builder::PlanExecutorBuilder;
pub use core::PlanExecutor;
pub use undo::{undo_last_run, UndoReport};

use crate::constants::{DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_STEP_TIMEOUT_MS};
use crate::errors::CoreEngineError;
use crate::meter::{ResourceBudget, ResourceUsage};
use crate::model::{ArtifactRecord, RunStatus, StepStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    pub dry_run: bool,
    /// Marca el run como replay en `run_start`.
    pub replay: bool,
    pub default_timeout_ms: u64,
    pub lock_timeout_ms: u64,
    pub budget: ResourceBudget,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self { dry_run: false,
               replay: false,
               default_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
               lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
               budget: ResourceBudget::unlimited() }
    }
}

impl ExecutionOptions {
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn lock_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn budget(mut self, budget: ResourceBudget) -> Self {
        self.budget = budget;
        self
    }
}

/// Cancelación cooperativa; se observa sólo entre steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub step_id: String,
    pub op: String,
    pub status: StepStatus,
    pub output_hash: Option<String>,
    pub usage: Option<ResourceUsage>,
    pub error: Option<CoreEngineError>,
}

/// Primer fallo del run. `step_id` es `None` cuando el run abortó antes de
/// ejecutar steps (validación, capability denegada, cancelación).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub step_id: Option<String>,
    pub error: CoreEngineError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub plan_id: String,
    pub status: RunStatus,
    pub dry_run: bool,
    pub steps: Vec<StepOutcome>,
    pub artifacts: Vec<ArtifactRecord>,
    pub totals: ResourceUsage,
    pub fingerprint: Option<String>,
    pub failure: Option<RunFailure>,
    /// Bindings finales en orden de ejecución.
    pub outputs: IndexMap<String, Value>,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn step(&self, step_id: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}
