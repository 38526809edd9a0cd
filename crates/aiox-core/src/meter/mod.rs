//! Resource Meter.
//!
//! Dos niveles:
//! - [`ResourceMeter`]: totales del proceso, compartido por `Arc` entre
//!   executors; sólo `fetch_add` al registrar, lectura pura al consultar.
//! - [`RunMeter`]: contabilidad de un run (por step) con presupuesto opcional.
//!
//! El meter nunca estima: registra lo que cada tool declara para su última
//! invocación.

mod micros;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};

pub use micros::Micros;

use crate::errors::CoreEngineError;

/// Coste de almacenamiento por MB escrito (micro-USD).
pub const STORAGE_MICRO_USD_PER_MB: u64 = 10;
/// Carbono por MB escrito (micro-gramos CO2).
pub const STORAGE_MICRO_CARBON_PER_MB: u64 = 50_000;

const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cost_usd: Micros,
    pub carbon_g: Micros,
    pub tokens: u64,
}

impl ResourceUsage {
    pub fn new(cost_usd: Micros, carbon_g: Micros, tokens: u64) -> Self {
        Self { cost_usd,
               carbon_g,
               tokens }
    }

    /// Uso atribuible a `bytes` escritos en disco (factores de almacenamiento).
    pub fn for_bytes_written(bytes: u64) -> Self {
        let scale = |per_mb: u64| Micros(((bytes as u128 * per_mb as u128 + (MB as u128 / 2)) / MB as u128) as u64);
        Self { cost_usd: scale(STORAGE_MICRO_USD_PER_MB),
               carbon_g: scale(STORAGE_MICRO_CARBON_PER_MB),
               tokens: 0 }
    }

    /// Las lecturas se cobran con los mismos factores que las escrituras.
    pub fn for_bytes_read(bytes: u64) -> Self {
        Self::for_bytes_written(bytes)
    }

    pub fn saturating_add(&self, other: &ResourceUsage) -> ResourceUsage {
        ResourceUsage { cost_usd: self.cost_usd + other.cost_usd,
                        carbon_g: self.carbon_g + other.carbon_g,
                        tokens: self.tokens.saturating_add(other.tokens) }
    }

    pub fn is_zero(&self) -> bool {
        *self == ResourceUsage::default()
    }
}

/// Lectura consistente por campo de los totales del proceso.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterSnapshot {
    pub totals: ResourceUsage,
    pub invocations: u64,
}

#[derive(Debug, Default)]
pub struct ResourceMeter {
    cost_micro_usd: AtomicU64,
    carbon_micro_g: AtomicU64,
    tokens: AtomicU64,
    invocations: AtomicU64,
}

impl ResourceMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Suma saturada por contador: los totales nunca decrecen.
    pub fn record(&self, usage: &ResourceUsage) {
        saturating_add(&self.cost_micro_usd, usage.cost_usd.0);
        saturating_add(&self.carbon_micro_g, usage.carbon_g.0);
        saturating_add(&self.tokens, usage.tokens);
        saturating_add(&self.invocations, 1);
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot { totals: ResourceUsage { cost_usd: Micros(self.cost_micro_usd.load(Ordering::Relaxed)),
                                                carbon_g: Micros(self.carbon_micro_g.load(Ordering::Relaxed)),
                                                tokens: self.tokens.load(Ordering::Relaxed) },
                        invocations: self.invocations.load(Ordering::Relaxed) }
    }
}

fn saturating_add(counter: &AtomicU64, delta: u64) {
    // El closure siempre devuelve `Some`, así que el resultado es siempre `Ok`.
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_add(delta)));
}

/// Límites por run. `None` = sin límite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub max_cost_usd: Option<Micros>,
    pub max_carbon_g: Option<Micros>,
    pub max_tokens: Option<u64>,
}

impl ResourceBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_cost_usd.is_none() && self.max_carbon_g.is_none() && self.max_tokens.is_none()
    }

    pub fn check(&self, totals: &ResourceUsage) -> Result<(), CoreEngineError> {
        let exceeded = |metric: &str, used: String, limit: String| CoreEngineError::QuotaExceeded { metric: metric.to_string(),
                                                                                                    used,
                                                                                                    limit };
        if let Some(max) = self.max_cost_usd {
            if totals.cost_usd > max {
                return Err(exceeded("cost_usd", totals.cost_usd.to_string(), max.to_string()));
            }
        }
        if let Some(max) = self.max_carbon_g {
            if totals.carbon_g > max {
                return Err(exceeded("carbon_g", totals.carbon_g.to_string(), max.to_string()));
            }
        }
        if let Some(max) = self.max_tokens {
            if totals.tokens > max {
                return Err(exceeded("tokens", totals.tokens.to_string(), max.to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepUsage {
    pub step_id: String,
    pub usage: ResourceUsage,
}

/// Contabilidad de un run: totales, registros por step y presupuesto.
#[derive(Debug)]
pub struct RunMeter {
    process: Arc<ResourceMeter>,
    budget: ResourceBudget,
    totals: ResourceUsage,
    steps: Vec<StepUsage>,
}

impl RunMeter {
    pub fn new(process: Arc<ResourceMeter>, budget: ResourceBudget) -> Self {
        Self { process,
               budget,
               totals: ResourceUsage::default(),
               steps: Vec::new() }
    }

    /// Registra el uso del step (run y proceso) y luego aplica el presupuesto:
    /// los totales nunca decrecen aunque el step falle por cuota.
    pub fn record(&mut self, step_id: &str, usage: ResourceUsage) -> Result<(), CoreEngineError> {
        self.process.record(&usage);
        self.totals = self.totals.saturating_add(&usage);
        self.steps.push(StepUsage { step_id: step_id.to_string(),
                                    usage });
        self.budget.check(&self.totals).inspect_err(|e| warn!("step '{step_id}': {e}"))
    }

    pub fn totals(&self) -> ResourceUsage {
        self.totals
    }

    pub fn steps(&self) -> &[StepUsage] {
        &self.steps
    }

    pub fn budget(&self) -> &ResourceBudget {
        &self.budget
    }
}
