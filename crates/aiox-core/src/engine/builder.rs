//! Builder para `PlanExecutor`.
//!
//! Obligatorios: store y registry. Por defecto la política es `DenyAll`, el
//! meter es propio del executor y las opciones son las de
//! `ExecutionOptions::default()`.
//!
//! ```ignore
//! let mut executor = PlanExecutor::builder(InMemoryTxStore::new(), registry)
//!     .policy(AutoApprove)
//!     .meter(Arc::clone(&process_meter))
//!     .options(ExecutionOptions::default().dry_run(true))
//!     .build();
//! ```

use std::sync::Arc;

use super::{CancelToken, ExecutionOptions, PlanExecutor};
use crate::capability::{ApprovalPolicy, CapabilityBroker, DenyAll};
use crate::event::TxStore;
use crate::meter::ResourceMeter;
use crate::tool::ToolRegistry;

pub struct PlanExecutorBuilder<S: TxStore> {
    store: S,
    registry: ToolRegistry,
    broker: Option<CapabilityBroker>,
    meter: Option<Arc<ResourceMeter>>,
    options: ExecutionOptions,
    cancel: Option<CancelToken>,
}

impl<S: TxStore> PlanExecutorBuilder<S> {
    pub fn new(store: S, registry: ToolRegistry) -> Self {
        Self { store,
               registry,
               broker: None,
               meter: None,
               options: ExecutionOptions::default(),
               cancel: None }
    }

    /// Política de aprobación de capabilities.
    #[inline]
    pub fn policy(mut self, policy: impl ApprovalPolicy + 'static) -> Self {
        self.broker = Some(CapabilityBroker::new(policy));
        self
    }

    /// Meter del proceso compartido entre executors.
    #[inline]
    pub fn meter(mut self, meter: Arc<ResourceMeter>) -> Self {
        self.meter = Some(meter);
        self
    }

    #[inline]
    pub fn options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    #[inline]
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> PlanExecutor<S> {
        PlanExecutor::from_parts(self.store,
                                 self.registry,
                                 self.broker.unwrap_or_else(|| CapabilityBroker::new(DenyAll)),
                                 self.meter.unwrap_or_else(ResourceMeter::shared),
                                 self.options,
                                 self.cancel.unwrap_or_default())
    }
}
