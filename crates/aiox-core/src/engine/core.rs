//! Core PlanExecutor implementation

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{CancelToken, ExecutionOptions, PlanExecutorBuilder, RunFailure, RunReport, StepOutcome};
use crate::capability::{CapabilityBroker, CapabilityRequest};
use crate::constants::ENGINE_VERSION;
use crate::errors::{classify_error, CoreEngineError};
use crate::event::{TxEntryKind, TxStore};
use crate::hashing::{hash_value, prefixed};
use crate::meter::{ResourceMeter, ResourceUsage, RunMeter};
use crate::model::{ArtifactRecord, ExecutionContext, Plan, PlanStep, RunFingerprintInput, RunStatus, StepStatus};
use crate::package::{inputs_digest, snapshot_inputs};
use crate::sandbox::Sandbox;
use crate::tool::{ToolContext, ToolRegistry};

/// Resultado de invocar un step: el valor (o el error) y las escrituras que
/// llegaron a finalizarse, que se registran aunque el step falle.
struct StepAttempt {
    result: Result<(Value, ResourceUsage), CoreEngineError>,
    writes: Vec<ArtifactRecord>,
}

/// Motor de ejecución de planes.
///
/// Responsable de orquestar los steps de un plan en orden, aplicar las
/// capabilities concedidas y dejar constancia de cada decisión en el log.
pub struct PlanExecutor<S>
    where S: TxStore
{
    store: S,
    registry: ToolRegistry,
    broker: CapabilityBroker,
    meter: Arc<ResourceMeter>,
    options: ExecutionOptions,
    cancel: CancelToken,
}

impl<S> PlanExecutor<S> where S: TxStore
{
    /// Crea un nuevo builder para configurar el executor
    #[inline]
    pub fn builder(store: S, registry: ToolRegistry) -> PlanExecutorBuilder<S> {
        PlanExecutorBuilder::new(store, registry)
    }

    pub(crate) fn from_parts(store: S,
                             registry: ToolRegistry,
                             broker: CapabilityBroker,
                             meter: Arc<ResourceMeter>,
                             options: ExecutionOptions,
                             cancel: CancelToken)
                             -> Self {
        Self { store,
               registry,
               broker,
               meter,
               options,
               cancel }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn meter(&self) -> &Arc<ResourceMeter> {
        &self.meter
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: ExecutionOptions) {
        self.options = options;
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Única vía de escritura al log. Cualquier fallo se reporta como
    /// `LogWrite` y es fatal para el run.
    fn log(&mut self, run_id: Uuid, kind: TxEntryKind) -> Result<(), CoreEngineError> {
        match self.store.append(run_id, kind) {
            Ok(_) => Ok(()),
            Err(CoreEngineError::LogWrite(msg)) => Err(CoreEngineError::LogWrite(msg)),
            Err(other) => Err(CoreEngineError::LogWrite(other.to_string())),
        }
    }

    /// Ejecuta un plan completo contra el sandbox.
    ///
    /// Devuelve `Ok` con el reporte tanto si el run completó como si abortó;
    /// `Err` sólo si no se pudo tomar el lock del sandbox o si el log dejó de
    /// aceptar escrituras (en ese caso nunca se reporta éxito).
    pub fn execute(&mut self, plan: &Plan, sandbox: &Sandbox) -> Result<RunReport, CoreEngineError> {
        let run_id = Uuid::new_v4();
        let _lock = sandbox.lock(run_id, Duration::from_millis(self.options.lock_timeout_ms))?;
        // Otro proceso pudo escribir el log mientras esperábamos el lock.
        self.store.refresh()?;
        let plan_id = plan.plan_id();
        let dry_run = self.options.dry_run;
        let inputs_digest = match snapshot_inputs(plan, sandbox) {
            Ok(files) => Some(inputs_digest(&files)),
            Err(e) => {
                warn!("run {run_id}: could not snapshot in/ ({e}); run_start carries no inputs digest");
                None
            }
        };
        info!("run {run_id} started: plan {plan_id} ({} steps, dry_run={dry_run})", plan.len());

        self.log(run_id,
                 TxEntryKind::RunStart { plan_id: plan_id.clone(),
                                         goal: plan.goal.clone(),
                                         step_count: plan.len(),
                                         engine_version: ENGINE_VERSION.to_string(),
                                         dry_run,
                                         replay: self.options.replay,
                                         inputs_digest })?;

        let mut ctx = ExecutionContext::new(run_id,
                                            sandbox.root().to_path_buf(),
                                            RunMeter::new(Arc::clone(&self.meter), self.options.budget));
        let mut report = RunReport { run_id,
                                     plan_id: plan_id.clone(),
                                     status: RunStatus::Initializing,
                                     dry_run,
                                     steps: plan.steps
                                                .iter()
                                                .enumerate()
                                                .map(|(index, step)| StepOutcome { index,
                                                                                   step_id: step.step_id(index),
                                                                                   op: step.op.clone(),
                                                                                   status: StepStatus::Pending,
                                                                                   output_hash: None,
                                                                                   usage: None,
                                                                                   error: None })
                                                .collect(),
                                     artifacts: Vec::new(),
                                     totals: ResourceUsage::default(),
                                     fingerprint: None,
                                     failure: None,
                                     outputs: Default::default() };

        if let Err(e) = self.validate(plan) {
            warn!("run {run_id}: plan rejected: {e}");
            return self.finish(report, ctx, Some(RunFailure { step_id: None, error: e }));
        }

        for capability in plan.declared_capabilities() {
            let request = CapabilityRequest { capability: capability.clone(),
                                              plan_id: plan_id.clone(),
                                              goal: plan.goal.clone() };
            let decision = self.broker.request(&mut ctx.grants, &request);
            let policy = self.broker.policy_name().to_string();
            self.log(run_id,
                     TxEntryKind::CapabilityCheck { capability: capability.clone(),
                                                    decision,
                                                    policy })?;
            if !decision.is_granted() {
                let error = CoreEngineError::CapabilityDenied { capability: capability.to_string() };
                return self.finish(report, ctx, Some(RunFailure { step_id: None, error }));
            }
        }

        report.status = RunStatus::Executing;

        if dry_run {
            for (index, step) in plan.steps.iter().enumerate() {
                let step_id = step.step_id(index);
                let intent = json!({ "op": step.op, "in": step.inputs });
                self.log(run_id,
                         TxEntryKind::StepEnd { step_index: index,
                                                step_id: step_id.clone(),
                                                op: step.op.clone(),
                                                status: StepStatus::Skipped,
                                                output_hash: None,
                                                usage: None,
                                                error: None,
                                                error_class: None,
                                                intent: Some(intent) })?;
                report.steps[index].status = StepStatus::Skipped;
            }
            return self.finish(report, ctx, None);
        }

        for (index, step) in plan.steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("run {run_id} cancelled before step {index}");
                return self.finish(report, ctx, Some(RunFailure { step_id: None,
                                                                  error: CoreEngineError::Cancelled }));
            }
            let step_id = step.step_id(index);
            report.steps[index].status = StepStatus::Running;
            self.log(run_id,
                     TxEntryKind::StepStart { step_index: index,
                                              step_id: step_id.clone(),
                                              op: step.op.clone() })?;
            debug!("run {run_id}: step {step_id} running");

            let attempt = self.invoke_step(index, step, &ctx, sandbox);
            for artifact in &attempt.writes {
                self.log(run_id,
                         TxEntryKind::ArtifactWritten { step_id: step_id.clone(),
                                                        artifact: artifact.clone() })?;
            }
            report.artifacts.extend(attempt.writes);

            let outcome = attempt.result.and_then(|(value, usage)| {
                                            report.steps[index].usage = Some(usage);
                                            ctx.meter.record(&step_id, usage)?;
                                            let output_hash = prefixed(&hash_value(&value));
                                            if let Some(out) = &step.out {
                                                ctx.bind(out, value)?;
                                            }
                                            Ok(output_hash)
                                        });
            match outcome {
                Ok(output_hash) => {
                    self.log(run_id,
                             TxEntryKind::StepEnd { step_index: index,
                                                    step_id: step_id.clone(),
                                                    op: step.op.clone(),
                                                    status: StepStatus::Ok,
                                                    output_hash: Some(output_hash.clone()),
                                                    usage: report.steps[index].usage,
                                                    error: None,
                                                    error_class: None,
                                                    intent: None })?;
                    let slot = &mut report.steps[index];
                    slot.status = StepStatus::Ok;
                    slot.output_hash = Some(output_hash);
                    debug!("run {run_id}: step {step_id} ok");
                }
                Err(error) => {
                    if error.is_fatal() {
                        warn!("run {run_id}: step {step_id} hit a fatal error: {error}");
                    } else {
                        warn!("run {run_id}: step {step_id} failed: {error}");
                    }
                    self.log(run_id,
                             TxEntryKind::StepEnd { step_index: index,
                                                    step_id: step_id.clone(),
                                                    op: step.op.clone(),
                                                    status: StepStatus::Failed,
                                                    output_hash: None,
                                                    usage: report.steps[index].usage,
                                                    error: Some(error.clone()),
                                                    error_class: Some(classify_error(&error)),
                                                    intent: None })?;
                    let slot = &mut report.steps[index];
                    slot.status = StepStatus::Failed;
                    slot.error = Some(error.clone());
                    return self.finish(report, ctx, Some(RunFailure { step_id: Some(step_id), error }));
                }
            }
        }

        self.finish(report, ctx, None)
    }

    /// Validación previa a cualquier step: ops conocidas, inputs conformes al
    /// manifest y bindings bien formados.
    fn validate(&self, plan: &Plan) -> Result<(), CoreEngineError> {
        for (index, step) in plan.steps.iter().enumerate() {
            let step_id = step.step_id(index);
            let tool = self.registry.get(&step.op)?;
            tool.manifest().validate_inputs(&step_id, step.inputs.keys())?;
            if step.timeout_ms == Some(0) {
                return Err(CoreEngineError::InvalidPlan(format!("step '{step_id}' has a zero timeout")));
            }
        }
        plan.validate_bindings()
    }

    fn invoke_step(&self, index: usize, step: &PlanStep, ctx: &ExecutionContext, sandbox: &Sandbox) -> StepAttempt {
        let step_id = step.step_id(index);
        let failed = |error| StepAttempt { result: Err(error),
                                           writes: Vec::new() };

        let inputs = match ctx.resolve_inputs(&step_id, &step.inputs) {
            Ok(inputs) => inputs,
            Err(e) => return failed(e),
        };
        let tool = match self.registry.get(&step.op) {
            Ok(tool) => tool,
            Err(e) => return failed(e),
        };
        if let Some(missing) = tool.manifest()
                                   .capabilities
                                   .iter()
                                   .find(|name| !ctx.grants.allows_name(name))
        {
            warn!("step '{step_id}' requires ungranted capability {missing}");
            return failed(CoreEngineError::CapabilityDenied { capability: missing.clone() });
        }

        let timeout_ms = step.timeout_ms.unwrap_or(self.options.default_timeout_ms);
        let mut tool_ctx = ToolContext::new(sandbox, &ctx.grants, &step.op, &step_id, timeout_ms);
        let started = Instant::now();
        let result = tool.invoke(&inputs, &mut tool_ctx);
        let elapsed = started.elapsed();
        let writes = tool_ctx.into_writes();

        let result = match result {
            Ok(_) if elapsed > Duration::from_millis(timeout_ms) => Err(CoreEngineError::Timeout { op: step.op.clone(),
                                                                                                    timeout_ms }),
            Ok(output) => Ok((output.value, output.usage)),
            Err(e) => Err(e),
        };
        StepAttempt { result, writes }
    }

    /// Cierra el run: fingerprint, totales y `run_end`.
    fn finish(&mut self,
              mut report: RunReport,
              ctx: ExecutionContext,
              failure: Option<RunFailure>)
              -> Result<RunReport, CoreEngineError> {
        report.status = if failure.is_some() { RunStatus::Aborted } else { RunStatus::Completed };
        report.totals = ctx.meter.totals();
        report.outputs = ctx.bindings;
        if report.status == RunStatus::Completed && !report.dry_run {
            let hashes: Vec<String> = report.steps.iter().filter_map(|s| s.output_hash.clone()).collect();
            report.fingerprint = Some(RunFingerprintInput { engine_version: ENGINE_VERSION,
                                                            plan_id: &report.plan_id,
                                                            step_output_hashes: &hashes }.fingerprint());
        }
        report.failure = failure;

        self.log(report.run_id,
                 TxEntryKind::RunEnd { status: report.status,
                                       failed_step: report.failure.as_ref().and_then(|f| f.step_id.clone()),
                                       error: report.failure.as_ref().map(|f| f.error.clone()),
                                       artifacts: report.artifacts.clone(),
                                       totals: report.totals,
                                       fingerprint: report.fingerprint.clone() })?;
        info!("run {} {}: {} ok, {} failed, {} skipped, cost {} USD",
              report.run_id,
              report.status.as_str(),
              report.count(StepStatus::Ok),
              report.count(StepStatus::Failed),
              report.count(StepStatus::Skipped),
              report.totals.cost_usd);
        Ok(report)
    }
}

impl<S> std::fmt::Debug for PlanExecutor<S> where S: TxStore
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
         .field("registry", &self.registry)
         .field("policy", &self.broker.policy_name())
         .field("options", &self.options)
         .finish()
    }
}
