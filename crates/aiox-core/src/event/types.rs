//! Tipos de entrada del log de transacciones.
//!
//! Rol en el kernel:
//! - Cada run del `PlanExecutor` emite entradas a un `TxStore` append-only.
//! - Las entradas permiten reconstruir el estado de cada run (`repo`) y
//!   alimentan al Packager (hashes esperados) y a `undo`.
//! - `TxEntryKind` es el contrato observable y estable del kernel. Una entrada
//!   nunca se reescribe ni se borra.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{CoreEngineError, ErrorClass};
use crate::meter::ResourceUsage;
use crate::model::{ArtifactRecord, Capability, GrantDecision, RunStatus, StepStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxEntryKind {
    /// Primera entrada de un run.
    RunStart {
        plan_id: String,
        goal: String,
        step_count: usize,
        engine_version: String,
        dry_run: bool,
        replay: bool,
        /// Digest del snapshot de `in/` que el plan referencia al arrancar.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inputs_digest: Option<String>,
    },
    /// Decisión fresca del broker para una capability declarada.
    CapabilityCheck {
        capability: Capability,
        decision: GrantDecision,
        policy: String,
    },
    StepStart {
        step_index: usize,
        step_id: String,
        op: String,
    },
    /// Cierre de un step (`ok`, `failed` o `skipped` en dry-run).
    StepEnd {
        step_index: usize,
        step_id: String,
        op: String,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_hash: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<ResourceUsage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<CoreEngineError>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_class: Option<ErrorClass>,
        /// `{op, in}` previsto; sólo en dry-run.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intent: Option<Value>,
    },
    ArtifactWritten {
        step_id: String,
        artifact: ArtifactRecord,
    },
    /// Última entrada de un run.
    RunEnd {
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failed_step: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<CoreEngineError>,
        artifacts: Vec<ArtifactRecord>,
        totals: ResourceUsage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fingerprint: Option<String>,
    },
    /// Entrada compensatoria escrita por `undo`, una por archivo creado por
    /// el run revertido.
    ArtifactReverted {
        reverted_run: Uuid,
        path: String,
        /// Hash en disco al momento del undo; `None` si el archivo ya no estaba.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha256: Option<String>,
        /// `undo` no lo eliminó: cambió después del run o ya no estaba.
        #[serde(default)]
        kept: bool,
    },
}

impl TxEntryKind {
    pub fn name(&self) -> &'static str {
        match self {
            TxEntryKind::RunStart { .. } => "run_start",
            TxEntryKind::CapabilityCheck { .. } => "capability_check",
            TxEntryKind::StepStart { .. } => "step_start",
            TxEntryKind::StepEnd { .. } => "step_end",
            TxEntryKind::ArtifactWritten { .. } => "artifact_written",
            TxEntryKind::RunEnd { .. } => "run_end",
            TxEntryKind::ArtifactReverted { .. } => "artifact_reverted",
        }
    }

    pub fn is_run_end(&self) -> bool {
        matches!(self, TxEntryKind::RunEnd { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxEntry {
    /// Secuencia global del log, asignada por el store (orden de append).
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub run_id: Uuid,
    #[serde(flatten)]
    pub kind: TxEntryKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::Micros;
    use serde_json::json;

    #[test]
    fn entry_serializes_flat_with_kind_tag() {
        let e = TxEntry { seq: 3,
                          ts: Utc::now(),
                          run_id: Uuid::nil(),
                          kind: TxEntryKind::StepEnd { step_index: 1,
                                                       step_id: "01-profile".into(),
                                                       op: "profile".into(),
                                                       status: StepStatus::Failed,
                                                       output_hash: None,
                                                       usage: Some(ResourceUsage::new(Micros(10), Micros::ZERO, 0)),
                                                       error: Some(CoreEngineError::tool("profile", "bad column")),
                                                       error_class: Some(ErrorClass::Runtime),
                                                       intent: None } };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["kind"], "step_end");
        assert_eq!(v["seq"], 3);
        assert_eq!(v["status"], "failed");
        assert_eq!(v["usage"]["cost_usd"], "0.000010");
        assert_eq!(v["error"]["error"], "tool_execution");
        assert!(v.get("output_hash").is_none());
        let back: TxEntry = serde_json::from_value(v).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn capability_check_keeps_text_form() {
        let kind = TxEntryKind::CapabilityCheck { capability: "fs.write@out".parse().unwrap(),
                                                  decision: GrantDecision::Granted,
                                                  policy: "auto_approve".into() };
        let v = serde_json::to_value(&kind).unwrap();
        assert_eq!(v, json!({"kind": "capability_check", "capability": "fs.write@out",
                             "decision": "granted", "policy": "auto_approve"}));
        assert_eq!(kind.name(), "capability_check");
    }
}
