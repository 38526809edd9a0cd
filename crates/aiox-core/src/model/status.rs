use serde::{Deserialize, Serialize};

/// Estado de un step dentro de un run.
///
/// Transiciones válidas:
/// - `Pending` -> `Running` -> `Ok` | `Failed`
/// - `Pending` -> `Skipped` (dry-run)
///
/// Un step que nunca arrancó (fallo previo) permanece `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Ok,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Ok | StepStatus::Failed | StepStatus::Skipped)
    }
}

/// Estado de un run: `Initializing` -> `Executing` -> `Completed` | `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Initializing,
    Executing,
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Initializing => "initializing",
            RunStatus::Executing => "executing",
            RunStatus::Completed => "completed",
            RunStatus::Aborted => "aborted",
        }
    }
}
