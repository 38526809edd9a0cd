//! aiox-core: kernel de ejecución de planes con capabilities, log de
//! transacciones, empaquetado y replay determinista.
pub mod capability;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod event;
pub mod hashing;
pub mod meter;
pub mod model;
pub mod package;
pub mod replay;
pub mod repo;
pub mod sandbox;
pub mod tool;

pub use capability::{ApprovalPolicy, AutoApprove, CapabilityBroker, CapabilityRequest, DenyAll, GrantTable,
                     InteractivePrompt, ReplayPolicy, StaticAllowList};
pub use engine::{undo_last_run, CancelToken, ExecutionOptions, PlanExecutor, RunFailure, RunReport, StepOutcome,
                 UndoReport};
pub use errors::{classify_error, CoreEngineError, ErrorClass};
pub use event::{InMemoryTxStore, TxEntry, TxEntryKind, TxStore};
pub use meter::{Micros, ResourceBudget, ResourceMeter, ResourceUsage, RunMeter};
pub use model::{ArtifactRecord, Capability, ExecutionContext, GrantDecision, Plan, PlanStep, RunStatus, StepStatus};
pub use package::{Package, PackageManifest, Packager};
pub use replay::{ArtifactOutcome, ReplayReport, ReplayVerifier, Verdict};
pub use repo::{latest_completed_run, load_runs, RunInstance};
pub use sandbox::{RunLock, Sandbox, ScratchDir};
pub use tool::{Tool, ToolContext, ToolInputs, ToolManifest, ToolOutput, ToolRegistry};
