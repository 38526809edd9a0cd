//! Modelos del kernel (Plan, Capability, ArtifactRecord, ExecutionContext,...)

pub mod artifact;
pub mod capability;
pub mod context;
pub mod fingerprint;
pub mod plan;
pub mod status;

pub use artifact::ArtifactRecord;
pub use capability::{Capability, GrantDecision};
pub use context::ExecutionContext;
pub use fingerprint::RunFingerprintInput;
pub use plan::{as_reference, reference, Plan, PlanStep};
pub use status::{RunStatus, StepStatus};
