//! Capability Broker y políticas de aprobación.
//!
//! Una capability se decide una sola vez por run; la decisión queda en la
//! [`GrantTable`] del run y no se vuelve a consultar a la política.

mod broker;
mod policy;

pub use broker::{CapabilityBroker, GrantTable};
pub use policy::{ApprovalPolicy, AutoApprove, CapabilityRequest, DenyAll, InteractivePrompt, PolicyFile, ReplayPolicy,
                 StaticAllowList};
