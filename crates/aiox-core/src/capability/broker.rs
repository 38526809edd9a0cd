use indexmap::IndexMap;
use log::{debug, warn};

use super::policy::{ApprovalPolicy, CapabilityRequest};
use crate::model::{Capability, GrantDecision};

/// Decisiones de un run, en orden de solicitud. Inmutables una vez tomadas.
#[derive(Debug, Clone, Default)]
pub struct GrantTable {
    decisions: IndexMap<Capability, GrantDecision>,
}

impl GrantTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decision(&self, capability: &Capability) -> Option<GrantDecision> {
        self.decisions.get(capability).copied()
    }

    /// Registra una decisión; una decisión existente nunca se sobrescribe.
    pub fn record(&mut self, capability: Capability, decision: GrantDecision) -> GrantDecision {
        *self.decisions.entry(capability).or_insert(decision)
    }

    /// ¿Existe una capability concedida de nombre `name` cuyo scope cubre
    /// `path` (ruta relativa al sandbox)?
    pub fn permits(&self, name: &str, path: Option<&str>) -> bool {
        self.decisions
            .iter()
            .any(|(cap, decision)| decision.is_granted() && cap.covers(name, path))
    }

    /// ¿Hay alguna capability `name` concedida, con cualquier scope?
    pub fn allows_name(&self, name: &str) -> bool {
        self.decisions.iter().any(|(cap, decision)| decision.is_granted() && cap.name == name)
    }

    pub fn granted(&self) -> impl Iterator<Item = &Capability> {
        self.decisions.iter().filter(|(_, d)| d.is_granted()).map(|(c, _)| c)
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

/// Media entre el executor y la política de aprobación.
pub struct CapabilityBroker {
    policy: Box<dyn ApprovalPolicy>,
}

impl CapabilityBroker {
    pub fn new(policy: impl ApprovalPolicy + 'static) -> Self {
        Self { policy: Box::new(policy) }
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    /// Primera solicitud del run: consulta la política y cachea la decisión.
    /// Solicitudes posteriores reutilizan la decisión cacheada.
    pub fn request(&mut self, grants: &mut GrantTable, request: &CapabilityRequest) -> GrantDecision {
        if let Some(decision) = grants.decision(&request.capability) {
            return decision;
        }
        let decision = self.policy.decide(request);
        match decision {
            GrantDecision::Granted => debug!("capability {} granted by {}", request.capability, self.policy.name()),
            GrantDecision::Denied => warn!("capability {} denied by {}", request.capability, self.policy.name()),
        }
        grants.record(request.capability.clone(), decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::InteractivePrompt;
    use crate::model::capability::{FS_READ, FS_WRITE};
    use std::cell::Cell;
    use std::rc::Rc;

    struct Counting(Rc<Cell<usize>>);

    impl ApprovalPolicy for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn decide(&mut self, _request: &CapabilityRequest) -> GrantDecision {
            self.0.set(self.0.get() + 1);
            GrantDecision::Granted
        }
    }

    fn req(cap: Capability) -> CapabilityRequest {
        CapabilityRequest { capability: cap,
                            plan_id: "p".into(),
                            goal: "g".into() }
    }

    #[test]
    fn decision_is_cached_per_run() {
        let mut broker = CapabilityBroker::new(InteractivePrompt::new(std::io::Cursor::new(b"y\n".to_vec()), Vec::new()));
        let mut grants = GrantTable::new();
        assert!(broker.request(&mut grants, &req(Capability::new(FS_READ))).is_granted());
        // El input ya está agotado: una segunda pregunta denegaría.
        assert!(broker.request(&mut grants, &req(Capability::new(FS_READ))).is_granted());
        assert_eq!(grants.len(), 1);

        let mut next_run = GrantTable::new();
        assert!(!broker.request(&mut next_run, &req(Capability::new(FS_READ))).is_granted(),
                "a new run asks again");
    }

    #[test]
    fn permits_checks_name_and_scope() {
        let mut grants = GrantTable::new();
        grants.record(Capability::scoped(FS_WRITE, "out"), GrantDecision::Granted);
        grants.record(Capability::new(FS_READ), GrantDecision::Denied);
        assert!(grants.permits(FS_WRITE, Some("out/report.md")));
        assert!(!grants.permits(FS_WRITE, Some("in/data.csv")));
        assert!(!grants.permits(FS_READ, Some("in/data.csv")));
        assert_eq!(grants.record(Capability::new(FS_READ), GrantDecision::Granted), GrantDecision::Denied);
        assert_eq!(grants.granted().count(), 1);
    }

    #[test]
    fn counting_policy_consulted_once() {
        let calls = Rc::new(Cell::new(0));
        let mut broker = CapabilityBroker::new(Counting(Rc::clone(&calls)));
        let mut grants = GrantTable::new();
        for _ in 0..3 {
            broker.request(&mut grants, &req(Capability::new(FS_READ)));
        }
        broker.request(&mut grants, &req(Capability::new(FS_WRITE)));
        assert_eq!(calls.get(), 2, "one consultation per distinct capability");
        assert_eq!(broker.policy_name(), "counting");
    }
}
