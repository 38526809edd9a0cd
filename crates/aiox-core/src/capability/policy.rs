use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::errors::CoreEngineError;
use crate::model::{Capability, GrantDecision};

/// Solicitud presentada a la política: qué capability y para qué plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRequest {
    pub capability: Capability,
    pub plan_id: String,
    pub goal: String,
}

/// Política de aprobación. El tipo de retorno es fijo: una política nunca
/// falla, en el peor caso deniega.
pub trait ApprovalPolicy {
    fn name(&self) -> &str;
    fn decide(&mut self, request: &CapabilityRequest) -> GrantDecision;
}

impl<P: ApprovalPolicy + ?Sized> ApprovalPolicy for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn decide(&mut self, request: &CapabilityRequest) -> GrantDecision {
        (**self).decide(request)
    }
}

/// Aprueba todo (operador con `--yes`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

impl ApprovalPolicy for AutoApprove {
    fn name(&self) -> &str {
        "auto_approve"
    }

    fn decide(&mut self, _request: &CapabilityRequest) -> GrantDecision {
        GrantDecision::Granted
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl ApprovalPolicy for DenyAll {
    fn name(&self) -> &str {
        "deny_all"
    }

    fn decide(&mut self, _request: &CapabilityRequest) -> GrantDecision {
        GrantDecision::Denied
    }
}

/// Documento `policy.json` en la raíz del sandbox. Sólo lectura.
///
/// ```json
/// { "grants": { "*": { "fs.read": true }, "sha256:<plan>": { "fs.write@out": true } } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub grants: BTreeMap<String, BTreeMap<String, bool>>,
}

/// Lista blanca no interactiva, global y/o por plan.
#[derive(Debug, Clone, Default)]
pub struct StaticAllowList {
    global: Vec<Capability>,
    per_plan: BTreeMap<String, Vec<Capability>>,
}

impl StaticAllowList {
    pub fn new(allowed: impl IntoIterator<Item = Capability>) -> Self {
        Self { global: allowed.into_iter().collect(),
               per_plan: BTreeMap::new() }
    }

    pub fn allow_for_plan(mut self, plan_id: &str, capability: Capability) -> Self {
        self.per_plan.entry(plan_id.to_string()).or_default().push(capability);
        self
    }

    /// Carga `policy.json`. Un archivo ausente equivale a una lista vacía.
    pub fn from_policy_file(path: &Path) -> Result<Self, CoreEngineError> {
        if !path.exists() {
            debug!("no policy file at {}", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let doc: PolicyFile = serde_json::from_str(&text).map_err(|e| {
                                                             CoreEngineError::SandboxLayout(format!("corrupt policy file {}: {e}",
                                                                                                    path.display()))
                                                         })?;
        let mut list = Self::default();
        for (key, caps) in doc.grants {
            let allowed = caps.into_iter()
                              .filter(|(_, granted)| *granted)
                              .map(|(cap, _)| cap.parse::<Capability>())
                              .collect::<Result<Vec<_>, _>>()?;
            if key == "*" {
                list.global.extend(allowed);
            } else {
                list.per_plan.entry(key).or_default().extend(allowed);
            }
        }
        Ok(list)
    }

    fn allows(allowed: &Capability, requested: &Capability) -> bool {
        match &requested.scope {
            None => allowed.name == requested.name && allowed.scope.is_none(),
            Some(scope) => allowed.covers(&requested.name, Some(scope)),
        }
    }
}

impl ApprovalPolicy for StaticAllowList {
    fn name(&self) -> &str {
        "static_allow_list"
    }

    fn decide(&mut self, request: &CapabilityRequest) -> GrantDecision {
        let plan_specific = self.per_plan.get(&request.plan_id).map(Vec::as_slice).unwrap_or_default();
        if self.global.iter().chain(plan_specific).any(|a| Self::allows(a, &request.capability)) {
            GrantDecision::Granted
        } else {
            GrantDecision::Denied
        }
    }
}

/// Pregunta al operador por cualquier par `BufRead`/`Write`.
pub struct InteractivePrompt<R, W> {
    input: R,
    output: W,
    prompts: usize,
}

impl<R: BufRead, W: Write> InteractivePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input,
               output,
               prompts: 0 }
    }

    /// Cantidad de preguntas realizadas.
    pub fn prompts(&self) -> usize {
        self.prompts
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead, W: Write> ApprovalPolicy for InteractivePrompt<R, W> {
    fn name(&self) -> &str {
        "interactive_prompt"
    }

    fn decide(&mut self, request: &CapabilityRequest) -> GrantDecision {
        self.prompts += 1;
        let asked = write!(self.output,
                           "Grant capability {} for plan {}? [y/N] ",
                           request.capability, request.plan_id).and_then(|_| self.output.flush());
        if let Err(e) = asked {
            warn!("cannot prompt for {}: {e}", request.capability);
            return GrantDecision::Denied;
        }
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(_) if matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes") => GrantDecision::Granted,
            Ok(_) => GrantDecision::Denied,
            Err(e) => {
                warn!("cannot read answer for {}: {e}", request.capability);
                GrantDecision::Denied
            }
        }
    }
}

/// Política de replay: deniega toda capability no determinista y delega el
/// resto.
pub struct ReplayPolicy<P> {
    inner: P,
}

impl<P: ApprovalPolicy> ReplayPolicy<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: ApprovalPolicy> ApprovalPolicy for ReplayPolicy<P> {
    fn name(&self) -> &str {
        "replay"
    }

    fn decide(&mut self, request: &CapabilityRequest) -> GrantDecision {
        if request.capability.is_nondeterministic() {
            debug!("replay denies non-deterministic capability {}", request.capability);
            return GrantDecision::Denied;
        }
        self.inner.decide(request)
    }
}
