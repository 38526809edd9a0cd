//! Capabilities: permisos gruesos que un plan declara y que el broker concede
//! o deniega una sola vez por run.
//!
//! Forma textual: `name` o `name@scope`, donde `scope` es un prefijo de ruta
//! relativo al sandbox (`fs.write@out`). Sin scope, el permiso cubre todo el
//! sandbox.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CoreEngineError;

pub const FS_READ: &str = "fs.read";
pub const FS_WRITE: &str = "fs.write";
pub const PROC_SPAWN: &str = "proc.spawn";
pub const NET_FETCH: &str = "net.fetch";
pub const CLOCK_READ: &str = "clock.read";
pub const RANDOM: &str = "random";

/// Capabilities cuyo efecto no es función pura de los inputs empaquetados.
pub const NONDETERMINISTIC: [&str; 3] = [NET_FETCH, CLOCK_READ, RANDOM];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capability {
    pub name: String,
    pub scope: Option<String>,
}

impl Capability {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(),
               scope: None }
    }

    pub fn scoped(name: &str, scope: &str) -> Self {
        Self { name: name.to_string(),
               scope: Some(normalize_scope(scope)) }
    }

    pub fn is_nondeterministic(&self) -> bool {
        NONDETERMINISTIC.contains(&self.name.as_str())
    }

    /// ¿Cubre esta capability una operación `name` sobre `path` (relativo al
    /// sandbox, separado por `/`)? El scope se compara por componentes, de
    /// modo que `out` cubre `out/a.md` pero no `outbox/a.md`.
    pub fn covers(&self, name: &str, path: Option<&str>) -> bool {
        if self.name != name {
            return false;
        }
        match (&self.scope, path) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(scope), Some(p)) => {
                let p = p.trim_start_matches("./");
                p == scope || p.starts_with(&format!("{scope}/"))
            }
        }
    }
}

fn normalize_scope(scope: &str) -> String {
    scope.trim_start_matches("./").trim_end_matches('/').to_string()
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}@{}", self.name, scope),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for Capability {
    type Err = CoreEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, scope) = match s.split_once('@') {
            Some((n, sc)) => (n, Some(sc)),
            None => (s, None),
        };
        let valid_name = !name.is_empty()
                         && name.chars()
                                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_');
        if !valid_name {
            return Err(CoreEngineError::InvalidPlan(format!("malformed capability '{s}'")));
        }
        match scope {
            Some(sc) if normalize_scope(sc).is_empty() => {
                Err(CoreEngineError::InvalidPlan(format!("empty scope in capability '{s}'")))
            }
            Some(sc) => Ok(Capability::scoped(name, sc)),
            None => Ok(Capability::new(name)),
        }
    }
}

impl TryFrom<String> for Capability {
    type Error = CoreEngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Capability> for String {
    fn from(value: Capability) -> Self {
        value.to_string()
    }
}

/// Decisión del broker. Inmutable una vez tomada dentro de un run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantDecision {
    Granted,
    Denied,
}

impl GrantDecision {
    pub fn is_granted(self) -> bool {
        matches!(self, GrantDecision::Granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_scoped() {
        let c: Capability = "fs.write@./out/".parse().unwrap();
        assert_eq!(c, Capability::scoped("fs.write", "out"));
        assert_eq!(c.to_string(), "fs.write@out");
        assert_eq!("fs.read".parse::<Capability>().unwrap(), Capability::new(FS_READ));
        assert!("FS READ".parse::<Capability>().is_err());
        assert!("fs.write@".parse::<Capability>().is_err());
    }

    #[test]
    fn scope_matches_by_component() {
        let c = Capability::scoped(FS_WRITE, "out");
        assert!(c.covers(FS_WRITE, Some("out/report.md")));
        assert!(c.covers(FS_WRITE, Some("out")));
        assert!(!c.covers(FS_WRITE, Some("outbox/report.md")));
        assert!(!c.covers(FS_READ, Some("out/report.md")));
        assert!(Capability::new(FS_WRITE).covers(FS_WRITE, Some("tmp/x")));
    }

    #[test]
    fn serde_uses_string_form() {
        let v = serde_json::to_value(Capability::scoped(FS_READ, "in")).unwrap();
        assert_eq!(v, serde_json::json!("fs.read@in"));
        assert!(Capability::new(NET_FETCH).is_nondeterministic());
        assert!(!Capability::new(FS_READ).is_nondeterministic());
    }
}
