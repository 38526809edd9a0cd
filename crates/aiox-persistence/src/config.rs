//! Configuración del kernel desde variables de entorno.
//! Usa convención `AIOX_*`; `.env` se carga una sola vez si existe.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use aiox_core::constants::{DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_STEP_TIMEOUT_MS};
use aiox_core::{ExecutionOptions, Micros, ResourceBudget};
use dotenvy::dotenv;
use once_cell::sync::Lazy;

use crate::error::ConfigError;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

pub const ENV_SANDBOX_ROOT: &str = "AIOX_SANDBOX_ROOT";
pub const ENV_STEP_TIMEOUT_MS: &str = "AIOX_STEP_TIMEOUT_MS";
pub const ENV_LOCK_TIMEOUT_MS: &str = "AIOX_LOCK_TIMEOUT_MS";
pub const ENV_AUTO_APPROVE: &str = "AIOX_AUTO_APPROVE";
pub const ENV_LOG_FSYNC: &str = "AIOX_LOG_FSYNC";
pub const ENV_MAX_COST_USD: &str = "AIOX_MAX_COST_USD";
pub const ENV_MAX_CARBON_G: &str = "AIOX_MAX_CARBON_G";
pub const ENV_MAX_TOKENS: &str = "AIOX_MAX_TOKENS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub sandbox_root: PathBuf,
    pub step_timeout_ms: u64,
    pub lock_timeout_ms: u64,
    /// Concede toda capability sin preguntar (sólo para automatización).
    pub auto_approve: bool,
    /// `sync_data` tras cada entrada del log.
    pub log_fsync: bool,
    pub budget: ResourceBudget,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { sandbox_root: PathBuf::from("./sandbox"),
               step_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
               lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
               auto_approve: false,
               log_fsync: true,
               budget: ResourceBudget::unlimited() }
    }
}

impl KernelConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        // asegura que .env se haya cargado
        Lazy::force(&DOTENV_LOADED);
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente arbitraria (tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
        where F: Fn(&str) -> Option<String>
    {
        let defaults = Self::default();
        let budget = ResourceBudget { max_cost_usd: parse_opt::<Micros>(&lookup, ENV_MAX_COST_USD)?,
                                      max_carbon_g: parse_opt::<Micros>(&lookup, ENV_MAX_CARBON_G)?,
                                      max_tokens: parse_opt::<u64>(&lookup, ENV_MAX_TOKENS)? };
        let step_timeout_ms = parse_opt::<u64>(&lookup, ENV_STEP_TIMEOUT_MS)?.unwrap_or(defaults.step_timeout_ms);
        if step_timeout_ms == 0 {
            return Err(ConfigError::invalid(ENV_STEP_TIMEOUT_MS, "0", "timeout must be positive"));
        }
        Ok(Self { sandbox_root: lookup(ENV_SANDBOX_ROOT).filter(|v| !v.trim().is_empty())
                                                        .map(PathBuf::from)
                                                        .unwrap_or(defaults.sandbox_root),
                  step_timeout_ms,
                  lock_timeout_ms: parse_opt::<u64>(&lookup, ENV_LOCK_TIMEOUT_MS)?.unwrap_or(defaults.lock_timeout_ms),
                  auto_approve: parse_bool(&lookup, ENV_AUTO_APPROVE)?.unwrap_or(defaults.auto_approve),
                  log_fsync: parse_bool(&lookup, ENV_LOG_FSYNC)?.unwrap_or(defaults.log_fsync),
                  budget })
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions::default().default_timeout_ms(self.step_timeout_ms)
                                   .lock_timeout_ms(self.lock_timeout_ms)
                                   .budget(self.budget)
    }
}

fn parse_opt<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Result<Option<T>, ConfigError>
    where T: FromStr,
          T::Err: std::fmt::Display
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| ConfigError::invalid(var, &raw, e.to_string())),
    }
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Result<Option<bool>, ConfigError> {
    match lookup(var).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::invalid(var, &v, "expected a boolean")),
        },
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
