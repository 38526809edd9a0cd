//! Constantes del motor core.
//!
//! Este módulo agrupa valores estáticos que participan en el cálculo de
//! fingerprints, en la identidad de packages y en el layout del sandbox.
//! Cambios en estas constantes afectan la reproducibilidad si forman parte
//! del input del hashing (`ENGINE_VERSION` y `PACKAGE_FORMAT_VERSION` lo son).

/// Versión lógica del motor. Se incluye en el fingerprint de cada step y del
/// run para que un cambio incompatible del engine invalide los fingerprints
/// aunque el plan y los datos no cambien.
pub const ENGINE_VERSION: &str = "K1.0";

/// Versión del formato `.aiox`. Entra en el manifest y por tanto en el id.
pub const PACKAGE_FORMAT_VERSION: u32 = 1;

/// Extensión de los packages sellados.
pub const PACKAGE_EXTENSION: &str = "aiox";

/// Versión del layout del sandbox escrita en el marker.
pub const SANDBOX_LAYOUT_VERSION: u32 = 1;

/// Nombre del marker que identifica un directorio como sandbox.
pub const SANDBOX_MARKER: &str = ".aiox-sandbox";

pub const DIR_IN: &str = "in";
pub const DIR_OUT: &str = "out";
pub const DIR_TMP: &str = "tmp";
pub const DIR_LOGS: &str = "logs";
pub const DIR_PACKAGES: &str = "packages";

/// Subdirectorios fijos, en el orden en que se crean.
pub const SANDBOX_DIRS: [&str; 5] = [DIR_IN, DIR_OUT, DIR_TMP, DIR_LOGS, DIR_PACKAGES];

/// Stream append-only de transacciones (relativo a la raíz del sandbox).
pub const TX_LOG_FILE: &str = "logs/tx.jsonl";

/// Índice externo run_id -> rango de bytes del log.
pub const TX_INDEX_FILE: &str = "logs/tx.index.json";

/// Lock exclusivo de run.
pub const RUN_LOCK_FILE: &str = "logs/.run.lock";

/// Allow-list opcional de capabilities (política no interactiva).
pub const POLICY_FILE: &str = "policy.json";

/// Timeout por defecto de una invocación de tool.
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

/// Timeout por defecto para adquirir el lock del sandbox.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
