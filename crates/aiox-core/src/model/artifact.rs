//! Registro de un archivo finalizado dentro del sandbox.
//!
//! El hash se calcula en el momento en que la escritura se hace efectiva
//! (rename atómico del temporal), nunca antes. `created` indica si el archivo
//! no existía previamente; `undo` sólo elimina archivos creados por el run.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Ruta relativa al sandbox, separada por `/`.
    pub path: String,
    /// `sha256:<hex>` del contenido escrito.
    pub sha256: String,
    pub bytes: u64,
    pub created: bool,
}

impl ArtifactRecord {
    pub fn new(path: &str, sha256: &str, bytes: u64, created: bool) -> Self {
        Self { path: path.to_string(),
               sha256: sha256.to_string(),
               bytes,
               created }
    }
}
