use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use uuid::Uuid;

use crate::errors::CoreEngineError;

/// Directorio temporal bajo `tmp/` con vida acotada: se elimina en `Drop`,
/// tanto en éxito como en error o unwinding.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub(crate) fn create(tmp_root: &Path, label: &str) -> Result<Self, CoreEngineError> {
        let safe: String = label.chars()
                                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                                .collect();
        let path = tmp_root.join(format!("{safe}-{}", Uuid::new_v4()));
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to clean scratch dir {}: {e}", self.path.display());
            }
        }
    }
}
