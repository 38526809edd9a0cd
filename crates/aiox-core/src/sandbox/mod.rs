//! Sandbox Manager.
//!
//! Árbol de trabajo aislado con layout fijo (`in/ out/ tmp/ logs/ packages/`)
//! y un marker `.aiox-sandbox`. Toda ruta que un tool toca pasa por
//! [`Sandbox::resolve`], que rechaza cualquier resultado fuera de la raíz
//! canónica (traversal con `..`, rutas absolutas ajenas, symlinks que salen).

mod lock;
mod scratch;

use std::fs;
use std::path::{Component, Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

pub use lock::RunLock;
pub use scratch::ScratchDir;

use crate::constants::{DIR_IN, DIR_LOGS, DIR_OUT, DIR_PACKAGES, DIR_TMP, SANDBOX_DIRS, SANDBOX_LAYOUT_VERSION,
                       SANDBOX_MARKER};
use crate::errors::CoreEngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct SandboxMarker {
    layout_version: u32,
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Crea el layout de forma idempotente. Un marker existente se respeta
    /// salvo que `force` esté activo.
    pub fn create(root: &Path, force: bool) -> Result<Self, CoreEngineError> {
        fs::create_dir_all(root)?;
        let root = fs::canonicalize(root)?;
        for dir in SANDBOX_DIRS {
            fs::create_dir_all(root.join(dir))?;
        }
        let marker = root.join(SANDBOX_MARKER);
        if force || !marker.exists() {
            let body = serde_json::to_string(&SandboxMarker { layout_version: SANDBOX_LAYOUT_VERSION })?;
            fs::write(&marker, body)?;
            info!("sandbox initialized at {}", root.display());
        } else {
            read_marker(&root)?;
        }
        Ok(Self { root })
    }

    /// Abre un sandbox existente; exige un marker con versión conocida.
    pub fn open(root: &Path) -> Result<Self, CoreEngineError> {
        let root = fs::canonicalize(root).map_err(|e| {
                                              CoreEngineError::SandboxLayout(format!("{}: {e}", root.display()))
                                          })?;
        read_marker(&root)?;
        for dir in SANDBOX_DIRS {
            fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self { root })
    }

    /// Crea un sandbox en una raíz inexistente o vacía (usado por replay).
    pub fn create_fresh(root: &Path) -> Result<Self, CoreEngineError> {
        if root.exists() {
            let mut entries = fs::read_dir(root)?;
            if entries.next().is_some() {
                return Err(CoreEngineError::SandboxLayout(format!("{} is not empty", root.display())));
            }
        }
        Self::create(root, false)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn in_dir(&self) -> PathBuf {
        self.root.join(DIR_IN)
    }

    pub fn out_dir(&self) -> PathBuf {
        self.root.join(DIR_OUT)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(DIR_TMP)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(DIR_LOGS)
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.join(DIR_PACKAGES)
    }

    /// `in/` y `out/` vacíos.
    pub fn is_pristine(&self) -> Result<bool, CoreEngineError> {
        for dir in [self.in_dir(), self.out_dir()] {
            if fs::read_dir(&dir)?.next().is_some() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Resuelve `path` (relativo a la raíz o absoluto) a una ruta real bajo la
    /// raíz canónica. Sólo lee metadata; no crea ni modifica nada.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, CoreEngineError> {
        let path = path.as_ref();
        let escape = || CoreEngineError::PathEscape { path: path.display().to_string() };

        let relative = if path.is_absolute() {
            let normalized = normalize_absolute(path).ok_or_else(escape)?;
            normalized.strip_prefix(&self.root).map_err(|_| escape())?.to_path_buf()
        } else {
            path.to_path_buf()
        };

        // La normalización léxica nunca sube por encima de la raíz.
        let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(p) => parts.push(p),
                Component::CurDir => {}
                Component::ParentDir => {
                    parts.pop().ok_or_else(escape)?;
                }
                Component::RootDir | Component::Prefix(_) => return Err(escape()),
            }
        }
        let lexical: PathBuf = parts.iter().fold(self.root.clone(), |acc, p| acc.join(p));

        // Symlinks: canonicalizar el prefijo existente más largo.
        let mut existing = lexical.as_path();
        let mut rest: Vec<&std::ffi::OsStr> = Vec::new();
        loop {
            if fs::symlink_metadata(existing).is_ok() {
                break;
            }
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    rest.push(name);
                    existing = parent;
                }
                _ => return Err(escape()),
            }
        }
        // Un symlink colgante no se puede canonicalizar: se trata como escape.
        let canonical = fs::canonicalize(existing).map_err(|_| escape())?;
        if !canonical.starts_with(&self.root) {
            debug!("path escape rejected: {} -> {}", path.display(), canonical.display());
            return Err(escape());
        }
        Ok(rest.iter().rev().fold(canonical, |acc, p| acc.join(p)))
    }

    /// Forma relativa al sandbox separada por `/`, usada en el log.
    pub fn relative(&self, path: impl AsRef<Path>) -> Result<String, CoreEngineError> {
        let resolved = self.resolve(path)?;
        let rel = resolved.strip_prefix(&self.root)
                          .map_err(|_| CoreEngineError::PathEscape { path: resolved.display().to_string() })?;
        Ok(rel.components()
              .filter_map(|c| match c {
                  Component::Normal(p) => Some(p.to_string_lossy().into_owned()),
                  _ => None,
              })
              .collect::<Vec<_>>()
              .join("/"))
    }

    /// Subárbol `tmp/<label>-<uuid>` eliminado al soltarse.
    pub fn scratch(&self, label: &str) -> Result<ScratchDir, CoreEngineError> {
        ScratchDir::create(&self.tmp_dir(), label)
    }

    /// Lock exclusivo del sandbox para un run.
    pub fn lock(&self, run_id: uuid::Uuid, timeout: std::time::Duration) -> Result<RunLock, CoreEngineError> {
        RunLock::acquire(&self.root, run_id, timeout)
    }
}

fn read_marker(root: &Path) -> Result<SandboxMarker, CoreEngineError> {
    let marker_path = root.join(SANDBOX_MARKER);
    let text = fs::read_to_string(&marker_path).map_err(|_| {
                                                    CoreEngineError::SandboxLayout(format!("missing marker {}",
                                                                                           marker_path.display()))
                                                })?;
    let marker: SandboxMarker = serde_json::from_str(&text).map_err(|e| {
                                                               CoreEngineError::SandboxLayout(format!("corrupt marker: {e}"))
                                                           })?;
    if marker.layout_version != SANDBOX_LAYOUT_VERSION {
        return Err(CoreEngineError::SandboxLayout(format!("unsupported layout version {}", marker.layout_version)));
    }
    Ok(marker)
}

fn normalize_absolute(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(p) => out.push(p),
        }
    }
    Some(out)
}
