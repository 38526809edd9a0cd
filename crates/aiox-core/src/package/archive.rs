//! Codificación del paquete como tar determinista.
//!
//! Entradas ordenadas por ruta, mtime 0, uid/gid 0, modo 0644. Mismo
//! contenido, mismos bytes.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use log::info;
use tar::{Archive, Builder, Header};
use tempfile::NamedTempFile;

use super::{Package, PackageManifest};
use crate::constants::DIR_IN;
use crate::errors::CoreEngineError;
use crate::model::Plan;

const MANIFEST_ENTRY: &str = "manifest.json";
const PLAN_ENTRY: &str = "plan.json";

fn integrity(expected: &str, actual: impl Into<String>) -> CoreEngineError {
    CoreEngineError::PackageIntegrity { expected: expected.to_string(),
                                        actual: actual.into() }
}

fn write_deterministic_tar<W: std::io::Write>(out: W, mut files: Vec<(String, Vec<u8>)>) -> std::io::Result<W> {
    files.sort_by(|a, b| a.0.cmp(&b.0));
    let mut builder = Builder::new(out);
    for (name, bytes) in files {
        let mut header = Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_cksum();
        builder.append_data(&mut header, &name, Cursor::new(bytes))?;
    }
    builder.into_inner()
}

impl Package {
    /// Bytes del archivo `.aiox`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreEngineError> {
        let mut files = vec![(MANIFEST_ENTRY.to_string(), self.manifest.canonical_json()?.into_bytes()),
                             (PLAN_ENTRY.to_string(), self.plan.canonical_json().into_bytes())];
        files.extend(self.files.iter().map(|(path, bytes)| (path.clone(), bytes.clone())));
        Ok(write_deterministic_tar(Vec::new(), files)?)
    }

    /// Escribe `<slug>-<hex12>.aiox` en `dir` con reemplazo atómico.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, CoreEngineError> {
        fs::create_dir_all(dir)?;
        let target = dir.join(self.file_name());
        let mut tmp = NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &self.to_bytes()?)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| CoreEngineError::Io(format!("persist {}: {}", target.display(), e.error)))?;
        info!("package {} written to {}", self.id, target.display());
        Ok(target)
    }

    /// Lee y verifica un paquete. El id se re-deriva del manifest; si el nombre
    /// de archivo lleva sufijo `-<hex12>` debe coincidir.
    pub fn read(path: &Path) -> Result<Package, CoreEngineError> {
        let file = File::open(path)?;
        let package = Self::from_reader(file)?;
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        if let Some((_, suffix)) = stem.rsplit_once('-') {
            if suffix.len() == 12 && suffix.chars().all(|c| c.is_ascii_hexdigit()) && suffix != package.short_id() {
                return Err(integrity(suffix, package.short_id()));
            }
        }
        Ok(package)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Package, CoreEngineError> {
        let mut archive = Archive::new(reader);
        let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let raw = entry.path()?.into_owned();
            let name = entry_name(&raw).ok_or_else(|| integrity("relative entry path", raw.display().to_string()))?;
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            entries.insert(name, bytes);
        }

        let manifest_bytes = entries.remove(MANIFEST_ENTRY).ok_or_else(|| integrity(MANIFEST_ENTRY, "missing"))?;
        let manifest: PackageManifest =
            serde_json::from_slice(&manifest_bytes).map_err(|e| integrity(MANIFEST_ENTRY, e.to_string()))?;
        let plan_bytes = entries.remove(PLAN_ENTRY).ok_or_else(|| integrity(PLAN_ENTRY, "missing"))?;
        let plan: Plan = serde_json::from_slice(&plan_bytes).map_err(|e| integrity(PLAN_ENTRY, e.to_string()))?;

        let prefix = format!("{DIR_IN}/");
        if let Some(stray) = entries.keys().find(|k| !k.starts_with(&prefix)) {
            return Err(integrity("only manifest.json, plan.json and in/", stray.clone()));
        }

        let package = Package { id: manifest.package_id()?,
                                manifest,
                                plan,
                                files: entries };
        package.verify()?;
        Ok(package)
    }
}

/// Ruta de entrada normalizada con `/`; `None` si es absoluta o contiene `..`.
fn entry_name(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(p) => parts.push(p.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
