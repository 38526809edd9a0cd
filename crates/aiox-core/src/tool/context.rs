//! Superficie de E/S de un tool.
//!
//! Cada operación se contiene en el sandbox (`Sandbox::resolve`) y se vuelve a
//! comprobar contra la `GrantTable` del run con la ruta concreta, de modo que
//! un scope `fs.write@out` impide escribir en `in/` aunque el step tenga
//! `fs.write` declarado.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tempfile::NamedTempFile;

use crate::capability::GrantTable;
use crate::errors::CoreEngineError;
use crate::hashing::{hash_bytes, prefixed};
use crate::model::capability::{FS_READ, FS_WRITE, PROC_SPAWN};
use crate::model::ArtifactRecord;
use crate::sandbox::{Sandbox, ScratchDir};

const CHILD_POLL: Duration = Duration::from_millis(10);

pub struct ToolContext<'a> {
    sandbox: &'a Sandbox,
    grants: &'a GrantTable,
    op: String,
    step_id: String,
    timeout_ms: u64,
    deadline: Instant,
    writes: Vec<ArtifactRecord>,
}

impl<'a> ToolContext<'a> {
    pub fn new(sandbox: &'a Sandbox, grants: &'a GrantTable, op: &str, step_id: &str, timeout_ms: u64) -> Self {
        Self { sandbox,
               grants,
               op: op.to_string(),
               step_id: step_id.to_string(),
               timeout_ms,
               deadline: Instant::now() + Duration::from_millis(timeout_ms),
               writes: Vec::new() }
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn sandbox(&self) -> &Sandbox {
        self.sandbox
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn deadline_passed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Punto de control cooperativo para tools con bucles largos.
    pub fn check_deadline(&self) -> Result<(), CoreEngineError> {
        if self.deadline_passed() {
            return Err(self.timeout());
        }
        Ok(())
    }

    fn timeout(&self) -> CoreEngineError {
        CoreEngineError::Timeout { op: self.op.clone(),
                                   timeout_ms: self.timeout_ms }
    }

    /// Resuelve y autoriza `path` para la capability `name`.
    fn authorize(&self, name: &str, path: &str) -> Result<(PathBuf, String), CoreEngineError> {
        let resolved = self.sandbox.resolve(path)?;
        let rel = self.sandbox.relative(&resolved)?;
        if !self.grants.permits(name, Some(&rel)) {
            warn!("step '{}' denied {name} on {rel}", self.step_id);
            return Err(CoreEngineError::CapabilityDenied { capability: format!("{name}@{rel}") });
        }
        Ok((resolved, rel))
    }

    /// Ruta real autorizada para lectura (para lectores que abren el archivo
    /// por su cuenta).
    pub fn read_path(&self, path: &str) -> Result<PathBuf, CoreEngineError> {
        Ok(self.authorize(FS_READ, path)?.0)
    }

    pub fn open(&self, path: &str) -> Result<File, CoreEngineError> {
        let resolved = self.read_path(path)?;
        File::open(&resolved).map_err(|e| CoreEngineError::tool(&self.op, format!("cannot open {path}: {e}")))
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>, CoreEngineError> {
        let mut buf = Vec::new();
        self.open(path)?
            .read_to_end(&mut buf)
            .map_err(|e| CoreEngineError::tool(&self.op, format!("cannot read {path}: {e}")))?;
        Ok(buf)
    }

    pub fn read_to_string(&self, path: &str) -> Result<String, CoreEngineError> {
        String::from_utf8(self.read(path)?).map_err(|_| CoreEngineError::tool(&self.op, format!("{path} is not valid UTF-8")))
    }

    /// Escritura atómica: temporal en `tmp/` + rename. El hash se calcula
    /// sobre los bytes finalizados y el registro queda para `artifact_written`.
    pub fn write(&mut self, path: &str, bytes: &[u8]) -> Result<ArtifactRecord, CoreEngineError> {
        let (target, rel) = self.authorize(FS_WRITE, path)?;
        if target.is_dir() {
            return Err(CoreEngineError::tool(&self.op, format!("{rel} is a directory")));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let created = !target.exists();
        let mut tmp = NamedTempFile::new_in(self.sandbox.tmp_dir())?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| CoreEngineError::Io(format!("persist {rel}: {}", e.error)))?;

        let record = ArtifactRecord::new(&rel, &prefixed(&hash_bytes(bytes)), bytes.len() as u64, created);
        debug!("step '{}' wrote {} ({} bytes)", self.step_id, rel, record.bytes);
        self.writes.push(record.clone());
        Ok(record)
    }

    /// Directorio temporal del step, eliminado al soltarse.
    pub fn scratch(&self) -> Result<ScratchDir, CoreEngineError> {
        self.sandbox.scratch(&self.step_id)
    }

    /// Lanza un proceso hijo con cwd en la raíz del sandbox. Si no termina
    /// antes del deadline del step se mata y el step falla con `Timeout`.
    pub fn spawn(&self, mut command: Command) -> Result<Output, CoreEngineError> {
        if !self.grants.allows_name(PROC_SPAWN) {
            return Err(CoreEngineError::CapabilityDenied { capability: PROC_SPAWN.to_string() });
        }
        self.check_deadline()?;
        let mut child = command.current_dir(self.sandbox.root())
                               .stdin(Stdio::null())
                               .stdout(Stdio::piped())
                               .stderr(Stdio::piped())
                               .spawn()
                               .map_err(|e| CoreEngineError::tool(&self.op, format!("spawn failed: {e}")))?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if self.deadline_passed() => {
                    warn!("step '{}' killing child {} at deadline", self.step_id, child.id());
                    if let Err(e) = child.kill() {
                        warn!("kill failed: {e}");
                    }
                    let _ = child.wait();
                    return Err(self.timeout());
                }
                Ok(None) => thread::sleep(CHILD_POLL),
                Err(e) => return Err(CoreEngineError::tool(&self.op, format!("wait failed: {e}"))),
            }
        };
        Ok(Output { status,
                    stdout: stdout.join().unwrap_or_default(),
                    stderr: stderr.join().unwrap_or_default() })
    }

    /// Registros de escrituras finalizadas, en orden.
    pub fn writes(&self) -> &[ArtifactRecord] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<ArtifactRecord> {
        self.writes
    }
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut r) = source {
            let _ = r.read_to_end(&mut buf);
        }
        buf
    })
}

impl std::fmt::Debug for ToolContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
         .field("op", &self.op)
         .field("step_id", &self.step_id)
         .field("timeout_ms", &self.timeout_ms)
         .field("writes", &self.writes.len())
         .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Capability, GrantDecision};

    fn setup(grants: &[Capability]) -> (tempfile::TempDir, Sandbox, GrantTable) {
        let dir = tempfile::tempdir().unwrap();
        let sb = Sandbox::create(&dir.path().join("sb"), false).unwrap();
        let mut table = GrantTable::new();
        for g in grants {
            table.record(g.clone(), GrantDecision::Granted);
        }
        (dir, sb, table)
    }

    #[test]
    fn write_is_scoped_and_recorded() {
        let (_d, sb, grants) = setup(&[Capability::scoped(FS_WRITE, "out")]);
        let mut ctx = ToolContext::new(&sb, &grants, "write_json", "00-write_json", 1_000);
        let rec = ctx.write("out/a/b.json", b"{}").unwrap();
        assert_eq!(rec.path, "out/a/b.json");
        assert!(rec.created);
        assert_eq!(rec.sha256, prefixed(&hash_bytes(b"{}")));
        assert!(ctx.write("out/a/b.json", b"[]").map(|r| !r.created).unwrap(), "overwrite is not a creation");
        assert!(matches!(ctx.write("in/x", b"1"), Err(CoreEngineError::CapabilityDenied { .. })));
        assert!(matches!(ctx.write("../x", b"1"), Err(CoreEngineError::PathEscape { .. })));
        assert!(!sb.root().parent().unwrap().join("x").exists(), "nothing written outside the sandbox");
        assert_eq!(ctx.into_writes().len(), 2);
    }

    #[test]
    fn read_requires_grant() {
        let (_d, sb, grants) = setup(&[]);
        fs::write(sb.root().join("in/data.csv"), "a\n1\n").unwrap();
        let ctx = ToolContext::new(&sb, &grants, "read_csv", "00-read_csv", 1_000);
        assert!(matches!(ctx.read("in/data.csv"), Err(CoreEngineError::CapabilityDenied { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn child_is_killed_at_deadline() {
        let (_d, sb, grants) = setup(&[Capability::new(PROC_SPAWN)]);
        let ctx = ToolContext::new(&sb, &grants, "run_command", "00-run_command", 100);
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let started = Instant::now();
        let res = ctx.spawn(cmd);
        assert!(matches!(res, Err(CoreEngineError::Timeout { timeout_ms: 100, .. })));
        assert!(started.elapsed() < Duration::from_secs(4), "child must not run to completion");
    }
}
