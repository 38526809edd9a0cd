//! Índice externo del log: run id -> rango de bytes y número de entradas.
//!
//! Se reconstruye escaneando el log al abrir y se persiste con reemplazo
//! atómico al cerrar cada run. Una copia persistida sólo es válida si
//! `log_len` coincide con el largo actual del archivo.

use std::fs;
use std::io::Write;
use std::path::Path;

use aiox_core::TxEntry;
use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::error::PersistenceError;

/// Rango `[start, end)` que contiene todas las líneas de un run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpan {
    pub start: u64,
    pub end: u64,
    pub entries: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIndex {
    /// Largo del log cuando se tomó el índice.
    pub log_len: u64,
    pub next_seq: u64,
    /// Runs en orden de primer append.
    pub runs: IndexMap<Uuid, RunSpan>,
}

/// Resultado del escaneo: índice y si el log termina en una línea parcial.
pub(crate) struct Scan {
    pub index: RunIndex,
    pub partial_tail: bool,
}

impl RunIndex {
    pub fn record(&mut self, entry: &TxEntry, start: u64, end: u64) {
        let span = self.runs.entry(entry.run_id).or_insert(RunSpan { start, end, entries: 0 });
        span.end = end;
        span.entries += 1;
        self.next_seq = self.next_seq.max(entry.seq + 1);
        self.log_len = end;
    }

    /// Carga el índice persistido; `None` si falta o no es legible.
    pub fn load(path: &Path) -> Option<RunIndex> {
        let bytes = fs::read(path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!("ignoring unreadable tx index {}: {e}", path.display());
                None
            }
        }
    }

    pub fn persist(&self, path: &Path) -> Result<(), PersistenceError> {
        let dir = path.parent()
                      .ok_or_else(|| PersistenceError::CorruptIndex(format!("{} has no parent", path.display())))?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&serde_json::to_vec(self)?)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| PersistenceError::Io(e.error.to_string()))?;
        debug!("tx index persisted ({} runs)", self.runs.len());
        Ok(())
    }

    /// Reconstruye el índice leyendo el log completo. Las líneas ilegibles se
    /// saltan; una última línea sin `\n` se considera escritura interrumpida.
    pub(crate) fn scan(bytes: &[u8]) -> Scan {
        let mut index = RunIndex::default();
        let mut offset = 0u64;
        let mut rest = bytes;
        let mut partial_tail = false;
        while !rest.is_empty() {
            let Some(pos) = rest.iter().position(|b| *b == b'\n') else {
                warn!("tx log ends with a partial line at byte {offset}; ignoring it");
                partial_tail = true;
                break;
            };
            let line = &rest[..pos];
            let end = offset + pos as u64 + 1;
            if let Some(entry) = parse_line(line, offset) {
                index.record(&entry, offset, end);
            }
            offset = end;
            rest = &rest[pos + 1..];
        }
        index.log_len = bytes.len() as u64;
        Scan { index, partial_tail }
    }
}

/// Parsea una línea del log; `None` (con warn) si está vacía o corrupta.
pub(crate) fn parse_line(line: &[u8], offset: u64) -> Option<TxEntry> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice::<TxEntry>(line) {
        Ok(entry) => Some(entry),
        Err(e) => {
            let err = PersistenceError::CorruptLine { offset,
                                                      reason: e.to_string() };
            warn!("skipping tx log line: {err}");
            None
        }
    }
}
