//! `TxStore` durable sobre un único archivo JSONL append-only.
//!
//! Objetivo general del módulo:
//! - Paridad 1:1 con `InMemoryTxStore`: mismo orden, mismo `seq` global,
//!   mismo contenido al releer.
//! - Una entrada por línea, escrita con `write_all` + `flush` y, salvo que se
//!   desactive, `sync_data` antes de devolver.
//! - Un crash a mitad de línea deja una cola parcial: los lectores la saltan
//!   y el siguiente append empieza en una línea nueva.
//! - El índice por run vive en memoria y se persiste en cada `run_end`.

mod index;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use aiox_core::constants::{TX_INDEX_FILE, TX_LOG_FILE};
use aiox_core::{CoreEngineError, Sandbox, TxEntry, TxEntryKind, TxStore};
use chrono::Utc;
use log::{debug, info};
use uuid::Uuid;

pub use index::{RunIndex, RunSpan};

use crate::error::PersistenceError;

pub struct JsonlTxStore {
    log_path: PathBuf,
    index_path: PathBuf,
    file: File,
    index: RunIndex,
    fsync: bool,
    partial_tail: bool,
}

impl JsonlTxStore {
    /// Abre (o crea) el log del sandbox en `logs/tx.jsonl`.
    pub fn open(sandbox: &Sandbox) -> Result<Self, PersistenceError> {
        Self::open_at(&sandbox.root().join(TX_LOG_FILE), &sandbox.root().join(TX_INDEX_FILE))
    }

    pub fn open_at(log_path: &Path, index_path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(log_path)?;
        let log_len = file.metadata()?.len();

        let (index, partial_tail) = match RunIndex::load(index_path) {
            Some(index) if index.log_len == log_len && ends_with_newline(&mut file, log_len)? => {
                debug!("tx index {} trusted ({} runs)", index_path.display(), index.runs.len());
                (index, false)
            }
            _ => {
                let scan = rescan(&mut file, log_len)?;
                debug!("tx index rebuilt from {} ({} runs)", log_path.display(), scan.index.runs.len());
                (scan.index, scan.partial_tail)
            }
        };
        info!("tx log {} opened: {} runs, next seq {}",
              log_path.display(),
              index.runs.len(),
              index.next_seq);
        Ok(Self { log_path: log_path.to_path_buf(),
                  index_path: index_path.to_path_buf(),
                  file,
                  index,
                  fsync: true,
                  partial_tail })
    }

    /// Activa o desactiva `sync_data` por entrada.
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn index(&self) -> &RunIndex {
        &self.index
    }

    /// Si otro handle escribió el archivo desde la última lectura, reconstruye
    /// el índice para que `seq` y los spans sigan el contenido real.
    fn sync_with_file(&mut self) -> Result<(), PersistenceError> {
        let log_len = self.file.metadata()?.len();
        if log_len == self.index.log_len {
            return Ok(());
        }
        let scan = rescan(&mut self.file, log_len)?;
        debug!("tx log {} changed on disk ({} -> {} bytes); index rebuilt, next seq {}",
               self.log_path.display(),
               self.index.log_len,
               log_len,
               scan.index.next_seq);
        self.index = scan.index;
        self.partial_tail = scan.partial_tail;
        Ok(())
    }

    fn write_entry(&mut self, entry: &TxEntry) -> Result<(u64, u64), PersistenceError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        if self.partial_tail {
            self.file.write_all(b"\n")?;
            self.index.log_len += 1;
            self.partial_tail = false;
        }
        let start = self.index.log_len;
        self.file.write_all(&line)?;
        self.file.flush()?;
        if self.fsync {
            self.file.sync_data()?;
        }
        Ok((start, start + line.len() as u64))
    }

    fn read_span(&self, span: RunSpan) -> Result<Vec<u8>, PersistenceError> {
        let mut file = File::open(&self.log_path)?;
        file.seek(SeekFrom::Start(span.start))?;
        let mut buf = vec![0u8; (span.end - span.start) as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

fn rescan(file: &mut File, log_len: u64) -> Result<index::Scan, PersistenceError> {
    let mut bytes = Vec::with_capacity(log_len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut bytes)?;
    Ok(RunIndex::scan(&bytes))
}

fn ends_with_newline(file: &mut File, len: u64) -> Result<bool, PersistenceError> {
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

impl TxStore for JsonlTxStore {
    fn append(&mut self, run_id: Uuid, kind: TxEntryKind) -> Result<TxEntry, CoreEngineError> {
        self.sync_with_file()?;
        let entry = TxEntry { seq: self.index.next_seq,
                              ts: Utc::now(),
                              run_id,
                              kind };
        let (start, end) = self.write_entry(&entry)?;
        self.index.record(&entry, start, end);
        debug!("tx append seq={} kind={} bytes={}..{}", entry.seq, entry.kind.name(), start, end);
        if entry.kind.is_run_end() {
            self.index.persist(&self.index_path)?;
        }
        Ok(entry)
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<TxEntry>, CoreEngineError> {
        let Some(span) = self.index.runs.get(&run_id).copied() else {
            return Ok(Vec::new());
        };
        let bytes = self.read_span(span)?;
        let mut offset = span.start;
        let mut out = Vec::with_capacity(span.entries as usize);
        for line in bytes.split(|b| *b == b'\n') {
            let line_offset = offset;
            offset += line.len() as u64 + 1;
            if let Some(entry) = index::parse_line(line, line_offset) {
                if entry.run_id == run_id {
                    out.push(entry);
                }
            }
        }
        Ok(out)
    }

    fn run_ids(&self) -> Result<Vec<Uuid>, CoreEngineError> {
        Ok(self.index.runs.keys().copied().collect())
    }

    fn refresh(&mut self) -> Result<(), CoreEngineError> {
        Ok(self.sync_with_file()?)
    }
}

impl std::fmt::Debug for JsonlTxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlTxStore")
         .field("log_path", &self.log_path)
         .field("runs", &self.index.runs.len())
         .field("fsync", &self.fsync)
         .finish()
    }
}
