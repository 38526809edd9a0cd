use std::collections::HashMap;

use chrono::Utc;
use log::debug;
use uuid::Uuid;

use super::{TxEntry, TxEntryKind};
use crate::errors::CoreEngineError;

/// Almacenamiento de entradas append-only.
pub trait TxStore {
    /// Única operación de escritura: agrega una entrada y la devuelve completa
    /// (con `seq` y `ts`). Falla con `LogWrite`.
    fn append(&mut self, run_id: Uuid, kind: TxEntryKind) -> Result<TxEntry, CoreEngineError>;
    /// Entradas de un run, en orden ascendente de `seq`.
    fn list(&self, run_id: Uuid) -> Result<Vec<TxEntry>, CoreEngineError>;
    /// Runs en orden de primer append.
    fn run_ids(&self) -> Result<Vec<Uuid>, CoreEngineError>;
    /// Se re-sincroniza con el medio subyacente. Se llama con el lock del
    /// sandbox tomado, antes de la primera escritura.
    fn refresh(&mut self) -> Result<(), CoreEngineError> {
        Ok(())
    }
}

impl<S: TxStore + ?Sized> TxStore for &mut S {
    fn append(&mut self, run_id: Uuid, kind: TxEntryKind) -> Result<TxEntry, CoreEngineError> {
        (**self).append(run_id, kind)
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<TxEntry>, CoreEngineError> {
        (**self).list(run_id)
    }

    fn run_ids(&self) -> Result<Vec<Uuid>, CoreEngineError> {
        (**self).run_ids()
    }

    fn refresh(&mut self) -> Result<(), CoreEngineError> {
        (**self).refresh()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTxStore {
    inner: HashMap<Uuid, Vec<TxEntry>>,
    order: Vec<Uuid>,
    next_seq: u64,
}

impl InMemoryTxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Todas las entradas en orden global.
    pub fn all(&self) -> Vec<TxEntry> {
        let mut all: Vec<TxEntry> = self.inner.values().flatten().cloned().collect();
        all.sort_by_key(|e| e.seq);
        all
    }
}

impl TxStore for InMemoryTxStore {
    fn append(&mut self, run_id: Uuid, kind: TxEntryKind) -> Result<TxEntry, CoreEngineError> {
        let entry = TxEntry { seq: self.next_seq,
                              ts: Utc::now(),
                              run_id,
                              kind };
        self.next_seq += 1;
        let entries = self.inner.entry(run_id).or_insert_with(|| {
                                                  self.order.push(run_id);
                                                  Vec::new()
                                              });
        entries.push(entry.clone());
        debug!("tx append seq={} kind={}", entry.seq, entry.kind.name());
        Ok(entry)
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<TxEntry>, CoreEngineError> {
        Ok(self.inner.get(&run_id).cloned().unwrap_or_default())
    }

    fn run_ids(&self) -> Result<Vec<Uuid>, CoreEngineError> {
        Ok(self.order.clone())
    }
}
