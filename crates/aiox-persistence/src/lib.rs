//! aiox-persistence
//!
//! Capa durable del kernel: implementación JSONL de `TxStore` con índice
//! externo por run, y carga de configuración desde el entorno.
//!
//! Módulos:
//! - `jsonl`: log append-only `logs/tx.jsonl` + índice `logs/tx.index.json`.
//! - `config`: `KernelConfig` desde variables `AIOX_*` y `.env`.
//! - `error`: `PersistenceError` y `ConfigError`.

pub mod config;
pub mod error;
pub mod jsonl;

pub use config::{init_dotenv, KernelConfig};
pub use error::{ConfigError, PersistenceError};
pub use jsonl::{JsonlTxStore, RunIndex, RunSpan};
