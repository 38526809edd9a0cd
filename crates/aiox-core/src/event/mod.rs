//! Transaction Logger: entradas del log y trait `TxStore`.

mod store;
mod types;

pub use store::{InMemoryTxStore, TxStore};
pub use types::{TxEntry, TxEntryKind};
