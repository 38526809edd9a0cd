//! Hash helpers: sha256 hex en todo el core (identidad de plan, package,
//! artifacts y fingerprints usan el mismo algoritmo).

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::to_canonical_json;

/// Hashea bytes y devuelve hex.
pub fn hash_bytes(input: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(input);
    hex::encode(h.finalize())
}

/// Hashea un string y devuelve hex.
pub fn hash_str(input: &str) -> String {
    hash_bytes(input.as_bytes())
}

/// Hash del JSON canonicalizado.
pub fn hash_value(value: &Value) -> String {
    hash_str(&to_canonical_json(value))
}

/// Hash de un fichero leído por bloques.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut h = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
    }
    Ok(hex::encode(h.finalize()))
}

/// Forma expuesta al operador: `sha256:<hex>`.
pub fn prefixed(hex_digest: &str) -> String {
    format!("sha256:{hex_digest}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_value_ignores_key_order() {
        let h1 = hash_value(&json!({"b": 2, "a": 1}));
        let h2 = hash_value(&json!({"a": 1, "b": 2}));
        assert_eq!(h1.len(), 64);
        assert_eq!(h1, h2);
    }

    #[test]
    fn known_sha256_vector() {
        assert_eq!(hash_str("abc"), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_eq!(prefixed("ab"), "sha256:ab");
    }
}
