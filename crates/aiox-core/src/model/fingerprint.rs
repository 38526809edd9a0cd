use serde::Serialize;

/// Insumos del fingerprint de un run. NO es el fingerprint final (string hash)
/// sino el modelo previo a canonicalizar.
#[derive(Serialize)]
pub struct RunFingerprintInput<'a> {
    pub engine_version: &'a str,
    pub plan_id: &'a str,
    pub step_output_hashes: &'a [String], // en orden de ejecución
}

impl RunFingerprintInput<'_> {
    /// `sha256:<hex>` de la forma canónica.
    pub fn fingerprint(&self) -> String {
        let value = serde_json::json!({
            "engine_version": self.engine_version,
            "plan_id": self.plan_id,
            "step_output_hashes": self.step_output_hashes,
        });
        crate::hashing::prefixed(&crate::hashing::hash_value(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_depends_on_output_order() {
        let a = vec!["h1".to_string(), "h2".to_string()];
        let b = vec!["h2".to_string(), "h1".to_string()];
        let fa = RunFingerprintInput { engine_version: "K1.0", plan_id: "p", step_output_hashes: &a }.fingerprint();
        let fb = RunFingerprintInput { engine_version: "K1.0", plan_id: "p", step_output_hashes: &b }.fingerprint();
        assert!(fa.starts_with("sha256:"));
        assert_ne!(fa, fb, "order of step outputs must change the fingerprint");
    }
}
