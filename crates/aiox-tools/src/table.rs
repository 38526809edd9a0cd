//! Tabla neutral `{header, rows}`.
//!
//! Las celdas son valores JSON: números cuando el texto es numérico, string
//! en otro caso. El orden de filas y columnas es el del origen, de modo que
//! el hash del output es estable.

use aiox_core::CoreEngineError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Number, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(header: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { header, rows }
    }

    /// Interpreta un input como tabla.
    pub fn from_value(op: &str, value: &Value) -> Result<Self, CoreEngineError> {
        serde_json::from_value(value.clone()).map_err(|e| CoreEngineError::tool(op, format!("input is not a table: {e}")))
    }

    pub fn to_value(&self) -> Value {
        json!({ "header": self.header, "rows": self.rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Valores de la columna `index` (las filas cortas no aportan valor).
    pub fn column(&self, index: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().filter_map(move |row| row.get(index))
    }
}

/// Coerción de una celda CSV: entero, decimal finito o texto recortado.
pub fn coerce_cell(raw: &str) -> Value {
    let cell = raw.trim();
    if cell.contains('.') {
        if let Some(n) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    } else if let Ok(i) = cell.parse::<i64>() {
        return Value::Number(i.into());
    }
    Value::String(cell.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercion_keeps_text_that_is_not_numeric() {
        assert_eq!(coerce_cell(" 42 "), json!(42));
        assert_eq!(coerce_cell("-1.5"), json!(-1.5));
        assert_eq!(coerce_cell("1.2.3"), json!("1.2.3"));
        assert_eq!(coerce_cell("1e999.0"), json!("1e999.0"));
        assert_eq!(coerce_cell(""), json!(""));
    }

    #[test]
    fn table_round_trips_through_json() {
        let t = Table::new(vec!["a".into()], vec![vec![json!(1)], vec![json!("x")]]);
        assert_eq!(Table::from_value("profile", &t.to_value()).unwrap(), t);
        assert!(Table::from_value("profile", &json!({"rows": []})).is_err());
        assert_eq!(t.column(0).count(), 2);
    }
}
