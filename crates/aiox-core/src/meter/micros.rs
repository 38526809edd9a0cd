//! Aritmética de punto fijo para coste y carbono.
//!
//! `Micros` guarda millonésimas como `u64`. La suma es entera y saturante, de
//! modo que los totales son idénticos en cualquier plataforma.

use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CoreEngineError;

pub const SCALE: u64 = 1_000_000;
const DECIMALS: usize = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Micros(pub u64);

impl Micros {
    pub const ZERO: Micros = Micros(0);

    pub fn from_units(units: u64) -> Self {
        Micros(units.saturating_mul(SCALE))
    }

    /// Conversión desde `f64` redondeando a la millonésima más cercana.
    /// Valores negativos o no finitos se tratan como cero.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() || value <= 0.0 {
            return Micros::ZERO;
        }
        let scaled = (value * SCALE as f64).round();
        if scaled >= u64::MAX as f64 {
            Micros(u64::MAX)
        } else {
            Micros(scaled as u64)
        }
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    pub fn saturating_add(self, other: Micros) -> Micros {
        Micros(self.0.saturating_add(other.0))
    }
}

impl Add for Micros {
    type Output = Micros;

    fn add(self, rhs: Micros) -> Micros {
        self.saturating_add(rhs)
    }
}

impl fmt::Display for Micros {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / SCALE, self.0 % SCALE)
    }
}

impl FromStr for Micros {
    type Err = CoreEngineError;

    /// Parseo decimal exacto; más de seis decimales redondea half-up.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CoreEngineError::InvalidPlan(format!("invalid decimal amount '{s}'"));
        let t = s.trim();
        let (int_part, frac_part) = match t.split_once('.') {
            Some((i, f)) => (i, f),
            None => (t, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(bad());
        }
        let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
        if !all_digits(int_part) || !all_digits(frac_part) {
            return Err(bad());
        }
        let int: u64 = if int_part.is_empty() { 0 } else { int_part.parse().map_err(|_| bad())? };
        let mut frac: u64 = 0;
        for (i, c) in frac_part.chars().take(DECIMALS).enumerate() {
            frac += u64::from(c as u8 - b'0') * 10u64.pow((DECIMALS - 1 - i) as u32);
        }
        if frac_part.len() > DECIMALS && frac_part.as_bytes()[DECIMALS] >= b'5' {
            frac += 1;
        }
        Ok(Micros(int.saturating_mul(SCALE).saturating_add(frac)))
    }
}

impl TryFrom<String> for Micros {
    type Error = CoreEngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Micros> for String {
    fn from(value: Micros) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_prints_exact_decimals() {
        assert_eq!("0.0015".parse::<Micros>().unwrap(), Micros(1_500));
        assert_eq!(Micros(1_500).to_string(), "0.001500");
        assert_eq!("12".parse::<Micros>().unwrap(), Micros::from_units(12));
        assert_eq!(".5".parse::<Micros>().unwrap(), Micros(500_000));
        assert_eq!("0.0000005".parse::<Micros>().unwrap(), Micros(1), "half-up rounding");
        assert_eq!("0.0000004".parse::<Micros>().unwrap(), Micros(0));
        assert!("-1".parse::<Micros>().is_err());
        assert!("1e3".parse::<Micros>().is_err());
        assert!(".".parse::<Micros>().is_err());
    }

    #[test]
    fn float_conversion_rounds() {
        assert_eq!(Micros::from_f64(0.1 + 0.2), Micros(300_000));
        assert_eq!(Micros::from_f64(-3.0), Micros::ZERO);
        assert_eq!(Micros::from_f64(f64::NAN), Micros::ZERO);
    }

    #[test]
    fn addition_saturates_and_serde_is_string() {
        assert_eq!(Micros(u64::MAX) + Micros(1), Micros(u64::MAX));
        let v = serde_json::to_value(Micros(2_500_000)).unwrap();
        assert_eq!(v, serde_json::json!("2.500000"));
        let back: Micros = serde_json::from_value(v).unwrap();
        assert_eq!(back, Micros(2_500_000));
    }
}
