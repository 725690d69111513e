//! Simulation tag values.

use serde::{Deserialize, Serialize};

/// A scalar value held under a named tag in the simulation store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Boolean actuator/flag state.
    Bool(bool),
    /// Integer sensor reading.
    Int(i64),
    /// Floating-point sensor reading.
    Float(f64),
}

impl TagValue {
    /// Parse a raw key-value store payload.
    ///
    /// Accepts `true`/`false`, integers, and floats. Anything else is not a
    /// scalar tag value and reads as `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw {
            "true" | "True" => return Some(TagValue::Bool(true)),
            "false" | "False" => return Some(TagValue::Bool(false)),
            _ => {}
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Some(TagValue::Int(i));
        }
        raw.parse::<f64>().ok().map(TagValue::Float)
    }

    /// Coerce to a 16-bit register value.
    ///
    /// Booleans map to 0/1 and floats truncate toward zero. Values outside
    /// the `u16` range, NaN and infinities are not coercible.
    pub fn as_register(&self) -> Option<u16> {
        match *self {
            TagValue::Bool(b) => Some(u16::from(b)),
            TagValue::Int(i) => u16::try_from(i).ok(),
            TagValue::Float(f) => {
                if !f.is_finite() {
                    return None;
                }
                let truncated = f.trunc();
                if (0.0..=f64::from(u16::MAX)).contains(&truncated) {
                    Some(truncated as u16)
                } else {
                    None
                }
            }
        }
    }

    /// Whether this value belongs in a numeric history series.
    pub fn is_numeric(&self) -> bool {
        matches!(self, TagValue::Int(_) | TagValue::Float(_))
    }
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagValue::Bool(b) => write!(f, "{}", b),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Float(x) => write!(f, "{}", x),
        }
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Bool(b)
    }
}

impl From<i64> for TagValue {
    fn from(i: i64) -> Self {
        TagValue::Int(i)
    }
}

impl From<u16> for TagValue {
    fn from(r: u16) -> Self {
        TagValue::Int(i64::from(r))
    }
}

impl From<f64> for TagValue {
    fn from(f: f64) -> Self {
        TagValue::Float(f)
    }
}
