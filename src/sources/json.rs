//! Lenient field deserializers for site APIs that mix numbers and strings

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accept `12`, `12.5`, `"12.5"` or null
pub fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().replace(',', ".").parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

/// Accept numbers or strings, producing a string; null becomes empty
pub fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Accept `5`, `"5"` or null
pub fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Sample {
        #[serde(default, deserialize_with = "lenient_f64")]
        index: f64,
        #[serde(default, deserialize_with = "lenient_string")]
        id: String,
        #[serde(default, deserialize_with = "lenient_i64")]
        total: i64,
    }

    #[test]
    fn accepts_mixed_types() {
        let s: Sample = serde_json::from_str(r#"{"index":"12,5","id":42,"total":"7"}"#).unwrap();
        assert_eq!(s.index, 12.5);
        assert_eq!(s.id, "42");
        assert_eq!(s.total, 7);

        let s: Sample = serde_json::from_str(r#"{"index":null}"#).unwrap();
        assert_eq!(s.index, 0.0);
        assert!(s.id.is_empty());
    }
}
