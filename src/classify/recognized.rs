//! Closed registry of trivial operations that run inline.
//!
//! Only signatures that match one of these variants exactly are treated as
//! recognized. Everything else goes to the gateway or to a worker.

use super::signature::Signature;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RecognizedOp {
    /// `x=>x*k`
    Scale(f64),
    /// `x=>x+k`
    Offset(f64),
    /// `x=>x*x`
    Square,
    /// `x=>x.toLowerCase()`
    Lowercase,
    /// `x=>x.toUpperCase()`
    Uppercase,
    /// `x=>x.length`. Arrays count items; strings count Unicode scalar
    /// values, not bytes or UTF-16 units.
    Length,
}

impl RecognizedOp {
    /// Match a normalized signature against the registry
    pub fn recognize(signature: &Signature) -> Option<Self> {
        let (param, body) = signature.arrow_parts()?;
        let rest = body.strip_prefix(param)?;

        match rest {
            ".toLowerCase()" => return Some(Self::Lowercase),
            ".toUpperCase()" => return Some(Self::Uppercase),
            ".length" => return Some(Self::Length),
            _ => {}
        }

        if let Some(rhs) = rest.strip_prefix('*') {
            if rhs == param {
                return Some(Self::Square);
            }
            return parse_constant(rhs).map(Self::Scale);
        }
        if let Some(rhs) = rest.strip_prefix('+') {
            return parse_constant(rhs).map(Self::Offset);
        }
        None
    }

    /// Run the operation. Error strings match what a worker would report.
    pub fn apply(&self, input: &Value) -> Result<Value, String> {
        match self {
            Self::Scale(k) => input
                .as_f64()
                .map(|n| number(n * k))
                .ok_or_else(|| "Expected number for multiplication".to_string()),
            Self::Offset(k) => input
                .as_f64()
                .map(|n| number(n + k))
                .ok_or_else(|| "Expected number for addition".to_string()),
            Self::Square => input
                .as_f64()
                .map(|n| number(n * n))
                .ok_or_else(|| "Expected number for squaring".to_string()),
            Self::Lowercase => input
                .as_str()
                .map(|s| json!(s.to_lowercase()))
                .ok_or_else(|| "Expected string for toLowerCase".to_string()),
            Self::Uppercase => input
                .as_str()
                .map(|s| json!(s.to_uppercase()))
                .ok_or_else(|| "Expected string for toUpperCase".to_string()),
            Self::Length => match input {
                Value::Array(items) => Ok(json!(items.len())),
                Value::String(s) => Ok(json!(s.chars().count())),
                _ => Err("Expected array or string for length".to_string()),
            },
        }
    }
}

fn parse_constant(text: &str) -> Option<f64> {
    // Reject things like `x=>x*y` or `x=>x+1-2`
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    text.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Integral results come back as JSON integers so `2 * 2` is `4`, not `4.0`
pub(crate) fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(source: &str) -> Option<RecognizedOp> {
        RecognizedOp::recognize(&Signature::normalize(source))
    }

    #[test]
    fn test_catalog_matches() {
        assert_eq!(op("x => x * 2"), Some(RecognizedOp::Scale(2.0)));
        assert_eq!(op("(n) => n + 100"), Some(RecognizedOp::Offset(100.0)));
        assert_eq!(op("x => x * x"), Some(RecognizedOp::Square));
        assert_eq!(op("s => s.toLowerCase()"), Some(RecognizedOp::Lowercase));
        assert_eq!(op("s => s.toUpperCase()"), Some(RecognizedOp::Uppercase));
        assert_eq!(op("x => x.length"), Some(RecognizedOp::Length));
    }

    #[test]
    fn test_near_misses_are_not_recognized() {
        assert_eq!(op("x => y * 2"), None);
        assert_eq!(op("x => x * y"), None);
        assert_eq!(op("x => x + 1 - 2"), None);
        assert_eq!(op("x => Math.sqrt(x)"), None);
        assert_eq!(op("(a, b) => a * 2"), None);
    }

    #[test]
    fn test_apply() {
        assert_eq!(RecognizedOp::Scale(2.0).apply(&json!(21)), Ok(json!(42)));
        assert_eq!(RecognizedOp::Scale(0.5).apply(&json!(3)), Ok(json!(1.5)));
        assert_eq!(RecognizedOp::Offset(5.0).apply(&json!(1)), Ok(json!(6)));
        assert_eq!(RecognizedOp::Square.apply(&json!(-3)), Ok(json!(9)));
        assert_eq!(
            RecognizedOp::Uppercase.apply(&json!("abc")),
            Ok(json!("ABC"))
        );
        assert_eq!(RecognizedOp::Length.apply(&json!([1, 2, 3])), Ok(json!(3)));
        assert_eq!(RecognizedOp::Length.apply(&json!("héllo")), Ok(json!(5)));
        // Astral characters count once
        assert_eq!(RecognizedOp::Length.apply(&json!("a😀")), Ok(json!(2)));
    }

    #[test]
    fn test_apply_type_mismatch() {
        assert_eq!(
            RecognizedOp::Scale(2.0).apply(&json!("two")),
            Err("Expected number for multiplication".to_string())
        );
        assert_eq!(
            RecognizedOp::Lowercase.apply(&json!(1)),
            Err("Expected string for toLowerCase".to_string())
        );
        assert!(RecognizedOp::Length.apply(&json!({"a": 1})).is_err());
    }
}
