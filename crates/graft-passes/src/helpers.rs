//! Helper functions shared by pass implementations.

use graft_core::{Error, Parameter, Result};
use graft_rewrite::Captures;

/// Compare two floats with an absolute and relative tolerance.
///
/// Values are equal if they are identical, differ by at most `epsilon`, or
/// differ by less than `epsilon` relative to the larger magnitude.
pub fn nearly_equal(a: f32, b: f32, epsilon: f32) -> bool {
    if a == b {
        return true;
    }

    let diff = (a - b).abs();
    if diff <= epsilon {
        return true;
    }

    diff < epsilon * a.abs().max(b.abs())
}

/// Look up a captured parameter that the pattern guarantees.
pub fn required_param<'a>(captures: &'a Captures, key: &str) -> Result<&'a Parameter> {
    captures
        .param(key)
        .ok_or_else(|| Error::Parameter(format!("capture '{key}' is missing")))
}

pub fn int_param(captures: &Captures, key: &str) -> Result<i64> {
    let value = required_param(captures, key)?;
    value.as_int().ok_or_else(|| {
        Error::Parameter(format!("capture '{key}' is a {}, expected int", value.type_name()))
    })
}

/// A captured count or size, rejecting negative values.
pub fn usize_param(captures: &Captures, key: &str) -> Result<usize> {
    let value = int_param(captures, key)?;
    usize::try_from(value)
        .map_err(|_| Error::Parameter(format!("capture '{key}' = {value} is not a valid size")))
}

/// A captured numeric value widened to `f64`; integers are accepted.
pub fn f64_param(captures: &Captures, key: &str) -> Result<f64> {
    let value = required_param(captures, key)?;
    value.as_f64().ok_or_else(|| {
        Error::Parameter(format!("capture '{key}' is a {}, expected number", value.type_name()))
    })
}

/// If `key` was captured, it must be exactly `Float(expected)`.
pub fn float_param_is(captures: &Captures, key: &str, expected: f32) -> bool {
    captures
        .param(key)
        .is_none_or(|value| *value == Parameter::Float(expected))
}

/// If `key` was captured, it must be exactly `Int(expected)`.
pub fn int_param_is(captures: &Captures, key: &str, expected: i64) -> bool {
    captures
        .param(key)
        .is_none_or(|value| *value == Parameter::Int(expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearly_equal() {
        assert!(nearly_equal(0.5, 0.5, 0.001));
        assert!(nearly_equal(0.5, 0.5005, 0.001));
        assert!(!nearly_equal(0.5, 0.52, 0.001));
        // relative tolerance for large magnitudes
        assert!(nearly_equal(10000.0, 10005.0, 0.001));
        assert!(!nearly_equal(10000.0, 10020.0, 0.001));
    }

    #[test]
    fn test_param_helpers() {
        let mut captures = Captures::default();
        captures.params.insert("n".to_string(), Parameter::Int(4));
        captures.params.insert("eps".to_string(), Parameter::Float(0.5));
        captures.params.insert("neg".to_string(), Parameter::Int(-1));

        assert_eq!(int_param(&captures, "n").unwrap(), 4);
        assert_eq!(usize_param(&captures, "n").unwrap(), 4);
        assert!(usize_param(&captures, "neg").is_err());
        assert_eq!(f64_param(&captures, "eps").unwrap(), 0.5);
        assert_eq!(f64_param(&captures, "n").unwrap(), 4.0);
        assert!(int_param(&captures, "eps").is_err());
        assert!(required_param(&captures, "missing").is_err());
    }

    #[test]
    fn test_optional_exact_checks() {
        let mut captures = Captures::default();
        assert!(float_param_is(&captures, "gemm.alpha", 1.0));

        captures
            .params
            .insert("gemm.alpha".to_string(), Parameter::Float(1.0));
        captures
            .params
            .insert("gemm.transB".to_string(), Parameter::Int(1));
        assert!(float_param_is(&captures, "gemm.alpha", 1.0));
        assert!(!float_param_is(&captures, "gemm.transB", 1.0));
        assert!(int_param_is(&captures, "gemm.transB", 1));
        assert!(!int_param_is(&captures, "gemm.transB", 0));
    }
}
