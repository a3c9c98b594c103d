//! Small tagged configuration values attached to operators.

use std::fmt;

/// A static operator parameter (kernel sizes, flags, epsilon, ...).
///
/// The textual form is what pattern descriptions use on the right-hand side
/// of `key=literal`. [`Parameter::parse`] and `Display` are inverses of each
/// other for every value except non-finite floats.
///
/// Equality is exact and type-sensitive: `Int(1)` never equals `Float(1.0)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    None,
    Bool(bool),
    Int(i64),
    Float(f32),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
}

impl Parameter {
    /// Parse a parameter literal.
    ///
    /// - `None`, `True`, `False`
    /// - integers (`3`, `-1`)
    /// - floats, which always carry a `.` or an exponent (`1.0`, `1e-5`)
    /// - lists in parentheses or brackets (`(1,2)`, `[0.5,1.5]`, `(a,b)`)
    /// - anything else is a bare string
    pub fn parse(text: &str) -> Self {
        match text {
            "None" => return Parameter::None,
            "True" => return Parameter::Bool(true),
            "False" => return Parameter::Bool(false),
            _ => {}
        }

        if let Some(inner) = strip_list_delimiters(text) {
            let items: Vec<&str> = inner
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .collect();

            if items.iter().all(|item| is_int_literal(item)) {
                return Parameter::Ints(items.iter().filter_map(|s| s.parse().ok()).collect());
            }
            if items
                .iter()
                .all(|item| is_int_literal(item) || is_float_literal(item))
            {
                return Parameter::Floats(items.iter().filter_map(|s| s.parse().ok()).collect());
            }
            return Parameter::Strings(items.iter().map(|s| s.to_string()).collect());
        }

        if is_int_literal(text) {
            if let Ok(value) = text.parse() {
                return Parameter::Int(value);
            }
        }
        if is_float_literal(text) {
            if let Ok(value) = text.parse() {
                return Parameter::Float(value);
            }
        }

        Parameter::Str(text.to_string())
    }

    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Parameter::None => "none",
            Parameter::Bool(_) => "bool",
            Parameter::Int(_) => "int",
            Parameter::Float(_) => "float",
            Parameter::Str(_) => "string",
            Parameter::Ints(_) => "int list",
            Parameter::Floats(_) => "float list",
            Parameter::Strings(_) => "string list",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Parameter::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Parameter::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Parameter::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Parameter::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value widened to `f64`, accepting both integers and floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Parameter::Int(v) => Some(*v as f64),
            Parameter::Float(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Parameter::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Parameter::Ints(v) => Some(v),
            _ => None,
        }
    }
}

fn strip_list_delimiters(text: &str) -> Option<&str> {
    text.strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .or_else(|| text.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')))
}

fn is_int_literal(text: &str) -> bool {
    let digits = text
        .strip_prefix('-')
        .or_else(|| text.strip_prefix('+'))
        .unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_float_literal(text: &str) -> bool {
    let starts_numeric = text
        .bytes()
        .next()
        .is_some_and(|b| b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.'));
    starts_numeric && text.contains(['.', 'e', 'E']) && text.parse::<f32>().is_ok()
}

fn write_list<T>(f: &mut fmt::Formatter<'_>, items: &[T], item: impl Fn(&T) -> String) -> fmt::Result {
    let joined: Vec<String> = items.iter().map(item).collect();
    write!(f, "({})", joined.join(","))
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::None => f.write_str("None"),
            Parameter::Bool(true) => f.write_str("True"),
            Parameter::Bool(false) => f.write_str("False"),
            Parameter::Int(v) => write!(f, "{v}"),
            // Debug formatting keeps the `.0` / exponent that marks a float.
            Parameter::Float(v) => write!(f, "{v:?}"),
            Parameter::Str(v) => f.write_str(v),
            Parameter::Ints(v) => write_list(f, v, |x| x.to_string()),
            Parameter::Floats(v) => write_list(f, v, |x| format!("{x:?}")),
            Parameter::Strings(v) => write_list(f, v, |x| x.clone()),
        }
    }
}

impl From<bool> for Parameter {
    fn from(value: bool) -> Self {
        Parameter::Bool(value)
    }
}

impl From<i64> for Parameter {
    fn from(value: i64) -> Self {
        Parameter::Int(value)
    }
}

impl From<f32> for Parameter {
    fn from(value: f32) -> Self {
        Parameter::Float(value)
    }
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Self {
        Parameter::Str(value.to_string())
    }
}

impl From<Vec<i64>> for Parameter {
    fn from(value: Vec<i64>) -> Self {
        Parameter::Ints(value)
    }
}

impl TryFrom<Parameter> for i64 {
    type Error = String;

    fn try_from(value: Parameter) -> std::result::Result<Self, Self::Error> {
        match value {
            Parameter::Int(v) => Ok(v),
            other => Err(format!("expected int, got {}", other.type_name())),
        }
    }
}

impl TryFrom<Parameter> for f32 {
    type Error = String;

    fn try_from(value: Parameter) -> std::result::Result<Self, Self::Error> {
        match value {
            Parameter::Float(v) => Ok(v),
            other => Err(format!("expected float, got {}", other.type_name())),
        }
    }
}

impl TryFrom<Parameter> for bool {
    type Error = String;

    fn try_from(value: Parameter) -> std::result::Result<Self, Self::Error> {
        match value {
            Parameter::Bool(v) => Ok(v),
            other => Err(format!("expected bool, got {}", other.type_name())),
        }
    }
}
