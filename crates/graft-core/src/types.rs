//! Element types for tensor payloads.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Element type of an [`Attribute`](crate::Attribute) buffer or operand hint.
///
/// The textual form (`f32`, `i64`, ...) is the suffix used by pattern
/// attribute constraints such as `@weight=(%out,%in)f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F64,
    F16,
    BF16,
    I8,
    I16,
    I32,
    I64,
    U8,
    Bool,
    C64,
    C128,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 | DataType::Bool => 1,
            DataType::F16 | DataType::BF16 | DataType::I16 => 2,
            DataType::F32 | DataType::I32 => 4,
            DataType::F64 | DataType::I64 | DataType::C64 => 8,
            DataType::C128 => 16,
        }
    }

    /// The suffix used in pattern text.
    pub fn suffix(&self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
            DataType::I8 => "i8",
            DataType::I16 => "i16",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
            DataType::Bool => "bool",
            DataType::C64 => "c64",
            DataType::C128 => "c128",
        }
    }

    /// Whether the element type is a real floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(
            self,
            DataType::F32 | DataType::F64 | DataType::F16 | DataType::BF16
        )
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let dtype = match s {
            "f32" => DataType::F32,
            "f64" => DataType::F64,
            "f16" => DataType::F16,
            "bf16" => DataType::BF16,
            "i8" => DataType::I8,
            "i16" => DataType::I16,
            "i32" => DataType::I32,
            "i64" => DataType::I64,
            "u8" => DataType::U8,
            "bool" => DataType::Bool,
            "c64" => DataType::C64,
            "c128" => DataType::C128,
            other => {
                return Err(Error::Unsupported(format!("unknown data type '{other}'")));
            }
        };
        Ok(dtype)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}
