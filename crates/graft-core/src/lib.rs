//! Graph intermediate representation for the graft rewrite engine.
//!
//! This crate provides the data model every other graft crate operates on:
//! - Graph arena (`Graph`, `Operator`, `Operand`) with stable identities
//! - Static operator parameters (`Parameter`)
//! - Tensor payloads (`Attribute`) and their element types (`DataType`)

pub mod attribute;
pub mod ir;
pub mod parameter;
pub mod types;

// Re-export commonly used types
pub use attribute::Attribute;
pub use ir::{
    ATTRIBUTE_OP, Graph, INPUT_OP, OUTPUT_OP, Operand, OperandId, Operator, OperatorId,
};
pub use parameter::Parameter;
pub use types::DataType;

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for graph operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Attribute error: {0}")]
    Attribute(String),

    #[error("Parameter error: {0}")]
    Parameter(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}
