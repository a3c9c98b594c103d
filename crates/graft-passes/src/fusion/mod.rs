//! Passes that merge adjacent canonical operators.

pub mod linear_batchnorm1d;

pub use linear_batchnorm1d::FuseLinearBatchNorm1d;
