//! Representative passes for the graft rewrite engine.
//!
//! # Canonicalization
//!
//! - **`F.linear`**: `aten::linear`, transpose+matmul(+add), `aten::addmm`,
//!   ONNX `Gemm` (plain and over a constant weight), `torch.matmul` over
//!   constants, TNN `InnerProduct`
//! - **`F.softshrink`**: `aten::softshrink` and the ONNX decomposition
//!
//! # Fusion
//!
//! - `nn.Linear` followed by `nn.BatchNorm1d`, folded into one `nn.Linear`

pub mod canonical;
pub mod fusion;

mod helpers;
mod registry;

pub use registry::default_pass_registry;

/// Result type for pass construction.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pass construction.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Rewrite(#[from] graft_rewrite::RewriteError),

    #[error(transparent)]
    Core(#[from] graft_core::Error),
}
