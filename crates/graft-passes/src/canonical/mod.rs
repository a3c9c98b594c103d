//! Passes that rename front-end spellings to the canonical operator vocabulary.

pub mod linear;
pub mod softshrink;

pub use linear::{
    AddMatmulConstWeight, Addmm, AtenLinear, MatmulAddConstWeight, MatmulConstWeight, OnnxGemm,
    OnnxGemmConstWeight, TnnInnerProduct, TransposedMatmul, TransposedMatmulAdd,
};
pub use softshrink::{AtenSoftshrink, OnnxSoftshrink};
