//! Default pass registry.

use graft_rewrite::PassRegistry;

use crate::Result;
use crate::canonical::{
    AddMatmulConstWeight, Addmm, AtenLinear, AtenSoftshrink, MatmulAddConstWeight,
    MatmulConstWeight, OnnxGemm, OnnxGemmConstWeight, OnnxSoftshrink, TnnInnerProduct,
    TransposedMatmul, TransposedMatmulAdd,
};
use crate::fusion::FuseLinearBatchNorm1d;

/// Returns a pass registry pre-populated with every pass in this crate.
///
/// Canonicalization passes carry priorities above 100 so they run before
/// fusion (50). Within a family, a pattern that extends another one is
/// registered with the higher priority so the longer spelling is claimed
/// first.
///
/// Further passes can be added to the returned registry via
/// `registry.register(priority, pass)`.
pub fn default_pass_registry() -> Result<PassRegistry> {
    let mut registry = PassRegistry::new();

    // F.linear
    registry
        .register(140, TnnInnerProduct)?
        .register(112, OnnxGemm)?
        .register(111, AtenLinear)?
        .register(111, TransposedMatmulAdd)?
        .register(111, Addmm)?
        .register(111, OnnxGemmConstWeight)?
        .register(111, MatmulAddConstWeight)?
        .register(111, AddMatmulConstWeight)?
        .register(110, TransposedMatmul)?
        .register(110, MatmulConstWeight)?;

    // F.softshrink
    registry
        .register(100, AtenSoftshrink)?
        .register(100, OnnxSoftshrink)?;

    // nn.Linear + nn.BatchNorm1d
    registry
        .register(50, FuseLinearBatchNorm1d::new())?
        .register(50, FuseLinearBatchNorm1d::without_linear_bias())?
        .register(50, FuseLinearBatchNorm1d::without_affine())?
        .register(50, FuseLinearBatchNorm1d::without_linear_bias_or_affine())?;

    tracing::debug!(passes = registry.len(), "Built default pass registry");
    Ok(registry)
}
