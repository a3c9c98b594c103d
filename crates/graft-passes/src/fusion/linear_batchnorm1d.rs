//! Fold a trailing `nn.BatchNorm1d` into the preceding `nn.Linear`.
//!
//! For output channel `i` the normalization computes
//! `(x - mean) / sqrt(var + eps) * gamma + beta`, which is affine in `x`:
//!
//! ```text
//! scale[i] = gamma[i] / sqrt(var[i] + eps)
//! shift[i] = beta[i] - gamma[i] * mean[i] / sqrt(var[i] + eps)
//! ```
//!
//! so the fused linear has weight row `i` scaled by `scale[i]` and bias
//! `bias[i] * scale[i] + shift[i]`. Without learned affine parameters `gamma`
//! is one and `beta` zero. All arithmetic runs in `f64`.

use crate::helpers::{f64_param, usize_param};
use graft_core::{Attribute, DataType, Error, Operator, Parameter, Result};
use graft_rewrite::{Captures, MatchContext, Pass};

/// One of the four `nn.Linear` + `nn.BatchNorm1d` spellings.
pub struct FuseLinearBatchNorm1d {
    name: &'static str,
    pattern: &'static str,
    linear_bias: bool,
    affine: bool,
}

impl FuseLinearBatchNorm1d {
    /// Biased linear, affine normalization.
    pub fn new() -> Self {
        Self {
            name: "fuse_linear_batchnorm1d",
            pattern: r#"7767517
4 3
pnnx.Input              input       0 1 input
nn.Linear               op_0        1 1 input a in_features=%in_features out_features=%out_features bias=True @weight @bias
nn.BatchNorm1d          op_1        1 1 a out num_features=%num_features eps=%eps affine=True @running_mean @running_var @weight @bias
pnnx.Output             output      1 0 out
"#,
            linear_bias: true,
            affine: true,
        }
    }

    pub fn without_linear_bias() -> Self {
        Self {
            name: "fuse_linear_nobias_batchnorm1d",
            pattern: r#"7767517
4 3
pnnx.Input              input       0 1 input
nn.Linear               op_0        1 1 input a in_features=%in_features out_features=%out_features bias=False @weight
nn.BatchNorm1d          op_1        1 1 a out num_features=%num_features eps=%eps affine=True @running_mean @running_var @weight @bias
pnnx.Output             output      1 0 out
"#,
            linear_bias: false,
            affine: true,
        }
    }

    pub fn without_affine() -> Self {
        Self {
            name: "fuse_linear_batchnorm1d_noaffine",
            pattern: r#"7767517
4 3
pnnx.Input              input       0 1 input
nn.Linear               op_0        1 1 input a in_features=%in_features out_features=%out_features bias=True @weight @bias
nn.BatchNorm1d          op_1        1 1 a out num_features=%num_features eps=%eps affine=False @running_mean @running_var
pnnx.Output             output      1 0 out
"#,
            linear_bias: true,
            affine: false,
        }
    }

    pub fn without_linear_bias_or_affine() -> Self {
        Self {
            name: "fuse_linear_nobias_batchnorm1d_noaffine",
            pattern: r#"7767517
4 3
pnnx.Input              input       0 1 input
nn.Linear               op_0        1 1 input a in_features=%in_features out_features=%out_features bias=False @weight
nn.BatchNorm1d          op_1        1 1 a out num_features=%num_features eps=%eps affine=False @running_mean @running_var
pnnx.Output             output      1 0 out
"#,
            linear_bias: false,
            affine: false,
        }
    }
}

impl Default for FuseLinearBatchNorm1d {
    fn default() -> Self {
        Self::new()
    }
}

fn take_attr(captures: &mut Captures, key: &str) -> Result<Attribute> {
    captures
        .take_attr(key)
        .ok_or_else(|| Error::Attribute(format!("capture '{key}' is missing")))
}

/// Captured tensors the fold reads or rewrites.
const FOLDED_ATTRS: [&str; 6] = [
    "op_0.weight",
    "op_0.bias",
    "op_1.running_mean",
    "op_1.running_var",
    "op_1.weight",
    "op_1.bias",
];

fn read_channels(captures: &Captures, key: &str, channels: usize) -> Result<Vec<f64>> {
    let values = captures
        .attr(key)
        .ok_or_else(|| Error::Attribute(format!("capture '{key}' is missing")))?
        .to_f64_vec()?;
    if values.len() != channels {
        return Err(Error::Attribute(format!(
            "'{key}' holds {} values, expected {channels}",
            values.len()
        )));
    }
    Ok(values)
}

impl Pass for FuseLinearBatchNorm1d {
    fn name(&self) -> &str {
        self.name
    }

    fn match_pattern_graph(&self) -> &str {
        self.pattern
    }

    fn type_str(&self) -> &str {
        "nn.Linear"
    }

    fn name_str(&self) -> &str {
        "linearbn1d"
    }

    /// Only float tensors can be folded, and the normalization must cover
    /// every linear output.
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        let foldable = FOLDED_ATTRS
            .iter()
            .filter_map(|key| ctx.attr(key))
            .all(|attr| matches!(attr.dtype, DataType::F32 | DataType::F64));
        let same_channels = match (ctx.param("num_features"), ctx.param("out_features")) {
            (Some(channels), Some(outputs)) => channels == outputs,
            _ => false,
        };
        foldable && same_channels
    }

    fn write(&self, op: &mut Operator, mut captures: Captures) -> Result<()> {
        let in_features = usize_param(&captures, "in_features")?;
        let out_features = usize_param(&captures, "out_features")?;
        let channels = usize_param(&captures, "num_features")?;
        let eps = f64_param(&captures, "eps")?;
        if channels != out_features {
            return Err(Error::Parameter(format!(
                "normalization over {channels} channels cannot follow {out_features} outputs"
            )));
        }

        let mean = read_channels(&captures, "op_1.running_mean", channels)?;
        let var = read_channels(&captures, "op_1.running_var", channels)?;
        let (gamma, beta) = if self.affine {
            (
                read_channels(&captures, "op_1.weight", channels)?,
                read_channels(&captures, "op_1.bias", channels)?,
            )
        } else {
            (vec![1.0; channels], vec![0.0; channels])
        };

        let mut scale = Vec::with_capacity(channels);
        let mut shift = Vec::with_capacity(channels);
        for i in 0..channels {
            let inv_std = 1.0 / (var[i] + eps).sqrt();
            scale.push(gamma[i] * inv_std);
            shift.push(beta[i] - gamma[i] * mean[i] * inv_std);
        }

        let mut weight = take_attr(&mut captures, "op_0.weight")?;
        if weight.numel() != out_features * in_features {
            return Err(Error::Attribute(format!(
                "linear weight holds {} values, expected {out_features}x{in_features}",
                weight.numel()
            )));
        }
        weight.update_elements(|idx, w| w * scale[idx / in_features])?;

        let mut bias = if self.linear_bias {
            take_attr(&mut captures, "op_0.bias")?
        } else {
            Attribute::zeros(weight.dtype, vec![channels])
        };
        if bias.numel() != channels {
            return Err(Error::Attribute(format!(
                "linear bias holds {} values, expected {channels}",
                bias.numel()
            )));
        }
        bias.update_elements(|i, b| b * scale[i] + shift[i])?;

        tracing::trace!(
            operator = op.name(),
            channels,
            "Folded batch normalization into linear"
        );

        op.set_param("in_features", Parameter::Int(in_features as i64));
        op.set_param("out_features", Parameter::Int(out_features as i64));
        op.set_param("bias", Parameter::Bool(true));
        op.set_attr("weight", weight);
        op.set_attr("bias", bias);
        Ok(())
    }
}
