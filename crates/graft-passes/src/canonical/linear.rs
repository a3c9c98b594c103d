//! Canonicalization of affine projections to `F.linear`.
//!
//! Front-ends spell a linear layer many ways: a traced `aten::linear`, a
//! transpose followed by a matmul (and optionally an add), `aten::addmm`, an
//! ONNX `Gemm`, a `torch.matmul` against a constant, or a third-party
//! inner-product layer. Each pass here recognizes one spelling.

use crate::helpers::{float_param_is, int_param_is, usize_param};
use graft_core::{Attribute, Error, Operator, Parameter, Result};
use graft_rewrite::{Captures, MatchContext, Pass, ReplacementOps};

/// `aten::linear(input, weight, bias)`.
pub struct AtenLinear;

impl Pass for AtenLinear {
    fn name(&self) -> &str {
        "F_linear"
    }

    fn match_pattern_graph(&self) -> &str {
        r#"7767517
5 4
pnnx.Input              input_0     0 1 input
pnnx.Input              input_1     0 1 weight
pnnx.Input              input_2     0 1 bias
aten::linear            op_0        3 1 input weight bias out
pnnx.Output             output      1 0 out
"#
    }

    fn type_str(&self) -> &str {
        "F.linear"
    }
}

/// `aten::add(aten::matmul(input, aten::t(weight)), bias, 1)`.
pub struct TransposedMatmulAdd;

impl Pass for TransposedMatmulAdd {
    fn name(&self) -> &str {
        "F_linear_t_matmul_add"
    }

    fn match_pattern_graph(&self) -> &str {
        r#"7767517
8 7
pnnx.Input              input_0     0 1 input
pnnx.Input              input_1     0 1 weight
pnnx.Input              input_2     0 1 bias
aten::t                 op_0        1 1 weight 9
aten::matmul            op_1        2 1 input 9 a
prim::Constant          op_2        0 1 19 value=1
aten::add               op_3        3 1 a bias 19 out
pnnx.Output             output      1 0 out
"#
    }

    fn type_str(&self) -> &str {
        "F.linear"
    }
}

/// `aten::matmul(input, aten::t(weight))` with no bias.
pub struct TransposedMatmul;

impl Pass for TransposedMatmul {
    fn name(&self) -> &str {
        "F_linear_t_matmul"
    }

    fn match_pattern_graph(&self) -> &str {
        r#"7767517
5 4
pnnx.Input              input_0     0 1 input
pnnx.Input              input_1     0 1 weight
aten::t                 op_0        1 1 weight 9
aten::matmul            op_1        2 1 input 9 out
pnnx.Output             output      1 0 out
"#
    }

    fn type_str(&self) -> &str {
        "F.linear"
    }

    fn write(&self, op: &mut Operator, _captures: Captures) -> Result<()> {
        op.set_param("bias", Parameter::None);
        Ok(())
    }
}

/// `aten::addmm(bias, input, aten::t(weight), 1, 1)`.
pub struct Addmm;

impl Pass for Addmm {
    fn name(&self) -> &str {
        "F_linear_addmm"
    }

    fn match_pattern_graph(&self) -> &str {
        r#"7767517
8 7
pnnx.Input              input_0     0 1 input
pnnx.Input              input_1     0 1 weight
pnnx.Input              input_2     0 1 bias
aten::t                 op_0        1 1 weight 14
prim::Constant          op_1        0 1 15 value=1
prim::Constant          op_2        0 1 30 value=1
aten::addmm             op_3        5 1 bias input 14 15 30 out
pnnx.Output             output      1 0 out
"#
    }

    fn type_str(&self) -> &str {
        "F.linear"
    }
}

/// Whether a `Gemm` computes `input @ weight + bias` with unit scaling and an
/// untransposed input; `trans_b` is the required weight transposition.
fn gemm_is_plain_linear(captures: &Captures, trans_b: i64) -> bool {
    float_param_is(captures, "gemm.alpha", 1.0)
        && float_param_is(captures, "gemm.beta", 1.0)
        && int_param_is(captures, "gemm.transA", 0)
        && int_param_is(captures, "gemm.transB", trans_b)
}

/// ONNX `Gemm(input, weight, bias)` with `transB=1`, whose weight is already
/// laid out `[out_features, in_features]`.
pub struct OnnxGemm;

impl Pass for OnnxGemm {
    fn name(&self) -> &str {
        "F_linear_onnx"
    }

    fn match_pattern_graph(&self) -> &str {
        r#"7767517
5 4
pnnx.Input              input_0     0 1 input
pnnx.Input              input_1     0 1 weight
pnnx.Input              input_2     0 1 bias
Gemm                    gemm        3 1 input weight bias out %*=%*
pnnx.Output             output      1 0 out
"#
    }

    fn type_str(&self) -> &str {
        "F.linear"
    }

    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        // transB must be spelled out; the ONNX default of 0 means a
        // transposed weight
        ctx.param("gemm.transB").is_some() && gemm_is_plain_linear(&ctx.result.captures, 1)
    }

    fn write(&self, _op: &mut Operator, _captures: Captures) -> Result<()> {
        Ok(())
    }
}

/// Transpose the captured `[in, out]` weight into the replacement's weight
/// constant as `[out, in]`.
fn write_transposed_weight(ops: &mut ReplacementOps, captures: &Captures) -> Result<()> {
    let in_features = usize_param(captures, "in_features")?;
    let out_features = usize_param(captures, "out_features")?;
    let weight = captures
        .attr("weight.data")
        .ok_or_else(|| Error::Attribute("constant weight was not captured".to_string()))?
        .to_f32_vec()?;
    if weight.len() != in_features * out_features {
        return Err(Error::Attribute(format!(
            "weight holds {} elements, expected {in_features}x{out_features}",
            weight.len()
        )));
    }

    let mut transposed = vec![0.0f32; weight.len()];
    for i in 0..out_features {
        for j in 0..in_features {
            transposed[in_features * i + j] = weight[out_features * j + i];
        }
    }

    ops.get_mut("weight")?.set_attr(
        "data",
        Attribute::from_f32(vec![out_features, in_features], &transposed)?,
    );
    Ok(())
}

/// ONNX `Gemm` over a constant `[in, out]` weight with `transB=0`.
pub struct OnnxGemmConstWeight;

impl Pass for OnnxGemmConstWeight {
    fn name(&self) -> &str {
        "F_linear_onnx_const_weight"
    }

    fn match_pattern_graph(&self) -> &str {
        r#"7767517
5 4
pnnx.Input              input_0     0 1 input
pnnx.Input              input_1     0 1 bias
pnnx.Attribute          weight      0 1 weight @data=(%in_features,%out_features)f32
Gemm                    gemm        3 1 input weight bias out %*=%*
pnnx.Output             output      1 0 out
"#
    }

    fn replace_pattern_graph(&self) -> Option<&str> {
        Some(
            r#"7767517
5 4
pnnx.Input              input_0     0 1 input
pnnx.Input              input_1     0 1 bias
pnnx.Attribute          weight      0 1 weight
F.linear                linear      3 1 input weight bias out $weight=weight
pnnx.Output             output      1 0 out
"#,
        )
    }

    fn type_str(&self) -> &str {
        "F.linear"
    }

    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        gemm_is_plain_linear(&ctx.result.captures, 0)
    }

    fn write_replacement(&self, ops: &mut ReplacementOps, captures: &Captures) -> Result<()> {
        write_transposed_weight(ops, captures)
    }
}

/// `torch.matmul` against a constant `[in, out]` weight.
pub struct MatmulConstWeight;

impl Pass for MatmulConstWeight {
    fn name(&self) -> &str {
        "F_linear_matmul_const_weight"
    }

    fn match_pattern_graph(&self) -> &str {
        r#"7767517
4 3
pnnx.Input              input_0     0 1 input
pnnx.Attribute          weight      0 1 weight @data=(%in_features,%out_features)f32
torch.matmul            matmul      2 1 input weight out
pnnx.Output             output      1 0 out
"#
    }

    fn replace_pattern_graph(&self) -> Option<&str> {
        Some(
            r#"7767517
4 3
pnnx.Input              input_0     0 1 input
pnnx.Attribute          weight      0 1 weight
F.linear                linear      2 1 input weight out bias=None $weight=weight
pnnx.Output             output      1 0 out
"#,
        )
    }

    fn type_str(&self) -> &str {
        "F.linear"
    }

    fn write_replacement(&self, ops: &mut ReplacementOps, captures: &Captures) -> Result<()> {
        write_transposed_weight(ops, captures)
    }
}

const MATMUL_ADD_REPLACEMENT: &str = r#"7767517
5 4
pnnx.Input              input_0     0 1 input
pnnx.Attribute          weight      0 1 weight
pnnx.Attribute          bias        0 1 bias
F.linear                linear      3 1 input weight bias out $weight=weight $bias=bias
pnnx.Output             output      1 0 out
"#;

fn write_transposed_weight_and_bias(ops: &mut ReplacementOps, captures: &Captures) -> Result<()> {
    write_transposed_weight(ops, captures)?;
    let bias = captures
        .attr("bias.data")
        .cloned()
        .ok_or_else(|| Error::Attribute("constant bias was not captured".to_string()))?;
    ops.get_mut("bias")?.set_attr("data", bias);
    Ok(())
}

/// `aten::add(torch.matmul(input, weight), bias)` with constant weight and
/// bias.
pub struct MatmulAddConstWeight;

impl Pass for MatmulAddConstWeight {
    fn name(&self) -> &str {
        "F_linear_matmul_add_const_weight"
    }

    fn match_pattern_graph(&self) -> &str {
        r#"7767517
6 5
pnnx.Input              input_0     0 1 input
pnnx.Attribute          weight      0 1 weight @data=(%in_features,%out_features)f32
pnnx.Attribute          bias        0 1 bias @data=(%out_features)f32
torch.matmul            matmul      2 1 input weight mm
aten::add               add         2 1 mm bias out
pnnx.Output             output      1 0 out
"#
    }

    fn replace_pattern_graph(&self) -> Option<&str> {
        Some(MATMUL_ADD_REPLACEMENT)
    }

    fn type_str(&self) -> &str {
        "F.linear"
    }

    fn write_replacement(&self, ops: &mut ReplacementOps, captures: &Captures) -> Result<()> {
        write_transposed_weight_and_bias(ops, captures)
    }
}

/// Same as [`MatmulAddConstWeight`] with the addition's operands swapped.
pub struct AddMatmulConstWeight;

impl Pass for AddMatmulConstWeight {
    fn name(&self) -> &str {
        "F_linear_add_matmul_const_weight"
    }

    fn match_pattern_graph(&self) -> &str {
        r#"7767517
6 5
pnnx.Input              input_0     0 1 input
pnnx.Attribute          weight      0 1 weight @data=(%in_features,%out_features)f32
pnnx.Attribute          bias        0 1 bias @data=(%out_features)f32
torch.matmul            matmul      2 1 input weight mm
aten::add               add         2 1 bias mm out
pnnx.Output             output      1 0 out
"#
    }

    fn replace_pattern_graph(&self) -> Option<&str> {
        Some(MATMUL_ADD_REPLACEMENT)
    }

    fn type_str(&self) -> &str {
        "F.linear"
    }

    fn write_replacement(&self, ops: &mut ReplacementOps, captures: &Captures) -> Result<()> {
        write_transposed_weight_and_bias(ops, captures)
    }
}

/// TNN `InnerProduct` whose weight and bias come from constants.
pub struct TnnInnerProduct;

impl Pass for TnnInnerProduct {
    fn name(&self) -> &str {
        "F_linear_tnn"
    }

    fn match_pattern_graph(&self) -> &str {
        r#"7767517
5 4
pnnx.Input              input_0     0 1 input
pnnx.Input              input_1     0 1 weight @data=(%in_features,%out_features)f32
pnnx.Input              input_2     0 1 bias @data=(%out_features)f32
tnn.InnerProduct        op_0        3 1 input weight bias out arg0=* arg1=* arg2=0 arg3=1
pnnx.Output             output      1 0 out
"#
    }

    fn type_str(&self) -> &str {
        "F.linear"
    }
}
