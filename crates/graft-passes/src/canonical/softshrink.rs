//! Canonicalization to `F.softshrink`.

use crate::helpers::{nearly_equal, required_param};
use graft_core::{Operator, Result};
use graft_rewrite::{Captures, MatchContext, Pass};

/// `aten::softshrink(input, lambd)`.
pub struct AtenSoftshrink;

impl Pass for AtenSoftshrink {
    fn name(&self) -> &str {
        "F_softshrink"
    }

    fn match_pattern_graph(&self) -> &str {
        r#"7767517
4 3
pnnx.Input              input_0     0 1 input
pnnx.Input              input_1     0 1 lambd
aten::softshrink        op_0        2 1 input lambd out
pnnx.Output             output      1 0 out
"#
    }

    fn type_str(&self) -> &str {
        "F.softshrink"
    }
}

/// The ONNX export of softshrink:
/// `where(x > l, x - l, 0) + where(x < -l, x + l, 0)`.
pub struct OnnxSoftshrink;

impl Pass for OnnxSoftshrink {
    fn name(&self) -> &str {
        "F_softshrink_onnx"
    }

    fn match_pattern_graph(&self) -> &str {
        r#"7767517
15 14
pnnx.Input              input       0 1 input
prim::Constant          op_0        0 1 lambd value=%lambd
torch.gt                op_1        2 1 input lambd 8
prim::Constant          op_2        0 1 lambd2 value=%lambd
aten::sub               op_3        2 1 input lambd2 9
prim::Constant          op_4        0 1 zero value=0
torch.where             op_5        3 1 8 9 zero a
prim::Constant          op_6        0 1 mlambd value=%lambd2
torch.lt                op_7        2 1 input mlambd 11
prim::Constant          op_8        0 1 lambd3 value=%lambd
aten::add               op_9        2 1 input lambd3 12
prim::Constant          op_10       0 1 zero2 value=0
torch.where             op_11       3 1 11 12 zero2 b
aten::add               op_12       2 1 a b out
pnnx.Output             output      1 0 out
"#
    }

    fn type_str(&self) -> &str {
        "F.softshrink"
    }

    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        let (Some(lambd), Some(lambd2)) = (
            ctx.param("lambd").and_then(|p| p.as_f64()),
            ctx.param("lambd2").and_then(|p| p.as_f64()),
        ) else {
            return false;
        };
        nearly_equal(lambd as f32, -lambd2 as f32, 0.001)
    }

    fn write(&self, op: &mut Operator, captures: Captures) -> Result<()> {
        let lambd = required_param(&captures, "lambd")?.clone();
        op.set_param("lambd", lambd);
        Ok(())
    }
}
