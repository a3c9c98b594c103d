mod common;

use common::*;
use graft_core::{Graph, Parameter};
use graft_passes::default_pass_registry;
use graft_rewrite::optimize;

fn constant(builder: &mut GraphBuilder, name: &str, value: Parameter) {
    builder.op_with("prim::Constant", name, &[], &[name], |op| {
        op.set_param("value", value)
    });
}

/// `where(x > l, x - l, 0) + where(x < m, x + l, 0)` as exported by ONNX.
fn decomposed(lambd: f32, mlambd: f32) -> Graph {
    let mut b = GraphBuilder::new();
    b.input("x");
    constant(&mut b, "l0", Parameter::Float(lambd));
    b.op("torch.gt", "gt", &["x", "l0"], &["gt_out"]);
    constant(&mut b, "l1", Parameter::Float(lambd));
    b.op("aten::sub", "sub", &["x", "l1"], &["sub_out"]);
    constant(&mut b, "z0", Parameter::Int(0));
    b.op("torch.where", "where_0", &["gt_out", "sub_out", "z0"], &["upper"]);
    constant(&mut b, "m", Parameter::Float(mlambd));
    b.op("torch.lt", "lt", &["x", "m"], &["lt_out"]);
    constant(&mut b, "l2", Parameter::Float(lambd));
    b.op("aten::add", "add_0", &["x", "l2"], &["add_out"]);
    constant(&mut b, "z1", Parameter::Int(0));
    b.op("torch.where", "where_1", &["lt_out", "add_out", "z1"], &["lower"]);
    b.op("aten::add", "add_1", &["upper", "lower"], &["y"]);
    b.output(&["y"]);
    b.build()
}

#[test]
fn test_aten_softshrink_rename() {
    init_tracing();
    let mut graph = GraphBuilder::new()
        .input("x")
        .input("lambd")
        .op("aten::softshrink", "shrink", &["x", "lambd"], &["y"])
        .output(&["y"])
        .build();

    let registry = default_pass_registry().unwrap();
    let report = optimize(&registry, &mut graph).unwrap();

    assert_eq!(report.per_pass.get("F_softshrink"), Some(&1));
    let (_, op) = single_op(&graph, "F.softshrink");
    assert_eq!(op.name(), "shrink");
    assert_eq!(input_names(&graph, op), ["x", "lambd"]);
}

#[test]
fn test_decomposition_collapses() {
    init_tracing();
    let mut graph = decomposed(0.5, -0.5);

    let registry = default_pass_registry().unwrap();
    let report = optimize(&registry, &mut graph).unwrap();

    assert_eq!(report.rewrites, 1);
    assert_eq!(body_types(&graph), ["F.softshrink"]);
    let (_, op) = single_op(&graph, "F.softshrink");
    assert_eq!(op.name(), "F.softshrink");
    assert_eq!(op.params.len(), 1);
    assert_eq!(op.param("lambd"), Some(&Parameter::Float(0.5)));
    assert_eq!(input_names(&graph, op), ["x"]);
    assert_eq!(output_names(&graph, op), ["y"]);

    // every intermediate value is gone
    assert_eq!(graph.operand_count(), 2);
    graph.validate().unwrap();
}

#[test]
fn test_decomposition_within_tolerance() {
    init_tracing();
    let mut graph = decomposed(0.5, -0.5004);

    let registry = default_pass_registry().unwrap();
    optimize(&registry, &mut graph).unwrap();

    assert_eq!(body_types(&graph), ["F.softshrink"]);
}

#[test]
fn test_decomposition_mismatched_thresholds() {
    init_tracing();
    let mut graph = decomposed(0.5, -0.6);
    let before = body_types(&graph);

    let registry = default_pass_registry().unwrap();
    let report = optimize(&registry, &mut graph).unwrap();

    assert_eq!(report.rewrites, 0);
    assert_eq!(report.sweeps, 1);
    assert_eq!(body_types(&graph), before);
}
