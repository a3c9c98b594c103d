//! Canonicalization through the default registry.

mod common;

use common::*;
use graft_core::{Graph, Parameter};
use graft_passes::default_pass_registry;
use graft_rewrite::optimize;

fn canonicalize(mut graph: Graph) -> Graph {
    init_tracing();
    let registry = default_pass_registry().unwrap();
    optimize(&registry, &mut graph).unwrap();
    graph.validate().unwrap();
    graph
}

#[test]
fn test_aten_linear_rename() {
    let graph = GraphBuilder::new()
        .input("x")
        .input("w")
        .input("b")
        .op("aten::linear", "fc", &["x", "w", "b"], &["y"])
        .output(&["y"])
        .build();

    let graph = canonicalize(graph);

    assert_eq!(body_types(&graph), ["F.linear"]);
    let (_, op) = single_op(&graph, "F.linear");
    assert_eq!(op.name(), "fc");
    assert_eq!(input_names(&graph, op), ["x", "w", "b"]);
    assert_eq!(output_names(&graph, op), ["y"]);
    assert_eq!(op.input_names, ["input", "weight", "bias"]);
}

#[test]
fn test_transposed_matmul_add() {
    let graph = GraphBuilder::new()
        .input("x")
        .input("w")
        .input("b")
        .op("aten::t", "t", &["w"], &["wt"])
        .op("aten::matmul", "mm", &["x", "wt"], &["mm_out"])
        .op_with("prim::Constant", "alpha", &[], &["one"], |op| {
            op.set_param("value", Parameter::Int(1))
        })
        .op("aten::add", "add", &["mm_out", "b", "one"], &["y"])
        .output(&["y"])
        .build();

    let graph = canonicalize(graph);

    assert_eq!(body_types(&graph), ["F.linear"]);
    let (_, op) = single_op(&graph, "F.linear");
    assert_eq!(input_names(&graph, op), ["x", "w", "b"]);
    assert_eq!(output_names(&graph, op), ["y"]);
    assert!(graph.operand_by_name("wt").is_none());
    assert!(graph.operand_by_name("mm_out").is_none());
}

#[test]
fn test_transposed_matmul_without_bias() {
    let graph = GraphBuilder::new()
        .input("x")
        .input("w")
        .op("aten::t", "t", &["w"], &["wt"])
        .op("aten::matmul", "mm", &["x", "wt"], &["y"])
        .output(&["y"])
        .build();

    let graph = canonicalize(graph);

    let (_, op) = single_op(&graph, "F.linear");
    assert_eq!(input_names(&graph, op), ["x", "w"]);
    assert_eq!(op.param("bias"), Some(&Parameter::None));
}

#[test]
fn test_transposed_weight_shared_elsewhere() {
    // The transposed weight has a second consumer, so the chain is not a
    // closed region and must be left alone.
    let graph = GraphBuilder::new()
        .input("x")
        .input("w")
        .op("aten::t", "t", &["w"], &["wt"])
        .op("aten::matmul", "mm", &["x", "wt"], &["y"])
        .op("aten::relu", "relu", &["wt"], &["z"])
        .output(&["y", "z"])
        .build();

    let graph = canonicalize(graph);

    assert_eq!(body_types(&graph), ["aten::t", "aten::matmul", "aten::relu"]);
}

#[test]
fn test_addmm() {
    let graph = GraphBuilder::new()
        .input("x")
        .input("w")
        .input("b")
        .op("aten::t", "t", &["w"], &["wt"])
        .op_with("prim::Constant", "beta", &[], &["beta"], |op| {
            op.set_param("value", Parameter::Int(1))
        })
        .op_with("prim::Constant", "alpha", &[], &["alpha"], |op| {
            op.set_param("value", Parameter::Int(1))
        })
        .op("aten::addmm", "addmm", &["b", "x", "wt", "beta", "alpha"], &["y"])
        .output(&["y"])
        .build();

    let graph = canonicalize(graph);

    assert_eq!(body_types(&graph), ["F.linear"]);
    let (_, op) = single_op(&graph, "F.linear");
    assert_eq!(input_names(&graph, op), ["x", "w", "b"]);
}

#[test]
fn test_addmm_scaled_is_not_linear() {
    let graph = GraphBuilder::new()
        .input("x")
        .input("w")
        .input("b")
        .op("aten::t", "t", &["w"], &["wt"])
        .op_with("prim::Constant", "beta", &[], &["beta"], |op| {
            op.set_param("value", Parameter::Int(2))
        })
        .op_with("prim::Constant", "alpha", &[], &["alpha"], |op| {
            op.set_param("value", Parameter::Int(1))
        })
        .op("aten::addmm", "addmm", &["b", "x", "wt", "beta", "alpha"], &["y"])
        .output(&["y"])
        .build();

    let graph = canonicalize(graph);

    assert!(body_types(&graph).contains(&"aten::addmm".to_string()));
}

fn gemm_graph(configure: impl FnOnce(&mut graft_core::Operator)) -> Graph {
    GraphBuilder::new()
        .input("x")
        .input("w")
        .input("b")
        .op_with("Gemm", "gemm_0", &["x", "w", "b"], &["y"], configure)
        .output(&["y"])
        .build()
}

#[test]
fn test_gemm_trans_b() {
    let graph = canonicalize(gemm_graph(|op| {
        op.set_param("alpha", Parameter::Float(1.0));
        op.set_param("beta", Parameter::Float(1.0));
        op.set_param("transB", Parameter::Int(1));
    }));

    let (_, op) = single_op(&graph, "F.linear");
    assert_eq!(op.name(), "gemm_0");
    // the relabel keeps nothing from the ONNX attribute set
    assert!(op.params.is_empty());
}

#[test]
fn test_gemm_rejections() {
    // transB omitted
    let graph = canonicalize(gemm_graph(|_| {}));
    assert_eq!(body_types(&graph), ["Gemm"]);

    // scaled product
    let graph = canonicalize(gemm_graph(|op| {
        op.set_param("alpha", Parameter::Float(0.5));
        op.set_param("transB", Parameter::Int(1));
    }));
    assert_eq!(body_types(&graph), ["Gemm"]);

    // transposed input
    let graph = canonicalize(gemm_graph(|op| {
        op.set_param("transA", Parameter::Int(1));
        op.set_param("transB", Parameter::Int(1));
    }));
    assert_eq!(body_types(&graph), ["Gemm"]);
}

#[test]
fn test_gemm_const_weight_is_transposed() {
    // weight is [in=3, out=2]
    let graph = GraphBuilder::new()
        .input("x")
        .input("b")
        .constant("w", vec![3, 2], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
        .op_with("Gemm", "gemm_0", &["x", "w", "b"], &["y"], |op| {
            op.set_param("transB", Parameter::Int(0));
        })
        .output(&["y"])
        .build();

    let graph = canonicalize(graph);

    assert_eq!(body_types(&graph), ["pnnx.Attribute", "F.linear"]);
    let (_, linear) = single_op(&graph, "F.linear");
    assert_eq!(output_names(&graph, linear), ["y"]);
    assert_eq!(input_names(&graph, linear)[0], "x");
    assert_eq!(input_names(&graph, linear)[2], "b");

    let weight = linear.attr("weight").unwrap();
    assert_eq!(weight.shape, vec![2, 3]);
    assert_eq!(
        weight.to_f32_vec().unwrap(),
        vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]
    );

    // the constant feeding the linear carries the same tensor
    let (_, constant) = single_op(&graph, "pnnx.Attribute");
    assert_eq!(constant.attr("data"), Some(weight));
    assert_eq!(
        graph.consumers(constant.outputs()[0]),
        &[graph.operator_by_name(linear.name()).unwrap()]
    );
    assert!(graph.operand_by_name("w").is_none());
}

#[test]
fn test_matmul_const_weight() {
    let graph = GraphBuilder::new()
        .input("x")
        .constant("w", vec![2, 2], &[1.0, 2.0, 3.0, 4.0])
        .op("torch.matmul", "mm", &["x", "w"], &["y"])
        .output(&["y"])
        .build();

    let graph = canonicalize(graph);

    let (_, linear) = single_op(&graph, "F.linear");
    assert_eq!(linear.param("bias"), Some(&Parameter::None));
    assert_eq!(
        linear.attr("weight").unwrap().to_f32_vec().unwrap(),
        vec![1.0, 3.0, 2.0, 4.0]
    );
}

#[test]
fn test_matmul_add_const_weight_both_orders() {
    for bias_first in [false, true] {
        let mut builder = GraphBuilder::new();
        builder
            .input("x")
            .constant("w", vec![2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .constant("b", vec![3], &[0.1, 0.2, 0.3])
            .op("torch.matmul", "mm", &["x", "w"], &["mm_out"]);
        if bias_first {
            builder.op("aten::add", "add", &["b", "mm_out"], &["y"]);
        } else {
            builder.op("aten::add", "add", &["mm_out", "b"], &["y"]);
        }
        let graph = canonicalize(builder.output(&["y"]).build());

        assert_eq!(
            body_types(&graph),
            ["pnnx.Attribute", "pnnx.Attribute", "F.linear"],
            "bias_first = {bias_first}"
        );
        let (_, linear) = single_op(&graph, "F.linear");
        let weight = linear.attr("weight").unwrap();
        assert_eq!(weight.shape, vec![3, 2]);
        assert_eq!(
            weight.to_f32_vec().unwrap(),
            vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
        );
        assert_vec_approx_eq(
            &linear.attr("bias").unwrap().to_f32_vec().unwrap(),
            &[0.1, 0.2, 0.3],
        );
    }
}

#[test]
fn test_tnn_inner_product() {
    let graph = GraphBuilder::new()
        .input("x")
        .constant("w", vec![4, 2], &[0.0; 8])
        .constant("b", vec![2], &[0.0; 2])
        .op_with("tnn.InnerProduct", "ip", &["x", "w", "b"], &["y"], |op| {
            op.set_param("arg0", Parameter::Int(2));
            op.set_param("arg1", Parameter::Int(1));
            op.set_param("arg2", Parameter::Int(0));
            op.set_param("arg3", Parameter::Int(1));
        })
        .output(&["y"])
        .build();

    let graph = canonicalize(graph);

    let (_, linear) = single_op(&graph, "F.linear");
    assert_eq!(linear.name(), "ip");
    assert_eq!(linear.param("in_features"), Some(&Parameter::Int(4)));
    assert_eq!(linear.param("out_features"), Some(&Parameter::Int(2)));
    // the constants stay in place as producers of the weight and bias
    assert_eq!(input_names(&graph, linear), ["x", "w", "b"]);
}
