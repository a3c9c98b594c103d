//! Common test utilities for rewrite tests.
//!
//! Graphs are assembled by operand name so test bodies read like the pattern
//! text they exercise.

#![allow(dead_code)]

use graft_core::{Graph, INPUT_OP, OUTPUT_OP, OperandId, Operator, OperatorId};

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Incremental graph builder addressing operands by name.
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
        }
    }

    /// Add a `pnnx.Input` producing a fresh operand.
    pub fn input(&mut self, name: &str) -> OperandId {
        let operand = self.graph.add_operand(name).unwrap();
        let mut op = Operator::new(INPUT_OP, format!("{name}_in"));
        op.add_output(operand);
        self.graph.add_operator(op).unwrap();
        operand
    }

    /// Add a `pnnx.Output` consuming existing operands.
    pub fn output(&mut self, name: &str, inputs: &[&str]) -> OperatorId {
        self.op_with(OUTPUT_OP, name, inputs, &[], |_| {})
    }

    pub fn op(&mut self, op_type: &str, name: &str, inputs: &[&str], outputs: &[&str]) -> OperatorId {
        self.op_with(op_type, name, inputs, outputs, |_| {})
    }

    /// Add an operator; outputs are created, inputs must already exist.
    pub fn op_with(
        &mut self,
        op_type: &str,
        name: &str,
        inputs: &[&str],
        outputs: &[&str],
        configure: impl FnOnce(&mut Operator),
    ) -> OperatorId {
        let mut op = Operator::new(op_type, name);
        for input in inputs {
            let operand = self
                .graph
                .operand_by_name(input)
                .unwrap_or_else(|| panic!("operand '{input}' does not exist"));
            op.add_input(operand);
        }
        for output in outputs {
            op.add_output(self.graph.add_operand(*output).unwrap());
        }
        configure(&mut op);
        self.graph.add_operator(op).unwrap()
    }

    pub fn build(self) -> Graph {
        self.graph.validate().unwrap();
        self.graph
    }
}

/// Operator type tags in execution order, boundaries excluded.
pub fn body_types(graph: &Graph) -> Vec<String> {
    graph
        .operators()
        .filter(|(_, op)| !op.is_boundary())
        .map(|(_, op)| op.op_type().to_string())
        .collect()
}

/// Names of an operator's input operands.
pub fn input_names(graph: &Graph, op: &Operator) -> Vec<String> {
    op.inputs()
        .iter()
        .map(|&id| graph.operand(id).unwrap().name.clone())
        .collect()
}

/// Names of an operator's output operands.
pub fn output_names(graph: &Graph, op: &Operator) -> Vec<String> {
    op.outputs()
        .iter()
        .map(|&id| graph.operand(id).unwrap().name.clone())
        .collect()
}

pub fn assert_vec_approx_eq(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= 1e-5 * e.abs().max(1.0),
            "element {i}: {a} != {e}"
        );
    }
}
