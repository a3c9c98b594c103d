//! Common test utilities for pass tests.

#![allow(dead_code)]

use graft_core::{ATTRIBUTE_OP, Attribute, Graph, INPUT_OP, OUTPUT_OP, Operator, OperatorId};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Graph builder addressing operands by name.
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
        }
    }

    /// Add a `pnnx.Input` producing `name`.
    pub fn input(&mut self, name: &str) -> &mut Self {
        self.op(INPUT_OP, &format!("{name}_in"), &[], &[name])
    }

    /// Add a `pnnx.Attribute` holding `values` with the given shape.
    pub fn constant(&mut self, name: &str, shape: Vec<usize>, values: &[f32]) -> &mut Self {
        let data = Attribute::from_f32(shape, values).unwrap();
        self.op_with(ATTRIBUTE_OP, name, &[], &[name], |op| op.set_attr("data", data))
    }

    pub fn output(&mut self, inputs: &[&str]) -> &mut Self {
        self.op(OUTPUT_OP, "output", inputs, &[])
    }

    pub fn op(&mut self, op_type: &str, name: &str, inputs: &[&str], outputs: &[&str]) -> &mut Self {
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
    ) -> &mut Self {
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
        self.graph.add_operator(op).unwrap();
        self
    }

    pub fn build(&mut self) -> Graph {
        let graph = std::mem::take(&mut self.graph);
        graph.validate().unwrap();
        graph
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

/// The only body operator of the given type.
pub fn single_op<'a>(graph: &'a Graph, op_type: &str) -> (OperatorId, &'a Operator) {
    let mut found = graph.operators().filter(|(_, op)| op.op_type() == op_type);
    let first = found
        .next()
        .unwrap_or_else(|| panic!("no '{op_type}' operator"));
    assert!(found.next().is_none(), "more than one '{op_type}' operator");
    first
}

/// Names of an operator's input operands.
pub fn input_names(graph: &Graph, op: &Operator) -> Vec<String> {
    op.inputs()
        .iter()
        .map(|&id| graph.operand(id).unwrap().name.clone())
        .collect()
}

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
