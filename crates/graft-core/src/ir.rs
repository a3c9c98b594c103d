//! Graph intermediate representation.
//!
//! The IR is an arena of named operators connected through named operands:
//! - **Operators** (`Operator`) are computation nodes with ordered inputs and
//!   outputs, parameters and tensor attributes.
//! - **Operands** (`Operand`) are values with exactly one producer (absent
//!   only for free graph inputs) and any number of consumers.
//!
//! Operators are stored in a petgraph `StableGraph` so identities stay valid
//! across removal; graph edges mirror producer → consumer dependencies and
//! are only used for cycle detection. The canonical order of operators is an
//! explicit list which must always be a valid topological order.

use crate::attribute::Attribute;
use crate::parameter::Parameter;
use crate::types::DataType;
use crate::{Error, Result};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::{EdgeIndex, StableGraph};

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Type tag of the graph input boundary operator.
pub const INPUT_OP: &str = "pnnx.Input";

/// Type tag of the graph output boundary operator.
pub const OUTPUT_OP: &str = "pnnx.Output";

/// Type tag of the constant-producing operator holding a `data` attribute.
pub const ATTRIBUTE_OP: &str = "pnnx.Attribute";

/// Stable operator identity (backed by petgraph `NodeIndex`).
pub type OperatorId = NodeIndex;

/// Stable operand identity.
///
/// An index into the graph's operand arena. Removed operands leave a
/// tombstone so other identities remain valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperandId(pub usize);

impl OperandId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

// ──────────────────────────────── Graph ────────────────────────────────

/// A computation graph: ordered operators plus the operand registry.
pub struct Graph {
    /// Operator storage; edges carry the operand flowing between two operators.
    graph: StableGraph<Operator, OperandId>,

    /// Execution order of operators.
    order: Vec<OperatorId>,

    /// Operand arena (`None` marks a removed operand).
    operands: Vec<Option<Operand>>,

    operand_by_name: HashMap<String, OperandId>,

    operator_by_name: HashMap<String, OperatorId>,

    /// Dependency edges carried by each operand.
    edges: HashMap<OperandId, Vec<EdgeIndex>>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: StableGraph::new(),
            order: Vec::new(),
            operands: Vec::new(),
            operand_by_name: HashMap::new(),
            operator_by_name: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    // ── Operator access ──

    /// Get an operator.
    pub fn operator(&self, id: OperatorId) -> Result<&Operator> {
        self.graph
            .node_weight(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Operator {:?} not found", id)))
    }

    /// Get a mutable reference to an operator.
    ///
    /// Inputs and outputs are not reachable from here; rewire them through
    /// [`Graph::replace_input`] or [`Graph::replace_operator`].
    pub fn operator_mut(&mut self, id: OperatorId) -> Result<&mut Operator> {
        self.graph
            .node_weight_mut(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Operator {:?} not found", id)))
    }

    /// Iterate over operators in execution order.
    pub fn operators(&self) -> impl Iterator<Item = (OperatorId, &Operator)> {
        self.order
            .iter()
            .filter_map(|&id| self.graph.node_weight(id).map(|op| (id, op)))
    }

    /// Operator identities in execution order.
    pub fn operator_ids(&self) -> &[OperatorId] {
        &self.order
    }

    /// Number of operators, boundary operators included.
    pub fn operator_count(&self) -> usize {
        self.order.len()
    }

    /// Look up an operator by name.
    pub fn operator_by_name(&self, name: &str) -> Option<OperatorId> {
        self.operator_by_name.get(name).copied()
    }

    /// Position of an operator in execution order.
    pub fn position(&self, id: OperatorId) -> Option<usize> {
        self.order.iter().position(|&other| other == id)
    }

    // ── Operand access ──

    /// Get an operand.
    pub fn operand(&self, id: OperandId) -> Result<&Operand> {
        self.operands
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::InvalidGraph(format!("Operand {:?} not found", id)))
    }

    /// Get a mutable reference to an operand's hints.
    pub fn operand_mut(&mut self, id: OperandId) -> Result<&mut Operand> {
        self.operands
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::InvalidGraph(format!("Operand {:?} not found", id)))
    }

    /// Look up an operand by name.
    pub fn operand_by_name(&self, name: &str) -> Option<OperandId> {
        self.operand_by_name.get(name).copied()
    }

    /// Iterate over live operands.
    pub fn operands(&self) -> impl Iterator<Item = (OperandId, &Operand)> {
        self.operands
            .iter()
            .enumerate()
            .filter_map(|(i, operand)| operand.as_ref().map(|o| (OperandId::new(i), o)))
    }

    /// Number of live operands.
    pub fn operand_count(&self) -> usize {
        self.operand_by_name.len()
    }

    /// Producer of an operand, if any.
    pub fn producer(&self, id: OperandId) -> Option<OperatorId> {
        self.operand(id).ok().and_then(|operand| operand.producer)
    }

    /// Consumers of an operand (one entry per consuming input slot).
    pub fn consumers(&self, id: OperandId) -> &[OperatorId] {
        self.operand(id)
            .map(|operand| operand.consumers.as_slice())
            .unwrap_or(&[])
    }

    // ── Mutation ──

    /// Register a new operand with no producer and no consumers.
    pub fn add_operand(&mut self, name: impl Into<String>) -> Result<OperandId> {
        let name = name.into();
        if self.operand_by_name.contains_key(&name) {
            return Err(Error::DuplicateName(format!("operand '{name}'")));
        }
        let id = OperandId::new(self.operands.len());
        self.operand_by_name.insert(name.clone(), id);
        self.operands.push(Some(Operand::new(name)));
        Ok(id)
    }

    /// Remove an operand that is neither produced nor consumed.
    pub fn remove_operand(&mut self, id: OperandId) -> Result<()> {
        let operand = self.operand(id)?;
        if operand.producer.is_some() || !operand.consumers.is_empty() {
            return Err(Error::InvalidGraph(format!(
                "cannot remove operand '{}' while it is still connected",
                operand.name
            )));
        }
        let name = operand.name.clone();
        self.operand_by_name.remove(&name);
        self.operands[id.index()] = None;
        Ok(())
    }

    /// Append an operator at the end of the execution order.
    pub fn add_operator(&mut self, op: Operator) -> Result<OperatorId> {
        let position = self.order.len();
        self.insert_operator_at(position, op)
    }

    /// Insert an operator at `position` in the execution order.
    ///
    /// Registers it as the producer of its outputs and a consumer of its
    /// inputs. Fails if the name is taken, an operand is unknown, or an
    /// output already has a producer.
    pub fn insert_operator_at(&mut self, position: usize, op: Operator) -> Result<OperatorId> {
        if self.operator_by_name.contains_key(&op.name) {
            return Err(Error::DuplicateName(format!("operator '{}'", op.name)));
        }
        self.check_connectable(&op)?;

        let name = op.name.clone();
        let inputs = op.inputs.clone();
        let outputs = op.outputs.clone();
        let id = self.graph.add_node(op);

        self.connect(id, &inputs, &outputs);
        self.operator_by_name.insert(name, id);
        self.order.insert(position.min(self.order.len()), id);

        Ok(id)
    }

    /// Remove an operator.
    ///
    /// Its outputs lose their producer and its inputs lose it as a consumer;
    /// the operands themselves stay registered.
    pub fn remove_operator(&mut self, id: OperatorId) -> Result<Operator> {
        let (inputs, outputs) = {
            let op = self.operator(id)?;
            (op.inputs.clone(), op.outputs.clone())
        };
        self.disconnect(id, &inputs, &outputs);

        let op = self
            .graph
            .remove_node(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Operator {:?} not found", id)))?;
        self.operator_by_name.remove(&op.name);
        self.order.retain(|&other| other != id);

        Ok(op)
    }

    /// Replace the content of an operator, keeping its identity and position.
    ///
    /// The old inputs and outputs are disconnected and the new ones wired in.
    pub fn replace_operator(&mut self, id: OperatorId, op: Operator) -> Result<()> {
        let (old_name, old_inputs, old_outputs) = {
            let old = self.operator(id)?;
            (old.name.clone(), old.inputs.clone(), old.outputs.clone())
        };
        if op.name != old_name && self.operator_by_name.contains_key(&op.name) {
            return Err(Error::DuplicateName(format!("operator '{}'", op.name)));
        }

        self.disconnect(id, &old_inputs, &old_outputs);
        if let Err(e) = self.check_connectable(&op) {
            self.connect(id, &old_inputs, &old_outputs);
            return Err(e);
        }

        let inputs = op.inputs.clone();
        let outputs = op.outputs.clone();
        self.operator_by_name.remove(&old_name);
        self.operator_by_name.insert(op.name.clone(), id);
        *self.operator_mut(id)? = op;
        self.connect(id, &inputs, &outputs);

        Ok(())
    }

    /// Rewire input slot `index` of an operator to another operand.
    pub fn replace_input(&mut self, id: OperatorId, index: usize, operand: OperandId) -> Result<()> {
        self.operand(operand)?;
        let old = {
            let op = self.operator(id)?;
            *op.inputs.get(index).ok_or_else(|| {
                Error::InvalidGraph(format!(
                    "operator '{}' has no input slot {}",
                    op.name, index
                ))
            })?
        };

        if let Some(entry) = self.operands[old.index()].as_mut() {
            if let Some(slot) = entry.consumers.iter().position(|&c| c == id) {
                entry.consumers.remove(slot);
            }
        }
        if let Some(entry) = self.operands[operand.index()].as_mut() {
            entry.consumers.push(id);
        }
        self.operator_mut(id)?.inputs[index] = operand;

        self.relink(old);
        self.relink(operand);
        Ok(())
    }

    /// Make `id` the producer of `operand` through its output slot `index`.
    ///
    /// The operand previously in that slot loses its producer; `operand` must
    /// not already have one.
    pub fn set_producer(&mut self, operand: OperandId, id: OperatorId, index: usize) -> Result<()> {
        if let Some(producer) = self.operand(operand)?.producer {
            if producer == id {
                return Ok(());
            }
            return Err(Error::InvalidGraph(format!(
                "operand '{}' already has a producer",
                self.operand(operand)?.name
            )));
        }
        let old = {
            let op = self.operator(id)?;
            *op.outputs.get(index).ok_or_else(|| {
                Error::InvalidGraph(format!(
                    "operator '{}' has no output slot {}",
                    op.name, index
                ))
            })?
        };

        if let Some(entry) = self.operands[old.index()].as_mut() {
            entry.producer = None;
        }
        if let Some(entry) = self.operands[operand.index()].as_mut() {
            entry.producer = Some(id);
        }
        self.operator_mut(id)?.outputs[index] = operand;

        self.relink(old);
        self.relink(operand);
        Ok(())
    }

    /// Pick an operator name not yet used, starting from `base`.
    pub fn unique_operator_name(&self, base: &str) -> String {
        unique_name(base, |name| self.operator_by_name.contains_key(name))
    }

    /// Pick an operand name not yet used, starting from `base`.
    pub fn unique_operand_name(&self, base: &str) -> String {
        unique_name(base, |name| self.operand_by_name.contains_key(name))
    }

    // ── Ordering ──

    /// Whether every operator's inputs are produced by an earlier operator
    /// (or have no producer at all).
    pub fn is_topologically_ordered(&self) -> bool {
        let mut seen = HashSet::new();
        for (id, op) in self.operators() {
            for &input in &op.inputs {
                if let Some(producer) = self.producer(input) {
                    if !seen.contains(&producer) {
                        return false;
                    }
                }
            }
            seen.insert(id);
        }
        true
    }

    /// Reorder operators topologically, keeping the current relative order
    /// wherever dependencies allow it.
    pub fn sort_topologically(&mut self) -> Result<()> {
        let rank: HashMap<OperatorId, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        let mut pending: HashMap<OperatorId, usize> = HashMap::new();
        let mut ready = BinaryHeap::new();
        for (i, &id) in self.order.iter().enumerate() {
            let op = self.operator(id)?;
            let count = op
                .inputs
                .iter()
                .filter(|&&input| self.producer(input).is_some())
                .count();
            pending.insert(id, count);
            if count == 0 {
                ready.push(Reverse(i));
            }
        }

        let mut sorted = Vec::with_capacity(self.order.len());
        while let Some(Reverse(i)) = ready.pop() {
            let id = self.order[i];
            sorted.push(id);
            for &output in &self.operator(id)?.outputs {
                for &consumer in self.consumers(output) {
                    if let Some(count) = pending.get_mut(&consumer) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(Reverse(rank[&consumer]));
                        }
                    }
                }
            }
        }

        if sorted.len() != self.order.len() {
            return Err(Error::InvalidGraph(
                "operator dependencies contain a cycle".to_string(),
            ));
        }
        if sorted != self.order {
            tracing::trace!(operators = sorted.len(), "Reordered operators topologically");
        }
        self.order = sorted;
        Ok(())
    }

    // ── Invariants ──

    /// Check every structural invariant of the graph.
    ///
    /// - every referenced operand exists
    /// - producer and consumer records agree with operator inputs/outputs
    /// - names are unique
    /// - no dependency cycle, and the operator order is topological
    pub fn validate(&self) -> Result<()> {
        if self.order.len() != self.graph.node_count() {
            return Err(Error::InvalidGraph(format!(
                "execution order lists {} operators but the graph holds {}",
                self.order.len(),
                self.graph.node_count()
            )));
        }

        let mut expected_consumers: HashMap<OperandId, Vec<OperatorId>> = HashMap::new();
        for (id, op) in self.operators() {
            if self.operator_by_name.get(&op.name) != Some(&id) {
                return Err(Error::InvalidGraph(format!(
                    "operator '{}' is not registered under its name",
                    op.name
                )));
            }
            for &input in &op.inputs {
                self.operand(input).map_err(|_| {
                    Error::InvalidGraph(format!(
                        "operator '{}' references missing input {:?}",
                        op.name, input
                    ))
                })?;
                expected_consumers.entry(input).or_default().push(id);
            }
            for &output in &op.outputs {
                let operand = self.operand(output).map_err(|_| {
                    Error::InvalidGraph(format!(
                        "operator '{}' references missing output {:?}",
                        op.name, output
                    ))
                })?;
                if operand.producer != Some(id) {
                    return Err(Error::InvalidGraph(format!(
                        "operand '{}' does not record '{}' as its producer",
                        operand.name, op.name
                    )));
                }
            }
        }

        for (id, operand) in self.operands() {
            if self.operand_by_name.get(&operand.name) != Some(&id) {
                return Err(Error::InvalidGraph(format!(
                    "operand '{}' is not registered under its name",
                    operand.name
                )));
            }
            if let Some(producer) = operand.producer {
                let op = self.operator(producer).map_err(|_| {
                    Error::InvalidGraph(format!(
                        "operand '{}' has a dangling producer",
                        operand.name
                    ))
                })?;
                if !op.outputs.contains(&id) {
                    return Err(Error::InvalidGraph(format!(
                        "operand '{}' names '{}' as producer but is not among its outputs",
                        operand.name, op.name
                    )));
                }
            }
            let mut recorded = operand.consumers.clone();
            let mut expected = expected_consumers.remove(&id).unwrap_or_default();
            recorded.sort();
            expected.sort();
            if recorded != expected {
                return Err(Error::InvalidGraph(format!(
                    "consumer records of operand '{}' are out of sync",
                    operand.name
                )));
            }
        }

        if petgraph::algo::is_cyclic_directed(&self.graph) {
            return Err(Error::InvalidGraph(
                "operator dependencies contain a cycle".to_string(),
            ));
        }
        if !self.is_topologically_ordered() {
            return Err(Error::InvalidGraph(
                "operator order is not topological".to_string(),
            ));
        }

        Ok(())
    }

    // ── Internal wiring ──

    fn check_connectable(&self, op: &Operator) -> Result<()> {
        for &input in &op.inputs {
            self.operand(input).map_err(|_| {
                Error::InvalidGraph(format!(
                    "operator '{}' references missing input {:?}",
                    op.name, input
                ))
            })?;
        }
        for &output in &op.outputs {
            let operand = self.operand(output).map_err(|_| {
                Error::InvalidGraph(format!(
                    "operator '{}' references missing output {:?}",
                    op.name, output
                ))
            })?;
            if operand.producer.is_some() {
                return Err(Error::InvalidGraph(format!(
                    "operand '{}' already has a producer",
                    operand.name
                )));
            }
        }
        Ok(())
    }

    fn connect(&mut self, id: OperatorId, inputs: &[OperandId], outputs: &[OperandId]) {
        for &output in outputs {
            if let Some(operand) = self.operands[output.index()].as_mut() {
                operand.producer = Some(id);
            }
        }
        for &input in inputs {
            if let Some(operand) = self.operands[input.index()].as_mut() {
                operand.consumers.push(id);
            }
        }
        for &operand in inputs.iter().chain(outputs) {
            self.relink(operand);
        }
    }

    fn disconnect(&mut self, id: OperatorId, inputs: &[OperandId], outputs: &[OperandId]) {
        for &output in outputs {
            if let Some(operand) = self.operands[output.index()].as_mut() {
                if operand.producer == Some(id) {
                    operand.producer = None;
                }
            }
        }
        for &input in inputs {
            if let Some(operand) = self.operands[input.index()].as_mut() {
                if let Some(slot) = operand.consumers.iter().position(|&c| c == id) {
                    operand.consumers.remove(slot);
                }
            }
        }
        for &operand in inputs.iter().chain(outputs) {
            self.relink(operand);
        }
    }

    /// Rebuild the dependency edges carrying `id`.
    ///
    /// Operators are always disconnected before they leave the graph, so the
    /// recorded edge indices never go stale.
    fn relink(&mut self, id: OperandId) {
        for edge in self.edges.remove(&id).unwrap_or_default() {
            self.graph.remove_edge(edge);
        }
        let Some(operand) = self.operands.get(id.index()).and_then(Option::as_ref) else {
            return;
        };
        let Some(producer) = operand.producer else {
            return;
        };
        let edges: Vec<EdgeIndex> = operand
            .consumers
            .iter()
            .map(|&consumer| self.graph.add_edge(producer, consumer, id))
            .collect();
        if !edges.is_empty() {
            self.edges.insert(id, edges);
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

// ──────────────────────────────── Operator ───────────────────────────────

/// A named computation node.
#[derive(Debug, Clone)]
pub struct Operator {
    name: String,

    /// Type tag (e.g. `aten::linear`, `F.linear`, `pnnx.Input`).
    op_type: String,

    inputs: Vec<OperandId>,

    outputs: Vec<OperandId>,

    /// Role names of the inputs (e.g. `input`, `weight`, `bias`); empty when
    /// unknown.
    pub input_names: Vec<String>,

    /// Static configuration values.
    pub params: HashMap<String, Parameter>,

    /// Tensor payloads.
    pub attrs: HashMap<String, Attribute>,
}

impl Operator {
    /// Create an operator with no operands.
    pub fn new(op_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            input_names: Vec::new(),
            params: HashMap::new(),
            attrs: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn inputs(&self) -> &[OperandId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OperandId] {
        &self.outputs
    }

    /// Whether this is a `pnnx.Input` or `pnnx.Output` boundary operator.
    pub fn is_boundary(&self) -> bool {
        self.op_type == INPUT_OP || self.op_type == OUTPUT_OP
    }

    /// Append an input operand (before the operator joins a graph).
    pub fn add_input(&mut self, operand: OperandId) {
        self.inputs.push(operand);
    }

    /// Append an output operand (before the operator joins a graph).
    pub fn add_output(&mut self, operand: OperandId) {
        self.outputs.push(operand);
    }

    pub fn param(&self, key: &str) -> Option<&Parameter> {
        self.params.get(key)
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<Parameter>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn attr(&self, key: &str) -> Option<&Attribute> {
        self.attrs.get(key)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: Attribute) {
        self.attrs.insert(key.into(), value);
    }
}

// ──────────────────────────────── Operand ────────────────────────────────

/// A named value flowing between operators.
#[derive(Debug, Clone)]
pub struct Operand {
    /// Operand name (unique within the graph).
    pub name: String,

    /// Producing operator; `None` only for free inputs.
    pub producer: Option<OperatorId>,

    /// Consuming operators, one entry per consuming input slot.
    pub consumers: Vec<OperatorId>,

    /// Element type hint.
    pub dtype: Option<DataType>,

    /// Shape hint (`-1` marks a dynamic dimension).
    pub shape: Option<Vec<i64>>,
}

impl Operand {
    fn new(name: String) -> Self {
        Self {
            name,
            producer: None,
            consumers: Vec::new(),
            dtype: None,
            shape: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unary(graph: &mut Graph, op_type: &str, name: &str, input: OperandId, output: &str) -> (OperatorId, OperandId) {
        let out = graph.add_operand(output).unwrap();
        let mut op = Operator::new(op_type, name);
        op.add_input(input);
        op.add_output(out);
        (graph.add_operator(op).unwrap(), out)
    }

    fn graph_input(graph: &mut Graph, name: &str) -> OperandId {
        let operand = graph.add_operand(name).unwrap();
        let mut op = Operator::new(INPUT_OP, format!("{name}_in"));
        op.add_output(operand);
        graph.add_operator(op).unwrap();
        operand
    }

    #[test]
    fn test_create_empty_graph() {
        let graph = Graph::new();
        assert_eq!(graph.operator_count(), 0);
        assert_eq!(graph.operand_count(), 0);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_add_operator_records_producer_and_consumers() {
        let mut graph = Graph::new();
        let x = graph_input(&mut graph, "x");
        let (relu, y) = unary(&mut graph, "F.relu", "relu", x, "y");

        assert_eq!(graph.producer(y), Some(relu));
        assert_eq!(graph.consumers(x), &[relu]);
        assert_eq!(graph.operator_by_name("relu"), Some(relu));
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut graph = Graph::new();
        graph.add_operand("x").unwrap();
        assert!(matches!(graph.add_operand("x"), Err(Error::DuplicateName(_))));

        let x = graph.operand_by_name("x").unwrap();
        unary(&mut graph, "F.relu", "relu", x, "y");
        let z = graph.add_operand("z").unwrap();
        let mut op = Operator::new("F.relu", "relu");
        op.add_input(x);
        op.add_output(z);
        assert!(graph.add_operator(op).is_err());
    }

    #[test]
    fn test_second_producer_rejected() {
        let mut graph = Graph::new();
        let x = graph_input(&mut graph, "x");
        let (_, y) = unary(&mut graph, "F.relu", "relu", x, "y");

        let mut op = Operator::new("F.relu", "relu2");
        op.add_input(x);
        op.add_output(y);
        assert!(graph.add_operator(op).is_err());
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_remove_operator() {
        let mut graph = Graph::new();
        let x = graph_input(&mut graph, "x");
        let (relu, y) = unary(&mut graph, "F.relu", "relu", x, "y");

        let removed = graph.remove_operator(relu).unwrap();
        assert_eq!(removed.name(), "relu");
        assert_eq!(graph.producer(y), None);
        assert!(graph.consumers(x).is_empty());
        assert!(graph.operator(relu).is_err());

        graph.remove_operand(y).unwrap();
        assert!(graph.operand_by_name("y").is_none());
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_remove_connected_operand_rejected() {
        let mut graph = Graph::new();
        let x = graph_input(&mut graph, "x");
        assert!(graph.remove_operand(x).is_err());
    }

    #[test]
    fn test_replace_input() {
        let mut graph = Graph::new();
        let x = graph_input(&mut graph, "x");
        let w = graph_input(&mut graph, "w");
        let (relu, _) = unary(&mut graph, "F.relu", "relu", x, "y");

        graph.replace_input(relu, 0, w).unwrap();
        assert!(graph.consumers(x).is_empty());
        assert_eq!(graph.consumers(w), &[relu]);
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_replace_operator_keeps_identity() {
        let mut graph = Graph::new();
        let x = graph_input(&mut graph, "x");
        let (relu, y) = unary(&mut graph, "aten::relu", "relu", x, "y");
        let (sig, _) = unary(&mut graph, "F.sigmoid", "sig", y, "z");

        let mut op = Operator::new("F.relu", "relu");
        op.add_input(x);
        op.add_output(y);
        graph.replace_operator(relu, op).unwrap();

        assert_eq!(graph.operator(relu).unwrap().op_type(), "F.relu");
        assert_eq!(graph.producer(y), Some(relu));
        assert_eq!(graph.consumers(y), &[sig]);
        assert_eq!(graph.position(relu), Some(1));
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_set_producer_moves_output() {
        let mut graph = Graph::new();
        let x = graph_input(&mut graph, "x");
        let (relu, y) = unary(&mut graph, "F.relu", "relu", x, "y");
        let fresh = graph.add_operand("fresh").unwrap();

        graph.set_producer(fresh, relu, 0).unwrap();
        assert_eq!(graph.producer(fresh), Some(relu));
        assert_eq!(graph.producer(y), None);
        assert_eq!(graph.operator(relu).unwrap().outputs(), &[fresh]);

        // taken operands cannot be claimed twice
        let (_, z) = unary(&mut graph, "F.relu", "relu2", fresh, "z");
        assert!(graph.set_producer(z, relu, 0).is_err());
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_out_of_order_insert_detected_and_sorted() {
        let mut graph = Graph::new();
        let x = graph_input(&mut graph, "x");
        let y = graph.add_operand("y").unwrap();
        let z = graph.add_operand("z").unwrap();

        let mut second = Operator::new("B", "b");
        second.add_input(y);
        second.add_output(z);
        graph.add_operator(second).unwrap();

        let mut first = Operator::new("A", "a");
        first.add_input(x);
        first.add_output(y);
        let a = graph.add_operator(first).unwrap();

        assert!(!graph.is_topologically_ordered());
        assert!(graph.validate().is_err());

        graph.sort_topologically().unwrap();
        assert!(graph.validate().is_ok());
        assert_eq!(graph.position(a), Some(1));
    }

    #[test]
    fn test_sort_detects_cycle() {
        let mut graph = Graph::new();
        let a_out = graph.add_operand("a_out").unwrap();
        let b_out = graph.add_operand("b_out").unwrap();

        let mut a = Operator::new("A", "a");
        a.add_input(b_out);
        a.add_output(a_out);
        graph.add_operator(a).unwrap();

        let mut b = Operator::new("B", "b");
        b.add_input(a_out);
        b.add_output(b_out);
        graph.add_operator(b).unwrap();

        assert!(graph.sort_topologically().is_err());
        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_stable_identities_after_removal() {
        let mut graph = Graph::new();
        let x = graph_input(&mut graph, "x");
        let (a, y) = unary(&mut graph, "A", "a", x, "y");
        let (b, z) = unary(&mut graph, "B", "b", y, "z");
        let (c, _) = unary(&mut graph, "C", "c", z, "w");

        graph.replace_input(c, 0, y).unwrap();
        graph.remove_operator(b).unwrap();

        assert!(graph.operator(a).is_ok());
        assert!(graph.operator(c).is_ok());
        assert_eq!(graph.position(c), Some(2));
    }

    #[test]
    fn test_unique_names() {
        let mut graph = Graph::new();
        graph.add_operand("t").unwrap();
        graph.add_operand("t_1").unwrap();
        assert_eq!(graph.unique_operand_name("t"), "t_2");
        assert_eq!(graph.unique_operand_name("u"), "u");
        assert_eq!(graph.unique_operator_name("F.linear"), "F.linear");
    }

    #[test]
    fn test_dependency_edges_follow_rewiring() {
        let mut graph = Graph::new();
        let x = graph_input(&mut graph, "x");
        let w = graph_input(&mut graph, "w");
        let (a, y) = unary(&mut graph, "A", "a", x, "y");
        let (b, _) = unary(&mut graph, "B", "b", y, "z");
        let (c, _) = unary(&mut graph, "C", "c", y, "u");
        // x_in -> a, a -> b, a -> c
        assert_eq!(graph.graph.edge_count(), 3);

        graph.replace_input(c, 0, w).unwrap();
        assert_eq!(graph.graph.edge_count(), 3);
        assert!(graph.graph.find_edge(a, c).is_none());

        graph.remove_operator(b).unwrap();
        assert_eq!(graph.graph.edge_count(), 2);
        assert_eq!(graph.edges.get(&y), None);

        // slots freed by the removal are reused without confusing operands
        let (d, _) = unary(&mut graph, "D", "d", y, "v");
        assert_eq!(graph.graph.edge_count(), 3);
        assert_eq!(graph.edges[&y].len(), 1);
        assert!(graph.graph.find_edge(a, d).is_some());
        assert!(graph.validate().is_ok());
    }
}
