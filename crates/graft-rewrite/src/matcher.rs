//! Subgraph matcher.
//!
//! Matching anchors on every target operator whose type equals the pattern's
//! first non-boundary operator, then resolves the remaining pattern operators
//! one at a time through operand links:
//!
//! 1. an unresolved operator whose output operand is already bound can only
//!    be the producer of that target operand;
//! 2. otherwise, an unresolved consumer of a bound operand is looked up among
//!    the target consumers of that operand, and the first candidate passing
//!    the local checks wins.
//!
//! A failed step rejects the whole anchor; there is no backtracking.

use crate::pass::Pass;
use crate::pattern::{AttrPattern, DimPattern, ParamPattern, PatternGraph};
use graft_core::{Attribute, Graph, OperandId, Operator, OperatorId, Parameter};
use std::collections::{HashMap, HashSet};

/// Values recorded while matching.
#[derive(Debug, Clone, Default)]
pub struct Captures {
    /// `%name` captures, dimension captures and `"<op>.<param>"` entries
    /// collected by `%*=%*`.
    pub params: HashMap<String, Parameter>,

    /// Attributes named with `@`, keyed `"<op>.<attr>"`.
    pub attrs: HashMap<String, Attribute>,
}

impl Captures {
    pub fn param(&self, key: &str) -> Option<&Parameter> {
        self.params.get(key)
    }

    pub fn attr(&self, key: &str) -> Option<&Attribute> {
        self.attrs.get(key)
    }

    /// Move a captured attribute out, leaving nothing behind.
    pub fn take_attr(&mut self, key: &str) -> Option<Attribute> {
        self.attrs.remove(key)
    }
}

/// A structural occurrence of a pattern in a graph.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Pattern operator name → target operator (non-boundary operators only).
    pub operators: HashMap<String, OperatorId>,

    /// Pattern operand name → target operand.
    pub operands: HashMap<String, OperandId>,

    pub captures: Captures,
}

impl MatchResult {
    /// Names of the matched target operators, sorted.
    pub fn operator_names(&self, graph: &Graph) -> Vec<String> {
        let mut names: Vec<String> = self
            .operators
            .values()
            .filter_map(|&id| graph.operator(id).ok())
            .map(|op| op.name().to_string())
            .collect();
        names.sort();
        names
    }
}

/// What a pass predicate sees of a structural match.
pub struct MatchContext<'a> {
    pub graph: &'a Graph,
    pub result: &'a MatchResult,
}

impl<'a> MatchContext<'a> {
    /// The target operator bound to a pattern operator.
    pub fn operator(&self, pattern_name: &str) -> Option<&'a Operator> {
        let id = *self.result.operators.get(pattern_name)?;
        self.graph.operator(id).ok()
    }

    pub fn param(&self, key: &str) -> Option<&'a Parameter> {
        self.result.captures.param(key)
    }

    pub fn attr(&self, key: &str) -> Option<&'a Attribute> {
        self.result.captures.attr(key)
    }
}

/// Finds occurrences of one pattern.
pub struct Matcher<'p> {
    pattern: &'p PatternGraph,
    pass: Option<&'p dyn Pass>,
}

impl<'p> Matcher<'p> {
    pub fn new(pattern: &'p PatternGraph) -> Self {
        Self {
            pattern,
            pass: None,
        }
    }

    /// Accept structural matches only if `pass.matches` agrees.
    pub fn with_pass(mut self, pass: &'p dyn Pass) -> Self {
        self.pass = Some(pass);
        self
    }

    /// First accepted match, in operator order, that shares no operator with
    /// `consumed`.
    pub fn find_next(&self, graph: &Graph, consumed: &HashSet<OperatorId>) -> Option<MatchResult> {
        graph
            .operator_ids()
            .iter()
            .find_map(|&anchor| self.accept(graph, anchor, consumed))
    }

    /// Lazily enumerate non-overlapping matches on an unchanging graph.
    pub fn matches<'a>(&'a self, graph: &'a Graph) -> Matches<'a, 'p> {
        Matches {
            matcher: self,
            graph,
            consumed: HashSet::new(),
            cursor: 0,
        }
    }

    fn accept(
        &self,
        graph: &Graph,
        anchor: OperatorId,
        consumed: &HashSet<OperatorId>,
    ) -> Option<MatchResult> {
        let anchor_type = &self.pattern.operator(self.pattern.anchor()).op_type;
        if consumed.contains(&anchor) || graph.operator(anchor).ok()?.op_type() != anchor_type.as_str() {
            return None;
        }

        let result = self.try_anchor(graph, anchor, consumed)?;

        if let Some(pass) = self.pass {
            let ctx = MatchContext {
                graph,
                result: &result,
            };
            if !pass.matches(&ctx) {
                tracing::trace!(pass = pass.name(), "Match rejected by predicate");
                return None;
            }
        }
        Some(result)
    }

    fn try_anchor(
        &self,
        graph: &Graph,
        anchor: OperatorId,
        consumed: &HashSet<OperatorId>,
    ) -> Option<MatchResult> {
        let pattern = self.pattern;
        let body: Vec<usize> = pattern.body_operators().collect();
        let mut state = State::new(graph, pattern, consumed);

        if !state.bind(pattern.anchor(), anchor) {
            return None;
        }

        while body.iter().any(|&index| state.operators[index].is_none()) {
            if let Some((index, producer)) = state.bound_output_step(&body) {
                match producer {
                    Some(target) if state.bind(index, target) => continue,
                    _ => return None,
                }
            }
            if !state.consumer_step(&body) {
                return None;
            }
        }

        state.finish()
    }
}

/// Iterator returned by [`Matcher::matches`].
pub struct Matches<'a, 'p> {
    matcher: &'a Matcher<'p>,
    graph: &'a Graph,
    consumed: HashSet<OperatorId>,
    cursor: usize,
}

impl Iterator for Matches<'_, '_> {
    type Item = MatchResult;

    fn next(&mut self) -> Option<MatchResult> {
        let ids = self.graph.operator_ids();
        while self.cursor < ids.len() {
            let anchor = ids[self.cursor];
            self.cursor += 1;
            if let Some(result) = self.matcher.accept(self.graph, anchor, &self.consumed) {
                self.consumed.extend(result.operators.values().copied());
                return Some(result);
            }
        }
        None
    }
}

// ──────────────────────────── Matching state ────────────────────────────

struct State<'a> {
    graph: &'a Graph,
    pattern: &'a PatternGraph,
    consumed: &'a HashSet<OperatorId>,
    operators: Vec<Option<OperatorId>>,
    operands: Vec<Option<OperandId>>,
    used: HashSet<OperatorId>,
    params: HashMap<String, Parameter>,
    /// (capture key, target operator, attribute name), cloned on success.
    attrs: Vec<(String, OperatorId, String)>,
}

impl<'a> State<'a> {
    fn new(
        graph: &'a Graph,
        pattern: &'a PatternGraph,
        consumed: &'a HashSet<OperatorId>,
    ) -> Self {
        Self {
            graph,
            pattern,
            consumed,
            operators: vec![None; pattern.operators().len()],
            operands: vec![None; pattern.operands().len()],
            used: HashSet::new(),
            params: HashMap::new(),
            attrs: Vec::new(),
        }
    }

    /// Rule 1: an unresolved operator producing an already bound operand.
    fn bound_output_step(&self, body: &[usize]) -> Option<(usize, Option<OperatorId>)> {
        body.iter()
            .filter(|&&index| self.operators[index].is_none())
            .find_map(|&index| {
                self.pattern
                    .operator(index)
                    .outputs
                    .iter()
                    .find_map(|&operand| self.operands[operand])
                    .map(|target| (index, self.graph.producer(target)))
            })
    }

    /// Rule 2: an unresolved consumer of a bound operand. Internal operands
    /// are followed before `pnnx.Input` operands, which fan out more.
    fn consumer_step(&mut self, body: &[usize]) -> bool {
        let pattern = self.pattern;
        let (inputs, internal): (Vec<usize>, Vec<usize>) = (0..pattern.operands().len())
            .filter(|&operand| self.operands[operand].is_some())
            .partition(|&operand| pattern.is_input_operand(operand));

        for operand in internal.into_iter().chain(inputs) {
            let Some(index) = pattern
                .operand(operand)
                .consumers
                .iter()
                .copied()
                .find(|&c| body.contains(&c) && self.operators[c].is_none())
            else {
                continue;
            };
            let Some(target) = self.operands[operand] else {
                continue;
            };

            let mut candidates: Vec<OperatorId> = Vec::new();
            for &consumer in self.graph.consumers(target) {
                if !candidates.contains(&consumer) {
                    candidates.push(consumer);
                }
            }
            return candidates
                .into_iter()
                .any(|candidate| self.bind(index, candidate));
        }
        false
    }

    /// Check pattern operator `index` against `target` and record its
    /// bindings if every local constraint holds.
    fn bind(&mut self, index: usize, target: OperatorId) -> bool {
        if self.consumed.contains(&target) || self.used.contains(&target) {
            return false;
        }
        let (graph, pattern) = (self.graph, self.pattern);
        let Ok(op) = graph.operator(target) else {
            return false;
        };
        let pat = pattern.operator(index);
        if op.op_type() != pat.op_type
            || op.inputs().len() != pat.inputs.len()
            || op.outputs().len() != pat.outputs.len()
        {
            return false;
        }

        let mut operands: Vec<(usize, OperandId)> = Vec::new();
        let slots = pat
            .inputs
            .iter()
            .zip(op.inputs())
            .chain(pat.outputs.iter().zip(op.outputs()));
        for (&pattern_operand, &target_operand) in slots {
            let bound = self.operands[pattern_operand].or_else(|| {
                operands
                    .iter()
                    .find(|(p, _)| *p == pattern_operand)
                    .map(|&(_, t)| t)
            });
            match bound {
                Some(existing) if existing != target_operand => return false,
                Some(_) => {}
                None => operands.push((pattern_operand, target_operand)),
            }
        }

        let mut params: Vec<(String, Parameter)> = Vec::new();
        for (key, expected) in &pat.params {
            let Some(value) = op.param(key) else {
                return false;
            };
            match expected {
                ParamPattern::Literal(literal) => {
                    if value != literal {
                        return false;
                    }
                }
                ParamPattern::Capture(name) => params.push((name.clone(), value.clone())),
                ParamPattern::Any => {}
            }
        }
        if pat.any_params {
            for (key, value) in &op.params {
                if !pat.params.iter().any(|(listed, _)| listed == key) {
                    params.push((format!("{}.{}", pat.name, key), value.clone()));
                }
            }
        } else if op.params.len() != pat.params.len() {
            return false;
        }

        let mut attrs = Vec::new();
        for attr in &pat.attrs {
            let Some(value) = op.attr(&attr.name) else {
                return false;
            };
            if !attr_matches(attr, value, &mut params) {
                return false;
            }
            attrs.push((format!("{}.{}", pat.name, attr.name), target, attr.name.clone()));
        }

        self.operators[index] = Some(target);
        self.used.insert(target);
        for (pattern_operand, target_operand) in operands {
            self.operands[pattern_operand] = Some(target_operand);
        }
        self.params.extend(params);
        self.attrs.extend(attrs);
        true
    }

    /// Whether no path leaves the matched operators and re-enters them.
    ///
    /// Collapsing a region with such a path would make the new operator
    /// depend on its own output.
    fn is_convex(&self) -> bool {
        if self.used.len() < 2 {
            return true;
        }
        let graph = self.graph;
        let downstream = move |id: OperatorId| {
            graph
                .operator(id)
                .map(|op| op.outputs().to_vec())
                .unwrap_or_default()
                .into_iter()
                .flat_map(move |output| graph.consumers(output).iter().copied())
        };

        let mut stack: Vec<OperatorId> = self
            .used
            .iter()
            .flat_map(|&id| downstream(id))
            .filter(|id| !self.used.contains(id))
            .collect();
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            for consumer in downstream(id) {
                if self.used.contains(&consumer) {
                    return false;
                }
                stack.push(consumer);
            }
        }
        true
    }

    /// Region-level checks, then materialize the result.
    fn finish(mut self) -> Option<MatchResult> {
        let pattern = self.pattern;

        for (index, operand) in pattern.operands().iter().enumerate() {
            let target = self.operands[index]?;
            if pattern.is_input_operand(index) {
                // Inputs must come from outside the matched region.
                if let Some(producer) = self.graph.producer(target) {
                    if self.used.contains(&producer) {
                        return None;
                    }
                }
            } else if !pattern.is_exported(index)
                && self.graph.consumers(target).len() != operand.consumers.len()
            {
                // Internal values must not escape the matched region.
                return None;
            }
        }

        if !self.is_convex() {
            return None;
        }

        for op in pattern.operators().iter().filter(|op| op.is_input()) {
            if op.attrs.is_empty() {
                continue;
            }
            let target = self.operands[*op.outputs.first()?]?;
            let producer = self.graph.operator(self.graph.producer(target)?).ok()?;
            for attr in &op.attrs {
                let value = producer.attr(&attr.name)?;
                let mut dims = Vec::new();
                if !attr_matches(attr, value, &mut dims) {
                    return None;
                }
                self.params.extend(dims);
            }
        }

        let mut captured_attrs = HashMap::new();
        for (key, target, name) in &self.attrs {
            let value = self.graph.operator(*target).ok()?.attr(name)?;
            captured_attrs.insert(key.clone(), value.clone());
        }

        let operators = pattern
            .body_operators()
            .filter_map(|index| {
                self.operators[index].map(|id| (pattern.operator(index).name.clone(), id))
            })
            .collect();
        let operands = pattern
            .operands()
            .iter()
            .enumerate()
            .filter_map(|(index, operand)| self.operands[index].map(|id| (operand.name.clone(), id)))
            .collect();

        Some(MatchResult {
            operators,
            operands,
            captures: Captures {
                params: self.params,
                attrs: captured_attrs,
            },
        })
    }
}

/// Check an attribute against `@name=(dims)dtype`, recording dimension
/// captures as integer parameters.
fn attr_matches(pattern: &AttrPattern, value: &Attribute, params: &mut Vec<(String, Parameter)>) -> bool {
    if pattern.dtype.is_some_and(|dtype| dtype != value.dtype) {
        return false;
    }
    let Some(dims) = &pattern.shape else {
        return true;
    };
    if dims.len() != value.shape.len() {
        return false;
    }
    for (dim, &size) in dims.iter().zip(&value.shape) {
        match dim {
            DimPattern::Fixed(expected) => {
                if *expected != size as i64 {
                    return false;
                }
            }
            DimPattern::Capture(name) => params.push((name.clone(), Parameter::Int(size as i64))),
            DimPattern::Any => {}
        }
    }
    true
}
