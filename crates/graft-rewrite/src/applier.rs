//! Rewrite application.
//!
//! Two modes, chosen by whether the pass declares a replacement pattern:
//!
//! - **In-place**: the matched operators collapse into one operator of the
//!   pass's `type_str`. A single matched operator keeps its identity, name
//!   and position; several matched operators are replaced by a new operator
//!   named after `name_str`, placed where the last matched operator was.
//!   Either way the operator reads the pattern's inputs and produces its
//!   exported operands, so downstream consumers stay connected.
//! - **Substitution**: the matched operators are removed and the
//!   replacement's operators are instantiated in their place. Replacement
//!   inputs and outputs bind by name to the matched region's operands;
//!   internal replacement operands are created fresh.
//!
//! Pass hooks run before the graph is mutated, so a failing `write` or
//! `write_replacement` leaves the graph exactly as it was. If splicing puts
//! an operator ahead of one of its producers, the graph is re-sorted.

use crate::error::{Result, RewriteError};
use crate::matcher::{Captures, MatchResult};
use crate::pass::ReplacementOps;
use crate::pattern::{ParamPattern, PatternGraph};
use crate::registry::RegisteredPass;
use graft_core::{Graph, OperandId, Operator, OperatorId};
use std::collections::{HashMap, HashSet};

/// Apply one accepted match, returning the operators it created or relabeled.
pub fn apply(graph: &mut Graph, entry: &RegisteredPass, result: MatchResult) -> Result<Vec<OperatorId>> {
    let operators = result.operator_names(graph);
    let violation = |reason: String| RewriteError::InternalInvariantViolation {
        pass: entry.name().to_string(),
        operators: operators.clone(),
        reason,
    };

    let region = Region::new(graph, entry.pattern(), &result).map_err(|e| violation(e.to_string()))?;

    match entry.replacement() {
        None => relabel(graph, entry, region, result.captures, &violation),
        Some(replacement) => substitute(graph, entry, replacement, region, &result, &violation),
    }
}

/// The matched operators and operands, resolved against the graph.
struct Region {
    /// Matched operators in graph order.
    operators: Vec<OperatorId>,
    /// Target operands bound to the pattern's inputs, in pattern order.
    inputs: Vec<OperandId>,
    input_names: Vec<String>,
    /// Target operands bound to the pattern's exported operands.
    outputs: Vec<OperandId>,
    /// Operands produced and consumed only inside the region.
    internal: Vec<OperandId>,
    /// Where the rewritten operators go once the region is removed.
    insert_at: usize,
    operand_by_name: HashMap<String, OperandId>,
}

impl Region {
    fn new(graph: &Graph, pattern: &PatternGraph, result: &MatchResult) -> graft_core::Result<Self> {
        let lookup = |index: usize| {
            let name = &pattern.operand(index).name;
            result.operands.get(name).copied().ok_or_else(|| {
                graft_core::Error::InvalidGraph(format!("pattern operand '{name}' is unbound"))
            })
        };

        let mut operators: Vec<OperatorId> = result.operators.values().copied().collect();
        let mut positions = HashMap::new();
        for &id in &operators {
            let position = graph.position(id).ok_or_else(|| {
                graft_core::Error::InvalidGraph(format!("operator {id:?} is not in the graph"))
            })?;
            positions.insert(id, position);
        }
        operators.sort_by_key(|id| positions[id]);
        let last = operators.last().map_or(0, |id| positions[id]);
        let insert_at = last + 1 - operators.len();

        let input_indices = pattern.input_operands();
        let output_indices = pattern.output_operands();
        let inputs = input_indices
            .iter()
            .map(|&i| lookup(i))
            .collect::<graft_core::Result<Vec<_>>>()?;
        let input_names = input_indices
            .iter()
            .map(|&i| pattern.operand(i).name.clone())
            .collect();
        let outputs = output_indices
            .iter()
            .map(|&i| lookup(i))
            .collect::<graft_core::Result<Vec<_>>>()?;
        let internal = (0..pattern.operands().len())
            .filter(|&i| !pattern.is_input_operand(i) && !pattern.is_exported(i))
            .map(lookup)
            .collect::<graft_core::Result<Vec<_>>>()?;

        Ok(Self {
            operators,
            inputs,
            input_names,
            outputs,
            internal,
            insert_at,
            operand_by_name: result.operands.clone(),
        })
    }

    /// Detach the region from the graph, keeping its boundary operands.
    fn remove(&self, graph: &mut Graph) -> graft_core::Result<()> {
        for &id in &self.operators {
            graph.remove_operator(id)?;
        }
        for &operand in &self.internal {
            graph.remove_operand(operand)?;
        }
        Ok(())
    }
}

fn relabel(
    graph: &mut Graph,
    entry: &RegisteredPass,
    region: Region,
    captures: Captures,
    violation: &dyn Fn(String) -> RewriteError,
) -> Result<Vec<OperatorId>> {
    let pass = entry.pass();
    let failed = |source| RewriteError::PassFailed {
        pass: entry.name().to_string(),
        source,
    };

    if let [id] = region.operators[..] {
        let name = graph
            .operator(id)
            .map_err(|e| violation(e.to_string()))?
            .name()
            .to_string();
        let mut op = build_operator(pass.type_str(), name, &region);
        pass.write(&mut op, captures).map_err(failed)?;
        graph
            .replace_operator(id, op)
            .map_err(|e| violation(e.to_string()))?;
        for &operand in &region.internal {
            graph
                .remove_operand(operand)
                .map_err(|e| violation(e.to_string()))?;
        }
        return Ok(vec![id]);
    }

    // The graph is untouched until `write` has succeeded.
    let name = fresh_operator_name(graph, &region, &HashSet::new(), pass.name_str());
    let mut op = build_operator(pass.type_str(), name, &region);
    pass.write(&mut op, captures).map_err(failed)?;

    region.remove(graph).map_err(|e| violation(e.to_string()))?;
    let id = graph
        .insert_operator_at(region.insert_at, op)
        .map_err(|e| violation(e.to_string()))?;
    restore_order(graph, violation)?;
    Ok(vec![id])
}

fn build_operator(op_type: &str, name: String, region: &Region) -> Operator {
    let mut op = Operator::new(op_type, name);
    for &input in &region.inputs {
        op.add_input(input);
    }
    for &output in &region.outputs {
        op.add_output(output);
    }
    op.input_names = region.input_names.clone();
    op
}

/// How a replacement operand maps onto the graph.
enum Binding {
    /// A pattern input or exported operand of the matched region.
    Bound(OperandId),
    /// An internal replacement operand, created under this name.
    Fresh(String),
}

fn substitute(
    graph: &mut Graph,
    entry: &RegisteredPass,
    replacement: &PatternGraph,
    region: Region,
    result: &MatchResult,
    violation: &dyn Fn(String) -> RewriteError,
) -> Result<Vec<OperatorId>> {
    let captures = &result.captures;

    // Everything that can fail on the pass's side happens before the graph
    // is touched: operand binding, instantiation, the replacement hook and
    // `$` references. Operands are wired in afterwards.
    let mut reserved_operands = HashSet::new();
    let mut bindings = Vec::with_capacity(replacement.operands().len());
    for (index, operand) in replacement.operands().iter().enumerate() {
        let binding = if replacement.is_input_operand(index) || replacement.is_exported(index) {
            Binding::Bound(*region.operand_by_name.get(&operand.name).ok_or_else(|| {
                violation(format!("replacement operand '{}' has no match", operand.name))
            })?)
        } else {
            let name = fresh_operand_name(graph, &region, &reserved_operands, &operand.name);
            reserved_operands.insert(name.clone());
            Binding::Fresh(name)
        };
        bindings.push(binding);
    }

    let mut reserved = HashSet::new();
    let mut instances = Vec::new();
    for index in replacement.body_operators() {
        let pat = replacement.operator(index);
        let name = fresh_operator_name(graph, &region, &reserved, &pat.name);
        reserved.insert(name.clone());

        let mut op = Operator::new(pat.op_type.clone(), name);
        for &input in &pat.inputs {
            op.input_names.push(replacement.operand(input).name.clone());
        }
        for (key, value) in &pat.params {
            let value = match value {
                ParamPattern::Literal(literal) => literal.clone(),
                ParamPattern::Capture(capture) => captures
                    .param(capture)
                    .cloned()
                    .ok_or_else(|| violation(format!("capture '%{capture}' was not recorded")))?,
                ParamPattern::Any => {
                    return Err(violation(format!("wildcard parameter '{key}' in replacement")));
                }
            };
            op.params.insert(key.clone(), value);
        }
        for attr in &pat.attrs {
            if let Some(value) = captures.attr(&format!("{}.{}", pat.name, attr.name)) {
                op.attrs.insert(attr.name.clone(), value.clone());
            }
        }
        instances.push((pat.name.clone(), op));
    }

    let mut ops = ReplacementOps::new(instances);
    entry
        .pass()
        .write_replacement(&mut ops, captures)
        .map_err(|source| RewriteError::PassFailed {
            pass: entry.name().to_string(),
            source,
        })?;
    let mut instances = ops.into_inner();

    // `$attr=operand` copies the data of the constant producing `operand`.
    for index in replacement.body_operators() {
        let pat = replacement.operator(index);
        for reference in &pat.attr_refs {
            let source = replacement
                .operand_index(&reference.operand)
                .map(|operand| replacement.operator(replacement.operand(operand).producer).name.clone())
                .ok_or_else(|| violation(format!("unknown operand '{}'", reference.operand)))?;
            let data = instances
                .iter()
                .find(|(name, _)| *name == source)
                .and_then(|(_, op)| op.attr("data").cloned())
                .ok_or_else(|| {
                    violation(format!("operator '{source}' carries no data for '${}'", reference.attr))
                })?;
            if let Some((_, op)) = instances.iter_mut().find(|(name, _)| *name == pat.name) {
                op.attrs.insert(reference.attr.clone(), data);
            }
        }
    }

    region.remove(graph).map_err(|e| violation(e.to_string()))?;

    let mut operands = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let id = match binding {
            Binding::Bound(id) => id,
            Binding::Fresh(name) => graph.add_operand(name).map_err(|e| violation(e.to_string()))?,
        };
        operands.push(id);
    }

    let mut created = Vec::with_capacity(instances.len());
    for (offset, (index, (_, mut op))) in replacement.body_operators().zip(instances).enumerate() {
        let pat = replacement.operator(index);
        for &input in &pat.inputs {
            op.add_input(operands[input]);
        }
        for &output in &pat.outputs {
            op.add_output(operands[output]);
        }
        let id = graph
            .insert_operator_at(region.insert_at + offset, op)
            .map_err(|e| violation(e.to_string()))?;
        created.push(id);
    }
    restore_order(graph, violation)?;
    Ok(created)
}

/// Re-sort the graph if spliced operators landed ahead of a producer or
/// behind a consumer.
///
/// The new operators sit where the last matched operator was. An exported
/// operand may have an outside consumer placed between the matched operators,
/// which then comes before its new producer.
fn restore_order(graph: &mut Graph, violation: &dyn Fn(String) -> RewriteError) -> Result<()> {
    if graph.is_topologically_ordered() {
        return Ok(());
    }
    tracing::trace!("Reordering operators after splice");
    graph
        .sort_topologically()
        .map_err(|e| violation(e.to_string()))
}

/// First free name from `base`, `base_1`, ... once the region is gone.
fn free_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn fresh_operator_name(graph: &Graph, region: &Region, reserved: &HashSet<String>, base: &str) -> String {
    free_name(base, |name| {
        reserved.contains(name)
            || graph
                .operator_by_name(name)
                .is_some_and(|id| !region.operators.contains(&id))
    })
}

fn fresh_operand_name(graph: &Graph, region: &Region, reserved: &HashSet<String>, base: &str) -> String {
    free_name(base, |name| {
        reserved.contains(name)
            || graph
                .operand_by_name(name)
                .is_some_and(|id| !region.internal.contains(&id))
    })
}
