//! Priority-ordered pass registry.

use crate::error::{Result, RewriteError};
use crate::pass::Pass;
use crate::pattern::{PatternError, PatternGraph};
use std::collections::BTreeSet;

/// A pass with its compiled patterns.
pub struct RegisteredPass {
    priority: i32,
    sequence: usize,
    pass: Box<dyn Pass>,
    pattern: PatternGraph,
    replacement: Option<PatternGraph>,
}

impl RegisteredPass {
    pub fn name(&self) -> &str {
        self.pass.name()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Registration order, breaking priority ties.
    pub fn sequence(&self) -> usize {
        self.sequence
    }

    pub fn pass(&self) -> &dyn Pass {
        self.pass.as_ref()
    }

    pub fn pattern(&self) -> &PatternGraph {
        &self.pattern
    }

    pub fn replacement(&self) -> Option<&PatternGraph> {
        self.replacement.as_ref()
    }
}

/// Registry of rewrite passes.
///
/// Passes are kept sorted by descending priority; passes of equal priority
/// run in registration order. Patterns are compiled when a pass is
/// registered, so a malformed pattern is reported before any graph is
/// touched.
///
/// # Example
///
/// ```ignore
/// let mut registry = PassRegistry::new();
/// registry
///     .register(111, FLinear)?
///     .register(110, FLinear1)?;
/// ```
pub struct PassRegistry {
    passes: Vec<RegisteredPass>,
    next_sequence: usize,
}

impl PassRegistry {
    /// Create a new empty pass registry.
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            next_sequence: 0,
        }
    }

    /// Compile and register a pass.
    ///
    /// Returns `self` for method chaining.
    pub fn register<P>(&mut self, priority: i32, pass: P) -> Result<&mut Self>
    where
        P: Pass + 'static,
    {
        let name = pass.name().to_string();
        if self.get(&name).is_some() {
            return Err(graft_core::Error::DuplicateName(format!("pass '{name}'")).into());
        }

        let malformed = |e: PatternError| RewriteError::MalformedPattern {
            pass: name.clone(),
            line: e.line,
            reason: e.reason,
        };
        let pattern = PatternGraph::parse(pass.match_pattern_graph()).map_err(malformed)?;
        if let Some(op) = pattern.operators().iter().find(|op| !op.attr_refs.is_empty()) {
            return Err(malformed(PatternError {
                line: op.line,
                reason: "'$' attribute references are only allowed in replacements".to_string(),
            }));
        }

        let replacement = match pass.replace_pattern_graph() {
            Some(text) => {
                let replacement = PatternGraph::parse(text).map_err(&malformed)?;
                check_replacement(&pattern, &replacement).map_err(&malformed)?;
                Some(replacement)
            }
            None => None,
        };

        let entry = RegisteredPass {
            priority,
            sequence: self.next_sequence,
            pass: Box::new(pass),
            pattern,
            replacement,
        };
        self.next_sequence += 1;

        tracing::debug!(
            pass = %name,
            priority,
            substitution = entry.replacement.is_some(),
            "Registered pass"
        );

        let index = self.passes.partition_point(|p| p.priority >= priority);
        self.passes.insert(index, entry);
        Ok(self)
    }

    /// Look up a pass by name.
    pub fn get(&self, name: &str) -> Option<&RegisteredPass> {
        self.passes.iter().find(|p| p.name() == name)
    }

    /// Iterate over passes in scheduling order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredPass> {
        self.passes.iter()
    }

    /// Passes producing the given canonical type, in scheduling order.
    pub fn passes_for<'a>(&'a self, type_str: &'a str) -> impl Iterator<Item = &'a RegisteredPass> {
        self.passes
            .iter()
            .filter(move |p| p.pass.type_str() == type_str)
    }

    /// Pass names in scheduling order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().map(|p| p.name())
    }

    /// Get the number of registered passes.
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl Default for PassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A replacement must read only matched inputs, export exactly what the
/// match exports, use only captures the match records, and be fully
/// concrete.
fn check_replacement(
    pattern: &PatternGraph,
    replacement: &PatternGraph,
) -> std::result::Result<(), PatternError> {
    let names = |graph: &PatternGraph, operands: Vec<usize>| -> BTreeSet<String> {
        operands
            .into_iter()
            .map(|i| graph.operand(i).name.clone())
            .collect()
    };
    let error = |reason: String| PatternError { line: 0, reason };

    let match_inputs = names(pattern, pattern.input_operands());
    for input in names(replacement, replacement.input_operands()) {
        if !match_inputs.contains(&input) {
            return Err(error(format!(
                "replacement input '{input}' is not an input of the match pattern"
            )));
        }
    }

    let match_outputs = names(pattern, pattern.output_operands());
    let replacement_outputs = names(replacement, replacement.output_operands());
    if match_outputs != replacement_outputs {
        return Err(error(format!(
            "replacement exports {replacement_outputs:?} but the match exports {match_outputs:?}"
        )));
    }

    let captures = pattern.capture_names();
    if let Some(unknown) = replacement
        .capture_names()
        .into_iter()
        .find(|name| !captures.contains(name))
    {
        return Err(error(format!(
            "replacement uses capture '%{unknown}' which the match never binds"
        )));
    }

    if replacement.has_wildcards() {
        return Err(error(
            "replacement patterns cannot contain wildcards".to_string(),
        ));
    }

    for op in replacement.operators() {
        if let Some(reference) = op
            .attr_refs
            .iter()
            .find(|r| replacement.operand_index(&r.operand).is_none())
        {
            return Err(PatternError {
                line: op.line,
                reason: format!("attribute reference to unknown operand '{}'", reference.operand),
            });
        }
    }

    Ok(())
}
