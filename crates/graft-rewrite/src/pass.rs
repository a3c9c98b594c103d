//! Rewrite pass trait.

use crate::matcher::{Captures, MatchContext};
use graft_core::{Error, Operator};

/// Trait for implementing rewrite passes.
///
/// A pass is data first: a match pattern in pnnx text form and, for
/// substitution passes, a replacement pattern. The hooks refine what the
/// pattern alone cannot express.
///
/// - [`Pass::matches`] gives final acceptance of a structural match (numeric
///   tolerances, cross-capture consistency). Rejection is not an error.
/// - Without a replacement pattern the matched operators are relabeled to a
///   single operator of type [`Pass::type_str`], which [`Pass::write`] fills.
/// - With a replacement pattern the matched operators are swapped for fresh
///   instances of the replacement, which [`Pass::write_replacement`] may edit.
///
/// # Example
///
/// ```ignore
/// struct FRelu;
///
/// impl Pass for FRelu {
///     fn name(&self) -> &str {
///         "F_relu"
///     }
///
///     fn match_pattern_graph(&self) -> &str {
///         "7767517\n3 2\npnnx.Input input 0 1 input\naten::relu op_0 1 1 input out\npnnx.Output output 1 0 out\n"
///     }
///
///     fn type_str(&self) -> &str {
///         "F.relu"
///     }
/// }
/// ```
pub trait Pass: Send + Sync {
    /// Get the pass name (used for logging, reports and errors).
    fn name(&self) -> &str;

    /// Pattern text describing the subgraph to find.
    fn match_pattern_graph(&self) -> &str;

    /// Pattern text of the subgraph to splice in, if this is a substitution
    /// pass.
    fn replace_pattern_graph(&self) -> Option<&str> {
        None
    }

    /// Type tag of the operator this pass produces.
    fn type_str(&self) -> &str;

    /// Base name of operators synthesized from several matched operators.
    fn name_str(&self) -> &str {
        self.type_str()
    }

    /// Final acceptance of a structural match.
    fn matches(&self, _ctx: &MatchContext<'_>) -> bool {
        true
    }

    /// Fill the relabeled operator.
    ///
    /// The default copies every captured parameter under its capture name and
    /// every captured attribute under its attribute name.
    fn write(&self, op: &mut Operator, captures: Captures) -> graft_core::Result<()> {
        op.params.extend(captures.params);
        for (key, value) in captures.attrs {
            let name = key.split_once('.').map_or(key.as_str(), |(_, attr)| attr);
            op.attrs.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Edit the instantiated replacement operators before they are inserted.
    ///
    /// The operators carry their parameters and attributes but are not wired
    /// to operands yet; that happens once the hook has succeeded.
    fn write_replacement(
        &self,
        _ops: &mut ReplacementOps,
        _captures: &Captures,
    ) -> graft_core::Result<()> {
        Ok(())
    }
}

/// Replacement operators, keyed by their name in the replacement pattern.
#[derive(Debug, Default)]
pub struct ReplacementOps {
    operators: Vec<(String, Operator)>,
}

impl ReplacementOps {
    pub(crate) fn new(operators: Vec<(String, Operator)>) -> Self {
        Self { operators }
    }

    pub(crate) fn into_inner(self) -> Vec<(String, Operator)> {
        self.operators
    }

    pub fn get(&self, pattern_name: &str) -> graft_core::Result<&Operator> {
        self.operators
            .iter()
            .find(|(name, _)| name == pattern_name)
            .map(|(_, op)| op)
            .ok_or_else(|| missing(pattern_name))
    }

    pub fn get_mut(&mut self, pattern_name: &str) -> graft_core::Result<&mut Operator> {
        self.operators
            .iter_mut()
            .find(|(name, _)| name == pattern_name)
            .map(|(_, op)| op)
            .ok_or_else(|| missing(pattern_name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Operator)> {
        self.operators.iter().map(|(name, op)| (name.as_str(), op))
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

fn missing(pattern_name: &str) -> Error {
    Error::InvalidGraph(format!("replacement has no operator '{pattern_name}'"))
}
