//! Pattern graph compiler.
//!
//! Patterns are written in the line-oriented pnnx text form:
//!
//! ```text
//! 7767517
//! 4 3
//! pnnx.Input              input       0 1 input
//! nn.Linear               op_0        1 1 input a bias=%bias @weight
//! nn.BatchNorm1d          op_1        1 1 a out eps=%eps
//! pnnx.Output             output      1 0 out
//! ```
//!
//! The first line is the format magic, the second holds the operator and
//! operand counts, and every following line declares one operator: type,
//! name, input arity, output arity, operand names, then `key=value` tokens.

use graft_core::{DataType, INPUT_OP, OUTPUT_OP, Parameter};
use std::collections::{BTreeSet, HashMap, VecDeque};
use thiserror::Error;

/// First line of every pattern description.
pub const PATTERN_MAGIC: &str = "7767517";

/// A pattern that could not be compiled.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}: {reason}")]
pub struct PatternError {
    /// 1-based line in the pattern text (0 when no line applies).
    pub line: usize,
    pub reason: String,
}

impl PatternError {
    fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// Constraint on a single parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamPattern {
    /// `key=literal`: the target value must be exactly equal.
    Literal(Parameter),
    /// `key=%name`: any value, recorded under `name`.
    Capture(String),
    /// `key=*`: any value, not recorded.
    Any,
}

/// Constraint on one dimension of an attribute shape.
#[derive(Debug, Clone, PartialEq)]
pub enum DimPattern {
    Fixed(i64),
    Capture(String),
    Any,
}

/// `@name` or `@name=(dims)dtype`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrPattern {
    pub name: String,
    pub shape: Option<Vec<DimPattern>>,
    pub dtype: Option<DataType>,
}

/// `$attr=operand` in a replacement pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrRef {
    pub attr: String,
    pub operand: String,
}

/// One operator line of a pattern.
#[derive(Debug, Clone)]
pub struct PatternOperator {
    pub op_type: String,
    pub name: String,
    /// Operand indices into [`PatternGraph::operands`].
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    pub params: Vec<(String, ParamPattern)>,
    pub attrs: Vec<AttrPattern>,
    pub attr_refs: Vec<AttrRef>,
    /// Whether `%*=%*` appeared.
    pub any_params: bool,
    /// Line the operator was declared on.
    pub line: usize,
}

impl PatternOperator {
    pub fn is_input(&self) -> bool {
        self.op_type == INPUT_OP
    }

    pub fn is_output(&self) -> bool {
        self.op_type == OUTPUT_OP
    }

    pub fn is_boundary(&self) -> bool {
        self.is_input() || self.is_output()
    }
}

/// A named operand of a pattern.
#[derive(Debug, Clone)]
pub struct PatternOperand {
    pub name: String,
    /// Index of the producing pattern operator.
    pub producer: usize,
    /// Indices of consuming pattern operators, one per input slot.
    pub consumers: Vec<usize>,
}

/// A compiled, immutable pattern.
#[derive(Debug, Clone)]
pub struct PatternGraph {
    operators: Vec<PatternOperator>,
    operands: Vec<PatternOperand>,
    operand_index: HashMap<String, usize>,
}

impl PatternGraph {
    /// Compile a pattern description.
    pub fn parse(text: &str) -> Result<Self, PatternError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let (magic_line, magic) = lines
            .next()
            .ok_or_else(|| PatternError::new(0, "empty pattern"))?;
        if magic != PATTERN_MAGIC {
            return Err(PatternError::new(
                magic_line,
                format!("expected magic '{PATTERN_MAGIC}', found '{magic}'"),
            ));
        }

        let (count_line, counts) = lines
            .next()
            .ok_or_else(|| PatternError::new(magic_line, "missing count line"))?;
        let counts: Vec<&str> = counts.split_whitespace().collect();
        let [operator_count, operand_count] = counts.as_slice() else {
            return Err(PatternError::new(
                count_line,
                "count line must hold an operator count and an operand count",
            ));
        };
        let operator_count: usize = operator_count
            .parse()
            .map_err(|_| PatternError::new(count_line, "operator count is not an integer"))?;
        let operand_count: usize = operand_count
            .parse()
            .map_err(|_| PatternError::new(count_line, "operand count is not an integer"))?;

        let mut pattern = PatternGraph {
            operators: Vec::new(),
            operands: Vec::new(),
            operand_index: HashMap::new(),
        };
        for (line_no, line) in lines {
            pattern.parse_operator(line_no, line)?;
        }

        if pattern.operators.len() != operator_count {
            return Err(PatternError::new(
                count_line,
                format!(
                    "declared {} operators but found {}",
                    operator_count,
                    pattern.operators.len()
                ),
            ));
        }
        if pattern.operands.len() != operand_count {
            tracing::warn!(
                declared = operand_count,
                found = pattern.operands.len(),
                "Pattern operand count disagrees with its operator lines"
            );
        }

        pattern.check_structure()?;
        Ok(pattern)
    }

    fn parse_operator(&mut self, line_no: usize, line: &str) -> Result<(), PatternError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(PatternError::new(
                line_no,
                "operator line needs a type, a name and two arities",
            ));
        }
        let op_type = fields[0].to_string();
        let name = fields[1].to_string();
        let arity = |field: &str, what: &str| {
            field.parse::<usize>().map_err(|_| {
                PatternError::new(line_no, format!("{what} arity '{field}' is not an integer"))
            })
        };
        let input_count = arity(fields[2], "input")?;
        let output_count = arity(fields[3], "output")?;

        if fields.len() < 4 + input_count + output_count {
            return Err(PatternError::new(
                line_no,
                format!("operator '{name}' lists fewer operands than its arities declare"),
            ));
        }
        if self.operators.iter().any(|op| op.name == name) {
            return Err(PatternError::new(
                line_no,
                format!("duplicate operator name '{name}'"),
            ));
        }

        let index = self.operators.len();
        let input_names = &fields[4..4 + input_count];
        let output_names = &fields[4 + input_count..4 + input_count + output_count];
        let tokens = &fields[4 + input_count + output_count..];

        let mut inputs = Vec::with_capacity(input_count);
        for &operand in input_names {
            let id = *self.operand_index.get(operand).ok_or_else(|| {
                PatternError::new(
                    line_no,
                    format!("operand '{operand}' is used before any operator produces it"),
                )
            })?;
            self.operands[id].consumers.push(index);
            inputs.push(id);
        }

        let mut outputs = Vec::with_capacity(output_count);
        for &operand in output_names {
            if self.operand_index.contains_key(operand) {
                return Err(PatternError::new(
                    line_no,
                    format!("duplicate operand name '{operand}'"),
                ));
            }
            let id = self.operands.len();
            self.operand_index.insert(operand.to_string(), id);
            self.operands.push(PatternOperand {
                name: operand.to_string(),
                producer: index,
                consumers: Vec::new(),
            });
            outputs.push(id);
        }

        let mut op = PatternOperator {
            op_type,
            name,
            inputs,
            outputs,
            params: Vec::new(),
            attrs: Vec::new(),
            attr_refs: Vec::new(),
            any_params: false,
            line: line_no,
        };
        for token in tokens {
            parse_token(&mut op, token, line_no)?;
        }

        match op.op_type.as_str() {
            INPUT_OP => {
                if !op.inputs.is_empty() || op.outputs.len() != 1 {
                    return Err(PatternError::new(
                        line_no,
                        "pnnx.Input must have no inputs and one output",
                    ));
                }
                if !op.params.is_empty() || op.any_params || !op.attr_refs.is_empty() {
                    return Err(PatternError::new(
                        line_no,
                        "pnnx.Input may only carry attribute constraints",
                    ));
                }
            }
            OUTPUT_OP => {
                if op.inputs.is_empty() || !op.outputs.is_empty() {
                    return Err(PatternError::new(
                        line_no,
                        "pnnx.Output must have inputs and no outputs",
                    ));
                }
                if !op.params.is_empty()
                    || op.any_params
                    || !op.attrs.is_empty()
                    || !op.attr_refs.is_empty()
                {
                    return Err(PatternError::new(
                        line_no,
                        "pnnx.Output cannot carry parameters",
                    ));
                }
            }
            _ => {}
        }

        self.operators.push(op);
        Ok(())
    }

    fn check_structure(&self) -> Result<(), PatternError> {
        let body: Vec<usize> = self.body_operators().collect();
        let Some(&anchor) = body.first() else {
            return Err(PatternError::new(
                0,
                "pattern has no operators besides graph boundaries",
            ));
        };

        for operand in &self.operands {
            let producer = &self.operators[operand.producer];
            if producer.is_input()
                && !operand
                    .consumers
                    .iter()
                    .any(|&c| !self.operators[c].is_boundary())
            {
                return Err(PatternError::new(
                    producer.line,
                    format!("input operand '{}' is not consumed by any operator", operand.name),
                ));
            }
        }

        // Every body operator must be reachable from the anchor through
        // shared operands.
        let mut seen = vec![false; self.operators.len()];
        let mut queue = VecDeque::from([anchor]);
        seen[anchor] = true;
        while let Some(index) = queue.pop_front() {
            let op = &self.operators[index];
            for &operand in op.inputs.iter().chain(&op.outputs) {
                let operand = &self.operands[operand];
                for &next in operand.consumers.iter().chain([&operand.producer]) {
                    if !seen[next] && !self.operators[next].is_boundary() {
                        seen[next] = true;
                        queue.push_back(next);
                    }
                }
            }
        }
        if let Some(&unreached) = body.iter().find(|&&i| !seen[i]) {
            let op = &self.operators[unreached];
            return Err(PatternError::new(
                op.line,
                format!("operator '{}' is not connected to the rest of the pattern", op.name),
            ));
        }

        Ok(())
    }

    // ── Queries ──

    pub fn operators(&self) -> &[PatternOperator] {
        &self.operators
    }

    pub fn operands(&self) -> &[PatternOperand] {
        &self.operands
    }

    pub fn operator(&self, index: usize) -> &PatternOperator {
        &self.operators[index]
    }

    pub fn operand(&self, index: usize) -> &PatternOperand {
        &self.operands[index]
    }

    pub fn operand_index(&self, name: &str) -> Option<usize> {
        self.operand_index.get(name).copied()
    }

    pub fn operator_index(&self, name: &str) -> Option<usize> {
        self.operators.iter().position(|op| op.name == name)
    }

    /// Indices of the non-boundary operators, in declaration order.
    pub fn body_operators(&self) -> impl Iterator<Item = usize> + '_ {
        self.operators
            .iter()
            .enumerate()
            .filter(|(_, op)| !op.is_boundary())
            .map(|(i, _)| i)
    }

    pub fn body_len(&self) -> usize {
        self.body_operators().count()
    }

    /// The first non-boundary operator; matching anchors on its type.
    pub fn anchor(&self) -> usize {
        self.body_operators().next().unwrap_or(0)
    }

    /// Operands introduced by `pnnx.Input`, in declaration order.
    pub fn input_operands(&self) -> Vec<usize> {
        self.operators
            .iter()
            .filter(|op| op.is_input())
            .flat_map(|op| op.outputs.iter().copied())
            .collect()
    }

    /// Operands consumed by `pnnx.Output`, in declaration order.
    pub fn output_operands(&self) -> Vec<usize> {
        self.operators
            .iter()
            .filter(|op| op.is_output())
            .flat_map(|op| op.inputs.iter().copied())
            .collect()
    }

    /// Whether the operand is introduced by a `pnnx.Input`.
    pub fn is_input_operand(&self, index: usize) -> bool {
        self.operators[self.operands[index].producer].is_input()
    }

    /// Whether the operand leaves the pattern through a `pnnx.Output`.
    pub fn is_exported(&self, index: usize) -> bool {
        self.operands[index]
            .consumers
            .iter()
            .any(|&c| self.operators[c].is_output())
    }

    /// Consumers of an operand that are not `pnnx.Output` markers.
    pub fn internal_consumer_count(&self, index: usize) -> usize {
        self.operands[index]
            .consumers
            .iter()
            .filter(|&&c| !self.operators[c].is_output())
            .count()
    }

    /// Every capture name the pattern binds (parameters and dimensions).
    pub fn capture_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        for op in &self.operators {
            for (_, param) in &op.params {
                if let ParamPattern::Capture(name) = param {
                    names.insert(name.as_str());
                }
            }
            for attr in &op.attrs {
                for dim in attr.shape.iter().flatten() {
                    if let DimPattern::Capture(name) = dim {
                        names.insert(name.as_str());
                    }
                }
            }
        }
        names
    }

    /// Whether any operator uses `*`, `%*=%*` or an attribute shape wildcard,
    /// none of which can be instantiated.
    pub fn has_wildcards(&self) -> bool {
        self.operators.iter().any(|op| {
            op.any_params
                || op.params.iter().any(|(_, p)| *p == ParamPattern::Any)
                || op
                    .attrs
                    .iter()
                    .any(|a| a.shape.iter().flatten().any(|d| *d == DimPattern::Any))
        })
    }
}

fn parse_token(op: &mut PatternOperator, token: &str, line: usize) -> Result<(), PatternError> {
    if token == "%*=%*" {
        op.any_params = true;
        return Ok(());
    }

    if let Some(rest) = token.strip_prefix('@') {
        let (name, constraint) = match rest.split_once('=') {
            Some((name, constraint)) => (name, Some(constraint)),
            None => (rest, None),
        };
        if name.is_empty() {
            return Err(PatternError::new(line, format!("empty attribute name in '{token}'")));
        }
        let (shape, dtype) = match constraint {
            Some(constraint) => parse_attr_constraint(constraint, line)?,
            None => (None, None),
        };
        op.attrs.push(AttrPattern {
            name: name.to_string(),
            shape,
            dtype,
        });
        return Ok(());
    }

    if let Some(rest) = token.strip_prefix('$') {
        let Some((attr, operand)) = rest.split_once('=') else {
            return Err(PatternError::new(
                line,
                format!("attribute reference '{token}' needs an operand"),
            ));
        };
        op.attr_refs.push(AttrRef {
            attr: attr.to_string(),
            operand: operand.to_string(),
        });
        return Ok(());
    }

    let Some((key, value)) = token.split_once('=') else {
        return Err(PatternError::new(line, format!("unknown token '{token}'")));
    };
    if key.is_empty() || key.starts_with('%') {
        return Err(PatternError::new(line, format!("invalid parameter key in '{token}'")));
    }
    if op.params.iter().any(|(existing, _)| existing == key) {
        return Err(PatternError::new(
            line,
            format!("parameter '{key}' listed twice on '{}'", op.name),
        ));
    }

    let value = if value == "*" {
        ParamPattern::Any
    } else if let Some(capture) = value.strip_prefix('%') {
        if capture.is_empty() || capture == "*" {
            return Err(PatternError::new(line, format!("invalid capture in '{token}'")));
        }
        ParamPattern::Capture(capture.to_string())
    } else {
        ParamPattern::Literal(Parameter::parse(value))
    };
    op.params.push((key.to_string(), value));
    Ok(())
}

/// Parse `(d0,d1,...)dtype`; the dtype suffix is optional.
fn parse_attr_constraint(
    text: &str,
    line: usize,
) -> Result<(Option<Vec<DimPattern>>, Option<DataType>), PatternError> {
    let Some(rest) = text.strip_prefix('(') else {
        return Err(PatternError::new(
            line,
            format!("attribute constraint '{text}' must start with '('"),
        ));
    };
    let Some((dims, suffix)) = rest.split_once(')') else {
        return Err(PatternError::new(
            line,
            format!("attribute constraint '{text}' is missing ')'"),
        ));
    };

    let dims = dims
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| match dim {
            "*" | "?" => Ok(DimPattern::Any),
            _ => {
                if let Some(capture) = dim.strip_prefix('%') {
                    Ok(DimPattern::Capture(capture.to_string()))
                } else {
                    dim.parse::<i64>().map(DimPattern::Fixed).map_err(|_| {
                        PatternError::new(line, format!("invalid dimension '{dim}'"))
                    })
                }
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let dtype = if suffix.is_empty() {
        None
    } else {
        Some(
            suffix
                .parse::<DataType>()
                .map_err(|e| PatternError::new(line, e.to_string()))?,
        )
    };

    Ok((Some(dims), dtype))
}
