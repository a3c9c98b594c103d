//! Sweep-to-fixed-point scheduling.

use crate::applier;
use crate::error::{Result, RewriteError};
use crate::matcher::Matcher;
use crate::registry::{PassRegistry, RegisteredPass};
use graft_core::{Graph, OperatorId};
use std::collections::{BTreeMap, HashSet};

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on full sweeps over the registry.
    pub max_sweeps: usize,

    /// Run the full graph invariant check after every rewrite instead of only
    /// after every sweep.
    pub validate_each_rewrite: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_sweeps: 64,
            validate_each_rewrite: true,
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_sweeps == 0 {
            return Err(RewriteError::InvalidConfig(
                "max_sweeps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Summary of one optimization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    /// Sweeps performed, including the final one that changed nothing.
    pub sweeps: usize,

    /// Total rewrites applied.
    pub rewrites: usize,

    /// Rewrites per pass name (passes that never fired are absent).
    pub per_pass: BTreeMap<String, usize>,
}

/// Runs a [`PassRegistry`] over a graph until nothing changes.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Sweep every pass over the graph until a sweep applies no rewrite.
    ///
    /// # Errors
    ///
    /// - the input graph is structurally invalid
    /// - a pass hook fails or leaves the graph invalid
    /// - `max_sweeps` sweeps all applied rewrites
    #[tracing::instrument(skip_all, fields(passes = registry.len(), operators = graph.operator_count()))]
    pub fn run(&self, registry: &PassRegistry, graph: &mut Graph) -> Result<OptimizeReport> {
        graph.validate()?;

        let mut report = OptimizeReport::default();
        for sweep in 1..=self.config.max_sweeps {
            let mut changed = 0;
            let mut last_pass = None;

            for entry in registry.iter() {
                let count = self.run_pass(entry, graph)?;
                if count > 0 {
                    *report.per_pass.entry(entry.name().to_string()).or_default() += count;
                    changed += count;
                    last_pass = Some(entry.name());
                }
            }

            report.sweeps = sweep;
            report.rewrites += changed;

            if let Some(pass) = last_pass {
                graph
                    .validate()
                    .map_err(|e| RewriteError::InternalInvariantViolation {
                        pass: pass.to_string(),
                        operators: Vec::new(),
                        reason: e.to_string(),
                    })?;
            }

            tracing::debug!(sweep, rewrites = changed, "Sweep complete");
            if changed == 0 {
                tracing::info!(
                    sweeps = report.sweeps,
                    rewrites = report.rewrites,
                    "Graph reached a fixed point"
                );
                return Ok(report);
            }
        }

        Err(RewriteError::FixedPointNotReached {
            sweeps: self.config.max_sweeps,
        })
    }

    /// Apply one pass to exhaustion, returning the number of rewrites.
    ///
    /// Operators matched or created by a rewrite are not matched again
    /// within the same call.
    pub fn run_pass(&self, entry: &RegisteredPass, graph: &mut Graph) -> Result<usize> {
        let _span =
            tracing::debug_span!("pass", name = entry.name(), priority = entry.priority()).entered();

        let matcher = Matcher::new(entry.pattern()).with_pass(entry.pass());
        let anchor = &entry.pattern().operator(entry.pattern().anchor()).name;
        let mut consumed: HashSet<OperatorId> = HashSet::new();
        let mut count = 0;

        while let Some(result) = matcher.find_next(graph, &consumed) {
            let matched: Vec<OperatorId> = result.operators.values().copied().collect();
            let operators = result.operator_names(graph);
            let anchor_name = result
                .operators
                .get(anchor)
                .and_then(|&id| graph.operator(id).ok())
                .map(|op| op.name().to_string())
                .unwrap_or_default();

            let created = applier::apply(graph, entry, result)?;
            consumed.extend(matched);
            consumed.extend(created);
            count += 1;

            tracing::debug!(pass = entry.name(), anchor = %anchor_name, "Applied rewrite");

            if self.config.validate_each_rewrite {
                graph
                    .validate()
                    .map_err(|e| RewriteError::InternalInvariantViolation {
                        pass: entry.name().to_string(),
                        operators,
                        reason: e.to_string(),
                    })?;
            }
        }

        Ok(count)
    }
}
