//! Pattern-driven graph rewriting for graft.
//!
//! The engine is organized as:
//! 1. **Pattern compiler** (`pattern`) - parse pnnx pattern text into a `PatternGraph`
//! 2. **Matcher** (`matcher`) - find non-overlapping occurrences of a pattern
//! 3. **Registry** (`registry`) - passes sorted by descending priority
//! 4. **Applier** (`applier`) - relabel or substitute a matched region
//! 5. **Scheduler** (`scheduler`) - sweep all passes until a fixed point
//!
//! # Example
//!
//! ```ignore
//! use graft_rewrite::{PassRegistry, optimize};
//!
//! let mut registry = PassRegistry::new();
//! registry.register(111, FLinear)?;
//!
//! let report = optimize(&registry, &mut graph)?;
//! println!("{} rewrites in {} sweeps", report.rewrites, report.sweeps);
//! ```

pub mod applier;
pub mod error;
pub mod matcher;
pub mod pass;
pub mod pattern;
pub mod registry;
pub mod scheduler;

pub use error::{Result, RewriteError};
pub use matcher::{Captures, MatchContext, MatchResult, Matcher};
pub use pass::{Pass, ReplacementOps};
pub use pattern::{PATTERN_MAGIC, PatternError, PatternGraph};
pub use registry::{PassRegistry, RegisteredPass};
pub use scheduler::{OptimizeReport, Scheduler, SchedulerConfig};

use graft_core::Graph;

/// Run every registered pass over `graph` to a fixed point with the default
/// scheduler configuration.
pub fn optimize(registry: &PassRegistry, graph: &mut Graph) -> Result<OptimizeReport> {
    Scheduler::new().run(registry, graph)
}
