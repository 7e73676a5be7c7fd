// This file is part of the marginal exact-enumeration engine.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Frontier-driven search over the discrete choice tree.
//!
//! The `Enumerator` drives a backtracking loop: pop a trace prefix, run the
//! program against it through the replay interceptor, and either yield the
//! completed trace with its discrete probability mass or expand the abort
//! site into one child prefix per support value. LIFO pop order makes the
//! search depth-first; every reachable leaf of the choice tree is yielded
//! exactly once.

use crate::mass::trace_weight;
use crate::recorder::{BranchPoint, ModelError, Recorder};
use crate::replay::{self, Outcome};
use crate::tensor::{Tensor, TensorError};
use crate::trace::{ChoiceKind, SiteRecord, Trace};

/// Type alias for enumeration results
pub type EnumResult<T> = Result<T, EnumError>;

/// Engine-level errors. Failures inside the wrapped program propagate
/// through the `Model` variant unmodified; the engine performs no retry and
/// abandons the rest of the frontier.
#[derive(Debug, thiserror::Error)]
pub enum EnumError {
    #[error("non-deterministic replay at site `{site}`: {detail}")]
    NonDeterministicReplay { site: String, detail: String },

    #[error("enumeration still had work after {executions} executions")]
    UnboundedEnumeration { executions: usize },

    #[error("site `{site}` claims to be enumerable but has no finite support")]
    UnsupportedSite { site: String },

    #[error(transparent)]
    Shape(#[from] TensorError),

    #[error(transparent)]
    Model(ModelError),
}

/// Configuration for one enumeration call
#[derive(Debug, Clone)]
pub struct EnumerateConfig {
    /// Graph-representation label passed through to the program's own
    /// instrumentation; the engine never interprets it
    pub graph_type: String,

    /// Number of leading batch dimensions treated as independent replicates
    /// and kept un-reduced by the mass accumulator
    pub replicate_dims: usize,

    /// Seed for the per-execution RNG; identical seeds make repeated
    /// executions over the same prefix bit-identical
    pub seed: u64,

    /// Bound on total program executions. Enumeration over a choice tree
    /// that never drains the frontier within this bound is surfaced as
    /// `UnboundedEnumeration` rather than silently truncated
    pub max_executions: Option<usize>,
}

impl Default for EnumerateConfig {
    fn default() -> Self {
        EnumerateConfig {
            graph_type: "flat".to_string(),
            replicate_dims: 0,
            seed: 0,
            max_executions: Some(10_000),
        }
    }
}

/// Counters describing one enumeration run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumerationStats {
    /// Program executions attempted
    pub executions: usize,
    /// Child prefixes created by branching
    pub branches: usize,
    /// Complete traces yielded
    pub traces_yielded: usize,
    /// Largest frontier size observed
    pub peak_frontier: usize,
}

/// Exact enumerator over a program's discrete choices.
#[derive(Debug, Clone, Default)]
pub struct Enumerator {
    pub config: EnumerateConfig,
}

impl Enumerator {
    pub fn new(config: EnumerateConfig) -> Self {
        Enumerator { config }
    }

    /// Iterate over all discrete choices of `program`.
    ///
    /// Continuous sites behave as in a single run of the program; discrete
    /// enumerable sites are branched over exhaustively. Each item is a
    /// `(weight, trace)` pair where `weight` is the probability mass of the
    /// trace's discrete decisions, so summing `weight * f(trace)` over the
    /// whole sequence marginalizes the discrete choices exactly.
    ///
    /// The sequence is lazy and not restartable: it is driven by an owned
    /// frontier that each `next` call consumes. Dropping the iterator simply
    /// abandons the remaining frontier.
    pub fn traces<F>(&self, program: F) -> DiscreteTraces<F>
    where
        F: Fn(&mut Recorder) -> Result<(), ModelError>,
    {
        let root = Trace::new(&self.config.graph_type);
        DiscreteTraces {
            config: self.config.clone(),
            program,
            frontier: vec![root],
            stats: EnumerationStats::default(),
            failed: false,
        }
    }
}

/// Lazy sequence of `(weight, trace)` pairs produced by [`Enumerator::traces`].
pub struct DiscreteTraces<F> {
    config: EnumerateConfig,
    program: F,
    frontier: Vec<Trace>,
    stats: EnumerationStats,
    failed: bool,
}

impl<F> DiscreteTraces<F> {
    /// Counters for the work done so far.
    pub fn stats(&self) -> &EnumerationStats {
        &self.stats
    }

    /// Prefixes still awaiting exploration.
    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    /// Expand an aborted execution into one child prefix per support value.
    fn branch(&mut self, partial: Trace, site: BranchPoint) -> EnumResult<()> {
        let support = match site.dist.support() {
            Some(support) => support,
            None => {
                return Err(EnumError::UnsupportedSite { site: site.name });
            }
        };
        log::debug!(
            "engine: branching `{}` into {} alternatives at depth {}",
            site.name,
            support.len(),
            partial.len()
        );
        for value in support {
            let log_density = site
                .dist
                .log_density(&value)
                .map_err(|e| EnumError::Model(ModelError::Dist(e)))?;
            let mut child = partial.clone();
            child
                .push(SiteRecord {
                    name: site.name.clone(),
                    kind: ChoiceKind::Sample,
                    is_observed: false,
                    dist: site.dist.clone(),
                    mode: site.mode,
                    value,
                    log_density,
                    was_replayed: false,
                })
                .map_err(|_| EnumError::NonDeterministicReplay {
                    site: site.name.clone(),
                    detail: "branch site already present in its own prefix".to_string(),
                })?;
            self.frontier.push(child);
            self.stats.branches += 1;
        }
        self.stats.peak_frontier = self.stats.peak_frontier.max(self.frontier.len());
        Ok(())
    }
}

impl<F> Iterator for DiscreteTraces<F>
where
    F: Fn(&mut Recorder) -> Result<(), ModelError>,
{
    type Item = EnumResult<(Tensor, Trace)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while let Some(prefix) = self.frontier.pop() {
            if let Some(max) = self.config.max_executions {
                if self.stats.executions >= max {
                    self.failed = true;
                    return Some(Err(EnumError::UnboundedEnumeration {
                        executions: self.stats.executions,
                    }));
                }
            }
            self.stats.executions += 1;

            match replay::run(&prefix, self.config.seed, &self.program) {
                Err(err) => {
                    // A failing attempt abandons the rest of the frontier.
                    self.failed = true;
                    return Some(Err(err));
                }
                Ok(Outcome::Completed(full)) => {
                    let weight = match trace_weight(&full, self.config.replicate_dims) {
                        Ok(weight) => weight,
                        Err(err) => {
                            self.failed = true;
                            return Some(Err(err.into()));
                        }
                    };
                    self.stats.traces_yielded += 1;
                    log::debug!(
                        "engine: yielding trace {} with weight {}",
                        self.stats.traces_yielded,
                        weight
                    );
                    return Some(Ok((weight, full)));
                }
                Ok(Outcome::Aborted { partial, site }) => {
                    if let Err(err) = self.branch(partial, site) {
                        self.failed = true;
                        return Some(Err(err));
                    }
                }
            }
        }
        None
    }
}
