//! Trace records - the ordered, named account of one program execution.
//!
//! Every random-choice event a program performs lands here as a
//! `SiteRecord`. A `Trace` is an insertion-ordered mapping from site name to
//! record, representing one path through the choice tree from the program's
//! start up to either completion or the first unresolved discrete site.
//!
//! Core concepts:
//! - Site records are immutable once pushed; a trace is append-only
//! - Site names are unique within one trace, enforced at `push`
//! - The classifier predicates decide which sites the search engine branches

use crate::dist::Distribution;
use crate::tensor::Tensor;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type alias for trace operation results
pub type TraceResult<T> = Result<T, TraceError>;

/// Errors from trace construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    #[error("site name `{0}` recorded twice in one execution")]
    DuplicateSite(String),
}

/// Kind of choice-site event. Only sampling events exist today; the enum
/// keeps the record format open for other event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChoiceKind {
    Sample,
}

impl fmt::Display for ChoiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChoiceKind::Sample => write!(f, "sample"),
        }
    }
}

/// How a discrete site is resolved. Only `Sequential` sites are branched by
/// the search engine; anything else passes through like a continuous site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResolutionMode {
    #[default]
    Sequential,
    Parallel,
}

impl fmt::Display for ResolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionMode::Sequential => write!(f, "sequential"),
            ResolutionMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// One recorded random-choice event.
#[derive(Debug, Clone)]
pub struct SiteRecord {
    /// Unique name of this site within one execution
    pub name: String,
    /// Kind of event that produced the record
    pub kind: ChoiceKind,
    /// Whether the value was supplied externally rather than drawn
    pub is_observed: bool,
    /// The distribution capability backing this site
    pub dist: Arc<dyn Distribution>,
    /// Resolution policy for discrete sites
    pub mode: ResolutionMode,
    /// The realized outcome
    pub value: Value,
    /// Log-density at `value`, batch dimensions un-reduced
    pub log_density: Tensor,
    /// Whether the value was forced from a replay prefix
    pub was_replayed: bool,
}

impl SiteRecord {
    /// True iff this site is subject to exact enumeration: an unobserved
    /// sampling event whose distribution has listable support, under the
    /// sequential resolution policy.
    pub fn is_enumerable_choice(&self) -> bool {
        matches!(self.kind, ChoiceKind::Sample)
            && !self.is_observed
            && self.mode == ResolutionMode::Sequential
            && self.dist.enumerable()
    }
}

/// True iff the site must be branched when reached while extending
/// `prefix`: it is an enumerable choice and the prefix has not resolved it.
pub fn needs_branch(prefix: &Trace, site: &SiteRecord) -> bool {
    site.is_enumerable_choice() && !prefix.contains(&site.name)
}

/// Insertion-ordered collection of site records for one execution path.
#[derive(Debug, Clone)]
pub struct Trace {
    nodes: Vec<SiteRecord>,
    index: HashMap<String, usize>,
    graph_type: String,
}

impl Trace {
    /// Create an empty trace. The graph-type label is carried opaquely for
    /// the program's own instrumentation; the engine never interprets it.
    pub fn new(graph_type: &str) -> Self {
        Trace {
            nodes: Vec::new(),
            index: HashMap::new(),
            graph_type: graph_type.to_string(),
        }
    }

    pub fn graph_type(&self) -> &str {
        &self.graph_type
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&SiteRecord> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Record at insertion position `i`.
    pub fn at(&self, i: usize) -> Option<&SiteRecord> {
        self.nodes.get(i)
    }

    /// Sites in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SiteRecord> {
        self.nodes.iter()
    }

    /// Sites subject to exact enumeration, in insertion order.
    pub fn discrete_sites(&self) -> impl Iterator<Item = &SiteRecord> {
        self.nodes.iter().filter(|s| s.is_enumerable_choice())
    }

    /// Append a record. Site names are unique within one execution, so a
    /// duplicate is rejected rather than overwritten.
    pub fn push(&mut self, site: SiteRecord) -> TraceResult<()> {
        if self.contains(&site.name) {
            return Err(TraceError::DuplicateSite(site.name));
        }
        log::trace!("trace: recording site `{}` ({})", site.name, site.kind);
        self.index.insert(site.name.clone(), self.nodes.len());
        self.nodes.push(site);
        Ok(())
    }

    /// Names of all sites in insertion order.
    pub fn site_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|s| s.name.as_str()).collect()
    }
}
