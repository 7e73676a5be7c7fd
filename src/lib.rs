//! # Marginal
//!
//! Exact marginalization over the discrete random choices of a stochastic
//! program. Running a program through the [`Enumerator`] behaves like the
//! program itself for continuous choices, but iterates over every complete
//! assignment of its discrete enumerable choices, yielding each assignment's
//! trace together with the probability mass of the discrete decisions along
//! it. Summing `weight * f(trace)` over the yielded sequence computes exact
//! expectations over the discrete choices.
//!
//! The engine is a backtracking search: a recording context replays a trace
//! prefix deterministically, escapes at the first unresolved discrete site,
//! and a LIFO frontier of prefixes branches that site into one child per
//! support value. Every reachable leaf of the choice tree is visited exactly
//! once.

pub mod dist;
pub mod engine;
pub mod mass;
pub mod recorder;
pub mod replay;
pub mod tensor;
pub mod trace;
pub mod value;

// Re-export core types for easy access
pub use dist::{Bernoulli, Categorical, DistError, DistResult, Distribution, Normal, Uniform};
pub use engine::{
    DiscreteTraces, EnumError, EnumResult, EnumerateConfig, EnumerationStats, Enumerator,
};
pub use mass::{discrete_log_mass, trace_weight};
pub use recorder::{BranchPoint, ModelError, ModelResult, Recorder};
pub use replay::Outcome;
pub use tensor::{Tensor, TensorError, TensorResult};
pub use trace::{
    needs_branch, ChoiceKind, ResolutionMode, SiteRecord, Trace, TraceError, TraceResult,
};
pub use value::Value;
