//! Recording context threaded through a stochastic program.
//!
//! A `Recorder` is handed to the program for one execution attempt. It
//! replays a given trace prefix deterministically, records every fresh
//! choice, and escapes - by returning an error value the program propagates
//! with `?` - the first time it reaches an enumerable discrete site the
//! prefix has not resolved. Escape is ordinary control flow reified as a
//! `Result`, never an unwind.
//!
//! Core concepts:
//! - Prefix sites are forced back in, in their original order
//! - Any divergence from the prefix order is a replay mismatch
//! - The pending branch point survives the escape so the search loop can
//!   expand one child prefix per support value

use crate::dist::{DistError, Distribution};
use crate::trace::{ChoiceKind, ResolutionMode, SiteRecord, Trace, TraceError};
use crate::value::Value;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Type alias for program-facing results
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors surfaced to and through the stochastic program.
///
/// `Escape` is produced by the recorder itself when an unresolved
/// enumerable site is reached; programs must propagate it unmodified (the
/// `?` operator does). Everything else is a genuine failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("execution escaped at unresolved enumerable site `{site}`")]
    Escape { site: String },

    #[error("replay mismatch at site `{site}`: {detail}")]
    ReplayMismatch { site: String, detail: String },

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Dist(#[from] DistError),

    #[error("program failure: {0}")]
    Fail(String),
}

/// The site at which an execution escaped: enough information for the
/// search loop to enumerate the untried alternatives.
#[derive(Debug, Clone)]
pub struct BranchPoint {
    pub name: String,
    pub dist: Arc<dyn Distribution>,
    pub mode: ResolutionMode,
}

/// Explicit recording context for one execution attempt.
pub struct Recorder {
    prefix: Trace,
    cursor: usize,
    trace: Trace,
    rng: ChaCha8Rng,
    pending_branch: Option<BranchPoint>,
}

impl Recorder {
    /// Build a context that replays `prefix` and records into a fresh trace
    /// carrying the same graph-type label. The RNG is freshly seeded, so two
    /// contexts built from the same prefix and seed behave identically.
    pub fn new(prefix: Trace, seed: u64) -> Self {
        let trace = Trace::new(prefix.graph_type());
        Recorder {
            prefix,
            cursor: 0,
            trace,
            rng: ChaCha8Rng::seed_from_u64(seed),
            pending_branch: None,
        }
    }

    /// Opaque graph-representation label, passed through for the program's
    /// own instrumentation.
    pub fn graph_type(&self) -> &str {
        self.trace.graph_type()
    }

    /// Sites recorded so far in this attempt.
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Whether every prefix site has been replayed.
    pub fn prefix_consumed(&self) -> bool {
        self.cursor == self.prefix.len()
    }

    /// Name of the next prefix site still awaiting replay, if any.
    pub fn pending_prefix_site(&self) -> Option<&str> {
        self.prefix.at(self.cursor).map(|s| s.name.as_str())
    }

    /// Perform a named random choice under the default sequential policy.
    pub fn sample(&mut self, name: &str, dist: Arc<dyn Distribution>) -> ModelResult<Value> {
        self.sample_with_mode(name, dist, ResolutionMode::Sequential)
    }

    /// Perform a named random choice with an explicit resolution policy.
    /// Non-sequential enumerable sites pass through like continuous ones.
    pub fn sample_with_mode(
        &mut self,
        name: &str,
        dist: Arc<dyn Distribution>,
        mode: ResolutionMode,
    ) -> ModelResult<Value> {
        if self.cursor < self.prefix.len() {
            return self.replay_site(name, dist, mode, false, None);
        }

        if mode == ResolutionMode::Sequential && dist.enumerable() {
            log::debug!("recorder: escaping at unresolved enumerable site `{}`", name);
            self.pending_branch = Some(BranchPoint {
                name: name.to_string(),
                dist,
                mode,
            });
            return Err(ModelError::Escape {
                site: name.to_string(),
            });
        }

        let value = dist.draw(&mut self.rng);
        let log_density = dist.log_density(&value)?;
        log::trace!("recorder: drew `{}` = {} from {}", name, value, dist.name());
        self.trace.push(SiteRecord {
            name: name.to_string(),
            kind: ChoiceKind::Sample,
            is_observed: false,
            dist,
            mode,
            value: value.clone(),
            log_density,
            was_replayed: false,
        })?;
        Ok(value)
    }

    /// Record a choice whose value is supplied externally. Observed sites
    /// never branch and carry no enumeration mass.
    pub fn observe(
        &mut self,
        name: &str,
        dist: Arc<dyn Distribution>,
        value: Value,
    ) -> ModelResult<()> {
        if self.cursor < self.prefix.len() {
            self.replay_site(name, dist, ResolutionMode::Sequential, true, Some(&value))?;
            return Ok(());
        }

        let log_density = dist.log_density(&value)?;
        log::trace!("recorder: observed `{}` = {}", name, value);
        self.trace.push(SiteRecord {
            name: name.to_string(),
            kind: ChoiceKind::Sample,
            is_observed: true,
            dist,
            mode: ResolutionMode::Sequential,
            value,
            log_density,
            was_replayed: false,
        })?;
        Ok(())
    }

    /// Force the next prefix site back into the working trace. Execution
    /// must revisit prefix sites in their recorded order with matching
    /// structure; anything else is a replay mismatch.
    fn replay_site(
        &mut self,
        name: &str,
        dist: Arc<dyn Distribution>,
        mode: ResolutionMode,
        is_observed: bool,
        supplied: Option<&Value>,
    ) -> ModelResult<Value> {
        let expected = match self.prefix.at(self.cursor) {
            Some(site) => site,
            None => unreachable!("cursor bounded by prefix length"),
        };

        if expected.name != name {
            return Err(ModelError::ReplayMismatch {
                site: name.to_string(),
                detail: format!("prefix expects site `{}` at position {}", expected.name, self.cursor),
            });
        }
        if expected.dist.name() != dist.name() {
            return Err(ModelError::ReplayMismatch {
                site: name.to_string(),
                detail: format!(
                    "distribution changed from {} to {}",
                    expected.dist.name(),
                    dist.name()
                ),
            });
        }
        if expected.is_observed != is_observed {
            return Err(ModelError::ReplayMismatch {
                site: name.to_string(),
                detail: "observation status changed between executions".to_string(),
            });
        }
        if let Some(v) = supplied {
            if *v != expected.value {
                return Err(ModelError::ReplayMismatch {
                    site: name.to_string(),
                    detail: format!(
                        "observed value changed from {} to {}",
                        expected.value, v
                    ),
                });
            }
        }

        let value = expected.value.clone();
        // Density is re-evaluated against the live distribution instance.
        let log_density = dist.log_density(&value)?;
        log::trace!("recorder: replayed `{}` = {}", name, value);
        self.cursor += 1;
        self.trace.push(SiteRecord {
            name: name.to_string(),
            kind: ChoiceKind::Sample,
            is_observed,
            dist,
            mode,
            value: value.clone(),
            log_density,
            was_replayed: true,
        })?;
        Ok(value)
    }

    /// Consume the context, yielding the recorded trace and the branch
    /// point if the attempt escaped.
    pub fn into_parts(self) -> (Trace, Option<BranchPoint>) {
        (self.trace, self.pending_branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::{Bernoulli, Categorical, Normal, Uniform};
    use crate::tensor::Tensor;

    fn empty_prefix() -> Trace {
        Trace::new("flat")
    }

    #[test]
    fn test_continuous_site_is_drawn_and_recorded() {
        let mut recorder = Recorder::new(empty_prefix(), 1);
        let value = recorder
            .sample("x", Arc::new(Normal::new(0.0, 1.0).unwrap()))
            .unwrap();
        assert!(value.as_float().is_some());
        let site = recorder.trace().get("x").unwrap();
        assert!(!site.is_observed);
        assert!(!site.was_replayed);
        assert!(!site.is_enumerable_choice());
    }

    #[test]
    fn test_enumerable_site_escapes() {
        let mut recorder = Recorder::new(empty_prefix(), 1);
        let err = recorder
            .sample("coin", Arc::new(Bernoulli::new(0.5).unwrap()))
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::Escape {
                site: "coin".to_string()
            }
        );
        // Nothing after the escape point is recorded.
        assert!(recorder.trace().is_empty());
        let (_, branch) = recorder.into_parts();
        assert_eq!(branch.unwrap().name, "coin");
    }

    #[test]
    fn test_parallel_mode_site_passes_through() {
        let mut recorder = Recorder::new(empty_prefix(), 1);
        let value = recorder
            .sample_with_mode(
                "coin",
                Arc::new(Bernoulli::new(0.5).unwrap()),
                ResolutionMode::Parallel,
            )
            .unwrap();
        assert!(value.as_boolean().is_some());
        assert!(!recorder.trace().get("coin").unwrap().is_enumerable_choice());
    }

    #[test]
    fn test_prefix_site_is_forced() {
        let mut first = Recorder::new(empty_prefix(), 9);
        let drawn = first
            .sample("u", Arc::new(Uniform::new(0.0, 1.0).unwrap()))
            .unwrap();
        let (trace, _) = first.into_parts();

        let mut second = Recorder::new(trace, 1234);
        let forced = second
            .sample("u", Arc::new(Uniform::new(0.0, 1.0).unwrap()))
            .unwrap();
        assert_eq!(forced, drawn);
        assert!(second.trace().get("u").unwrap().was_replayed);
        assert!(second.prefix_consumed());
    }

    #[test]
    fn test_replay_out_of_order_is_mismatch() {
        let mut first = Recorder::new(empty_prefix(), 9);
        first
            .sample("a", Arc::new(Uniform::new(0.0, 1.0).unwrap()))
            .unwrap();
        first
            .sample("b", Arc::new(Uniform::new(0.0, 1.0).unwrap()))
            .unwrap();
        let (trace, _) = first.into_parts();

        let mut second = Recorder::new(trace, 9);
        let err = second
            .sample("b", Arc::new(Uniform::new(0.0, 1.0).unwrap()))
            .unwrap_err();
        assert!(matches!(err, ModelError::ReplayMismatch { .. }));
    }

    #[test]
    fn test_replay_with_changed_distribution_is_mismatch() {
        let mut first = Recorder::new(empty_prefix(), 9);
        first
            .sample("x", Arc::new(Uniform::new(0.0, 1.0).unwrap()))
            .unwrap();
        let (trace, _) = first.into_parts();

        let mut second = Recorder::new(trace, 9);
        let err = second
            .sample("x", Arc::new(Normal::new(0.0, 1.0).unwrap()))
            .unwrap_err();
        assert!(matches!(err, ModelError::ReplayMismatch { .. }));
    }

    #[test]
    fn test_fresh_site_during_replay_is_mismatch() {
        let mut first = Recorder::new(empty_prefix(), 9);
        first
            .sample("a", Arc::new(Uniform::new(0.0, 1.0).unwrap()))
            .unwrap();
        let (trace, _) = first.into_parts();

        let mut second = Recorder::new(trace, 9);
        let err = second
            .sample("other", Arc::new(Uniform::new(0.0, 1.0).unwrap()))
            .unwrap_err();
        assert!(matches!(err, ModelError::ReplayMismatch { .. }));
    }

    #[test]
    fn test_observed_site_records_density_without_branching() {
        let mut recorder = Recorder::new(empty_prefix(), 1);
        recorder
            .observe(
                "k",
                Arc::new(Categorical::new(&[0.2, 0.8]).unwrap()),
                Value::Integer(1),
            )
            .unwrap();
        let site = recorder.trace().get("k").unwrap();
        assert!(site.is_observed);
        assert!(!site.is_enumerable_choice());
        assert!((site.log_density.as_scalar().unwrap() - 0.8f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_observed_value_change_is_mismatch() {
        let mut first = Recorder::new(empty_prefix(), 1);
        first
            .observe(
                "k",
                Arc::new(Categorical::new(&[0.2, 0.8]).unwrap()),
                Value::Integer(1),
            )
            .unwrap();
        let (trace, _) = first.into_parts();

        let mut second = Recorder::new(trace, 1);
        let err = second
            .observe(
                "k",
                Arc::new(Categorical::new(&[0.2, 0.8]).unwrap()),
                Value::Integer(0),
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::ReplayMismatch { .. }));
    }

    #[test]
    fn test_enumerable_site_in_prefix_does_not_escape() {
        let mut prefix = Trace::new("flat");
        let dist: Arc<dyn Distribution> = Arc::new(Bernoulli::new(0.3).unwrap());
        prefix
            .push(SiteRecord {
                name: "coin".to_string(),
                kind: ChoiceKind::Sample,
                is_observed: false,
                dist: dist.clone(),
                mode: ResolutionMode::Sequential,
                value: Value::Boolean(true),
                log_density: Tensor::scalar(0.3f64.ln()),
                was_replayed: false,
            })
            .unwrap();

        let mut recorder = Recorder::new(prefix, 1);
        let value = recorder
            .sample("coin", Arc::new(Bernoulli::new(0.3).unwrap()))
            .unwrap();
        assert_eq!(value, Value::Boolean(true));
        assert!(recorder.trace().get("coin").unwrap().was_replayed);
    }
}
