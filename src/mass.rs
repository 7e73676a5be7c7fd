//! Probability mass accumulation over completed traces.
//!
//! The joint mass of a complete trace's discrete decisions is the sum of the
//! log-densities of exactly the sites the classifier accepts: unobserved,
//! enumerable, sequentially resolved. Batch dimensions beyond the leading
//! `replicate_dims` independent-replicate dimensions are summed out per site
//! before accumulation, and the total is exponentiated to linear scale.

use crate::tensor::{Tensor, TensorResult};
use crate::trace::Trace;

/// Joint log-mass contributed by the trace's enumerable discrete sites.
///
/// `replicate_dims` is the number of leading batch dimensions treated as
/// independent replicates and kept un-reduced; it is a property of the whole
/// engine call, not of any one site.
pub fn discrete_log_mass(trace: &Trace, replicate_dims: usize) -> TensorResult<Tensor> {
    let mut total = Tensor::scalar(0.0);
    for site in trace.discrete_sites() {
        let reduced = site.log_density.sum_rightmost(replicate_dims);
        log::trace!(
            "mass: site `{}` contributes {} (shape {:?})",
            site.name,
            reduced,
            reduced.shape()
        );
        total = total.broadcast_add(&reduced)?;
    }
    Ok(total)
}

/// Linear-scale weight of a complete trace: `exp` of the accumulated
/// discrete log-mass. Scalar when no vectorized dimensions remain after
/// reduction, batched otherwise.
pub fn trace_weight(trace: &Trace, replicate_dims: usize) -> TensorResult<Tensor> {
    Ok(discrete_log_mass(trace, replicate_dims)?.exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::{Bernoulli, Categorical, Distribution, Normal};
    use crate::trace::{ChoiceKind, ResolutionMode, SiteRecord};
    use crate::value::Value;
    use std::sync::Arc;

    fn push_site(
        trace: &mut Trace,
        name: &str,
        dist: Arc<dyn Distribution>,
        value: Value,
        observed: bool,
    ) {
        let log_density = dist.log_density(&value).unwrap();
        trace
            .push(SiteRecord {
                name: name.to_string(),
                kind: ChoiceKind::Sample,
                is_observed: observed,
                dist,
                mode: ResolutionMode::Sequential,
                value,
                log_density,
                was_replayed: false,
            })
            .unwrap();
    }

    #[test]
    fn test_mass_multiplies_discrete_sites() {
        let mut trace = Trace::new("flat");
        push_site(
            &mut trace,
            "a",
            Arc::new(Bernoulli::new(0.25).unwrap()),
            Value::Boolean(true),
            false,
        );
        push_site(
            &mut trace,
            "b",
            Arc::new(Categorical::new(&[0.5, 0.5]).unwrap()),
            Value::Integer(0),
            false,
        );
        let weight = trace_weight(&trace, 0).unwrap();
        assert!((weight.as_scalar().unwrap() - 0.125).abs() < 1e-12);
    }

    #[test]
    fn test_observed_and_continuous_sites_contribute_nothing() {
        let mut trace = Trace::new("flat");
        push_site(
            &mut trace,
            "coin",
            Arc::new(Bernoulli::new(0.25).unwrap()),
            Value::Boolean(true),
            false,
        );
        push_site(
            &mut trace,
            "seen",
            Arc::new(Bernoulli::new(0.01).unwrap()),
            Value::Boolean(true),
            true,
        );
        push_site(
            &mut trace,
            "y",
            Arc::new(Normal::new(0.0, 1.0).unwrap()),
            Value::Float(5.0),
            false,
        );
        let weight = trace_weight(&trace, 0).unwrap();
        assert!((weight.as_scalar().unwrap() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_empty_trace_has_unit_weight() {
        let trace = Trace::new("flat");
        assert_eq!(trace_weight(&trace, 0).unwrap().as_scalar(), Some(1.0));
    }

    #[test]
    fn test_batched_site_reduces_beyond_replicate_dims() {
        use crate::tensor::Tensor;
        let probs = Tensor::from_vec(vec![0.2, 0.5, 0.9]);
        let mut trace = Trace::new("flat");
        push_site(
            &mut trace,
            "coins",
            Arc::new(Bernoulli::batched(probs).unwrap()),
            Value::Boolean(true),
            false,
        );

        // Full reduction collapses the batch to a scalar product.
        let full = trace_weight(&trace, 0).unwrap();
        let expected: f64 = 0.2 * 0.5 * 0.9;
        assert!((full.as_scalar().unwrap() - expected).abs() < 1e-12);

        // Keeping one replicate dimension leaves an elementwise weight.
        let kept = trace_weight(&trace, 1).unwrap();
        assert_eq!(kept.shape(), &[3]);
        assert!((kept.data()[0] - 0.2).abs() < 1e-12);
        assert!((kept.data()[2] - 0.9).abs() < 1e-12);
    }
}
