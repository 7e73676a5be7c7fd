//! Distribution capabilities used by choice sites.
//!
//! The engine never looks inside a distribution: it draws through the trait,
//! evaluates batched log-densities through the trait, and asks enumerable
//! distributions for their finite support when a site has to be branched.
//! The concrete distributions here cover the shapes the engine's own tests
//! need; external callers can implement the trait for anything else.

use crate::tensor::Tensor;
use crate::value::Value;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::f64::consts::PI;
use std::fmt;

/// Type alias for distribution operation results
pub type DistResult<T> = Result<T, DistError>;

/// Errors from distribution construction and density evaluation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DistError {
    #[error("invalid parameter for {dist}: {detail}")]
    InvalidParameter { dist: &'static str, detail: String },

    #[error("{dist} cannot evaluate log-density at {value}")]
    InvalidValue { dist: &'static str, value: String },
}

/// Opaque capability object backing one random-choice site.
///
/// `log_density` retains un-reduced batch dimensions; reducing them is the
/// caller's job. `support` returns `Some` exactly when the full finite
/// support can be listed, which is what makes a site eligible for
/// enumeration.
pub trait Distribution: fmt::Debug + Send + Sync {
    /// Short name for diagnostics and replay checking.
    fn name(&self) -> &'static str;

    /// Draw one value.
    fn draw(&self, rng: &mut ChaCha8Rng) -> Value;

    /// Batched log-density of `value` under this distribution.
    fn log_density(&self, value: &Value) -> DistResult<Tensor>;

    /// Whether the support is finite and listable.
    fn enumerable(&self) -> bool {
        false
    }

    /// Ordered finite support, if one exists.
    fn support(&self) -> Option<Vec<Value>> {
        None
    }
}

fn invalid_value(dist: &'static str, value: &Value) -> DistError {
    DistError::InvalidValue {
        dist,
        value: value.to_string(),
    }
}

/// Bernoulli distribution, optionally with vectorized success probabilities.
///
/// Enumeration always branches over the scalar support `{false, true}`; a
/// batched parameterization only widens the log-density.
#[derive(Debug, Clone)]
pub struct Bernoulli {
    probs: Tensor,
}

impl Bernoulli {
    pub fn new(p: f64) -> DistResult<Self> {
        Self::batched(Tensor::scalar(p))
    }

    pub fn batched(probs: Tensor) -> DistResult<Self> {
        if probs.data().iter().any(|&p| !(0.0..=1.0).contains(&p)) {
            return Err(DistError::InvalidParameter {
                dist: "bernoulli",
                detail: format!("probabilities outside [0, 1]: {}", probs),
            });
        }
        Ok(Bernoulli { probs })
    }

    pub fn probs(&self) -> &Tensor {
        &self.probs
    }
}

impl Distribution for Bernoulli {
    fn name(&self) -> &'static str {
        "bernoulli"
    }

    fn draw(&self, rng: &mut ChaCha8Rng) -> Value {
        match self.probs.as_scalar() {
            Some(p) => Value::Boolean(rng.gen::<f64>() < p),
            None => Value::Tensor(
                self.probs
                    .map(|p| if rng.gen::<f64>() < p { 1.0 } else { 0.0 }),
            ),
        }
    }

    fn log_density(&self, value: &Value) -> DistResult<Tensor> {
        match value {
            Value::Boolean(b) => {
                let hit = *b;
                Ok(self
                    .probs
                    .map(|p| if hit { p.ln() } else { (1.0 - p).ln() }))
            }
            Value::Tensor(t) => self
                .probs
                .broadcast_zip(t, |p, x| if x != 0.0 { p.ln() } else { (1.0 - p).ln() })
                .map_err(|_| invalid_value("bernoulli", value)),
            _ => Err(invalid_value("bernoulli", value)),
        }
    }

    fn enumerable(&self) -> bool {
        true
    }

    fn support(&self) -> Option<Vec<Value>> {
        Some(vec![Value::Boolean(false), Value::Boolean(true)])
    }
}

/// Categorical distribution over `0..n` with normalized weights.
#[derive(Debug, Clone)]
pub struct Categorical {
    probs: Vec<f64>,
}

impl Categorical {
    pub fn new(weights: &[f64]) -> DistResult<Self> {
        if weights.is_empty() {
            return Err(DistError::InvalidParameter {
                dist: "categorical",
                detail: "empty weight vector".to_string(),
            });
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(DistError::InvalidParameter {
                dist: "categorical",
                detail: format!("weights must be finite and non-negative: {:?}", weights),
            });
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(DistError::InvalidParameter {
                dist: "categorical",
                detail: "weights sum to zero".to_string(),
            });
        }
        Ok(Categorical {
            probs: weights.iter().map(|w| w / total).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }
}

impl Distribution for Categorical {
    fn name(&self) -> &'static str {
        "categorical"
    }

    fn draw(&self, rng: &mut ChaCha8Rng) -> Value {
        let probe: f64 = rng.gen();
        let mut cumulative = 0.0;
        for (k, p) in self.probs.iter().enumerate() {
            cumulative += p;
            if probe < cumulative {
                return Value::Integer(k as i64);
            }
        }
        Value::Integer(self.probs.len() as i64 - 1)
    }

    fn log_density(&self, value: &Value) -> DistResult<Tensor> {
        match value {
            Value::Integer(k) if (0..self.probs.len() as i64).contains(k) => {
                Ok(Tensor::scalar(self.probs[*k as usize].ln()))
            }
            _ => Err(invalid_value("categorical", value)),
        }
    }

    fn enumerable(&self) -> bool {
        true
    }

    fn support(&self) -> Option<Vec<Value>> {
        Some((0..self.probs.len() as i64).map(Value::Integer).collect())
    }
}

/// Continuous uniform distribution on `[low, high)`.
#[derive(Debug, Clone)]
pub struct Uniform {
    low: f64,
    high: f64,
}

impl Uniform {
    pub fn new(low: f64, high: f64) -> DistResult<Self> {
        if !(low < high) {
            return Err(DistError::InvalidParameter {
                dist: "uniform",
                detail: format!("empty interval [{}, {})", low, high),
            });
        }
        Ok(Uniform { low, high })
    }
}

impl Distribution for Uniform {
    fn name(&self) -> &'static str {
        "uniform"
    }

    fn draw(&self, rng: &mut ChaCha8Rng) -> Value {
        Value::Float(rng.gen_range(self.low..self.high))
    }

    fn log_density(&self, value: &Value) -> DistResult<Tensor> {
        let density = -(self.high - self.low).ln();
        let at = |x: f64| {
            if x >= self.low && x < self.high {
                density
            } else {
                f64::NEG_INFINITY
            }
        };
        match value {
            Value::Float(x) => Ok(Tensor::scalar(at(*x))),
            Value::Tensor(t) => Ok(t.map(at)),
            _ => Err(invalid_value("uniform", value)),
        }
    }
}

/// Normal distribution with possibly vectorized location and scale.
#[derive(Debug, Clone)]
pub struct Normal {
    loc: Tensor,
    scale: Tensor,
}

impl Normal {
    pub fn new(loc: f64, scale: f64) -> DistResult<Self> {
        Self::batched(Tensor::scalar(loc), Tensor::scalar(scale))
    }

    pub fn batched(loc: Tensor, scale: Tensor) -> DistResult<Self> {
        if scale.data().iter().any(|&s| !(s > 0.0)) {
            return Err(DistError::InvalidParameter {
                dist: "normal",
                detail: format!("scale must be positive: {}", scale),
            });
        }
        // Parameters must broadcast against each other.
        if loc.broadcast_zip(&scale, |_, _| 0.0).is_err() {
            return Err(DistError::InvalidParameter {
                dist: "normal",
                detail: format!("loc {} and scale {} do not broadcast", loc, scale),
            });
        }
        Ok(Normal { loc, scale })
    }
}

/// One standard normal draw via the Box-Muller transform.
fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

impl Distribution for Normal {
    fn name(&self) -> &'static str {
        "normal"
    }

    fn draw(&self, rng: &mut ChaCha8Rng) -> Value {
        if self.loc.is_scalar() && self.scale.is_scalar() {
            let loc = self.loc.data()[0];
            let scale = self.scale.data()[0];
            return Value::Float(loc + scale * standard_normal(rng));
        }
        // Infallible: parameter compatibility is checked at construction.
        let drawn = self
            .loc
            .broadcast_zip(&self.scale, |l, s| l + s * standard_normal(rng));
        match drawn {
            Ok(t) => Value::Tensor(t),
            Err(_) => unreachable!("normal parameters validated at construction"),
        }
    }

    fn log_density(&self, value: &Value) -> DistResult<Tensor> {
        let observed = match value {
            Value::Float(x) => Tensor::scalar(*x),
            Value::Tensor(t) => t.clone(),
            _ => return Err(invalid_value("normal", value)),
        };
        let log_norm = 0.5 * (2.0 * PI).ln();
        observed
            .broadcast_zip(&self.loc, |x, l| x - l)
            .and_then(|diff| {
                diff.broadcast_zip(&self.scale, |d, s| {
                    -0.5 * (d / s) * (d / s) - s.ln() - log_norm
                })
            })
            .map_err(|_| invalid_value("normal", value))
    }
}
