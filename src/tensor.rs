//! Minimal dense tensor used for batched log-density bookkeeping.
//!
//! Distributions may carry vectorized parameters, in which case a single
//! choice site produces a log-density with batch dimensions. The engine only
//! needs a handful of operations on those values: elementwise addition with
//! broadcasting, exponentiation, and summing out trailing dimensions. This
//! module provides exactly that surface over a row-major `Vec<f64>`.
//!
//! A scalar is a rank-0 tensor, so code that accumulates log-densities does
//! not have to special-case the unbatched path.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type alias for tensor operation results
pub type TensorResult<T> = Result<T, TensorError>;

/// Errors from tensor construction and arithmetic
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TensorError {
    #[error("shape {shape:?} implies {expected} elements, got {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("shapes {left:?} and {right:?} do not broadcast")]
    IncompatibleShapes { left: Vec<usize>, right: Vec<usize> },
}

/// Dense row-major f64 tensor. Rank 0 represents a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    /// Wrap a plain number as a rank-0 tensor.
    pub fn scalar(value: f64) -> Self {
        Tensor {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    /// Build a rank-1 tensor from a vector.
    pub fn from_vec(data: Vec<f64>) -> Self {
        Tensor {
            shape: vec![data.len()],
            data,
        }
    }

    /// Build a tensor with an explicit shape. The data length must equal the
    /// product of the dimensions.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> TensorResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(TensorError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Tensor { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Extract the plain number from a rank-0 tensor.
    pub fn as_scalar(&self) -> Option<f64> {
        if self.is_scalar() {
            Some(self.data[0])
        } else {
            None
        }
    }

    /// Apply a function elementwise.
    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Elementwise exponentiation.
    pub fn exp(&self) -> Tensor {
        self.map(f64::exp)
    }

    /// Sum of every element.
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Sum out all dimensions to the right of the first `keep_dims`
    /// dimensions. A tensor of rank `<= keep_dims` is returned unchanged;
    /// `keep_dims == 0` reduces to a scalar.
    pub fn sum_rightmost(&self, keep_dims: usize) -> Tensor {
        if self.rank() <= keep_dims {
            return self.clone();
        }
        let kept: Vec<usize> = self.shape[..keep_dims].to_vec();
        let block: usize = self.shape[keep_dims..].iter().product();
        let data: Vec<f64> = self
            .data
            .chunks(block.max(1))
            .map(|chunk| chunk.iter().sum())
            .collect();
        Tensor { shape: kept, data }
    }

    /// Elementwise addition with right-aligned broadcasting. Each trailing
    /// dimension pair must be equal or 1.
    pub fn broadcast_add(&self, other: &Tensor) -> TensorResult<Tensor> {
        self.broadcast_zip(other, |a, b| a + b)
    }

    /// Elementwise multiplication with right-aligned broadcasting.
    pub fn broadcast_mul(&self, other: &Tensor) -> TensorResult<Tensor> {
        self.broadcast_zip(other, |a, b| a * b)
    }

    /// Combine two tensors elementwise under broadcasting rules.
    pub fn broadcast_zip(
        &self,
        other: &Tensor,
        mut f: impl FnMut(f64, f64) -> f64,
    ) -> TensorResult<Tensor> {
        let rank = self.rank().max(other.rank());
        let mut out_shape = vec![0usize; rank];
        for i in 0..rank {
            let a = dim_from_right(&self.shape, i);
            let b = dim_from_right(&other.shape, i);
            if a != b && a != 1 && b != 1 {
                return Err(TensorError::IncompatibleShapes {
                    left: self.shape.clone(),
                    right: other.shape.clone(),
                });
            }
            out_shape[rank - 1 - i] = a.max(b);
        }

        let numel: usize = out_shape.iter().product();
        let mut data = Vec::with_capacity(numel);
        let mut index = vec![0usize; rank];
        for _ in 0..numel {
            let a = self.data[broadcast_offset(&index, &self.shape)];
            let b = other.data[broadcast_offset(&index, &other.shape)];
            data.push(f(a, b));
            increment_index(&mut index, &out_shape);
        }
        Ok(Tensor {
            shape: out_shape,
            data,
        })
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_scalar() {
            Some(x) => write!(f, "{}", x),
            None => write!(f, "tensor{:?}{:?}", self.shape, self.data),
        }
    }
}

/// Dimension `i` counting from the rightmost, defaulting to 1 past the rank.
fn dim_from_right(shape: &[usize], i: usize) -> usize {
    if i < shape.len() {
        shape[shape.len() - 1 - i]
    } else {
        1
    }
}

/// Flat offset of a (right-aligned, broadcast) multi-index into `shape`.
fn broadcast_offset(index: &[usize], shape: &[usize]) -> usize {
    let mut offset = 0;
    let mut stride = 1;
    for i in 0..shape.len() {
        let dim = shape[shape.len() - 1 - i];
        let idx = if dim == 1 {
            0
        } else {
            index[index.len() - 1 - i]
        };
        offset += idx * stride;
        stride *= dim;
    }
    offset
}

/// Advance a row-major multi-index by one position.
fn increment_index(index: &mut [usize], shape: &[usize]) {
    for i in (0..shape.len()).rev() {
        index[i] += 1;
        if index[i] < shape[i] {
            return;
        }
        index[i] = 0;
    }
}
