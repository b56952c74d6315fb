//! Core traits and types shared across attention executors.
//!
//! Callers always hand the dispatcher batch-major tensors shaped
//! `[batch, seq_len, n_heads, head_dim]`. Each executor declares the
//! [`TensorLayout`] it consumes and the dispatcher transposes into and out of
//! it. Key/value tensors may carry fewer heads than the query as long as the
//! query head count is a multiple of theirs (grouped-query attention).

pub mod config;
pub mod errors;

use candle_core::Tensor;

use crate::masks::WindowSize;

pub use config::{BackendSelection, Config, PrecisionPolicy};
pub use errors::AttentionError;

/// Axis order of a rank-4 attention tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[batch, seq_len, heads, head_dim]`, the public layout.
    BatchMajor,
    /// `[batch, heads, seq_len, head_dim]`.
    HeadMajor,
}

impl TensorLayout {
    /// Convert a tensor from `self` into `target`. Both layouts differ only by
    /// swapping axes 1 and 2, so the conversion is its own inverse.
    pub fn convert(self, tensor: &Tensor, target: TensorLayout) -> Result<Tensor, AttentionError> {
        if self == target {
            return Ok(tensor.clone());
        }
        Ok(tensor.transpose(1, 2)?.contiguous()?)
    }
}

/// Per-call masking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionParams {
    /// Restrict each query to keys at or before its own position.
    pub causal: bool,
    /// Sliding window bounds.
    pub window: WindowSize,
}

impl AttentionParams {
    pub fn causal() -> Self {
        Self {
            causal: true,
            window: WindowSize::UNBOUNDED,
        }
    }

    pub fn sliding(left: usize) -> Self {
        Self {
            causal: true,
            window: WindowSize::left(left),
        }
    }
}

impl Default for AttentionParams {
    fn default() -> Self {
        Self::causal()
    }
}

/// Unified interface for attention executors.
///
/// * `q`, `k`, and `v` arrive in the layout reported by [`Attention::layout`].
/// * `k` and `v` share a shape; their head count divides the query's.
/// * When `k_len > q_len`, queries align with the most recent `q_len` keys.
/// * The returned tensor mirrors the layout, shape and dtype of `q`.
pub trait Attention {
    /// Layout this executor consumes and produces.
    fn layout(&self) -> TensorLayout;

    /// Compute attention under the supplied masking parameters.
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        params: &AttentionParams,
        config: &Config,
    ) -> Result<Tensor, AttentionError>;
}

/// Validated geometry of a q/k/v triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionShape {
    pub batch: usize,
    pub q_len: usize,
    pub k_len: usize,
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub head_dim: usize,
}

impl AttentionShape {
    /// Number of query heads served by each key/value head.
    pub fn group_size(&self) -> usize {
        self.num_heads / self.num_kv_heads
    }

    /// Check rank, dtype, device and axis agreement for tensors in `layout`.
    pub fn validate(
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        layout: TensorLayout,
    ) -> Result<Self, AttentionError> {
        let (seq_axis, head_axis) = match layout {
            TensorLayout::BatchMajor => (1, 2),
            TensorLayout::HeadMajor => (2, 1),
        };
        let dims = |name: &str, t: &Tensor| -> Result<[usize; 4], AttentionError> {
            match t.dims() {
                &[a, b, c, d] => Ok([a, b, c, d]),
                other => Err(AttentionError::shape(format!(
                    "{name} must be rank 4 ({layout:?}), got {other:?}"
                ))),
            }
        };
        let qd = dims("q", q)?;
        let kd = dims("k", k)?;
        let vd = dims("v", v)?;

        if kd != vd {
            return Err(AttentionError::shape(format!(
                "k and v must share a shape, got {kd:?} and {vd:?}"
            )));
        }
        if kd[0] != qd[0] {
            return Err(AttentionError::shape(format!(
                "batch mismatch: q has {}, k has {}",
                qd[0], kd[0]
            )));
        }
        if kd[3] != qd[3] {
            return Err(AttentionError::shape(format!(
                "head_dim mismatch: q has {}, k has {}",
                qd[3], kd[3]
            )));
        }
        let num_heads = qd[head_axis];
        let num_kv_heads = kd[head_axis];
        if num_kv_heads == 0 || num_heads % num_kv_heads != 0 {
            return Err(AttentionError::shape(format!(
                "kv heads ({num_kv_heads}) must evenly divide query heads ({num_heads})"
            )));
        }
        if kd[seq_axis] == 0 {
            return Err(AttentionError::shape("key sequence is empty"));
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::shape(format!(
                "q, k, v must share a dtype, got {:?}, {:?}, {:?}",
                dtype,
                k.dtype(),
                v.dtype()
            )));
        }
        if !q.device().same_device(k.device()) || !q.device().same_device(v.device()) {
            return Err(AttentionError::shape("q, k, v must reside on the same device"));
        }

        Ok(Self {
            batch: qd[0],
            q_len: qd[seq_axis],
            k_len: kd[seq_axis],
            num_heads,
            num_kv_heads,
            head_dim: qd[3],
        })
    }
}
