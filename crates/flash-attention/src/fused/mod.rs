//! Fused flash-attention kernel.
//!
//! Wraps `candle-flash-attn`, which is only linked when the `fused` cargo
//! feature is enabled. The kernel consumes batch-major tensors directly,
//! handles grouped-query attention natively and aligns causal masks to the
//! bottom-right corner when `k_len > q_len`, matching the fallback path.
//! Inputs must be `f16` or `bf16` tensors on a CUDA device.

use candle_core::{DType, Tensor};

use crate::core::{
    Attention, AttentionError, AttentionParams, AttentionShape, Config, TensorLayout,
};
use crate::kv_cache::KvCache;

/// Executor backed by the fused CUDA kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct FusedAttention;

impl FusedAttention {
    pub fn new() -> Self {
        Self
    }

    /// Whether the kernel can take `q` as-is: half precision on a CUDA device.
    pub fn accepts(q: &Tensor) -> bool {
        q.device().is_cuda() && matches!(q.dtype(), DType::F16 | DType::BF16)
    }

    /// Reject queries the kernel cannot take, before any work is done.
    pub(crate) fn check_query(q: &Tensor) -> Result<(), AttentionError> {
        if !matches!(q.dtype(), DType::F16 | DType::BF16) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{:?} (fused kernel needs f16 or bf16)", q.dtype()),
            });
        }
        if !q.device().is_cuda() {
            return Err(AttentionError::configuration(format!(
                "fused kernel needs CUDA tensors, got {:?}",
                q.device().location()
            )));
        }
        Ok(())
    }

    /// Kernel window arguments for `params`. `None` means unbounded; a causal
    /// call pins the right bound to zero.
    pub fn kernel_window(params: &AttentionParams) -> (Option<usize>, Option<usize>) {
        let left = params.window.left_bound();
        let right = if params.causal {
            Some(0)
        } else {
            params.window.right_bound()
        };
        (left, right)
    }

    /// Attend over the first `valid_len` cache positions.
    ///
    /// The kernel has no cache insertion of its own; callers write new keys
    /// and values through [`KvCache::write`] first. The prefix views are
    /// strided over the cache buffers and handed to the kernel uncopied.
    pub fn attend_with_kvcache(
        &self,
        q: &Tensor,
        cache: &KvCache,
        valid_len: usize,
        params: &AttentionParams,
        config: &Config,
    ) -> Result<Tensor, AttentionError> {
        let (keys, values) = cache.prefix(valid_len)?;
        self.attend(q, &keys, &values, params, config)
    }
}

impl Attention for FusedAttention {
    fn layout(&self) -> TensorLayout {
        TensorLayout::BatchMajor
    }

    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        params: &AttentionParams,
        config: &Config,
    ) -> Result<Tensor, AttentionError> {
        let shape = AttentionShape::validate(q, k, v, TensorLayout::BatchMajor)?;
        Self::check_query(q)?;
        if params.causal && shape.q_len > shape.k_len {
            return Err(AttentionError::shape(format!(
                "causal attention needs q_len <= k_len, got {} > {}",
                shape.q_len, shape.k_len
            )));
        }
        let (left, right) = Self::kernel_window(params);
        let scale = config.scale_for(shape.head_dim);
        log::trace!(
            "fused q_len={} k_len={} heads={}/{} window=({left:?}, {right:?})",
            shape.q_len,
            shape.k_len,
            shape.num_heads,
            shape.num_kv_heads
        );
        run_kernel(q, k, v, scale, left, right)
    }
}

#[cfg(feature = "fused")]
fn run_kernel(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    scale: f32,
    left: Option<usize>,
    right: Option<usize>,
) -> Result<Tensor, AttentionError> {
    Ok(candle_flash_attn::flash_attn_windowed(
        q, k, v, scale, left, right,
    )?)
}

#[cfg(not(feature = "fused"))]
fn run_kernel(
    _q: &Tensor,
    _k: &Tensor,
    _v: &Tensor,
    _scale: f32,
    _left: Option<usize>,
    _right: Option<usize>,
) -> Result<Tensor, AttentionError> {
    Err(AttentionError::configuration(
        "fused attention requires building with the `fused` feature",
    ))
}
