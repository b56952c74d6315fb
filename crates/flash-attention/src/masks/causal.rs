//! Device-side causal bias for the fallback's causal fast path.
//!
//! The bias is built with on-device index comparisons, so no host-side boolean
//! matrix is allocated. Queries align with the most recent `q_len` keys.

use candle_core::{Device, Result, Tensor};

use super::MASK_DTYPE;

/// Additive causal bias shaped `[q_len, k_len]`: `0.0` where a query may
/// attend and `f32::NEG_INFINITY` otherwise.
pub fn causal_bias(device: &Device, q_len: usize, k_len: usize) -> Result<Tensor> {
    let offset = k_len.saturating_sub(q_len) as u32;
    let rows = Tensor::arange(offset, offset + q_len as u32, device)?.reshape((q_len, 1))?;
    let cols = Tensor::arange(0u32, k_len as u32, device)?.reshape((1, k_len))?;
    let allowed = cols.broadcast_le(&rows)?;
    let keep = Tensor::zeros((q_len, k_len), MASK_DTYPE, device)?;
    let drop = Tensor::full(f32::NEG_INFINITY, (q_len, k_len), device)?;
    allowed.where_cond(&keep, &drop)
}
