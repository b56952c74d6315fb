//! Reference scaled dot-product attention on candle's dense ops.
//!
//! This path defines the semantics the fused kernel is checked against. It
//! consumes head-major tensors `[batch, heads, seq_len, head_dim]` and
//! supports grouped-query attention without repeating keys or values: the
//! query heads of each group are folded into the sequence axis so one key
//! head serves the whole group in a single batched matmul.

use candle_core::{DType, Tensor};
use candle_nn::ops::softmax_last_dim;

use crate::core::{
    Attention, AttentionError, AttentionParams, AttentionShape, Config, PrecisionPolicy,
    TensorLayout,
};
use crate::masks::{causal_bias, plan_mask, AttentionMask, MaskPlan};

/// Portable attention executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct SdpaAttention;

impl SdpaAttention {
    pub fn new() -> Self {
        Self
    }

    /// Run attention under an already-decided [`MaskPlan`].
    pub fn attend_with_plan(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        plan: &MaskPlan,
        config: &Config,
    ) -> Result<Tensor, AttentionError> {
        let shape = AttentionShape::validate(q, k, v, TensorLayout::HeadMajor)?;
        let AttentionShape {
            batch,
            q_len,
            k_len,
            num_heads,
            num_kv_heads,
            head_dim,
        } = shape;
        let group = shape.group_size();
        let dtype = q.dtype();
        if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }

        let work_dtype = match config.precision {
            PrecisionPolicy::ForceF32 => DType::F32,
            PrecisionPolicy::Inherit => dtype,
        };
        let q = q.to_dtype(work_dtype)?.contiguous()?;
        let k = k.to_dtype(work_dtype)?.contiguous()?;
        let v = v.to_dtype(work_dtype)?.contiguous()?;

        // [b, kv_heads, group * q_len, d]; query head h maps to kv head h / group.
        let q_grouped = q.reshape((batch, num_kv_heads, group * q_len, head_dim))?;
        let scale = config.scale_for(head_dim) as f64;
        let scores = q_grouped.matmul(&k.t()?)?.affine(scale, 0.0)?;

        // Rows with no visible key produce zeros, as the fused kernel does.
        let mut row_keep = None;
        let bias = match plan {
            MaskPlan::Unmasked => None,
            MaskPlan::CausalFast => Some(causal_bias(q.device(), q_len, k_len)?),
            MaskPlan::Explicit(mask) => {
                if mask.q_len() != q_len || mask.k_len() != k_len {
                    return Err(AttentionError::shape(format!(
                        "mask is {}x{}, scores are {q_len}x{k_len}",
                        mask.q_len(),
                        mask.k_len()
                    )));
                }
                let empty: Vec<bool> = (0..q_len).map(|row| mask.is_row_empty(row)).collect();
                if empty.iter().any(|&e| e) {
                    let keep: Vec<f32> = empty.iter().map(|&e| if e { 0.0 } else { 1.0 }).collect();
                    row_keep = Some(Tensor::from_vec(keep, (q_len, 1), q.device())?);
                    let opened = AttentionMask::from_fn(q_len, k_len, |row, col| {
                        empty[row] || mask.get(row, col)
                    });
                    Some(opened.to_additive(q.device())?)
                } else {
                    Some(mask.to_additive(q.device())?)
                }
            }
        };
        let scores = match bias {
            Some(bias) => scores
                .reshape((batch, num_kv_heads, group, q_len, k_len))?
                .broadcast_add(&bias.to_dtype(work_dtype)?)?
                .reshape((batch, num_kv_heads, group * q_len, k_len))?,
            None => scores,
        };

        let mut probs = softmax_last_dim(&scores)?;
        if let Some(keep) = row_keep {
            probs = probs
                .reshape((batch, num_kv_heads, group, q_len, k_len))?
                .broadcast_mul(&keep.to_dtype(work_dtype)?)?
                .reshape((batch, num_kv_heads, group * q_len, k_len))?;
        }
        let output = probs
            .matmul(&v)?
            .reshape((batch, num_heads, q_len, head_dim))?;
        Ok(output.to_dtype(dtype)?)
    }
}

impl Attention for SdpaAttention {
    fn layout(&self) -> TensorLayout {
        TensorLayout::HeadMajor
    }

    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        params: &AttentionParams,
        config: &Config,
    ) -> Result<Tensor, AttentionError> {
        let shape = AttentionShape::validate(q, k, v, TensorLayout::HeadMajor)?;
        if params.causal && shape.q_len > shape.k_len {
            return Err(AttentionError::shape(format!(
                "causal attention needs q_len <= k_len, got {} > {}",
                shape.q_len, shape.k_len
            )));
        }
        let plan = plan_mask(shape.q_len, shape.k_len, params.window, params.causal);
        log::trace!(
            "sdpa q_len={} k_len={} heads={}/{} plan={}",
            shape.q_len,
            shape.k_len,
            shape.num_heads,
            shape.num_kv_heads,
            match &plan {
                MaskPlan::CausalFast => "causal",
                MaskPlan::Unmasked => "unmasked",
                MaskPlan::Explicit(_) => "explicit",
            }
        );
        self.attend_with_plan(q, k, v, &plan, config)
    }
}
