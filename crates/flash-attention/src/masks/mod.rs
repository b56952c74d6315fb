//! Mask and sliding-window policy for the fallback executor.
//!
//! [`plan_mask`] reduces `(q_len, k_len, window, causal)` to a [`MaskPlan`].
//! Explicit plans carry a boolean [`AttentionMask`] (`true` = may attend)
//! which the executor turns into an additive tensor with dtype
//! [`MASK_DTYPE`]: `0.0` where attention is permitted and
//! `f32::NEG_INFINITY` otherwise.

pub mod causal;
pub mod policy;
pub mod window;

use candle_core::{DType, Device, Result, Tensor};

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

pub use causal::causal_bias;
pub use policy::{build_mask, plan_mask, MaskPlan};
pub use window::WindowSize;

/// Row-major boolean attention matrix shaped `(q_len, k_len)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttentionMask {
    q_len: usize,
    k_len: usize,
    allowed: Vec<bool>,
}

impl AttentionMask {
    /// Build a mask by evaluating `allow(row, col)` for every cell.
    pub fn from_fn(q_len: usize, k_len: usize, allow: impl Fn(usize, usize) -> bool) -> Self {
        let mut allowed = Vec::with_capacity(q_len * k_len);
        for row in 0..q_len {
            for col in 0..k_len {
                allowed.push(allow(row, col));
            }
        }
        Self {
            q_len,
            k_len,
            allowed,
        }
    }

    /// Causal mask with queries aligned to the last `q_len` keys.
    pub fn causal(q_len: usize, k_len: usize) -> Self {
        let offset = k_len.saturating_sub(q_len);
        Self::from_fn(q_len, k_len, |row, col| col <= row + offset)
    }

    pub fn all_visible(q_len: usize, k_len: usize) -> Self {
        Self::from_fn(q_len, k_len, |_, _| true)
    }

    /// Whether `row` may attend to no key at all.
    pub fn is_row_empty(&self, row: usize) -> bool {
        !self.row(row).iter().any(|&ok| ok)
    }

    pub fn q_len(&self) -> usize {
        self.q_len
    }

    pub fn k_len(&self) -> usize {
        self.k_len
    }

    /// # Panics
    /// Panics when `row` or `col` is out of range.
    pub fn get(&self, row: usize, col: usize) -> bool {
        assert!(row < self.q_len && col < self.k_len, "mask index out of range");
        self.allowed[row * self.k_len + col]
    }

    pub fn row(&self, row: usize) -> &[bool] {
        &self.allowed[row * self.k_len..(row + 1) * self.k_len]
    }

    /// Keys visible to `row`, in ascending order.
    pub fn visible(&self, row: usize) -> Vec<usize> {
        self.row(row)
            .iter()
            .enumerate()
            .filter_map(|(col, &ok)| ok.then_some(col))
            .collect()
    }

    /// Additive `[q_len, k_len]` tensor with dtype [`MASK_DTYPE`].
    pub fn to_additive(&self, device: &Device) -> Result<Tensor> {
        let data: Vec<f32> = self
            .allowed
            .iter()
            .map(|&ok| if ok { 0.0 } else { f32::NEG_INFINITY })
            .collect();
        Tensor::from_vec(data, (self.q_len, self.k_len), device)
    }
}
