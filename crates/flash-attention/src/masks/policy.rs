//! Decide how the fallback executor masks a call.
//!
//! Explicit masks cost an `O(q_len * k_len)` allocation, so the policy
//! returns a fast-path tag whenever the executor can do without one.

use super::{AttentionMask, WindowSize};

/// Masking decision consumed by the fallback executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskPlan {
    /// Plain causal attention over a square score matrix.
    CausalFast,
    /// Every query sees every key.
    Unmasked,
    /// Use the supplied boolean matrix.
    Explicit(AttentionMask),
}

impl MaskPlan {
    pub fn is_explicit(&self) -> bool {
        matches!(self, MaskPlan::Explicit(_))
    }

    /// Whether query `row` may attend to key `col` under this plan.
    #[cfg(test)]
    pub(crate) fn allows(&self, row: usize, col: usize, q_len: usize, k_len: usize) -> bool {
        match self {
            MaskPlan::CausalFast => col + q_len <= row + k_len,
            MaskPlan::Unmasked => true,
            MaskPlan::Explicit(mask) => mask.get(row, col),
        }
    }
}

/// Plan the mask for a call with `q_len` queries against `k_len` keys.
///
/// Causal rules, first match wins:
/// 1. square and the window covers every causal prefix: [`MaskPlan::CausalFast`];
/// 2. a single query: [`MaskPlan::Unmasked`], since every cached key precedes it;
/// 3. square: causal triangle with keys more than `left` steps back removed;
/// 4. `q_len < k_len`: the cached prefix is fully visible and the trailing
///    square block is causal.
///
/// The caller rejects causal calls with `q_len > k_len` before planning.
/// Non-causal calls are unmasked unless a window bounds them.
pub fn plan_mask(q_len: usize, k_len: usize, window: WindowSize, causal: bool) -> MaskPlan {
    if !causal {
        if window.is_unbounded() {
            return MaskPlan::Unmasked;
        }
        return MaskPlan::Explicit(windowed_mask(q_len, k_len, window));
    }

    if q_len == k_len && window.covers(q_len) {
        return MaskPlan::CausalFast;
    }
    if q_len == 1 {
        return MaskPlan::Unmasked;
    }
    if q_len == k_len {
        let left = window.left_bound().unwrap_or(usize::MAX);
        return MaskPlan::Explicit(AttentionMask::from_fn(q_len, k_len, |row, col| {
            col <= row && row - col <= left
        }));
    }

    let prefix_len = k_len.saturating_sub(q_len);
    MaskPlan::Explicit(AttentionMask::from_fn(q_len, k_len, |row, col| {
        col < prefix_len || col - prefix_len <= row
    }))
}

/// Causal mask for `(q_len, k_len)`, or `None` when a fast path applies.
pub fn build_mask(q_len: usize, k_len: usize, window: WindowSize) -> Option<AttentionMask> {
    match plan_mask(q_len, k_len, window, true) {
        MaskPlan::Explicit(mask) => Some(mask),
        MaskPlan::CausalFast | MaskPlan::Unmasked => None,
    }
}

fn windowed_mask(q_len: usize, k_len: usize, window: WindowSize) -> AttentionMask {
    let offset = k_len as i64 - q_len as i64;
    AttentionMask::from_fn(q_len, k_len, |row, col| {
        let query_pos = row as i64 + offset;
        let col = col as i64;
        let left_ok = window.left < 0 || query_pos - col <= window.left;
        let right_ok = window.right < 0 || col - query_pos <= window.right;
        left_ok && right_ok
    })
}
