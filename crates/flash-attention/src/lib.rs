//! Unified scaled dot-product attention with a fused fast path.
//!
//! [`FlashAttention`] accepts batch-major tensors `[batch, seq_len, heads,
//! head_dim]` and routes each call to one of two executors:
//!
//! * the fused flash-attention kernel (`fused` cargo feature, CUDA devices with
//!   compute capability 8.0 or newer, `f16`/`bf16` inputs), or
//! * a portable fallback built on candle's dense ops, which defines the
//!   reference semantics.
//!
//! Both paths support causal masking aligned to the most recent keys,
//! sliding-window attention through [`WindowSize`], grouped-query attention
//! and incremental decoding against a preallocated [`KvCache`].
//!
//! Availability is probed once per process ([`capability`]). A
//! [`Config::backend`] preference or the process-wide [`OverrideGuard`] can pin
//! either executor; forcing the fused kernel where it cannot run is an error
//! rather than a silent fallback.

pub mod backend;
pub mod core;
pub mod dispatch;
pub mod fused;
pub mod kv_cache;
pub mod masks;
pub mod reference;

pub use backend::{
    backend_override, capability, probe, select_backend, set_backend_override, Backend,
    OverrideGuard, ProbeOutcome,
};
pub use core::{
    Attention, AttentionError, AttentionParams, BackendSelection, Config, PrecisionPolicy,
    TensorLayout,
};
pub use dispatch::{flash_attn_func, flash_attn_with_kvcache, FlashAttention};
pub use fused::FusedAttention;
pub use kv_cache::{CacheLayout, KvCache};
pub use masks::{build_mask, plan_mask, AttentionMask, MaskPlan, WindowSize};
pub use reference::SdpaAttention;
