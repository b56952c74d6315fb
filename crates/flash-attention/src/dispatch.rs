//! Unified attention entry point.
//!
//! [`FlashAttention`] owns both executors and decides per call which one runs.
//! Callers always pass batch-major `[batch, seq_len, heads, head_dim]` tensors
//! and get the same layout back, whichever executor served the call.

use std::sync::OnceLock;

use candle_core::Tensor;

use crate::backend::{capability, effective_selection, select_backend, Backend};
use crate::core::{
    Attention, AttentionError, AttentionParams, AttentionShape, BackendSelection, Config,
    TensorLayout,
};
use crate::fused::FusedAttention;
use crate::kv_cache::KvCache;
use crate::masks::WindowSize;
use crate::reference::SdpaAttention;

static DEFAULT_DISPATCHER: OnceLock<FlashAttention> = OnceLock::new();

/// Dispatcher over the fused kernel and the portable fallback.
#[derive(Debug)]
pub struct FlashAttention {
    config: Config,
    capability: bool,
    fallback: SdpaAttention,
    fused: FusedAttention,
    first_call: OnceLock<()>,
}

impl FlashAttention {
    /// Dispatcher using the process-wide capability probe.
    pub fn new(config: Config) -> Self {
        Self::with_capability(config, capability())
    }

    /// Dispatcher with an explicit capability flag instead of the probe.
    pub fn with_capability(config: Config, capability: bool) -> Self {
        Self {
            config,
            capability,
            fallback: SdpaAttention::new(),
            fused: FusedAttention::new(),
            first_call: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn capability(&self) -> bool {
        self.capability
    }

    /// Executor that would serve a call with query `q`.
    ///
    /// In automatic mode a query the kernel cannot take (CPU tensors, `f32`)
    /// goes to the fallback. A forced fused selection is never downgraded.
    pub fn backend_for(&self, q: &Tensor) -> Result<Backend, AttentionError> {
        let selection = effective_selection(&self.config);
        let backend = select_backend(selection, self.capability)?;
        if backend == Backend::Fused
            && selection == BackendSelection::Auto
            && !FusedAttention::accepts(q)
        {
            return Ok(Backend::Fallback);
        }
        Ok(backend)
    }

    /// Full-sequence attention.
    ///
    /// `q` is `[batch, q_len, heads, head_dim]`; `k` and `v` are
    /// `[batch, k_len, kv_heads, head_dim]`. With `causal`, queries align to
    /// the last `q_len` keys and `q_len > k_len` is rejected.
    pub fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        causal: bool,
        window: WindowSize,
    ) -> Result<Tensor, AttentionError> {
        let params = AttentionParams { causal, window };
        let shape = check_call(q, k, v, &params)?;
        let backend = self.backend_for(q)?;
        self.trace_dispatch(backend, &shape, &params);
        match backend {
            Backend::Fused => execute(&self.fused, q, k, v, &params, &self.config),
            Backend::Fallback => execute(&self.fallback, q, k, v, &params, &self.config),
        }
    }

    /// Incremental attention against a preallocated cache.
    ///
    /// Every batch element must report the same `cache_seqlens` entry, the
    /// position new keys are written at. `new_k` and `new_v` come together or
    /// not at all; when present they are written into the cache before
    /// attending. Attention covers only the valid prefix, so the unwritten
    /// tail is never read.
    ///
    /// All validation runs before the write: a rejected call, including
    /// [`AttentionError::CacheOverflow`], leaves the cache untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn attend_with_kvcache(
        &self,
        q: &Tensor,
        cache: &mut KvCache,
        new_k: Option<&Tensor>,
        new_v: Option<&Tensor>,
        cache_seqlens: &[usize],
        causal: bool,
        window: WindowSize,
    ) -> Result<Tensor, AttentionError> {
        let position = uniform_position(cache_seqlens, cache.layout().batch)?;
        let params = AttentionParams { causal, window };
        let update = match (new_k, new_v) {
            (Some(new_k), Some(new_v)) => Some((new_k, new_v)),
            (None, None) => None,
            _ => {
                return Err(AttentionError::shape(
                    "new_k and new_v must be supplied together",
                ))
            }
        };
        let new_tokens = match update {
            Some((new_k, _)) => new_k.dims4().map_err(|_| {
                AttentionError::shape(format!(
                    "new keys must have shape [batch, t_new, kv_heads, head_dim], got {:?}",
                    new_k.dims()
                ))
            })?.1,
            None => 0,
        };
        let valid_len = position + new_tokens;
        if valid_len > cache.capacity() {
            return Err(AttentionError::CacheOverflow {
                position,
                new_tokens,
                capacity: cache.capacity(),
            });
        }

        // The prefix views carry the post-write geometry, so `q` is checked
        // against the cache before anything is written.
        let (keys, values) = cache.prefix(valid_len)?;
        let shape = check_call(q, &keys, &values, &params)?;
        let backend = self.backend_for(q)?;
        if backend == Backend::Fused {
            FusedAttention::check_query(q)?;
        }

        if let Some((new_k, new_v)) = update {
            cache.write(position, new_k, new_v)?;
        }
        self.trace_dispatch(backend, &shape, &params);
        match backend {
            Backend::Fused => {
                self.fused
                    .attend_with_kvcache(q, cache, valid_len, &params, &self.config)
            }
            Backend::Fallback => {
                let (keys, values) = cache.prefix(valid_len)?;
                execute(&self.fallback, q, &keys, &values, &params, &self.config)
            }
        }
    }

    fn trace_dispatch(&self, backend: Backend, shape: &AttentionShape, params: &AttentionParams) {
        if self.first_call.set(()).is_ok() {
            log::info!(
                "flash-attention init backend={:?} override={:?} capability={} precision={:?} scale={:?} selected={}",
                self.config.backend,
                crate::backend::backend_override(),
                self.capability,
                self.config.precision,
                self.config.softmax_scale,
                backend
            );
        }
        log::debug!(
            "attention dispatch backend={backend} batch={} q_len={} k_len={} heads={}/{} causal={} window=({}, {})",
            shape.batch,
            shape.q_len,
            shape.k_len,
            shape.num_heads,
            shape.num_kv_heads,
            params.causal,
            params.window.left,
            params.window.right
        );
    }
}

impl Default for FlashAttention {
    fn default() -> Self {
        Self::new(Config::from_env())
    }
}

/// [`FlashAttention::attend`] on a process-wide dispatcher built from the
/// environment.
pub fn flash_attn_func(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    causal: bool,
    window: WindowSize,
) -> Result<Tensor, AttentionError> {
    default_dispatcher().attend(q, k, v, causal, window)
}

/// [`FlashAttention::attend_with_kvcache`] on a process-wide dispatcher built
/// from the environment.
pub fn flash_attn_with_kvcache(
    q: &Tensor,
    cache: &mut KvCache,
    new_k: Option<&Tensor>,
    new_v: Option<&Tensor>,
    cache_seqlens: &[usize],
    causal: bool,
    window: WindowSize,
) -> Result<Tensor, AttentionError> {
    default_dispatcher().attend_with_kvcache(q, cache, new_k, new_v, cache_seqlens, causal, window)
}

fn default_dispatcher() -> &'static FlashAttention {
    DEFAULT_DISPATCHER.get_or_init(FlashAttention::default)
}

fn check_call(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    params: &AttentionParams,
) -> Result<AttentionShape, AttentionError> {
    let shape = AttentionShape::validate(q, k, v, TensorLayout::BatchMajor)?;
    if params.causal && shape.q_len > shape.k_len {
        return Err(AttentionError::shape(format!(
            "causal attention needs q_len <= k_len, got {} > {}",
            shape.q_len, shape.k_len
        )));
    }
    Ok(shape)
}

/// Convert batch-major inputs into the executor's layout and back.
fn execute<A: Attention>(
    executor: &A,
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    params: &AttentionParams,
    config: &Config,
) -> Result<Tensor, AttentionError> {
    let public = TensorLayout::BatchMajor;
    let target = executor.layout();
    let q = public.convert(q, target)?;
    let k = public.convert(k, target)?;
    let v = public.convert(v, target)?;
    let output = executor.attend(&q, &k, &v, params, config)?;
    target.convert(&output, public)
}

fn uniform_position(cache_seqlens: &[usize], batch: usize) -> Result<usize, AttentionError> {
    if cache_seqlens.len() != batch {
        return Err(AttentionError::shape(format!(
            "cache_seqlens has {} entries for a batch of {batch}",
            cache_seqlens.len()
        )));
    }
    let Some(&position) = cache_seqlens.first() else {
        return Err(AttentionError::shape("cache_seqlens is empty"));
    };
    if cache_seqlens.iter().any(|&len| len != position) {
        return Err(AttentionError::shape(format!(
            "ragged cache_seqlens {cache_seqlens:?} are not supported; every batch element must share one position"
        )));
    }
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::OverrideGuard;
    use crate::kv_cache::CacheLayout;
    use candle_core::{DType, Device};
    use serial_test::serial;

    fn inputs(q_len: usize, k_len: usize) -> (Tensor, Tensor, Tensor) {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1.0, (2, q_len, 4, 8), &device).unwrap();
        let k = Tensor::randn(0f32, 1.0, (2, k_len, 2, 8), &device).unwrap();
        let v = Tensor::randn(0f32, 1.0, (2, k_len, 2, 8), &device).unwrap();
        (q, k, v)
    }

    fn max_diff(a: &Tensor, b: &Tensor) -> f32 {
        a.sub(b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    #[test]
    #[serial(backend_override)]
    fn fallback_round_trips_public_layout() {
        let (q, k, v) = inputs(5, 5);
        let dispatcher = FlashAttention::with_capability(Config::default(), false);
        let out = dispatcher.attend(&q, &k, &v, true, WindowSize::UNBOUNDED).unwrap();
        assert_eq!(out.dims(), q.dims());

        let head_major = |t: &Tensor| t.transpose(1, 2).unwrap().contiguous().unwrap();
        let expected = SdpaAttention
            .attend(
                &head_major(&q),
                &head_major(&k),
                &head_major(&v),
                &AttentionParams::causal(),
                &Config::default(),
            )
            .unwrap();
        assert!(max_diff(&head_major(&out), &expected) < 1e-6);
    }

    #[test]
    #[serial(backend_override)]
    fn auto_routes_cpu_queries_to_fallback() {
        let (q, _, _) = inputs(1, 1);
        let dispatcher = FlashAttention::with_capability(Config::default(), true);
        assert_eq!(dispatcher.backend_for(&q).unwrap(), Backend::Fallback);
    }

    #[test]
    #[serial(backend_override)]
    fn forced_fused_is_never_downgraded() {
        let (q, k, v) = inputs(3, 3);
        let config = Config {
            backend: BackendSelection::FusedOnly,
            ..Config::default()
        };
        let capable = FlashAttention::with_capability(config.clone(), true);
        assert_eq!(capable.backend_for(&q).unwrap(), Backend::Fused);
        assert!(matches!(
            capable.attend(&q, &k, &v, true, WindowSize::UNBOUNDED),
            Err(AttentionError::UnsupportedDType { .. })
        ));

        let incapable = FlashAttention::with_capability(config, false);
        assert!(matches!(
            incapable.attend(&q, &k, &v, true, WindowSize::UNBOUNDED),
            Err(AttentionError::Configuration { .. })
        ));
    }

    #[test]
    #[serial(backend_override)]
    fn causal_rejects_more_queries_than_keys() {
        let (q, k, v) = inputs(4, 3);
        let dispatcher = FlashAttention::with_capability(Config::default(), false);
        assert!(matches!(
            dispatcher.attend(&q, &k, &v, true, WindowSize::UNBOUNDED),
            Err(AttentionError::InvalidShape { .. })
        ));
        let out = dispatcher.attend(&q, &k, &v, false, WindowSize::UNBOUNDED).unwrap();
        assert_eq!(out.dims(), q.dims());
    }

    #[test]
    #[serial(backend_override)]
    fn kvcache_rejects_ragged_and_half_supplied_updates() {
        let dispatcher = FlashAttention::with_capability(Config::default(), false);
        let mut cache =
            KvCache::new(CacheLayout::new(2, 8, 2, 8), DType::F32, &Device::Cpu).unwrap();
        let (q, k, v) = inputs(1, 1);

        assert!(matches!(
            dispatcher.attend_with_kvcache(
                &q,
                &mut cache,
                Some(&k),
                Some(&v),
                &[2, 3],
                true,
                WindowSize::UNBOUNDED
            ),
            Err(AttentionError::InvalidShape { .. })
        ));
        assert!(matches!(
            dispatcher.attend_with_kvcache(
                &q,
                &mut cache,
                Some(&k),
                None,
                &[0, 0],
                true,
                WindowSize::UNBOUNDED
            ),
            Err(AttentionError::InvalidShape { .. })
        ));
        let untouched = cache.keys().abs().unwrap().sum_all().unwrap();
        assert_eq!(untouched.to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    #[serial(backend_override)]
    fn kvcache_checks_query_before_writing() {
        let dispatcher = FlashAttention::with_capability(Config::default(), false);
        let mut cache =
            KvCache::new(CacheLayout::new(1, 8, 1, 8), DType::F32, &Device::Cpu).unwrap();
        let ones = Tensor::ones((1, 2, 1, 8), DType::F32, &Device::Cpu).unwrap();
        let narrow_q = Tensor::ones((1, 2, 1, 4), DType::F32, &Device::Cpu).unwrap();

        let err = dispatcher
            .attend_with_kvcache(
                &narrow_q,
                &mut cache,
                Some(&ones),
                Some(&ones),
                &[0],
                true,
                WindowSize::UNBOUNDED,
            )
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
        let untouched = cache.keys().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(untouched, 0.0);
    }

    #[test]
    #[serial(backend_override)]
    fn kvcache_matches_full_attention_over_prefix() {
        let dispatcher = FlashAttention::with_capability(Config::default(), false);
        let mut cache =
            KvCache::new(CacheLayout::new(2, 8, 2, 8), DType::F32, &Device::Cpu).unwrap();
        let (q, k, v) = inputs(3, 3);

        let out = dispatcher
            .attend_with_kvcache(
                &q,
                &mut cache,
                Some(&k),
                Some(&v),
                &[0, 0],
                true,
                WindowSize::UNBOUNDED,
            )
            .unwrap();
        let full = dispatcher.attend(&q, &k, &v, true, WindowSize::UNBOUNDED).unwrap();
        assert!(max_diff(&out, &full) < 1e-6);

        let q_last = q.narrow(1, 2, 1).unwrap();
        let no_update = dispatcher
            .attend_with_kvcache(
                &q_last,
                &mut cache,
                None,
                None,
                &[3, 3],
                true,
                WindowSize::UNBOUNDED,
            )
            .unwrap();
        assert!(max_diff(&no_update, &full.narrow(1, 2, 1).unwrap()) < 1e-5);
    }
}
