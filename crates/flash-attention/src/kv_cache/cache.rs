//! Preallocated key/value cache for incremental decoding.
//!
//! Both buffers are allocated once per generation session. Each decode step
//! writes its new keys and values into `[position, position + new_tokens)` in
//! place and attention reads back only the valid prefix, so the zero-filled
//! tail is never observed.
//!
//! One generation stream drives one cache. Writes take `&mut self` and the
//! type is `!Sync`; sharing a cache across threads needs external
//! synchronisation by the caller.

use std::cell::Cell;
use std::marker::PhantomData;

use candle_core::{DType, Device, Tensor};

use crate::core::AttentionError;
use crate::kv_cache::layout::CacheLayout;

#[derive(Debug)]
pub struct KvCache {
    layout: CacheLayout,
    keys: Tensor,
    values: Tensor,
    _not_sync: PhantomData<Cell<()>>,
}

impl KvCache {
    /// Allocate zeroed key and value buffers for `layout`.
    pub fn new(layout: CacheLayout, dtype: DType, device: &Device) -> Result<Self, AttentionError> {
        if layout.max_seq_len == 0 || layout.num_kv_heads == 0 || layout.head_dim == 0 {
            return Err(AttentionError::shape(format!(
                "cache layout must be non-empty, got {layout:?}"
            )));
        }
        let keys = Tensor::zeros(layout.shape(), dtype, device)?;
        let values = Tensor::zeros(layout.shape(), dtype, device)?;
        log::info!(
            "kv-cache init: batch={} max_seq_len={} kv_heads={} head_dim={} dtype={:?}",
            layout.batch,
            layout.max_seq_len,
            layout.num_kv_heads,
            layout.head_dim,
            dtype
        );
        Ok(Self {
            layout,
            keys,
            values,
            _not_sync: PhantomData,
        })
    }

    /// Wrap caller-allocated buffers shaped `[batch, max_seq_len, kv_heads, head_dim]`.
    pub fn from_tensors(keys: Tensor, values: Tensor) -> Result<Self, AttentionError> {
        let (batch, max_seq_len, num_kv_heads, head_dim) =
            keys.dims4().map_err(|_| {
                AttentionError::shape(format!(
                    "k_cache must have shape [batch, max_seq_len, kv_heads, head_dim], got {:?}",
                    keys.dims()
                ))
            })?;
        if values.dims() != keys.dims() {
            return Err(AttentionError::shape(format!(
                "v_cache shape {:?} must match k_cache shape {:?}",
                values.dims(),
                keys.dims()
            )));
        }
        if keys.dtype() != values.dtype() || !keys.device().same_device(values.device()) {
            return Err(AttentionError::shape(
                "k_cache and v_cache must share dtype and device",
            ));
        }
        if !keys.is_contiguous() || !values.is_contiguous() {
            return Err(AttentionError::shape("cache buffers must be contiguous"));
        }
        Ok(Self {
            layout: CacheLayout::new(batch, max_seq_len, num_kv_heads, head_dim),
            keys,
            values,
            _not_sync: PhantomData,
        })
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn capacity(&self) -> usize {
        self.layout.max_seq_len
    }

    pub fn dtype(&self) -> DType {
        self.keys.dtype()
    }

    pub fn device(&self) -> &Device {
        self.keys.device()
    }

    /// The full key buffer, including any unwritten tail.
    pub fn keys(&self) -> &Tensor {
        &self.keys
    }

    /// The full value buffer, including any unwritten tail.
    pub fn values(&self) -> &Tensor {
        &self.values
    }

    /// Copy `new_k`/`new_v` (`[batch, t_new, kv_heads, head_dim]`) into the
    /// buffers starting at `position`, without reallocating.
    ///
    /// Fails with [`AttentionError::CacheOverflow`] when
    /// `position + t_new > max_seq_len`; nothing is written in that case.
    pub fn write(
        &mut self,
        position: usize,
        new_k: &Tensor,
        new_v: &Tensor,
    ) -> Result<(), AttentionError> {
        let (batch, t_new, heads, head_dim) = new_k.dims4().map_err(|_| {
            AttentionError::shape(format!(
                "new keys must have shape [batch, t_new, kv_heads, head_dim], got {:?}",
                new_k.dims()
            ))
        })?;
        if new_v.dims() != new_k.dims() {
            return Err(AttentionError::shape(format!(
                "new values {:?} must match new keys {:?}",
                new_v.dims(),
                new_k.dims()
            )));
        }
        let layout = self.layout;
        if batch != layout.batch || heads != layout.num_kv_heads || head_dim != layout.head_dim {
            return Err(AttentionError::shape(format!(
                "new keys shape mismatch: expected {:?}, got {:?}",
                layout.slab(t_new),
                new_k.dims()
            )));
        }
        if new_k.dtype() != self.dtype() || new_v.dtype() != self.dtype() {
            return Err(AttentionError::UnsupportedDType {
                requested: format!(
                    "cache stores {:?}, new keys/values are {:?}/{:?}",
                    self.dtype(),
                    new_k.dtype(),
                    new_v.dtype()
                ),
            });
        }
        if position + t_new > layout.max_seq_len {
            return Err(AttentionError::CacheOverflow {
                position,
                new_tokens: t_new,
                capacity: layout.max_seq_len,
            });
        }
        if t_new == 0 {
            return Ok(());
        }

        self.keys.slice_set(&new_k.contiguous()?, 1, position)?;
        self.values.slice_set(&new_v.contiguous()?, 1, position)?;
        Ok(())
    }

    /// Views of the first `len` positions of both buffers.
    pub fn prefix(&self, len: usize) -> Result<(Tensor, Tensor), AttentionError> {
        if len > self.layout.max_seq_len {
            return Err(AttentionError::shape(format!(
                "prefix length {len} exceeds cache capacity {}",
                self.layout.max_seq_len
            )));
        }
        Ok((self.keys.narrow(1, 0, len)?, self.values.narrow(1, 0, len)?))
    }

    /// Zero both buffers in place so the cache can serve a new session.
    pub fn clear(&mut self) -> Result<(), AttentionError> {
        self.keys.slice_set(&self.keys.zeros_like()?, 1, 0)?;
        self.values.slice_set(&self.values.zeros_like()?, 1, 0)?;
        Ok(())
    }
}
