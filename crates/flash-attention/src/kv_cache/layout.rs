//! Layout definitions for key/value caches.
//!
//! Cache buffers are batch-major: `[batch, max_seq_len, num_kv_heads, head_dim]`,
//! the same axis order callers use for keys and values.

/// Declarative description of a cache layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLayout {
    /// Number of sequences decoded together.
    pub batch: usize,
    /// Maximum sequence length captured by the cache.
    pub max_seq_len: usize,
    /// Number of key/value heads stored in the cache.
    pub num_kv_heads: usize,
    /// Dimensionality of each head.
    pub head_dim: usize,
}

impl CacheLayout {
    pub fn new(batch: usize, max_seq_len: usize, num_kv_heads: usize, head_dim: usize) -> Self {
        Self {
            batch,
            max_seq_len,
            num_kv_heads,
            head_dim,
        }
    }

    /// Buffer shape as a candle shape tuple.
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        (self.batch, self.max_seq_len, self.num_kv_heads, self.head_dim)
    }

    /// Shape of a `seq_len`-token slab compatible with this cache.
    pub fn slab(&self, seq_len: usize) -> (usize, usize, usize, usize) {
        (self.batch, seq_len, self.num_kv_heads, self.head_dim)
    }
}
