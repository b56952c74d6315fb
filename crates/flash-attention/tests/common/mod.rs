//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use candle_core::{DType, Device, Tensor};
use flash_attention::{Config, FlashAttention};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Host-side q/k/v in batch-major layout, kept as plain vectors so tests can
/// perturb individual positions before building tensors.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub batch: usize,
    pub q_len: usize,
    pub k_len: usize,
    pub heads: usize,
    pub kv_heads: usize,
    pub head_dim: usize,
    pub q: Vec<f32>,
    pub k: Vec<f32>,
    pub v: Vec<f32>,
}

impl Inputs {
    pub fn random(
        seed: u64,
        batch: usize,
        q_len: usize,
        k_len: usize,
        heads: usize,
        kv_heads: usize,
        head_dim: usize,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sample = |len: usize| -> Vec<f32> {
            (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
        };
        let q = sample(batch * q_len * heads * head_dim);
        let k = sample(batch * k_len * kv_heads * head_dim);
        let v = sample(batch * k_len * kv_heads * head_dim);
        Self {
            batch,
            q_len,
            k_len,
            heads,
            kv_heads,
            head_dim,
            q,
            k,
            v,
        }
    }

    pub fn square(seed: u64, seq_len: usize) -> Self {
        Self::random(seed, 2, seq_len, seq_len, 4, 2, 8)
    }

    pub fn tensors(&self) -> (Tensor, Tensor, Tensor) {
        let device = Device::Cpu;
        let q_shape = (self.batch, self.q_len, self.heads, self.head_dim);
        let kv_shape = (self.batch, self.k_len, self.kv_heads, self.head_dim);
        let q = Tensor::from_vec(self.q.clone(), q_shape, &device).unwrap();
        let k = Tensor::from_vec(self.k.clone(), kv_shape, &device).unwrap();
        let v = Tensor::from_vec(self.v.clone(), kv_shape, &device).unwrap();
        (q, k, v)
    }

    fn kv_offset(&self, b: usize, t: usize, h: usize) -> usize {
        ((b * self.k_len + t) * self.kv_heads + h) * self.head_dim
    }

    /// Add `delta` to every key and value at key position `t`.
    pub fn perturb_key(&mut self, t: usize, delta: f32) {
        for b in 0..self.batch {
            for h in 0..self.kv_heads {
                let start = self.kv_offset(b, t, h);
                for x in start..start + self.head_dim {
                    self.k[x] += delta;
                    self.v[x] += delta;
                }
            }
        }
    }

    /// Add `delta` to every value at key position `t`.
    pub fn perturb_value(&mut self, t: usize, delta: f32) {
        for b in 0..self.batch {
            for h in 0..self.kv_heads {
                let start = self.kv_offset(b, t, h);
                for x in start..start + self.head_dim {
                    self.v[x] += delta;
                }
            }
        }
    }

    /// Value vector for key position `t` as seen by query head `h`.
    pub fn value_row(&self, b: usize, t: usize, h: usize) -> &[f32] {
        let kv_head = h / (self.heads / self.kv_heads);
        let start = self.kv_offset(b, t, kv_head);
        &self.v[start..start + self.head_dim]
    }

    /// Scalar softmax attention over the visible keys, batch-major output.
    pub fn naive(&self, visible: impl Fn(usize, usize) -> bool) -> Vec<f32> {
        let group = self.heads / self.kv_heads;
        let scale = 1.0 / (self.head_dim as f32).sqrt();
        let mut out = vec![0f32; self.batch * self.q_len * self.heads * self.head_dim];
        for b in 0..self.batch {
            for t in 0..self.q_len {
                for h in 0..self.heads {
                    let kh = h / group;
                    let q_start = ((b * self.q_len + t) * self.heads + h) * self.head_dim;
                    let query = &self.q[q_start..q_start + self.head_dim];
                    let scores: Vec<Option<f32>> = (0..self.k_len)
                        .map(|j| {
                            visible(t, j).then(|| {
                                let k_start = self.kv_offset(b, j, kh);
                                let key = &self.k[k_start..k_start + self.head_dim];
                                query.iter().zip(key).map(|(x, y)| x * y).sum::<f32>() * scale
                            })
                        })
                        .collect();
                    let max = scores
                        .iter()
                        .flatten()
                        .fold(f32::NEG_INFINITY, |acc, s| acc.max(*s));
                    let weights: Vec<f32> = scores
                        .iter()
                        .map(|s| s.map_or(0.0, |s| (s - max).exp()))
                        .collect();
                    let denom: f32 = weights.iter().sum();
                    for (j, w) in weights.iter().enumerate() {
                        if *w == 0.0 {
                            continue;
                        }
                        let v_start = self.kv_offset(b, j, kh);
                        for x in 0..self.head_dim {
                            out[q_start + x] += w / denom * self.v[v_start + x];
                        }
                    }
                }
            }
        }
        out
    }

    /// Largest difference between two batch-major outputs at query row `t`.
    pub fn row_diff(&self, a: &[f32], b: &[f32], t: usize) -> f32 {
        let mut max = 0f32;
        for batch in 0..self.batch {
            let start = ((batch * self.q_len + t) * self.heads) * self.head_dim;
            let end = start + self.heads * self.head_dim;
            for (x, y) in a[start..end].iter().zip(&b[start..end]) {
                max = max.max((x - y).abs());
            }
        }
        max
    }
}

/// Dispatcher pinned to the portable path.
pub fn fallback() -> FlashAttention {
    FlashAttention::with_capability(Config::default(), false)
}

pub fn to_vec(t: &Tensor) -> Vec<f32> {
    t.to_dtype(DType::F32)
        .unwrap()
        .flatten_all()
        .unwrap()
        .to_vec1::<f32>()
        .unwrap()
}

pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .fold(0f32, |acc, (x, y)| acc.max((x - y).abs()))
}
