//! Configuration options shared by the dispatcher and both executors.
//!
//! The [`Config`] struct captures run-time knobs that callers can tune without
//! swapping implementations. [`Config::apply_env_overrides`] lets deployments
//! pin a backend or precision through the environment.

use std::str::FromStr;

/// Environment variable selecting the backend (`auto`, `fused`, `fallback`).
pub const BACKEND_ENV: &str = "FLASH_ATTENTION_BACKEND";
/// Environment variable selecting the precision policy (`f32`, `inherit`).
pub const PRECISION_ENV: &str = "FLASH_ATTENTION_PRECISION";

/// Which executor the dispatcher is allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendSelection {
    /// Fused when the capability probe succeeded, fallback otherwise.
    #[default]
    Auto,
    /// Always the fused kernel; an error when it is unavailable.
    FusedOnly,
    /// Always the portable fallback.
    ReferenceOnly,
}

impl BackendSelection {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::FusedOnly => 1,
            Self::ReferenceOnly => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::FusedOnly,
            2 => Self::ReferenceOnly,
            _ => Self::Auto,
        }
    }
}

impl FromStr for BackendSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "fused" | "fa" | "flash" => Ok(Self::FusedOnly),
            "fallback" | "sdpa" | "reference" => Ok(Self::ReferenceOnly),
            other => Err(format!("unknown attention backend '{other}'")),
        }
    }
}

/// Numeric policy for the fallback executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrecisionPolicy {
    /// Upcast to `f32` for scores, softmax and accumulation.
    #[default]
    ForceF32,
    /// Compute in the input dtype.
    Inherit,
}

impl FromStr for PrecisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "f32" | "force_f32" | "fp32" => Ok(Self::ForceF32),
            "inherit" => Ok(Self::Inherit),
            other => Err(format!("unknown precision policy '{other}'")),
        }
    }
}

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    /// Backend preference. The process-wide override takes precedence when it
    /// is not [`BackendSelection::Auto`].
    pub backend: BackendSelection,
    /// Accumulation policy for the fallback path.
    pub precision: PrecisionPolicy,
    /// Softmax scale; `None` means `1 / sqrt(head_dim)`.
    pub softmax_scale: Option<f32>,
}

impl Config {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    /// Overwrite fields from [`BACKEND_ENV`] and [`PRECISION_ENV`].
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var(BACKEND_ENV) {
            match raw.parse() {
                Ok(backend) => self.backend = backend,
                Err(err) => log::warn!("ignoring {BACKEND_ENV}: {err}"),
            }
        }
        if let Ok(raw) = std::env::var(PRECISION_ENV) {
            match raw.parse() {
                Ok(precision) => self.precision = precision,
                Err(err) => log::warn!("ignoring {PRECISION_ENV}: {err}"),
            }
        }
    }

    /// Softmax scale to use for the given head dimension.
    pub fn scale_for(&self, head_dim: usize) -> f32 {
        self.softmax_scale
            .unwrap_or_else(|| 1.0 / (head_dim as f32).sqrt())
    }
}
