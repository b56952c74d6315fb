//! One-shot detection of fused-kernel support.
//!
//! The kernel needs the `fused` cargo feature, a reachable CUDA device and a
//! compute capability of at least [`MIN_COMPUTE_MAJOR`]. Every failure along
//! the way degrades to the fallback path instead of surfacing an error.

use std::fmt;
use std::process::Command;
use std::sync::OnceLock;

use candle_core::Device;

/// Lowest GPU architecture major version the fused kernel supports.
pub const MIN_COMPUTE_MAJOR: u32 = 8;
/// Environment variable consulted before shelling out to `nvidia-smi`.
pub const COMPUTE_CAP_ENV: &str = "CUDA_COMPUTE_CAP";

static CAPABILITY: OnceLock<bool> = OnceLock::new();

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Enabled { major: u32, minor: u32 },
    /// Built without the `fused` feature.
    NotCompiled,
    /// CUDA device 0 could not be opened.
    NoDevice(String),
    /// Neither the environment nor `nvidia-smi` reported a compute capability.
    UnknownComputeCapability,
    TooOld { major: u32, minor: u32 },
}

impl ProbeOutcome {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled { major, minor } => write!(f, "compute capability {major}.{minor}"),
            Self::NotCompiled => write!(f, "built without the `fused` feature"),
            Self::NoDevice(reason) => write!(f, "no CUDA device: {reason}"),
            Self::UnknownComputeCapability => write!(f, "compute capability unknown"),
            Self::TooOld { major, minor } => write!(
                f,
                "compute capability {major}.{minor} is below {MIN_COMPUTE_MAJOR}.0"
            ),
        }
    }
}

/// Whether the fused kernel was compiled into this build.
pub fn fused_compiled() -> bool {
    cfg!(feature = "fused")
}

/// Parse `"8.0"`, `"80"`, `"90"` or `"8"` into `(major, minor)`.
pub fn parse_compute_cap(raw: &str) -> Option<(u32, u32)> {
    let raw = raw.trim();
    if let Some((major, minor)) = raw.split_once('.') {
        return Some((major.trim().parse().ok()?, minor.trim().parse().ok()?));
    }
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if raw.len() == 1 {
        return Some((raw.parse().ok()?, 0));
    }
    let (major, minor) = raw.split_at(raw.len() - 1);
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn query_compute_cap() -> Option<(u32, u32)> {
    if let Ok(raw) = std::env::var(COMPUTE_CAP_ENV) {
        return parse_compute_cap(&raw);
    }
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=compute_cap", "--format=csv,noheader"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8(output.stdout).ok()?;
    stdout.lines().find_map(parse_compute_cap)
}

/// Run the probe without caching. Prefer [`capability`].
pub fn probe() -> ProbeOutcome {
    if !fused_compiled() {
        return ProbeOutcome::NotCompiled;
    }
    if let Err(err) = Device::new_cuda(0) {
        return ProbeOutcome::NoDevice(err.to_string());
    }
    match query_compute_cap() {
        None => ProbeOutcome::UnknownComputeCapability,
        Some((major, minor)) if major >= MIN_COMPUTE_MAJOR => ProbeOutcome::Enabled { major, minor },
        Some((major, minor)) => ProbeOutcome::TooOld { major, minor },
    }
}

/// Process-wide capability flag, computed on first use and never refreshed.
pub fn capability() -> bool {
    *CAPABILITY.get_or_init(|| {
        let outcome = probe();
        if outcome.is_enabled() {
            log::info!("fused attention enabled ({outcome})");
        } else {
            log::warn!("fused attention unavailable, using fallback ({outcome})");
        }
        outcome.is_enabled()
    })
}
