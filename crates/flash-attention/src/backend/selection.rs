//! Per-call backend decision.

use std::fmt;

use crate::backend::overrides::backend_override;
use crate::core::{AttentionError, BackendSelection, Config};

/// Executor chosen for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Fused,
    Fallback,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fused => f.write_str("fused"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// The global override when set, otherwise the configured preference.
pub fn effective_selection(config: &Config) -> BackendSelection {
    match backend_override() {
        BackendSelection::Auto => config.backend,
        forced => forced,
    }
}

/// Map a selection and the process capability to an executor.
///
/// Forcing the fused kernel where it cannot run is a configuration error; it
/// never silently degrades.
pub fn select_backend(
    selection: BackendSelection,
    capability: bool,
) -> Result<Backend, AttentionError> {
    match selection {
        BackendSelection::Auto if capability => Ok(Backend::Fused),
        BackendSelection::Auto => Ok(Backend::Fallback),
        BackendSelection::ReferenceOnly => Ok(Backend::Fallback),
        BackendSelection::FusedOnly if capability => Ok(Backend::Fused),
        BackendSelection::FusedOnly => Err(AttentionError::configuration(
            "fused attention was forced but the kernel is unavailable in this process",
        )),
    }
}
