//! Backend availability and selection.
//!
//! [`capability`] answers once per process whether the fused kernel can run
//! here. [`select_backend`] combines that answer with the caller's
//! [`BackendSelection`](crate::core::BackendSelection) on every call, and the
//! process-wide override in [`overrides`] lets tests pin either path.

pub mod overrides;
pub mod probe;
pub mod selection;

pub use overrides::{backend_override, set_backend_override, OverrideGuard};
pub use probe::{capability, fused_compiled, parse_compute_cap, probe, ProbeOutcome};
pub use selection::{effective_selection, select_backend, Backend};
