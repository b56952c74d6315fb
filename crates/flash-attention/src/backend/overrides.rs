//! Process-wide backend override.
//!
//! The override outranks [`Config::backend`](crate::core::Config) and is read
//! atomically on every dispatch. Tests set it through [`OverrideGuard`], which
//! serialises holders behind a global mutex and restores the previous value
//! when dropped.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use crate::core::BackendSelection;

static OVERRIDE: AtomicU8 = AtomicU8::new(0);
static OVERRIDE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Replace the process-wide override.
pub fn set_backend_override(selection: BackendSelection) {
    OVERRIDE.store(selection.as_u8(), Ordering::SeqCst);
    log::debug!("attention backend override set to {selection:?}");
}

/// Current process-wide override; [`BackendSelection::Auto`] when unset.
pub fn backend_override() -> BackendSelection {
    BackendSelection::from_u8(OVERRIDE.load(Ordering::SeqCst))
}

/// Scoped override that restores the previous value on drop.
///
/// Guards are exclusive: a second `OverrideGuard::new` blocks until the first
/// guard drops, including on the same thread.
///
/// ```
/// use flash_attention::{backend_override, BackendSelection, OverrideGuard};
///
/// {
///     let _guard = OverrideGuard::new(BackendSelection::ReferenceOnly);
///     assert_eq!(backend_override(), BackendSelection::ReferenceOnly);
/// }
/// assert_eq!(backend_override(), BackendSelection::Auto);
/// ```
#[must_use = "the override is reverted as soon as the guard drops"]
pub struct OverrideGuard {
    previous: BackendSelection,
    _lock: MutexGuard<'static, ()>,
}

impl OverrideGuard {
    pub fn new(selection: BackendSelection) -> Self {
        let lock = OVERRIDE_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = backend_override();
        set_backend_override(selection);
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        set_backend_override(self.previous);
    }
}
