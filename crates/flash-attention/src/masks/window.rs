//! Sliding-window bounds.

/// Window pair `(left, right)` measured in key positions relative to the
/// query. A negative side is unbounded.
///
/// A bounded `left` of `w` lets a query see itself plus the `w` positions
/// before it; `0` restricts it to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowSize {
    pub left: i64,
    pub right: i64,
}

impl WindowSize {
    /// No bound in either direction.
    pub const UNBOUNDED: WindowSize = WindowSize { left: -1, right: -1 };

    pub const fn new(left: i64, right: i64) -> Self {
        Self { left, right }
    }

    /// Left-only sliding window, the form used by causal decoding.
    pub const fn left(left: usize) -> Self {
        Self {
            left: left as i64,
            right: -1,
        }
    }

    pub fn left_bound(&self) -> Option<usize> {
        usize::try_from(self.left).ok()
    }

    pub fn right_bound(&self) -> Option<usize> {
        usize::try_from(self.right).ok()
    }

    pub fn is_unbounded(&self) -> bool {
        self.left < 0 && self.right < 0
    }

    /// Whether the left side lets every query of a `q_len` square see its
    /// whole causal prefix.
    pub fn covers(&self, q_len: usize) -> bool {
        self.left_bound().map_or(true, |left| left >= q_len)
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

impl From<(i64, i64)> for WindowSize {
    fn from((left, right): (i64, i64)) -> Self {
        Self { left, right }
    }
}
