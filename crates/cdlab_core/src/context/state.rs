//! Context lifecycle states.

use std::fmt;

/// Role a context was opened for.
///
/// Both kinds stage and commit identically; the kind shows up in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// Worker-owned context for writes.
    Background,
    /// Interactive context that reads the latest committed state.
    Main,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Background => f.write_str("background"),
            Self::Main => f.write_str("main"),
        }
    }
}

/// Observable state of a context.
///
/// ```text
/// Open ──stage──▶ Staged(n) ──commit──▶ Committed
///   │                 │
///   └────rollback─────┴──────────────▶ RolledBack
/// ```
///
/// `Committed` and `RolledBack` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Nothing staged yet.
    Open,
    /// This many mutations are waiting for commit.
    Staged(usize),
    /// Changes were applied to the store.
    Committed,
    /// Changes were discarded.
    RolledBack,
}

impl ContextState {
    /// Whether the context accepts further operations.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Open | Self::Staged(_))
    }
}

/// Internal phase; the staged count is derived from the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Active,
    Committed,
    RolledBack,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_inactive() {
        assert!(ContextState::Open.is_active());
        assert!(ContextState::Staged(3).is_active());
        assert!(!ContextState::Committed.is_active());
        assert!(!ContextState::RolledBack.is_active());
    }

    #[test]
    fn kind_display() {
        assert_eq!(ContextKind::Background.to_string(), "background");
        assert_eq!(ContextKind::Main.to_string(), "main");
    }
}
