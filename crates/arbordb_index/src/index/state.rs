//! Index lifecycle state.

use crate::tree::TreeOp;
use std::collections::VecDeque;
use std::fmt;

/// Lifecycle state of an index.
///
/// ```text
/// Init ─► Build ─► Ready ─► Rebuild ─► Ready
///            │        │  └─► Closed
///            ▼        ▼
///          Error ◄────┘      Ready / Error / Closed ─► Removed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Created, not built yet.
    Init,
    /// Initial build in progress.
    Build,
    /// Rebuild of a ready index in progress.
    Rebuild,
    /// Queryable and accepting updates.
    Ready,
    /// File handle released.
    Closed,
    /// The last build failed.
    Error,
    /// Index file deleted.
    Removed,
}

impl IndexState {
    /// Returns true while a build or rebuild holds the index.
    pub fn is_building(self) -> bool {
        matches!(self, IndexState::Build | IndexState::Rebuild)
    }

    /// Returns true if `next` is a permitted transition from this state.
    pub fn can_become(self, next: IndexState) -> bool {
        use IndexState::{Build, Closed, Error, Init, Ready, Rebuild, Removed};
        match (self, next) {
            (Init | Error | Closed, Build)
            | (Ready, Rebuild)
            | (Build | Rebuild, Ready)
            | (Ready, Closed)
            | (Ready | Build | Rebuild, Error)
            | (Init | Ready | Error | Closed, Removed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexState::Init => "init",
            IndexState::Build => "build",
            IndexState::Rebuild => "rebuild",
            IndexState::Ready => "ready",
            IndexState::Closed => "closed",
            IndexState::Error => "error",
            IndexState::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// An update that arrived while the index was not ready.
#[derive(Debug, Clone)]
pub(crate) struct PendingUpdate {
    pub path: String,
    pub ops: Vec<TreeOp>,
}

/// Mutable lifecycle data, guarded by the index's state mutex.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    pub state: IndexState,
    pub error: Option<String>,
    pub pending: VecDeque<PendingUpdate>,
}

impl Lifecycle {
    pub fn new(state: IndexState) -> Self {
        Self {
            state,
            error: None,
            pending: VecDeque::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        assert!(IndexState::Init.can_become(IndexState::Build));
        assert!(IndexState::Ready.can_become(IndexState::Rebuild));
        assert!(IndexState::Rebuild.can_become(IndexState::Ready));
        assert!(IndexState::Error.can_become(IndexState::Build));
        assert!(IndexState::Closed.can_become(IndexState::Removed));
        assert!(!IndexState::Removed.can_become(IndexState::Ready));
        assert!(!IndexState::Init.can_become(IndexState::Ready));
        assert!(!IndexState::Closed.can_become(IndexState::Rebuild));
    }

    #[test]
    fn building_states() {
        assert!(IndexState::Build.is_building());
        assert!(IndexState::Rebuild.is_building());
        assert!(!IndexState::Ready.is_building());
        assert_eq!(IndexState::Rebuild.to_string(), "rebuild");
    }
}
