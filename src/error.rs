//! Error kinds shared by the engine and the adapters.

use core::alloc::Layout;
use core::fmt;

use crate::node::NodeHandle;

/// A storage request that could not be satisfied.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    /// The requested size does not fit in `isize`.
    #[error("capacity overflow")]
    CapacityOverflow,
    /// The allocation strategy (or the heap) refused the request.
    #[error("allocation of {} bytes (align {}) refused", .layout.size(), .layout.align())]
    Refused { layout: Layout },
}

/// Recoverable failures reported by table operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("allocation failure: {0}")]
    AllocationFailure(#[from] AllocError),
    /// A cursor or node handle was presented to a table other than the one
    /// that produced it.
    #[error("cursor or node handle belongs to a different table")]
    IncompatibleContainer,
    /// The cursor's node has been erased or extracted.
    #[error("cursor refers to an entry that is no longer in the table")]
    StaleCursor,
}

/// Failed value insert. Ownership of the value is handed back.
#[derive(thiserror::Error)]
#[error("insert failed: {error}")]
pub struct InsertFailure<T> {
    #[source]
    pub error: TableError,
    pub value: T,
}

impl<T> fmt::Debug for InsertFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsertFailure")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Failed node-handle insert. The handle is handed back unchanged.
#[derive(thiserror::Error)]
#[error("node insert failed: {error}")]
pub struct NodeInsertError<T> {
    #[source]
    pub error: TableError,
    pub node: NodeHandle<T>,
}

impl<T> fmt::Debug for NodeInsertError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeInsertError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Diverge the way std collections do when an infallible trait impl
/// (`Clone`, `Extend`, ...) cannot obtain storage.
pub(crate) fn alloc_failed(err: TableError) -> ! {
    match err {
        TableError::AllocationFailure(AllocError::Refused { layout }) => {
            std::alloc::handle_alloc_error(layout)
        }
        TableError::AllocationFailure(AllocError::CapacityOverflow) => panic!("capacity overflow"),
        other => panic!("unexpected table error: {other}"),
    }
}
