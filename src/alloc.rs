//! Allocation strategies.
//!
//! A table asks its strategy before it takes memory for a node or a bucket
//! array, and tells it when that memory is given back. The strategy decides
//! admission; the backing storage itself comes from the global heap through
//! fallible reservation. Requests are described by `Layout`, one per node
//! (the layout of the node type) and one per bucket array.
//!
//! Strategies also name the `AllocDomain` they draw from. Node handles move
//! freely between tables whose strategies share a domain.

use core::alloc::Layout;
use core::cell::Cell;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::rc::Rc;

use crate::error::AllocError;

static NEXT_DOMAIN: AtomicUsize = AtomicUsize::new(1);

/// Identity of the memory pool a strategy grants from. Two strategies in the
/// same domain are interchangeable, so a node extracted under one may be
/// re-inserted under the other.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AllocDomain(usize);

impl AllocDomain {
    /// The process-wide heap.
    pub const GLOBAL: AllocDomain = AllocDomain(0);

    /// A domain no other call returns.
    pub fn fresh() -> Self {
        AllocDomain(NEXT_DOMAIN.fetch_add(1, Ordering::Relaxed))
    }
}

/// Pluggable allocation strategy injected at table construction.
///
/// Contract: every successful `allocate(layout)` is balanced by exactly one
/// `deallocate(layout)` with the same layout, issued when the table releases
/// that storage (erase, extract, rehash, clear or drop).
pub trait AllocStrategy {
    fn allocate(&self, layout: Layout) -> Result<(), AllocError>;
    fn deallocate(&self, layout: Layout);

    /// Domain this strategy grants from. Tables reject node handles
    /// extracted under a different domain.
    fn domain(&self) -> AllocDomain;
}

/// Admits every request.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Global;

impl AllocStrategy for Global {
    #[inline]
    fn allocate(&self, _layout: Layout) -> Result<(), AllocError> {
        Ok(())
    }

    #[inline]
    fn deallocate(&self, _layout: Layout) {}

    #[inline]
    fn domain(&self) -> AllocDomain {
        AllocDomain::GLOBAL
    }
}

#[derive(Debug)]
struct BudgetInner {
    domain: AllocDomain,
    limit: usize,
    used: Cell<usize>,
    refusals: Cell<usize>,
}

/// A byte budget. Clones share the same accounting and domain, so several
/// tables can draw from one budget and trade nodes. Single-threaded:
/// `Budget` is `!Send`.
#[derive(Clone, Debug)]
pub struct Budget {
    inner: Rc<BudgetInner>,
}

impl Budget {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Rc::new(BudgetInner {
                domain: AllocDomain::fresh(),
                limit,
                used: Cell::new(0),
                refusals: Cell::new(0),
            }),
        }
    }

    /// Bytes currently granted and not yet returned.
    pub fn used(&self) -> usize {
        self.inner.used.get()
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn remaining(&self) -> usize {
        self.inner.limit - self.inner.used.get()
    }

    /// Number of requests refused so far.
    pub fn refusals(&self) -> usize {
        self.inner.refusals.get()
    }
}

impl AllocStrategy for Budget {
    fn allocate(&self, layout: Layout) -> Result<(), AllocError> {
        let used = self.inner.used.get();
        match used.checked_add(layout.size()) {
            Some(n) if n <= self.inner.limit => {
                self.inner.used.set(n);
                Ok(())
            }
            _ => {
                self.inner.refusals.set(self.inner.refusals.get() + 1);
                Err(AllocError::Refused { layout })
            }
        }
    }

    fn deallocate(&self, layout: Layout) {
        let used = self.inner.used.get();
        assert!(used >= layout.size(), "Budget underflow");
        self.inner.used.set(used - layout.size());
    }

    fn domain(&self) -> AllocDomain {
        self.inner.domain
    }
}

impl<A: AllocStrategy + ?Sized> AllocStrategy for &A {
    fn allocate(&self, layout: Layout) -> Result<(), AllocError> {
        (**self).allocate(layout)
    }

    fn deallocate(&self, layout: Layout) {
        (**self).deallocate(layout)
    }

    fn domain(&self) -> AllocDomain {
        (**self).domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_admits_everything() {
        let layout = Layout::from_size_align(1 << 20, 8).unwrap();
        assert!(Global.allocate(layout).is_ok());
        Global.deallocate(layout);
    }

    /// Clones share accounting; requests past the limit are refused and
    /// counted without changing `used`.
    #[test]
    fn budget_accounting_is_shared_and_bounded() {
        let b = Budget::new(100);
        let b2 = b.clone();
        let l60 = Layout::from_size_align(60, 4).unwrap();
        let l50 = Layout::from_size_align(50, 2).unwrap();

        assert!(b.allocate(l60).is_ok());
        assert_eq!(b2.used(), 60);
        match b2.allocate(l50) {
            Err(AllocError::Refused { layout }) => assert_eq!(layout.size(), 50),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(b.used(), 60);
        assert_eq!(b.refusals(), 1);

        b.deallocate(l60);
        assert_eq!(b2.used(), 0);
        assert!(b2.allocate(l50).is_ok());
        assert_eq!(b.remaining(), 50);
    }

    #[test]
    fn domains_follow_shared_accounting() {
        let a = Budget::new(10);
        let b = Budget::new(10);
        assert_eq!(a.domain(), a.clone().domain());
        assert_ne!(a.domain(), b.domain());
        assert_ne!(a.domain(), Global.domain());
        assert_eq!(Global.domain(), AllocDomain::GLOBAL);
    }

    #[test]
    fn budget_underflow_panics() {
        let b = Budget::new(10);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            b.deallocate(Layout::from_size_align(4, 1).unwrap());
        }));
        assert!(res.is_err());
    }
}
