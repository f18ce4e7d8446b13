//! # Per-Node Allocator State
//!
//! One `NodeContext` per NUMA node. It owns the free list, the borrowed
//! list, the active-rank cursor, and the lock that makes every mutation of
//! them atomic. The free/borrowed counters are kept outside the lock as
//! atomics so the capacity oracle can scan the whole system without
//! contending with allocation.
//!
//! ## Invariants
//!
//! - `free_count() == free list length` and `borrowed_count() == borrowed
//!   list length` whenever the lock is not held
//! - every rank registered on the node is in exactly one of the two lists
//! - the active cursor is `None` iff the borrowed list is empty, otherwise
//!   it names the borrowed tail

use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use ame_registry::{RankHandle, RankRegistry, RegistryError};
use spin::Mutex;

use crate::error::{AmeError, AmeResult};
use crate::signal::ReclaimSignal;

// =============================================================================
// List State
// =============================================================================

/// A borrowed rank and how much of it is currently exposed.
///
/// Free-list entries are bare handles; carrying the section count only on
/// borrowed entries makes "free implies zero sections" structural.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BorrowedRank {
    pub(crate) handle: RankHandle,
    pub(crate) sections_exposed: usize,
}

/// The lock-guarded portion of a node's state.
#[derive(Debug, Default)]
pub(crate) struct NodeLists {
    /// Ranks available for borrowing, tail = most recently returned
    pub(crate) free_ranks: VecDeque<RankHandle>,
    /// Ranks lent to the host, tail = most recently borrowed
    pub(crate) borrowed_ranks: VecDeque<BorrowedRank>,
    /// Target of the next grow/shrink; tail of `borrowed_ranks`
    pub(crate) active_borrowed: Option<RankHandle>,
}

impl NodeLists {
    /// Exposed-section count of a borrowed rank
    pub(crate) fn sections_of(&self, handle: RankHandle) -> Option<usize> {
        self.borrowed_ranks
            .iter()
            .find(|b| b.handle == handle)
            .map(|b| b.sections_exposed)
    }

    /// Mutable borrowed-list entry for a rank
    pub(crate) fn borrowed_mut(&mut self, handle: RankHandle) -> Option<&mut BorrowedRank> {
        self.borrowed_ranks.iter_mut().find(|b| b.handle == handle)
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Operation counters for one node, mutated with relaxed atomics.
#[derive(Debug, Default)]
struct Counters {
    expansions: AtomicU64,
    reclamations: AtomicU64,
    ranks_borrowed: AtomicU64,
    ranks_returned: AtomicU64,
}

/// Snapshot of one node's counters
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    /// Sections exposed to the host so far
    pub expansions: u64,
    /// Sections withdrawn from the host so far
    pub reclamations: u64,
    /// Whole ranks moved free → borrowed
    pub ranks_borrowed: u64,
    /// Whole ranks moved borrowed → free
    pub ranks_returned: u64,
    /// Reclaimer wake edges fired
    pub reclaimer_wakeups: u64,
    /// Current free-list length
    pub free_ranks: usize,
    /// Current borrowed-list length
    pub borrowed_ranks: usize,
}

// =============================================================================
// Node Context
// =============================================================================

/// Allocator state for one NUMA node.
///
/// All five list/cursor fields are guarded by one lock; the counters and the
/// wake signal are atomics readable without it. Operations on different
/// nodes never share mutable state.
#[derive(Debug)]
pub(crate) struct NodeContext {
    nid: u32,
    lists: Mutex<NodeLists>,
    nr_free: AtomicUsize,
    nr_borrowed: AtomicUsize,
    signal: ReclaimSignal,
    counters: Counters,
}

impl NodeContext {
    /// Creates the context for `nid`, seeding every given rank into the free
    /// list in registration order.
    pub(crate) fn new(nid: u32, ranks: &[RankHandle]) -> Self {
        let free_ranks: VecDeque<RankHandle> = ranks.iter().copied().collect();
        let nr_free = AtomicUsize::new(free_ranks.len());
        Self {
            nid,
            lists: Mutex::new(NodeLists {
                free_ranks,
                borrowed_ranks: VecDeque::new(),
                active_borrowed: None,
            }),
            nr_free,
            nr_borrowed: AtomicUsize::new(0),
            signal: ReclaimSignal::new(),
            counters: Counters::default(),
        }
    }

    /// Node id
    #[inline]
    pub(crate) fn nid(&self) -> u32 {
        self.nid
    }

    /// Free-rank count, readable without the lock.
    ///
    /// May be stale by the time the caller acts on it; see the oracle.
    #[inline]
    pub(crate) fn free_count(&self) -> usize {
        self.nr_free.load(Ordering::Relaxed)
    }

    /// Borrowed-rank count, readable without the lock
    #[inline]
    pub(crate) fn borrowed_count(&self) -> usize {
        self.nr_borrowed.load(Ordering::Relaxed)
    }

    /// The node's reclaimer wake signal
    #[inline]
    pub(crate) fn signal(&self) -> &ReclaimSignal {
        &self.signal
    }

    /// Lock the list state. Engine-side only; the guard must not outlive the
    /// calling operation.
    #[inline]
    pub(crate) fn lock(&self) -> spin::MutexGuard<'_, NodeLists> {
        self.lists.lock()
    }

    /// Counter snapshot
    pub(crate) fn stats(&self) -> NodeStats {
        NodeStats {
            expansions: self.counters.expansions.load(Ordering::Relaxed),
            reclamations: self.counters.reclamations.load(Ordering::Relaxed),
            ranks_borrowed: self.counters.ranks_borrowed.load(Ordering::Relaxed),
            ranks_returned: self.counters.ranks_returned.load(Ordering::Relaxed),
            reclaimer_wakeups: self.signal.raise_count(),
            free_ranks: self.free_count(),
            borrowed_ranks: self.borrowed_count(),
        }
    }

    /// Record one exposed section
    #[inline]
    pub(crate) fn count_expansion(&self) {
        self.counters.expansions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one withdrawn section
    #[inline]
    pub(crate) fn count_reclamation(&self) {
        self.counters.reclamations.fetch_add(1, Ordering::Relaxed);
    }

    // =========================================================================
    // Acquire / Release
    // =========================================================================

    /// Move the first acquirable free rank to the borrowed tail.
    ///
    /// Scans the free list in order, skipping ranks the registry refuses
    /// (pinned or contended). The moved rank becomes the active borrowed
    /// rank. Fires the reclaimer wake iff the borrowed count went 0→1.
    pub(crate) fn acquire_rank_locked(
        &self,
        lists: &mut NodeLists,
        registry: &RankRegistry,
    ) -> AmeResult<RankHandle> {
        let mut chosen = None;
        for (i, &handle) in lists.free_ranks.iter().enumerate() {
            match registry.try_acquire(handle) {
                Ok(()) => {
                    chosen = Some(i);
                    break;
                },
                Err(RegistryError::Pinned) | Err(RegistryError::Contended) => continue,
                Err(_) => {
                    return Err(AmeError::ContractViolation(
                        "free list names an unregistered rank",
                    ));
                },
            }
        }

        let index = match chosen {
            Some(i) => i,
            None => return Err(AmeError::NoFreeRank),
        };
        let handle = match lists.free_ranks.remove(index) {
            Some(h) => h,
            None => return Err(AmeError::ContractViolation("free list index out of range")),
        };

        lists.borrowed_ranks.push_back(BorrowedRank {
            handle,
            sections_exposed: 0,
        });
        lists.active_borrowed = Some(handle);
        self.nr_free.fetch_sub(1, Ordering::Relaxed);
        let borrowed_now = self.nr_borrowed.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.ranks_borrowed.fetch_add(1, Ordering::Relaxed);
        log::debug!("node {}: borrowed rank {:?}", self.nid, handle);

        if borrowed_now == 1 {
            self.signal.raise();
            log::debug!("node {}: reclaimer wake raised", self.nid);
        }

        Ok(handle)
    }

    /// Return a fully drained borrowed rank to the free tail.
    ///
    /// The rank must be a member of this node's borrowed list; anything else
    /// is a caller bug. Recomputes the active cursor from the new borrowed
    /// tail.
    pub(crate) fn release_rank_locked(
        &self,
        lists: &mut NodeLists,
        registry: &RankRegistry,
        handle: RankHandle,
    ) -> AmeResult<()> {
        let position = lists
            .borrowed_ranks
            .iter()
            .position(|b| b.handle == handle)
            .ok_or(AmeError::ContractViolation(
                "rank is not borrowed from this node",
            ))?;

        registry
            .release(handle)
            .map_err(|_| AmeError::ContractViolation("registry hold already dropped"))?;

        let entry = match lists.borrowed_ranks.remove(position) {
            Some(e) => e,
            None => return Err(AmeError::ContractViolation("borrowed list index out of range")),
        };
        debug_assert_eq!(entry.sections_exposed, 0);

        lists.free_ranks.push_back(handle);
        lists.active_borrowed = lists.borrowed_ranks.back().map(|b| b.handle);
        self.nr_free.fetch_add(1, Ordering::Relaxed);
        self.nr_borrowed.fetch_sub(1, Ordering::Relaxed);
        self.counters.ranks_returned.fetch_add(1, Ordering::Relaxed);
        log::debug!("node {}: returned rank {:?}", self.nid, handle);
        Ok(())
    }

    /// `acquire_rank_locked` behind the node lock
    pub(crate) fn acquire_rank(&self, registry: &RankRegistry) -> AmeResult<RankHandle> {
        let mut lists = self.lists.lock();
        self.acquire_rank_locked(&mut lists, registry)
    }

    /// `release_rank_locked` behind the node lock
    pub(crate) fn release_rank(
        &self,
        registry: &RankRegistry,
        handle: RankHandle,
    ) -> AmeResult<()> {
        let mut lists = self.lists.lock();
        self.release_rank_locked(&mut lists, registry, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ame_registry::RankFlags;

    fn node_with_ranks(count: usize) -> (RankRegistry, NodeContext) {
        let mut registry = RankRegistry::new();
        registry.add_node(0).unwrap();
        for _ in 0..count {
            registry.add_rank(0, RankFlags::empty()).unwrap();
        }
        let ctx = NodeContext::new(0, registry.ranks_on_node(0).unwrap());
        (registry, ctx)
    }

    #[test]
    fn test_seeding_fills_free_list() {
        let (_registry, ctx) = node_with_ranks(3);
        assert_eq!(ctx.free_count(), 3);
        assert_eq!(ctx.borrowed_count(), 0);
        assert_eq!(ctx.lock().borrowed_ranks.len(), 0);
    }

    #[test]
    fn test_acquire_then_release_restores_state() {
        let (registry, ctx) = node_with_ranks(2);
        let before_free = ctx.free_count();
        let before_borrowed = ctx.borrowed_count();

        let handle = ctx.acquire_rank(&registry).unwrap();
        assert_eq!(ctx.free_count(), before_free - 1);
        assert_eq!(ctx.borrowed_count(), before_borrowed + 1);

        ctx.release_rank(&registry, handle).unwrap();
        assert_eq!(ctx.free_count(), before_free);
        assert_eq!(ctx.borrowed_count(), before_borrowed);
        // released rank goes to the free tail
        assert_eq!(ctx.lock().free_ranks.back(), Some(&handle));
    }

    #[test]
    fn test_conservation_and_single_membership() {
        let (registry, ctx) = node_with_ranks(4);
        let a = ctx.acquire_rank(&registry).unwrap();
        let b = ctx.acquire_rank(&registry).unwrap();
        assert_ne!(a, b);

        let lists = ctx.lock();
        assert_eq!(lists.free_ranks.len() + lists.borrowed_ranks.len(), 4);
        for handle in registry.ranks_on_node(0).unwrap() {
            let in_free = lists.free_ranks.contains(handle);
            let in_borrowed = lists.borrowed_ranks.iter().any(|e| e.handle == *handle);
            assert!(in_free ^ in_borrowed, "rank {handle:?} must be in exactly one list");
        }
        drop(lists);
        assert_eq!(ctx.free_count() + ctx.borrowed_count(), 4);
    }

    #[test]
    fn test_active_cursor_tracks_borrowed_tail() {
        let (registry, ctx) = node_with_ranks(3);
        assert_eq!(ctx.lock().active_borrowed, None);

        let a = ctx.acquire_rank(&registry).unwrap();
        assert_eq!(ctx.lock().active_borrowed, Some(a));
        let b = ctx.acquire_rank(&registry).unwrap();
        assert_eq!(ctx.lock().active_borrowed, Some(b));

        ctx.release_rank(&registry, b).unwrap();
        assert_eq!(ctx.lock().active_borrowed, Some(a));
        ctx.release_rank(&registry, a).unwrap();
        assert_eq!(ctx.lock().active_borrowed, None);
    }

    #[test]
    fn test_release_mid_list_keeps_tail_active() {
        let (registry, ctx) = node_with_ranks(3);
        let a = ctx.acquire_rank(&registry).unwrap();
        let b = ctx.acquire_rank(&registry).unwrap();
        ctx.release_rank(&registry, a).unwrap();
        assert_eq!(ctx.lock().active_borrowed, Some(b));
    }

    #[test]
    fn test_exhaustion_returns_no_free_rank() {
        let (registry, ctx) = node_with_ranks(1);
        ctx.acquire_rank(&registry).unwrap();
        assert_eq!(ctx.acquire_rank(&registry), Err(AmeError::NoFreeRank));
    }

    #[test]
    fn test_contended_ranks_are_skipped() {
        let (registry, ctx) = node_with_ranks(2);
        let handles = registry.ranks_on_node(0).unwrap();
        // someone else holds the first rank
        registry.try_acquire(handles[0]).unwrap();

        let got = ctx.acquire_rank(&registry).unwrap();
        assert_eq!(got, handles[1]);
        // every remaining free rank is contended
        assert_eq!(ctx.acquire_rank(&registry), Err(AmeError::NoFreeRank));
    }

    #[test]
    fn test_pinned_ranks_are_skipped() {
        let (registry, ctx) = node_with_ranks(2);
        let handles = registry.ranks_on_node(0).unwrap();
        registry.rank(handles[0]).unwrap().set_pinned(true);

        let got = ctx.acquire_rank(&registry).unwrap();
        assert_eq!(got, handles[1]);
        assert_eq!(ctx.acquire_rank(&registry), Err(AmeError::NoFreeRank));

        registry.rank(handles[0]).unwrap().set_pinned(false);
        assert_eq!(ctx.acquire_rank(&registry).unwrap(), handles[0]);
    }

    #[test]
    fn test_release_of_unborrowed_rank_is_contract_violation() {
        let (registry, ctx) = node_with_ranks(2);
        let handles = registry.ranks_on_node(0).unwrap();
        let result = ctx.release_rank(&registry, handles[0]);
        assert_eq!(
            result,
            Err(AmeError::ContractViolation("rank is not borrowed from this node"))
        );
        // state untouched
        assert_eq!(ctx.free_count(), 2);
        assert_eq!(ctx.borrowed_count(), 0);
    }

    #[test]
    fn test_wake_fires_only_on_first_borrow() {
        let (registry, ctx) = node_with_ranks(3);
        assert_eq!(ctx.signal().raise_count(), 0);

        let a = ctx.acquire_rank(&registry).unwrap();
        assert_eq!(ctx.signal().raise_count(), 1);
        assert!(ctx.signal().take());

        // 1→2 and 2→3 transitions must not fire
        let b = ctx.acquire_rank(&registry).unwrap();
        let c = ctx.acquire_rank(&registry).unwrap();
        assert_eq!(ctx.signal().raise_count(), 1);
        assert!(!ctx.signal().take());

        // draining and re-borrowing is a fresh 0→1 edge
        ctx.release_rank(&registry, c).unwrap();
        ctx.release_rank(&registry, b).unwrap();
        ctx.release_rank(&registry, a).unwrap();
        ctx.acquire_rank(&registry).unwrap();
        assert_eq!(ctx.signal().raise_count(), 2);
    }

    #[test]
    fn test_stats_reflect_rank_movement() {
        let (registry, ctx) = node_with_ranks(2);
        let a = ctx.acquire_rank(&registry).unwrap();
        ctx.release_rank(&registry, a).unwrap();
        let stats = ctx.stats();
        assert_eq!(stats.ranks_borrowed, 1);
        assert_eq!(stats.ranks_returned, 1);
        assert_eq!(stats.reclaimer_wakeups, 1);
        assert_eq!(stats.free_ranks, 2);
        assert_eq!(stats.borrowed_ranks, 0);
    }
}
