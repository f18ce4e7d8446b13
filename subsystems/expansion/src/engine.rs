//! # Expansion/Reclamation Engine
//!
//! Section-granular grow/shrink. Each call moves exactly one section in or
//! out of the host allocator, entirely under the node lock, so concurrent
//! callers see every intermediate state as consistent.
//!
//! Growth fills the active borrowed rank before acquiring another, keeping
//! the number of partially used ranks at one per node. Reclamation drains
//! the active rank highest-section-first, so sections come back in the
//! reverse of the order they went out (LIFO within a rank) and the rank
//! rejoins the free pool the moment its last section is withdrawn.

use ame_registry::{RankHandle, RankRegistry, SECTIONS_PER_RANK};

use crate::context::NodeContext;
use crate::error::{AmeError, AmeResult};

// =============================================================================
// Section Mapper
// =============================================================================

/// The host-side primitives that map a section in or out of the page
/// allocator.
///
/// Implementations are called with the node lock held and must therefore be
/// bounded and non-blocking: no I/O, no sleeping, no call back into the
/// expansion subsystem. Both operations are infallible once handed a valid
/// section index; validity is the engine's responsibility.
pub trait SectionMapper: Send + Sync {
    /// Expose one section of a rank to the host page allocator
    fn expose_section(&self, rank: RankHandle, section: usize);

    /// Withdraw one previously exposed section from the host page allocator
    fn reclaim_section(&self, rank: RankHandle, section: usize);
}

// =============================================================================
// Grow / Shrink
// =============================================================================

impl NodeContext {
    /// Grow exposed capacity by exactly one section.
    ///
    /// Reuses the active borrowed rank while it has unexposed sections;
    /// otherwise borrows a fresh rank from the free pool. `Busy` is the
    /// steady-state back-pressure answer when the pool has nothing left to
    /// lend — the host must back off rather than retry in a tight loop.
    pub(crate) fn request_expansion<M: SectionMapper>(
        &self,
        registry: &RankRegistry,
        mapper: &M,
    ) -> AmeResult<()> {
        let mut lists = self.lock();

        let active = lists.active_borrowed;
        let handle = match active {
            Some(h) if lists.sections_of(h).is_some_and(|s| s < SECTIONS_PER_RANK) => h,
            _ => match self.acquire_rank_locked(&mut lists, registry) {
                Ok(fresh) => fresh,
                Err(AmeError::NoFreeRank) => return Err(AmeError::Busy),
                Err(other) => return Err(other),
            },
        };

        let entry = lists
            .borrowed_mut(handle)
            .ok_or(AmeError::ContractViolation("active rank left the borrowed list"))?;
        let section = entry.sections_exposed;
        debug_assert!(section < SECTIONS_PER_RANK);
        mapper.expose_section(handle, section);
        entry.sections_exposed = section + 1;

        self.count_expansion();
        log::trace!("node {}: exposed section {} of rank {:?}", self.nid(), section, handle);
        Ok(())
    }

    /// Shrink exposed capacity by exactly one section.
    ///
    /// Always drains the active borrowed rank; when its last section is
    /// withdrawn the whole rank returns to the free pool and the cursor
    /// falls back to the previous borrowed rank. `Busy` when nothing is
    /// borrowed.
    pub(crate) fn request_reclamation<M: SectionMapper>(
        &self,
        registry: &RankRegistry,
        mapper: &M,
    ) -> AmeResult<()> {
        let mut lists = self.lock();

        if lists.borrowed_ranks.is_empty() {
            return Err(AmeError::Busy);
        }
        let handle = lists
            .active_borrowed
            .ok_or(AmeError::ContractViolation("borrowed list has no active rank"))?;
        let entry = lists
            .borrowed_mut(handle)
            .ok_or(AmeError::ContractViolation("active rank left the borrowed list"))?;

        let remaining = entry
            .sections_exposed
            .checked_sub(1)
            .ok_or(AmeError::ContractViolation("borrowed rank has no exposed sections"))?;
        entry.sections_exposed = remaining;
        mapper.reclaim_section(handle, remaining);

        self.count_reclamation();
        log::trace!("node {}: reclaimed section {} of rank {:?}", self.nid(), remaining, handle);

        if remaining == 0 {
            self.release_rank_locked(&mut lists, registry, handle)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{node_fixture, Mapped};

    #[test]
    fn test_expansion_exposes_sections_in_order() {
        let (registry, ctx, mapper) = node_fixture(2);
        for _ in 0..SECTIONS_PER_RANK {
            ctx.request_expansion(&registry, &mapper).unwrap();
        }

        let events = mapper.events();
        assert_eq!(events.len(), SECTIONS_PER_RANK);
        let rank = events[0].rank;
        for (i, event) in events.iter().enumerate() {
            assert_eq!(*event, Mapped::expose(rank, i));
        }
        // the whole time, only one rank was borrowed
        assert_eq!(ctx.borrowed_count(), 1);
    }

    #[test]
    fn test_full_rank_rolls_over_to_next() {
        let (registry, ctx, mapper) = node_fixture(2);
        for _ in 0..SECTIONS_PER_RANK + 1 {
            ctx.request_expansion(&registry, &mapper).unwrap();
        }

        assert_eq!(ctx.borrowed_count(), 2);
        let events = mapper.events();
        let first_rank = events[0].rank;
        let last = events[events.len() - 1];
        assert_ne!(last.rank, first_rank);
        assert_eq!(last.section, 0);
    }

    #[test]
    fn test_exhausted_pool_returns_busy() {
        let (registry, ctx, mapper) = node_fixture(1);
        for _ in 0..SECTIONS_PER_RANK {
            ctx.request_expansion(&registry, &mapper).unwrap();
        }
        assert_eq!(ctx.request_expansion(&registry, &mapper), Err(AmeError::Busy));
        // refusal changed nothing
        assert_eq!(ctx.borrowed_count(), 1);
        assert_eq!(ctx.free_count(), 0);
    }

    #[test]
    fn test_reclamation_drains_descending_and_frees_rank() {
        let (registry, ctx, mapper) = node_fixture(1);
        for _ in 0..3 {
            ctx.request_expansion(&registry, &mapper).unwrap();
        }
        mapper.clear();

        for expected in [2, 1, 0] {
            assert_eq!(ctx.borrowed_count(), 1, "rank must stay borrowed until drained");
            ctx.request_reclamation(&registry, &mapper).unwrap();
            let last = mapper.last().unwrap();
            let rank = last.rank;
            assert_eq!(last, Mapped::reclaim(rank, expected));
        }

        // last section withdrawn: rank is free again
        assert_eq!(ctx.borrowed_count(), 0);
        assert_eq!(ctx.free_count(), 1);
        assert_eq!(ctx.request_reclamation(&registry, &mapper), Err(AmeError::Busy));
    }

    #[test]
    fn test_expansion_resumes_at_reclaimed_index() {
        let (registry, ctx, mapper) = node_fixture(1);
        for _ in 0..3 {
            ctx.request_expansion(&registry, &mapper).unwrap();
        }
        ctx.request_reclamation(&registry, &mapper).unwrap();
        mapper.clear();

        ctx.request_expansion(&registry, &mapper).unwrap();
        let last = mapper.last().unwrap();
        assert_eq!(last.section, 2);
        assert!(last.exposed);
    }

    #[test]
    fn test_full_fallback_rank_forces_fresh_borrow() {
        let (registry, ctx, mapper) = node_fixture(2);
        // fill rank A, start rank B
        for _ in 0..SECTIONS_PER_RANK + 2 {
            ctx.request_expansion(&registry, &mapper).unwrap();
        }
        let rank_b = ctx.lock().active_borrowed.unwrap();

        // drain rank B completely; cursor falls back to rank A
        ctx.request_reclamation(&registry, &mapper).unwrap();
        ctx.request_reclamation(&registry, &mapper).unwrap();
        assert_eq!(ctx.borrowed_count(), 1);
        let rank_a = ctx.lock().active_borrowed.unwrap();
        assert_ne!(rank_a, rank_b);

        // rank A is full, so the next expansion borrows again rather than
        // touching A
        mapper.clear();
        ctx.request_expansion(&registry, &mapper).unwrap();
        let last = mapper.last().unwrap();
        assert_eq!(last.section, 0);
        assert!(last.exposed);
    }

    #[test]
    fn test_state_machine_walk() {
        // Free -> Borrowed-Partial -> Borrowed-Full -> Borrowed-Partial -> Free
        let (registry, ctx, mapper) = node_fixture(1);

        ctx.request_expansion(&registry, &mapper).unwrap();
        let lists = ctx.lock();
        let entry = lists.borrowed_ranks.back().unwrap();
        assert!(entry.sections_exposed > 0 && entry.sections_exposed < SECTIONS_PER_RANK);
        drop(lists);

        for _ in 1..SECTIONS_PER_RANK {
            ctx.request_expansion(&registry, &mapper).unwrap();
        }
        assert_eq!(
            ctx.lock().borrowed_ranks.back().unwrap().sections_exposed,
            SECTIONS_PER_RANK
        );

        ctx.request_reclamation(&registry, &mapper).unwrap();
        let lists = ctx.lock();
        let entry = lists.borrowed_ranks.back().unwrap();
        assert!(entry.sections_exposed > 0 && entry.sections_exposed < SECTIONS_PER_RANK);
        drop(lists);

        for _ in 1..SECTIONS_PER_RANK {
            ctx.request_reclamation(&registry, &mapper).unwrap();
        }
        assert_eq!(ctx.free_count(), 1);
        assert_eq!(ctx.borrowed_count(), 0);
    }

    #[test]
    fn test_section_counters_track_operations() {
        let (registry, ctx, mapper) = node_fixture(1);
        for _ in 0..4 {
            ctx.request_expansion(&registry, &mapper).unwrap();
        }
        ctx.request_reclamation(&registry, &mapper).unwrap();
        let stats = ctx.stats();
        assert_eq!(stats.expansions, 4);
        assert_eq!(stats.reclamations, 1);
    }
}
