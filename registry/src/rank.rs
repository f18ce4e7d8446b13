//! Rank identity and holder refcounting.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::{RegistryError, RegistryResult};

// =============================================================================
// Handle
// =============================================================================

/// Stable arena index naming one rank.
///
/// Handles are dense (assigned in registration order) and never reused, so
/// they stay valid for the lifetime of the registry. Lists and cursors store
/// handles, never references.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RankHandle(u32);

impl RankHandle {
    /// Creates a handle from a raw arena index
    #[inline]
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw arena index
    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// Flags
// =============================================================================

bitflags::bitflags! {
    /// Administrative rank flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RankFlags: u32 {
        /// Excluded from acquisition until unpinned
        const PINNED = 1 << 0;
        /// Physically present but not usable
        const OFFLINE = 1 << 1;
    }
}

// =============================================================================
// Rank
// =============================================================================

/// Identity record for one physical rank.
///
/// The registry owns identity and the holder count; list membership and
/// section state live in the expansion subsystem.
#[derive(Debug)]
pub struct Rank {
    handle: RankHandle,
    home_node: u32,
    flags: AtomicU32,
    /// Holder count: 0 = free to acquire, 1 = held by the allocator.
    holders: AtomicU32,
}

impl Rank {
    pub(crate) fn new(handle: RankHandle, home_node: u32, flags: RankFlags) -> Self {
        Self {
            handle,
            home_node,
            flags: AtomicU32::new(flags.bits()),
            holders: AtomicU32::new(0),
        }
    }

    /// Handle naming this rank
    #[inline]
    pub fn handle(&self) -> RankHandle {
        self.handle
    }

    /// NUMA node this rank is attached to
    #[inline]
    pub fn home_node(&self) -> u32 {
        self.home_node
    }

    /// Current administrative flags
    #[inline]
    pub fn flags(&self) -> RankFlags {
        RankFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Whether the rank is administratively pinned
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.flags().contains(RankFlags::PINNED)
    }

    /// Whether the rank is currently held
    #[inline]
    pub fn is_held(&self) -> bool {
        self.holders.load(Ordering::Acquire) != 0
    }

    /// Set or clear the pinned flag
    pub fn set_pinned(&self, pinned: bool) {
        if pinned {
            self.flags.fetch_or(RankFlags::PINNED.bits(), Ordering::AcqRel);
        } else {
            self.flags.fetch_and(!RankFlags::PINNED.bits(), Ordering::AcqRel);
        }
    }

    /// Attempt to take exclusive hold of the rank.
    ///
    /// Non-blocking: a single compare-exchange. Pinned and offline ranks
    /// refuse acquisition outright.
    pub(crate) fn try_acquire(&self) -> RegistryResult<()> {
        if self.is_pinned() {
            return Err(RegistryError::Pinned);
        }
        self.holders
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| RegistryError::Contended)
    }

    /// Drop the hold taken by `try_acquire`.
    pub(crate) fn release(&self) -> RegistryResult<()> {
        self.holders
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| RegistryError::NotHeld)
    }
}
