//! # AME Rank Registry
//!
//! The registry is the leaf layer of the AME framework. It owns the
//! *identity* of every rank in the system: which NUMA node a rank lives on,
//! its administrative flags, and its holder reference count. It deliberately
//! knows nothing about free lists, borrowed lists, or sections — that state
//! belongs to the expansion subsystem, which consumes this crate through a
//! narrow acquire/release contract.
//!
//! ## Components
//!
//! - **Rank**: identity record with an atomic holder count
//! - **RankHandle**: stable arena index, the only way ranks are referenced
//! - **RankRegistry**: the arena plus the node topology
//!
//! ## Contract
//!
//! `try_acquire`/`release` are non-blocking and safe to call while the
//! caller holds a node lock; they touch a single atomic and never allocate.

#![no_std]
#![warn(missing_docs)]

extern crate alloc;

use core::fmt;

use static_assertions::const_assert;

mod rank;
mod registry;

pub use rank::{Rank, RankFlags, RankHandle};
pub use registry::RankRegistry;

// =============================================================================
// Rank Geometry
// =============================================================================

/// Size of one section in bytes.
pub const SECTION_BYTES: u64 = 128 * 1024 * 1024;

/// Number of sections in one rank.
pub const SECTIONS_PER_RANK: usize = 32;

/// Total capacity of one rank in bytes.
pub const RANK_BYTES: u64 = SECTION_BYTES * SECTIONS_PER_RANK as u64;

const_assert!(SECTIONS_PER_RANK > 0);
const_assert!(SECTION_BYTES.is_power_of_two());

// =============================================================================
// Errors
// =============================================================================

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Registry error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The node id is not part of the registered topology
    UnknownNode(u32),
    /// The handle does not name a registered rank
    UnknownRank(RankHandle),
    /// The node id was registered twice
    DuplicateNode(u32),
    /// The rank is currently held and cannot be acquired
    Contended,
    /// The rank is administratively pinned and excluded from acquisition
    Pinned,
    /// Release was called on a rank that is not held
    NotHeld,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNode(nid) => write!(f, "Unknown node: {nid}"),
            Self::UnknownRank(handle) => write!(f, "Unknown rank: {handle:?}"),
            Self::DuplicateNode(nid) => write!(f, "Node {nid} already registered"),
            Self::Contended => write!(f, "Rank is held"),
            Self::Pinned => write!(f, "Rank is pinned"),
            Self::NotHeld => write!(f, "Rank is not held"),
        }
    }
}
