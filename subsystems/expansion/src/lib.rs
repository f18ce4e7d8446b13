//! # AME Expansion Subsystem
//!
//! Elastic, reclaimable memory expansion over a pool of physical ranks.
//! Each NUMA node owns a pool of whole ranks; capacity is lent to the host
//! page allocator one fixed-size section at a time and withdrawn the same
//! way, so the host can grow and shrink under pressure without ever holding
//! a partially mapped rank it cannot account for.
//!
//! ## Components
//!
//! - **NodeContext**: per-node free/borrowed lists, active-rank cursor, and
//!   the lock serializing them
//! - **Engine**: one-section-per-call grow/shrink driving the lists
//! - **Capacity Oracle**: lock-free system-wide feasibility check
//! - **ReclaimSignal**: edge-triggered wake for a background reclamation
//!   loop
//!
//! ## Concurrency
//!
//! One lock per node, held for the full duration of each operation and
//! never across anything unbounded. Operations on different nodes never
//! contend; the only cross-node reads are the oracle's relaxed counter
//! loads. Refusals (`Busy`, `NoFreeRank`) are immediate — retry and backoff
//! policy belongs entirely to the caller.

#![no_std]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(test)]
extern crate std;

mod context;
mod engine;
mod error;
mod oracle;
mod signal;

pub use context::NodeStats;
pub use engine::SectionMapper;
pub use error::{AmeError, AmeResult};
pub use oracle::{CapacityRequest, Feasibility};
pub use signal::ReclaimSignal;

use alloc::collections::BTreeMap;

use ame_registry::RankRegistry;

use crate::context::NodeContext;

// =============================================================================
// AME
// =============================================================================

/// The process-wide expansion manager.
///
/// Constructed once at start-up from the registry topology; every rank is
/// seeded into its node's free list. There is no global lookup — whoever
/// needs expansion services is handed a reference to this object.
pub struct Ame<M: SectionMapper> {
    registry: RankRegistry,
    nodes: BTreeMap<u32, NodeContext>,
    mapper: M,
}

impl<M: SectionMapper> Ame<M> {
    /// Build the per-node allocator state over `registry`'s topology.
    ///
    /// All in-memory, nothing persisted: restart means re-registering every
    /// rank and starting from an all-free pool.
    pub fn new(registry: RankRegistry, mapper: M) -> Self {
        let mut nodes = BTreeMap::new();
        for nid in registry.node_ids() {
            let ranks = registry.ranks_on_node(nid).unwrap_or(&[]);
            nodes.insert(nid, NodeContext::new(nid, ranks));
        }
        log::info!(
            "ame online: {} nodes, {} ranks",
            nodes.len(),
            registry.rank_count()
        );
        Self {
            registry,
            nodes,
            mapper,
        }
    }

    fn node(&self, nid: u32) -> AmeResult<&NodeContext> {
        self.nodes.get(&nid).ok_or_else(|| {
            log::error!("ame: operation on unknown node {nid}");
            AmeError::ContractViolation("node is not part of the topology")
        })
    }

    /// Grow the capacity exposed on `nid` by exactly one section.
    ///
    /// `Err(Busy)` means the node has nothing left to lend; the host must
    /// respect it as back-pressure. Callers needing more than one section
    /// call repeatedly.
    pub fn request_expansion(&self, nid: u32) -> AmeResult<()> {
        self.node(nid)?.request_expansion(&self.registry, &self.mapper)
    }

    /// Shrink the capacity exposed on `nid` by exactly one section.
    ///
    /// `Err(Busy)` means nothing is borrowed on this node.
    pub fn request_reclamation(&self, nid: u32) -> AmeResult<()> {
        self.node(nid)?.request_reclamation(&self.registry, &self.mapper)
    }

    /// Answer a bulk feasibility query over the whole system.
    ///
    /// Advisory: the scan is lock-free and the verdict may be stale before
    /// the caller acts on it. `Satisfiable` is a hint, never a reservation.
    pub fn check_feasible(&self, request: CapacityRequest) -> Feasibility {
        oracle::check_feasible(self.nodes.values(), request)
    }

    /// The wake signal a background reclamation loop should consume for
    /// `nid`. Raised exactly once each time the node's borrowed set goes
    /// from empty to non-empty.
    pub fn reclaim_signal(&self, nid: u32) -> AmeResult<&ReclaimSignal> {
        Ok(self.node(nid)?.signal())
    }

    /// Counter snapshot for `nid`
    pub fn node_stats(&self, nid: u32) -> AmeResult<NodeStats> {
        Ok(self.node(nid)?.stats())
    }

    /// Node ids managed by this instance, ascending
    pub fn node_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.nodes.keys().copied()
    }

    /// The underlying rank registry
    pub fn registry(&self) -> &RankRegistry {
        &self.registry
    }

    /// The installed section mapper
    pub fn mapper(&self) -> &M {
        &self.mapper
    }
}

// =============================================================================
// Test Support
// =============================================================================
