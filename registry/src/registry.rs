//! The rank arena and node topology.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::rank::{Rank, RankFlags, RankHandle};
use crate::{RegistryError, RegistryResult};

/// Process-wide rank registry.
///
/// Built once at start-up: register every online node, then every rank on
/// it. After construction the registry is immutable apart from the atomic
/// holder counts and flags, so shared references can be handed to every
/// consumer without further locking.
#[derive(Debug, Default)]
pub struct RankRegistry {
    /// Arena; `RankHandle` is an index into this
    ranks: Vec<Rank>,
    /// Ranks per node, in registration order
    nodes: BTreeMap<u32, Vec<RankHandle>>,
}

impl RankRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an online node.
    pub fn add_node(&mut self, nid: u32) -> RegistryResult<()> {
        if self.nodes.contains_key(&nid) {
            return Err(RegistryError::DuplicateNode(nid));
        }
        self.nodes.insert(nid, Vec::new());
        Ok(())
    }

    /// Register a rank on a previously registered node.
    ///
    /// Returns the stable handle the rank will be known by from now on.
    pub fn add_rank(&mut self, nid: u32, flags: RankFlags) -> RegistryResult<RankHandle> {
        let handle = RankHandle::new(self.ranks.len() as u32);
        let node = self
            .nodes
            .get_mut(&nid)
            .ok_or(RegistryError::UnknownNode(nid))?;
        node.push(handle);
        self.ranks.push(Rank::new(handle, nid, flags));
        log::debug!("registered rank {:?} on node {}", handle, nid);
        Ok(handle)
    }

    /// Look up a rank by handle
    #[inline]
    pub fn rank(&self, handle: RankHandle) -> RegistryResult<&Rank> {
        self.ranks
            .get(handle.index())
            .ok_or(RegistryError::UnknownRank(handle))
    }

    /// Whether the node is part of the topology
    #[inline]
    pub fn has_node(&self, nid: u32) -> bool {
        self.nodes.contains_key(&nid)
    }

    /// Registered node ids, ascending
    pub fn node_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.nodes.keys().copied()
    }

    /// Handles of all ranks registered on a node, in registration order
    pub fn ranks_on_node(&self, nid: u32) -> RegistryResult<&[RankHandle]> {
        self.nodes
            .get(&nid)
            .map(Vec::as_slice)
            .ok_or(RegistryError::UnknownNode(nid))
    }

    /// Total number of registered ranks
    #[inline]
    pub fn rank_count(&self) -> usize {
        self.ranks.len()
    }

    /// Number of registered nodes
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Attempt to take exclusive hold of a rank.
    ///
    /// Safe to call under a node lock: one atomic compare-exchange, no
    /// allocation, no blocking.
    pub fn try_acquire(&self, handle: RankHandle) -> RegistryResult<()> {
        self.rank(handle)?.try_acquire()
    }

    /// Drop the hold on a rank taken by `try_acquire`.
    pub fn release(&self, handle: RankHandle) -> RegistryResult<()> {
        self.rank(handle)?.release()
    }
}
