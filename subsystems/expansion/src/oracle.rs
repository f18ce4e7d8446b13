//! # Capacity Oracle
//!
//! System-wide feasibility check for bulk rank requests. The scan reads the
//! per-node atomic counters without taking any node lock, so the verdict can
//! be stale by the time the caller acts on it: `Satisfiable` is a hint, not
//! a reservation. That trade is deliberate — the command interface polls
//! this frequently and must never contend with allocation.

use crate::context::NodeContext;

/// A bulk capacity request: how many whole ranks the caller wants available.
///
/// Ephemeral value object; nothing is reserved by asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityRequest {
    /// Number of whole ranks requested
    pub requested_ranks: usize,
}

/// Feasibility verdict for a capacity request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feasibility {
    /// The free pools alone cover the request; no reclamation needed
    Satisfiable,
    /// Free plus borrowed capacity covers the request; the caller should
    /// expect borrowed ranks to be reclaimed before the request can fully
    /// succeed
    SatisfiableAfterReclaim,
    /// The request exceeds every rank in the system
    Infeasible,
}

/// Check whether `request` could be satisfied now or after reclamation.
///
/// Two lock-free passes: free counters first (the cheap common case), then
/// free plus borrowed. Never fails; staleness is a property, not an error.
pub(crate) fn check_feasible<'a, I>(nodes: I, request: CapacityRequest) -> Feasibility
where
    I: Iterator<Item = &'a NodeContext> + Clone,
{
    let total_free: usize = nodes.clone().map(NodeContext::free_count).sum();
    if request.requested_ranks <= total_free {
        return Feasibility::Satisfiable;
    }

    let total_borrowed: usize = nodes.map(NodeContext::borrowed_count).sum();
    if request.requested_ranks <= total_free + total_borrowed {
        return Feasibility::SatisfiableAfterReclaim;
    }

    Feasibility::Infeasible
}
