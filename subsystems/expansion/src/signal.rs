//! # Reclaimer Wake Signal
//!
//! A single-slot, edge-consumable wake flag. The engine raises it when a
//! node's borrowed set goes from empty to non-empty; an external reclamation
//! loop consumes it with `take`. The engine only fires on the 0→1 edge of the
//! borrowed count, so an idle consumer sees exactly one wake per busy period
//! rather than one per acquisition.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Single-slot wake signal for the background reclaimer.
///
/// Raising an already-raised signal is idempotent on the slot; the raise
/// counter still records every edge the engine observed, which is what the
/// stats report.
#[derive(Debug, Default)]
pub struct ReclaimSignal {
    raised: AtomicBool,
    raises: AtomicU64,
}

impl ReclaimSignal {
    /// Creates a lowered signal
    pub const fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
            raises: AtomicU64::new(0),
        }
    }

    /// Raise the signal. Engine-side only.
    pub(crate) fn raise(&self) {
        self.raised.store(true, Ordering::Release);
        self.raises.fetch_add(1, Ordering::Relaxed);
    }

    /// Consume the signal if raised.
    ///
    /// Returns `true` exactly once per raised slot; the consumer loop calls
    /// this before deciding to run a reclamation pass.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }

    /// Whether the signal is currently raised, without consuming it
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Total number of times the engine raised the signal
    pub fn raise_count(&self) -> u64 {
        self.raises.load(Ordering::Relaxed)
    }
}
