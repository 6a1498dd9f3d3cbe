//! Entropy Gate
//!
//! Process-wide phase and budget answering "may this entropy draw proceed?".
//! Every entropy-consuming primitive calls [`EntropyGate::try_consume_entropy`]
//! before doing real work. The gate does no I/O of its own.

use crate::config::types::EntropyDenied;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Startup phase of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Module loading, before any live request exists
    Sandboxed,
    /// First request seen; the sandbox is permanently inert
    Unsandboxed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Sandboxed => write!(f, "sandboxed"),
            Phase::Unsandboxed => write!(f, "unsandboxed"),
        }
    }
}

const SANDBOXED: u8 = 0;
const UNSANDBOXED: u8 = 1;

/// Phase flag plus the counted allowance of sandboxed entropy draws.
///
/// Writers: the lifecycle controller flips the phase, scoped allowances set
/// the budget. Both are crate-private.
#[derive(Debug)]
pub struct EntropyGate {
    phase: AtomicU8,
    budget: AtomicU32,
}

impl EntropyGate {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(SANDBOXED),
            budget: AtomicU32::new(0),
        }
    }

    pub fn phase(&self) -> Phase {
        match self.phase.load(Ordering::SeqCst) {
            SANDBOXED => Phase::Sandboxed,
            _ => Phase::Unsandboxed,
        }
    }

    pub fn is_sandboxed(&self) -> bool {
        self.phase() == Phase::Sandboxed
    }

    /// Remaining sandboxed draws
    pub fn budget(&self) -> u32 {
        self.budget.load(Ordering::SeqCst)
    }

    /// Permit or refuse one entropy draw.
    ///
    /// Unsandboxed: always permitted. Sandboxed: permitted iff the budget is
    /// positive, in which case it is decremented.
    pub fn try_consume_entropy(&self) -> Result<(), EntropyDenied> {
        if !self.is_sandboxed() {
            return Ok(());
        }

        match self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        {
            Ok(previous) => {
                log::trace!("Sandboxed entropy draw permitted ({} left)", previous - 1);
                Ok(())
            }
            Err(_) => {
                log::debug!("Sandboxed entropy draw denied (no allowance)");
                Err(EntropyDenied::new())
            }
        }
    }

    /// Replace the budget, returning the previous value
    pub(crate) fn swap_budget(&self, budget: u32) -> u32 {
        self.budget.swap(budget, Ordering::SeqCst)
    }

    /// One-way transition. Returns true if this call performed it.
    pub(crate) fn enter_unsandboxed(&self) -> bool {
        self.phase.swap(UNSANDBOXED, Ordering::SeqCst) == SANDBOXED
    }
}

impl Default for EntropyGate {
    fn default() -> Self {
        Self::new()
    }
}
