//! Scoped entropy allowance.
//!
//! `with_entropy_allowance(gate, n)` lets exactly `n` sandboxed draws through
//! until the returned guard is released. Guards snapshot the previous budget
//! and restore it on release or drop, so nesting unwinds in LIFO order.

use crate::config::types::{Result, SandboxError};
use crate::entropy::gate::EntropyGate;

/// Guard returned by [`with_entropy_allowance`]
#[must_use = "an allowance is checked when released; dropping it only logs leftovers"]
#[derive(Debug)]
pub struct EntropyAllowance<'a> {
    gate: &'a EntropyGate,
    previous: u32,
    requested: u32,
    released: bool,
}

/// Set the budget to `n`, remembering the previous value
pub fn with_entropy_allowance(gate: &EntropyGate, n: u32) -> EntropyAllowance<'_> {
    let previous = gate.swap_budget(n);
    log::debug!("Entropy allowance of {} opened (previous budget {})", n, previous);
    EntropyAllowance {
        gate,
        previous,
        requested: n,
        released: false,
    }
}

impl<'a> EntropyAllowance<'a> {
    pub fn requested(&self) -> u32 {
        self.requested
    }

    /// Draws still permitted under this allowance
    pub fn remaining(&self) -> u32 {
        self.gate.budget()
    }

    /// Close the allowance.
    ///
    /// The previous budget is always restored. While sandboxed, any unused
    /// draws are reported as `LeftoverEntropyAllowance`.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        let leftover = self.restore();
        if leftover > 0 && self.gate.is_sandboxed() {
            return Err(SandboxError::LeftoverEntropyAllowance {
                leftover,
                requested: self.requested,
            });
        }
        Ok(())
    }

    fn restore(&self) -> u32 {
        self.gate.swap_budget(self.previous)
    }
}

impl Drop for EntropyAllowance<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let leftover = self.restore();
        if leftover > 0 && self.gate.is_sandboxed() && !std::thread::panicking() {
            log::error!(
                "{} unexpected leftover entropy calls (allowance was {}, released on drop)",
                leftover,
                self.requested
            );
        }
    }
}

/// Run `body` under an allowance of `n` draws.
///
/// An error from `body` wins over a leftover allowance, which is then only
/// logged. A clean body with unused draws yields `LeftoverEntropyAllowance`.
pub fn run_with_entropy_allowance<T, F>(gate: &EntropyGate, n: u32, body: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let allowance = with_entropy_allowance(gate, n);
    match body() {
        Ok(value) => {
            allowance.release()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(leftover) = allowance.release() {
                log::error!("{} (suppressed by earlier error: {})", leftover, err);
            }
            Err(err)
        }
    }
}
