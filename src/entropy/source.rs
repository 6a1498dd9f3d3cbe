//! Lowest-layer entropy source.
//!
//! While armed (between `before_top_level` and `before_first_request`) the OS
//! is never consulted: draws already cleared by the gate are served from a
//! seeded deterministic stream so the startup snapshot is reproducible, and
//! ungated raw draws fail with `EntropyDenied`. Disarmed, both paths read
//! the OS through `getrandom`.

use crate::config::types::{EntropyDenied, Result, SandboxError};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

pub struct EntropySource {
    armed: AtomicBool,
    deterministic: Mutex<StdRng>,
    deterministic_draws: AtomicU64,
}

impl EntropySource {
    pub fn new(deterministic_seed: u64) -> Self {
        Self {
            armed: AtomicBool::new(false),
            deterministic: Mutex::new(StdRng::seed_from_u64(deterministic_seed)),
            deterministic_draws: AtomicU64::new(0),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Number of draws served from the deterministic stream so far
    pub fn deterministic_draws(&self) -> u64 {
        self.deterministic_draws.load(Ordering::SeqCst)
    }

    pub(crate) fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
        log::debug!("OS entropy source disabled");
    }

    pub(crate) fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
        log::debug!("OS entropy source restored");
    }

    /// Fill `buf` for a draw the gate has already permitted
    pub(crate) fn fill_permitted(&self, buf: &mut [u8]) -> Result<()> {
        if self.is_armed() {
            let mut rng = self
                .deterministic
                .lock()
                .map_err(|_| SandboxError::Entropy("deterministic stream lock poisoned".to_string()))?;
            rng.fill_bytes(buf);
            self.deterministic_draws.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        fill_from_os(buf)
    }

    /// Raw access for code paths that bypass the gate
    pub fn fill_raw(&self, buf: &mut [u8]) -> Result<()> {
        if self.is_armed() {
            log::warn!("Ungated entropy draw of {} bytes refused", buf.len());
            return Err(EntropyDenied::new().into());
        }
        fill_from_os(buf)
    }
}

impl std::fmt::Debug for EntropySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntropySource")
            .field("armed", &self.is_armed())
            .field("deterministic_draws", &self.deterministic_draws())
            .finish()
    }
}

fn fill_from_os(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf).map_err(|e| SandboxError::Entropy(e.to_string()))
}
