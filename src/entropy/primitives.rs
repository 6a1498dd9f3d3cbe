//! Entropy-consuming helpers. Each one performs exactly one gated draw,
//! except [`seeded_rng`] and [`DeterministicNameSequence`] which need none.

use crate::config::types::Result;
use crate::core::state::SandboxState;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Alphabet for generated temporary names
pub const NAME_CHARACTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789_";

/// Length of generated temporary names
pub const NAME_LENGTH: usize = 8;

/// `len` bytes of secure randomness
pub fn secure_random_bytes(state: &SandboxState, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    state.fill_entropy(&mut buf)?;
    Ok(buf)
}

/// PRNG seeded from the entropy source (one draw)
pub fn default_rng(state: &SandboxState) -> Result<StdRng> {
    let mut seed = <StdRng as SeedableRng>::Seed::default();
    state.fill_entropy(&mut seed)?;
    Ok(StdRng::from_seed(seed))
}

/// PRNG from an explicit seed; never touches entropy
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Random temporary-file name (one draw)
pub fn random_name(state: &SandboxState) -> Result<String> {
    let mut raw = [0u8; NAME_LENGTH];
    state.fill_entropy(&mut raw)?;
    Ok(raw
        .iter()
        .map(|b| NAME_CHARACTERS[*b as usize % NAME_CHARACTERS.len()] as char)
        .collect())
}

/// Predictable stand-in for random temporary names while sandboxed.
///
/// Item `i` (starting at 1) is `i` written little-endian in base 37 over
/// [`NAME_CHARACTERS`], padded to [`NAME_LENGTH`].
#[derive(Debug, Clone, Default)]
pub struct DeterministicNameSequence {
    index: u64,
}

impl DeterministicNameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    fn encode(mut idx: u64) -> String {
        let base = NAME_CHARACTERS.len() as u64;
        let mut name = String::with_capacity(NAME_LENGTH);
        for _ in 0..NAME_LENGTH {
            name.push(NAME_CHARACTERS[(idx % base) as usize] as char);
            idx /= base;
        }
        name
    }
}

impl Iterator for DeterministicNameSequence {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.index += 1;
        Some(Self::encode(self.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::SandboxConfig;
    use rand::RngCore;

    #[test]
    fn test_deterministic_names() {
        let names: Vec<String> = DeterministicNameSequence::new().take(3).collect();
        assert_eq!(names, vec!["baaaaaaa", "caaaaaaa", "daaaaaaa"]);

        let mut seq = DeterministicNameSequence::new();
        let name = seq.nth(36).unwrap(); // index 37 -> "ab"
        assert_eq!(name, "abaaaaaa");
    }

    #[test]
    fn test_primitives_denied_without_allowance() {
        let state = SandboxState::new(&SandboxConfig::default());
        state.source().arm();

        assert!(secure_random_bytes(&state, 16).unwrap_err().is_entropy_denied());
        assert!(default_rng(&state).is_err());
        assert!(random_name(&state).is_err());
    }

    #[test]
    fn test_each_primitive_is_one_draw() {
        let state = SandboxState::new(&SandboxConfig::default());
        state.source().arm();

        let allowance = state.allow_entropy(3);
        assert_eq!(secure_random_bytes(&state, 16).unwrap().len(), 16);
        default_rng(&state).unwrap();
        let name = random_name(&state).unwrap();
        allowance.release().unwrap();

        assert_eq!(name.len(), NAME_LENGTH);
        assert!(name.bytes().all(|b| NAME_CHARACTERS.contains(&b)));
    }

    #[test]
    fn test_sandboxed_default_rng_is_reproducible() {
        let draw = || {
            let state = SandboxState::new(&SandboxConfig::default());
            state.source().arm();
            let allowance = state.allow_entropy(1);
            let mut rng = default_rng(&state).unwrap();
            allowance.release().unwrap();
            rng.next_u64()
        };
        assert_eq!(draw(), draw());
    }

    #[test]
    fn test_seeded_rng_needs_no_entropy() {
        let mut a = seeded_rng(9);
        let mut b = seeded_rng(9);
        assert_eq!(a.next_u64(), b.next_u64());
    }
}
