//! Deterministic derivation of per-stream random generators.
//!
//! Every stochastic draw in the simulation flows through a `ChaCha20Rng`
//! derived here from the base seed and a sequence of stream identifiers
//! (trial index, client index, stream tag). Streams derived from distinct
//! identifier sequences are statistically independent, so results do not
//! depend on the order in which trials or clients are processed.

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Derives a generator from the base seed and a sequence of stream
/// identifiers.
///
/// The identifiers are folded into the seed with a SplitMix64-style mixer,
/// which gives well-separated seeds even for adjacent indices.
pub fn derive_rng(base_seed: u64, stream: &[u64]) -> ChaCha20Rng {
    let mut state = splitmix64(base_seed);
    for &word in stream {
        state = splitmix64(state ^ word);
    }
    ChaCha20Rng::seed_from_u64(state)
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use rand::RngCore;

    use super::*;

    #[test]
    fn test_same_stream_same_draws() {
        let mut a = derive_rng(42, &[1, 2, 3]);
        let mut b = derive_rng(42, &[1, 2, 3]);
        for _ in 0..16 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_distinct_streams_diverge() {
        let mut a = derive_rng(42, &[0, 0]);
        let mut b = derive_rng(42, &[0, 1]);
        let mut c = derive_rng(43, &[0, 0]);
        assert_ne!(a.next_u64(), b.next_u64());
        assert_ne!(derive_rng(42, &[0, 0]).next_u64(), c.next_u64());
    }

    #[test]
    fn test_order_of_derivation_is_irrelevant() {
        // Deriving client 3's stream must not be affected by whether client
        // 2's stream was derived (or drawn from) first.
        let mut early = derive_rng(7, &[0, 3]);
        let mut other = derive_rng(7, &[0, 2]);
        other.next_u64();
        let mut late = derive_rng(7, &[0, 3]);
        assert_eq!(early.next_u64(), late.next_u64());
    }
}
