//! PCG32 random number generator.
//!
//! Deterministic by construction: the same seed always produces the same stream on
//! every platform. This is load-bearing for the noise decoder's `noise_seed` contract
//! and the encoder's attack-search reproducibility, so this is hand-rolled rather than
//! sourced from a general-purpose `rand` crate whose algorithm choice isn't pinned.

const MULTIPLIER: u64 = 6364136223846793005;
const DEFAULT_INC: u64 = 1442695040888963407;

/// A PCG32 generator (O'Neill, "PCG: A Family of Simple Fast Space-Efficient Statistically
/// Good Algorithms for Random Number Generation").
#[derive(Clone, Debug)]
pub struct Random {
    state: u64,
    inc: u64,
}

impl Default for Random {
    fn default() -> Self {
        Random::new()
    }
}

impl Random {
    /// A generator seeded from a fixed, unspecified default state. Callers that need
    /// determinism must call `set_seed`.
    pub fn new() -> Random {
        let mut r = Random {
            state: 0,
            inc: DEFAULT_INC,
        };
        r.set_seed(0x853c_49e6_748f_ea9b);
        r
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.state = 0;
        self.inc = DEFAULT_INC;
        self.random_uint32();
        self.state = self.state.wrapping_add(seed);
        self.random_uint32();
    }

    pub fn random_uint32(&mut self) -> u32 {
        let old_state = self.state;
        self.state = old_state
            .wrapping_mul(MULTIPLIER)
            .wrapping_add(self.inc | 1);
        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// A uniformly distributed `f64` in `[begin, end)`.
    pub fn random_double_range(&mut self, begin: f64, end: f64) -> f64 {
        const RAND_MAX: u32 = 0xffff_ffff;
        let scale = 1.0 / (RAND_MAX as f64 + 1.0);
        begin + (end - begin) * (self.random_uint32() as f64 * scale)
    }

    pub fn random_block(&mut self, out: &mut [u32]) {
        for v in out.iter_mut() {
            *v = self.random_uint32();
        }
    }

    /// A unit-magnitude complex value with uniformly random phase, used by the noise
    /// decoder to populate residual spectrum bins.
    pub fn random_unit_complex(&mut self) -> (f64, f64) {
        let phase = self.random_double_range(0.0, std::f64::consts::TAU);
        (phase.cos(), phase.sin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = Random::new();
        a.set_seed(42);
        let mut b = Random::new();
        b.set_seed(42);
        for _ in 0..64 {
            assert_eq!(a.random_uint32(), b.random_uint32());
        }
    }

    #[test]
    fn different_seed_diverges() {
        let mut a = Random::new();
        a.set_seed(1);
        let mut b = Random::new();
        b.set_seed(2);
        let seq_a: Vec<u32> = (0..8).map(|_| a.random_uint32()).collect();
        let seq_b: Vec<u32> = (0..8).map(|_| b.random_uint32()).collect();
        assert_ne!(seq_a, seq_b);
    }

    #[test]
    fn range_bounds() {
        let mut r = Random::new();
        r.set_seed(7);
        for _ in 0..1000 {
            let v = r.random_double_range(-1.0, 1.0);
            assert!((-1.0..1.0).contains(&v));
        }
    }
}
