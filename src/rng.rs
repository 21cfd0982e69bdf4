use crate::real;

/// The linear congruential generator used for every random choice during
/// training: weight initialization, subsampling, window shrinking and
/// negative sampling.
///
/// Each worker owns its own `Rng`, seeded with the worker's id, so a
/// single-threaded run is fully reproducible.
#[derive(Debug, Clone)]
pub struct Rng(pub u64);

impl Rng {
    const MULTIPLIER: u64 = 25214903917;
    const INCREMENT: u64 = 11;

    pub fn new(seed: u64) -> Self {
        Rng(seed)
    }

    /// Advance the generator and return the new state.
    pub fn rand_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(Self::MULTIPLIER).wrapping_add(Self::INCREMENT);
        self.0
    }

    /// A uniform value in `[0, 1)` with 16 bits of resolution.
    pub fn rand_real(&mut self) -> real {
        (self.rand_u64() & 0xFFFF) as real / 65536.0
    }
}
