use crate::real;

/// The linear congruential generator used by training workers.
///
/// Each worker owns one, so draws never contend. Not suitable for anything
/// but shuffling SGD work around.
#[derive(Debug, Clone)]
pub struct Rng(pub u64);

impl Rng {
    pub fn rand_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(25214903917).wrapping_add(11);
        self.0
    }

    /// Get a uniformly distributed random number in `0.0 .. 1.0`.
    pub fn rand_real(&mut self) -> real {
        (self.rand_u64() & 0xFFFF) as real / 65536.0
    }

    /// Get a number in `0..n`. `n` must be nonzero.
    pub fn below(&mut self, n: usize) -> usize {
        // The low bits of an LCG have short periods; use the high ones.
        ((self.rand_u64() >> 16) % n as u64) as usize
    }
}
