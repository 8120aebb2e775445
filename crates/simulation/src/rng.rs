//! Deterministic random number generation for mission simulation.
//!
//! Server and client must agree on every combat outcome, so all randomness
//! flows through seed packages: four 32-bit values that both sides feed into
//! the same generator. The server derives fresh packages from a SplitMix64
//! stream seeded by the mission's initial package.

/// Four 32-bit values seeding the deterministic combat RNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedPackage(pub [u32; 4]);

impl SeedPackage {
    /// Fallback package used when no simulation session is active.
    pub const FALLBACK: SeedPackage = SeedPackage([0x51ED_0001, 0x51ED_0002, 0x51ED_0003, 0x51ED_0004]);

    /// Folds the four parts into one 64-bit generator seed.
    pub fn fold(self) -> u64 {
        let [a, b, c, d] = self.0;
        (u64::from(a) << 32 | u64::from(b)) ^ (u64::from(c) << 32 | u64::from(d)).rotate_left(17)
    }
}

/// SplitMix64: small, fast, and good enough for seed derivation.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform value in `0..bound`; returns 0 for a zero bound.
    pub fn next_below(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        self.next_u32() % bound
    }

    pub fn next_seed_package(&mut self) -> SeedPackage {
        SeedPackage([self.next_u32(), self.next_u32(), self.next_u32(), self.next_u32()])
    }
}
