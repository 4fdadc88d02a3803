//! Marsaglia multiply-with-carry generator for reproducible key sets.
//!
//! Two 16-bit lag-1 MWC generators combined into one 32-bit output. Same seed,
//! same keys on every platform, which keeps benchmark inputs comparable
//! between runs.

use rand::{Error, RngCore};

const DEFAULT_Z: u32 = 362_436_069;
const DEFAULT_W: u32 = 521_288_629;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mwc {
    z: u32,
    w: u32,
}

impl Default for Mwc {
    fn default() -> Self {
        Self {
            z: DEFAULT_Z,
            w: DEFAULT_W,
        }
    }
}

impl Mwc {
    /// Generator whose state is derived from `seed`. Seed 0 gives the
    /// default state.
    pub fn seeded(seed: u64) -> Self {
        let z = DEFAULT_Z ^ (seed as u32);
        let w = DEFAULT_W ^ ((seed >> 32) as u32);
        // A zero half would get stuck at zero.
        Self {
            z: if z == 0 { DEFAULT_Z } else { z },
            w: if w == 0 { DEFAULT_W } else { w },
        }
    }

    #[inline]
    pub fn next_key(&mut self) -> u32 {
        self.z = 36969u32
            .wrapping_mul(self.z & 0xFFFF)
            .wrapping_add(self.z >> 16);
        self.w = 18000u32
            .wrapping_mul(self.w & 0xFFFF)
            .wrapping_add(self.w >> 16);
        (self.z << 16).wrapping_add(self.w)
    }

    /// `len` keys from the generator.
    pub fn keys(&mut self, len: usize) -> Vec<u32> {
        (0..len).map(|_| self.next_key()).collect()
    }
}

impl RngCore for Mwc {
    fn next_u32(&mut self) -> u32 {
        self.next_key()
    }

    fn next_u64(&mut self) -> u64 {
        let low = self.next_key() as u64;
        let high = self.next_key() as u64;
        (high << 32) | low
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_key().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
