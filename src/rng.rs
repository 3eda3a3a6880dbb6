//! Seedable random number generator for deterministic testing.
//!
//! When a seed is provided via [`Config::rng_seed`](crate::Config::rng_seed),
//! randoms, key shares and timer jitter are deterministic. Otherwise the
//! generator is seeded from OS entropy.

use rand::distributions::{Distribution, Standard};
use rand::rngs::StdRng;
use rand::{CryptoRng, Rng, RngCore, SeedableRng};

use crate::Role;

/// A cryptographically secure generator that can be seeded.
pub(crate) struct SeededRng {
    inner: StdRng,
    seeded: bool,
}

impl SeededRng {
    /// Create a new RNG with an optional seed.
    ///
    /// The role is mixed into the seed so that a client and a server sharing
    /// one configuration do not draw the same values.
    pub fn new(seed: Option<u64>, role: Role) -> Self {
        let inner = match seed {
            Some(seed) => {
                let salt = match role {
                    Role::Client => 0x636c_6965_6e74,
                    Role::Server => 0x7365_7276_6572,
                };
                StdRng::seed_from_u64(seed ^ salt)
            }
            None => StdRng::from_entropy(),
        };

        Self {
            inner,
            seeded: seed.is_some(),
        }
    }

    /// Generate a random value of type T.
    pub fn random<T>(&mut self) -> T
    where
        Standard: Distribution<T>,
    {
        self.inner.gen()
    }
}

impl RngCore for SeededRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

// StdRng is a CSPRNG.
impl CryptoRng for SeededRng {}

impl std::fmt::Debug for SeededRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRng")
            .field("seeded", &self.seeded)
            .finish()
    }
}
