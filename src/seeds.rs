//! Seed management for a terrain session
//!
//! Provides separate seeds for each random consumer so that shared terrain
//! stays identical across clients while autonomous evolution can diverge.

/// Seeds for the random consumers of one session.
///
/// Each consumer gets its own seed, derived from a master seed by default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSeeds {
    /// Master seed (used for display/reference)
    pub master: u64,
    /// Height-field generation and rebuilds; must match on every client
    pub terrain: u64,
    /// Autonomous evolution while no server is reachable
    pub local_evolution: u64,
}

impl SessionSeeds {
    /// Create seeds from a master seed, deriving all sub-seeds deterministically.
    pub fn from_master(master: u64) -> Self {
        Self {
            master,
            terrain: derive_seed(master, "terrain"),
            local_evolution: derive_seed(master, "local_evolution"),
        }
    }

    /// Override the terrain seed, e.g. with the one announced by the server.
    pub fn with_terrain(mut self, seed: u64) -> Self {
        self.terrain = seed;
        self
    }

    /// Seed for the diamond-square re-run that follows the `index`-th seed
    /// point. Depends only on the terrain seed, so late joiners replay edits
    /// with the same draws as everyone else.
    pub fn seed_point(&self, index: usize) -> u64 {
        derive_seed(self.terrain ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15), "seed_point")
    }
}

/// Derive a sub-seed from a master seed and a consumer name.
///
/// FNV-1a over the name, folded with the master through a SplitMix64 finalizer.
/// `DefaultHasher` is not guaranteed stable across builds, and these seeds
/// have to agree between independently built clients.
fn derive_seed(master: u64, system: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in system.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    splitmix64(master ^ hash)
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl std::fmt::Display for SessionSeeds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SessionSeeds {{ master: {}, terrain: {}, local_evolution: {} }}",
            self.master, self.terrain, self.local_evolution,
        )
    }
}
