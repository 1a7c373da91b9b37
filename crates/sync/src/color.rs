// Presence color allocation.
//
// A `ColorPool` is shared by the sessions that should not collide. When every
// palette entry is taken the in-use set is cleared and allocation starts
// over, so colors can repeat across sessions under palette pressure.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, warn};

pub const DEFAULT_PALETTE: [&str; 10] = [
    "#e06c75", "#61afef", "#98c379", "#c678dd", "#e5c07b", "#56b6c2", "#d19a66", "#be5046",
    "#ff79c6", "#2bbac5",
];

struct PoolState {
    palette: Vec<String>,
    in_use: HashSet<String>,
    rng: StdRng,
}

#[derive(Clone)]
pub struct ColorPool {
    state: Arc<Mutex<PoolState>>,
}

impl ColorPool {
    pub fn new(palette: Vec<String>) -> Self {
        Self::with_rng(palette, StdRng::from_entropy())
    }

    /// Deterministic allocation order, for tests.
    pub fn with_seed(palette: Vec<String>, seed: u64) -> Self {
        Self::with_rng(palette, StdRng::seed_from_u64(seed))
    }

    fn with_rng(palette: Vec<String>, rng: StdRng) -> Self {
        let mut unique = Vec::with_capacity(palette.len());
        for color in palette {
            if !unique.contains(&color) {
                unique.push(color);
            }
        }
        if unique.is_empty() {
            warn!("empty presence palette, using the default palette");
            unique = DEFAULT_PALETTE.iter().map(|color| color.to_string()).collect();
        }
        Self {
            state: Arc::new(Mutex::new(PoolState { palette: unique, in_use: HashSet::new(), rng })),
        }
    }

    /// Pick a random free color and mark it in use.
    pub fn allocate(&self) -> String {
        let mut guard = self.state();
        let state = &mut *guard;
        let mut free: Vec<&String> =
            state.palette.iter().filter(|color| !state.in_use.contains(*color)).collect();
        if free.is_empty() {
            debug!(palette = state.palette.len(), "presence palette exhausted, recycling colors");
            state.in_use.clear();
            free = state.palette.iter().collect();
        }
        let color = free
            .choose(&mut state.rng)
            .map(|color| (*color).clone())
            .unwrap_or_else(|| DEFAULT_PALETTE[0].to_string());
        state.in_use.insert(color.clone());
        color
    }

    /// Return a color to the pool. `false` if it was not marked in use.
    pub fn release(&self, color: &str) -> bool {
        self.state().in_use.remove(color)
    }

    pub fn in_use_count(&self) -> usize {
        self.state().in_use.len()
    }

    pub fn is_in_use(&self, color: &str) -> bool {
        self.state().in_use.contains(color)
    }

    pub fn palette(&self) -> Vec<String> {
        self.state().palette.clone()
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ColorPool {
    fn default() -> Self {
        Self::new(DEFAULT_PALETTE.iter().map(|color| color.to_string()).collect())
    }
}

impl std::fmt::Debug for ColorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ColorPool")
            .field("palette", &state.palette.len())
            .field("in_use", &state.in_use.len())
            .finish()
    }
}
