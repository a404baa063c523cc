//! Virtual users

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

/// Lifecycle of a virtual user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VuState {
    Idle,
    Running,
    /// Told to stop; finishes its current iteration first
    Retiring,
    Terminated,
}

/// One simulated client repeatedly running the workflow
///
/// Each user owns its random source, seeded from the run seed and its id, so
/// a user's branch choices do not depend on how other users are scheduled.
#[derive(Debug)]
pub struct VirtualUser {
    id: u64,
    iteration: u64,
    rng: StdRng,
    state: VuState,
}

impl VirtualUser {
    pub fn new(id: u64, run_seed: u64) -> Self {
        Self {
            id,
            iteration: 0,
            rng: StdRng::seed_from_u64(Self::seed_for(id, run_seed)),
            state: VuState::Idle,
        }
    }

    fn seed_for(id: u64, run_seed: u64) -> u64 {
        run_seed.wrapping_add(id.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Iterations started so far
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn state(&self) -> VuState {
        self.state
    }

    pub fn set_state(&mut self, state: VuState) {
        self.state = state;
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Move to the next iteration, returning its zero-based index
    pub(crate) fn advance(&mut self) -> u64 {
        let current = self.iteration;
        self.iteration += 1;
        current
    }
}
