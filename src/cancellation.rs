//! Activation generations: one CancellationToken per SOS cycle.
//! Subsystems of a finished cycle cannot write into the next one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Issues a fresh token per activation and advances a generation counter on
/// every cancellation, so guards handed out earlier go stale.
pub struct SessionGeneration {
    current_token: RwLock<CancellationToken>,
    generation: Arc<AtomicU64>,
}

impl SessionGeneration {
    pub fn new() -> Self {
        Self {
            current_token: RwLock::new(CancellationToken::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cancel the running cycle (if any), start a new one and return its guard.
    pub fn advance(&self) -> GenerationGuard {
        let mut token_guard = self.current_token.write();
        token_guard.cancel();
        let new_root = CancellationToken::new();
        let child = new_root.child_token();
        *token_guard = new_root;
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        GenerationGuard::new(Arc::clone(&self.generation), gen, child)
    }

    /// Cancel the running cycle and invalidate its guards without issuing a
    /// new token. Returns the new generation.
    pub fn cancel_current(&self) -> u64 {
        let token_guard = self.current_token.read();
        token_guard.cancel();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

}

impl Default for SessionGeneration {
    fn default() -> Self {
        Self::new()
    }
}

/// Checked by a subsystem before it writes session state.
#[derive(Clone)]
pub struct GenerationGuard {
    generation: Arc<AtomicU64>,
    my_generation: u64,
    token: CancellationToken,
}

impl GenerationGuard {
    fn new(generation: Arc<AtomicU64>, my_generation: u64, token: CancellationToken) -> Self {
        Self {
            generation,
            my_generation,
            token,
        }
    }

    /// Returns true if this cycle is still the current generation.
    #[inline]
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.my_generation
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Not cancelled and still current.
    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn my_generation(&self) -> u64 {
        self.my_generation
    }
}
