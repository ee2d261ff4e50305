//! SOS lifecycle: Idle → Activating → Active → Idle.
//! Activating is transient within one activation attempt; any state may fall
//! back to Idle on deactivation or a fatal activation error.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

/// Lifecycle state of the SOS session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SosState {
    Idle,
    Activating,
    Active,
}

impl std::fmt::Display for SosState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SosState::Idle => write!(f, "Idle"),
            SosState::Activating => write!(f, "Activating"),
            SosState::Active => write!(f, "Active"),
        }
    }
}

impl SosState {
    /// Returns whether transitioning from `self` to `next` is valid.
    pub fn can_transition_to(self, next: SosState) -> bool {
        matches!(
            (self, next),
            (SosState::Idle, SosState::Activating)
                | (SosState::Activating, SosState::Active)
                | (SosState::Activating, SosState::Idle) // capture denied / aborted
                | (SosState::Active, SosState::Idle)
        )
    }
}

/// Last known state of the outbound peer stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Inactive,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamState::Inactive => "inactive",
            StreamState::Connecting => "connecting",
            StreamState::Connected => "connected",
            StreamState::Disconnected => "disconnected",
            StreamState::Failed => "failed",
            StreamState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Thread-safe lifecycle machine with a watch channel for reactive subscribers.
pub struct StateMachine {
    state: RwLock<SosState>,
    state_tx: watch::Sender<SosState>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(SosState::Idle);
        Self {
            state: RwLock::new(SosState::Idle),
            state_tx,
        }
    }

    /// Current state (non-blocking read).
    pub fn current(&self) -> SosState {
        *self.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.current() == SosState::Active
    }

    /// Attempt a state transition. Returns Ok(new_state) or Err with reason.
    pub fn transition(&self, next: SosState) -> Result<SosState, String> {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition_to(next) {
            let msg = format!("invalid transition: {} -> {}", current, next);
            warn!("{}", msg);
            return Err(msg);
        }
        *state = next;
        self.state_tx.send_replace(next);
        info!(from = %current, to = %next, "sos_transition");
        Ok(next)
    }

    /// Force Idle from any state. Returns the state that was left.
    pub fn force_idle(&self) -> SosState {
        let mut state = self.state.write();
        let prev = *state;
        *state = SosState::Idle;
        self.state_tx.send_replace(SosState::Idle);
        if prev != SosState::Idle {
            info!(from = %prev, "force_idle");
        }
        prev
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SosState> {
        self.state_tx.subscribe()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_path_is_validated() {
        let sm = StateMachine::new();
        assert!(sm.transition(SosState::Active).is_err());
        assert_eq!(sm.transition(SosState::Activating), Ok(SosState::Activating));
        assert!(sm.transition(SosState::Activating).is_err());
        assert_eq!(sm.transition(SosState::Active), Ok(SosState::Active));
        assert!(sm.transition(SosState::Activating).is_err());
        assert_eq!(sm.transition(SosState::Idle), Ok(SosState::Idle));
    }

    #[test]
    fn force_idle_reports_previous_state() {
        let sm = StateMachine::new();
        assert_eq!(sm.force_idle(), SosState::Idle);
        sm.transition(SosState::Activating).unwrap();
        assert_eq!(sm.force_idle(), SosState::Activating);
        assert_eq!(sm.current(), SosState::Idle);
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let sm = StateMachine::new();
        let mut rx = sm.subscribe();
        sm.transition(SosState::Activating).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SosState::Activating);
    }

    #[test]
    fn stream_state_renders_lowercase() {
        assert_eq!(StreamState::Closed.to_string(), "closed");
        assert_eq!(
            serde_json::to_string(&StreamState::Disconnected).unwrap(),
            "\"disconnected\""
        );
    }
}
