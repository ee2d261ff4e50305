//! Transient user-visible notices (the front-end shows them as toasts).
//! Unbounded crossbeam channel: raising a notice never blocks a subsystem.

use crossbeam_channel as cb;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Notice {
    /// Capture device denied or failed; activation aborted.
    PermissionDenied,
    /// Location subscription reported an error; session continues.
    LocationUnavailable,
    /// One audio segment could not be classified; session continues.
    ThreatDetectionFailed,
}

impl Notice {
    pub fn title(self) -> &'static str {
        match self {
            Notice::PermissionDenied => "Permission Denied",
            Notice::LocationUnavailable => "Error",
            Notice::ThreatDetectionFailed => "AI Error",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Notice::PermissionDenied => {
                "Camera and microphone access is required to activate SOS."
            }
            Notice::LocationUnavailable => "Could not get location.",
            Notice::ThreatDetectionFailed => "Audio threat detection failed.",
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title(), self.description())
    }
}

/// Sending half handed to the session.
#[derive(Clone)]
pub struct Notifier {
    tx: cb::Sender<Notice>,
}

impl Notifier {
    pub fn channel() -> (Self, cb::Receiver<Notice>) {
        let (tx, rx) = cb::unbounded();
        (Self { tx }, rx)
    }

    pub fn raise(&self, notice: Notice) {
        if self.tx.send(notice).is_err() {
            debug!(notice = ?notice, "notice dropped (no receiver)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_arrive_in_order() {
        let (notifier, rx) = Notifier::channel();
        notifier.raise(Notice::LocationUnavailable);
        notifier.raise(Notice::ThreatDetectionFailed);
        assert_eq!(rx.try_recv(), Ok(Notice::LocationUnavailable));
        assert_eq!(rx.try_recv(), Ok(Notice::ThreatDetectionFailed));
    }

    #[test]
    fn raising_without_receiver_does_not_panic() {
        let (notifier, rx) = Notifier::channel();
        drop(rx);
        notifier.raise(Notice::PermissionDenied);
    }

    #[test]
    fn display_joins_title_and_description() {
        assert_eq!(
            Notice::LocationUnavailable.to_string(),
            "Error: Could not get location."
        );
    }
}
