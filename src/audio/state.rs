//! Session lifecycle states.
//!
//! Owned by the session object. The only non-monotonic edge is `Open <-> Muted`;
//! `Closed` and `Failed` are terminal.

use serde::Serialize;

/// Lifecycle of one live conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    /// Created, nothing acquired yet.
    Idle = 0,
    /// Opening the microphone and the output device.
    AcquiringDevice = 1,
    /// Devices held, waiting for the remote channel to open.
    Connecting = 2,
    /// Capture frames are being forwarded.
    Open = 3,
    /// Open, but capture frames are dropped before encoding.
    Muted = 4,
    /// Teardown in progress.
    Closing = 5,
    Closed = 6,
    Failed = 7,
}

impl SessionState {
    /// Whether this state is final. Both terminal states have had teardown run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Whether the channel is open (muted or not).
    pub fn is_live(self) -> bool {
        matches!(self, Self::Open | Self::Muted)
    }

    /// Whether `self -> next` is a legal edge.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed | Failed, _) => false,
            (_, Failed) => true,
            (Idle, AcquiringDevice) => true,
            (AcquiringDevice, Connecting) => true,
            (Connecting, Open) => true,
            (Connecting, Muted) => true,
            (Open, Muted) | (Muted, Open) => true,
            (Idle | AcquiringDevice | Connecting | Open | Muted, Closing) => true,
            (Closing, Closed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AcquiringDevice => write!(f, "acquiring_device"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Muted => write!(f, "muted"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
