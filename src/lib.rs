//! Real-time voice conversation engine.
//!
//! Captures the microphone, streams it to a remote conversational agent,
//! plays the agent's speech back gaplessly and assembles a turn-ordered
//! transcript, with barge-in support.

pub mod audio;
pub mod config;
pub mod error;
pub mod ipc;
pub mod live;
pub mod logging;
pub mod session;
pub mod transcript;

pub use error::{AudioError, ChannelError, SessionError};
pub use session::{LiveSession, SessionConfig, SessionEvent, SessionUpdate};
pub use transcript::{Role, TranscriptItem};
