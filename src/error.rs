//! Error types shared across the engine.

use thiserror::Error;

use crate::audio::state::SessionState;

/// Errors raised by the codec, the playback scheduler and the audio devices.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Byte length is not a whole number of sample frames.
    #[error("malformed audio data: {len} bytes is not a multiple of {frame_bytes}")]
    MalformedAudioData { len: usize, frame_bytes: usize },

    #[error("invalid audio format: {0}")]
    InvalidFormat(String),

    /// A single chunk could not be placed on the output timeline.
    #[error("playback scheduling failed: {0}")]
    PlaybackScheduling(String),

    /// Permission denied or no device present.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio device error: {0}")]
    Device(String),
}

/// Errors raised by the remote conversational channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("failed to send: {0}")]
    Send(String),

    #[error("channel already closed")]
    Closed,
}

/// Errors surfaced to the owner of a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Terminal: the user must fix permissions/hardware and start a new session.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Terminal: the session has been torn down. Reconnecting is up to the caller.
    #[error("channel connection error: {0}")]
    ChannelConnection(String),

    #[error("cannot {action} while session is {state}")]
    InvalidState {
        state: SessionState,
        action: &'static str,
    },
}

impl From<AudioError> for SessionError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::DeviceUnavailable(msg) => SessionError::DeviceUnavailable(msg),
            other => SessionError::DeviceUnavailable(other.to_string()),
        }
    }
}

impl From<ChannelError> for SessionError {
    fn from(e: ChannelError) -> Self {
        SessionError::ChannelConnection(e.to_string())
    }
}
