//! Remote conversational channel.
//!
//! The session talks to the remote agent through [`ChannelConnector`] and
//! [`RemoteChannel`]. Callback-style notifications (open, message, close,
//! error) are delivered as [`ChannelEvent`]s on an mpsc queue so the session
//! can process them in a single dispatch loop.

pub mod gemini;

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::audio::capture::OutboundSender;
use crate::audio::codec::OUTPUT_SAMPLE_RATE;
use crate::error::ChannelError;

pub use gemini::GeminiConnector;

/// Base64 audio carried by an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub data: String,
    pub sample_rate: u32,
}

impl AudioPayload {
    /// Payload at the agent's fixed 24 kHz rate.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            sample_rate: OUTPUT_SAMPLE_RATE,
        }
    }
}

/// One message from the remote agent. Any combination of fields may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub audio: Vec<AudioPayload>,
    pub input_transcription_delta: Option<String>,
    pub output_transcription_delta: Option<String>,
    pub turn_complete: bool,
    pub interrupted: bool,
}

impl InboundMessage {
    /// True when the message ends the current turn.
    pub fn is_turn_boundary(&self) -> bool {
        self.turn_complete || self.interrupted
    }
}

/// Notifications from the channel, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The remote side accepted the session; audio may flow.
    Open,
    Message(InboundMessage),
    Closed { reason: Option<String> },
    Error(String),
}

pub type ChannelEventSender = mpsc::UnboundedSender<ChannelEvent>;

/// What the conversation is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub target_language: String,
    pub native_language: String,
}

impl ConnectParams {
    /// Tutor persona handed to the remote agent.
    pub fn system_instruction(&self) -> String {
        format!(
            "You are a friendly tutor. Practice {} with the user. Native: {}.",
            self.target_language, self.native_language
        )
    }
}

/// An open session with the remote agent.
pub trait RemoteChannel: Send {
    /// Queue for realtime audio input. Sends never block.
    fn outbound(&self) -> OutboundSender;

    /// Close the session. Called at most once by the owner.
    fn close(&mut self) -> Result<(), ChannelError>;
}

/// Opens [`RemoteChannel`]s.
pub trait ChannelConnector {
    /// Connect and start delivering events on `events`. The returned channel
    /// is usable for sending once [`ChannelEvent::Open`] has been delivered.
    fn connect(
        &self,
        params: ConnectParams,
        events: ChannelEventSender,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn RemoteChannel>, ChannelError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_instruction_mentions_languages() {
        let params = ConnectParams {
            target_language: "Spanish".into(),
            native_language: "English".into(),
        };
        let text = params.system_instruction();
        assert!(text.contains("Practice Spanish"));
        assert!(text.contains("Native: English"));
    }

    #[test]
    fn test_turn_boundary() {
        assert!(!InboundMessage::default().is_turn_boundary());
        let done = InboundMessage {
            turn_complete: true,
            ..Default::default()
        };
        assert!(done.is_turn_boundary());
        let cut = InboundMessage {
            interrupted: true,
            ..Default::default()
        };
        assert!(cut.is_turn_boundary());
    }
}
