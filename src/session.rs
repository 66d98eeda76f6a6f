//! Live conversation session.
//!
//! Owns the remote channel, the microphone stream and the playback scheduler.
//! Startup acquires the input device, then the output device, then connects;
//! the capture pipeline is wired to the channel only once the remote side
//! reports the session open. Every inbound message is routed in a fixed
//! order: audio to the scheduler, transcript deltas to the assembler, then
//! turn boundaries (with barge-in stopping all queued audio).
//!
//! Teardown releases each resource at most once and keeps going when one of
//! them fails, so it can run from `stop()`, a remote close, a channel error
//! or `Drop` in any order.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::audio::capture::{CapturePipeline, CaptureStream};
use crate::audio::codec::WireChunk;
use crate::audio::device::AudioBackend;
use crate::audio::playback::{HandleId, PlaybackScheduler};
use crate::audio::state::SessionState;
use crate::error::SessionError;
use crate::live::{AudioPayload, ChannelConnector, ChannelEvent, ConnectParams, InboundMessage, RemoteChannel};
use crate::transcript::{Partials, TranscriptAssembler, TranscriptItem};

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub params: ConnectParams,
    /// Budget for connecting and receiving the open event.
    pub connect_timeout: Duration,
    pub start_muted: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            params: ConnectParams {
                target_language: "Spanish".into(),
                native_language: "English".into(),
            },
            connect_timeout: Duration::from_secs(15),
            start_muted: false,
        }
    }
}

/// Notifications for whoever drives the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    StateChanged { from: SessionState, to: SessionState },
    Partial(Partials),
    TurnCommitted(Vec<TranscriptItem>),
    /// Barge-in: queued agent audio was cut off.
    Interrupted { stopped: usize },
    Error(String),
}

/// Work for the dispatch loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Channel(ChannelEvent),
    PlaybackFinished(HandleId),
}

pub struct LiveSession<B: AudioBackend, C: ChannelConnector> {
    id: String,
    backend: B,
    connector: C,
    config: SessionConfig,
    state: SessionState,
    /// Mute requested by the user; applied to capture once the channel opens.
    mute_requested: bool,
    capture: CapturePipeline,
    input: Option<Box<dyn CaptureStream>>,
    scheduler: Option<PlaybackScheduler>,
    channel: Option<Box<dyn RemoteChannel>>,
    channel_events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    playback_finished: Option<mpsc::UnboundedReceiver<HandleId>>,
    transcript: TranscriptAssembler,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl<B: AudioBackend, C: ChannelConnector> LiveSession<B, C> {
    /// Create an idle session. Updates are delivered on the returned receiver.
    pub fn new(
        backend: B,
        connector: C,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let id = format!("live-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let mute_requested = config.start_muted;
        let session = Self {
            id,
            backend,
            connector,
            config,
            state: SessionState::Idle,
            mute_requested,
            capture: CapturePipeline::new(),
            input: None,
            scheduler: None,
            channel: None,
            channel_events: None,
            playback_finished: None,
            transcript: TranscriptAssembler::new(),
            updates,
        };
        (session, updates_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &[TranscriptItem] {
        self.transcript.history()
    }

    pub fn partials(&self) -> Partials {
        self.transcript.partials()
    }

    /// Frames sent to the remote agent so far.
    pub fn frames_sent(&self) -> u64 {
        self.capture.forwarded_frames()
    }

    /// Acquire devices, connect and wait for the remote side to open.
    ///
    /// Any failure leaves the session `Failed` with everything released.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState {
                state: self.state,
                action: "start",
            });
        }
        info!(session = %self.id, target = %self.config.params.target_language, "Starting live session");

        self.transition(SessionState::AcquiringDevice);
        if let Err(e) = self.acquire_devices() {
            return Err(self.fail(e.into()));
        }

        self.transition(SessionState::Connecting);
        let deadline = Instant::now() + self.config.connect_timeout;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.channel_events = Some(events_rx);

        let connect = self.connector.connect(self.config.params.clone(), events_tx);
        let connected = timeout_at(deadline, connect).await;
        match connected {
            Ok(Ok(channel)) => self.channel = Some(channel),
            Ok(Err(e)) => return Err(self.fail(e.into())),
            Err(_) => return Err(self.fail(self.timeout_error())),
        }

        let opened = timeout_at(deadline, self.wait_for_open()).await;
        match opened {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.fail(e)),
            Err(_) => Err(self.fail(self.timeout_error())),
        }
    }

    fn timeout_error(&self) -> SessionError {
        SessionError::ChannelConnection(format!(
            "no open event within {}s",
            self.config.connect_timeout.as_secs_f32()
        ))
    }

    /// Input first, then output. A device already acquired stays stored so
    /// teardown can release it.
    fn acquire_devices(&mut self) -> Result<(), crate::error::AudioError> {
        let input = self.backend.open_input(self.capture.clone())?;
        self.input = Some(input);

        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let output = self.backend.open_output(finished_tx)?;
        self.scheduler = Some(PlaybackScheduler::new(output));
        self.playback_finished = Some(finished_rx);
        debug!(session = %self.id, "Audio devices acquired");
        Ok(())
    }

    async fn wait_for_open(&mut self) -> Result<(), SessionError> {
        loop {
            let event = match self.channel_events.as_mut() {
                Some(rx) => rx.recv().await,
                None => None,
            };
            match event {
                Some(ChannelEvent::Open) => {
                    self.on_open();
                    return Ok(());
                }
                Some(ChannelEvent::Message(message)) => self.route_message(message),
                Some(ChannelEvent::Closed { reason }) => {
                    return Err(SessionError::ChannelConnection(format!(
                        "closed before open: {}",
                        reason.as_deref().unwrap_or("no reason given")
                    )));
                }
                Some(ChannelEvent::Error(message)) => {
                    return Err(SessionError::ChannelConnection(message));
                }
                None => {
                    return Err(SessionError::ChannelConnection(
                        "channel dropped before open".into(),
                    ))
                }
            }
        }
    }

    /// Wait for the next channel event or playback completion.
    ///
    /// Returns `None` once the session has no event sources left.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let finished = self.playback_finished.as_mut();
        let events = self.channel_events.as_mut();
        tokio::select! {
            Some(id) = recv_from(finished) => Some(SessionEvent::PlaybackFinished(id)),
            Some(event) = recv_from(events) => Some(SessionEvent::Channel(event)),
            else => None,
        }
    }

    /// Apply one event. Runs to completion before the next is taken.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::PlaybackFinished(id) => {
                if let Some(scheduler) = self.scheduler.as_mut() {
                    if scheduler.release(id) {
                        debug!(id = %id, remaining = scheduler.active_count(), "Chunk finished");
                    }
                }
            }
            SessionEvent::Channel(ChannelEvent::Open) => self.on_open(),
            SessionEvent::Channel(ChannelEvent::Message(message)) => self.route_message(message),
            SessionEvent::Channel(ChannelEvent::Closed { reason }) => {
                if !self.state.is_terminal() {
                    info!(session = %self.id, reason = ?reason, "Remote side closed the session");
                    self.stop();
                }
            }
            SessionEvent::Channel(ChannelEvent::Error(message)) => {
                if !self.state.is_terminal() {
                    self.fail(SessionError::ChannelConnection(message));
                }
            }
        }
    }

    fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            debug!(session = %self.id, state = %self.state, "Ignoring open event");
            return;
        }
        let Some(channel) = self.channel.as_ref() else {
            warn!(session = %self.id, "Open event without a channel");
            return;
        };
        self.capture.set_muted(self.mute_requested);
        self.capture.wire(channel.outbound());
        let next = if self.mute_requested {
            SessionState::Muted
        } else {
            SessionState::Open
        };
        self.transition(next);
        info!(session = %self.id, muted = self.mute_requested, "Live session open");
    }

    fn route_message(&mut self, message: InboundMessage) {
        if self.state.is_terminal() || self.state == SessionState::Closing {
            return;
        }

        for payload in &message.audio {
            self.play_payload(payload);
        }

        let mut partial_changed = false;
        if let Some(delta) = message.input_transcription_delta.as_deref() {
            self.transcript.push_user_delta(delta);
            partial_changed = true;
        }
        if let Some(delta) = message.output_transcription_delta.as_deref() {
            self.transcript.push_agent_delta(delta);
            partial_changed = true;
        }

        if message.is_turn_boundary() {
            self.commit_turn();
            if message.interrupted {
                let stopped = self
                    .scheduler
                    .as_mut()
                    .map(PlaybackScheduler::interrupt)
                    .unwrap_or(0);
                self.publish(SessionUpdate::Interrupted { stopped });
            }
        } else if partial_changed {
            self.publish(SessionUpdate::Partial(self.transcript.partials()));
        }
    }

    /// Decode and schedule one audio payload. Failures drop this chunk only.
    fn play_payload(&mut self, payload: &AudioPayload) {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        let scheduled = WireChunk::from_base64(&payload.data, payload.sample_rate, 1)
            .and_then(|chunk| chunk.decode())
            .and_then(|buffer| scheduler.schedule(buffer));
        if let Err(e) = scheduled {
            warn!(session = %self.id, "Dropping agent audio chunk: {}", e);
        }
    }

    fn commit_turn(&mut self) {
        let committed = self.transcript.flush();
        if !committed.is_empty() {
            self.publish(SessionUpdate::TurnCommitted(committed));
        }
        self.publish(SessionUpdate::Partial(Partials::default()));
    }

    /// Mute or unmute the microphone without touching the device.
    pub fn set_muted(&mut self, muted: bool) -> Result<(), SessionError> {
        if self.state.is_terminal() || self.state == SessionState::Closing {
            return Err(SessionError::InvalidState {
                state: self.state,
                action: "change mute",
            });
        }
        self.mute_requested = muted;
        if !self.state.is_live() {
            debug!(session = %self.id, muted, "Mute recorded until the channel opens");
            return Ok(());
        }

        self.capture.set_muted(muted);
        let next = if muted {
            SessionState::Muted
        } else {
            SessionState::Open
        };
        if next != self.state {
            self.transition(next);
        }
        Ok(())
    }

    /// Close the session and release everything. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.state.is_terminal() || self.state == SessionState::Closing {
            return;
        }
        self.transition(SessionState::Closing);
        self.release_resources();
        self.transition(SessionState::Closed);
        info!(
            session = %self.id,
            turns = self.transcript.history().len(),
            frames_sent = self.capture.forwarded_frames(),
            frames_dropped = self.capture.dropped_frames(),
            "Live session closed"
        );
    }

    /// Terminal failure: report, release everything, end in `Failed`.
    fn fail(&mut self, err: SessionError) -> SessionError {
        error!(session = %self.id, state = %self.state, "Live session failed: {}", err);
        self.publish(SessionUpdate::Error(err.to_string()));
        self.transition(SessionState::Failed);
        self.release_resources();
        err
    }

    fn release_resources(&mut self) {
        self.capture.unwire();

        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.close() {
                warn!(session = %self.id, "Failed to close channel: {}", e);
            }
        }
        if let Some(mut input) = self.input.take() {
            if let Err(e) = input.close() {
                warn!(session = %self.id, "Failed to release input device: {}", e);
            }
        }
        if let Some(scheduler) = self.scheduler.take() {
            if let Err(e) = scheduler.shutdown() {
                warn!(session = %self.id, "Failed to release output device: {}", e);
            }
        }
        self.channel_events = None;
        self.playback_finished = None;

        // Whatever was heard so far still belongs in the transcript.
        let committed = self.transcript.flush();
        if !committed.is_empty() {
            self.publish(SessionUpdate::TurnCommitted(committed));
        }
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(session = %self.id, from = %self.state, to = %next, "Rejected state transition");
            return;
        }
        let from = std::mem::replace(&mut self.state, next);
        info!(session = %self.id, %from, to = %next, "Session state changed");
        self.publish(SessionUpdate::StateChanged { from, to: next });
    }

    fn publish(&self, update: SessionUpdate) {
        // Nobody listening is fine.
        let _ = self.updates.send(update);
    }
}

impl<B: AudioBackend, C: ChannelConnector> Drop for LiveSession<B, C> {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.stop();
        }
    }
}

async fn recv_from<T>(rx: Option<&mut mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => None,
    }
}
