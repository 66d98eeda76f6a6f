//! Gemini Live client over WebSocket.
//!
//! Protocol (BidiGenerateContent):
//! 1. Connect to the streaming endpoint with the API key as `key` query param
//! 2. Send a `setup` frame: model, AUDIO response modality, voice, system
//!    instruction, input/output audio transcription enabled
//! 3. `setupComplete` from the server opens the session
//! 4. Stream microphone audio as `realtimeInput.mediaChunks`
//! 5. Receive `serverContent` frames: audio parts, transcription deltas,
//!    `turnComplete` and `interrupted` flags

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use std::future::Future;
use std::pin::Pin;

use super::{
    AudioPayload, ChannelConnector, ChannelEvent, ChannelEventSender, ConnectParams,
    InboundMessage, RemoteChannel,
};
use crate::audio::capture::OutboundSender;
use crate::audio::codec::{WireChunk, OUTPUT_SAMPLE_RATE};
use crate::error::ChannelError;

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";
pub const DEFAULT_VOICE: &str = "Kore";

/// Connects to the Gemini Live API.
#[derive(Debug, Clone)]
pub struct GeminiConnector {
    endpoint: String,
    api_key: String,
    model: String,
    voice_name: String,
}

impl GeminiConnector {
    pub fn new(api_key: &str) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice_name: DEFAULT_VOICE.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_voice(mut self, voice_name: &str) -> Self {
        self.voice_name = voice_name.to_string();
        self
    }

    /// Endpoint URL with the API key attached.
    fn build_url(&self) -> Result<Url, ChannelError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ChannelError::Connect(format!("Invalid endpoint URL: {e}")))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    fn model_path(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }
}

impl ChannelConnector for GeminiConnector {
    fn connect(
        &self,
        params: ConnectParams,
        events: ChannelEventSender,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn RemoteChannel>, ChannelError>> + Send + '_>> {
        Box::pin(async move {
            if self.api_key.trim().is_empty() {
                return Err(ChannelError::Connect("Gemini Live requires an API key".into()));
            }
            let url = self.build_url()?;
            info!(
                host = url.host_str().unwrap_or("?"),
                model = %self.model,
                target = %params.target_language,
                "Connecting to Gemini Live"
            );

            let (ws_stream, _) = connect_async(url.as_str())
                .await
                .map_err(|e| ChannelError::Connect(e.to_string()))?;
            let (mut ws_sink, mut ws_stream) = ws_stream.split();

            let setup = setup_frame(&self.model_path(), &self.voice_name, &params);
            ws_sink
                .send(Message::Text(setup.to_string()))
                .await
                .map_err(|e| ChannelError::Connect(format!("Failed to send setup: {e}")))?;
            debug!("Setup frame sent");

            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireChunk>();
            let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(chunk) = outbound_rx.recv() => {
                            let frame = realtime_input_frame(&chunk);
                            if let Err(e) = ws_sink.send(Message::Text(frame.to_string())).await {
                                let err = ChannelError::Send(e.to_string());
                                error!("Failed to send realtime input: {}", err);
                                let _ = events.send(ChannelEvent::Error(err.to_string()));
                                break;
                            }
                        }

                        message = ws_stream.next() => {
                            match message {
                                Some(Ok(msg)) => {
                                    if !handle_ws_message(msg, &events) {
                                        break;
                                    }
                                }
                                Some(Err(e)) => {
                                    error!("WebSocket error: {}", e);
                                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                                    break;
                                }
                                None => {
                                    info!("WebSocket stream ended");
                                    let _ = events.send(ChannelEvent::Closed { reason: None });
                                    break;
                                }
                            }
                        }

                        // Explicit close, or the channel handle was dropped.
                        _ = &mut shutdown_rx => {
                            debug!("Closing Gemini Live socket");
                            if let Err(e) = ws_sink.send(Message::Close(None)).await {
                                debug!("Close frame not sent: {}", e);
                            }
                            break;
                        }
                    }
                }
                info!("Gemini Live connection task finished");
            });

            Ok(Box::new(GeminiChannel {
                outbound: outbound_tx,
                shutdown: Some(shutdown_tx),
            }) as Box<dyn RemoteChannel>)
        })
    }
}

/// Handle to a live Gemini session.
pub struct GeminiChannel {
    outbound: OutboundSender,
    shutdown: Option<oneshot::Sender<()>>,
}

impl RemoteChannel for GeminiChannel {
    fn outbound(&self) -> OutboundSender {
        self.outbound.clone()
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        let shutdown = self.shutdown.take().ok_or(ChannelError::Closed)?;
        // The task may already be gone after a remote close.
        let _ = shutdown.send(());
        Ok(())
    }
}

/// Route one WebSocket message. Returns `false` when the socket is done.
fn handle_ws_message(msg: Message, events: &ChannelEventSender) -> bool {
    let frame = match msg {
        Message::Text(text) => parse_server_frame(text.as_bytes()),
        Message::Binary(data) => parse_server_frame(&data),
        Message::Close(close_frame) => {
            info!("WebSocket connection closed: {:?}", close_frame);
            let reason = close_frame.map(|f| format!("{}: {}", u16::from(f.code), f.reason));
            let _ = events.send(ChannelEvent::Closed { reason });
            return false;
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => return true,
    };

    match frame {
        Ok(ServerFrame::SetupComplete) => {
            info!("Gemini Live session open");
            events.send(ChannelEvent::Open).is_ok()
        }
        Ok(ServerFrame::Content(message)) => events.send(ChannelEvent::Message(message)).is_ok(),
        Ok(ServerFrame::GoAway { time_left }) => {
            warn!(time_left = ?time_left, "Server will close the session soon");
            true
        }
        Ok(ServerFrame::Other) => true,
        Err(e) => {
            warn!("Ignoring unparseable server frame: {}", e);
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Initial `setup` frame.
pub(crate) fn setup_frame(model: &str, voice_name: &str, params: &ConnectParams) -> serde_json::Value {
    json!({
        "setup": {
            "model": model,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": voice_name }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{ "text": params.system_instruction() }]
            },
            "inputAudioTranscription": {},
            "outputAudioTranscription": {}
        }
    })
}

/// One chunk of microphone audio.
pub(crate) fn realtime_input_frame(chunk: &WireChunk) -> serde_json::Value {
    json!({
        "realtimeInput": {
            "mediaChunks": [{
                "mimeType": chunk.mime_type(),
                "data": chunk.to_base64(),
            }]
        }
    })
}

/// Server frames the session cares about.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ServerFrame {
    SetupComplete,
    Content(InboundMessage),
    GoAway { time_left: Option<String> },
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerFrame {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<RawServerContent>,
    #[serde(default)]
    go_away: Option<RawGoAway>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    #[serde(default)]
    model_turn: Option<RawModelTurn>,
    #[serde(default)]
    input_transcription: Option<RawTranscription>,
    #[serde(default)]
    output_transcription: Option<RawTranscription>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Deserialize)]
struct RawModelTurn {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    #[serde(default)]
    inline_data: Option<RawInlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct RawTranscription {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGoAway {
    #[serde(default)]
    time_left: Option<String>,
}

pub(crate) fn parse_server_frame(bytes: &[u8]) -> Result<ServerFrame, ChannelError> {
    let raw: RawServerFrame = serde_json::from_slice(bytes)
        .map_err(|e| ChannelError::Protocol(format!("Failed to parse server frame: {e}")))?;

    if raw.setup_complete.is_some() {
        return Ok(ServerFrame::SetupComplete);
    }
    if let Some(content) = raw.server_content {
        return Ok(ServerFrame::Content(content.into()));
    }
    if let Some(go_away) = raw.go_away {
        return Ok(ServerFrame::GoAway {
            time_left: go_away.time_left,
        });
    }
    Ok(ServerFrame::Other)
}

impl From<RawServerContent> for InboundMessage {
    fn from(content: RawServerContent) -> Self {
        let audio = content
            .model_turn
            .map(|turn| turn.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| part.inline_data)
            .filter(|data| {
                data.mime_type
                    .as_deref()
                    .map_or(true, |m| m.starts_with("audio/"))
            })
            .map(|data| AudioPayload {
                sample_rate: rate_from_mime(data.mime_type.as_deref()),
                data: data.data,
            })
            .collect();

        InboundMessage {
            audio,
            input_transcription_delta: content.input_transcription.and_then(|t| t.text),
            output_transcription_delta: content.output_transcription.and_then(|t| t.text),
            turn_complete: content.turn_complete,
            interrupted: content.interrupted,
        }
    }
}

/// Sample rate from a mime type such as `audio/pcm;rate=24000`.
fn rate_from_mime(mime: Option<&str>) -> u32 {
    mime.and_then(|m| {
        m.split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse::<u32>().ok())
    })
    .filter(|rate| *rate > 0)
    .unwrap_or(OUTPUT_SAMPLE_RATE)
}
