//! IPC protocol types for the host application.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (engine -> host).
//! Commands use `{"command": "<name>", ...}` format (host -> engine).

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::audio::SessionState;
use crate::session::SessionUpdate;
use crate::transcript::TranscriptItem;

// ---------------------------------------------------------------------------
// Events: engine -> host (stdout)
// ---------------------------------------------------------------------------

/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LiveEvent {
    Starting {},
    Ready {},
    Pong {},
    StateChange {
        from: SessionState,
        to: SessionState,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Partial { user: String, agent: String },
    TurnCommitted { items: Vec<TranscriptItem> },
    Interrupted { stopped: usize },
    History { items: Vec<TranscriptItem> },
    AudioDevices {
        input: Vec<AudioDeviceInfo>,
        output: Vec<AudioDeviceInfo>,
    },
    Error { message: String },
    Stopping {},
}

impl LiveEvent {
    /// Translate a session update for the host.
    pub fn from_update(session_id: &str, update: SessionUpdate) -> Self {
        match update {
            SessionUpdate::StateChanged { from, to } => LiveEvent::StateChange {
                from,
                to,
                session_id: session_id.to_string(),
            },
            SessionUpdate::Partial(p) => LiveEvent::Partial {
                user: p.user,
                agent: p.agent,
            },
            SessionUpdate::TurnCommitted(items) => LiveEvent::TurnCommitted { items },
            SessionUpdate::Interrupted { stopped } => LiveEvent::Interrupted { stopped },
            SessionUpdate::Error(message) => LiveEvent::Error { message },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: i32,
    pub name: String,
}

impl AudioDeviceInfo {
    /// Number device names in enumeration order.
    pub fn enumerate(names: Vec<String>) -> Vec<Self> {
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| AudioDeviceInfo { id: i as i32, name })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Commands: host -> engine (stdin)
// ---------------------------------------------------------------------------

/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum LiveCommand {
    Ping {},
    /// Start a conversation. Languages default to the config file.
    Start {
        #[serde(default, rename = "targetLanguage")]
        target_language: Option<String>,
        #[serde(default, rename = "nativeLanguage")]
        native_language: Option<String>,
    },
    SetMuted { muted: bool },
    /// End the current conversation; the process keeps running.
    Stop {},
    GetHistory {},
    ListAudioDevices {},
    /// Exit the process.
    Shutdown {},
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{Partials, Role};

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(LiveEvent::StateChange {
            from: SessionState::Connecting,
            to: SessionState::Open,
            session_id: "live-1".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "state_change",
                "data": {"from": "connecting", "to": "open", "sessionId": "live-1"}
            })
        );

        let json = serde_json::to_string(&LiveEvent::Ready {}).unwrap();
        assert_eq!(json, r#"{"event":"ready","data":{}}"#);
    }

    #[test]
    fn test_turn_committed_event() {
        let event = LiveEvent::from_update(
            "s",
            SessionUpdate::TurnCommitted(vec![TranscriptItem {
                role: Role::User,
                text: "hola".into(),
            }]),
        );
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["event"], "turn_committed");
        assert_eq!(json["data"]["items"][0]["role"], "user");
    }

    #[test]
    fn test_partial_from_update() {
        let event = LiveEvent::from_update(
            "s",
            SessionUpdate::Partial(Partials {
                user: "a".into(),
                agent: "b".into(),
            }),
        );
        assert_eq!(
            event,
            LiveEvent::Partial {
                user: "a".into(),
                agent: "b".into()
            }
        );
    }

    #[test]
    fn test_commands_parse() {
        let cmd: LiveCommand = serde_json::from_str(r#"{"command":"set_muted","muted":true}"#).unwrap();
        assert_eq!(cmd, LiveCommand::SetMuted { muted: true });

        let cmd: LiveCommand =
            serde_json::from_str(r#"{"command":"start","targetLanguage":"German"}"#).unwrap();
        assert_eq!(
            cmd,
            LiveCommand::Start {
                target_language: Some("German".into()),
                native_language: None
            }
        );

        let cmd: LiveCommand = serde_json::from_str(r#"{"command":"start"}"#).unwrap();
        assert!(matches!(cmd, LiveCommand::Start { target_language: None, .. }));

        assert!(serde_json::from_str::<LiveCommand>(r#"{"command":"dance"}"#).is_err());
    }

    #[test]
    fn test_enumerate_devices() {
        let devices = AudioDeviceInfo::enumerate(vec!["a".into(), "b".into()]);
        assert_eq!(devices[1], AudioDeviceInfo { id: 1, name: "b".into() });
    }
}
