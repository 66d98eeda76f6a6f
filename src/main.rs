//! Live voice engine host process.
//!
//! Communicates with the host application via JSON-line IPC on stdin/stdout
//! and drives at most one live session at a time.

use tokio::sync::mpsc;
use tracing::{info, warn};

use live_voice_core::audio::{list_devices, list_output_devices, SystemAudio};
use live_voice_core::config::{read_live_config, LiveConfig};
use live_voice_core::ipc::bridge::{emit_error, emit_event, spawn_stdin_reader};
use live_voice_core::ipc::{AudioDeviceInfo, LiveCommand, LiveEvent};
use live_voice_core::live::GeminiConnector;
use live_voice_core::{logging, LiveSession, SessionEvent, SessionUpdate};

type Session = LiveSession<SystemAudio, GeminiConnector>;

/// The current (or most recently ended) session.
struct Active {
    session: Session,
    updates: mpsc::UnboundedReceiver<SessionUpdate>,
    ended: bool,
}

enum Activity {
    Update(SessionUpdate),
    Event(SessionEvent),
    Ended,
}

impl Active {
    async fn next(&mut self) -> Activity {
        let Active {
            session, updates, ..
        } = self;
        tokio::select! {
            biased;
            Some(update) = updates.recv() => Activity::Update(update),
            event = session.next_event() => match event {
                Some(event) => Activity::Event(event),
                None => Activity::Ended,
            },
        }
    }
}

/// Pending forever when there is nothing live to watch.
async fn next_activity(active: &mut Option<Active>) -> Activity {
    match active {
        Some(a) if !a.ended => a.next().await,
        _ => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = logging::init() {
        eprintln!("Failed to initialize logging: {e:#}");
    }

    // Let the host know we're alive.
    emit_event(&LiveEvent::Starting {});

    let config = read_live_config();
    info!(
        has_api_key = config.api_key.is_some(),
        model = ?config.model,
        target = ?config.target_language,
        "Configuration loaded"
    );

    let mut cmd_rx = spawn_stdin_reader();
    let mut active: Option<Active> = None;

    emit_event(&LiveEvent::Ready {});
    info!("Live voice core ready");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !handle_command(command, &config, &mut active, &mut cmd_rx).await {
                            break;
                        }
                    }
                    None => {
                        // stdin closed, parent process gone
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            activity = next_activity(&mut active) => {
                if let Some(a) = active.as_mut() {
                    match activity {
                        Activity::Update(update) => {
                            emit_event(&LiveEvent::from_update(a.session.id(), update));
                        }
                        Activity::Event(event) => a.session.handle_event(event),
                        Activity::Ended => {
                            info!(session = %a.session.id(), state = %a.session.state(), "Session ended");
                            a.ended = true;
                        }
                    }
                }
            }
        }
    }

    if let Some(mut a) = active.take() {
        a.session.stop();
        while let Ok(update) = a.updates.try_recv() {
            emit_event(&LiveEvent::from_update(a.session.id(), update));
        }
    }
    emit_event(&LiveEvent::Stopping {});
    info!("Live voice core shutting down");
}

/// Handle a single command from the host.
/// Returns `false` if the main loop should exit.
async fn handle_command(
    cmd: LiveCommand,
    config: &LiveConfig,
    active: &mut Option<Active>,
    cmd_rx: &mut mpsc::UnboundedReceiver<LiveCommand>,
) -> bool {
    match cmd {
        LiveCommand::Ping {} => emit_event(&LiveEvent::Pong {}),

        LiveCommand::Start {
            target_language,
            native_language,
        } => {
            if let Some(a) = active.as_ref().filter(|a| !a.session.state().is_terminal()) {
                emit_error(&format!("Session {} is already running", a.session.id()));
                return true;
            }
            let connector = match config.connector() {
                Ok(c) => c,
                Err(e) => {
                    warn!("Cannot start session: {:#}", e);
                    emit_error(&format!("{e:#}"));
                    return true;
                }
            };
            let mut session_config = config.session_config();
            if let Some(lang) = target_language {
                session_config.params.target_language = lang;
            }
            if let Some(lang) = native_language {
                session_config.params.native_language = lang;
            }

            let (session, updates) = LiveSession::new(config.audio_backend(), connector, session_config);
            let a = active.insert(Active {
                session,
                updates,
                ended: false,
            });
            if let StartOutcome::Exit = run_start(a, cmd_rx).await {
                return false;
            }
        }

        LiveCommand::SetMuted { muted } => match active.as_mut() {
            Some(a) => {
                if let Err(e) = a.session.set_muted(muted) {
                    emit_error(&e.to_string());
                }
            }
            None => emit_error("No active session"),
        },

        LiveCommand::Stop {} => match active.as_mut() {
            Some(a) => a.session.stop(),
            None => emit_error("No active session"),
        },

        LiveCommand::GetHistory {} => {
            let items = active
                .as_ref()
                .map(|a| a.session.history().to_vec())
                .unwrap_or_default();
            emit_event(&LiveEvent::History { items });
        }

        LiveCommand::ListAudioDevices {} => emit_audio_devices(),

        LiveCommand::Shutdown {} => return false,
    }
    true
}

/// How the connecting phase ended.
enum StartOutcome {
    Finished,
    /// The host asked to stop before the session opened.
    Cancelled,
    /// Shutdown requested, or stdin closed.
    Exit,
}

/// Drive `start()` while still serving the host. Updates keep flowing, a
/// mute request is applied once the session is up, and stop or shutdown
/// abandons the connect attempt.
async fn run_start(a: &mut Active, cmd_rx: &mut mpsc::UnboundedReceiver<LiveCommand>) -> StartOutcome {
    let Active {
        session, updates, ..
    } = a;
    let session_id = session.id().to_string();
    let mut requested_mute = None;

    let outcome = {
        let start = session.start();
        tokio::pin!(start);
        loop {
            tokio::select! {
                result = &mut start => {
                    // Failures are reported through the update stream.
                    if let Err(e) = result {
                        warn!(session = %session_id, "Session failed to start: {}", e);
                    }
                    break StartOutcome::Finished;
                }
                Some(update) = updates.recv() => {
                    emit_event(&LiveEvent::from_update(&session_id, update));
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(LiveCommand::Stop {}) => break StartOutcome::Cancelled,
                    Some(LiveCommand::Shutdown {}) | None => break StartOutcome::Exit,
                    Some(LiveCommand::SetMuted { muted }) => requested_mute = Some(muted),
                    Some(LiveCommand::Ping {}) => emit_event(&LiveEvent::Pong {}),
                    Some(LiveCommand::GetHistory {}) => {
                        emit_event(&LiveEvent::History { items: Vec::new() });
                    }
                    Some(LiveCommand::ListAudioDevices {}) => emit_audio_devices(),
                    Some(LiveCommand::Start { .. }) => {
                        emit_error(&format!("Session {session_id} is already starting"));
                    }
                },
            }
        }
    };

    match outcome {
        StartOutcome::Finished => {
            if let Some(muted) = requested_mute.filter(|_| !session.state().is_terminal()) {
                if let Err(e) = session.set_muted(muted) {
                    emit_error(&e.to_string());
                }
            }
        }
        StartOutcome::Cancelled | StartOutcome::Exit => {
            info!(session = %session_id, state = %session.state(), "Abandoning session start");
            session.stop();
        }
    }
    outcome
}

fn emit_audio_devices() {
    let input = AudioDeviceInfo::enumerate(list_devices());
    let output = AudioDeviceInfo::enumerate(list_output_devices());
    emit_event(&LiveEvent::AudioDevices { input, output });
}
