//! IPC bridge: stdin reader and stdout event emitter.
//!
//! A blocking stdin reader thread sends deserialized commands through an
//! mpsc channel; events go out as JSON lines on stdout.

use std::io::{self, BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{LiveCommand, LiveEvent};

/// Emit a `LiveEvent` as a JSON line on stdout and flush.
pub fn emit_event(event: &LiveEvent) {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // Pipe may be closed.
    if let Err(e) = write_event(&mut handle, event) {
        debug!("Failed to write event: {}", e);
    }
}

/// Convenience helper for emitting error events.
pub fn emit_error(message: &str) {
    emit_event(&LiveEvent::Error {
        message: message.to_string(),
    });
}

fn write_event<W: Write>(out: &mut W, event: &LiveEvent) -> io::Result<()> {
    let json = serde_json::to_string(event).map_err(io::Error::other)?;
    writeln!(out, "{}", json)?;
    out.flush()
}

/// Parse one stdin line. Blank lines yield `Ok(None)`.
fn parse_command_line(line: &str) -> Result<Option<LiveCommand>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Spawn a blocking thread that reads JSON lines from stdin, deserializes
/// them into `LiveCommand`, and forwards them through the returned channel.
///
/// The thread exits when stdin is closed (parent process gone) or on
/// unrecoverable read error.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<LiveCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let text = match line {
                Ok(text) => text,
                Err(e) => {
                    error!("stdin read error: {}", e);
                    break;
                }
            };
            match parse_command_line(&text) {
                Ok(Some(cmd)) => {
                    debug!(?cmd, "Received command from host");
                    if tx.send(cmd).is_err() {
                        break; // main task is gone
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Invalid JSON command: {} (input: {})", e, text.trim());
                    emit_error(&format!("Invalid JSON command: {}", e));
                }
            }
        }
        debug!("stdin reader thread exiting");
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_event_is_one_line() {
        let mut buf = Vec::new();
        write_event(&mut buf, &LiveEvent::Pong {}).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "{\"event\":\"pong\",\"data\":{}}\n");
    }

    #[test]
    fn test_parse_command_line() {
        assert_eq!(parse_command_line("   ").unwrap(), None);
        assert_eq!(
            parse_command_line(" {\"command\":\"ping\"} \n").unwrap(),
            Some(LiveCommand::Ping {})
        );
        assert!(parse_command_line("{oops").is_err());
    }
}
