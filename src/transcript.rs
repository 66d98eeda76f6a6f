//! Turn-based transcript assembly.
//!
//! Streaming transcription arrives as small text deltas for each side of the
//! conversation. Deltas accumulate per role until the remote agent signals a
//! turn boundary (turn complete or interrupted); the turn is then committed
//! to the history as "user, then agent", whatever order the deltas came in.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// One committed utterance. Never modified after it enters the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub role: Role,
    pub text: String,
}

/// In-progress text for the current turn, for live display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Partials {
    pub user: String,
    pub agent: String,
}

#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    pending_user_text: String,
    pending_agent_text: String,
    history: Vec<TranscriptItem>,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user_delta(&mut self, delta: &str) {
        self.pending_user_text.push_str(delta);
    }

    pub fn push_agent_delta(&mut self, delta: &str) {
        self.pending_agent_text.push_str(delta);
    }

    /// Commit the current turn and clear both accumulators.
    ///
    /// Returns the items appended (zero, one or two, user first).
    pub fn flush(&mut self) -> Vec<TranscriptItem> {
        let user = std::mem::take(&mut self.pending_user_text);
        let agent = std::mem::take(&mut self.pending_agent_text);

        let committed: Vec<TranscriptItem> = [(Role::User, user), (Role::Agent, agent)]
            .into_iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(role, text)| TranscriptItem { role, text })
            .collect();

        if !committed.is_empty() {
            debug!(items = committed.len(), total = self.history.len() + committed.len(), "Turn committed");
        }
        self.history.extend(committed.iter().cloned());
        committed
    }

    pub fn history(&self) -> &[TranscriptItem] {
        &self.history
    }

    pub fn partials(&self) -> Partials {
        Partials {
            user: self.pending_user_text.clone(),
            agent: self.pending_agent_text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(role: Role, text: &str) -> TranscriptItem {
        TranscriptItem {
            role,
            text: text.into(),
        }
    }

    #[test]
    fn test_user_committed_before_agent() {
        let mut t = TranscriptAssembler::new();
        // Agent audio often starts streaming before the user transcript ends.
        t.push_agent_delta("Bonjour");
        t.push_user_delta("Sal");
        t.push_agent_delta(" !");
        t.push_user_delta("ut");

        let committed = t.flush();
        assert_eq!(
            committed,
            vec![item(Role::User, "Salut"), item(Role::Agent, "Bonjour !")]
        );
        assert_eq!(t.history(), committed.as_slice());
        assert_eq!(t.partials(), Partials::default());
    }

    #[test]
    fn test_flush_with_nothing_pending() {
        let mut t = TranscriptAssembler::new();
        assert!(t.flush().is_empty());
        assert!(t.history().is_empty());
    }

    #[test]
    fn test_whitespace_only_is_not_committed() {
        let mut t = TranscriptAssembler::new();
        t.push_user_delta("  \n ");
        t.push_agent_delta("Hola");
        assert_eq!(t.flush(), vec![item(Role::Agent, "Hola")]);
        // The whitespace was still cleared.
        assert_eq!(t.partials(), Partials::default());
    }

    #[test]
    fn test_text_is_kept_verbatim() {
        let mut t = TranscriptAssembler::new();
        t.push_user_delta(" hello ");
        assert_eq!(t.flush(), vec![item(Role::User, " hello ")]);
    }

    #[test]
    fn test_partials_track_pending_text() {
        let mut t = TranscriptAssembler::new();
        t.push_user_delta("Wie ");
        t.push_user_delta("geht's");
        t.push_agent_delta("Gut");
        assert_eq!(
            t.partials(),
            Partials {
                user: "Wie geht's".into(),
                agent: "Gut".into()
            }
        );
    }

    #[test]
    fn test_history_grows_across_turns() {
        let mut t = TranscriptAssembler::new();
        t.push_user_delta("one");
        t.flush();
        t.push_agent_delta("two");
        t.flush();
        t.push_user_delta("three");
        t.push_agent_delta("four");
        t.flush();
        let roles: Vec<Role> = t.history().iter().map(|i| i.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Agent, Role::User, Role::Agent]);
        assert_eq!(t.history().len(), 4);
        assert!(t.flush().is_empty());
        assert_eq!(t.history().len(), 4);
    }

    #[test]
    fn test_every_interleaving_commits_user_then_agent() {
        // All orderings of two user and two agent deltas.
        let events = ["u1", "u2", "a1", "a2"];
        let mut orders = Vec::new();
        permute(&mut events.to_vec(), 0, &mut orders);
        for order in orders {
            let mut t = TranscriptAssembler::new();
            for e in &order {
                if e.starts_with('u') {
                    t.push_user_delta(e);
                } else {
                    t.push_agent_delta(e);
                }
            }
            let committed = t.flush();
            assert_eq!(committed.len(), 2, "order {order:?}");
            assert_eq!(committed[0].role, Role::User);
            assert_eq!(committed[1].role, Role::Agent);
            assert_eq!(t.partials(), Partials::default());
        }
    }

    fn permute<'a>(items: &mut Vec<&'a str>, k: usize, out: &mut Vec<Vec<&'a str>>) {
        if k == items.len() {
            out.push(items.clone());
            return;
        }
        for i in k..items.len() {
            items.swap(k, i);
            permute(items, k + 1, out);
            items.swap(k, i);
        }
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&item(Role::Agent, "x")).unwrap();
        assert_eq!(json, r#"{"role":"agent","text":"x"}"#);
    }
}
