//! Ordered turn history and its condensation into dialog text.

use serde::Serialize;

use crate::state::{AgentState, UserState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Agent,
}

enum TurnRef<'a> {
    User(&'a UserState),
    Agent(&'a AgentState),
}

impl TurnRef<'_> {
    fn start_time_ms(&self) -> i64 {
        match self {
            TurnRef::User(u) => u.start_time_ms,
            TurnRef::Agent(a) => a.start_time_ms,
        }
    }

    fn speaker(&self) -> Speaker {
        match self {
            TurnRef::User(_) => Speaker::User,
            TurnRef::Agent(_) => Speaker::Agent,
        }
    }

    fn text(&self) -> &str {
        match self {
            TurnRef::User(u) => u.best_text(),
            TurnRef::Agent(a) => a.utterance.as_str(),
        }
    }
}

fn clean_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Two ordered sequences of finalized turns, merged by `start_time` on
/// read.
#[derive(Debug, Default)]
pub struct Memory {
    pub start_time_ms: i64,
    pub turns_user: Vec<UserState>,
    pub turns_agent: Vec<AgentState>,
}

impl Memory {
    pub fn new(start_time_ms: i64) -> Self {
        Self {
            start_time_ms,
            turns_user: Vec::new(),
            turns_agent: Vec::new(),
        }
    }

    fn turns_by_start_time(&self) -> Vec<TurnRef<'_>> {
        let mut turns: Vec<TurnRef<'_>> = self
            .turns_user
            .iter()
            .map(TurnRef::User)
            .chain(self.turns_agent.iter().map(TurnRef::Agent))
            .collect();
        turns.sort_by_key(|t| t.start_time_ms());
        turns
    }

    /// Condense consecutive same-speaker utterances into one entry each,
    /// skipping empty utterances, normalizing internal whitespace. Returns
    /// the condensed dialog plus a hint of who spoke last.
    pub fn dialog_text(&self) -> (Vec<String>, Option<Speaker>) {
        let turns = self.turns_by_start_time();
        let mut dialog: Vec<String> = Vec::new();
        let mut speakers: Vec<Speaker> = Vec::new();

        for turn in &turns {
            let text = clean_whitespace(turn.text());
            if text.is_empty() {
                continue;
            }
            match speakers.last() {
                Some(&last) if last == turn.speaker() => {
                    let merged = dialog.last_mut().expect("speakers and dialog stay in sync");
                    merged.push(' ');
                    merged.push_str(&text);
                }
                _ => {
                    dialog.push(text);
                    speakers.push(turn.speaker());
                }
            }
        }

        (dialog, speakers.last().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(start_ms: i64, text: &str) -> UserState {
        let mut u = UserState::new(start_ms);
        u.utterance = text.to_string();
        u.end_time_ms = Some(start_ms + 500);
        u
    }

    fn agent(start_ms: i64, text: &str) -> AgentState {
        let mut a = AgentState::new(start_ms, text.to_string());
        a.utterance = text.to_string();
        a.end_time_ms = Some(start_ms + 500);
        a
    }

    #[test]
    fn merges_consecutive_same_speaker_turns() {
        let mut mem = Memory::new(0);
        mem.turns_user.push(user(0, "hi there"));
        mem.turns_user.push(user(100, "how are you"));
        mem.turns_agent.push(agent(200, "I am fine"));

        let (dialog, last) = mem.dialog_text();
        assert_eq!(dialog, vec!["hi there how are you", "I am fine"]);
        assert_eq!(last, Some(Speaker::Agent));
    }

    #[test]
    fn skips_empty_utterances() {
        let mut mem = Memory::new(0);
        mem.turns_user.push(user(0, ""));
        mem.turns_agent.push(agent(100, "hello"));
        let (dialog, _) = mem.dialog_text();
        assert_eq!(dialog, vec!["hello"]);
    }

    #[test]
    fn normalizes_whitespace() {
        let mut mem = Memory::new(0);
        mem.turns_user.push(user(0, "  hi   there  \n"));
        let (dialog, _) = mem.dialog_text();
        assert_eq!(dialog, vec!["hi there"]);
    }

    #[test]
    fn is_idempotent() {
        let mut mem = Memory::new(0);
        mem.turns_user.push(user(0, "hi"));
        mem.turns_agent.push(agent(100, "hello"));
        assert_eq!(mem.dialog_text().0, mem.dialog_text().0);
    }

    #[test]
    fn orders_by_start_time_not_insertion() {
        let mut mem = Memory::new(0);
        mem.turns_agent.push(agent(200, "second"));
        mem.turns_user.push(user(0, "first"));
        let (dialog, _) = mem.dialog_text();
        assert_eq!(dialog, vec!["first", "second"]);
    }
}
