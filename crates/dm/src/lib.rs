//! Dialog manager adapter: the policy loop's only view of response
//! content. The core treats this as a black box behind [`DialogManager`];
//! the only contract it relies on is that the same `context` is passed
//! regardless of which turn-taking policy variant is active.

use serde::Serialize;

/// Ranking metadata a rank/generate-backed `DialogManager` may return
/// alongside its chosen utterance. The scripted bank never produces this.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub tokens: Vec<String>,
    pub eot: Vec<f32>,
    pub time: f32,
}

/// Pluggable response source consumed by `duet-policy`. `context` is
/// `cns.dialog_text()`, possibly with the live user utterance appended.
/// `no_rank` mirrors the original's `self.no_rank` switch: when true, the
/// dialog manager must not depend on a ranking backend.
pub trait DialogManager: Send {
    fn get_response(&mut self, context: &[String], no_rank: bool) -> (String, bool, Option<ResponseMetadata>);

    /// The utterance spoken when `speak_first` opens the dialog, before
    /// any user turn exists.
    fn next_question(&mut self) -> String {
        let (text, _, _) = self.get_response(&[], true);
        text
    }
}

#[derive(Debug, Clone)]
struct Question {
    question: &'static str,
    follow_ups: &'static [&'static str],
}

const QUESTIONS: &[Question] = &[
    Question {
        question: "Hello there, how are you doing today?",
        follow_ups: &[
            "That's great, did you sleep well?",
            "I'm sorry to hear that, what's wrong?",
            "Well tomorrow is another day. Do you have any plans?",
            "great, tell me more",
        ],
    },
    Question {
        question: "Do you exercise regularly?",
        follow_ups: &[
            "What kind of exercise is your favorite",
            "Have you ever done yoga?",
            "Do you thinks it's a good idea to get more exercise?",
            "I love to run, do you?",
        ],
    },
    Question {
        question: "Are you a healthy eater?",
        follow_ups: &[
            "What's your favorite meal?",
            "How often do you eat pizza?",
            "How many times a week do you eat comfort food",
            "What did you eat for breakfast?",
        ],
    },
    Question {
        question: "Tell me about your life",
        follow_ups: &[
            "Do you have any hobbies?",
            "What do you like to do in your spare time?",
            "Are you single?",
            "Are happy with your life in general?",
        ],
    },
    Question {
        question: "That was all that I had to ask, goodbye!",
        follow_ups: &["Bye bye", "See you later gator", "toot toot there goes the train"],
    },
];

/// Scripted question-bank dialog manager: advances through a fixed
/// `follow_ups` count per main question before moving to the next one, no
/// ranking backend. Ends the dialog on the terminal question.
pub struct ScriptedDm {
    questions: Vec<Question>,
    n_follow_ups: usize,
    main_question_idx: usize,
    remaining_follow_ups: Vec<&'static str>,
    asked_follow_ups: usize,
    started: bool,
}

impl ScriptedDm {
    pub fn new(n_follow_ups: usize) -> Self {
        Self {
            questions: QUESTIONS.to_vec(),
            n_follow_ups,
            main_question_idx: 0,
            remaining_follow_ups: Vec::new(),
            asked_follow_ups: 0,
            started: false,
        }
    }

    fn is_terminal(&self) -> bool {
        self.main_question_idx + 1 >= self.questions.len()
    }

    fn advance_to_next_main_question(&mut self) -> &'static str {
        self.main_question_idx += 1;
        let question = &self.questions[self.main_question_idx];
        self.remaining_follow_ups = question.follow_ups.to_vec();
        self.asked_follow_ups = 0;
        question.question
    }
}

impl Default for ScriptedDm {
    fn default() -> Self {
        Self::new(2)
    }
}

impl DialogManager for ScriptedDm {
    fn get_response(&mut self, _context: &[String], _no_rank: bool) -> (String, bool, Option<ResponseMetadata>) {
        if !self.started {
            self.started = true;
            let question = &self.questions[self.main_question_idx];
            self.remaining_follow_ups = question.follow_ups.to_vec();
            self.asked_follow_ups = 0;
            return (question.question.to_string(), false, None);
        }

        if self.asked_follow_ups >= self.n_follow_ups || self.remaining_follow_ups.is_empty() {
            if self.is_terminal() {
                let text = self.questions[self.main_question_idx].question.to_string();
                return (text, true, None);
            }
            let text = self.advance_to_next_main_question().to_string();
            let ended = self.is_terminal() && self.asked_follow_ups >= self.n_follow_ups;
            return (text, ended, None);
        }

        let follow_up = self.remaining_follow_ups.remove(0);
        self.asked_follow_ups += 1;
        (follow_up.to_string(), false, None)
    }
}

/// Canned single-utterance dialog manager, for `speak_first` smoke tests
/// and as the fallback used when no dialog manager is configured.
pub struct CannedDm {
    pub response: String,
}

impl CannedDm {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

impl DialogManager for CannedDm {
    fn get_response(&mut self, _context: &[String], _no_rank: bool) -> (String, bool, Option<ResponseMetadata>) {
        (self.response.clone(), false, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_with_first_question() {
        let mut dm = ScriptedDm::default();
        let (text, ended, _) = dm.get_response(&[], true);
        assert_eq!(text, "Hello there, how are you doing today?");
        assert!(!ended);
    }

    #[test]
    fn advances_through_follow_ups_before_next_main_question() {
        let mut dm = ScriptedDm::new(2);
        let _ = dm.get_response(&[], true);
        let (first_follow_up, _, _) = dm.get_response(&[], true);
        assert_eq!(first_follow_up, "That's great, did you sleep well?");
        let (second_follow_up, _, _) = dm.get_response(&[], true);
        assert_eq!(second_follow_up, "I'm sorry to hear that, what's wrong?");
        let (next_main, _, _) = dm.get_response(&[], true);
        assert_eq!(next_main, "Do you exercise regularly?");
    }

    #[test]
    fn terminal_question_ends_dialog() {
        let mut dm = ScriptedDm::new(0);
        let _ = dm.get_response(&[], true);
        for _ in 0..QUESTIONS.len() - 1 {
            let _ = dm.get_response(&[], true);
        }
        let (text, ended, _) = dm.get_response(&[], true);
        assert_eq!(text, "That was all that I had to ask, goodbye!");
        assert!(ended);
    }

    #[test]
    fn canned_dm_always_returns_same_response() {
        let mut dm = CannedDm::new("This is me talking.");
        let (text, ended, _) = dm.get_response(&["hi".to_string()], true);
        assert_eq!(text, "This is me talking.");
        assert!(!ended);
    }
}
