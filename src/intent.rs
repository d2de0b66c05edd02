//! Control intents recognized in a transcript before it reaches the model.

use crate::config::IntentMatching;

/// What the user asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// End the session
    Exit,
    /// Forget the conversation so far
    Reset,
    /// Anything else: pass to the language model
    Converse,
}

pub trait IntentClassifier: Send + Sync {
    fn classify(&self, transcript: &str) -> Intent;
}

/// Case-insensitive phrase matching. Exit phrases are checked before reset
/// phrases.
///
/// By default a phrase matches anywhere in the transcript, so "quit" fires
/// on "quite good" too. [`whole_words`](Self::whole_words) restricts matches
/// to word boundaries.
#[derive(Debug, Clone)]
pub struct PhraseIntentClassifier {
    exit: Vec<String>,
    reset: Vec<String>,
    matching: IntentMatching,
}

impl PhraseIntentClassifier {
    pub fn new<S: AsRef<str>>(exit_phrases: &[S], reset_phrases: &[S]) -> Self {
        Self::with_matching(exit_phrases, reset_phrases, IntentMatching::Substring)
    }

    pub fn whole_words<S: AsRef<str>>(exit_phrases: &[S], reset_phrases: &[S]) -> Self {
        Self::with_matching(exit_phrases, reset_phrases, IntentMatching::Word)
    }

    pub fn with_matching<S: AsRef<str>>(
        exit_phrases: &[S],
        reset_phrases: &[S],
        matching: IntentMatching,
    ) -> Self {
        let prepare = |phrases: &[S]| -> Vec<String> {
            phrases
                .iter()
                .map(|p| normalize(p.as_ref(), matching))
                .filter(|p| !p.is_empty())
                .collect()
        };
        Self {
            exit: prepare(exit_phrases),
            reset: prepare(reset_phrases),
            matching,
        }
    }

    fn matches(&self, spoken: &str, phrases: &[String]) -> bool {
        match self.matching {
            IntentMatching::Substring => phrases.iter().any(|p| spoken.contains(p.as_str())),
            // Both sides are padded with spaces, so a hit lands on word edges
            IntentMatching::Word => phrases
                .iter()
                .any(|p| spoken.contains(&format!(" {} ", p))),
        }
    }
}

/// Lowercase; in word mode also collapse punctuation and pad with spaces
fn normalize(text: &str, matching: IntentMatching) -> String {
    match matching {
        IntentMatching::Substring => text.trim().to_lowercase(),
        IntentMatching::Word => {
            let words: Vec<String> = text
                .split(|c: char| !c.is_alphanumeric() && c != '\'')
                .filter(|w| !w.is_empty())
                .map(|w| w.to_lowercase())
                .collect();
            words.join(" ")
        }
    }
}

impl IntentClassifier for PhraseIntentClassifier {
    fn classify(&self, transcript: &str) -> Intent {
        let spoken = match self.matching {
            IntentMatching::Substring => normalize(transcript, self.matching),
            IntentMatching::Word => format!(" {} ", normalize(transcript, self.matching)),
        };
        if self.matches(&spoken, &self.exit) {
            Intent::Exit
        } else if self.matches(&spoken, &self.reset) {
            Intent::Reset
        } else {
            Intent::Converse
        }
    }
}
