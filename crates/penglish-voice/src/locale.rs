//! Language tags and the localized phrases spoken by the call-control layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Locale of a call, e.g. `fa-IR`. Fixed for the life of a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageTag(String);

impl LanguageTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary language subtag, lowercased (`fa-IR` -> `fa`). This is what
    /// the speech-to-text service expects.
    pub fn primary(&self) -> String {
        self.0
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    pub fn phrases(&self) -> &'static Phrases {
        Phrases::for_tag(self)
    }

    /// Human-readable language for the reply model. Tags without a phrase
    /// table are named by the tag itself, never by the fallback wording.
    pub fn language_name(&self) -> String {
        Phrases::known(self)
            .map(|p| p.language_name.to_string())
            .unwrap_or_else(|| self.0.clone())
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LanguageTag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Fixed wording for one language.
#[derive(Debug)]
pub struct Phrases {
    /// Name used in the chat system preamble.
    pub language_name: &'static str,
    pub greeting: &'static str,
    pub outbound_greeting: &'static str,
    /// Recording was empty or could not be fetched.
    pub no_speech: &'static str,
    /// Transcription or reply generation failed; the call ends after this.
    pub internal_error: &'static str,
    /// Provider-side fallback and protocol errors.
    pub fallback: &'static str,
}

const FARSI: Phrases = Phrases {
    language_name: "Farsi (Persian)",
    greeting: "سلام! به دستیار هوش مصنوعی خوش آمدید. لطفا صحبت کنید.",
    outbound_greeting: "سلام! این یک تماس از دستیار هوش مصنوعی است.",
    no_speech: "متاسفم، صدای شما را نشنیدم. لطفا دوباره تلاش کنید.",
    internal_error: "متاسفم، خطایی رخ داد. لطفا دوباره تماس بگیرید.",
    fallback: "متاسفم، خطایی رخ داد. لطفا بعدا تماس بگیرید.",
};

const ENGLISH: Phrases = Phrases {
    language_name: "English",
    greeting: "Hello! Welcome to the AI assistant. Please start speaking.",
    outbound_greeting: "Hello! This is a call from the AI assistant.",
    no_speech: "Sorry, I didn't hear anything. Please try again.",
    internal_error: "Sorry, something went wrong. Please call again.",
    fallback: "Sorry, something went wrong. Please call back later.",
};

impl Phrases {
    /// Phrase table for a tag; unknown languages get English wording.
    pub fn for_tag(tag: &LanguageTag) -> &'static Phrases {
        Self::known(tag).unwrap_or(&ENGLISH)
    }

    /// Phrase table written for this tag's language, if any.
    pub fn known(tag: &LanguageTag) -> Option<&'static Phrases> {
        match tag.primary().as_str() {
            "fa" => Some(&FARSI),
            "en" => Some(&ENGLISH),
            _ => None,
        }
    }
}
