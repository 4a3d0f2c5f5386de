//! Call session state: one per live telephone call.

use crate::locale::LanguageTag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One utterance in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, text: text.into() }
    }
}

/// Where a live call is in its lifecycle. `Terminated` is not a phase: a
/// terminated call no longer has a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPhase {
    /// Outbound call placed, callee has not picked up yet.
    Ringing,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Server-side state for one call. Identity fields are fixed at creation;
/// `turns` only grows.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSession {
    call_id: String,
    counterpart_address: String,
    started_at: DateTime<Utc>,
    language: LanguageTag,
    direction: CallDirection,
    phase: CallPhase,
    turns: Vec<Turn>,
}

impl CallSession {
    /// An answered inbound call, ready to record.
    pub fn inbound(
        call_id: impl Into<String>,
        counterpart_address: impl Into<String>,
        language: LanguageTag,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            counterpart_address: counterpart_address.into(),
            started_at: Utc::now(),
            language,
            direction: CallDirection::Inbound,
            phase: CallPhase::Active,
            turns: Vec::new(),
        }
    }

    /// A call we placed; it rings until the callee picks up.
    pub fn outbound(
        call_id: impl Into<String>,
        callee_address: impl Into<String>,
        language: LanguageTag,
    ) -> Self {
        Self {
            direction: CallDirection::Outbound,
            phase: CallPhase::Ringing,
            ..Self::inbound(call_id, callee_address, language)
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn counterpart_address(&self) -> &str {
        &self.counterpart_address
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn language(&self) -> &LanguageTag {
        &self.language
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub(crate) fn set_phase(&mut self, phase: CallPhase) {
        self.phase = phase;
    }

    pub(crate) fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub(crate) fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_session_starts_ringing() {
        let s = CallSession::outbound("C9", "+1555", LanguageTag::new("en-US"));
        assert_eq!(s.phase(), CallPhase::Ringing);
        assert_eq!(s.direction(), CallDirection::Outbound);
        assert!(s.turns().is_empty());
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_value(Turn::assistant("hi")).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
