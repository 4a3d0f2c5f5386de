//! Call Control Adapter: orchestrator decisions -> NCCO instructions, and
//! raw provider webhook payloads -> typed events.
//!
//! Pure translation. A response that ends with `record` keeps the call in the
//! conversation loop; a response without one lets the call end after speaking.

use crate::error::MalformedEvent;
use crate::locale::LanguageTag;
use crate::turn::TurnFailure;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// -----------------------------------------------------------------------------
// NCCO model
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TalkAction {
    pub text: String,
    pub language: String,
    pub style: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordAction {
    pub event_url: Vec<String>,
    pub end_on_silence: u32,
    pub end_on_key: String,
    pub beep_start: bool,
    pub channels: u32,
    pub format: String,
}

/// One call-control instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum NccoAction {
    Talk(TalkAction),
    Record(RecordAction),
}

/// Ordered instruction list returned to the provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ncco(pub Vec<NccoAction>);

impl Ncco {
    pub fn actions(&self) -> &[NccoAction] {
        &self.0
    }

    /// True when the provider will hang up once the instructions run out.
    pub fn ends_call(&self) -> bool {
        !matches!(self.0.last(), Some(NccoAction::Record(_)))
    }

    pub fn talk_texts(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter_map(|a| match a {
                NccoAction::Talk(t) => Some(t.text.as_str()),
                NccoAction::Record(_) => None,
            })
            .collect()
    }
}

/// Recording parameters shared by every `record` instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSettings {
    pub end_on_silence_secs: u32,
    pub end_on_key: String,
    pub channels: u32,
    pub format: String,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            end_on_silence_secs: 3,
            end_on_key: "#".to_string(),
            channels: 1,
            format: "mp3".to_string(),
        }
    }
}

/// Builds call-control responses for one deployment.
#[derive(Debug, Clone)]
pub struct CallControl {
    recording_url: String,
    record: RecordSettings,
    talk_style: u32,
}

impl CallControl {
    /// `public_base_url` is where the provider reaches our webhooks.
    pub fn new(public_base_url: &str, record: RecordSettings, talk_style: u32) -> Self {
        Self {
            recording_url: format!("{}/webhooks/recording", public_base_url.trim_end_matches('/')),
            record,
            talk_style,
        }
    }

    pub fn recording_url(&self) -> &str {
        &self.recording_url
    }

    fn talk(&self, text: &str, language: &LanguageTag) -> NccoAction {
        NccoAction::Talk(TalkAction {
            text: text.to_string(),
            language: language.to_string(),
            style: self.talk_style,
        })
    }

    fn record(&self) -> NccoAction {
        NccoAction::Record(RecordAction {
            event_url: vec![self.recording_url.clone()],
            end_on_silence: self.record.end_on_silence_secs,
            end_on_key: self.record.end_on_key.clone(),
            beep_start: false,
            channels: self.record.channels,
            format: self.record.format.clone(),
        })
    }

    fn speak_then_record(&self, text: &str, language: &LanguageTag) -> Ncco {
        Ncco(vec![self.talk(text, language), self.record()])
    }

    pub fn greeting(&self, language: &LanguageTag) -> Ncco {
        self.speak_then_record(language.phrases().greeting, language)
    }

    /// Instructions for a call we place ourselves.
    pub fn outbound_greeting(&self, language: &LanguageTag) -> Ncco {
        self.speak_then_record(language.phrases().outbound_greeting, language)
    }

    pub fn turn(&self, reply: &str, language: &LanguageTag) -> Ncco {
        self.speak_then_record(reply, language)
    }

    /// Apology for a failed turn. `AudioUnavailable` lets the caller try again;
    /// the other failures end the call.
    pub fn error(&self, language: &LanguageTag, failure: TurnFailure) -> Ncco {
        let phrases = language.phrases();
        match failure {
            TurnFailure::AudioUnavailable => self.speak_then_record(phrases.no_speech, language),
            TurnFailure::TranscriptionFailed | TurnFailure::ReplyGenerationFailed => {
                Ncco(vec![self.talk(phrases.internal_error, language)])
            }
        }
    }

    /// Apology and hang up. Used for provider fallbacks, protocol errors and
    /// events on calls that have already ended.
    pub fn terminal(&self, language: &LanguageTag) -> Ncco {
        Ncco(vec![self.talk(language.phrases().fallback, language)])
    }
}

// -----------------------------------------------------------------------------
// Webhook parsing
// -----------------------------------------------------------------------------

/// Provider call status from the event webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    Started,
    Ringing,
    Answered,
    Completed,
    Failed,
    Other(String),
}

impl CallStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "started" => CallStatus::Started,
            "ringing" => CallStatus::Ringing,
            "answered" => CallStatus::Answered,
            "completed" => CallStatus::Completed,
            "failed" | "busy" | "timeout" | "unanswered" | "rejected" | "cancelled" => {
                CallStatus::Failed
            }
            other => CallStatus::Other(other.to_string()),
        }
    }

    /// Completed or failed: the call is over.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            CallStatus::Started => "started",
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerEvent {
    pub call_id: String,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingEvent {
    pub call_id: String,
    /// `None` when the provider detected no speech.
    pub recording_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub call_id: String,
    pub status: CallStatus,
}

/// Which webhook a payload arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    Answer,
    Recording,
    Lifecycle,
}

/// A provider webhook after boundary parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Answer(AnswerEvent),
    Recording(RecordingEvent),
    Lifecycle(LifecycleEvent),
}

impl WebhookEvent {
    pub fn parse(kind: WebhookKind, payload: &Value) -> Result<Self, MalformedEvent> {
        match kind {
            WebhookKind::Answer => parse_answer_event(payload).map(WebhookEvent::Answer),
            WebhookKind::Recording => parse_recording_event(payload).map(WebhookEvent::Recording),
            WebhookKind::Lifecycle => parse_lifecycle_event(payload).map(WebhookEvent::Lifecycle),
        }
    }

    pub fn call_id(&self) -> &str {
        match self {
            WebhookEvent::Answer(e) => &e.call_id,
            WebhookEvent::Recording(e) => &e.call_id,
            WebhookEvent::Lifecycle(e) => &e.call_id,
        }
    }
}

/// Non-empty string field, trimmed. Numbers are accepted for phone numbers.
fn field(payload: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        let s = match payload.get(*name)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!s.is_empty()).then_some(s)
    })
}

const CALL_ID_FIELDS: &[&str] = &["uuid", "call_uuid", "callId"];

/// Best-effort call id of any payload (fallback callbacks carry no fixed shape).
pub fn call_id_of(payload: &Value) -> Option<String> {
    field(payload, CALL_ID_FIELDS)
}

pub fn parse_answer_event(payload: &Value) -> Result<AnswerEvent, MalformedEvent> {
    let call_id =
        field(payload, CALL_ID_FIELDS).ok_or(MalformedEvent::missing("answer", "uuid"))?;
    let from = field(payload, &["from", "fromAddress"]).unwrap_or_else(|| "unknown".to_string());
    Ok(AnswerEvent { call_id, from })
}

pub fn parse_recording_event(payload: &Value) -> Result<RecordingEvent, MalformedEvent> {
    let call_id =
        field(payload, CALL_ID_FIELDS).ok_or(MalformedEvent::missing("recording", "uuid"))?;
    let recording_url = field(payload, &["recording_url", "recordingUrl"]);
    Ok(RecordingEvent {
        call_id,
        recording_url,
    })
}

pub fn parse_lifecycle_event(payload: &Value) -> Result<LifecycleEvent, MalformedEvent> {
    let call_id =
        field(payload, CALL_ID_FIELDS).ok_or(MalformedEvent::missing("lifecycle", "uuid"))?;
    let status = field(payload, &["status"]).ok_or(MalformedEvent::missing("lifecycle", "status"))?;
    Ok(LifecycleEvent {
        call_id,
        status: CallStatus::parse(&status),
    })
}
