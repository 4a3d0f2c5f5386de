//! # Penglish Voice - per-call conversation orchestration
//!
//! Drives phone conversations over provider webhooks: answer a call, record the
//! caller, transcribe, generate a reply, speak it, record again. When the
//! provider reports the call is over, the session is archived.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Call Orchestrator                         │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐      │
//! │  │   Webhook    │ → │ Turn Executor│ → │ Call Control │      │
//! │  │   parsing    │   │ fetch/stt/llm│   │   (NCCO)     │      │
//! │  └──────────────┘   └──────────────┘   └──────────────┘      │
//! │         ↓                   ↑                                  │
//! │  ┌──────────────┐   ┌──────────────┐                          │
//! │  │Session Store │ → │   Archive    │  (on completed/failed)   │
//! │  │  (DashMap)   │   │ (json / sled)│                          │
//! │  └──────────────┘   └──────────────┘                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! External services sit behind traits (`RecordingFetcher`, `SpeechToText`,
//! `ChatCompletion`, `CallSignaling`, `CallArchive`) so tests run without a network.

pub mod archive;
pub mod audio;
pub mod call_control;
pub mod chat;
pub mod config;
pub mod error;
pub mod locale;
pub mod orchestrator;
pub mod session;
pub mod signaling;
pub mod store;
pub mod stt;
pub mod turn;

pub use archive::{ArchivedCall, CallArchive, JsonFileArchive, SledArchive};
pub use audio::{HttpRecordingFetcher, RecordingFetcher, TurnAudio};
pub use call_control::{
    AnswerEvent, CallControl, CallStatus, LifecycleEvent, Ncco, NccoAction, RecordSettings,
    RecordingEvent, WebhookEvent, WebhookKind,
};
pub use chat::{ChatCompletion, ChatMessage, OpenAiChat};
pub use config::{ArchiveBackend, VoiceConfig};
pub use error::{
    ArchiveError, MalformedEvent, PlaceCallError, ProviderError, SessionError, VoiceError,
    VoiceResult,
};
pub use locale::{LanguageTag, Phrases};
pub use orchestrator::{CallOrchestrator, LifecycleOutcome, Outbound};
pub use session::{CallDirection, CallPhase, CallSession, Role, Turn};
pub use signaling::{CallSignaling, VonageSignaling};
pub use store::{InMemorySessionStore, SessionStore};
pub use stt::{OpenAiStt, SpeechToText};
pub use turn::{TurnExecutor, TurnFailure, TurnOutput, TurnTimeouts};
