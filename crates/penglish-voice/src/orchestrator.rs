//! Call Orchestrator - the event-driven controller
//!
//! Receives parsed provider webhooks, keeps the session store current, runs the
//! Turn Executor and answers every webhook with valid call-control instructions.
//!
//! Per call: `Ringing -> Active -> Terminated`. Termination removes the session
//! and archives it; the call id is remembered for a while so late or duplicate
//! events are ignored instead of resurrecting the call.

use crate::archive::{ArchivedCall, CallArchive};
use crate::call_control::{
    AnswerEvent, CallControl, CallStatus, LifecycleEvent, Ncco, RecordingEvent,
};
use crate::error::{PlaceCallError, SessionError};
use crate::locale::LanguageTag;
use crate::session::{CallPhase, CallSession};
use crate::signaling::CallSignaling;
use crate::store::SessionStore;
use crate::turn::TurnExecutor;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a lifecycle webhook did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// Session removed; `archived` is false if the archive write failed.
    Terminated { archived: bool },
    /// A ringing outbound call was picked up.
    Activated,
    /// Non-terminal status for a live call.
    Noted,
    /// Unknown or already-terminated call.
    Ignored,
}

/// Outbound calling: the signaling client and our caller number.
#[derive(Clone)]
pub struct Outbound {
    pub signaling: Arc<dyn CallSignaling>,
    pub from_number: String,
}

pub struct CallOrchestrator {
    store: Arc<dyn SessionStore>,
    executor: TurnExecutor,
    control: CallControl,
    archive: Arc<dyn CallArchive>,
    outbound: Option<Outbound>,
    default_language: LanguageTag,
    /// Ended call ids -> when they ended.
    terminated: DashMap<String, DateTime<Utc>>,
    terminated_retention: Duration,
}

impl CallOrchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        executor: TurnExecutor,
        control: CallControl,
        archive: Arc<dyn CallArchive>,
        default_language: LanguageTag,
    ) -> Self {
        Self {
            store,
            executor,
            control,
            archive,
            outbound: None,
            default_language,
            terminated: DashMap::new(),
            terminated_retention: Duration::from_secs(3600),
        }
    }

    pub fn with_outbound(mut self, outbound: Option<Outbound>) -> Self {
        self.outbound = outbound;
        self
    }

    pub fn with_terminated_retention(mut self, retention: Duration) -> Self {
        self.terminated_retention = retention;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn control(&self) -> &CallControl {
        &self.control
    }

    pub fn default_language(&self) -> &LanguageTag {
        &self.default_language
    }

    pub fn outbound_enabled(&self) -> bool {
        self.outbound.is_some()
    }

    pub fn active_calls(&self) -> usize {
        self.store.len()
    }

    pub fn is_terminated(&self, call_id: &str) -> bool {
        self.terminated.contains_key(call_id)
    }

    /// Apology + hang up in the default language. Used whenever a webhook
    /// cannot be processed.
    pub fn terminal_response(&self) -> Ncco {
        self.control.terminal(&self.default_language)
    }

    fn language_of(&self, call_id: &str) -> LanguageTag {
        self.store
            .get(call_id)
            .map(|s| s.language().clone())
            .unwrap_or_else(|| self.default_language.clone())
    }

    /// Provider-side error callback.
    pub fn handle_fallback(&self, call_id: Option<&str>) -> Ncco {
        let language = call_id
            .map(|id| self.language_of(id))
            .unwrap_or_else(|| self.default_language.clone());
        warn!(target: "penglish::voice", call_id = call_id.unwrap_or("-"), "Provider fallback invoked");
        self.control.terminal(&language)
    }

    /// New inbound call: create the session and greet.
    pub fn handle_answer(&self, event: &AnswerEvent) -> Ncco {
        let call_id = event.call_id.as_str();
        if self.is_terminated(call_id) {
            info!(target: "penglish::voice", call_id, "Answer for terminated call ignored");
            return self.terminal_response();
        }
        info!(target: "penglish::voice", call_id, from = %event.from, "📞 Incoming call");

        let language = self.default_language.clone();
        match self.store.create(call_id, &event.from, language.clone()) {
            Ok(_) => self.control.greeting(&language),
            Err(SessionError::DuplicateSession(_)) => {
                // Provider re-delivered the answer webhook; greet again, keep history.
                warn!(target: "penglish::voice", call_id, "Duplicate answer webhook");
                let language = self.language_of(call_id);
                self.control.greeting(&language)
            }
            Err(e) => {
                warn!(target: "penglish::voice", call_id, "Could not create session: {}", e);
                self.terminal_response()
            }
        }
    }

    /// Caller audio is ready: run one turn.
    pub async fn handle_recording(&self, event: &RecordingEvent) -> Ncco {
        let call_id = event.call_id.as_str();
        let session = match self.store.get(call_id) {
            Some(s) => s,
            None => {
                if self.is_terminated(call_id) {
                    info!(target: "penglish::voice", call_id, "Recording for terminated call");
                } else {
                    warn!(target: "penglish::voice", call_id, "Recording for unknown call");
                }
                return self.terminal_response();
            }
        };

        if session.phase() == CallPhase::Ringing {
            // Recording only happens after pickup.
            self.activate(&session);
        }

        let language = session.language().clone();
        match self
            .executor
            .run(&session, event.recording_url.as_deref())
            .await
        {
            Ok(output) => {
                // Termination wins: if the call ended mid-turn, drop the result.
                match self
                    .store
                    .append_exchange(call_id, &output.transcript, &output.reply)
                {
                    Ok(()) => self.control.turn(&output.reply, &language),
                    Err(SessionError::UnknownSession(_)) => {
                        info!(target: "penglish::voice", call_id, "Call ended during turn; reply discarded");
                        self.control.terminal(&language)
                    }
                    Err(e) => {
                        warn!(target: "penglish::voice", call_id, "Could not record turn: {}", e);
                        self.control.terminal(&language)
                    }
                }
            }
            Err(failure) => {
                debug!(target: "penglish::voice", call_id, recoverable = failure.is_recoverable(), "Turn failed: {}", failure);
                self.control.error(&language, failure)
            }
        }
    }

    fn activate(&self, session: &CallSession) {
        let call_id = session.call_id();
        match self.store.set_phase(call_id, CallPhase::Active) {
            Ok(()) => info!(target: "penglish::voice", call_id, "✅ Call active"),
            Err(e) => debug!(target: "penglish::voice", call_id, "Activation skipped: {}", e),
        }
    }

    /// Call status update. Terminal statuses remove and archive the session.
    pub async fn handle_lifecycle(&self, event: &LifecycleEvent) -> LifecycleOutcome {
        let call_id = event.call_id.as_str();
        if !event.status.is_terminal() {
            return match self.store.get(call_id) {
                Some(s) if s.phase() == CallPhase::Ringing && event.status == CallStatus::Answered => {
                    self.activate(&s);
                    LifecycleOutcome::Activated
                }
                Some(_) => {
                    debug!(target: "penglish::voice", call_id, status = event.status.as_str(), "Call status");
                    LifecycleOutcome::Noted
                }
                None => LifecycleOutcome::Ignored,
            };
        }

        // Only one caller can win the removal, so the archive is written at most once.
        let Some(session) = self.store.remove(call_id) else {
            debug!(target: "penglish::voice", call_id, status = event.status.as_str(), "Terminal status for unknown or ended call");
            return LifecycleOutcome::Ignored;
        };
        self.remember_terminated(call_id);

        let record = ArchivedCall::from_session(session, event.status.as_str());
        let turns = record.turns.len();
        let archived = match self.archive.store(&record).await {
            Ok(()) => {
                info!(target: "penglish::voice", call_id, turns, status = event.status.as_str(), "📁 Call archived");
                true
            }
            Err(e) => {
                error!(target: "penglish::voice", call_id, "Archive write failed: {}", e);
                false
            }
        };
        LifecycleOutcome::Terminated { archived }
    }

    fn remember_terminated(&self, call_id: &str) {
        let now = Utc::now();
        let retention = chrono::Duration::from_std(self.terminated_retention)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        self.terminated.retain(|_, ended| now - *ended < retention);
        self.terminated.insert(call_id.to_string(), now);
    }

    /// Place an outbound call and track it as a ringing session.
    pub async fn place_call(&self, to: &str) -> Result<String, PlaceCallError> {
        let to = to.trim();
        if to.is_empty() {
            return Err(PlaceCallError::MissingNumber);
        }
        let outbound = self.outbound.as_ref().ok_or(PlaceCallError::NotConfigured)?;

        let language = self.default_language.clone();
        let ncco = self.control.outbound_greeting(&language);
        let call_id = outbound
            .signaling
            .create_outbound_call(to, &outbound.from_number, &ncco)
            .await?;
        info!(target: "penglish::voice", call_id = %call_id, to, "📞 Outbound call placed");

        if let Err(e) = self
            .store
            .insert(CallSession::outbound(&call_id, to, language))
        {
            warn!(target: "penglish::voice", call_id = %call_id, "Outbound session not tracked: {}", e);
        }
        Ok(call_id)
    }
}
