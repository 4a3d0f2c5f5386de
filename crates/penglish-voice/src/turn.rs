//! Turn Executor: one conversational turn.
//!
//! fetch recording -> transcribe -> generate reply. Each stage is bounded by a
//! timeout and short-circuits to its own `TurnFailure`. The executor never
//! mutates the session; the orchestrator decides whether the result is kept.

use crate::audio::{RecordingFetcher, TurnAudio};
use crate::chat::{ChatCompletion, ChatMessage};
use crate::locale::LanguageTag;
use crate::session::CallSession;
use crate::stt::SpeechToText;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a turn produced no reply. History is left unchanged in every case.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnFailure {
    /// No recording reference, or it could not be fetched.
    #[error("audio unavailable")]
    AudioUnavailable,
    #[error("transcription failed")]
    TranscriptionFailed,
    #[error("reply generation failed")]
    ReplyGenerationFailed,
}

impl TurnFailure {
    /// Whether the caller gets another chance to speak.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TurnFailure::AudioUnavailable)
    }
}

/// Transcript and reply of a successful turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutput {
    pub transcript: String,
    pub reply: String,
}

/// Per-stage time limits. A timeout counts as that stage's failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnTimeouts {
    pub fetch: Duration,
    pub transcribe: Duration,
    pub reply: Duration,
}

impl Default for TurnTimeouts {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(15),
            transcribe: Duration::from_secs(30),
            reply: Duration::from_secs(30),
        }
    }
}

/// System preamble for the reply model.
pub fn system_preamble(language: &LanguageTag) -> String {
    format!(
        "You are a helpful AI assistant speaking in {}. Keep responses concise and natural for phone conversations. Limit responses to 2-3 sentences.",
        language.language_name()
    )
}

/// Runs turns against injected capabilities.
#[derive(Clone)]
pub struct TurnExecutor {
    fetcher: Arc<dyn RecordingFetcher>,
    stt: Arc<dyn SpeechToText>,
    chat: Arc<dyn ChatCompletion>,
    timeouts: TurnTimeouts,
    scratch_dir: Option<PathBuf>,
}

impl TurnExecutor {
    pub fn new(
        fetcher: Arc<dyn RecordingFetcher>,
        stt: Arc<dyn SpeechToText>,
        chat: Arc<dyn ChatCompletion>,
    ) -> Self {
        Self {
            fetcher,
            stt,
            chat,
            timeouts: TurnTimeouts::default(),
            scratch_dir: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: TurnTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Directory for per-turn audio files (OS temp dir when unset).
    pub fn with_scratch_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// Run one turn for `session` on the recording at `recording_url`.
    pub async fn run(
        &self,
        session: &CallSession,
        recording_url: Option<&str>,
    ) -> Result<TurnOutput, TurnFailure> {
        let call_id = session.call_id();
        let url = match recording_url.map(str::trim) {
            Some(u) if !u.is_empty() => u,
            _ => {
                info!(target: "penglish::voice", call_id, "No speech recorded");
                return Err(TurnFailure::AudioUnavailable);
            }
        };

        // Held until the end of this function: dropped (and deleted) on every path.
        let audio = self.fetch(call_id, url).await?;

        let transcript = self.transcribe(call_id, &audio, session.language()).await?;
        info!(target: "penglish::voice", call_id, transcript = %transcript, "🎤 Caller said");

        let reply = self.reply(call_id, session, &transcript).await?;
        info!(target: "penglish::voice", call_id, reply = %reply, "🗣️ Assistant reply");

        Ok(TurnOutput { transcript, reply })
    }

    async fn fetch(&self, call_id: &str, url: &str) -> Result<TurnAudio, TurnFailure> {
        let bytes = bounded(self.timeouts.fetch, self.fetcher.fetch(url))
            .await
            .map_err(|e| {
                warn!(target: "penglish::voice", call_id, url, "Recording fetch failed: {}", e);
                TurnFailure::AudioUnavailable
            })?;
        if bytes.is_empty() {
            warn!(target: "penglish::voice", call_id, url, "Recording is empty");
            return Err(TurnFailure::AudioUnavailable);
        }
        let audio = TurnAudio::persist(&bytes, self.scratch_dir.as_deref())
            .await
            .map_err(|e| {
                warn!(target: "penglish::voice", call_id, "Could not store recording: {}", e);
                TurnFailure::AudioUnavailable
            })?;
        debug!(target: "penglish::voice", call_id, path = %audio.path().display(), bytes = audio.len(), "Recording stored");
        Ok(audio)
    }

    async fn transcribe(
        &self,
        call_id: &str,
        audio: &TurnAudio,
        language: &LanguageTag,
    ) -> Result<String, TurnFailure> {
        let text = bounded(self.timeouts.transcribe, self.stt.transcribe(audio, language))
            .await
            .map_err(|e| {
                warn!(target: "penglish::voice", call_id, "Transcription failed: {}", e);
                TurnFailure::TranscriptionFailed
            })?;
        let text = text.trim();
        if text.is_empty() {
            warn!(target: "penglish::voice", call_id, "Transcription is empty");
            return Err(TurnFailure::TranscriptionFailed);
        }
        Ok(text.to_string())
    }

    async fn reply(
        &self,
        call_id: &str,
        session: &CallSession,
        transcript: &str,
    ) -> Result<String, TurnFailure> {
        let messages = build_messages(session, transcript);
        let reply = bounded(self.timeouts.reply, self.chat.complete(&messages))
            .await
            .map_err(|e| {
                warn!(target: "penglish::voice", call_id, "Reply generation failed: {}", e);
                TurnFailure::ReplyGenerationFailed
            })?;
        let reply = reply.trim();
        if reply.is_empty() {
            warn!(target: "penglish::voice", call_id, "Reply is empty");
            return Err(TurnFailure::ReplyGenerationFailed);
        }
        Ok(reply.to_string())
    }
}

/// `[system preamble] + history + [new user turn]`.
pub fn build_messages(session: &CallSession, transcript: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(session.turns().len() + 2);
    messages.push(ChatMessage::system(system_preamble(session.language())));
    messages.extend(session.turns().iter().map(ChatMessage::from));
    messages.push(ChatMessage::user(transcript));
    messages
}

/// Outcome of a stage that may also time out.
#[derive(Debug)]
enum StageError<E> {
    Failed(E),
    TimedOut(Duration),
}

impl<E: std::fmt::Display> std::fmt::Display for StageError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageError::Failed(e) => write!(f, "{}", e),
            StageError::TimedOut(d) => write!(f, "timed out after {:?}", d),
        }
    }
}

async fn bounded<T, E, F>(limit: Duration, fut: F) -> Result<T, StageError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(StageError::Failed(e)),
        Err(_) => Err(StageError::TimedOut(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::session::Turn;
    use crate::store::{InMemorySessionStore, SessionStore};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Fetcher {
        bytes: Option<Vec<u8>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordingFetcher for Fetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bytes.clone().ok_or(ProviderError::Status {
                service: "recording",
                status: 404,
                body: String::new(),
            })
        }
    }

    /// Returns `text`, remembering the file it was handed.
    struct Stt {
        text: Result<String, ()>,
        seen_path: Mutex<Option<PathBuf>>,
        seen_language: Mutex<Option<String>>,
    }

    #[async_trait]
    impl SpeechToText for Stt {
        async fn transcribe(
            &self,
            audio: &TurnAudio,
            language: &LanguageTag,
        ) -> Result<String, ProviderError> {
            assert!(audio.path().exists());
            *self.seen_path.lock().unwrap() = Some(audio.path_buf());
            *self.seen_language.lock().unwrap() = Some(language.to_string());
            self.text
                .clone()
                .map_err(|_| ProviderError::NotConfigured("stt"))
        }
    }

    struct Chat {
        reply: String,
        delay: Duration,
        seen: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl ChatCompletion for Chat {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
            *self.seen.lock().unwrap() = messages.to_vec();
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.clone())
        }
    }

    struct Rig {
        fetcher: Arc<Fetcher>,
        stt: Arc<Stt>,
        chat: Arc<Chat>,
        dir: tempfile::TempDir,
    }

    impl Rig {
        fn new(bytes: Option<&[u8]>, transcript: Result<&str, ()>, reply: &str) -> Self {
            Self {
                fetcher: Arc::new(Fetcher {
                    bytes: bytes.map(|b| b.to_vec()),
                    calls: AtomicUsize::new(0),
                }),
                stt: Arc::new(Stt {
                    text: transcript.map(str::to_string),
                    seen_path: Mutex::new(None),
                    seen_language: Mutex::new(None),
                }),
                chat: Arc::new(Chat {
                    reply: reply.to_string(),
                    delay: Duration::ZERO,
                    seen: Mutex::new(Vec::new()),
                }),
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn executor(&self) -> TurnExecutor {
            TurnExecutor::new(self.fetcher.clone(), self.stt.clone(), self.chat.clone())
                .with_scratch_dir(Some(self.dir.path().to_path_buf()))
        }

        fn seen_path(&self) -> PathBuf {
            self.stt.seen_path.lock().unwrap().clone().unwrap()
        }
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    fn session() -> CallSession {
        CallSession::inbound("C1", "+1555", LanguageTag::new("fa-IR"))
    }

    #[tokio::test]
    async fn successful_turn_returns_pair_and_releases_audio() {
        let rig = Rig::new(Some(b"mp3"), Ok("  hello "), "hi there");
        let out = rig.executor().run(&session(), Some("http://x/a.mp3")).await.unwrap();

        assert_eq!(
            out,
            TurnOutput {
                transcript: "hello".into(),
                reply: "hi there".into()
            }
        );
        assert!(!rig.seen_path().exists());
        assert!(dir_is_empty(rig.dir.path()));
        assert_eq!(rig.stt.seen_language.lock().unwrap().as_deref(), Some("fa-IR"));
    }

    #[tokio::test]
    async fn missing_url_fails_without_fetching() {
        let rig = Rig::new(Some(b"mp3"), Ok("hello"), "hi");
        for url in [None, Some(""), Some("   ")] {
            assert_eq!(
                rig.executor().run(&session(), url).await,
                Err(TurnFailure::AudioUnavailable)
            );
        }
        assert_eq!(rig.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetch_error_and_empty_body_are_audio_unavailable() {
        let rig = Rig::new(None, Ok("hello"), "hi");
        assert_eq!(
            rig.executor().run(&session(), Some("http://x/a.mp3")).await,
            Err(TurnFailure::AudioUnavailable)
        );
        let rig = Rig::new(Some(b""), Ok("hello"), "hi");
        assert_eq!(
            rig.executor().run(&session(), Some("http://x/a.mp3")).await,
            Err(TurnFailure::AudioUnavailable)
        );
        assert!(dir_is_empty(rig.dir.path()));
    }

    #[tokio::test]
    async fn transcription_error_or_empty_text_fails_and_releases_audio() {
        let rig = Rig::new(Some(b"mp3"), Err(()), "hi");
        assert_eq!(
            rig.executor().run(&session(), Some("http://x/a.mp3")).await,
            Err(TurnFailure::TranscriptionFailed)
        );
        assert!(!rig.seen_path().exists());

        let rig = Rig::new(Some(b"mp3"), Ok("   "), "hi");
        assert_eq!(
            rig.executor().run(&session(), Some("http://x/a.mp3")).await,
            Err(TurnFailure::TranscriptionFailed)
        );
        assert!(rig.chat.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_reply_is_reply_generation_failure() {
        let rig = Rig::new(Some(b"mp3"), Ok("hello"), "  ");
        assert_eq!(
            rig.executor().run(&session(), Some("http://x/a.mp3")).await,
            Err(TurnFailure::ReplyGenerationFailed)
        );
        assert!(!rig.seen_path().exists());
    }

    #[tokio::test]
    async fn slow_reply_times_out_as_reply_failure() {
        let mut rig = Rig::new(Some(b"mp3"), Ok("hello"), "late");
        rig.chat = Arc::new(Chat {
            reply: "late".into(),
            delay: Duration::from_secs(5),
            seen: Mutex::new(Vec::new()),
        });
        let exec = rig.executor().with_timeouts(TurnTimeouts {
            reply: Duration::from_millis(20),
            ..TurnTimeouts::default()
        });
        assert_eq!(
            exec.run(&session(), Some("http://x/a.mp3")).await,
            Err(TurnFailure::ReplyGenerationFailed)
        );
        assert!(dir_is_empty(rig.dir.path()));
    }

    /// Never answers within a test's time limit.
    struct Stalled;

    #[async_trait]
    impl RecordingFetcher for Stalled {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, ProviderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(b"mp3".to_vec())
        }
    }

    #[async_trait]
    impl SpeechToText for Stalled {
        async fn transcribe(
            &self,
            _audio: &TurnAudio,
            _language: &LanguageTag,
        ) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("hello".to_string())
        }
    }

    #[tokio::test]
    async fn slow_fetch_times_out_as_audio_unavailable() {
        let rig = Rig::new(Some(b"mp3"), Ok("hello"), "hi");
        let exec = TurnExecutor::new(Arc::new(Stalled), rig.stt.clone(), rig.chat.clone())
            .with_scratch_dir(Some(rig.dir.path().to_path_buf()))
            .with_timeouts(TurnTimeouts {
                fetch: Duration::from_millis(20),
                ..TurnTimeouts::default()
            });
        assert_eq!(
            exec.run(&session(), Some("http://x/a.mp3")).await,
            Err(TurnFailure::AudioUnavailable)
        );
        assert!(rig.stt.seen_path.lock().unwrap().is_none());
        assert!(dir_is_empty(rig.dir.path()));
    }

    #[tokio::test]
    async fn slow_transcription_times_out_as_transcription_failure() {
        let rig = Rig::new(Some(b"mp3"), Ok("hello"), "hi");
        let exec = TurnExecutor::new(rig.fetcher.clone(), Arc::new(Stalled), rig.chat.clone())
            .with_scratch_dir(Some(rig.dir.path().to_path_buf()))
            .with_timeouts(TurnTimeouts {
                transcribe: Duration::from_millis(20),
                ..TurnTimeouts::default()
            });
        assert_eq!(
            exec.run(&session(), Some("http://x/a.mp3")).await,
            Err(TurnFailure::TranscriptionFailed)
        );
        assert!(rig.chat.seen.lock().unwrap().is_empty());
        assert!(dir_is_empty(rig.dir.path()));
    }

    #[test]
    fn preamble_names_unmapped_language_by_tag() {
        let preamble = system_preamble(&LanguageTag::new("de-DE"));
        assert!(preamble.contains("speaking in de-DE"));
        assert!(!preamble.contains("English"));
        assert!(system_preamble(&LanguageTag::new("fa-IR")).contains("Farsi"));
    }

    #[tokio::test]
    async fn model_input_is_preamble_history_then_new_user_turn() {
        let store = InMemorySessionStore::new();
        store.create("C1", "+1555", LanguageTag::new("en-US")).unwrap();
        store.append_exchange("C1", "hello", "hi there").unwrap();
        let session = store.get("C1").unwrap();

        let rig = Rig::new(Some(b"mp3"), Ok("how are you"), "fine");
        rig.executor().run(&session, Some("http://x/b.mp3")).await.unwrap();

        let seen = rig.chat.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].role, "system");
        assert!(seen[0].content.contains("English"));
        assert!(seen[0].content.contains("2-3 sentences"));
        assert_eq!(seen[1], ChatMessage::from(&Turn::user("hello")));
        assert_eq!(seen[2], ChatMessage::from(&Turn::assistant("hi there")));
        assert_eq!(seen[3], ChatMessage::user("how are you"));
        // The executor leaves history alone.
        assert_eq!(store.get("C1").unwrap().turns().len(), 2);
    }

    #[test]
    fn only_missing_audio_is_recoverable() {
        assert!(TurnFailure::AudioUnavailable.is_recoverable());
        assert!(!TurnFailure::TranscriptionFailed.is_recoverable());
        assert!(!TurnFailure::ReplyGenerationFailed.is_recoverable());
    }
}
