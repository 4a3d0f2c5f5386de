//! Voice gateway configuration.
//!
//! Precedence: env `PENGLISH__*` > TOML file (`$PENGLISH_CONFIG`, default
//! `config/voice.toml`) > defaults. Conventional provider variables
//! (`OPENAI_API_KEY`, `VONAGE_APPLICATION_JWT`, `VONAGE_PHONE_NUMBER`, `BASE_URL`,
//! `PORT`) fill anything still unset.
//!
//! | Key | Default |
//! |-----|---------|
//! | bind_addr | 0.0.0.0:5000 |
//! | public_base_url | http://localhost:5000 |
//! | default_language | fa-IR |
//! | archive.backend | file |
//! | archive.path | ./data/call_archive |
//! | timeouts.fetch_secs / transcribe_secs / reply_secs | 15 / 30 / 30 |

use crate::call_control::RecordSettings;
use crate::error::VoiceResult;
use crate::turn::TurnTimeouts;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveBackend {
    File,
    Sled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveSettings {
    pub backend: ArchiveBackend,
    pub path: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimeoutSettings {
    pub fetch_secs: u64,
    pub transcribe_secs: u64,
    pub reply_secs: u64,
}

impl From<TimeoutSettings> for TurnTimeouts {
    fn from(t: TimeoutSettings) -> Self {
        TurnTimeouts {
            fetch: Duration::from_secs(t.fetch_secs),
            transcribe: Duration::from_secs(t.transcribe_secs),
            reply: Duration::from_secs(t.reply_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiSettings {
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub chat_model: String,
    pub stt_model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VonageSettings {
    pub api_base: String,
    /// Application JWT; used for outbound calls and recording downloads.
    #[serde(default)]
    pub application_jwt: Option<String>,
    /// Caller number for outbound calls.
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    pub bind_addr: String,
    /// Public URL the provider uses to reach the webhooks.
    pub public_base_url: String,
    pub default_language: String,
    pub talk_style: u32,
    pub record: RecordSettings,
    pub timeouts: TimeoutSettings,
    pub archive: ArchiveSettings,
    /// Directory for per-turn audio files; OS temp dir when unset.
    #[serde(default)]
    pub scratch_dir: Option<String>,
    /// How long ended call ids are remembered to ignore late events.
    pub terminated_retention_secs: u64,
    pub openai: OpenAiSettings,
    pub vonage: VonageSettings,
}

impl VoiceConfig {
    /// Load from file and environment.
    pub fn load() -> VoiceResult<Self> {
        let config_path =
            std::env::var("PENGLISH_CONFIG").unwrap_or_else(|_| "config/voice.toml".to_string());
        let path = Path::new(&config_path);
        let builder = defaults()?;
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };
        let built = builder
            .add_source(config::Environment::with_prefix("PENGLISH").separator("__"))
            .build()?;

        let mut cfg: VoiceConfig = built.try_deserialize()?;
        cfg.apply_env_fallbacks();
        Ok(cfg)
    }

    /// Load from a TOML string on top of the defaults (no environment).
    pub fn from_toml_str(toml: &str) -> VoiceResult<Self> {
        let built = defaults()?
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Ok(built.try_deserialize()?)
    }

    fn apply_env_fallbacks(&mut self) {
        fill(&mut self.openai.api_key, "OPENAI_API_KEY");
        fill(&mut self.vonage.application_jwt, "VONAGE_APPLICATION_JWT");
        fill(&mut self.vonage.phone_number, "VONAGE_PHONE_NUMBER");
        if std::env::var("PENGLISH__PUBLIC_BASE_URL").is_err() {
            if let Some(url) = env_opt_string("BASE_URL") {
                self.public_base_url = url;
            }
        }
        if std::env::var("PENGLISH__BIND_ADDR").is_err() {
            if let Some(port) = env_opt_string("PORT").and_then(|p| p.parse::<u16>().ok()) {
                self.bind_addr = format!("0.0.0.0:{}", port);
            }
        }
    }

    pub fn turn_timeouts(&self) -> TurnTimeouts {
        self.timeouts.into()
    }

    pub fn scratch_dir(&self) -> Option<PathBuf> {
        self.scratch_dir
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    pub fn terminated_retention(&self) -> Duration {
        Duration::from_secs(self.terminated_retention_secs)
    }

    /// Both the JWT and a caller number are needed to place calls.
    pub fn outbound_enabled(&self) -> bool {
        self.vonage.application_jwt.is_some() && self.vonage.phone_number.is_some()
    }
}

fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    config::Config::builder()
        .set_default("bind_addr", "0.0.0.0:5000")?
        .set_default("public_base_url", "http://localhost:5000")?
        .set_default("default_language", "fa-IR")?
        .set_default("talk_style", 0_i64)?
        .set_default("record.end_on_silence_secs", 3_i64)?
        .set_default("record.end_on_key", "#")?
        .set_default("record.channels", 1_i64)?
        .set_default("record.format", "mp3")?
        .set_default("timeouts.fetch_secs", 15_i64)?
        .set_default("timeouts.transcribe_secs", 30_i64)?
        .set_default("timeouts.reply_secs", 30_i64)?
        .set_default("archive.backend", "file")?
        .set_default("archive.path", "./data/call_archive")?
        .set_default("terminated_retention_secs", 3600_i64)?
        .set_default("openai.api_base", "https://api.openai.com/v1")?
        .set_default("openai.chat_model", "gpt-4")?
        .set_default("openai.stt_model", "whisper-1")?
        .set_default("vonage.api_base", "https://api.nexmo.com")
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn fill(slot: &mut Option<String>, name: &str) {
    let current = slot.as_deref().map(str::trim).filter(|s| !s.is_empty());
    if current.is_none() {
        *slot = env_opt_string(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = VoiceConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:5000");
        assert_eq!(cfg.default_language, "fa-IR");
        assert_eq!(cfg.record, RecordSettings::default());
        assert_eq!(cfg.archive.backend, ArchiveBackend::File);
        assert_eq!(cfg.turn_timeouts(), TurnTimeouts::default());
        assert_eq!(cfg.openai.chat_model, "gpt-4");
        assert_eq!(cfg.openai.stt_model, "whisper-1");
        assert!(cfg.scratch_dir().is_none());
        assert!(!cfg.outbound_enabled());
    }

    #[test]
    fn toml_overrides_nested_sections() {
        let cfg = VoiceConfig::from_toml_str(
            r#"
            default_language = "en-US"
            scratch_dir = "/tmp/turns"

            [archive]
            backend = "sled"

            [timeouts]
            reply_secs = 5

            [vonage]
            application_jwt = "jwt"
            phone_number = "+1999"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.default_language, "en-US");
        assert_eq!(cfg.archive.backend, ArchiveBackend::Sled);
        assert_eq!(cfg.archive.path, "./data/call_archive");
        assert_eq!(cfg.turn_timeouts().reply, Duration::from_secs(5));
        assert_eq!(cfg.turn_timeouts().fetch, Duration::from_secs(15));
        assert_eq!(cfg.scratch_dir(), Some(PathBuf::from("/tmp/turns")));
        assert!(cfg.outbound_enabled());
    }

    #[test]
    fn unknown_archive_backend_is_rejected() {
        assert!(VoiceConfig::from_toml_str("[archive]\nbackend = \"s3\"").is_err());
    }
}
