//! Call-control signaling: placing outbound calls through the telephony provider.

use crate::call_control::Ncco;
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[async_trait]
pub trait CallSignaling: Send + Sync {
    /// Place a call from `from` to `to` that runs `instructions` once answered.
    /// Returns the provider's call id.
    async fn create_outbound_call(
        &self,
        to: &str,
        from: &str,
        instructions: &Ncco,
    ) -> Result<String, ProviderError>;
}

#[derive(Serialize)]
struct Endpoint<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    number: &'a str,
}

#[derive(Serialize)]
struct CreateCallRequest<'a> {
    to: [Endpoint<'a>; 1],
    from: Endpoint<'a>,
    ncco: &'a Ncco,
    event_url: [&'a str; 1],
}

#[derive(Deserialize)]
struct CreateCallResponse {
    uuid: Option<String>,
}

/// Vonage Voice API client (`POST /v1/calls`), authenticated with an
/// application JWT.
#[derive(Debug, Clone)]
pub struct VonageSignaling {
    api_base: String,
    application_jwt: String,
    event_url: String,
    client: reqwest::Client,
}

impl VonageSignaling {
    /// `public_base_url` is used for the call's status event webhook.
    pub fn new(
        api_base: impl Into<String>,
        application_jwt: impl Into<String>,
        public_base_url: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_base: api_base.into(),
            application_jwt: application_jwt.into(),
            event_url: format!("{}/webhooks/event", public_base_url.trim_end_matches('/')),
            client,
        })
    }
}

#[async_trait]
impl CallSignaling for VonageSignaling {
    async fn create_outbound_call(
        &self,
        to: &str,
        from: &str,
        instructions: &Ncco,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/v1/calls", self.api_base.trim_end_matches('/'));
        let body = CreateCallRequest {
            to: [Endpoint { kind: "phone", number: to }],
            from: Endpoint { kind: "phone", number: from },
            ncco: instructions,
            event_url: [self.event_url.as_str()],
        };
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.application_jwt)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                service: "signaling",
                status: status.as_u16(),
                body: text,
            });
        }
        let parsed: CreateCallResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Decode {
                service: "signaling",
                detail: e.to_string(),
            })?;
        parsed
            .uuid
            .filter(|u| !u.is_empty())
            .ok_or(ProviderError::Decode {
                service: "signaling",
                detail: "response has no call uuid".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_control::{CallControl, RecordSettings};
    use crate::locale::LanguageTag;

    #[test]
    fn request_body_matches_provider_shape() {
        let ncco = CallControl::new("https://v.example", RecordSettings::default(), 0)
            .outbound_greeting(&LanguageTag::new("fa-IR"));
        let body = CreateCallRequest {
            to: [Endpoint { kind: "phone", number: "+1555" }],
            from: Endpoint { kind: "phone", number: "+1999" },
            ncco: &ncco,
            event_url: ["https://v.example/webhooks/event"],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["to"][0]["type"], "phone");
        assert_eq!(json["to"][0]["number"], "+1555");
        assert_eq!(json["from"]["number"], "+1999");
        assert_eq!(json["ncco"][0]["action"], "talk");
        assert_eq!(json["ncco"][1]["action"], "record");
        assert_eq!(json["event_url"][0], "https://v.example/webhooks/event");
    }
}
