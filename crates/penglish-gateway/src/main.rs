//! Penglish Gateway - telephony webhooks for the voice companion.
//!
//! Routes:
//! - `GET  /health`
//! - `GET|POST /webhooks/answer`, `POST /webhooks/recording`: NCCO responses
//! - `POST /webhooks/event`: call status, 204
//! - `GET|POST /webhooks/fallback`: apology + hang up
//! - `POST /make-call`: outbound call trigger

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use penglish_voice::call_control::call_id_of;
use penglish_voice::{
    ArchiveBackend, CallArchive, CallControl, CallOrchestrator, HttpRecordingFetcher,
    InMemorySessionStore, JsonFileArchive, LanguageTag, OpenAiChat, OpenAiStt, Outbound,
    PlaceCallError, SledArchive, TurnExecutor, VoiceConfig, VoiceError, VoiceResult,
    VonageSignaling, WebhookEvent, WebhookKind,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SIGNALING_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<CallOrchestrator>,
}

#[derive(Debug, Default, Deserialize)]
struct MakeCallRequest {
    #[serde(default, alias = "toAddress", alias = "to")]
    to_number: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[penglish] .env not loaded: {}", e);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!(target: "penglish::gateway", "❌ Gateway stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> VoiceResult<()> {
    let config = VoiceConfig::load()?;
    let orchestrator = build_orchestrator(&config)?;
    info!(
        target: "penglish::gateway",
        language = %orchestrator.default_language(),
        outbound = orchestrator.outbound_enabled(),
        archive = ?config.archive.backend,
        "Voice orchestrator ready"
    );

    let app = router(AppState {
        orchestrator: Arc::new(orchestrator),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(
        target: "penglish::gateway",
        "🚀 Listening on {} (webhooks at {})", config.bind_addr, config.public_base_url
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: "penglish::gateway", "Could not listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!(target: "penglish::gateway", "Shutting down");
}

/// Wire real providers from configuration.
fn build_orchestrator(config: &VoiceConfig) -> VoiceResult<CallOrchestrator> {
    let api_key = config
        .openai
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| VoiceError::Config("OPENAI_API_KEY is not set".to_string()))?;
    let timeouts = config.turn_timeouts();

    let fetcher =
        HttpRecordingFetcher::new(config.vonage.application_jwt.clone(), timeouts.fetch)?;
    let stt = OpenAiStt::new(
        config.openai.api_base.as_str(),
        api_key.as_str(),
        config.openai.stt_model.as_str(),
        timeouts.transcribe,
    )?;
    let chat = OpenAiChat::new(
        config.openai.api_base.as_str(),
        api_key,
        config.openai.chat_model.as_str(),
        timeouts.reply,
    )?;
    let executor = TurnExecutor::new(Arc::new(fetcher), Arc::new(stt), Arc::new(chat))
        .with_timeouts(timeouts)
        .with_scratch_dir(config.scratch_dir());

    let archive: Arc<dyn CallArchive> = match config.archive.backend {
        ArchiveBackend::File => Arc::new(JsonFileArchive::open(Some(&config.archive.path))?),
        ArchiveBackend::Sled => Arc::new(SledArchive::open(Some(&config.archive.path))?),
    };

    let outbound = match (
        config.vonage.application_jwt.as_deref(),
        config.vonage.phone_number.as_deref(),
    ) {
        (Some(jwt), Some(from)) => Some(Outbound {
            signaling: Arc::new(VonageSignaling::new(
                config.vonage.api_base.as_str(),
                jwt,
                &config.public_base_url,
                SIGNALING_TIMEOUT,
            )?),
            from_number: from.to_string(),
        }),
        _ => {
            warn!(target: "penglish::gateway", "Vonage credentials missing; /make-call disabled");
            None
        }
    };

    let control = CallControl::new(
        &config.public_base_url,
        config.record.clone(),
        config.talk_style,
    );
    Ok(CallOrchestrator::new(
        Arc::new(InMemorySessionStore::new()),
        executor,
        control,
        archive,
        LanguageTag::new(config.default_language.as_str()),
    )
    .with_outbound(outbound)
    .with_terminated_retention(config.terminated_retention()))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/answer", get(answer_webhook).post(answer_webhook))
        .route("/webhooks/recording", post(recording_webhook))
        .route("/webhooks/event", post(event_webhook))
        .route("/webhooks/fallback", get(fallback_webhook).post(fallback_webhook))
        .route("/make-call", post(make_call))
        .with_state(state)
        .layer(axum::middleware::from_fn(log_requests))
}

async fn log_requests(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    info!(
        target: "penglish::gateway",
        %method,
        path,
        status = response.status().as_u16(),
        "request"
    );
    response
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "active_calls": state.orchestrator.active_calls(),
    }))
}

/// JSON body (if any) with query parameters filling missing keys. The provider
/// sends the answer webhook as GET with query parameters by default.
fn webhook_payload(query: HashMap<String, String>, body: &Bytes) -> Value {
    let mut map = if body.is_empty() {
        serde_json::Map::new()
    } else {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                warn!(target: "penglish::gateway", "Webhook body is not a JSON object");
                serde_json::Map::new()
            }
            Err(e) => {
                warn!(target: "penglish::gateway", "Webhook body is not JSON: {}", e);
                serde_json::Map::new()
            }
        }
    };
    for (k, v) in query {
        map.entry(k).or_insert(Value::String(v));
    }
    Value::Object(map)
}

async fn dispatch(orchestrator: &CallOrchestrator, kind: WebhookKind, payload: Value) -> Response {
    match WebhookEvent::parse(kind, &payload) {
        Ok(WebhookEvent::Answer(event)) => Json(orchestrator.handle_answer(&event)).into_response(),
        Ok(WebhookEvent::Recording(event)) => {
            Json(orchestrator.handle_recording(&event).await).into_response()
        }
        Ok(WebhookEvent::Lifecycle(event)) => {
            orchestrator.handle_lifecycle(&event).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            warn!(target: "penglish::gateway", "{}", e);
            match kind {
                WebhookKind::Lifecycle => {
                    (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
                        .into_response()
                }
                WebhookKind::Answer | WebhookKind::Recording => {
                    Json(orchestrator.terminal_response()).into_response()
                }
            }
        }
    }
}

async fn answer_webhook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let payload = webhook_payload(query, &body);
    dispatch(&state.orchestrator, WebhookKind::Answer, payload).await
}

async fn recording_webhook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let payload = webhook_payload(query, &body);
    dispatch(&state.orchestrator, WebhookKind::Recording, payload).await
}

async fn event_webhook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let payload = webhook_payload(query, &body);
    dispatch(&state.orchestrator, WebhookKind::Lifecycle, payload).await
}

async fn fallback_webhook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let payload = webhook_payload(query, &body);
    let call_id = call_id_of(&payload);
    Json(state.orchestrator.handle_fallback(call_id.as_deref())).into_response()
}

async fn make_call(State(state): State<AppState>, body: Bytes) -> Response {
    let request: MakeCallRequest = serde_json::from_slice(&body).unwrap_or_default();
    let to = request.to_number.unwrap_or_default();

    match state.orchestrator.place_call(&to).await {
        Ok(call_uuid) => Json(json!({ "success": true, "call_uuid": call_uuid })).into_response(),
        Err(e) => {
            let status = match e {
                PlaceCallError::MissingNumber => StatusCode::BAD_REQUEST,
                PlaceCallError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
                PlaceCallError::Provider(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!(target: "penglish::gateway", to = %to, "make-call failed: {}", e);
            (status, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}
