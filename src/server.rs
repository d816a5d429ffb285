use std::sync::{Arc, Mutex, PoisonError, RwLock};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::engine::{fresh_seed, CompletionResult, ModelSession};
use crate::prompting::GenerationConfig;
use crate::protocol::{CompletionResponse, ErrorBody, GenerationRequest, HealthResponse};

/// Shared handler state. The session mutex is the concurrency policy: every
/// request holds it across ensure-ready, prompt compilation, generation and
/// extraction, so loads never overlap generations and only one generation
/// runs at a time. Waiters block; nothing is rejected.
///
/// The resident-model name is mirrored into its own lock so the liveness
/// probe answers instantly even while a generation holds the session.
#[derive(Clone)]
pub struct AppState {
    session: Arc<Mutex<ModelSession>>,
    resident: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(session: ModelSession) -> Self {
        let resident = session.current_name().map(str::to_string);
        Self {
            session: Arc::new(Mutex::new(session)),
            resident: Arc::new(RwLock::new(resident)),
        }
    }

    fn note_resident(&self, name: Option<String>) {
        *self
            .resident
            .write()
            .unwrap_or_else(PoisonError::into_inner) = name;
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_loaded = state
        .resident
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some();

    Json(HealthResponse {
        status: "healthy",
        model_loaded,
    })
}

type HandlerError = (StatusCode, Json<ErrorBody>);

fn run_pipeline(
    session: &mut ModelSession,
    request: &GenerationRequest,
) -> crate::error::Result<CompletionResult> {
    let config = GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        seed: fresh_seed()?,
        max_new_tokens: request.max_tokens,
    };

    session.ensure_ready(&request.model)?;
    session.generate_reply(&request.messages, &request.system_prompt, &config)
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<CompletionResponse>, HandlerError> {
    if request.stream {
        info!("stream requested; streaming is not supported, returning the whole answer");
    }

    let session = Arc::clone(&state.session);
    let (outcome, resident) = tokio::task::spawn_blocking(move || {
        let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = run_pipeline(&mut session, &request);
        let resident = session.current_name().map(str::to_string);
        (outcome, resident)
    })
    .await
    .map_err(|e| internal_error(format!("inference task failed: {}", e)))?;

    state.note_resident(resident);

    match outcome {
        Ok(completion) => Ok(Json(CompletionResponse::new(
            completion.answer,
            completion.finish_reason,
        ))),
        Err(e) => {
            error!(error = %e, "chat completion failed");
            Err(internal_error(e.to_string()))
        }
    }
}

/// Every pipeline failure surfaces the same way: 500 with the original
/// message in `detail`.
fn internal_error(detail: String) -> HandlerError {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { detail }))
}
