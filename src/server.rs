use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::{StreamExt, future, stream};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    engine::CompletionEngine,
    error::ServiceError,
    oai::{
        CompletionStream, GenerationRequest, assemble_completion, assemble_embedding,
        gen_chatcmplid, gen_cmplid, normalize_completion, normalize_embedding, sse_done_event,
        sse_error_event, sse_event,
    },
    template::ChatTemplate,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<dyn CompletionEngine>,
    pub template: Arc<ChatTemplate>,
}

pub fn build_router(
    config: Arc<AppConfig>,
    engine: Arc<dyn CompletionEngine>,
) -> Result<Router, ServiceError> {
    let template = Arc::new(config.build_chat_template()?);
    let state = AppState {
        config,
        engine,
        template,
    };

    Ok(Router::new()
        .route("/health", get(health))
        .route("/models", get(models))
        .route("/v1/models", get(models))
        .route("/completions", post(completions))
        .route("/v1/completions", post(completions))
        .route("/chat/completions", post(chat_completions))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/embeddings", post(embeddings))
        .route("/v1/embeddings", post(embeddings))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()))
}

/// Binds `config.listen_addr` and serves until the listener fails.
pub async fn serve(config: Arc<AppConfig>, engine: Arc<dyn CompletionEngine>) -> anyhow::Result<()> {
    let router = build_router(config.clone(), engine)?;
    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    info!(%addr, model = %config.model_alias, "OpenAI-compatible server ready");

    axum::serve(listener, router).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn models(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [{
            "id": state.config.model_alias,
            "object": "model",
            "created": chrono::Utc::now().timestamp(),
            "owned_by": "oaicompat_bridge",
        }],
    }))
}

fn parse_body(body: &Bytes) -> Result<Value, ServiceError> {
    serde_json::from_slice(body)
        .map_err(|err| ServiceError::InvalidRequest(format!("invalid JSON body: {err}")))
}

async fn completions(State(state): State<AppState>, body: Bytes) -> Result<Response, ServiceError> {
    let request = normalize_completion(&parse_body(&body)?, None)?;
    respond(&state, request, gen_cmplid()).await
}

async fn chat_completions(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ServiceError> {
    let request = normalize_completion(&parse_body(&body)?, Some(state.template.as_ref()))?;
    respond(&state, request, gen_chatcmplid()).await
}

async fn embeddings(State(state): State<AppState>, body: Bytes) -> Result<Response, ServiceError> {
    let request = normalize_embedding(&parse_body(&body)?, &state.config.model_alias)?;
    let result = state.engine.embed(&request).await?;
    Ok(Json(assemble_embedding(&request, &result)).into_response())
}

async fn respond(
    state: &AppState,
    request: GenerationRequest,
    completion_id: String,
) -> Result<Response, ServiceError> {
    if !request.stream() {
        let result = state.engine.complete(&request).await?;
        let response = assemble_completion(&request, &result, &completion_id, false, false);
        return Ok(Json(response).into_response());
    }

    let steps = state.engine.stream(&request).await?;
    let assembler = CompletionStream::new(request, completion_id);

    // Ends after the finishing step or the first engine error.
    let events = steps
        .scan((assembler, false), |(assembler, failed), step| {
            if *failed || assembler.is_finished() {
                return future::ready(None);
            }
            let events: Vec<Result<Event, ServiceError>> = match step {
                Ok(result) => assembler.chunks(&result).iter().map(sse_event).collect(),
                Err(err) => {
                    warn!(error = %err, id = assembler.completion_id(), "generation failed mid-stream");
                    *failed = true;
                    vec![Ok(sse_error_event(&err))]
                }
            };
            future::ready(Some(stream::iter(events)))
        })
        .flatten()
        .chain(stream::once(future::ready(Ok(sse_done_event()))));

    Ok(Sse::new(events)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response())
}
