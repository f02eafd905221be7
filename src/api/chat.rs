//! Session and message handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use uuid::Uuid;

use super::routes::AppState;
use super::session_store::SharedSession;
use super::types::{CreateMessageRequest, CredentialRequest, ErrorResponse, SessionSnapshot};
use crate::agent::{AgentExecutor, LlmPolicy};
use crate::events::{event_channel, AgentEvent};

pub(crate) const MISSING_KEY_MESSAGE: &str = "Please add your OpenAI API key to continue.";

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

async fn find_session(state: &AppState, id: Uuid) -> Result<SharedSession, ApiError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Session {} not found", id)))
}

fn busy() -> ApiError {
    api_error(
        StatusCode::CONFLICT,
        "A reply is still being generated for this session.",
    )
}

/// POST /api/sessions
pub async fn create_session(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<SessionSnapshot>) {
    let shared = state.sessions.create(&state.config.greeting).await;
    let chat = shared.lock().await;
    (
        StatusCode::CREATED,
        Json(SessionSnapshot::new(&chat.session, chat.has_api_key())),
    )
}

/// GET /api/sessions/{id}
///
/// Waits for an in-flight run so the snapshot never shows half a turn.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let shared = find_session(&state, id).await?;
    let chat = shared.lock().await;
    Ok(Json(SessionSnapshot::new(&chat.session, chat.has_api_key())))
}

/// DELETE /api/sessions/{id}
///
/// Drops the session and its key. Refused while a run holds it.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let shared = find_session(&state, id).await?;
    let _chat = shared.try_lock().map_err(|_| busy())?;
    state.sessions.remove(id).await;
    tracing::info!(session_id = %id, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/sessions/{id}/reset
pub async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let shared = find_session(&state, id).await?;
    let mut chat = shared.try_lock().map_err(|_| busy())?;
    chat.session.reset();
    tracing::info!(session_id = %id, "Session reset");
    Ok(Json(SessionSnapshot::new(&chat.session, chat.has_api_key())))
}

/// PUT /api/sessions/{id}/credential
pub async fn set_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CredentialRequest>,
) -> Result<StatusCode, ApiError> {
    let shared = find_session(&state, id).await?;
    let mut chat = shared.try_lock().map_err(|_| busy())?;
    chat.set_api_key(&req.api_key);
    tracing::debug!(session_id = %id, has_key = chat.has_api_key(), "Credential updated");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/sessions/{id}/messages
///
/// Starts a run and streams its events. The run owns the session lock and
/// keeps going if the client disconnects.
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let shared = find_session(&state, id).await?;

    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Message content is empty."));
    }

    let mut chat = shared.try_lock_owned().map_err(|_| busy())?;
    let Some(api_key) = chat.api_key.clone() else {
        return Err(api_error(StatusCode::UNAUTHORIZED, MISSING_KEY_MESSAGE));
    };

    let llm = (state.llm_factory)(&api_key);
    let policy = LlmPolicy::from_config(llm, &state.config);
    let executor = AgentExecutor::from_config(Arc::new(policy), state.tools.clone(), &state.config);
    let (sink, mut rx) = event_channel();
    let sessions = state.sessions.clone();

    tokio::spawn(async move {
        if let Err(err) = executor.run(&mut chat.session, &content, &sink).await {
            sink.emit(AgentEvent::Error {
                kind: err.kind().to_string(),
                message: err.user_message(),
                trace: err.trace,
            });
        }
        // Release the session before closing the stream.
        drop(chat);
        drop(sink);
        sessions.touch(id).await;
    });

    let stream_id = Uuid::new_v4();
    tracing::info!(stream_id = %stream_id, session_id = %id, "Message SSE stream opened");

    struct StreamDropGuard {
        stream_id: Uuid,
    }

    impl Drop for StreamDropGuard {
        fn drop(&mut self) {
            tracing::info!(stream_id = %self.stream_id, "Message SSE stream closed");
        }
    }

    let drop_guard = StreamDropGuard { stream_id };

    let stream = async_stream::stream! {
        let _guard = drop_guard;
        while let Some(ev) = rx.recv().await {
            match &ev {
                AgentEvent::Token { .. } => {
                    tracing::trace!(stream_id = %stream_id, event = %ev.event_name(), "Message SSE event");
                }
                _ => {
                    tracing::debug!(stream_id = %stream_id, event = %ev.event_name(), "Message SSE event");
                }
            }
            match Event::default().event(ev.event_name()).json_data(&ev) {
                Ok(sse) => yield Ok(sse),
                Err(e) => {
                    tracing::error!(
                        stream_id = %stream_id,
                        event = %ev.event_name(),
                        error = %e,
                        "Failed to serialize SSE event; dropping"
                    );
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}
