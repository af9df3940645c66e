//! HTTP request handlers

use super::sse::conversation_list_stream;
use super::types::{
    CloseResponse, ConversationListResponse, ConversationResponse, ErrorResponse, MeResponse,
    MessageRequest, OneShotRequest, OneShotResponse, OpenConversationResponse, RemoveResponse,
    SelectResponse, StartResponse, SuccessResponse, TurnResponse, TurnsResponse,
};
use super::AppState;
use crate::auth::Identity;
use crate::runtime::SessionError;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Identity
        .route("/api/me", get(get_me))
        .route("/api/auth/sign-out", post(sign_out))
        // Conversation list
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/conversations/start", post(start_conversation))
        .route("/api/conversations/stream", get(stream_conversations))
        // Single conversation
        .route(
            "/api/conversations/:id",
            get(open_conversation).delete(delete_conversation),
        )
        .route("/api/conversations/:id/turns", get(get_turns))
        .route("/api/conversations/:id/messages", post(submit_message))
        .route("/api/conversations/:id/select", post(select_conversation))
        .route("/api/conversations/:id/close", post(close_conversation))
        // Stateless prompt
        .route("/api/getResponse", post(get_response))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Authentication
// ============================================================

/// The caller, resolved from `Authorization: Bearer <token>`
pub struct AuthUser {
    pub identity: Identity,
    pub token: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::Unauthorized("Missing bearer token".to_string()))?;
        let token = bearer.token().to_string();

        let identity = state
            .identity
            .current_user(&token)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Identity lookup failed");
                AppError::BadGateway("Identity provider unavailable".to_string())
            })?
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired session".to_string()))?;

        Ok(AuthUser { identity, token })
    }
}

async fn get_me(user: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        user: user.identity,
    })
}

async fn sign_out(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<SuccessResponse>, AppError> {
    state.identity.sign_out(&user.token).await.map_err(|e| {
        tracing::error!(error = %e, "Sign-out failed");
        AppError::BadGateway("Identity provider unavailable".to_string())
    })?;
    state.sessions.sign_out(&user.identity.user_id).await;
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// Conversation List
// ============================================================

async fn list_conversations(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ConversationListResponse>, AppError> {
    let navigator = state.sessions.navigator(&user.identity.user_id).await;
    let conversations = navigator.list().await?;
    Ok(Json(ConversationListResponse {
        conversations,
        active: navigator.active(),
    }))
}

async fn create_conversation(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<(StatusCode, Json<ConversationResponse>), AppError> {
    let conversation = state
        .sessions
        .navigator(&user.identity.user_id)
        .await
        .create()
        .await?;
    Ok((StatusCode::CREATED, Json(ConversationResponse { conversation })))
}

async fn start_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<MessageRequest>,
) -> Result<(StatusCode, Json<StartResponse>), AppError> {
    let (conversation, outcome) = state.sessions.start(&user.identity.user_id, &req.text).await?;
    let (turn, error) = match outcome {
        Ok(turn) => (Some(turn), None),
        Err(e) => (None, Some(e.to_string())),
    };
    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            conversation,
            turn,
            error,
        }),
    ))
}

async fn stream_conversations(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let navigator = state.sessions.navigator(&user.identity.user_id).await;
    navigator.list().await?;
    Ok(conversation_list_stream(navigator.subscribe()))
}

// ============================================================
// Single Conversation
// ============================================================

async fn open_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<OpenConversationResponse>, AppError> {
    let (session, conversation) = state.sessions.open(&user.identity.user_id, &id).await?;
    Ok(Json(OpenConversationResponse {
        conversation,
        turns: session.turns(),
        state: session.state(),
    }))
}

async fn get_turns(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<TurnsResponse>, AppError> {
    let session = state.sessions.session(&user.identity.user_id, &id).await?;
    Ok(Json(TurnsResponse {
        turns: session.turns(),
        state: session.state(),
    }))
}

async fn submit_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<TurnResponse>, AppError> {
    let turn = state
        .sessions
        .submit(&user.identity.user_id, &id, &req.text)
        .await?;
    Ok(Json(TurnResponse { turn }))
}

async fn select_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Json<SelectResponse> {
    let navigator = state.sessions.navigator(&user.identity.user_id).await;
    navigator.select(&id);
    Json(SelectResponse {
        active: navigator.active(),
    })
}

async fn close_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Json<CloseResponse> {
    let closed = state.sessions.close(&user.identity.user_id, &id).await;
    Json(CloseResponse { closed })
}

async fn delete_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<RemoveResponse>, AppError> {
    let outcome = state.sessions.remove(&user.identity.user_id, &id).await?;
    Ok(Json(RemoveResponse { outcome }))
}

// ============================================================
// Stateless Prompt
// ============================================================

async fn get_response(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(req): Json<OneShotRequest>,
) -> Result<Json<OneShotResponse>, AppError> {
    let result = state.sessions.one_shot(&req.input).await?;
    Ok(Json(OneShotResponse {
        user_input: req.input,
        result,
    }))
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    GatewayTimeout(String),
    Internal(String),
}

const CONVERSATION_UNAVAILABLE: &str = "Conversation not found or you do not have access to it";

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        let message = e.to_string();
        match e {
            SessionError::ValidationFailed => AppError::BadRequest(message),
            // Same answer for both so existence does not leak
            SessionError::AccessDenied | SessionError::NotFound => {
                AppError::NotFound(CONVERSATION_UNAVAILABLE.to_string())
            }
            SessionError::Busy | SessionError::NotReady(_) => AppError::Conflict(message),
            ref err if err.is_timeout() => AppError::GatewayTimeout(message),
            SessionError::CompletionFailed { .. } => AppError::BadGateway(message),
            SessionError::PersistenceFailed(_) => AppError::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
