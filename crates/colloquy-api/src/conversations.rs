use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use colloquy_types::api::{ConversationCreated, MessageCreate, MessageResponse};

use crate::AppState;
use crate::error::into_status;
use crate::middleware::Credential;

/// Responds as soon as the first message is stored; the assistant's reply
/// shows up in the transcript once generation finishes.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(Credential(token)): Extension<Credential>,
    Json(req): Json<MessageCreate>,
) -> Result<impl IntoResponse, StatusCode> {
    let conversation_id = state
        .conversations
        .create_conversation(token.as_deref(), &req.content)
        .await
        .map_err(into_status)?;

    Ok((StatusCode::CREATED, Json(ConversationCreated { conversation_id })))
}

/// Waits for the reply and returns it.
pub async fn add_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(Credential(token)): Extension<Credential>,
    Json(req): Json<MessageCreate>,
) -> Result<impl IntoResponse, StatusCode> {
    let turn = state
        .conversations
        .add_message(token.as_deref(), conversation_id, &req.content)
        .await
        .map_err(into_status)?;

    Ok(Json(MessageResponse::from(turn)))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Extension(Credential(token)): Extension<Credential>,
) -> Result<impl IntoResponse, StatusCode> {
    let turns = state
        .conversations
        .list_messages(token.as_deref(), conversation_id)
        .await
        .map_err(into_status)?;

    let messages: Vec<MessageResponse> = turns.into_iter().map(MessageResponse::from).collect();
    Ok(Json(messages))
}
