use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Extension, Path, State,
    },
    http::StatusCode,
    Json,
};

use std::sync::Arc;

use crate::{
    data::model::{Message, MessageUpdate, NewMessage, User},
    AppState,
};

use super::{chat::owned_chat, error::AppError};

/// Messages have no owner of their own; access follows the parent chat.
async fn owned_message(
    state: &AppState,
    user: &User,
    message_id: i64,
) -> Result<Message, AppError> {
    let message = state.chat_repo.select_message_by_id(message_id).await?;
    owned_chat(&state.chat_repo, user, &message.chat_id).await?;
    Ok(message)
}

#[axum::debug_handler]
pub async fn chat_messages(
    path: Result<Path<String>, PathRejection>,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<User>,
) -> Result<Json<Vec<Message>>, AppError> {
    let Path(chat_id) = path?;
    let chat = owned_chat(&state.chat_repo, &current_user, &chat_id).await?;

    Ok(Json(state.chat_repo.select_messages_by_chat_id(&chat.id).await?))
}

#[axum::debug_handler]
pub async fn chat_add_message(
    path: Result<Path<String>, PathRejection>,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<User>,
    payload: Result<Json<NewMessage>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    let Path(chat_id) = path?;
    let Json(new_message) = payload?;
    new_message.validate().map_err(AppError::Validation)?;
    let chat = owned_chat(&state.chat_repo, &current_user, &chat_id).await?;

    let message = state.chat_repo.insert_message(&chat.id, &new_message).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[axum::debug_handler]
pub async fn message_by_id(
    path: Result<Path<i64>, PathRejection>,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<User>,
) -> Result<Json<Message>, AppError> {
    let Path(message_id) = path?;
    Ok(Json(owned_message(&state, &current_user, message_id).await?))
}

#[axum::debug_handler]
pub async fn update_message(
    path: Result<Path<i64>, PathRejection>,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<User>,
    payload: Result<Json<MessageUpdate>, JsonRejection>,
) -> Result<Json<Message>, AppError> {
    let Path(message_id) = path?;
    let Json(update) = payload?;
    owned_message(&state, &current_user, message_id).await?;

    let message = state.chat_repo.update_message_by_id(message_id, &update).await?;
    Ok(Json(message))
}

#[axum::debug_handler]
pub async fn delete_message(
    path: Result<Path<i64>, PathRejection>,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<User>,
) -> Result<StatusCode, AppError> {
    let Path(message_id) = path?;
    owned_message(&state, &current_user, message_id).await?;

    state.chat_repo.delete_message_by_id(message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
