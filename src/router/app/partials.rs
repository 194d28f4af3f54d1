use axum::{
    extract::{rejection::QueryRejection, Extension, Query, State},
    response::Html,
};

use serde::{Deserialize, Serialize};
use tera::Context;

use std::sync::Arc;

use crate::{
    data::model::{Message, User},
    AppState,
};

use super::{chat::owned_chat, error::AppError};

#[derive(Serialize, Debug)]
struct RenderedMessage {
    message: Message,
    html: String,
}

#[axum::debug_handler]
pub async fn chat_options(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<User>,
) -> Result<Html<String>, AppError> {
    let user_chats = state.chat_repo.select_chats_by_user_id(current_user.id).await?;

    let mut context = Context::new();
    context.insert("user_chats", &user_chats);
    let update = state.tera.render("partials/chat_options.html", &context)?;

    Ok(Html(update))
}

#[derive(Deserialize, Debug)]
pub struct HistoryParams {
    chat_id: String,
}

#[axum::debug_handler]
pub async fn chat_history(
    params: Result<Query<HistoryParams>, QueryRejection>,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<User>,
) -> Result<Html<String>, AppError> {
    let Query(params) = params?;
    let chat = owned_chat(&state.chat_repo, &current_user, &params.chat_id).await?;
    let messages = state.chat_repo.select_messages_by_chat_id(&chat.id).await?;

    let rendered = messages
        .into_iter()
        .map(|message| {
            let html = comrak::markdown_to_html(&message.content, &comrak::Options::default());
            RenderedMessage { message, html }
        })
        .collect::<Vec<_>>();

    let mut context = Context::new();
    context.insert("chat", &chat);
    context.insert("messages", &rendered);
    let update = state.tera.render("partials/chat_history.html", &context)?;

    Ok(Html(update))
}

#[axum::debug_handler]
pub async fn model_options(State(state): State<Arc<AppState>>) -> Result<Html<String>, AppError> {
    let models = state.ollama.models().await?;

    let mut context = Context::new();
    context.insert("models", &models);
    let update = state.tera.render("partials/models.html", &context)?;

    Ok(Html(update))
}
