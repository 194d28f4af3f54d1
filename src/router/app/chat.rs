use axum::{
    body::{Body, Bytes},
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Extension, Path, Query, State,
    },
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::stream::BoxStream;
use serde::{de, Deserialize, Deserializer, Serialize};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use std::sync::Arc;

use crate::{
    ai::ollama::{ChatRequest, ReplyCollector, UpstreamError},
    data::{
        model::{Chat, ChatUpdate, Message, NewChat, NewMessage, User},
        repository::ChatRepository,
    },
    session::AuthError,
    AppState,
};

use super::error::AppError;

const CHAT_ID_HEADER: HeaderName = HeaderName::from_static("x-chat-id");
const RELAY_BUFFER: usize = 16;

/// Loads a chat and checks that `user` owns it.
pub(super) async fn owned_chat(
    chats: &ChatRepository,
    user: &User,
    chat_id: &str,
) -> Result<Chat, AppError> {
    let chat = chats.select_chat_by_id(chat_id).await?;
    if chat.user_id != user.id {
        tracing::warn!(user_id = user.id, chat_id, "chat belongs to another user");
        return Err(AuthError::Forbidden.into());
    }
    Ok(chat)
}

#[derive(Deserialize, Debug, Default)]
pub struct ChatQuery {
    #[serde(default, deserialize_with = "query_flag")]
    msg: bool,
}

/// `?msg`, `?msg=1` and `?msg=true` all switch the flag on.
fn query_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = String::deserialize(deserializer)?;
    match value.to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(de::Error::custom(format!("invalid flag value '{other}'"))),
    }
}

#[derive(Serialize, Debug)]
pub struct ChatView {
    #[serde(flatten)]
    chat: Chat,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<Vec<Message>>,
}

impl ChatView {
    async fn load(chats: &ChatRepository, chat: Chat, with_messages: bool) -> Result<Self, AppError> {
        let messages = if with_messages {
            Some(chats.select_messages_by_chat_id(&chat.id).await?)
        } else {
            None
        };
        Ok(Self { chat, messages })
    }
}

#[axum::debug_handler]
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<User>,
    query: Result<Query<ChatQuery>, QueryRejection>,
) -> Result<Json<Vec<ChatView>>, AppError> {
    let Query(query) = query?;
    let user_chats = state.chat_repo.select_chats_by_user_id(current_user.id).await?;

    let mut views = Vec::with_capacity(user_chats.len());
    for chat in user_chats {
        views.push(ChatView::load(&state.chat_repo, chat, query.msg).await?);
    }

    Ok(Json(views))
}

#[axum::debug_handler]
pub async fn new_chat(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<User>,
    payload: Result<Json<NewChat>, JsonRejection>,
) -> Result<(StatusCode, Json<Chat>), AppError> {
    let Json(new_chat) = payload?;
    new_chat.validate().map_err(AppError::Validation)?;

    let chat = state.chat_repo.insert_chat(current_user.id, &new_chat).await?;
    tracing::debug!(chat_id = %chat.id, user_id = current_user.id, "chat created");

    Ok((StatusCode::CREATED, Json(chat)))
}

#[axum::debug_handler]
pub async fn chat_by_id(
    path: Result<Path<String>, PathRejection>,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<User>,
    query: Result<Query<ChatQuery>, QueryRejection>,
) -> Result<Json<ChatView>, AppError> {
    let Path(chat_id) = path?;
    let Query(query) = query?;
    let chat = owned_chat(&state.chat_repo, &current_user, &chat_id).await?;

    Ok(Json(ChatView::load(&state.chat_repo, chat, query.msg).await?))
}

#[axum::debug_handler]
pub async fn update_chat(
    path: Result<Path<String>, PathRejection>,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<User>,
    payload: Result<Json<ChatUpdate>, JsonRejection>,
) -> Result<Json<Chat>, AppError> {
    let Path(chat_id) = path?;
    let Json(update) = payload?;
    owned_chat(&state.chat_repo, &current_user, &chat_id).await?;

    let chat = state.chat_repo.update_chat_by_id(&chat_id, &update).await?;
    Ok(Json(chat))
}

#[axum::debug_handler]
pub async fn delete_chat(
    path: Result<Path<String>, PathRejection>,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<User>,
) -> Result<StatusCode, AppError> {
    let Path(chat_id) = path?;
    owned_chat(&state.chat_repo, &current_user, &chat_id).await?;

    state.chat_repo.delete_chat_by_id(&chat_id).await?;
    tracing::debug!(chat_id, user_id = current_user.id, "chat deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Debug)]
pub struct ChatMessage {
    #[serde(default)]
    chat_id: Option<String>,
    model: String,
    message: String,
    #[serde(default)]
    stream: bool,
}

async fn store_reply(chats: &ChatRepository, chat_id: &str, reply: String) {
    if reply.trim().is_empty() {
        tracing::debug!(chat_id, "no assistant reply to store");
        return;
    }
    if let Err(err) = chats.insert_message(chat_id, &NewMessage::assistant(reply)).await {
        tracing::error!(error = %err, chat_id, "failed to store assistant reply");
    }
}

/// Drains the upstream body on its own task, forwarding each chunk untouched and
/// storing the collected reply once upstream ends, whether or not the client is
/// still reading.
fn relay_and_store(
    mut upstream: BoxStream<'static, reqwest::Result<Bytes>>,
    state: Arc<AppState>,
    chat_id: String,
) -> ReceiverStream<reqwest::Result<Bytes>> {
    let (sender, receiver) = mpsc::channel::<reqwest::Result<Bytes>>(RELAY_BUFFER);

    tokio::spawn(async move {
        let mut collector = ReplyCollector::default();
        let mut client_gone = false;

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(chunk) => {
                    collector.absorb(&chunk);
                    if !client_gone && sender.send(Ok(chunk)).await.is_err() {
                        tracing::debug!(chat_id, "client went away, still collecting reply");
                        client_gone = true;
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, chat_id, "inference stream interrupted");
                    let _ = sender.send(Err(err)).await;
                    return;
                }
            }
        }

        store_reply(&state.chat_repo, &chat_id, collector.finish()).await;
    });

    ReceiverStream::new(receiver)
}

/// Stores the user's turn, forwards the whole conversation to the inference service
/// and relays its answer.
#[axum::debug_handler]
pub async fn chat_generate(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<User>,
    payload: Result<Json<ChatMessage>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload?;
    if request.model.trim().is_empty() || request.message.trim().is_empty() {
        return Err(AppError::Validation(
            "model and message are required".to_string(),
        ));
    }

    let turn = NewMessage::user(request.message.clone());
    let chat_id = match request.chat_id.filter(|id| !id.is_empty()) {
        Some(chat_id) => {
            let chat = owned_chat(&state.chat_repo, &current_user, &chat_id).await?;
            state.chat_repo.insert_message(&chat.id, &turn).await?;
            chat.id
        }
        None => {
            let (chat, _) = state
                .chat_repo
                .create_chat_with_message(current_user.id, &NewChat::titled(&request.message), &turn)
                .await?;
            chat.id
        }
    };

    let history = state.chat_repo.select_messages_by_chat_id(&chat_id).await?;
    let outbound = ChatRequest::from_history(&request.model, &history, request.stream);
    let upstream = state.ollama.chat(&outbound).await?;

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::OK);
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/json")
        .to_string();

    let body = if request.stream {
        let chunks = Box::pin(upstream.bytes_stream());
        Body::from_stream(relay_and_store(chunks, Arc::clone(&state), chat_id.clone()))
    } else {
        let bytes = upstream.bytes().await.map_err(UpstreamError::from)?;
        let mut collector = ReplyCollector::default();
        collector.absorb(&bytes);
        store_reply(&state.chat_repo, &chat_id, collector.finish()).await;
        Body::from(bytes)
    };

    Ok((
        status,
        [(header::CONTENT_TYPE, content_type), (CHAT_ID_HEADER, chat_id)],
        body,
    )
        .into_response())
}
