use axum::{
    routing::{get, post},
    Router,
};
use tower_cookies::CookieManagerLayer;
use tower_http::{services::ServeDir, trace::TraceLayer};

use std::sync::Arc;

use crate::{
    middleware::{auth, extract_user},
    AppState,
};

mod home;
use home::{app, chat};
mod chat;
use chat::{chat_by_id, chat_generate, delete_chat, list_chats, new_chat, update_chat};
mod message;
use message::{chat_add_message, chat_messages, delete_message, message_by_id, update_message};
mod auth;
use auth::{current_user, login, login_page, logout, register};
mod partials;
use partials::{chat_history, chat_options, model_options};
pub mod error;

pub fn app_router(state: Arc<AppState>) -> Router {
    let json_router = Router::new()
        .route("/user", get(current_user))
        .route("/chat", get(list_chats).post(new_chat))
        .route(
            "/chat/:id",
            get(chat_by_id).put(update_chat).delete(delete_chat),
        )
        .route("/chat/:id/message", get(chat_messages).post(chat_add_message))
        .route(
            "/message/:id",
            get(message_by_id).put(update_message).delete(delete_message),
        )
        .route_layer(axum::middleware::from_fn(auth));

    let html_router = Router::new()
        .route("/chat", get(chat_options))
        .route("/chat-history", get(chat_history))
        .route("/models", get(model_options))
        .route_layer(axum::middleware::from_fn(auth));

    Router::new()
        .route("/", get(app))
        .route("/login", get(login_page).post(login))
        .route("/register", post(register))
        .route("/logout", get(logout).post(logout))
        .route("/chat", get(chat))
        .route(
            "/message",
            post(chat_generate).route_layer(axum::middleware::from_fn(auth)),
        )
        .nest("/json", json_router)
        .nest("/html", html_router)
        .nest_service("/assets", ServeDir::new("assets"))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            extract_user,
        ))
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
