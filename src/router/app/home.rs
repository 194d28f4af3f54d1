use axum::{
    extract::{Extension, State},
    response::{Html, IntoResponse, Redirect, Response},
};

use tera::Context;

use std::sync::Arc;

use crate::{data::model::User, AppState};

use super::{auth::render_login, error::AppError};

#[axum::debug_handler]
pub async fn app(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<Option<User>>,
) -> Result<Response, AppError> {
    match current_user {
        Some(_) => Ok(Redirect::to("/chat").into_response()),
        None => Ok(render_login(&state.tera, None)?.into_response()),
    }
}

#[axum::debug_handler]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<Option<User>>,
) -> Result<Response, AppError> {
    let Some(current_user) = current_user else {
        return Ok(Redirect::to("/").into_response());
    };

    let mut context = Context::new();
    context.insert("current_user", &current_user);
    let chat = state.tera.render("views/chat.html", &context)?;

    let mut context = Context::new();
    context.insert("view", &chat);
    context.insert("current_user", &current_user);
    let rendered = state.tera.render("views/main.html", &context)?;

    Ok(Html(rendered).into_response())
}
