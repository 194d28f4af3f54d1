use axum::{
    extract::{Extension, State},
    response::{Html, IntoResponse, Redirect, Response},
    Form, Json,
};

use serde::Deserialize;
use tera::{Context, Tera};
use tower_cookies::{
    cookie::time::{Duration, OffsetDateTime},
    Cookie, Cookies,
};

use std::sync::Arc;

use crate::{
    credential::{self, SESSION_TOKEN_BYTES},
    data::{
        error::StoreError,
        model::{validate_credentials, NewUser, User},
    },
    middleware::SESSION_COOKIE,
    AppState,
};

use super::error::AppError;

const SESSION_LIFETIME_HOURS: i64 = 24;

/// Renders the login view, optionally with an error line above the forms.
pub(super) fn render_login(tera: &Tera, error: Option<&str>) -> Result<Html<String>, AppError> {
    let mut context = Context::new();
    context.insert("error", &error);
    let login = tera.render("views/login.html", &context)?;

    let mut context = Context::new();
    context.insert("view", &login);
    let rendered = tera.render("views/main.html", &context)?;

    Ok(Html(rendered))
}

pub async fn login_page(State(state): State<Arc<AppState>>) -> Result<Html<String>, AppError> {
    render_login(&state.tera, None)
}

#[derive(Deserialize, Debug)]
pub struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn register_user(state: &AppState, form: &Credentials) -> Result<User, AppError> {
    validate_credentials(&form.username, &form.password).map_err(AppError::Validation)?;

    let password_hash = credential::hash_password(&form.password, state.bcrypt_cost).await?;
    let user = state
        .user_repo
        .insert_user(&NewUser {
            name: form.username.clone(),
            password_hash,
        })
        .await?;

    Ok(user)
}

fn registration_failure(err: &AppError) -> &str {
    match err {
        AppError::Validation(message) => message.as_str(),
        AppError::Hashing(_) => "Failed to hash password",
        AppError::Store(StoreError::Constraint(_)) => "User already exists",
        _ => "Registration failed, please try again",
    }
}

#[axum::debug_handler]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Form(form): Form<Credentials>,
) -> Result<Response, AppError> {
    match register_user(&state, &form).await {
        Ok(user) => {
            tracing::info!(user_id = user.id, "user registered");
            Ok(Redirect::to("/login").into_response())
        }
        Err(err) => {
            tracing::warn!(error = %err, username = %form.username, "registration failed");
            Ok(render_login(&state.tera, Some(registration_failure(&err)))?.into_response())
        }
    }
}

fn session_cookie(token: String) -> Cookie<'static> {
    let lifetime = Duration::hours(SESSION_LIFETIME_HOURS);
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .max_age(lifetime)
        .expires(OffsetDateTime::now_utc() + lifetime)
        .build()
}

#[axum::debug_handler]
pub async fn login(
    cookies: Cookies,
    State(state): State<Arc<AppState>>,
    Form(form): Form<Credentials>,
) -> Result<Response, AppError> {
    let user = match state.user_repo.select_user_by_name(&form.username).await {
        Ok(user) => Some(user),
        Err(StoreError::NotFound) => None,
        Err(err) => {
            tracing::error!(error = %err, "user lookup failed");
            return Ok(render_login(&state.tera, Some("Login failed, please try again"))?
                .into_response());
        }
    };

    let verified = match &user {
        Some(user) => credential::verify_password(&form.password, &user.password_hash).await,
        None => credential::verify_decoy(&form.password, state.bcrypt_cost).await,
    };
    let Some(user) = user.filter(|_| verified) else {
        tracing::debug!(username = %form.username, "invalid credentials");
        return Ok(render_login(&state.tera, Some("Invalid credentials"))?.into_response());
    };

    let token = credential::generate_session_token(SESSION_TOKEN_BYTES);
    if let Err(err) = state.user_repo.update_session_token(&user.name, &token).await {
        tracing::error!(error = %err, user_id = user.id, "failed to store session token");
        return Ok(render_login(&state.tera, Some("Failed to update session token"))?
            .into_response());
    }

    cookies.add(session_cookie(token));
    tracing::info!(user_id = user.id, "user logged in");

    Ok(Redirect::to("/chat").into_response())
}

#[axum::debug_handler]
pub async fn logout(
    cookies: Cookies,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<Option<User>>,
) -> Result<Redirect, AppError> {
    if let Some(user) = current_user {
        state.user_repo.update_session_token(&user.name, "").await?;
        tracing::info!(user_id = user.id, "user logged out");
    }

    let mut cookie = Cookie::build((SESSION_COOKIE, "")).path("/").http_only(true).build();
    cookie.make_removal();
    cookies.add(cookie);

    Ok(Redirect::to("/"))
}

/// The logged-in user; hash and token are never serialized.
pub async fn current_user(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}
