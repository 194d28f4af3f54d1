use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_cookies::Cookies;

use std::sync::Arc;

use crate::{
    data::model::User,
    router::AppError,
    session::{AuthError, SessionError},
    AppState,
};

pub const SESSION_COOKIE: &str = "session_token";

fn session_token(cookies: &Cookies) -> Option<String> {
    cookies
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_owned())
}

/// Resolves the session cookie and stores the result in the request as
/// `Option<User>`. Anonymous requests pass through.
pub async fn extract_user(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    mut req: Request,
    next: Next,
) -> Response {
    let token = session_token(&cookies);

    match state.sessions.resolve(token.as_deref()).await {
        Ok(current_user) => {
            req.extensions_mut().insert(Some(current_user));
        }
        Err(SessionError::Auth(reason)) => {
            tracing::trace!(%reason, "anonymous request");
            req.extensions_mut().insert(None::<User>);
        }
        Err(err) => return AppError::from(err).into_response(),
    }

    next.run(req).await
}

/// Rejects anonymous requests. Handlers behind it extract `Extension<User>`.
pub async fn auth(cookies: Cookies, mut req: Request, next: Next) -> Response {
    let current_user = req.extensions().get::<Option<User>>().cloned().flatten();

    match current_user {
        Some(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        None => {
            let reason = match session_token(&cookies) {
                Some(token) if !token.is_empty() => AuthError::NotFound,
                _ => AuthError::NoToken,
            };
            AppError::from(reason).into_response()
        }
    }
}
