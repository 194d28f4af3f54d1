use thiserror::Error;

use crate::data::{error::StoreError, model::User, repository::UserRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no session token")]
    NoToken,

    #[error("session token matches no user")]
    NotFound,

    /// The record exists but belongs to someone else.
    #[error("forbidden")]
    Forbidden,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct SessionResolver {
    users: UserRepository,
}

impl SessionResolver {
    pub fn new(users: UserRepository) -> Self {
        Self { users }
    }

    /// Read-only: a missing or empty cookie is `NoToken`, an unknown token is `NotFound`.
    pub async fn resolve(&self, cookie: Option<&str>) -> Result<User, SessionError> {
        let token = cookie
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::NoToken)?;

        match self.users.select_user_by_session_token(token).await {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound) => Err(AuthError::NotFound.into()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{memory_pool, model::NewUser};

    async fn setup() -> (UserRepository, SessionResolver) {
        let users = UserRepository::new(memory_pool().await);
        users
            .insert_user(&NewUser {
                name: "alice1234".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();
        users.update_session_token("alice1234", "live-token").await.unwrap();
        let resolver = SessionResolver::new(users.clone());
        (users, resolver)
    }

    fn auth_error(result: Result<User, SessionError>) -> AuthError {
        match result {
            Err(SessionError::Auth(err)) => err,
            other => panic!("expected an auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolves_live_token() {
        let (_, resolver) = setup().await;

        let user = resolver.resolve(Some("live-token")).await.unwrap();
        assert_eq!(user.name, "alice1234");
    }

    #[tokio::test]
    async fn test_missing_or_empty_cookie_is_no_token() {
        let (_, resolver) = setup().await;

        assert_eq!(auth_error(resolver.resolve(None).await), AuthError::NoToken);
        assert_eq!(auth_error(resolver.resolve(Some("")).await), AuthError::NoToken);
    }

    #[tokio::test]
    async fn test_unknown_token_is_not_found() {
        let (_, resolver) = setup().await;

        assert_eq!(
            auth_error(resolver.resolve(Some("forged")).await),
            AuthError::NotFound
        );
    }

    #[tokio::test]
    async fn test_token_is_dead_after_logout() {
        let (users, resolver) = setup().await;

        users.update_session_token("alice1234", "").await.unwrap();
        assert_eq!(
            auth_error(resolver.resolve(Some("live-token")).await),
            AuthError::NotFound
        );
    }

    #[tokio::test]
    async fn test_storage_failure_is_not_an_auth_error() {
        let pool = memory_pool().await;
        let resolver = SessionResolver::new(UserRepository::new(pool.clone()));
        pool.close().await;

        assert!(matches!(
            resolver.resolve(Some("live-token")).await,
            Err(SessionError::Store(_))
        ));
    }
}
