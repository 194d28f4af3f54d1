use chrono::Utc;
use sqlx::{sqlite::SqlitePool, Executor, FromRow, QueryBuilder, Sqlite};
use uuid::Uuid;

use super::error::StoreError;
use super::model::{
    format_timestamp, parse_timestamp, Chat, ChatUpdate, Message, MessageUpdate, NewChat,
    NewMessage, NewUser, User,
};

#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, password_hash)
            VALUES (?, ?) RETURNING id, name, password_hash, session_token;
            "#,
        )
        .bind(&user.name)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn select_user_by_name(&self, name: &str) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, password_hash, session_token FROM users WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn select_user_by_session_token(&self, token: &str) -> Result<User, StoreError> {
        // a cleared token is NULL, never the empty string
        if token.is_empty() {
            return Err(StoreError::NotFound);
        }

        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, password_hash, session_token FROM users WHERE session_token = ?",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    /// Sets the user's session token. An empty token logs the user out.
    pub async fn update_session_token(&self, name: &str, token: &str) -> Result<(), StoreError> {
        let token = (!token.is_empty()).then_some(token);

        let result = sqlx::query("UPDATE users SET session_token = ? WHERE name = ?")
            .bind(token)
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[derive(FromRow)]
struct ChatRow {
    id: String,
    user_id: i64,
    name: String,
    created_at: String,
}

impl ChatRow {
    fn into_chat(self) -> Result<Chat, StoreError> {
        let created_at = parse_timestamp(&self.created_at)
            .map_err(|e| StoreError::Corrupt(format!("chat {}: invalid created_at: {e}", self.id)))?;

        Ok(Chat {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            created_at,
        })
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: i64,
    chat_id: String,
    content: String,
    role: String,
    created_at: String,
}

impl MessageRow {
    fn into_message(self) -> Result<Message, StoreError> {
        let role = self
            .role
            .parse()
            .map_err(|e: String| StoreError::Corrupt(format!("message {}: {e}", self.id)))?;
        let created_at = parse_timestamp(&self.created_at).map_err(|e| {
            StoreError::Corrupt(format!("message {}: invalid created_at: {e}", self.id))
        })?;

        Ok(Message {
            id: self.id,
            chat_id: self.chat_id,
            content: self.content,
            role,
            created_at,
        })
    }
}

async fn insert_chat_row<'e, E>(
    executor: E,
    user_id: i64,
    chat: &NewChat,
) -> Result<Chat, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id = chat
        .id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let row = sqlx::query_as::<_, ChatRow>(
        r#"
        INSERT INTO chats (id, user_id, name, created_at)
        VALUES (?, ?, ?, ?) RETURNING id, user_id, name, created_at;
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(chat.name.clone())
    .bind(format_timestamp(Utc::now()))
    .fetch_one(executor)
    .await?;

    row.into_chat()
}

async fn insert_message_row<'e, E>(
    executor: E,
    chat_id: &str,
    message: &NewMessage,
) -> Result<Message, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, MessageRow>(
        r#"
        INSERT INTO messages (chat_id, content, role, created_at)
        VALUES (?, ?, ?, ?) RETURNING id, chat_id, content, role, created_at;
        "#,
    )
    .bind(chat_id.to_string())
    .bind(message.content.clone())
    .bind(message.role.as_str())
    .bind(format_timestamp(Utc::now()))
    .fetch_one(executor)
    .await?;

    row.into_message()
}

/// Chats and the messages they own.
#[derive(Clone)]
pub struct ChatRepository {
    pool: SqlitePool,
}

impl ChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_chat(&self, user_id: i64, chat: &NewChat) -> Result<Chat, StoreError> {
        insert_chat_row(&self.pool, user_id, chat).await
    }

    /// Creates a chat together with its first message; neither exists if either insert fails.
    pub async fn create_chat_with_message(
        &self,
        user_id: i64,
        chat: &NewChat,
        message: &NewMessage,
    ) -> Result<(Chat, Message), StoreError> {
        let mut tx = self.pool.begin().await?;

        let chat = insert_chat_row(&mut *tx, user_id, chat).await?;
        let message = insert_message_row(&mut *tx, &chat.id, message).await?;

        tx.commit().await?;

        Ok((chat, message))
    }

    pub async fn select_chat_by_id(&self, id: &str) -> Result<Chat, StoreError> {
        sqlx::query_as::<_, ChatRow>("SELECT id, user_id, name, created_at FROM chats WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?
            .into_chat()
    }

    pub async fn select_chats_by_user_id(&self, user_id: i64) -> Result<Vec<Chat>, StoreError> {
        sqlx::query_as::<_, ChatRow>(
            "SELECT id, user_id, name, created_at FROM chats WHERE user_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ChatRow::into_chat)
        .collect()
    }

    /// Writes only the fields present in `update` and returns the chat as stored afterwards.
    pub async fn update_chat_by_id(&self, id: &str, update: &ChatUpdate) -> Result<Chat, StoreError> {
        if !update.is_empty() {
            let mut builder = QueryBuilder::<Sqlite>::new("UPDATE chats SET ");
            let mut fields = builder.separated(", ");
            if let Some(name) = update.name() {
                fields.push("name = ").push_bind_unseparated(name.to_string());
            }
            if let Some(created_at) = update.created_at {
                fields
                    .push("created_at = ")
                    .push_bind_unseparated(format_timestamp(created_at));
            }
            builder.push(" WHERE id = ").push_bind(id.to_string());

            let result = builder.build().execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
        }

        self.select_chat_by_id(id).await
    }

    /// Deletes the chat and all of its messages.
    pub async fn delete_chat_by_id(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE chat_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_message(
        &self,
        chat_id: &str,
        message: &NewMessage,
    ) -> Result<Message, StoreError> {
        insert_message_row(&self.pool, chat_id, message).await
    }

    pub async fn select_message_by_id(&self, id: i64) -> Result<Message, StoreError> {
        sqlx::query_as::<_, MessageRow>(
            "SELECT id, chat_id, content, role, created_at FROM messages WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?
        .into_message()
    }

    pub async fn select_messages_by_chat_id(&self, chat_id: &str) -> Result<Vec<Message>, StoreError> {
        sqlx::query_as::<_, MessageRow>(
            "SELECT id, chat_id, content, role, created_at FROM messages WHERE chat_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(MessageRow::into_message)
        .collect()
    }

    pub async fn update_message_by_id(
        &self,
        id: i64,
        update: &MessageUpdate,
    ) -> Result<Message, StoreError> {
        if !update.is_empty() {
            let mut builder = QueryBuilder::<Sqlite>::new("UPDATE messages SET ");
            let mut fields = builder.separated(", ");
            if let Some(content) = update.content() {
                fields.push("content = ").push_bind_unseparated(content.to_string());
            }
            if let Some(role) = update.role {
                fields.push("role = ").push_bind_unseparated(role.as_str());
            }
            builder.push(" WHERE id = ").push_bind(id);

            let result = builder.build().execute(&self.pool).await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
        }

        self.select_message_by_id(id).await
    }

    pub async fn delete_message_by_id(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::data::{memory_pool, model::Role};

    async fn setup() -> (UserRepository, ChatRepository, User) {
        let pool = memory_pool().await;
        let users = UserRepository::new(pool.clone());
        let chats = ChatRepository::new(pool);
        let user = users.insert_user(&new_user("alice1234")).await.unwrap();
        (users, chats, user)
    }

    fn new_user(name: &str) -> NewUser {
        NewUser {
            name: name.to_string(),
            password_hash: format!("hash-of-{name}"),
        }
    }

    fn named(name: &str) -> NewChat {
        NewChat {
            id: None,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_user_name_is_a_constraint_error() {
        let (users, _, _) = setup().await;

        let err = users.insert_user(&new_user("alice1234")).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_select_user_by_name() {
        let (users, _, alice) = setup().await;

        assert_eq!(users.select_user_by_name("alice1234").await.unwrap(), alice);
        assert!(matches!(
            users.select_user_by_name("nobody123").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_session_token_lifecycle() {
        let (users, _, alice) = setup().await;

        users.update_session_token(&alice.name, "token-a").await.unwrap();
        let found = users.select_user_by_session_token("token-a").await.unwrap();
        assert_eq!(found.id, alice.id);
        assert_eq!(found.session_token.as_deref(), Some("token-a"));

        // idempotent
        users.update_session_token(&alice.name, "token-a").await.unwrap();

        users.update_session_token(&alice.name, "").await.unwrap();
        assert!(matches!(
            users.select_user_by_session_token("token-a").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            users.select_user_by_session_token("").await,
            Err(StoreError::NotFound)
        ));
        let cleared = users.select_user_by_name(&alice.name).await.unwrap();
        assert_eq!(cleared.session_token, None);
    }

    #[tokio::test]
    async fn test_many_users_may_be_logged_out_at_once() {
        let (users, _, alice) = setup().await;
        let bob = users.insert_user(&new_user("bob12345")).await.unwrap();

        users.update_session_token(&alice.name, "").await.unwrap();
        users.update_session_token(&bob.name, "").await.unwrap();
    }

    #[tokio::test]
    async fn test_session_tokens_are_unique() {
        let (users, _, alice) = setup().await;
        let bob = users.insert_user(&new_user("bob12345")).await.unwrap();

        users.update_session_token(&alice.name, "shared").await.unwrap();
        let err = users.update_session_token(&bob.name, "shared").await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_update_session_token_of_unknown_user() {
        let (users, _, _) = setup().await;

        assert!(matches!(
            users.update_session_token("nobody123", "token").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_insert_chat_generates_id() {
        let (_, chats, alice) = setup().await;

        let chat = chats.insert_chat(alice.id, &named("first")).await.unwrap();
        assert!(Uuid::parse_str(&chat.id).is_ok());
        assert_eq!(chat.user_id, alice.id);
        assert_eq!(chats.select_chat_by_id(&chat.id).await.unwrap(), chat);
    }

    #[tokio::test]
    async fn test_insert_chat_with_caller_id() {
        let (_, chats, alice) = setup().await;
        let new_chat = NewChat {
            id: Some("chat-1".to_string()),
            name: "first".to_string(),
        };

        let chat = chats.insert_chat(alice.id, &new_chat).await.unwrap();
        assert_eq!(chat.id, "chat-1");

        let err = chats.insert_chat(alice.id, &new_chat).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_insert_chat_for_unknown_user() {
        let (_, chats, _) = setup().await;

        let err = chats.insert_chat(9999, &named("orphan")).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_chats_by_user_are_scoped_and_ordered() {
        let (users, chats, alice) = setup().await;
        let bob = users.insert_user(&new_user("bob12345")).await.unwrap();

        assert!(chats.select_chats_by_user_id(alice.id).await.unwrap().is_empty());

        let first = chats.insert_chat(alice.id, &named("first")).await.unwrap();
        chats.insert_chat(bob.id, &named("bobs")).await.unwrap();
        let second = chats.insert_chat(alice.id, &named("second")).await.unwrap();

        let listed = chats.select_chats_by_user_id(alice.id).await.unwrap();
        assert_eq!(listed, vec![first, second]);
    }

    #[tokio::test]
    async fn test_chats_are_ordered_by_created_at() {
        let (_, chats, alice) = setup().await;
        let late = chats.insert_chat(alice.id, &named("late")).await.unwrap();
        let early = chats.insert_chat(alice.id, &named("early")).await.unwrap();

        let backdate = ChatUpdate {
            name: None,
            created_at: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
        };
        chats.update_chat_by_id(&early.id, &backdate).await.unwrap();

        let names: Vec<String> = chats
            .select_chats_by_user_id(alice.id)
            .await
            .unwrap()
            .into_iter()
            .map(|chat| chat.name)
            .collect();
        assert_eq!(names, ["early", "late"]);
        assert_ne!(late.id, early.id);
    }

    #[tokio::test]
    async fn test_update_chat_writes_only_present_fields() {
        let (_, chats, alice) = setup().await;
        let chat = chats.insert_chat(alice.id, &named("first")).await.unwrap();

        let renamed = chats
            .update_chat_by_id(
                &chat.id,
                &ChatUpdate {
                    name: Some("renamed".to_string()),
                    created_at: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "renamed");
        assert_eq!(renamed.created_at, chat.created_at);

        let untouched = chats
            .update_chat_by_id(
                &chat.id,
                &ChatUpdate {
                    name: Some(String::new()),
                    created_at: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(untouched, renamed);
    }

    #[tokio::test]
    async fn test_update_missing_chat() {
        let (_, chats, _) = setup().await;

        let rename = ChatUpdate {
            name: Some("x".to_string()),
            created_at: None,
        };
        assert!(matches!(
            chats.update_chat_by_id("missing", &rename).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            chats.update_chat_by_id("missing", &ChatUpdate::default()).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_chat_removes_its_messages() {
        let (_, chats, alice) = setup().await;
        let (chat, message) = chats
            .create_chat_with_message(alice.id, &named("first"), &NewMessage::user("hi"))
            .await
            .unwrap();

        chats.delete_chat_by_id(&chat.id).await.unwrap();

        assert!(matches!(
            chats.select_chat_by_id(&chat.id).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            chats.select_message_by_id(message.id).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            chats.delete_chat_by_id(&chat.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_create_chat_with_message_is_atomic() {
        let pool = memory_pool().await;
        let users = UserRepository::new(pool.clone());
        let chats = ChatRepository::new(pool.clone());
        let alice = users.insert_user(&new_user("alice1234")).await.unwrap();

        // the second insert of the transaction can no longer succeed
        sqlx::query("DROP TABLE messages").execute(&pool).await.unwrap();

        let result = chats
            .create_chat_with_message(alice.id, &named("first"), &NewMessage::user("hi"))
            .await;
        assert!(result.is_err());
        assert!(chats.select_chats_by_user_id(alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_round_trip() {
        let (_, chats, alice) = setup().await;
        let chat = chats.insert_chat(alice.id, &named("first")).await.unwrap();

        let inserted = chats
            .insert_message(&chat.id, &NewMessage::assistant("hello **there**"))
            .await
            .unwrap();
        let selected = chats.select_message_by_id(inserted.id).await.unwrap();

        assert_eq!(selected, inserted);
        assert_eq!(selected.chat_id, chat.id);
        assert_eq!(selected.role, Role::Assistant);
        assert_eq!(selected.content, "hello **there**");
    }

    #[tokio::test]
    async fn test_message_for_unknown_chat() {
        let (_, chats, _) = setup().await;

        let err = chats
            .insert_message("missing", &NewMessage::user("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_messages_are_ordered_by_creation() {
        let (_, chats, alice) = setup().await;
        let chat = chats.insert_chat(alice.id, &named("first")).await.unwrap();
        let other = chats.insert_chat(alice.id, &named("other")).await.unwrap();

        for content in ["one", "two", "three"] {
            chats
                .insert_message(&chat.id, &NewMessage::user(content))
                .await
                .unwrap();
        }
        chats
            .insert_message(&other.id, &NewMessage::user("elsewhere"))
            .await
            .unwrap();

        let contents: Vec<String> = chats
            .select_messages_by_chat_id(&chat.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_update_and_delete_message() {
        let (_, chats, alice) = setup().await;
        let chat = chats.insert_chat(alice.id, &named("first")).await.unwrap();
        let message = chats
            .insert_message(&chat.id, &NewMessage::user("draft"))
            .await
            .unwrap();

        let edited = chats
            .update_message_by_id(
                message.id,
                &MessageUpdate {
                    content: Some("final".to_string()),
                    role: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.content, "final");
        assert_eq!(edited.role, Role::User);
        assert_eq!(edited.created_at, message.created_at);

        chats.delete_message_by_id(message.id).await.unwrap();
        assert!(matches!(
            chats.delete_message_by_id(message.id).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            chats
                .update_message_by_id(message.id, &MessageUpdate::default())
                .await,
            Err(StoreError::NotFound)
        ));
    }
}
