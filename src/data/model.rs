use std::{fmt, str::FromStr};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Minimum length, in characters, of both username and password.
pub const MIN_CREDENTIAL_CHARS: usize = 8;
/// bcrypt only looks at the first 72 bytes of a password.
pub const MAX_PASSWORD_BYTES: usize = 72;
/// Chats created implicitly from a first message are named after its opening characters.
const GENERATED_CHAT_NAME_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chat {
    pub id: String,
    pub user_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Body of a chat creation request. The id is optional; the store generates one when absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewChat {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
}

impl NewChat {
    /// A chat named after the message that opens it.
    pub fn titled(first_message: &str) -> Self {
        let name: String = first_message
            .trim()
            .chars()
            .take(GENERATED_CHAT_NAME_CHARS)
            .collect();
        Self { id: None, name }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Chat name must not be empty".to_string());
        }
        if self.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err("Chat id must not be blank".to_string());
        }
        Ok(())
    }
}

/// Partial update of a chat. Absent or blank fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatUpdate {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.name().is_none() && self.created_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown message role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: String,
    pub content: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub content: String,
    pub role: Role,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: Role::User,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: Role::Assistant,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.content.trim().is_empty() {
            return Err("Message content must not be empty".to_string());
        }
        Ok(())
    }
}

/// Partial update of a message. Absent or blank fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageUpdate {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

impl MessageUpdate {
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref().filter(|content| !content.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.content().is_none() && self.role.is_none()
    }
}

pub fn validate_credentials(name: &str, password: &str) -> Result<(), String> {
    if name.chars().count() < MIN_CREDENTIAL_CHARS
        || password.chars().count() < MIN_CREDENTIAL_CHARS
    {
        return Err(format!(
            "Username and password must be at least {MIN_CREDENTIAL_CHARS} characters long"
        ));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(format!(
            "Password must be at most {MAX_PASSWORD_BYTES} bytes long"
        ));
    }
    Ok(())
}

/// Timestamps are stored as fixed-width RFC 3339 text so that text order is time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|at| at.with_timezone(&Utc))
}
