//! The `user_mappings` table links a Telegram account to the GitLab username
//! its owner claimed with `/gitlabusername`.
//!
//! A Telegram username has at most one row; claiming again replaces it.
//! Several Telegram accounts may claim the same GitLab username, and all of
//! them get notified.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMapping {
    pub id: i64,
    pub telegram_username: String,
    /// The chat the bot uses to reach this user.
    pub telegram_chat_id: i64,
    pub telegram_first_name: Option<String>,
    pub telegram_last_name: Option<String>,
    pub gitlab_username: String,
    pub created_at: DateTime<Utc>,
}

/// A mapping about to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUserMapping {
    pub telegram_username: String,
    pub telegram_chat_id: i64,
    pub telegram_first_name: Option<String>,
    pub telegram_last_name: Option<String>,
    pub gitlab_username: String,
}

impl UserMapping {
    /// The name to greet the user with, falling back to the username.
    pub fn display_name(&self) -> String {
        match (&self.telegram_first_name, &self.telegram_last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.telegram_username.clone(),
        }
    }
}

impl From<tokio_postgres::row::Row> for UserMapping {
    fn from(row: tokio_postgres::row::Row) -> Self {
        Self {
            id: row.get("id"),
            telegram_username: row.get("telegram_username"),
            telegram_chat_id: row.get("telegram_chat_id"),
            telegram_first_name: row.get("telegram_first_name"),
            telegram_last_name: row.get("telegram_last_name"),
            gitlab_username: row.get("gitlab_username"),
            created_at: row.get("created_at"),
        }
    }
}
