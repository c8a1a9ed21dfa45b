//! Telegram Bot API access.
//!
//! Only the two calls the bot needs are wrapped: reading the update stream
//! and sending plain text messages.

pub mod api;
pub mod client;

pub use api::{Chat, Message, Update, User};
pub use client::TelegramClient;

/// The identifier Telegram uses to address a private chat or a group.
pub type ChatId = i64;

#[async_trait::async_trait]
pub trait TelegramApi: Send + Sync {
    /// Returns the pending updates with an id of at least `offset`.
    ///
    /// Without an offset Telegram returns the unconfirmed history.
    async fn get_updates(&self, offset: Option<i64>) -> anyhow::Result<Vec<Update>>;

    async fn send_message(&self, chat_id: ChatId, text: &str) -> anyhow::Result<Message>;
}
