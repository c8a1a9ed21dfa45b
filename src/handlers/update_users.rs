//! Reads the Telegram update stream and records who is who on GitLab.
//!
//! Users bind their Telegram account by sending the bot
//! `/gitlabusername <username>`. Every other message is ignored. Once a batch
//! has been handled the update offset moves past it, so Telegram stops
//! returning those updates.

use super::Context;
use crate::db::update_offsets;
use crate::db::user_mappings::NewUserMapping;
use crate::jobs::Job;
use crate::telegram::Update;
use anyhow::Context as _;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing as log;

static BIND_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/gitlabusername ([A-Za-z0-9_]+)$").unwrap());

pub struct UpdateUsers;

#[async_trait]
impl Job for UpdateUsers {
    fn name(&self) -> &'static str {
        "update_users"
    }

    async fn run(&self, ctx: &Context) -> anyhow::Result<()> {
        let summary = update_users(ctx).await?;
        if summary.updates > 0 {
            log::info!(
                "handled {} updates, {} bindings, next offset {:?}",
                summary.updates,
                summary.bindings,
                summary.next_offset
            );
        }
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Updates returned by Telegram.
    pub updates: usize,
    /// Mappings stored from bind commands.
    pub bindings: usize,
    /// The offset recorded at the end of the run, if it moved.
    pub next_offset: Option<i64>,
}

/// Returns the GitLab username claimed by `text`, if it is a bind command.
pub fn parse_bind_command(text: &str) -> Option<&str> {
    BIND_COMMAND
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn binding_from_update(update: &Update) -> Option<NewUserMapping> {
    let message = update.message.as_ref()?;
    let from = message.from.as_ref().filter(|from| !from.is_bot)?;
    let gitlab_username = parse_bind_command(message.text.as_deref()?)?;
    let Some(telegram_username) = &from.username else {
        log::info!(
            "ignoring /gitlabusername from user {} without a Telegram username",
            from.id
        );
        return None;
    };
    Some(NewUserMapping {
        telegram_username: telegram_username.clone(),
        telegram_chat_id: message.chat.id,
        telegram_first_name: Some(from.first_name.clone()).filter(|n| !n.is_empty()),
        telegram_last_name: from.last_name.clone(),
        gitlab_username: gitlab_username.to_string(),
    })
}

/// Handles every update received since the stored offset.
pub async fn update_users(ctx: &Context) -> anyhow::Result<IngestSummary> {
    let offset = {
        let mut db = ctx.db.connection().await?;
        update_offsets::current_offset(&mut *db).await?
    };
    let updates = ctx
        .telegram
        .get_updates(offset)
        .await
        .context("fetching Telegram updates")?;

    let Some(last_update_id) = updates.iter().map(|u| u.update_id).max() else {
        log::trace!("no new updates since {:?}", offset);
        return Ok(IngestSummary::default());
    };

    let mut bindings = 0;
    for mapping in updates.iter().filter_map(binding_from_update) {
        let stored = {
            let mut db = ctx.db.connection().await?;
            db.replace_user_mapping(&mapping).await.with_context(|| {
                format!(
                    "storing the GitLab username of {}",
                    mapping.telegram_username
                )
            })?
        };
        bindings += 1;
        log::info!(
            "{} is now {} on GitLab",
            stored.telegram_username,
            stored.gitlab_username
        );

        let reply = format!(
            "{}, you will be notified about merge requests assigned to {} on GitLab.",
            stored.display_name(),
            stored.gitlab_username
        );
        if let Err(e) = ctx
            .telegram
            .send_message(stored.telegram_chat_id, &reply)
            .await
        {
            log::warn!(
                "failed to confirm the binding of {}: {:?}",
                stored.telegram_username,
                e
            );
        }
    }

    let mut db = ctx.db.connection().await?;
    let next_offset = update_offsets::advance(&mut *db, last_update_id).await?;
    Ok(IngestSummary {
        updates: updates.len(),
        bindings,
        next_offset,
    })
}
