//! The `update_offsets` table remembers how far the Telegram update stream
//! has been read.
//!
//! The table is append-only: every processed batch inserts a row and the
//! row with the highest id wins, whatever its `inserted_at` says. The stored
//! value is the next update id to request, i.e. one past the last update
//! that was handled.

use super::Connection;
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use tracing as log;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOffset {
    pub id: i64,
    pub update_id: i64,
    pub inserted_at: DateTime<Utc>,
}

impl From<tokio_postgres::row::Row> for UpdateOffset {
    fn from(row: tokio_postgres::row::Row) -> Self {
        Self {
            id: row.get("id"),
            update_id: row.get("update_id"),
            inserted_at: row.get("inserted_at"),
        }
    }
}

/// Returns the next update id to request, or `None` if no update was ever
/// processed.
pub async fn current_offset(conn: &mut dyn Connection) -> Result<Option<i64>> {
    Ok(conn
        .latest_update_offset()
        .await
        .context("reading the latest update offset")?
        .map(|offset| offset.update_id))
}

/// Marks every update up to and including `last_seen_update_id` as handled.
///
/// Returns the new offset, or `None` when it would not move the offset
/// forward, in which case nothing is written.
pub async fn advance(conn: &mut dyn Connection, last_seen_update_id: i64) -> Result<Option<i64>> {
    let next = last_seen_update_id
        .checked_add(1)
        .context("update id overflow")?;
    if let Some(current) = current_offset(conn).await? {
        if next <= current {
            log::warn!(
                "not moving the update offset back from {} to {}",
                current,
                next
            );
            return Ok(None);
        }
    }
    conn.record_update_offset(next)
        .await
        .with_context(|| format!("recording update offset {next}"))?;
    Ok(Some(next))
}
