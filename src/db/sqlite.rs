use super::update_offsets::UpdateOffset;
use super::user_mappings::{NewUserMapping, UserMapping};
use crate::db::{Connection, ConnectionManager, ManagedConnection};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::params;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::OnceCell;

pub struct Sqlite(PathBuf, OnceCell<()>);

impl Sqlite {
    pub fn new(path: PathBuf) -> Self {
        Sqlite(path, OnceCell::new())
    }
}

static MIGRATIONS: &[&str] = &[
    "",
    "
CREATE TABLE update_offsets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    update_id INTEGER NOT NULL,
    inserted_at DATETIME NOT NULL
);
",
    "
CREATE TABLE user_mappings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    telegram_username TEXT NOT NULL,
    telegram_chat_id INTEGER NOT NULL,
    telegram_first_name TEXT,
    telegram_last_name TEXT,
    gitlab_username TEXT NOT NULL,
    created_at DATETIME NOT NULL
);
CREATE INDEX user_mappings_telegram_username_idx ON user_mappings (lower(telegram_username));
CREATE INDEX user_mappings_gitlab_username_idx ON user_mappings (lower(gitlab_username));
",
];

/// Applies the migrations newer than the database's `user_version`.
fn run_migrations(conn: &mut rusqlite::Connection) -> Result<()> {
    let current: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("reading user_version")?;
    for (idx, migration) in MIGRATIONS.iter().enumerate().skip(current as usize + 1) {
        let tx = conn.transaction().context("starting migration transaction")?;
        tx.execute_batch(migration)
            .with_context(|| format!("executing migration {idx}"))?;
        tx.pragma_update(None, "user_version", idx as i32)
            .with_context(|| format!("updating user_version to {idx}"))?;
        tx.commit().context("committing migration")?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl ConnectionManager for Sqlite {
    type Connection = Mutex<rusqlite::Connection>;

    async fn open(&self) -> Result<Self::Connection> {
        if let Some(parent) = self.0.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let mut conn = rusqlite::Connection::open(&self.0)
            .with_context(|| format!("opening {}", self.0.display()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        self.1
            .get_or_try_init(|| async { run_migrations(&mut conn) })
            .await?;
        Ok(Mutex::new(conn))
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> bool {
        conn.get_mut()
            .map(|c| c.execute_batch("SELECT 1").is_ok())
            .unwrap_or(false)
    }
}

pub struct SqliteConnection {
    conn: ManagedConnection<Mutex<rusqlite::Connection>>,
}

#[async_trait::async_trait]
impl Connection for SqliteConnection {
    async fn latest_update_offset(&mut self) -> Result<Option<UpdateOffset>> {
        match self.raw().query_row(
            "SELECT id, update_id, inserted_at FROM update_offsets
            ORDER BY id DESC
            LIMIT 1",
            [],
            deserialize_update_offset,
        ) {
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
            Ok(offset) => Ok(Some(offset)),
        }
    }

    async fn record_update_offset(&mut self, update_id: i64) -> Result<UpdateOffset> {
        tracing::trace!("record_update_offset(update_id={})", update_id);

        let offset = self
            .raw()
            .query_row(
                "INSERT INTO update_offsets (update_id, inserted_at) VALUES (?, ?)
                RETURNING id, update_id, inserted_at",
                params![update_id, Utc::now()],
                deserialize_update_offset,
            )
            .context("inserting update offset")?;
        Ok(offset)
    }

    async fn replace_user_mapping(&mut self, mapping: &NewUserMapping) -> Result<UserMapping> {
        tracing::trace!(
            "replace_user_mapping(telegram_username={}, gitlab_username={})",
            mapping.telegram_username,
            mapping.gitlab_username
        );

        let t = self.raw().transaction()?;
        t.execute(
            "DELETE FROM user_mappings WHERE lower(telegram_username) = lower(?)",
            [&mapping.telegram_username],
        )
        .context("deleting previous mappings")?;
        let inserted = t
            .query_row(
                "INSERT INTO user_mappings (telegram_username, telegram_chat_id,
                    telegram_first_name, telegram_last_name, gitlab_username, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING id, telegram_username, telegram_chat_id, telegram_first_name,
                    telegram_last_name, gitlab_username, created_at",
                params![
                    mapping.telegram_username,
                    mapping.telegram_chat_id,
                    mapping.telegram_first_name,
                    mapping.telegram_last_name,
                    mapping.gitlab_username,
                    Utc::now(),
                ],
                deserialize_user_mapping,
            )
            .context("inserting mapping")?;
        t.commit()?;

        Ok(inserted)
    }

    async fn get_user_mappings_by_telegram_username(
        &mut self,
        telegram_username: &str,
    ) -> Result<Vec<UserMapping>> {
        let mappings = self
            .raw()
            .prepare(
                "SELECT id, telegram_username, telegram_chat_id, telegram_first_name,
                    telegram_last_name, gitlab_username, created_at
                FROM user_mappings
                WHERE lower(telegram_username) = lower(?)
                ORDER BY id",
            )?
            .query_map([telegram_username], deserialize_user_mapping)?
            .collect::<std::result::Result<_, rusqlite::Error>>()?;
        Ok(mappings)
    }

    async fn get_user_mappings_by_gitlab_username(
        &mut self,
        gitlab_username: &str,
    ) -> Result<Vec<UserMapping>> {
        let mappings = self
            .raw()
            .prepare(
                "SELECT id, telegram_username, telegram_chat_id, telegram_first_name,
                    telegram_last_name, gitlab_username, created_at
                FROM user_mappings
                WHERE lower(gitlab_username) = lower(?)
                ORDER BY id",
            )?
            .query_map([gitlab_username], deserialize_user_mapping)?
            .collect::<std::result::Result<_, rusqlite::Error>>()?;
        Ok(mappings)
    }
}

fn assert_sync<T: Sync>() {}

impl SqliteConnection {
    pub fn new(conn: ManagedConnection<Mutex<rusqlite::Connection>>) -> Self {
        assert_sync::<Self>();
        Self { conn }
    }

    pub fn raw(&mut self) -> &mut rusqlite::Connection {
        self.conn.get_mut().unwrap_or_else(|e| e.into_inner())
    }
}

fn deserialize_update_offset(
    row: &rusqlite::Row<'_>,
) -> std::result::Result<UpdateOffset, rusqlite::Error> {
    Ok(UpdateOffset {
        id: row.get(0)?,
        update_id: row.get(1)?,
        inserted_at: row.get(2)?,
    })
}

fn deserialize_user_mapping(
    row: &rusqlite::Row<'_>,
) -> std::result::Result<UserMapping, rusqlite::Error> {
    Ok(UserMapping {
        id: row.get(0)?,
        telegram_username: row.get(1)?,
        telegram_chat_id: row.get(2)?,
        telegram_first_name: row.get(3)?,
        telegram_last_name: row.get(4)?,
        gitlab_username: row.get(5)?,
        created_at: row.get(6)?,
    })
}
