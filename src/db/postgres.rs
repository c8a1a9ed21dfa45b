use super::update_offsets::UpdateOffset;
use super::user_mappings::{NewUserMapping, UserMapping};
use crate::db::{Connection, ConnectionManager, ManagedConnection};
use anyhow::Context as _;
use anyhow::Result;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::sync::OnceCell;
use tracing as log;

pub struct Postgres(String, OnceCell<()>);

impl Postgres {
    pub fn new(url: String) -> Self {
        Postgres(url, OnceCell::new())
    }
}

/// Connects to `db_url`, using TLS when the URL asks for it with `sslmode`.
pub async fn make_client(db_url: &str) -> Result<tokio_postgres::Client> {
    let wants_tls = ["sslmode=require", "sslmode=verify-ca", "sslmode=verify-full"]
        .iter()
        .any(|mode| db_url.contains(mode));
    if wants_tls {
        let connector = TlsConnector::builder()
            .build()
            .context("built TlsConnector")?;
        let connector = MakeTlsConnector::new(connector);

        let (db_client, connection) = match tokio_postgres::connect(db_url, connector).await {
            Ok(v) => v,
            Err(e) => {
                anyhow::bail!("failed to connect to DB: {}", e);
            }
        };
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::error!("database connection error: {}", e);
            }
        });

        Ok(db_client)
    } else {
        log::warn!("non-TLS connection to the database");
        let (db_client, connection) =
            match tokio_postgres::connect(db_url, tokio_postgres::NoTls).await {
                Ok(v) => v,
                Err(e) => {
                    anyhow::bail!("failed to connect to DB: {}", e);
                }
            };
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::error!("database connection error: {}", e);
            }
        });

        Ok(db_client)
    }
}

static MIGRATIONS: &[&str] = &[
    "
CREATE TABLE update_offsets (
    id BIGSERIAL PRIMARY KEY,
    update_id BIGINT NOT NULL,
    inserted_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now()
);
",
    "
CREATE TABLE user_mappings (
    id BIGSERIAL PRIMARY KEY,
    telegram_username TEXT NOT NULL,
    telegram_chat_id BIGINT NOT NULL,
    telegram_first_name TEXT,
    telegram_last_name TEXT,
    gitlab_username TEXT NOT NULL,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now()
);
CREATE INDEX user_mappings_telegram_username_idx ON user_mappings (lower(telegram_username));
CREATE INDEX user_mappings_gitlab_username_idx ON user_mappings (lower(gitlab_username));
",
];

pub async fn run_migrations(client: &mut tokio_postgres::Client) -> Result<()> {
    client
        .execute(
            "CREATE TABLE IF NOT EXISTS database_versions (
                zero INTEGER PRIMARY KEY,
                migration_counter INTEGER
            );",
            &[],
        )
        .await
        .context("creating database versioning table")?;

    client
        .execute(
            "INSERT INTO database_versions (zero, migration_counter)
                VALUES (0, 0)
                ON CONFLICT DO NOTHING",
            &[],
        )
        .await
        .context("inserting initial database_versions")?;

    let migration_idx: i32 = client
        .query_one("SELECT migration_counter FROM database_versions", &[])
        .await
        .context("getting migration counter")?
        .get(0);
    let migration_idx = migration_idx as usize;

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        if idx >= migration_idx {
            let tx = client
                .transaction()
                .await
                .context("Cannot create migration transaction")?;
            tx.batch_execute(migration)
                .await
                .with_context(|| format!("executing {}th migration", idx))?;
            tx.execute(
                "UPDATE database_versions SET migration_counter = $1",
                &[&(idx as i32 + 1)],
            )
            .await
            .with_context(|| format!("updating migration counter to {}", idx))?;
            tx.commit()
                .await
                .context("Cannot commit migration transaction")?;
        }
    }

    Ok(())
}

#[async_trait::async_trait]
impl ConnectionManager for Postgres {
    type Connection = tokio_postgres::Client;

    async fn open(&self) -> Result<Self::Connection> {
        let mut client = make_client(&self.0).await?;
        self.1
            .get_or_try_init(|| async { run_migrations(&mut client).await })
            .await?;
        Ok(client)
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> bool {
        !conn.is_closed()
    }
}

#[async_trait::async_trait]
impl Connection for ManagedConnection<tokio_postgres::Client> {
    async fn latest_update_offset(&mut self) -> Result<Option<UpdateOffset>> {
        let row = self
            .query_opt(
                "SELECT id, update_id, inserted_at FROM update_offsets
                ORDER BY id DESC
                LIMIT 1",
                &[],
            )
            .await
            .context("Getting latest update offset")?;
        Ok(row.map(UpdateOffset::from))
    }

    async fn record_update_offset(&mut self, update_id: i64) -> Result<UpdateOffset> {
        log::trace!("record_update_offset(update_id={})", update_id);

        let row = self
            .query_one(
                "INSERT INTO update_offsets (update_id) VALUES ($1)
                RETURNING id, update_id, inserted_at",
                &[&update_id],
            )
            .await
            .context("Inserting update offset")?;
        Ok(row.into())
    }

    async fn replace_user_mapping(&mut self, mapping: &NewUserMapping) -> Result<UserMapping> {
        log::trace!(
            "replace_user_mapping(telegram_username={}, gitlab_username={})",
            mapping.telegram_username,
            mapping.gitlab_username
        );

        let tx = self
            .transaction()
            .await
            .context("Starting mapping transaction")?;
        tx.execute(
            "DELETE FROM user_mappings WHERE lower(telegram_username) = lower($1)",
            &[&mapping.telegram_username],
        )
        .await
        .context("Deleting previous mappings")?;
        let row = tx
            .query_one(
                "INSERT INTO user_mappings (telegram_username, telegram_chat_id,
                    telegram_first_name, telegram_last_name, gitlab_username)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *",
                &[
                    &mapping.telegram_username,
                    &mapping.telegram_chat_id,
                    &mapping.telegram_first_name,
                    &mapping.telegram_last_name,
                    &mapping.gitlab_username,
                ],
            )
            .await
            .context("Inserting mapping")?;
        tx.commit().await.context("Committing mapping")?;

        Ok(row.into())
    }

    async fn get_user_mappings_by_telegram_username(
        &mut self,
        telegram_username: &str,
    ) -> Result<Vec<UserMapping>> {
        let rows = self
            .query(
                "SELECT * FROM user_mappings
                WHERE lower(telegram_username) = lower($1)
                ORDER BY id",
                &[&telegram_username],
            )
            .await
            .context("Getting mappings by telegram username")?;
        Ok(rows.into_iter().map(UserMapping::from).collect())
    }

    async fn get_user_mappings_by_gitlab_username(
        &mut self,
        gitlab_username: &str,
    ) -> Result<Vec<UserMapping>> {
        let rows = self
            .query(
                "SELECT * FROM user_mappings
                WHERE lower(gitlab_username) = lower($1)
                ORDER BY id",
                &[&gitlab_username],
            )
            .await
            .context("Getting mappings by gitlab username")?;
        Ok(rows.into_iter().map(UserMapping::from).collect())
    }
}
