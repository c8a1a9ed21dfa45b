use self::update_offsets::UpdateOffset;
use self::user_mappings::{NewUserMapping, UserMapping};
use anyhow::{Context as _, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub mod postgres;
pub mod sqlite;
pub mod update_offsets;
pub mod user_mappings;

const POOL_SIZE: usize = 16;

#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    // Update offsets
    async fn latest_update_offset(&mut self) -> Result<Option<UpdateOffset>>;
    async fn record_update_offset(&mut self, update_id: i64) -> Result<UpdateOffset>;

    // User mappings
    /// Replaces every mapping of `mapping.telegram_username` with `mapping`,
    /// atomically. The username is compared case-insensitively.
    async fn replace_user_mapping(&mut self, mapping: &NewUserMapping) -> Result<UserMapping>;
    async fn get_user_mappings_by_telegram_username(
        &mut self,
        telegram_username: &str,
    ) -> Result<Vec<UserMapping>>;
    async fn get_user_mappings_by_gitlab_username(
        &mut self,
        gitlab_username: &str,
    ) -> Result<Vec<UserMapping>>;
}

#[async_trait::async_trait]
pub trait ConnectionManager {
    type Connection;
    async fn open(&self) -> Result<Self::Connection>;
    async fn is_valid(&self, c: &mut Self::Connection) -> bool;
}

pub struct ConnectionPool<M: ConnectionManager> {
    connections: Arc<Mutex<Vec<M::Connection>>>,
    permits: Arc<Semaphore>,
    manager: Arc<M>,
}

impl<M: ConnectionManager> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        ConnectionPool {
            connections: self.connections.clone(),
            permits: self.permits.clone(),
            manager: self.manager.clone(),
        }
    }
}

pub struct ManagedConnection<T> {
    conn: Option<T>,
    connections: Arc<Mutex<Vec<T>>>,
    #[allow(unused)]
    permit: OwnedSemaphorePermit,
}

impl<T> std::ops::Deref for ManagedConnection<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection is only taken on drop")
    }
}
impl<T> std::ops::DerefMut for ManagedConnection<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection is only taken on drop")
    }
}

impl<T> Drop for ManagedConnection<T> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.connections
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(conn);
        }
    }
}

impl<T, M> ConnectionPool<M>
where
    T: Send,
    M: ConnectionManager<Connection = T>,
{
    fn new(manager: M) -> Self {
        ConnectionPool {
            connections: Arc::new(Mutex::new(Vec::with_capacity(POOL_SIZE))),
            permits: Arc::new(Semaphore::new(POOL_SIZE)),
            manager: Arc::new(manager),
        }
    }

    #[cfg(test)]
    fn in_use(&self) -> usize {
        POOL_SIZE - self.permits.available_permits()
    }

    async fn get(&self) -> Result<ManagedConnection<T>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .context("connection pool is closed")?;
        let conn = {
            let mut slots = self.connections.lock().unwrap_or_else(|e| e.into_inner());
            slots.pop()
        };
        if let Some(mut c) = conn {
            if self.manager.is_valid(&mut c).await {
                return Ok(ManagedConnection {
                    conn: Some(c),
                    permit,
                    connections: self.connections.clone(),
                });
            }
        }

        let conn = self.manager.open().await?;
        Ok(ManagedConnection {
            conn: Some(conn),
            connections: self.connections.clone(),
            permit,
        })
    }
}

/// A handle on the connection pool. Clones share the same connections.
#[derive(Clone)]
pub enum Pool {
    Sqlite(ConnectionPool<sqlite::Sqlite>),
    Postgres(ConnectionPool<postgres::Postgres>),
}

impl Pool {
    pub async fn connection(&self) -> Result<Box<dyn Connection>> {
        let conn: Box<dyn Connection> = match self {
            Pool::Sqlite(p) => Box::new(sqlite::SqliteConnection::new(p.get().await?)),
            Pool::Postgres(p) => Box::new(p.get().await?),
        };
        Ok(conn)
    }

    /// How many connections are checked out right now.
    #[cfg(test)]
    pub(crate) fn connections_in_use(&self) -> usize {
        match self {
            Pool::Sqlite(p) => p.in_use(),
            Pool::Postgres(p) => p.in_use(),
        }
    }

    /// Opens a pool for `uri`, which is either a `postgres://` URL or the
    /// path of a SQLite database file.
    ///
    /// Nothing is connected until the first call to [`Pool::connection`].
    /// The schema is migrated by the first connection opened.
    pub fn open(uri: &str) -> Pool {
        if uri.starts_with("postgres") {
            Pool::Postgres(ConnectionPool::new(postgres::Postgres::new(uri.into())))
        } else {
            let path = uri.strip_prefix("sqlite://").unwrap_or(uri);
            Pool::Sqlite(ConnectionPool::new(sqlite::Sqlite::new(path.into())))
        }
    }
}
