//! Adapter between bb8 and the sqlx::Postgres driver.
use anyhow::{Context, Result};
use derive_builder::Builder;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use std::str::FromStr;
use std::time::Duration;

use super::sql::InsertStatement;
use crate::config::{CONNECT_TIMEOUT, PING_TIMEOUT};
use crate::io::StoreUrl;

/// Inner pool variants
#[derive(Debug, Clone)]
enum PoolInner {
    Postgres(bb8::Pool<ConnectionManager>),
    #[cfg(test)]
    Sqlite(sqlx::SqlitePool),
}

// Wrap pool implementations so that the table sink does not care which driver
// it talks to.
#[derive(Debug, Clone)]
pub struct Pool {
    inner: PoolInner,
}

#[derive(Builder)]
pub struct PoolArgs {
    url: StoreUrl,
    /// One connection per concurrently running dataset job is enough
    #[builder(default = "crate::config::MAX_WORKERS as u32")]
    max_pool_size: u32,
    #[builder(default = "0")]
    min_idle: u32,
}

pub async fn pool(args: PoolArgs) -> Result<Pool> {
    let PoolArgs {
        url,
        max_pool_size,
        min_idle,
    } = args;

    let connect_options = PgConnectOptions::from_str(url.as_str())
        .with_context(|| format!("Invalid connection options in {}", url.redacted()))?;
    let conn_manager = ConnectionManager::new(connect_options);

    let bb8_pool = bb8::Builder::new()
        .min_idle(min_idle)
        .max_size(max_pool_size.max(1))
        .connection_timeout(CONNECT_TIMEOUT)
        .max_lifetime(Duration::from_secs(60 * 55))
        .build(conn_manager)
        .await
        .with_context(|| format!("Failed to create connection pool for {}", url.redacted()))?;

    Ok(Pool {
        inner: PoolInner::Postgres(bb8_pool),
    })
}

fn run_error(e: bb8::RunError<sqlx::Error>) -> sqlx::Error {
    match e {
        bb8::RunError::User(e) => e,
        bb8::RunError::TimedOut => sqlx::Error::PoolTimedOut,
    }
}

impl Pool {
    /// Create an in-memory SQLite pool for testing
    #[cfg(test)]
    pub async fn sqlite_in_memory() -> Result<Self, sqlx::Error> {
        // Every sqlite::memory: connection is its own database, so keep exactly one
        let sqlite_pool = sqlx::sqlite::SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Pool {
            inner: PoolInner::Sqlite(sqlite_pool),
        })
    }

    /// Check that a connection can be established
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => {
                let mut conn = pool.get().await.map_err(run_error)?;
                conn.ping().await
            }
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                let mut conn = pool.acquire().await?;
                conn.ping().await
            }
        }
    }

    /// Execute a query (for DDL like CREATE TABLE) - works for both Postgres and SQLite
    pub async fn execute_query(&self, sql: &str) -> Result<(), sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => {
                let mut conn = pool.get().await.map_err(run_error)?;
                sqlx::query(sql).execute(&mut *conn).await?;
                Ok(())
            }
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                sqlx::query(sql).execute(pool).await?;
                Ok(())
            }
        }
    }

    /// Run `statements` over `rows` inside one transaction.
    ///
    /// Each statement binds its slice of `rows` positionally; empty fields are
    /// bound as NULL. Either every statement commits or none does.
    pub async fn insert_in_transaction(
        &self,
        statements: &[InsertStatement],
        rows: &[Vec<String>],
    ) -> Result<(), sqlx::Error> {
        match &self.inner {
            PoolInner::Postgres(pool) => {
                let mut conn = pool.get().await.map_err(run_error)?;
                let mut tx = conn.begin().await?;
                for statement in statements {
                    let mut query = sqlx::query(&statement.sql);
                    for row in &rows[statement.rows.clone()] {
                        for field in row {
                            query = query.bind(nullable(field));
                        }
                    }
                    query.execute(&mut *tx).await?;
                }
                tx.commit().await
            }
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                for statement in statements {
                    let sqlite_sql = super::sql::convert_to_sqlite_placeholders(&statement.sql);
                    let mut query = sqlx::query(&sqlite_sql);
                    for row in &rows[statement.rows.clone()] {
                        for field in row {
                            query = query.bind(nullable(field));
                        }
                    }
                    query.execute(&mut *tx).await?;
                }
                tx.commit().await
            }
        }
    }

    /// Count rows in a table (test verification helper)
    #[cfg(test)]
    pub async fn count_rows(&self, table_name: &str) -> Result<i64, sqlx::Error> {
        let sql = format!("SELECT COUNT(*) FROM {}", super::sql::quote_ident(table_name));
        match &self.inner {
            PoolInner::Postgres(pool) => {
                let mut conn = pool.get().await.map_err(run_error)?;
                let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&mut *conn).await?;
                Ok(count)
            }
            PoolInner::Sqlite(pool) => {
                let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(pool).await?;
                Ok(count)
            }
        }
    }

    /// Fetch every row of a table as optional strings, in insertion order (tests only)
    #[cfg(test)]
    pub async fn fetch_text_rows(
        &self,
        table_name: &str,
        columns: &[&str],
    ) -> Result<Vec<Vec<Option<String>>>, sqlx::Error> {
        use sqlx::Row;

        let column_list = columns
            .iter()
            .map(|c| super::sql::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            column_list,
            super::sql::quote_ident(table_name)
        );

        match &self.inner {
            PoolInner::Sqlite(pool) => {
                let rows = sqlx::query(&sql).fetch_all(pool).await?;
                rows.iter()
                    .map(|row| {
                        (0..columns.len())
                            .map(|idx| row.try_get::<Option<String>, _>(idx))
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .collect()
            }
            PoolInner::Postgres(_) => Err(sqlx::Error::Protocol(
                "fetch_text_rows is only supported on SQLite".to_string(),
            )),
        }
    }
}

fn nullable(field: &str) -> Option<&str> {
    if field.is_empty() { None } else { Some(field) }
}

// Wrap `PgConnectOptions` so that we can implement the bb8::ManageConnection trait.
#[derive(Debug)]
pub struct ConnectionManager {
    connect_options: PgConnectOptions,
}

impl ConnectionManager {
    /// Create a new `ConnectionManager` with the specified connect options.
    pub fn new(connect_options: PgConnectOptions) -> Self {
        Self { connect_options }
    }
}

impl bb8::ManageConnection for ConnectionManager {
    type Connection = PgConnection;
    type Error = sqlx::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        tokio::time::timeout(CONNECT_TIMEOUT, self.connect_options.connect())
            .await
            .map_err(|_| sqlx::Error::PoolTimedOut)?
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        tokio::time::timeout(PING_TIMEOUT, conn.ping())
            .await
            // Convert tokio timeouts into sqlx pool timeouts. bb8 will retry a different connection on ping failure.
            .map_err(|_| sqlx::Error::PoolTimedOut)
            // Make sure that we also look at the actual ping result
            .and_then(|result| result)?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        // sqlx::PgConnection provides no non-async way to check for closed/broken connections.
        false
    }
}
