use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let pool = pool_options(config).connect(&config.database_url).await?;
        Ok(Self { pool })
    }

    /// Builds the pool without opening a connection; the first query connects.
    pub fn connect_lazy(config: &AppConfig) -> Result<Self> {
        let pool = pool_options(config).connect_lazy(&config.database_url)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn pool_options(config: &AppConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.db_idle_timeout_seconds))
        .max_lifetime(Duration::from_secs(config.db_max_lifetime_seconds))
}

/// True when the error means the database could not be reached at all, as
/// opposed to a query that ran and failed.
pub fn is_unavailable(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::PoolTimedOut)
        | Some(sqlx::Error::PoolClosed)
        | Some(sqlx::Error::Io(_))
        | Some(sqlx::Error::Tls(_))
        | Some(sqlx::Error::WorkerCrashed) => true,
        _ => false,
    }
}

/// Postgres unique-violation constraint name, if that is what the error is.
pub fn unique_violation(err: &anyhow::Error) -> Option<String> {
    let db_err = err.downcast_ref::<sqlx::Error>()?.as_database_error()?;
    if db_err.code().as_deref() == Some("23505") {
        Some(db_err.constraint().unwrap_or_default().to_string())
    } else {
        None
    }
}

/// A referenced row (post, story, user) did not exist.
pub fn is_foreign_key_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|err| err.as_database_error())
        .and_then(|db_err| db_err.code())
        .map(|code| code == "23503")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors_count_as_unavailable() {
        assert!(is_unavailable(&anyhow::Error::new(sqlx::Error::PoolTimedOut)));
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(is_unavailable(&anyhow::Error::new(sqlx::Error::Io(io))));
    }

    #[test]
    fn query_errors_are_not_unavailability() {
        assert!(!is_unavailable(&anyhow::Error::new(sqlx::Error::RowNotFound)));
        assert!(!is_unavailable(&anyhow::anyhow!("media not found")));
        assert!(unique_violation(&anyhow::Error::new(sqlx::Error::RowNotFound)).is_none());
        assert!(!is_foreign_key_violation(&anyhow::Error::new(sqlx::Error::PoolTimedOut)));
    }
}
