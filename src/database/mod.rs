use std::ops::Deref;

use anyhow::{Context, Error as ErrReport};
use sqlx::pool::PoolOptions;
use sqlx::{Executor, Pool, Postgres, Row};
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::DatabaseConfig;

pub mod methods;
pub mod types;

pub struct Database {
    pub pool: Pool<Postgres>,
}

impl Deref for Database {
    type Target = Pool<Postgres>;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl Database {
    #[instrument(skip_all)]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, ErrReport> {
        info!(url = %&config.database, "Connecting to database");

        let pool = PoolOptions::<Postgres>::new()
            .max_connections(config.max_connections)
            .connect(config.database.as_str())
            .await
            .context("error connecting to database")?;

        let version = pool
            .fetch_one("SELECT version()")
            .await
            .context("error getting database version")?
            .get::<String, _>(0);
        info!(url = %&config.database, ?version, "Connected to database");

        Ok(Self { pool })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    InternalError(#[from] sqlx::Error),

    #[error("table `{table}` is missing required column `{column}`")]
    MissingColumn { table: String, column: String },

    #[error("column `{column}` in table `{table}` holds a non-integer key")]
    MalformedKey { table: String, column: String },

    #[error("unknown operation code {code} in log table")]
    UnknownOperation { code: i64 },

    #[error("unsupported column type {ty} for column `{column}`")]
    UnsupportedColumnType { column: String, ty: String },
}
