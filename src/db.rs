//! SQLite pool setup and schema.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;

/// Schema shipped with the binary; every statement is idempotent.
const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// Open (creating if needed) the database at `url`.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("parsing database URL `{}`", url))?
        .create_if_missing(true);

    let file = options.get_filename();
    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    tracing::debug!("Opening SQLite database at {}", file.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("connecting to SQLite")?;
    Ok(pool)
}

/// Apply the schema statement by statement.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());
    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt)
            .execute(db)
            .await
            .with_context(|| format!("executing `{}`", stmt))?;
    }
    Ok(())
}
