use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use tracing::info;

use crate::error::Result;

static MIGRATOR: Migrator = sqlx::migrate!();

/// Loops in one process issue overlapping queries, so they share a small pool.
const MAX_CONNECTIONS: u32 = 5;

pub async fn setup_database(database_url: &str) -> Result<Pool<Postgres>> {
  let pool = PgPoolOptions::new()
    .max_connections(MAX_CONNECTIONS)
    .acquire_timeout(Duration::from_secs(10))
    .connect(database_url)
    .await?;

  MIGRATOR.run(&pool).await?;
  info!("Database migrations complete");
  Ok(pool)
}
