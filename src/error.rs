//! Error types shared by the library.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskflowError {
  #[error("Database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("Migration failed: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  #[error("Invalid configuration value for {key}: {message}")]
  Config { key: String, message: String },

  #[error("Task not found: {0}")]
  NotFound(i64),

  #[error("Validation failed: {0}")]
  Validation(String),

  #[error("Transport error: {0}")]
  Transport(String),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TaskflowError>;
