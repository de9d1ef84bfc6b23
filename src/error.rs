//! Error types for dayflow.

/// Top-level error type for the sync core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors (local store and remote authority share these).
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Sync client errors.
///
/// The push/pull display strings are user-facing: a manual "force sync"
/// surfaces them verbatim in the UI, matching the app's locale.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Sync API nao configurada.")]
    NotConfigured,

    #[error("Push falhou ({status}): {message}")]
    Push { status: u16, message: String },

    #[error("Pull falhou ({status}): {message}")]
    Pull { status: u16, message: String },

    #[error("Transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the sync core.
pub type Result<T> = std::result::Result<T, Error>;
