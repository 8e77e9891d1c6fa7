//! Error taxonomy shared by every anoima-core component.

/// Result type for anoima-core operations.
pub type AnoimaResult<T> = Result<T, AnoimaError>;

/// Errors surfaced by the storage, key-map, resolver and fan-out layers.
#[derive(Debug, thiserror::Error)]
pub enum AnoimaError {
    /// A key or id does not resolve to any live row.
    #[error("{0} not found")]
    NotFound(String),

    /// A required field is missing or holds a value outside its enumerated set.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A unique index already holds `value`. Key-map issuance retries on this internally.
    #[error("unique constraint violated on {index}: {value}")]
    UniqueViolation { index: String, value: String },

    /// Shard number outside `[0, shard_count)`.
    #[error("shard {shard_no} is out of range (shard count {shard_count})")]
    OutOfRange { shard_no: usize, shard_count: usize },

    /// The actor is not allowed to touch a row it does not own.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("corrupt record in table '{table}': {source}")]
    Codec {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl AnoimaError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True for the internal uniqueness signal (never retried outside the key-map).
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}
