/// A single service status could not be turned into a numeric sample.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid number in {field}: {raw:?}")]
    InvalidNumber { field: &'static str, raw: String },

    #[error("invalid status_update_time {raw:?}: {source}")]
    InvalidTimestamp {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },

    /// The local wall-clock time falls in a DST gap.
    #[error("status_update_time {raw:?} does not exist in the local timezone")]
    NonexistentLocalTime { raw: String },
}

/// Errors raised while fetching or interpreting data from a monitoring backend.
///
/// Every variant except [`CollectError::Http`] on a misconfigured client is
/// recoverable: the collector logs it and moves on to the next host or service.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("status API returned HTTP {status} for host {host}: {body}")]
    Status { host: String, status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty response body for host {host}")]
    EmptyBody { host: String },

    #[error("no 'servicestatus' key in response for host {host}")]
    MissingServiceStatus { host: String },

    #[error("no services found for host {host}")]
    NoServices { host: String },

    #[error("service {service:?} not found for host {host}")]
    ServiceNotFound { host: String, service: String },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode or decode stored column: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored timestamp out of range: {0}")]
    Timestamp(i64),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
