use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sqlite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("i/o error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("clickhouse error: {0}")]
    ClickHouseError(#[from] clickhouse::error::Error),

    #[error("geo database error: {0}")]
    GeoError(#[from] maxminddb::MaxMindDBError),

    #[error("unable to load user agent regexes: {0}")]
    UserAgentRegexes(String),

    /// The store has no rows yet, so there is no watermark.
    #[error("store has no records")]
    EmptyStore,

    #[error("unreadable timestamp '{0}' in store")]
    CorruptTimestamp(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
