use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("malformed row data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Maps a store-internal error onto the domain error surface the
/// `CoordinationStore` trait is specified against.
pub fn to_core_error(e: StoreError) -> driftd_core::Error {
    match e {
        StoreError::NotFound(s) => driftd_core::Error::NotFound(s),
        StoreError::InvalidData(s) => driftd_core::Error::Internal(s),
        StoreError::Db(e) => driftd_core::Error::Internal(e.to_string()),
    }
}
