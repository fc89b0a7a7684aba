use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection or schema setup failed while opening the store.
    #[error("session store initialization failed: {0}")]
    Init(#[source] sqlx::Error),

    #[error("invalid session store configuration: {0}")]
    InvalidConfig(String),

    /// The payload could not be converted to or from its JSON form.
    #[error("session payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid cookie expiry: {0}")]
    InvalidCookie(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
