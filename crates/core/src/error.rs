pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("snapshot export failed: {message}")]
    Export { message: String },

    #[error("snapshot import failed: {message}")]
    Import { message: String },

    #[error("remote store error: {message}")]
    Remote { message: String },

    /// Wrong secret or a payload that was not produced by this cipher.
    #[error("decryption failed: wrong secret or corrupted payload")]
    Decryption,

    #[error("encryption failed: {message}")]
    Encryption { message: String },

    #[error("backup not found: {id}")]
    UnknownBackup { id: String },

    #[error("backup {id} has no .json payload")]
    MissingPayload { id: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }
}
