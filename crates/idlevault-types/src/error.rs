use thiserror::Error;

pub type Result<T> = std::result::Result<T, IdlevaultError>;

#[derive(Debug, Error)]
pub enum IdlevaultError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("startup failed: {0}")]
    Startup(String),

    #[error("host application installation not found (searched: {0})")]
    InstallNotFound(String),

    #[error("data root not found at '{0}'")]
    DataRootNotFound(String),

    #[error("no dataset directories found under '{0}'")]
    NoDatasets(String),

    #[error("permission denied on '{path}': {reason}")]
    PermissionDenied { path: String, reason: String },

    #[error("decryption failed: wrong passphrase or corrupted data")]
    DecryptionFailed,

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("archive error: {0}")]
    Archive(String),

    /// Network or service failure worth retrying (transport error, 429, 5xx).
    #[error("transient storage error: {0}")]
    Transient(String),

    /// Storage failure that will not go away on retry (auth, not found, bad request).
    #[error("storage error: {0}")]
    Storage(String),

    #[error("upload of '{key}' failed after {attempts} attempts: {source}")]
    UploadExhausted {
        key: String,
        attempts: u32,
        #[source]
        source: Box<IdlevaultError>,
    },

    #[error("filesystem watcher error: {0}")]
    Watch(String),

    #[error("{0}")]
    Other(String),
}

impl IdlevaultError {
    /// Whether this error is one of the startup-class conditions that must
    /// stop the service before any monitor starts.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            IdlevaultError::Startup(_)
                | IdlevaultError::Config(_)
                | IdlevaultError::InstallNotFound(_)
                | IdlevaultError::DataRootNotFound(_)
                | IdlevaultError::NoDatasets(_)
                | IdlevaultError::PermissionDenied { .. }
        )
    }
}
