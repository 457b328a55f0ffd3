use thiserror::Error;

/// Represents errors that can occur in the dossier engine
#[derive(Error, Debug)]
pub enum Error {
    /// Error during serialization or deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error during HTTP request construction or execution
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Couldn't parse base url")]
    BaseUrl(#[from] url::ParseError),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Provider rejected the request or is unavailable
    #[error("Provider not available: {0}")]
    ProviderUnavailable(String),

    /// Stream-level failure while reading a model turn
    #[error("Transport error: {0}")]
    Transport(String),

    /// Conversation persistence failure
    #[error("Store error: {0}")]
    Store(String),

    /// Sandboxed file collaborator failure
    #[error("File access error: {0}")]
    FileAccess(String),

    /// The active submission was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// A Result type that uses our Error type
pub type Result<T> = std::result::Result<T, Error>;
