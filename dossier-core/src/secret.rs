use std::fmt;

/// Wrapper for API keys and other credentials.
///
/// The inner value never appears in `Debug` or `Display` output, so configs
/// holding a `Secret` can be logged freely. `Serialize` is deliberately not
/// implemented.
///
/// # Examples
///
/// ```
/// use dossier_core::Secret;
///
/// let key = Secret::new("sk-123".to_string());
/// assert_eq!(format!("{key:?}"), "Secret(..)");
/// assert_eq!(key.reveal(), "sk-123");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// Reads the secret from an environment variable, empty if unset.
    pub fn from_env(var: &str) -> Self {
        Secret(std::env::var(var).unwrap_or_default())
    }

    /// Returns the raw value for use in an auth header.
    pub fn reveal(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("••••••")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret(value.to_string())
    }
}
