use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A numeric field is outside of its accepted range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// A required name is empty.
    #[error("`{0}` cannot be empty")]
    EmptyName(&'static str),
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// The parent filter is not a JSON object.
    #[error("Invalid filter: expected a JSON object, got `{0}`")]
    InvalidFilter(String),
}
