#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unrecognized recipient type: {0}")]
    UnknownScheme(String),

    #[error("Recipient '{0}' is missing an address")]
    MissingAddress(String),
}
