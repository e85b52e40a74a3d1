use thiserror::Error;

/// Errors raised while constructing a `ProposedIntent`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntentError {
    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("domain tag must not be empty")]
    EmptyDomain,

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}
