use thiserror::Error;

/// Errors raised while loading or compiling a policy catalog.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("rule {rule_id}: invalid pattern: {source}")]
    InvalidPattern {
        rule_id: String,
        #[source]
        source: regex::Error,
    },

    #[error("duplicate rule id: {0}")]
    DuplicateRule(String),

    #[error("catalog declares no known domains")]
    NoKnownDomains,

    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
