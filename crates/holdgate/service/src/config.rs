//! Configuration for the authorization service.
//!
//! Layering: built-in defaults, then an optional file, then `HOLDGATE_*`
//! environment variables (`HOLDGATE_QUORUM__REQUIRED_SIGNERS=3`).

use std::path::PathBuf;

use holdgate_fsm::HoldConfig;
use holdgate_lease::LeaseConfig;
use holdgate_quorum::QuorumConfig;
use holdgate_session::SessionConfig;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoldgateConfig {
    #[serde(default)]
    pub hold: HoldConfig,

    #[serde(default)]
    pub lease: LeaseConfig,

    #[serde(default)]
    pub quorum: QuorumConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Identifier recorded as the sealing authority on every entry
    #[serde(default = "default_sealing_authority")]
    pub sealing_authority: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            sealing_authority: default_sealing_authority(),
        }
    }
}

/// Policy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// YAML prohibition catalog. The built-in catalog is used when unset.
    #[serde(default)]
    pub catalog: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_sealing_authority() -> String {
    "holdgate".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl HoldgateConfig {
    /// Load configuration from defaults, an optional file, and the environment.
    pub fn load(path: Option<&str>) -> Result<Self, ServiceError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&HoldgateConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("HOLDGATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: HoldgateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject any setting that would weaken an authorization invariant.
    pub fn validate(&self) -> Result<(), ServiceError> {
        self.hold.validate()?;
        self.lease.validate()?;
        self.quorum.validate()?;
        if self.ledger.sealing_authority.trim().is_empty() {
            return Err(ServiceError::Config(
                "ledger.sealing_authority must not be empty".into(),
            ));
        }
        if let Some(retention) = self.session.retired_retention_ms {
            if retention < self.lease.max_window_ms {
                return Err(ServiceError::Config(format!(
                    "session.retired_retention_ms ({retention}) must cover lease.max_window_ms ({})",
                    self.lease.max_window_ms
                )));
            }
        }
        if self.session.max_bound_ms == Some(0) {
            return Err(ServiceError::Config(
                "session.max_bound_ms must be non-zero when set".into(),
            ));
        }
        Ok(())
    }
}
