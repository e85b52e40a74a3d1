use serde::{Deserialize, Serialize};

use crate::error::FsmError;

/// Minimum continuous hold, in monotonic milliseconds, before an intent arms.
pub const MIN_HOLD_MS: u64 = 400;

/// Hold threshold configuration. May be raised, never lowered below
/// [`MIN_HOLD_MS`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldConfig {
    #[serde(default = "default_min_hold_ms")]
    pub min_hold_ms: u64,
}

fn default_min_hold_ms() -> u64 {
    MIN_HOLD_MS
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            min_hold_ms: MIN_HOLD_MS,
        }
    }
}

impl HoldConfig {
    pub fn new(min_hold_ms: u64) -> Result<Self, FsmError> {
        let config = Self { min_hold_ms };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FsmError> {
        if self.min_hold_ms < MIN_HOLD_MS {
            return Err(FsmError::ThresholdBelowFloor(self.min_hold_ms));
        }
        Ok(())
    }

    /// Effective threshold. Floors a hand-built config that skipped validation.
    pub fn threshold_ms(&self) -> u64 {
        self.min_hold_ms.max(MIN_HOLD_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_floor() {
        assert_eq!(HoldConfig::default().threshold_ms(), 400);
    }

    #[test]
    fn can_be_raised() {
        assert_eq!(HoldConfig::new(650).unwrap().threshold_ms(), 650);
    }

    #[test]
    fn cannot_be_lowered() {
        assert_eq!(HoldConfig::new(399), Err(FsmError::ThresholdBelowFloor(399)));
        let sneaky = HoldConfig { min_hold_ms: 10 };
        assert_eq!(sneaky.threshold_ms(), 400);
    }

    #[test]
    fn missing_field_deserializes_to_floor() {
        let config: HoldConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.min_hold_ms, 400);
    }
}
