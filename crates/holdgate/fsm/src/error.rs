use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsmError {
    #[error("hold threshold {0}ms is below the {floor}ms floor", floor = crate::MIN_HOLD_MS)]
    ThresholdBelowFloor(u64),
}
