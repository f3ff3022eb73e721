use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    #[error("curve must have exactly 12 values, got {len}")]
    CurveLength { len: usize },

    #[error("curve value for month {month} is not finite")]
    NonFiniteValue { month: usize },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
