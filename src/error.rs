use chrono::NaiveDateTime;

pub type DetectorResult<T> = std::result::Result<T, DetectorError>;

/// Errors raised while evaluating a symbol's bar stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectorError {
    /// Input that breaks the day-length or price invariants; aborts the symbol.
    #[error("Data integrity violation for {symbol} at {dt}: {reason}")]
    DataIntegrity {
        symbol: String,
        dt: NaiveDateTime,
        reason: String,
    },

    /// The prior trading day's session bars could not be located.
    #[error("No prior trading day found for {symbol} at {dt}")]
    MissingPriorDay { symbol: String, dt: NaiveDateTime },

    /// A lookup was asked to evaluate an empty bar history.
    #[error("Empty bar history: {0}")]
    EmptyHistory(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl DetectorError {
    pub fn integrity(symbol: &str, dt: NaiveDateTime, reason: impl Into<String>) -> Self {
        DetectorError::DataIntegrity {
            symbol: symbol.to_string(),
            dt,
            reason: reason.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DetectorError::MissingPriorDay { .. } | DetectorError::EmptyHistory(_)
        )
    }
}
