use thiserror::Error;

/// Error taxonomy for the whole engine.
///
/// `InvalidInput` and `InsufficientData` are caller-facing; `Invariant` marks
/// a programmer error and aborts the run with no silent correction.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient data: needed {needed}, have {have}")]
    InsufficientData { needed: usize, have: usize },

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal invariant breached: {0}")]
    Invariant(String),
}

impl EngineError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn insufficient_data(needed: usize, have: usize) -> Self {
        Self::InsufficientData { needed, have }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        Self::Repository(error.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<csv::Error> for EngineError {
    fn from(error: csv::Error) -> Self {
        Self::InvalidInput(format!("CSV: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::insufficient_data(30, 12);
        let msg = format!("{err}");
        assert!(msg.contains("needed 30"));
        assert!(msg.contains("have 12"));
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let bad: Result<i32, _> = serde_json::from_str("not json");
        let err: EngineError = bad.unwrap_err().into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }
}
