// src/error.rs

use crate::types::ResourceId;

/// Result type used throughout the tidewatch library
pub type TidewatchResult<T> = Result<T, TidewatchError>;

/// All possible errors that can occur in the tidewatch library
#[derive(thiserror::Error, Debug)]
pub enum TidewatchError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A sample was rejected at ingestion
    #[error("Invalid sample: {message}")]
    InvalidSample { message: String },

    /// Not enough samples for a detection or prediction method
    #[error("Insufficient data for {method}: need {required} samples, have {available}")]
    InsufficientData {
        method: String,
        required: usize,
        available: usize,
    },

    /// A candidate pattern did not reach the confidence threshold
    #[error("Pattern '{pattern}' confidence {confidence:.3} below threshold {threshold:.3}")]
    LowConfidence {
        pattern: String,
        confidence: f64,
        threshold: f64,
    },

    /// The failure breaker for a resource is open
    #[error("Failure breaker open for '{resource_id}'")]
    BreakerOpen { resource_id: ResourceId },

    /// Callback execution failed
    #[error("Callback execution failed for '{operation}': {message}")]
    CallbackFailed { operation: String, message: String },

    /// Control loop is not running or has stopped
    #[error("Control loop is not running: {message}")]
    EngineNotRunning { message: String },

    /// Channel communication error (internal)
    #[error("Internal channel error: {message}")]
    ChannelError { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// TOML configuration parse errors
    #[cfg(feature = "config-toml")]
    #[error("TOML parse error: {source}")]
    TomlParse {
        #[from]
        source: toml::de::Error,
    },

    /// Metric registration or encoding errors
    #[cfg(feature = "prometheus-metrics")]
    #[error("Metrics error: {source}")]
    Metrics {
        #[from]
        source: prometheus::Error,
    },

    /// IO-related errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Generic error for unexpected situations
    #[error("Unexpected error: {message}")]
    Unexpected { message: String },
}

/// Helper methods for creating common errors
impl TidewatchError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invalid_sample<S: Into<String>>(message: S) -> Self {
        Self::InvalidSample {
            message: message.into(),
        }
    }

    pub fn insufficient_data<S: Into<String>>(method: S, required: usize, available: usize) -> Self {
        Self::InsufficientData {
            method: method.into(),
            required,
            available,
        }
    }

    pub fn low_confidence<S: Into<String>>(pattern: S, confidence: f64, threshold: f64) -> Self {
        Self::LowConfidence {
            pattern: pattern.into(),
            confidence,
            threshold,
        }
    }

    pub fn breaker_open<S: Into<String>>(resource_id: S) -> Self {
        Self::BreakerOpen {
            resource_id: resource_id.into(),
        }
    }

    pub fn callback_failed<S: Into<String>>(operation: S, message: S) -> Self {
        Self::CallbackFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn engine_not_running<S: Into<String>>(message: S) -> Self {
        Self::EngineNotRunning {
            message: message.into(),
        }
    }

    pub fn unexpected<S: Into<String>>(message: S) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Errors that are expected in steady state and handled by omitting
    /// the affected pattern or prediction
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InsufficientData { .. } | Self::LowConfidence { .. })
    }
}

/// Convert from channel send errors
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TidewatchError {
    fn from(error: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelError {
            message: format!("Failed to send on channel: {}", error),
        }
    }
}

/// Convert from channel receive errors
impl From<tokio::sync::oneshot::error::RecvError> for TidewatchError {
    fn from(error: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelError {
            message: format!("Failed to receive on channel: {}", error),
        }
    }
}
