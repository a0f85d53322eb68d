use std::collections::HashMap;
use thiserror::Error;

/// Unified error type for the entire gridflow library
#[derive(Debug, Error)]
pub enum GridflowError {
    /// Action lifecycle errors (bad transition, unknown id, duplicate id)
    #[error("Action error: {id} - {message}")]
    Action {
        id: String,
        message: String,
        state: Option<String>,
    },

    /// Admission/requirement evaluation errors
    #[error("Admission failed for {id}: {message}")]
    Admission {
        id: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Execution errors raised out of an action's process step
    #[error("Execution failed for {id}: {message}")]
    Execution {
        id: String,
        message: String,
        context: HashMap<String, String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The backend confirmed the operation with a non-success receipt
    #[error("Reverted: operation {operation} for {identity}")]
    Reverted {
        identity: String,
        operation: String,
        reason: Option<String>,
    },

    /// The caller's funding was insufficient and recovery did not succeed
    #[error("Balance too low for {identity}")]
    BalanceTooLow {
        identity: String,
        required: Option<u64>,
    },

    /// Coordinate/identity codec errors
    #[error("Codec error: {message}")]
    Codec {
        message: String,
        word: Option<String>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Concurrency errors (identity lock conflicts, poisoned state)
    #[error("Concurrency error: {operation}")]
    Concurrency {
        operation: String,
        identity: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Timeout errors
    #[error("Operation timed out: {operation} (timeout: {timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Cancellation errors
    #[error("Operation was cancelled: {operation}")]
    Cancelled {
        operation: String,
        reason: Option<String>,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl GridflowError {
    /// Create an action error
    pub fn action<S: Into<String>, M: Into<String>>(id: S, message: M) -> Self {
        Self::Action {
            id: id.into(),
            message: message.into(),
            state: None,
        }
    }

    /// Create an action error recording the state it was observed in
    pub fn action_in_state<S: Into<String>, M: Into<String>, T: Into<String>>(
        id: S,
        message: M,
        state: T,
    ) -> Self {
        Self::Action {
            id: id.into(),
            message: message.into(),
            state: Some(state.into()),
        }
    }

    /// Create an admission error
    pub fn admission<S: Into<String>, M: Into<String>>(id: S, message: M) -> Self {
        Self::Admission {
            id: id.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create an execution error
    pub fn execution<S: Into<String>, M: Into<String>>(id: S, message: M) -> Self {
        Self::Execution {
            id: id.into(),
            message: message.into(),
            context: HashMap::new(),
            source: None,
        }
    }

    /// Create an execution error with source
    pub fn execution_with_source<S: Into<String>, M: Into<String>, E>(
        id: S,
        message: M,
        source: E,
    ) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Execution {
            id: id.into(),
            message: message.into(),
            context: HashMap::new(),
            source: Some(Box::new(source)),
        }
    }

    /// Add context to an execution error
    pub fn with_context<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        if let Self::Execution {
            ref mut context, ..
        } = self
        {
            context.insert(key.into(), value.into());
        }
        self
    }

    /// Create a reverted error from a backend receipt
    pub fn reverted<S: Into<String>, O: Into<String>>(identity: S, operation: O) -> Self {
        Self::Reverted {
            identity: identity.into(),
            operation: operation.into(),
            reason: None,
        }
    }

    /// Create a balance-too-low error
    pub fn balance_too_low<S: Into<String>>(identity: S) -> Self {
        Self::BalanceTooLow {
            identity: identity.into(),
            required: None,
        }
    }

    /// Create a codec error
    pub fn codec<S: Into<String>>(message: S) -> Self {
        Self::Codec {
            message: message.into(),
            word: None,
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
            expected: None,
            actual: None,
        }
    }

    /// Create a concurrency error
    pub fn concurrency<S: Into<String>>(operation: S) -> Self {
        Self::Concurrency {
            operation: operation.into(),
            identity: None,
            source: None,
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a cancellation error
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            reason: None,
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Concurrency { .. } => true,
            Self::Admission { .. } => true, // deferred admission is retried by the queue
            Self::BalanceTooLow { .. } => true, // may recover after external funding
            Self::Reverted { .. } => false,
            Self::Cancelled { .. } => false,
            _ => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Action { .. } => "action",
            Self::Admission { .. } => "admission",
            Self::Execution { .. } => "execution",
            Self::Reverted { .. } => "reverted",
            Self::BalanceTooLow { .. } => "funding",
            Self::Codec { .. } => "codec",
            Self::Configuration { .. } => "configuration",
            Self::Concurrency { .. } => "concurrency",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, GridflowError>;

/// Convert from common error types
impl From<serde_json::Error> for GridflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("serialization failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

impl From<anyhow::Error> for GridflowError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = GridflowError::action("mine:3,4", "duplicate id");
        assert!(matches!(err, GridflowError::Action { .. }));
        assert_eq!(err.category(), "action");
    }

    #[test]
    fn test_error_context() {
        let err = GridflowError::execution("wall:1,1", "submit rejected")
            .with_context("sequence", "17")
            .with_context("attempt", "2");

        if let GridflowError::Execution { context, .. } = err {
            assert_eq!(context.get("sequence"), Some(&"17".to_string()));
            assert_eq!(context.get("attempt"), Some(&"2".to_string()));
        } else {
            panic!("Expected execution error");
        }
    }

    #[test]
    fn test_error_recoverability() {
        assert!(GridflowError::timeout("confirm", 1000).is_recoverable());
        assert!(GridflowError::balance_too_low("0xabc").is_recoverable());
        assert!(!GridflowError::reverted("0xabc", "mineTiles").is_recoverable());
        assert!(!GridflowError::cancelled("process").is_recoverable());
    }
}
