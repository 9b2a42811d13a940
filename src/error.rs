//! Unified error types for chaser-locator

use thiserror::Error;

/// Unified Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for chaser-locator
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// CDP protocol errors
    #[error("CDP error: {0}")]
    Cdp(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Element not found
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Timeout
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Script execution failed
    #[error("Script execution failed: {0}")]
    ScriptExecutionFailed(String),

    /// Selector could not be interpreted
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// Query handler registration errors
    #[error("Query handler error: {0}")]
    QueryHandler(String),

    /// Element kind does not support the requested action
    #[error("Unsupported element: {0}")]
    UnsupportedElement(String),

    /// Element exists but is not ready for the action (moving, disabled)
    #[error("Element not ready: {0}")]
    ElementNotReady(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new WebSocket error
    pub fn websocket<S: Into<String>>(msg: S) -> Self {
        Error::WebSocket(msg.into())
    }

    /// Create a new CDP error
    pub fn cdp<S: Into<String>>(msg: S) -> Self {
        Error::Cdp(msg.into())
    }

    /// Create a new element not found error
    pub fn element_not_found<S: Into<String>>(selector: S) -> Self {
        Error::ElementNotFound(selector.into())
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a new script execution failed error
    pub fn script_execution_failed<S: Into<String>>(msg: S) -> Self {
        Error::ScriptExecutionFailed(msg.into())
    }

    /// Create a new invalid selector error
    pub fn invalid_selector<S: Into<String>>(msg: S) -> Self {
        Error::InvalidSelector(msg.into())
    }

    /// Create a new query handler error
    pub fn query_handler<S: Into<String>>(msg: S) -> Self {
        Error::QueryHandler(msg.into())
    }

    /// Create a new unsupported element error
    pub fn unsupported_element<S: Into<String>>(msg: S) -> Self {
        Error::UnsupportedElement(msg.into())
    }

    /// Create a new element not ready error
    pub fn element_not_ready<S: Into<String>>(msg: S) -> Self {
        Error::ElementNotReady(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Whether this is a timeout or a cancellation
    ///
    /// A locator only stops retrying when its own deadline or signal fires;
    /// a `Timeout` from a single inner wait is retried like any other error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Cancelled)
    }
}
