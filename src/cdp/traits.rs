//! CDP (Chrome DevTools Protocol) layer traits
//!
//! This module defines the abstract interface for CDP communication.

use async_trait::async_trait;
use serde_json::Value;

/// CDP event representation
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// Event method (e.g., "Runtime.bindingCalled")
    pub method: String,
    /// Event parameters
    pub params: Value,
    /// Session ID (for multi-session targets)
    pub session_id: Option<String>,
}

/// CDP connection trait
///
/// Represents a WebSocket connection to a single page target.
#[async_trait]
pub trait CdpConnection: Send + Sync + std::fmt::Debug {
    /// Send a CDP command and wait for its `result` payload
    ///
    /// Protocol-level errors are returned as [`crate::Error::Cdp`].
    async fn send_command(&self, method: &str, params: Value) -> Result<Value, crate::Error>;

    /// Subscribe to CDP events
    async fn listen_events(&self) -> Result<tokio::sync::mpsc::Receiver<CdpEvent>, crate::Error>;

    /// Close the connection
    async fn close(&self) -> Result<(), crate::Error>;

    /// Check if connection is active
    fn is_active(&self) -> bool;
}
