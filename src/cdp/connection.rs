//! CDP WebSocket connection implementation
//!
//! This module provides the WebSocket transport to a page target.

use super::traits::{CdpConnection, CdpEvent};
use super::types::*;
use crate::Error;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<u64, PendingCommand>>>;
type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<CdpEvent>>>>;

/// Pending command response
#[derive(Debug)]
struct PendingCommand {
    /// Response channel sender
    sender: oneshot::Sender<CdpRpcResponse>,
    /// Command method (for logging)
    method: String,
}

/// CDP WebSocket connection implementation
#[derive(Debug)]
pub struct CdpWebSocketConnection {
    /// WebSocket URL
    url: String,
    /// Write half of the socket
    sink: Mutex<SplitSink<WsStream, Message>>,
    /// Next command ID
    next_id: AtomicU64,
    /// Pending commands (ID -> response sender)
    pending_commands: PendingMap,
    /// Event subscribers
    event_subscribers: Subscribers,
    /// Is connection active
    is_active: Arc<AtomicBool>,
    /// Per-command timeout
    command_timeout: Duration,
}

impl CdpWebSocketConnection {
    /// Connect to a page target
    ///
    /// # Arguments
    /// * `url` - WebSocket URL (e.g., "ws://localhost:9222/devtools/page/ABC123")
    /// * `command_timeout` - how long a single command may wait for its response
    pub async fn connect<S: Into<String>>(url: S, command_timeout: Duration) -> Result<Arc<Self>, Error> {
        let url = url.into();
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| Error::websocket(format!("Failed to connect: {}", e)))?;
        let (sink, stream) = ws_stream.split();

        let connection = Arc::new(Self {
            url,
            sink: Mutex::new(sink),
            next_id: AtomicU64::new(1),
            pending_commands: Arc::new(Mutex::new(HashMap::new())),
            event_subscribers: Arc::new(Mutex::new(Vec::new())),
            is_active: Arc::new(AtomicBool::new(true)),
            command_timeout,
        });

        info!("WebSocket connection established");

        let pending_commands = Arc::clone(&connection.pending_commands);
        let event_subscribers = Arc::clone(&connection.event_subscribers);
        let is_active = Arc::clone(&connection.is_active);
        tokio::spawn(async move {
            debug!("Message loop task started");
            if let Err(e) =
                Self::message_loop(stream, &pending_commands, &event_subscribers, &is_active).await
            {
                error!("Message loop error: {}", e);
            }
            is_active.store(false, Ordering::SeqCst);
            // Wake every waiter; their senders drop with the map entries
            pending_commands.lock().await.clear();
            debug!("Message loop task exited");
        });

        Ok(connection)
    }

    /// Target URL this connection was opened against
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Read half processing loop
    async fn message_loop(
        mut stream: SplitStream<WsStream>,
        pending_commands: &PendingMap,
        event_subscribers: &Subscribers,
        is_active: &AtomicBool,
    ) -> Result<(), Error> {
        while is_active.load(Ordering::SeqCst) {
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    let error_msg = e.to_string();
                    if error_msg.contains("ConnectionClosed") || error_msg.contains("AlreadyClosed") {
                        warn!("WebSocket connection closed, deactivating connection");
                        break;
                    }
                    return Err(Error::websocket(format!("WebSocket error: {}", e)));
                }
                None => {
                    warn!("WebSocket stream closed");
                    break;
                }
            };

            match message {
                Message::Text(text) => {
                    Self::handle_message(&text, pending_commands, event_subscribers).await;
                }
                Message::Close(_) => {
                    info!("WebSocket close frame received");
                    break;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Route an incoming frame to its waiter or to the event subscribers
    async fn handle_message(text: &str, pending_commands: &PendingMap, event_subscribers: &Subscribers) {
        if let Ok(response) = serde_json::from_str::<CdpRpcResponse>(text) {
            match pending_commands.lock().await.remove(&response.id) {
                Some(pending) => {
                    debug!("Received response for command {}: {}", response.id, pending.method);
                    let _ = pending.sender.send(response);
                }
                None => warn!("Received response for unknown command ID: {}", response.id),
            }
            return;
        }

        if let Ok(notification) = serde_json::from_str::<CdpNotification>(text) {
            debug!("Received event: {}", notification.method);
            let event = CdpEvent {
                method: notification.method,
                params: notification.params,
                session_id: notification.session_id,
            };
            event_subscribers
                .lock()
                .await
                .retain(|sender| sender.send(event.clone()).is_ok());
            return;
        }

        warn!("Unknown message format: {}", text);
    }
}

#[async_trait]
impl CdpConnection for CdpWebSocketConnection {
    async fn send_command(&self, method: &str, params: Value) -> Result<Value, Error> {
        if !self.is_active.load(Ordering::SeqCst) {
            return Err(Error::websocket("Connection is not active"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params: if params.is_null() { None } else { Some(params) },
            session_id: None,
        };
        let json = serde_json::to_string(&request)?;
        debug!("Sending CDP command {}: {}", id, method);

        let (sender, receiver) = oneshot::channel();
        self.pending_commands.lock().await.insert(
            id,
            PendingCommand {
                sender,
                method: method.to_string(),
            },
        );

        let sent = self.sink.lock().await.send(Message::Text(json)).await;
        if let Err(e) = sent {
            self.pending_commands.lock().await.remove(&id);
            return Err(Error::websocket(format!("Failed to send message: {}", e)));
        }

        match tokio::time::timeout(self.command_timeout, receiver).await {
            Ok(Ok(response)) => match response.error {
                Some(error) => Err(Error::cdp(format!(
                    "{}: {} (code: {})",
                    method, error.message, error.code
                ))),
                None => Ok(response.result),
            },
            Ok(Err(_)) => Err(Error::websocket(format!(
                "Connection closed while waiting for {}",
                method
            ))),
            Err(_) => {
                self.pending_commands.lock().await.remove(&id);
                Err(Error::timeout(format!("Command {} ({}) timed out", id, method)))
            }
        }
    }

    async fn listen_events(&self) -> Result<mpsc::Receiver<CdpEvent>, Error> {
        let (sender, receiver) = mpsc::channel(100);
        let (unbounded_sender, mut unbounded_receiver) = mpsc::unbounded_channel();

        self.event_subscribers.lock().await.push(unbounded_sender);

        // Forward events to bounded channel
        tokio::spawn(async move {
            while let Some(event) = unbounded_receiver.recv().await {
                if sender.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(receiver)
    }

    async fn close(&self) -> Result<(), Error> {
        info!("Closing CDP WebSocket connection");

        self.is_active.store(false, Ordering::SeqCst);
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| Error::websocket(format!("Failed to close WebSocket: {}", e)))?;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }
}
