//! Mock Chrome DevTools Protocol page endpoint
//!
//! Answers just enough of the Runtime domain for a `CdpFrame` to run CSS
//! queries and selector waits without a real browser. Selectors listed in
//! `present` match; everything else does not.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Mock page target
pub struct MockChromeServer {
    addr: String,
    released: Arc<AtomicUsize>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockChromeServer {
    /// Start a server matching the given selectors
    pub async fn start(present: &[&str]) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let ws_addr = format!("ws://{}/devtools/page/MOCK", addr);

        let present: Arc<Vec<String>> = Arc::new(present.iter().map(|s| s.to_string()).collect());
        let released = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn({
            let released = released.clone();
            async move {
                loop {
                    tokio::select! {
                        result = listener.accept() => {
                            match result {
                                Ok((stream, peer_addr)) => {
                                    tracing::info!("Mock Chrome: Connection from {}", peer_addr);
                                    tokio::spawn(Self::handle_connection(stream, present.clone(), released.clone()));
                                }
                                Err(e) => {
                                    tracing::error!("Mock Chrome: Accept error: {}", e);
                                    break;
                                }
                            }
                        }
                        _ = &mut shutdown_rx => {
                            tracing::info!("Mock Chrome: Shutdown signal received");
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            addr: ws_addr,
            released,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    async fn handle_connection(stream: TcpStream, present: Arc<Vec<String>>, released: Arc<AtomicUsize>) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                tracing::error!("Mock Chrome: WebSocket handshake error: {}", e);
                return;
            }
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let Ok(req) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    if req["method"] == "Runtime.releaseObject" {
                        released.fetch_add(1, Ordering::SeqCst);
                    }
                    let response = Self::create_cdp_response(&req, &present);
                    if ws_sender.send(Message::Text(response.to_string())).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::error!("Mock Chrome: WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    }

    fn node(object_id: &str) -> Value {
        json!({ "result": { "type": "object", "subtype": "node", "className": "HTMLElement", "objectId": object_id } })
    }

    fn call_function_on(params: &Value, present: &[String]) -> Value {
        let script = params["functionDeclaration"].as_str().unwrap_or_default();
        let args = &params["arguments"];

        if script == "() => document" {
            return Self::node("document");
        }
        if script.contains("throw") {
            return json!({
                "result": { "type": "object", "subtype": "error" },
                "exceptionDetails": {
                    "exceptionId": 1,
                    "text": "Uncaught",
                    "exception": { "type": "object", "description": "Error: boom" }
                }
            });
        }
        // selector wait: (PuppeteerUtil, query, selector, root, visible)
        if script.contains("checkVisibility") {
            return match args[2]["value"].as_str() {
                Some(selector) if present.iter().any(|p| p == selector) => {
                    Self::node(&format!("node:{}", selector))
                }
                _ => json!({ "result": { "type": "undefined" } }),
            };
        }
        // query one: (element, selector, util)
        if script.contains("cssQuerySelector(element, selector)") {
            return match args[1]["value"].as_str() {
                Some(selector) if present.iter().any(|p| p == selector) => {
                    Self::node(&format!("node:{}", selector))
                }
                _ => json!({ "result": { "type": "object", "subtype": "null", "value": null } }),
            };
        }
        json!({ "result": { "type": "number", "value": 42, "description": "42" } })
    }

    /// Create a CDP response for a request
    fn create_cdp_response(req: &Value, present: &[String]) -> Value {
        let method = req["method"].as_str().unwrap_or("unknown");
        let id = req["id"].as_i64().unwrap_or(0);
        let params = &req["params"];

        let result = match method {
            "Runtime.enable" | "DOM.enable" | "Runtime.releaseObject" => json!({}),
            "Runtime.evaluate" if params["expression"] == "globalThis" => {
                json!({ "result": { "type": "object", "className": "Window", "objectId": "global" } })
            }
            "Runtime.evaluate" => json!({ "result": { "type": "object", "objectId": "utility" } }),
            "Runtime.callFunctionOn" => Self::call_function_on(params, present),
            _ => {
                return json!({
                    "id": id,
                    "error": {
                        "code": -32601,
                        "message": format!("'{}' wasn't found", method)
                    }
                })
            }
        };
        json!({ "id": id, "result": result })
    }

    /// Get the WebSocket endpoint URL
    pub fn ws_endpoint(&self) -> &str {
        &self.addr
    }

    /// Number of `Runtime.releaseObject` commands received
    pub fn released_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for MockChromeServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
