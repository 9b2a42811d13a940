//! CDP (Chrome DevTools Protocol) type definitions
//!
//! Wire structures for the JSON-RPC envelope plus the handful of Runtime,
//! DOM and Accessibility payloads the locator layer reads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// CDP JSON-RPC request
#[derive(Debug, Clone, Serialize)]
pub struct CdpRequest {
    /// Request ID
    pub id: u64,
    /// Method name (e.g., "Runtime.callFunctionOn")
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Session ID for multi-session targets
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// CDP JSON-RPC notification (event)
#[derive(Debug, Clone, Deserialize)]
pub struct CdpNotification {
    /// Event method
    pub method: String,
    /// Event parameters
    #[serde(default)]
    pub params: Value,
    /// Session ID for multi-session targets
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

/// CDP JSON-RPC response
#[derive(Debug, Clone, Deserialize)]
pub struct CdpRpcResponse {
    /// Response ID (matches request ID)
    pub id: u64,
    /// Response result
    #[serde(default)]
    pub result: Value,
    /// Error if any
    #[serde(default)]
    pub error: Option<CdpErrorDetail>,
}

/// CDP error detail
#[derive(Debug, Clone, Deserialize)]
pub struct CdpErrorDetail {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(default)]
    pub data: Option<Value>,
}

/// Remote object (result of JavaScript evaluation)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    /// Object type
    #[serde(default)]
    pub r#type: String,
    /// Object subtype ("node", "array", "null", ...)
    #[serde(default)]
    pub subtype: Option<String>,
    /// Remote reference, absent for primitives returned by value
    #[serde(default)]
    pub object_id: Option<String>,
    /// Object value
    #[serde(default)]
    pub value: Option<Value>,
    /// Object description
    #[serde(default)]
    pub description: Option<String>,
    /// Unserializable value
    #[serde(default)]
    pub unserializable_value: Option<String>,
}

impl RemoteObject {
    /// Whether the object is a DOM node
    pub fn is_node(&self) -> bool {
        self.subtype.as_deref() == Some("node")
    }

    /// JSON value of a primitive result; unserializable numbers become null
    pub fn local_value(&self) -> Value {
        match (&self.value, self.unserializable_value.as_deref()) {
            (Some(value), _) => value.clone(),
            (None, Some("-0")) => Value::from(0),
            _ => Value::Null,
        }
    }
}

/// Exception details
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    /// Exception ID
    #[serde(default)]
    pub exception_id: i32,
    /// Exception text
    #[serde(default)]
    pub text: Option<String>,
    /// Exception object
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    /// Human readable message, preferring the thrown error's description
    pub fn message(&self) -> String {
        self.exception
            .as_ref()
            .and_then(|e| e.description.clone())
            .or_else(|| self.text.clone())
            .unwrap_or_else(|| "Evaluation failed".to_string())
    }
}

/// `Runtime.callFunctionOn` / `Runtime.evaluate` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
    /// Evaluation result
    #[serde(default)]
    pub result: RemoteObject,
    /// Exception details if evaluation failed
    #[serde(default)]
    pub exception_details: Option<ExceptionDetails>,
}

/// `Runtime.getProperties` entry
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default)]
    pub value: Option<RemoteObject>,
    #[serde(default)]
    pub enumerable: bool,
}

/// `Runtime.getProperties` response
#[derive(Debug, Clone, Deserialize)]
pub struct GetPropertiesResponse {
    #[serde(default)]
    pub result: Vec<PropertyDescriptor>,
}

/// Accessibility tree value wrapper (`{"type": .., "value": ..}`)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AxValue {
    #[serde(default)]
    pub value: Option<Value>,
}

impl AxValue {
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str)
    }
}

/// Accessibility node as returned by `Accessibility.queryAXTree`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxNode {
    pub node_id: String,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub role: Option<AxValue>,
    #[serde(default)]
    pub name: Option<AxValue>,
    #[serde(rename = "backendDOMNodeId", default)]
    pub backend_dom_node_id: Option<i64>,
}

impl AxNode {
    pub fn role(&self) -> Option<&str> {
        self.role.as_ref().and_then(AxValue::as_str)
    }
}

/// `Accessibility.queryAXTree` response
#[derive(Debug, Clone, Deserialize)]
pub struct QueryAxTreeResponse {
    #[serde(default)]
    pub nodes: Vec<AxNode>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cdp_request_serialization() {
        let request = CdpRequest {
            id: 1,
            method: "Runtime.callFunctionOn".to_string(),
            params: Some(json!({ "functionDeclaration": "() => 1" })),
            session_id: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"Runtime.callFunctionOn\""));
        assert!(!json.contains("sessionId"));
    }

    #[test]
    fn test_cdp_request_without_params() {
        let request = CdpRequest {
            id: 2,
            method: "Runtime.enable".to_string(),
            params: None,
            session_id: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("\"params\""));
    }

    #[test]
    fn test_evaluate_response_with_exception() {
        let response: EvaluateResponse = serde_json::from_value(json!({
            "result": { "type": "object", "subtype": "error", "objectId": "1.2" },
            "exceptionDetails": {
                "exceptionId": 3,
                "text": "Uncaught",
                "exception": { "type": "object", "description": "TypeError: boom" }
            }
        }))
        .unwrap();

        assert_eq!(response.result.object_id.as_deref(), Some("1.2"));
        assert_eq!(response.exception_details.unwrap().message(), "TypeError: boom");
    }

    #[test]
    fn test_remote_node_detection() {
        let node: RemoteObject =
            serde_json::from_value(json!({ "type": "object", "subtype": "node", "objectId": "9" }))
                .unwrap();
        assert!(node.is_node());
        assert_eq!(node.local_value(), Value::Null);
    }

    #[test]
    fn test_ax_node_backend_id() {
        let response: QueryAxTreeResponse = serde_json::from_value(json!({
            "nodes": [
                { "nodeId": "1", "ignored": false, "role": { "type": "role", "value": "button" }, "backendDOMNodeId": 42 },
                { "nodeId": "2", "ignored": true }
            ]
        }))
        .unwrap();

        assert_eq!(response.nodes[0].role(), Some("button"));
        assert_eq!(response.nodes[0].backend_dom_node_id, Some(42));
        assert!(response.nodes[1].ignored);
    }
}
