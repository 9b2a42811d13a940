//! CDP-backed remote handle
//!
//! Wraps a `Runtime.RemoteObject`. Input goes through `Input.*` commands at
//! coordinates taken from the element's client rect.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::traits::{BoundingBox, ClickOptions, EvalArg, ExecutionWorld, HandleRef, JsHandle};
use super::world::CdpWorld;
use crate::cdp::types::{GetPropertiesResponse, RemoteObject};
use crate::{Error, Result};

const IDENTITY_SCRIPT: &str = "(value) => value";

const CLIENT_RECT_SCRIPT: &str = "(element) => {\
    \n  const rect = element.getBoundingClientRect();\
    \n  return {x: rect.x, y: rect.y, width: rect.width, height: rect.height};\
    \n}";

const FOCUS_SCRIPT: &str = "(element) => element.focus()";

const SCROLL_INTO_VIEW_SCRIPT: &str = "(element) => {\
    \n  element.scrollIntoView({block: 'center', inline: 'center', behavior: 'instant'});\
    \n}";

const INTERSECTION_SCRIPT: &str = "async (element, threshold) => {\
    \n  const visibleRatio = await new Promise(resolve => {\
    \n    const observer = new IntersectionObserver(entries => {\
    \n      resolve(entries[0].intersectionRatio);\
    \n      observer.disconnect();\
    \n    });\
    \n    observer.observe(element);\
    \n  });\
    \n  return threshold === 1 ? visibleRatio === 1 : visibleRatio > threshold;\
    \n}";

const SELECT_SCRIPT: &str = "(element, vals) => {\
    \n  const values = new Set(vals);\
    \n  if (!(element instanceof HTMLSelectElement)) {\
    \n    throw new Error('Element is not a <select> element.');\
    \n  }\
    \n  const selectedValues = new Set();\
    \n  if (!element.multiple) {\
    \n    for (const option of element.options) {\
    \n      option.selected = false;\
    \n    }\
    \n    for (const option of element.options) {\
    \n      if (values.has(option.value)) {\
    \n        option.selected = true;\
    \n        selectedValues.add(option.value);\
    \n        break;\
    \n      }\
    \n    }\
    \n  } else {\
    \n    for (const option of element.options) {\
    \n      option.selected = values.has(option.value);\
    \n      if (option.selected) {\
    \n        selectedValues.add(option.value);\
    \n      }\
    \n    }\
    \n  }\
    \n  element.dispatchEvent(new Event('input', {bubbles: true}));\
    \n  element.dispatchEvent(new Event('change', {bubbles: true}));\
    \n  return [...selectedValues.values()];\
    \n}";

#[derive(Debug, Deserialize)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Remote object handle backed by a CDP session
#[derive(Debug)]
pub struct CdpHandle {
    id: String,
    remote: RemoteObject,
    world: Arc<CdpWorld>,
    disposed: AtomicBool,
}

impl CdpHandle {
    pub fn new(world: Arc<CdpWorld>, remote: RemoteObject) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            remote,
            world,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn remote(&self) -> &RemoteObject {
        &self.remote
    }

    fn this_argument(&self) -> Result<Value> {
        if self.is_disposed() {
            return Err(Error::internal("JSHandle is disposed"));
        }
        Ok(match &self.remote.object_id {
            Some(id) => json!({ "objectId": id }),
            None => json!({ "value": self.remote.local_value() }),
        })
    }

    async fn call(&self, script: &str, args: Vec<EvalArg>, return_by_value: bool) -> Result<RemoteObject> {
        let mut arguments = vec![self.this_argument()?];
        for arg in &args {
            arguments.push(CdpWorld::call_argument(arg).await?);
        }
        self.world.call_function(script, arguments, return_by_value).await
    }

    async fn bounding_box(&self) -> Result<BoundingBox> {
        let rect: Rect = serde_json::from_value(self.evaluate(CLIENT_RECT_SCRIPT, vec![]).await?)?;
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return Err(Error::element_not_ready(
                "Node is either not visible or not an HTMLElement",
            ));
        }
        Ok(BoundingBox {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        })
    }

    async fn mouse_event(&self, event_type: &str, x: f64, y: f64, button: &str, click_count: u32) -> Result<()> {
        self.world
            .send(
                "Input.dispatchMouseEvent",
                json!({
                    "type": event_type,
                    "x": x,
                    "y": y,
                    "button": button,
                    "clickCount": click_count,
                }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JsHandle for CdpHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn remote_object_id(&self) -> Option<&str> {
        self.remote.object_id.as_deref()
    }

    fn is_element(&self) -> bool {
        self.remote.is_node()
    }

    fn world(&self) -> Arc<dyn ExecutionWorld> {
        self.world.clone()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(object_id) = &self.remote.object_id {
            self.world
                .send("Runtime.releaseObject", json!({ "objectId": object_id }))
                .await?;
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str, args: Vec<EvalArg>) -> Result<Value> {
        Ok(self.call(script, args, true).await?.local_value())
    }

    async fn evaluate_handle(&self, script: &str, args: Vec<EvalArg>) -> Result<HandleRef> {
        let remote = self.call(script, args, false).await?;
        self.world.wrap(remote)
    }

    async fn json_value(&self) -> Result<Value> {
        if self.remote.object_id.is_none() {
            return Ok(self.remote.local_value());
        }
        self.evaluate(IDENTITY_SCRIPT, vec![]).await
    }

    async fn array_items(&self) -> Result<Vec<HandleRef>> {
        let object_id = self
            .remote
            .object_id
            .as_ref()
            .ok_or_else(|| Error::internal("Cannot list properties of a primitive"))?;
        let response: GetPropertiesResponse = serde_json::from_value(
            self.world
                .send(
                    "Runtime.getProperties",
                    json!({ "objectId": object_id, "ownProperties": true }),
                )
                .await?,
        )?;

        let mut indexed: Vec<(usize, RemoteObject)> = response
            .result
            .into_iter()
            .filter(|property| property.enumerable)
            .filter_map(|property| Some((property.name.parse().ok()?, property.value?)))
            .collect();
        indexed.sort_by_key(|(index, _)| *index);
        indexed
            .into_iter()
            .map(|(_, remote)| self.world.wrap(remote))
            .collect()
    }

    #[instrument(skip(self))]
    async fn click(&self, options: &ClickOptions) -> Result<()> {
        let bbox = self.bounding_box().await?;
        let (x, y) = match options.offset {
            Some(offset) => (bbox.x + offset.x, bbox.y + offset.y),
            None => (bbox.x + bbox.width / 2.0, bbox.y + bbox.height / 2.0),
        };
        let button = options.button.as_str();
        debug!("Clicking {} at ({}, {})", self.id, x, y);

        self.mouse_event("mouseMoved", x, y, "none", 0).await?;
        for click_count in 1..=options.count.max(1) {
            self.mouse_event("mousePressed", x, y, button, click_count).await?;
            if options.delay > 0 {
                tokio::time::sleep(Duration::from_millis(options.delay)).await;
            }
            self.mouse_event("mouseReleased", x, y, button, click_count).await?;
        }
        Ok(())
    }

    async fn hover(&self) -> Result<()> {
        let bbox = self.bounding_box().await?;
        self.mouse_event(
            "mouseMoved",
            bbox.x + bbox.width / 2.0,
            bbox.y + bbox.height / 2.0,
            "none",
            0,
        )
        .await
    }

    async fn focus(&self) -> Result<()> {
        self.evaluate(FOCUS_SCRIPT, vec![]).await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.focus().await?;
        for ch in text.chars() {
            self.world
                .send(
                    "Input.dispatchKeyEvent",
                    json!({
                        "type": "char",
                        "text": ch.to_string(),
                    }),
                )
                .await?;
        }
        Ok(())
    }

    async fn select(&self, values: &[String]) -> Result<Vec<String>> {
        let selected = self.evaluate(SELECT_SCRIPT, vec![json!(values).into()]).await?;
        Ok(serde_json::from_value(selected)?)
    }

    async fn scroll_into_view(&self) -> Result<()> {
        let object_id = self
            .remote
            .object_id
            .as_ref()
            .ok_or_else(|| Error::internal("Cannot scroll a primitive into view"))?;
        let scrolled = self
            .world
            .send("DOM.scrollIntoViewIfNeeded", json!({ "objectId": object_id }))
            .await;
        if let Err(e) = scrolled {
            debug!("DOM.scrollIntoViewIfNeeded failed, falling back to script: {}", e);
            self.evaluate(SCROLL_INTO_VIEW_SCRIPT, vec![]).await?;
        }
        Ok(())
    }

    async fn is_intersecting_viewport(&self, threshold: f64) -> Result<bool> {
        let visible = self.evaluate(INTERSECTION_SCRIPT, vec![json!(threshold).into()]).await?;
        Ok(visible.as_bool().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::MockCdpConnection;
    use crate::session::traits::{MouseButton, Offset};

    fn element_responder(method: &str, params: &Value) -> Result<Value> {
        match method {
            "Runtime.evaluate" => Ok(json!({ "result": { "type": "object", "objectId": "global" } })),
            "Runtime.callFunctionOn" => {
                let script = params["functionDeclaration"].as_str().unwrap_or_default();
                if script == CLIENT_RECT_SCRIPT {
                    Ok(json!({ "result": { "type": "object", "value": { "x": 10.0, "y": 20.0, "width": 100.0, "height": 40.0 } } }))
                } else {
                    Ok(json!({ "result": { "type": "undefined" } }))
                }
            }
            "Runtime.getProperties" => Ok(json!({
                "result": [
                    { "name": "1", "enumerable": true, "value": { "type": "object", "subtype": "node", "objectId": "b" } },
                    { "name": "length", "enumerable": false, "value": { "type": "number", "value": 2 } },
                    { "name": "0", "enumerable": true, "value": { "type": "object", "subtype": "node", "objectId": "a" } }
                ]
            })),
            _ => Ok(json!({})),
        }
    }

    fn element(conn: Arc<MockCdpConnection>) -> CdpHandle {
        let world = CdpWorld::new(conn, "({})");
        CdpHandle::new(
            world,
            RemoteObject {
                r#type: "object".into(),
                subtype: Some("node".into()),
                object_id: Some("el".into()),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_click_presses_at_center() {
        let conn = Arc::new(MockCdpConnection::with_responder(element_responder));
        let handle = element(conn.clone());

        handle.click(&ClickOptions::default()).await.unwrap();

        let events = conn.calls_to("Input.dispatchMouseEvent");
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["type"], "mouseMoved");
        assert_eq!(events[1]["type"], "mousePressed");
        assert_eq!(events[1]["x"], 60.0);
        assert_eq!(events[1]["y"], 40.0);
        assert_eq!(events[2]["type"], "mouseReleased");
    }

    #[tokio::test]
    async fn test_double_click_with_offset() {
        let conn = Arc::new(MockCdpConnection::with_responder(element_responder));
        let handle = element(conn.clone());

        handle
            .click(&ClickOptions {
                button: MouseButton::Right,
                count: 2,
                delay: 0,
                offset: Some(Offset { x: 5.0, y: 5.0 }),
            })
            .await
            .unwrap();

        let events = conn.calls_to("Input.dispatchMouseEvent");
        assert_eq!(events.len(), 5);
        assert_eq!(events[3]["clickCount"], 2);
        assert_eq!(events[3]["button"], "right");
        assert_eq!(events[3]["x"], 15.0);
    }

    #[tokio::test]
    async fn test_array_items_sorted_by_index() {
        let conn = Arc::new(MockCdpConnection::with_responder(element_responder));
        let handle = element(conn);

        let items = handle.array_items().await.unwrap();
        let ids: Vec<_> = items.iter().map(|h| h.remote_object_id().unwrap().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_dispose_releases_once() {
        let conn = Arc::new(MockCdpConnection::with_responder(element_responder));
        let handle = element(conn.clone());

        handle.dispose().await.unwrap();
        handle.dispose().await.unwrap();

        assert!(handle.is_disposed());
        assert_eq!(conn.calls_to("Runtime.releaseObject").len(), 1);
        assert!(handle.evaluate("(e) => e", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_type_text_sends_chars() {
        let conn = Arc::new(MockCdpConnection::with_responder(element_responder));
        let handle = element(conn.clone());

        handle.type_text("hé").await.unwrap();

        let keys = conn.calls_to("Input.dispatchKeyEvent");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1]["text"], "é");
    }
}
