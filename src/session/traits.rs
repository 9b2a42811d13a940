//! Session collaborator traits
//!
//! This module defines the abstract interfaces the locator layer consumes:
//! page (or frame) scope, execution world and remote handles.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

use crate::cdp::types::AxNode;

/// Shared reference to a remote object
pub type HandleRef = Arc<dyn JsHandle>;

/// Argument passed to a remotely evaluated function
#[derive(Debug, Clone)]
pub enum EvalArg {
    /// Serializable value passed by value
    Value(Value),
    /// Remote object passed by reference
    Handle(HandleRef),
    /// JavaScript `undefined`
    Undefined,
}

impl From<Value> for EvalArg {
    fn from(value: Value) -> Self {
        EvalArg::Value(value)
    }
}

impl From<&str> for EvalArg {
    fn from(value: &str) -> Self {
        EvalArg::Value(Value::String(value.to_string()))
    }
}

impl From<String> for EvalArg {
    fn from(value: String) -> Self {
        EvalArg::Value(Value::String(value))
    }
}

impl From<HandleRef> for EvalArg {
    fn from(handle: HandleRef) -> Self {
        EvalArg::Handle(handle)
    }
}

impl From<&HandleRef> for EvalArg {
    fn from(handle: &HandleRef) -> Self {
        EvalArg::Handle(Arc::clone(handle))
    }
}

impl From<Option<HandleRef>> for EvalArg {
    fn from(handle: Option<HandleRef>) -> Self {
        handle.map_or(EvalArg::Undefined, EvalArg::Handle)
    }
}

/// How `wait_for_function` re-evaluates its predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polling {
    /// Every animation frame
    Raf,
    /// Whenever the DOM mutates
    #[default]
    Mutation,
    /// Fixed interval in milliseconds
    Interval(u64),
}

/// Options for `wait_for_function`
#[derive(Debug, Clone, Default)]
pub struct WaitForFunctionOptions {
    /// Timeout in milliseconds, 0 waits forever
    pub timeout: u64,
    pub polling: Polling,
}

/// Options for `wait_for_selector`
#[derive(Debug, Clone, Default)]
pub struct WaitForSelectorOptions {
    /// Timeout in milliseconds, 0 waits forever
    pub timeout: u64,
    /// Wait until the element is rendered
    pub visible: bool,
    /// Wait until the element is absent or not rendered
    pub hidden: bool,
}

type BindingFn = dyn Fn(Vec<HandleRef>) -> BoxFuture<'static, crate::Result<EvalArg>> + Send + Sync;

/// Host function exposed to page scripts under `name`
#[derive(Clone)]
pub struct PageBinding {
    pub name: String,
    pub function: Arc<BindingFn>,
}

impl PageBinding {
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(Vec<HandleRef>) -> BoxFuture<'static, crate::Result<EvalArg>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            function: Arc::new(function),
        }
    }
}

impl std::fmt::Debug for PageBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBinding").field("name", &self.name).finish()
    }
}

/// Mouse button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
    Back,
    Forward,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
            MouseButton::Back => "back",
            MouseButton::Forward => "forward",
        }
    }
}

/// Point relative to the element's top-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Offset {
    pub x: f64,
    pub y: f64,
}

/// Element click options
#[derive(Debug, Clone, PartialEq)]
pub struct ClickOptions {
    pub button: MouseButton,
    /// Number of press/release pairs
    pub count: u32,
    /// Milliseconds between press and release
    pub delay: u64,
    /// Click point, the element's center when absent
    pub offset: Option<Offset>,
}

impl Default for ClickOptions {
    fn default() -> Self {
        Self {
            button: MouseButton::Left,
            count: 1,
            delay: 0,
            offset: None,
        }
    }
}

/// Element bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Remote object handle
///
/// Handles must be disposed once; dropping the last reference does not
/// release the remote object.
#[async_trait]
pub trait JsHandle: Send + Sync + std::fmt::Debug {
    /// Local identifier, unique per handle
    fn id(&self) -> &str;

    /// Remote object reference, absent for by-value results
    fn remote_object_id(&self) -> Option<&str>;

    /// Whether the remote object is a DOM element
    fn is_element(&self) -> bool;

    /// World the handle lives in
    fn world(&self) -> Arc<dyn ExecutionWorld>;

    /// Whether `dispose` has completed
    fn is_disposed(&self) -> bool;

    /// Release the remote object; later calls are no-ops
    async fn dispose(&self) -> Result<(), crate::Error>;

    /// Call `script` with this handle as the first argument
    async fn evaluate(&self, script: &str, args: Vec<EvalArg>) -> Result<Value, crate::Error>;

    /// Like `evaluate`, returning a handle to the result
    async fn evaluate_handle(&self, script: &str, args: Vec<EvalArg>) -> Result<HandleRef, crate::Error>;

    /// JSON serialization of the remote object
    async fn json_value(&self) -> Result<Value, crate::Error>;

    /// Handles for the indexed items of a remote array
    async fn array_items(&self) -> Result<Vec<HandleRef>, crate::Error>;

    async fn click(&self, options: &ClickOptions) -> Result<(), crate::Error>;

    async fn hover(&self) -> Result<(), crate::Error>;

    async fn focus(&self) -> Result<(), crate::Error>;

    /// Type `text` into the focused element
    async fn type_text(&self, text: &str) -> Result<(), crate::Error>;

    /// Select options of a `<select>` by value, returning the selected values
    async fn select(&self, values: &[String]) -> Result<Vec<String>, crate::Error>;

    async fn scroll_into_view(&self) -> Result<(), crate::Error>;

    /// Whether at least `threshold` of the element intersects the viewport
    async fn is_intersecting_viewport(&self, threshold: f64) -> Result<bool, crate::Error>;
}

/// JavaScript realm in which handles live and scripts run
#[async_trait]
pub trait ExecutionWorld: Send + Sync + std::fmt::Debug {
    /// Lazily resolved handle to the injected utility bundle
    async fn injected_utility(&self) -> Result<HandleRef, crate::Error>;

    async fn evaluate_function(&self, script: &str, args: Vec<EvalArg>) -> Result<Value, crate::Error>;

    async fn evaluate_function_handle(
        &self,
        script: &str,
        args: Vec<EvalArg>,
    ) -> Result<HandleRef, crate::Error>;

    /// Poll `script` until it returns a truthy value
    async fn wait_for_function(
        &self,
        script: &str,
        options: WaitForFunctionOptions,
        bindings: Vec<PageBinding>,
        args: Vec<EvalArg>,
    ) -> Result<HandleRef, crate::Error>;

    /// Accessibility nodes under `root` matching the accessible name and role
    async fn query_ax_tree(
        &self,
        root: &dyn JsHandle,
        name: Option<&str>,
        role: Option<&str>,
    ) -> Result<Vec<AxNode>, crate::Error>;

    /// Handle for a DOM node known by backend id
    async fn adopt_backend_node(&self, backend_node_id: i64) -> Result<HandleRef, crate::Error>;
}

/// Page or frame scope
#[async_trait]
pub trait PageContext: Send + Sync + std::fmt::Debug {
    /// Get page ID
    fn id(&self) -> &str;

    /// Wait for a selector to match; `None` when waiting for `hidden` succeeded
    async fn wait_for_selector(
        &self,
        selector: &str,
        options: WaitForSelectorOptions,
    ) -> Result<Option<HandleRef>, crate::Error>;

    /// Poll `script` until it returns a truthy value
    async fn wait_for_function(
        &self,
        script: &str,
        options: WaitForFunctionOptions,
        args: Vec<EvalArg>,
    ) -> Result<HandleRef, crate::Error>;

    async fn evaluate_function(&self, script: &str, args: Vec<EvalArg>) -> Result<Value, crate::Error>;

    async fn evaluate_function_handle(
        &self,
        script: &str,
        args: Vec<EvalArg>,
    ) -> Result<HandleRef, crate::Error>;

    /// First element matching `selector`
    async fn query_selector(&self, selector: &str) -> Result<Option<HandleRef>, crate::Error>;

    /// Every element matching `selector`
    async fn query_selector_all(&self, selector: &str) -> Result<Vec<HandleRef>, crate::Error>;
}
