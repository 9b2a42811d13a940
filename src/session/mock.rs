//! Mock session implementation for testing
//!
//! `MockPage` serves elements registered under exact selectors and scripted
//! page functions. Every handle it hands out is tracked in a ledger so tests
//! can assert that nothing was leaked.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::traits::{
    ClickOptions, EvalArg, ExecutionWorld, HandleRef, JsHandle, PageBinding, PageContext,
    WaitForFunctionOptions, WaitForSelectorOptions,
};
use crate::cdp::types::AxNode;
use crate::locator::actions::{
    ASSIGN_VALUE_SCRIPT, CLEAR_VALUE_SCRIPT, DISABLED_SCRIPT, FILL_KIND_SCRIPT, SCROLL_SCRIPT,
    STABLE_BOUNDING_BOX_SCRIPT, TEXT_VALUE_SCRIPT,
};
use crate::locator::FillKind;
use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn arg_value(args: &[EvalArg], index: usize) -> Value {
    match args.get(index) {
        Some(EvalArg::Value(value)) => value.clone(),
        _ => Value::Null,
    }
}

/// Recorded state of a mock element
#[derive(Debug, Clone)]
struct ElementState {
    kind: FillKind,
    value: String,
    json: Value,
    disabled: bool,
    visible: bool,
    intersecting: bool,
    unstable_checks: u32,
    typed: Vec<String>,
    assigned: Vec<String>,
    clears: usize,
    clicks: Vec<ClickOptions>,
    hovers: usize,
    focuses: usize,
    selected: Vec<Vec<String>>,
    scrolls: Vec<(Option<f64>, Option<f64>)>,
    scrolled_into_view: usize,
}

/// Mock DOM element; clones share state
#[derive(Debug, Clone)]
pub struct MockElement {
    state: Arc<Mutex<ElementState>>,
}

impl MockElement {
    pub fn new(kind: FillKind) -> Self {
        Self {
            state: Arc::new(Mutex::new(ElementState {
                kind,
                value: String::new(),
                json: Value::Null,
                disabled: false,
                visible: true,
                intersecting: true,
                unstable_checks: 0,
                typed: Vec::new(),
                assigned: Vec::new(),
                clears: 0,
                clicks: Vec::new(),
                hovers: 0,
                focuses: 0,
                selected: Vec::new(),
                scrolls: Vec::new(),
                scrolled_into_view: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ElementState> {
        lock(&self.state)
    }

    pub fn with_value(self, value: &str) -> Self {
        self.state().value = value.to_string();
        self
    }

    /// Value reported by `json_value`
    pub fn with_json(self, json: Value) -> Self {
        self.state().json = json;
        self
    }

    pub fn disabled(self) -> Self {
        self.set_disabled(true);
        self
    }

    pub fn hidden(self) -> Self {
        self.set_visible(false);
        self
    }

    pub fn outside_viewport(self) -> Self {
        self.state().intersecting = false;
        self
    }

    /// Fail the next `checks` bounding box stability checks
    pub fn unstable_for(self, checks: u32) -> Self {
        self.state().unstable_checks = checks;
        self
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.state().disabled = disabled;
    }

    pub fn set_visible(&self, visible: bool) {
        self.state().visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.state().visible
    }

    pub fn same_as(&self, other: &MockElement) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn value(&self) -> String {
        self.state().value.clone()
    }

    /// Text passed to each `type_text` call
    pub fn typed(&self) -> Vec<String> {
        self.state().typed.clone()
    }

    /// Values assigned directly (non-typeable inputs)
    pub fn assigned(&self) -> Vec<String> {
        self.state().assigned.clone()
    }

    pub fn clear_count(&self) -> usize {
        self.state().clears
    }

    pub fn clicks(&self) -> Vec<ClickOptions> {
        self.state().clicks.clone()
    }

    pub fn hover_count(&self) -> usize {
        self.state().hovers
    }

    pub fn focus_count(&self) -> usize {
        self.state().focuses
    }

    pub fn selected(&self) -> Vec<Vec<String>> {
        self.state().selected.clone()
    }

    pub fn scrolls(&self) -> Vec<(Option<f64>, Option<f64>)> {
        self.state().scrolls.clone()
    }

    pub fn scroll_into_view_count(&self) -> usize {
        self.state().scrolled_into_view
    }
}

/// What a mock handle refers to
#[derive(Debug, Clone)]
pub enum MockValue {
    Json(Value),
    Element(MockElement),
}

impl From<Value> for MockValue {
    fn from(value: Value) -> Self {
        MockValue::Json(value)
    }
}

impl From<MockElement> for MockValue {
    fn from(element: MockElement) -> Self {
        MockValue::Element(element)
    }
}

type Predicate = Arc<dyn Fn(&MockElement) -> bool + Send + Sync>;
type Mapper = Arc<dyn Fn(&MockElement) -> MockValue + Send + Sync>;

#[derive(Debug)]
struct FunctionBehaviour {
    failures_left: u32,
    result: MockValue,
    calls: u32,
}

#[derive(Default)]
struct MockInner {
    elements: Mutex<HashMap<String, MockElement>>,
    delays: Mutex<HashMap<String, Duration>>,
    functions: Mutex<HashMap<String, FunctionBehaviour>>,
    predicates: Mutex<HashMap<String, Predicate>>,
    mappers: Mutex<HashMap<String, Mapper>>,
    live: Mutex<HashMap<String, MockValue>>,
    created: AtomicUsize,
}

impl std::fmt::Debug for MockInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockInner")
            .field("live", &lock(&self.live).len())
            .field("created", &self.created.load(Ordering::SeqCst))
            .finish()
    }
}

impl MockInner {
    fn new_handle(self: &Arc<Self>, target: MockValue) -> HandleRef {
        let handle = MockHandle {
            id: Uuid::new_v4().to_string(),
            target: target.clone(),
            inner: self.clone(),
            disposed: AtomicBool::new(false),
        };
        lock(&self.live).insert(handle.id.clone(), target);
        self.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(handle)
    }

    /// One invocation of a scripted page function
    fn call_function(&self, script: &str) -> Result<MockValue> {
        let mut functions = lock(&self.functions);
        let behaviour = functions
            .get_mut(script)
            .ok_or_else(|| Error::script_execution_failed(format!("No mock behaviour for {}", script)))?;
        behaviour.calls += 1;
        if behaviour.failures_left > 0 {
            behaviour.failures_left -= 1;
            return Err(Error::script_execution_failed("Scripted failure"));
        }
        Ok(behaviour.result.clone())
    }

    fn element_of(&self, handle: &dyn JsHandle) -> Option<MockElement> {
        match lock(&self.live).get(handle.id()) {
            Some(MockValue::Element(element)) => Some(element.clone()),
            _ => None,
        }
    }

    async fn wait_for_predicate(
        self: &Arc<Self>,
        predicate: Predicate,
        element: MockElement,
        timeout: u64,
    ) -> Result<HandleRef> {
        let deadline = (timeout > 0).then(|| Instant::now() + Duration::from_millis(timeout));
        loop {
            if predicate(&element) {
                return Ok(self.new_handle(MockValue::Json(Value::Bool(true))));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(Error::timeout(format!("Waiting failed: {}ms exceeded", timeout)));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Mock page
#[derive(Debug)]
pub struct MockPage {
    id: String,
    inner: Arc<MockInner>,
}

impl MockPage {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            inner: Arc::new(MockInner::default()),
        }
    }

    /// Serve `element` for the exact `selector`
    pub fn add_element(&self, selector: &str, element: MockElement) {
        lock(&self.inner.elements).insert(selector.to_string(), element);
    }

    pub fn remove_element(&self, selector: &str) {
        lock(&self.inner.elements).remove(selector);
    }

    /// Delay before `wait_for_selector` starts looking for `selector`
    pub fn delay_selector(&self, selector: &str, delay: Duration) {
        lock(&self.inner.delays).insert(selector.to_string(), delay);
    }

    /// Make `script` fail `failures` times, then produce `result`
    pub fn on_function(&self, script: &str, failures: u32, result: impl Into<MockValue>) {
        lock(&self.inner.functions).insert(
            script.to_string(),
            FunctionBehaviour {
                failures_left: failures,
                result: result.into(),
                calls: 0,
            },
        );
    }

    pub fn function_calls(&self, script: &str) -> u32 {
        lock(&self.inner.functions)
            .get(script)
            .map_or(0, |behaviour| behaviour.calls)
    }

    /// Element predicate answered for `script` by `wait_for_function`
    pub fn add_predicate<F>(&self, script: &str, predicate: F)
    where
        F: Fn(&MockElement) -> bool + Send + Sync + 'static,
    {
        lock(&self.inner.predicates).insert(script.to_string(), Arc::new(predicate));
    }

    /// Element mapping answered for `script` by `evaluate_handle`
    pub fn add_mapper<F>(&self, script: &str, mapper: F)
    where
        F: Fn(&MockElement) -> MockValue + Send + Sync + 'static,
    {
        lock(&self.inner.mappers).insert(script.to_string(), Arc::new(mapper));
    }

    /// Handles created and not yet disposed
    pub fn live_handle_count(&self) -> usize {
        lock(&self.inner.live).len()
    }

    pub fn created_handle_count(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    /// Element behind a live handle
    pub fn element_of(&self, handle: &HandleRef) -> Option<MockElement> {
        self.inner.element_of(handle.as_ref())
    }

    pub fn world(&self) -> Arc<MockWorld> {
        Arc::new(MockWorld {
            inner: self.inner.clone(),
        })
    }
}

impl Default for MockPage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageContext for MockPage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        options: WaitForSelectorOptions,
    ) -> Result<Option<HandleRef>> {
        let delay = lock(&self.inner.delays).get(selector).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let deadline =
            (options.timeout > 0).then(|| Instant::now() + Duration::from_millis(options.timeout));
        loop {
            let element = lock(&self.inner.elements).get(selector).cloned();
            match element {
                Some(element) if options.hidden && !element.is_visible() => {
                    return Ok(Some(self.inner.new_handle(element.into())));
                }
                None if options.hidden => return Ok(None),
                Some(element) if !options.hidden && (!options.visible || element.is_visible()) => {
                    return Ok(Some(self.inner.new_handle(element.into())));
                }
                _ => {}
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(Error::timeout(format!(
                    "Waiting for selector `{}` failed: {}ms exceeded",
                    selector, options.timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_function(
        &self,
        script: &str,
        _options: WaitForFunctionOptions,
        _args: Vec<EvalArg>,
    ) -> Result<HandleRef> {
        let result = self.inner.call_function(script)?;
        Ok(self.inner.new_handle(result))
    }

    async fn evaluate_function(&self, script: &str, _args: Vec<EvalArg>) -> Result<Value> {
        match self.inner.call_function(script)? {
            MockValue::Json(value) => Ok(value),
            MockValue::Element(element) => Ok(element.state().json.clone()),
        }
    }

    async fn evaluate_function_handle(&self, script: &str, _args: Vec<EvalArg>) -> Result<HandleRef> {
        let result = self.inner.call_function(script)?;
        Ok(self.inner.new_handle(result))
    }

    async fn query_selector(&self, selector: &str) -> Result<Option<HandleRef>> {
        let element = lock(&self.inner.elements).get(selector).cloned();
        Ok(element.map(|element| self.inner.new_handle(element.into())))
    }

    async fn query_selector_all(&self, selector: &str) -> Result<Vec<HandleRef>> {
        Ok(self.query_selector(selector).await?.into_iter().collect())
    }
}

/// Mock execution world sharing its page's elements and ledger
#[derive(Debug)]
pub struct MockWorld {
    inner: Arc<MockInner>,
}

#[async_trait]
impl ExecutionWorld for MockWorld {
    async fn injected_utility(&self) -> Result<HandleRef> {
        Ok(self.inner.new_handle(MockValue::Json(json!({}))))
    }

    async fn evaluate_function(&self, script: &str, _args: Vec<EvalArg>) -> Result<Value> {
        match self.inner.call_function(script)? {
            MockValue::Json(value) => Ok(value),
            MockValue::Element(element) => Ok(element.state().json.clone()),
        }
    }

    async fn evaluate_function_handle(&self, script: &str, _args: Vec<EvalArg>) -> Result<HandleRef> {
        let result = self.inner.call_function(script)?;
        Ok(self.inner.new_handle(result))
    }

    async fn wait_for_function(
        &self,
        script: &str,
        options: WaitForFunctionOptions,
        _bindings: Vec<PageBinding>,
        args: Vec<EvalArg>,
    ) -> Result<HandleRef> {
        let predicate = lock(&self.inner.predicates).get(script).cloned();
        let element = match args.first() {
            Some(EvalArg::Handle(handle)) => self.inner.element_of(handle.as_ref()),
            _ => None,
        };
        match (predicate, element) {
            (Some(predicate), Some(element)) => {
                self.inner
                    .wait_for_predicate(predicate, element, options.timeout)
                    .await
            }
            _ => {
                let result = self.inner.call_function(script)?;
                Ok(self.inner.new_handle(result))
            }
        }
    }

    async fn query_ax_tree(
        &self,
        _root: &dyn JsHandle,
        _name: Option<&str>,
        _role: Option<&str>,
    ) -> Result<Vec<AxNode>> {
        Ok(Vec::new())
    }

    async fn adopt_backend_node(&self, backend_node_id: i64) -> Result<HandleRef> {
        Err(Error::element_not_found(format!("backend node {}", backend_node_id)))
    }
}

/// Mock handle
#[derive(Debug)]
pub struct MockHandle {
    id: String,
    target: MockValue,
    inner: Arc<MockInner>,
    disposed: AtomicBool,
}

impl MockHandle {
    fn element(&self) -> Result<&MockElement> {
        if self.is_disposed() {
            return Err(Error::internal("JSHandle is disposed"));
        }
        match &self.target {
            MockValue::Element(element) => Ok(element),
            MockValue::Json(_) => Err(Error::script_execution_failed("Handle is not an element")),
        }
    }

    fn run_element_script(element: &MockElement, script: &str, args: &[EvalArg]) -> Result<Value> {
        let mut state = element.state();
        match script {
            STABLE_BOUNDING_BOX_SCRIPT => {
                if state.unstable_checks > 0 {
                    state.unstable_checks -= 1;
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(true))
            }
            DISABLED_SCRIPT => Ok(Value::Bool(state.disabled)),
            FILL_KIND_SCRIPT => Ok(serde_json::to_value(state.kind)?),
            TEXT_VALUE_SCRIPT => Ok(Value::String(state.value.clone())),
            CLEAR_VALUE_SCRIPT => {
                state.value.clear();
                state.clears += 1;
                Ok(Value::Null)
            }
            ASSIGN_VALUE_SCRIPT => {
                let value = arg_value(args, 0).as_str().unwrap_or_default().to_string();
                state.value = value.clone();
                state.assigned.push(value);
                Ok(Value::Null)
            }
            SCROLL_SCRIPT => {
                let scroll = (arg_value(args, 0).as_f64(), arg_value(args, 1).as_f64());
                state.scrolls.push(scroll);
                Ok(Value::Null)
            }
            _ => Err(Error::script_execution_failed(format!(
                "Mock element cannot evaluate {}",
                script
            ))),
        }
    }
}

#[async_trait]
impl JsHandle for MockHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn remote_object_id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn is_element(&self) -> bool {
        matches!(self.target, MockValue::Element(_))
    }

    fn world(&self) -> Arc<dyn ExecutionWorld> {
        Arc::new(MockWorld {
            inner: self.inner.clone(),
        })
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn dispose(&self) -> Result<()> {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            lock(&self.inner.live).remove(&self.id);
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str, args: Vec<EvalArg>) -> Result<Value> {
        Self::run_element_script(self.element()?, script, &args)
    }

    async fn evaluate_handle(&self, script: &str, _args: Vec<EvalArg>) -> Result<HandleRef> {
        let element = self.element()?;
        let mapper = lock(&self.inner.mappers).get(script).cloned();
        match mapper {
            Some(mapper) => Ok(self.inner.new_handle(mapper(element))),
            None => Err(Error::script_execution_failed(format!(
                "Mock element cannot evaluate {}",
                script
            ))),
        }
    }

    async fn json_value(&self) -> Result<Value> {
        if self.is_disposed() {
            return Err(Error::internal("JSHandle is disposed"));
        }
        match &self.target {
            MockValue::Json(value) => Ok(value.clone()),
            MockValue::Element(element) => Ok(element.state().json.clone()),
        }
    }

    async fn array_items(&self) -> Result<Vec<HandleRef>> {
        match self.json_value().await? {
            Value::Array(items) => Ok(items
                .into_iter()
                .map(|item| self.inner.new_handle(MockValue::Json(item)))
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn click(&self, options: &ClickOptions) -> Result<()> {
        let element = self.element()?;
        let mut state = element.state();
        if !state.visible {
            return Err(Error::element_not_ready(
                "Node is either not visible or not an HTMLElement",
            ));
        }
        state.clicks.push(options.clone());
        Ok(())
    }

    async fn hover(&self) -> Result<()> {
        self.element()?.state().hovers += 1;
        Ok(())
    }

    async fn focus(&self) -> Result<()> {
        self.element()?.state().focuses += 1;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        let element = self.element()?;
        let mut state = element.state();
        state.focuses += 1;
        state.value.push_str(text);
        state.typed.push(text.to_string());
        Ok(())
    }

    async fn select(&self, values: &[String]) -> Result<Vec<String>> {
        let element = self.element()?;
        let mut state = element.state();
        if state.kind != FillKind::Select {
            return Err(Error::unsupported_element("Element is not a <select> element"));
        }
        state.value = values.first().cloned().unwrap_or_default();
        state.selected.push(values.to_vec());
        Ok(values.to_vec())
    }

    async fn scroll_into_view(&self) -> Result<()> {
        let element = self.element()?;
        let mut state = element.state();
        state.intersecting = true;
        state.scrolled_into_view += 1;
        Ok(())
    }

    async fn is_intersecting_viewport(&self, _threshold: f64) -> Result<bool> {
        Ok(self.element()?.state().intersecting)
    }
}
