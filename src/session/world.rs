//! CDP-backed execution world
//!
//! Scripts run through `Runtime.callFunctionOn` against the page's global
//! object. Page bindings are `Runtime.addBinding` channels wrapped in a
//! promise-returning page function.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::dispose_quietly;
use super::handle::CdpHandle;
use super::traits::{
    EvalArg, ExecutionWorld, HandleRef, JsHandle, PageBinding, Polling, WaitForFunctionOptions,
};
use crate::cdp::types::{AxNode, EvaluateResponse, QueryAxTreeResponse, RemoteObject};
use crate::cdp::CdpConnection;
use crate::{Error, Result};

/// Prefix of the raw CDP binding behind each page binding
const BINDING_PREFIX: &str = "__chaser_binding__";

const RAF_INTERVAL: Duration = Duration::from_millis(16);
const MUTATION_INTERVAL: Duration = Duration::from_millis(50);

const INSTALL_BINDING_SCRIPT: &str = "(name, bindingName) => {\
    \n  if (globalThis[name] && globalThis[name].callbacks) {\
    \n    return;\
    \n  }\
    \n  const raw = globalThis[bindingName];\
    \n  const callbacks = new Map();\
    \n  const args = new Map();\
    \n  let seq = 0;\
    \n  const wrapper = (...params) => {\
    \n    const id = ++seq;\
    \n    args.set(id, params);\
    \n    return new Promise((resolve, reject) => {\
    \n      callbacks.set(id, {resolve, reject});\
    \n      raw(JSON.stringify({id}));\
    \n    });\
    \n  };\
    \n  wrapper.callbacks = callbacks;\
    \n  wrapper.args = args;\
    \n  globalThis[name] = wrapper;\
    \n}";

const TAKE_BINDING_ARGS_SCRIPT: &str = "(name, id) => {\
    \n  const args = globalThis[name].args.get(id);\
    \n  globalThis[name].args.delete(id);\
    \n  return args;\
    \n}";

const RESOLVE_BINDING_SCRIPT: &str = "(name, id, value) => {\
    \n  const callback = globalThis[name].callbacks.get(id);\
    \n  globalThis[name].callbacks.delete(id);\
    \n  callback.resolve(value);\
    \n}";

const REJECT_BINDING_SCRIPT: &str = "(name, id, message) => {\
    \n  const callback = globalThis[name].callbacks.get(id);\
    \n  globalThis[name].callbacks.delete(id);\
    \n  callback.reject(new Error(message));\
    \n}";

/// Protocol errors meaning the cached global object belongs to a dead context
fn is_stale_context(error: &Error) -> bool {
    match error {
        Error::Cdp(message) => {
            message.contains("Cannot find context with specified id")
                || message.contains("Could not find object with given id")
                || message.contains("Execution context was destroyed")
        }
        _ => false,
    }
}

/// JavaScript truthiness of an evaluation result
fn is_truthy(remote: &RemoteObject) -> bool {
    if remote.object_id.is_some() {
        return remote.subtype.as_deref() != Some("null");
    }
    match remote.local_value() {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Null => false,
        _ => true,
    }
}

/// Execution world of one page target
pub struct CdpWorld {
    connection: Arc<dyn CdpConnection>,
    utility_source: String,
    global: Mutex<Option<String>>,
    utility: Mutex<Option<HandleRef>>,
    bindings: Arc<std::sync::RwLock<HashMap<String, PageBinding>>>,
    installed_bindings: Mutex<HashSet<String>>,
    listening: AtomicBool,
    self_ref: Weak<CdpWorld>,
}

impl std::fmt::Debug for CdpWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpWorld")
            .field("connection", &self.connection)
            .finish()
    }
}

impl CdpWorld {
    /// Create a world evaluating through `connection`
    ///
    /// `utility_source` is an expression evaluating to the matcher bundle.
    pub fn new(connection: Arc<dyn CdpConnection>, utility_source: impl Into<String>) -> Arc<Self> {
        let utility_source = utility_source.into();
        Arc::new_cyclic(|self_ref| Self {
            connection,
            utility_source,
            global: Mutex::new(None),
            utility: Mutex::new(None),
            bindings: Arc::new(std::sync::RwLock::new(HashMap::new())),
            installed_bindings: Mutex::new(HashSet::new()),
            listening: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    pub fn connection(&self) -> &Arc<dyn CdpConnection> {
        &self.connection
    }

    fn arc(&self) -> Result<Arc<CdpWorld>> {
        self.self_ref
            .upgrade()
            .ok_or_else(|| Error::internal("Execution world was dropped"))
    }

    pub(crate) fn wrap(&self, remote: RemoteObject) -> Result<HandleRef> {
        Ok(Arc::new(CdpHandle::new(self.arc()?, remote)))
    }

    /// Send a command, forgetting cached remote state if the context died
    ///
    /// Must not be called while holding the `global` or `utility` lock.
    pub(crate) async fn send(&self, method: &str, params: Value) -> Result<Value> {
        match self.connection.send_command(method, params).await {
            Err(e) if is_stale_context(&e) => {
                debug!("Execution context is stale, dropping cached objects");
                self.global.lock().await.take();
                self.utility.lock().await.take();
                self.installed_bindings.lock().await.clear();
                Err(e)
            }
            result => result,
        }
    }

    async fn global_object_id(&self) -> Result<String> {
        let mut global = self.global.lock().await;
        if let Some(id) = global.as_ref() {
            return Ok(id.clone());
        }

        let response: EvaluateResponse = serde_json::from_value(
            self.connection
                .send_command("Runtime.evaluate", json!({ "expression": "globalThis" }))
                .await?,
        )?;
        let id = response
            .result
            .object_id
            .ok_or_else(|| Error::cdp("Global object has no object id"))?;
        *global = Some(id.clone());
        Ok(id)
    }

    /// Convert an argument to a `Runtime.CallArgument`
    pub(crate) async fn call_argument(arg: &EvalArg) -> Result<Value> {
        match arg {
            EvalArg::Value(value) => Ok(json!({ "value": value })),
            EvalArg::Undefined => Ok(json!({})),
            EvalArg::Handle(handle) => {
                if handle.is_disposed() {
                    return Err(Error::internal("JSHandle is disposed"));
                }
                match handle.remote_object_id() {
                    Some(id) => Ok(json!({ "objectId": id })),
                    None => Ok(json!({ "value": handle.json_value().await? })),
                }
            }
        }
    }

    /// Call `script` on the global object with raw call arguments
    pub(crate) async fn call_function(
        &self,
        script: &str,
        arguments: Vec<Value>,
        return_by_value: bool,
    ) -> Result<RemoteObject> {
        let object_id = self.global_object_id().await?;
        let response: EvaluateResponse = serde_json::from_value(
            self.send(
                "Runtime.callFunctionOn",
                json!({
                    "functionDeclaration": script,
                    "objectId": object_id,
                    "arguments": arguments,
                    "returnByValue": return_by_value,
                    "awaitPromise": true,
                    "userGesture": true,
                }),
            )
            .await?,
        )?;

        if let Some(details) = response.exception_details {
            return Err(Error::script_execution_failed(details.message()));
        }
        Ok(response.result)
    }

    async fn call_arguments(args: &[EvalArg]) -> Result<Vec<Value>> {
        let mut arguments = Vec::with_capacity(args.len());
        for arg in args {
            arguments.push(Self::call_argument(arg).await?);
        }
        Ok(arguments)
    }

    async fn ensure_binding(&self, binding: PageBinding) -> Result<()> {
        let name = binding.name.clone();
        if let Ok(mut bindings) = self.bindings.write() {
            bindings.insert(name.clone(), binding);
        }

        if self.installed_bindings.lock().await.contains(&name) {
            return Ok(());
        }

        self.start_binding_listener().await?;
        let raw_name = format!("{}{}", BINDING_PREFIX, name);
        self.send("Runtime.addBinding", json!({ "name": raw_name })).await?;
        self.call_function(
            INSTALL_BINDING_SCRIPT,
            vec![json!({ "value": name }), json!({ "value": raw_name })],
            true,
        )
        .await?;

        debug!("Installed page binding {}", name);
        self.installed_bindings.lock().await.insert(name);
        Ok(())
    }

    async fn start_binding_listener(&self) -> Result<()> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut events = self.connection.listen_events().await?;
        let world = self.self_ref.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.method != "Runtime.bindingCalled" {
                    continue;
                }
                let Some(world) = world.upgrade() else {
                    break;
                };
                tokio::spawn(async move {
                    if let Err(e) = world.dispatch_binding_call(&event.params).await {
                        warn!("Binding call failed: {}", e);
                    }
                });
            }
            debug!("Binding listener exited");
        });
        Ok(())
    }

    #[instrument(skip(self, params))]
    async fn dispatch_binding_call(&self, params: &Value) -> Result<()> {
        let Some(name) = params["name"]
            .as_str()
            .and_then(|raw| raw.strip_prefix(BINDING_PREFIX))
        else {
            return Ok(());
        };
        let payload: Value = serde_json::from_str(params["payload"].as_str().unwrap_or("{}"))?;
        let id = payload["id"].clone();

        let binding = self
            .bindings
            .read()
            .ok()
            .and_then(|bindings| bindings.get(name).cloned());
        let Some(binding) = binding else {
            return Err(Error::internal(format!("Unknown binding {}", name)));
        };

        let args_remote = self
            .call_function(
                TAKE_BINDING_ARGS_SCRIPT,
                vec![json!({ "value": name }), json!({ "value": id })],
                false,
            )
            .await?;
        let args_array = self.wrap(args_remote)?;
        let args = args_array.array_items().await;
        dispose_quietly(&args_array).await;
        let args = args?;

        let outcome = (binding.function)(args.clone()).await;
        for arg in &args {
            dispose_quietly(arg).await;
        }

        match outcome {
            Ok(result) => {
                let value = Self::call_argument(&result).await?;
                self.call_function(
                    RESOLVE_BINDING_SCRIPT,
                    vec![json!({ "value": name }), json!({ "value": id }), value],
                    true,
                )
                .await?;
                if let EvalArg::Handle(handle) = result {
                    dispose_quietly(&handle).await;
                }
            }
            Err(e) => {
                self.call_function(
                    REJECT_BINDING_SCRIPT,
                    vec![
                        json!({ "value": name }),
                        json!({ "value": id }),
                        json!({ "value": e.to_string() }),
                    ],
                    true,
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionWorld for CdpWorld {
    async fn injected_utility(&self) -> Result<HandleRef> {
        let mut utility = self.utility.lock().await;
        if let Some(handle) = utility.as_ref().filter(|h| !h.is_disposed()) {
            return Ok(Arc::clone(handle));
        }

        let response: EvaluateResponse = serde_json::from_value(
            self.connection
                .send_command(
                    "Runtime.evaluate",
                    json!({ "expression": self.utility_source, "returnByValue": false }),
                )
                .await?,
        )?;
        if let Some(details) = response.exception_details {
            return Err(Error::script_execution_failed(details.message()));
        }

        let handle = self.wrap(response.result)?;
        *utility = Some(Arc::clone(&handle));
        Ok(handle)
    }

    async fn evaluate_function(&self, script: &str, args: Vec<EvalArg>) -> Result<Value> {
        let arguments = Self::call_arguments(&args).await?;
        Ok(self.call_function(script, arguments, true).await?.local_value())
    }

    async fn evaluate_function_handle(&self, script: &str, args: Vec<EvalArg>) -> Result<HandleRef> {
        let arguments = Self::call_arguments(&args).await?;
        let remote = self.call_function(script, arguments, false).await?;
        self.wrap(remote)
    }

    #[instrument(skip(self, script, bindings, args))]
    async fn wait_for_function(
        &self,
        script: &str,
        options: WaitForFunctionOptions,
        bindings: Vec<PageBinding>,
        args: Vec<EvalArg>,
    ) -> Result<HandleRef> {
        for binding in bindings {
            self.ensure_binding(binding).await?;
        }

        let deadline = (options.timeout > 0)
            .then(|| Instant::now() + Duration::from_millis(options.timeout));
        let interval = match options.polling {
            Polling::Raf => RAF_INTERVAL,
            Polling::Mutation => MUTATION_INTERVAL,
            Polling::Interval(ms) => Duration::from_millis(ms.max(1)),
        };
        let arguments = Self::call_arguments(&args).await?;

        loop {
            let remote = self.call_function(script, arguments.clone(), false).await?;
            if is_truthy(&remote) {
                return self.wrap(remote);
            }
            if let Some(id) = remote.object_id {
                let _ = self
                    .send("Runtime.releaseObject", json!({ "objectId": id }))
                    .await;
            }

            let now = Instant::now();
            match deadline {
                Some(deadline) if now >= deadline => {
                    return Err(Error::timeout(format!(
                        "Waiting failed: {}ms exceeded",
                        options.timeout
                    )));
                }
                Some(deadline) => tokio::time::sleep(interval.min(deadline - now)).await,
                None => tokio::time::sleep(interval).await,
            }
        }
    }

    async fn query_ax_tree(
        &self,
        root: &dyn JsHandle,
        name: Option<&str>,
        role: Option<&str>,
    ) -> Result<Vec<AxNode>> {
        let object_id = root
            .remote_object_id()
            .ok_or_else(|| Error::internal("Accessibility query root has no object id"))?;
        let mut params = json!({ "objectId": object_id });
        if let Some(name) = name {
            params["accessibleName"] = json!(name);
        }
        if let Some(role) = role {
            params["role"] = json!(role);
        }

        let response: QueryAxTreeResponse =
            serde_json::from_value(self.send("Accessibility.queryAXTree", params).await?)?;
        Ok(response.nodes)
    }

    async fn adopt_backend_node(&self, backend_node_id: i64) -> Result<HandleRef> {
        let response = self
            .send("DOM.resolveNode", json!({ "backendNodeId": backend_node_id }))
            .await?;
        let remote: RemoteObject = serde_json::from_value(response["object"].clone())?;
        self.wrap(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::MockCdpConnection;

    fn world_with(conn: Arc<MockCdpConnection>) -> Arc<CdpWorld> {
        CdpWorld::new(conn, "({ marker: true })")
    }

    fn responder(method: &str, params: &Value) -> Result<Value> {
        match method {
            "Runtime.evaluate" if params["expression"] == "globalThis" => {
                Ok(json!({ "result": { "type": "object", "objectId": "global" } }))
            }
            "Runtime.evaluate" => Ok(json!({ "result": { "type": "object", "objectId": "util" } })),
            "Runtime.callFunctionOn" => {
                let script = params["functionDeclaration"].as_str().unwrap_or_default();
                if script.contains("throw") {
                    Ok(json!({
                        "result": { "type": "object", "subtype": "error" },
                        "exceptionDetails": { "exceptionId": 1, "text": "Uncaught", "exception": { "type": "object", "description": "Error: nope" } }
                    }))
                } else if script.contains("false") {
                    Ok(json!({ "result": { "type": "boolean", "value": false } }))
                } else {
                    Ok(json!({ "result": { "type": "number", "value": 42 } }))
                }
            }
            "DOM.resolveNode" => Ok(json!({ "object": { "type": "object", "subtype": "node", "objectId": "node-7" } })),
            _ => Ok(json!({})),
        }
    }

    #[tokio::test]
    async fn test_evaluate_function_targets_global() {
        let conn = Arc::new(MockCdpConnection::with_responder(responder));
        let world = world_with(conn.clone());

        let value = world
            .evaluate_function("(a) => a + 41", vec![json!(1).into()])
            .await
            .unwrap();
        assert_eq!(value, json!(42));

        let call = &conn.calls_to("Runtime.callFunctionOn")[0];
        assert_eq!(call["objectId"], "global");
        assert_eq!(call["arguments"][0]["value"], 1);
        assert_eq!(call["returnByValue"], true);
    }

    #[tokio::test]
    async fn test_global_object_is_cached() {
        let conn = Arc::new(MockCdpConnection::with_responder(responder));
        let world = world_with(conn.clone());

        world.evaluate_function("() => 1", vec![]).await.unwrap();
        world.evaluate_function("() => 2", vec![]).await.unwrap();
        assert_eq!(conn.calls_to("Runtime.evaluate").len(), 1);
    }

    #[tokio::test]
    async fn test_exception_becomes_error() {
        let conn = Arc::new(MockCdpConnection::with_responder(responder));
        let world = world_with(conn);

        let err = world.evaluate_function("() => { throw 1 }", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::ScriptExecutionFailed(ref m) if m == "Error: nope"));
    }

    #[tokio::test]
    async fn test_utility_resolved_once() {
        let conn = Arc::new(MockCdpConnection::with_responder(responder));
        let world = world_with(conn.clone());

        let first = world.injected_utility().await.unwrap();
        let second = world.injected_utility().await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(first.remote_object_id(), Some("util"));
    }

    #[tokio::test]
    async fn test_wait_for_function_times_out() {
        let conn = Arc::new(MockCdpConnection::with_responder(responder));
        let world = world_with(conn);

        let err = world
            .wait_for_function(
                "() => false",
                WaitForFunctionOptions {
                    timeout: 40,
                    polling: Polling::Interval(10),
                },
                vec![],
                vec![],
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Operation timeout: Waiting failed: 40ms exceeded");
    }

    #[tokio::test]
    async fn test_stale_context_clears_cache() {
        let conn = Arc::new(MockCdpConnection::with_responder(|method, params| {
            match method {
                "Runtime.evaluate" if params["expression"] == "globalThis" => {
                    Ok(json!({ "result": { "type": "object", "objectId": "global" } }))
                }
                _ => Err(Error::cdp("Runtime.callFunctionOn: Cannot find context with specified id (code: -32000)")),
            }
        }));
        let world = world_with(conn.clone());

        assert!(world.evaluate_function("() => 1", vec![]).await.is_err());
        assert!(world.evaluate_function("() => 1", vec![]).await.is_err());
        assert_eq!(conn.calls_to("Runtime.evaluate").len(), 2);
    }

    #[tokio::test]
    async fn test_adopt_backend_node() {
        let conn = Arc::new(MockCdpConnection::with_responder(responder));
        let world = world_with(conn.clone());

        let handle = world.adopt_backend_node(7).await.unwrap();
        assert!(handle.is_element());
        assert_eq!(conn.calls_to("DOM.resolveNode")[0]["backendNodeId"], 7);
    }

    #[test]
    fn test_truthiness() {
        let falsy = |value: Value| RemoteObject {
            value: Some(value),
            ..Default::default()
        };
        assert!(!is_truthy(&falsy(json!(0))));
        assert!(!is_truthy(&falsy(json!(""))));
        assert!(!is_truthy(&RemoteObject::default()));
        assert!(is_truthy(&falsy(json!("x"))));
        assert!(is_truthy(&RemoteObject {
            object_id: Some("1".into()),
            ..Default::default()
        }));
    }

    fn binding_responder(method: &str, params: &Value) -> Result<Value> {
        match method {
            "Runtime.evaluate" => Ok(json!({ "result": { "type": "object", "objectId": "global" } })),
            "Runtime.callFunctionOn" if params["functionDeclaration"] == TAKE_BINDING_ARGS_SCRIPT => {
                let id = params["arguments"][1]["value"].as_i64().unwrap_or_default();
                Ok(json!({ "result": { "type": "object", "subtype": "array", "objectId": format!("args-{}", id) } }))
            }
            "Runtime.callFunctionOn" => Ok(json!({ "result": { "type": "undefined" } })),
            "Runtime.getProperties" => Ok(json!({
                "result": [{
                    "name": "0",
                    "enumerable": true,
                    "value": { "type": "object", "subtype": "node", "objectId": format!("{}-node", params["objectId"].as_str().unwrap_or_default()) }
                }]
            })),
            _ => Ok(json!({})),
        }
    }

    fn calls_of(conn: &MockCdpConnection, script: &str) -> Vec<Value> {
        conn.calls_to("Runtime.callFunctionOn")
            .into_iter()
            .filter(|c| c["functionDeclaration"] == script)
            .collect()
    }

    #[tokio::test]
    async fn test_binding_calls_resolve_and_reject() {
        use futures::FutureExt;

        let conn = Arc::new(MockCdpConnection::with_responder(binding_responder));
        let world = world_with(conn.clone());

        let count = PageBinding::new("count", |args| async move { Ok::<_, Error>(EvalArg::Value(json!(args.len()))) }.boxed());
        let failing = PageBinding::new("failing", |_| async { Err::<EvalArg, _>(Error::element_not_found("#gone")) }.boxed());
        world.ensure_binding(count.clone()).await.unwrap();
        world.ensure_binding(failing).await.unwrap();
        // installing twice is a no-op
        world.ensure_binding(count).await.unwrap();

        let added: Vec<Value> = conn.calls_to("Runtime.addBinding");
        assert_eq!(added.len(), 2);
        assert_eq!(added[0]["name"], "__chaser_binding__count");
        assert_eq!(calls_of(&conn, INSTALL_BINDING_SCRIPT)[0]["arguments"][1]["value"], "__chaser_binding__count");

        conn.emit("Runtime.bindingCalled", json!({ "name": "__chaser_binding__count", "payload": "{\"id\":1}" }));
        conn.emit("Runtime.bindingCalled", json!({ "name": "__chaser_binding__failing", "payload": "{\"id\":2}" }));
        conn.emit("Runtime.bindingCalled", json!({ "name": "unrelated", "payload": "{}" }));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let resolved = calls_of(&conn, RESOLVE_BINDING_SCRIPT);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0]["arguments"][0]["value"], "count");
        assert_eq!(resolved[0]["arguments"][1]["value"], 1);
        assert_eq!(resolved[0]["arguments"][2]["value"], 1);

        let rejected = calls_of(&conn, REJECT_BINDING_SCRIPT);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0]["arguments"][0]["value"], "failing");
        assert_eq!(rejected[0]["arguments"][1]["value"], 2);
        assert_eq!(
            rejected[0]["arguments"][2]["value"],
            Error::element_not_found("#gone").to_string()
        );

        // argument arrays and their items are released after each call
        let released: Vec<Value> = conn
            .calls_to("Runtime.releaseObject")
            .into_iter()
            .map(|p| p["objectId"].clone())
            .collect();
        for id in ["args-1", "args-1-node", "args-2", "args-2-node"] {
            assert!(released.contains(&json!(id)), "{} not released", id);
        }
    }
}
