//! CDP-backed page scope
//!
//! Selectors are routed through the dialect registry and evaluated against
//! the document of the page's main world.

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::dispose_quietly;
use super::traits::{
    EvalArg, ExecutionWorld, HandleRef, PageContext, WaitForFunctionOptions, WaitForSelectorOptions,
};
use super::world::CdpWorld;
use crate::cdp::{CdpConnection, CdpWebSocketConnection};
use crate::config::Config;
use crate::query::CustomQuerySelectorRegistry;
use crate::Result;

const DOCUMENT_SCRIPT: &str = "() => document";

/// Page (main frame) reached over a CDP connection
#[derive(Debug)]
pub struct CdpFrame {
    id: String,
    world: Arc<CdpWorld>,
    registry: Arc<CustomQuerySelectorRegistry>,
}

impl CdpFrame {
    pub fn new(world: Arc<CdpWorld>, registry: Arc<CustomQuerySelectorRegistry>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            world,
            registry,
        }
    }

    /// Connect to the page endpoint named by `config`
    pub async fn connect(config: &Config, registry: Arc<CustomQuerySelectorRegistry>) -> Result<Arc<Self>> {
        let connection = CdpWebSocketConnection::connect(
            config.cdp_endpoint.clone(),
            Duration::from_secs(config.command_timeout),
        )
        .await?;
        connection.send_command("Runtime.enable", Value::Null).await?;
        connection.send_command("DOM.enable", Value::Null).await?;

        let world = CdpWorld::new(connection, config.utility_source()?);
        let frame = Arc::new(Self::new(world, registry));
        info!("Attached to page {} as {}", config.cdp_endpoint, frame.id);
        Ok(frame)
    }

    pub fn world(&self) -> &Arc<CdpWorld> {
        &self.world
    }

    pub fn registry(&self) -> &Arc<CustomQuerySelectorRegistry> {
        &self.registry
    }

    async fn document(&self) -> Result<HandleRef> {
        self.world.evaluate_function_handle(DOCUMENT_SCRIPT, vec![]).await
    }
}

#[async_trait]
impl PageContext for CdpFrame {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip(self, options))]
    async fn wait_for_selector(
        &self,
        selector: &str,
        options: WaitForSelectorOptions,
    ) -> Result<Option<HandleRef>> {
        let (selector, handler) = self.registry.get_query_handler_and_selector(selector);
        handler
            .wait_for(self.world.clone(), None, &selector, options)
            .await
    }

    async fn wait_for_function(
        &self,
        script: &str,
        options: WaitForFunctionOptions,
        args: Vec<EvalArg>,
    ) -> Result<HandleRef> {
        self.world
            .wait_for_function(script, options, Vec::new(), args)
            .await
    }

    async fn evaluate_function(&self, script: &str, args: Vec<EvalArg>) -> Result<Value> {
        self.world.evaluate_function(script, args).await
    }

    async fn evaluate_function_handle(&self, script: &str, args: Vec<EvalArg>) -> Result<HandleRef> {
        self.world.evaluate_function_handle(script, args).await
    }

    #[instrument(skip(self))]
    async fn query_selector(&self, selector: &str) -> Result<Option<HandleRef>> {
        let (selector, handler) = self.registry.get_query_handler_and_selector(selector);
        let document = self.document().await?;
        let result = handler.query_one(&document, &selector).await;
        dispose_quietly(&document).await;
        result
    }

    #[instrument(skip(self))]
    async fn query_selector_all(&self, selector: &str) -> Result<Vec<HandleRef>> {
        let (selector, handler) = self.registry.get_query_handler_and_selector(selector);
        let document = self.document().await?;
        let result = handler
            .query_all(document.clone(), &selector)
            .try_collect::<Vec<_>>()
            .await;
        dispose_quietly(&document).await;
        result
    }
}

/// Scroll offsets of the page, used by the CLI to report where it ended up
pub async fn scroll_position(page: &dyn PageContext) -> Result<(f64, f64)> {
    let value = page
        .evaluate_function("() => [window.scrollX, window.scrollY]", vec![])
        .await?;
    Ok((
        value[0].as_f64().unwrap_or_default(),
        value[1].as_f64().unwrap_or_default(),
    ))
}
