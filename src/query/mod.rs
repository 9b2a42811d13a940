//! Query dialects
//!
//! A [`QueryHandler`] turns a dialect selector into page evaluations. The
//! default methods cover every dialect that is fully described by its
//! [`QueryScripts`]; ARIA overrides the element queries to go through the
//! accessibility tree.

pub mod aria;
pub mod builtin;
pub mod registry;
pub mod scripts;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::session::traits::{
    EvalArg, ExecutionWorld, HandleRef, PageBinding, Polling, WaitForFunctionOptions,
    WaitForSelectorOptions,
};
use crate::session::{dispose_detached, dispose_quietly};
use crate::Result;

pub use aria::{parse_aria_selector, AriaQueryHandler, AriaSelector};
pub use builtin::{CssQueryHandler, PierceQueryHandler, TextQueryHandler, UserQueryHandler, XPathQueryHandler};
pub use registry::{CustomQueryHandler, CustomQuerySelectorRegistry};
pub use scripts::QueryScripts;

use scripts::{BATCH_SIZE, ITERATOR_SCRIPT, NEXT_BATCH_SCRIPT, WAIT_FOR_SCRIPT};

/// Selector dialect
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dialect {
    Css,
    Aria,
    Pierce,
    Text,
    XPath,
    Custom(String),
}

impl Dialect {
    /// Prefix used in selectors (`aria/...`); `css` for the fallback dialect
    pub fn name(&self) -> &str {
        match self {
            Dialect::Css => "css",
            Dialect::Aria => "aria",
            Dialect::Pierce => "pierce",
            Dialect::Text => "text",
            Dialect::XPath => "xpath",
            Dialect::Custom(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        [Dialect::Css, Dialect::Aria, Dialect::Pierce, Dialect::Text, Dialect::XPath]
            .into_iter()
            .find(|dialect| dialect.name().eq_ignore_ascii_case(name))
            .unwrap_or_else(|| Dialect::Custom(name.to_string()))
    }

    /// Whether the name is reserved for a built-in prefix
    pub fn is_builtin_name(name: &str) -> bool {
        !matches!(Dialect::from_name(name), Dialect::Custom(_) | Dialect::Css)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A selector ready for evaluation
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    /// Selector argument handed to the scripts
    pub selector: String,
    pub scripts: QueryScripts,
    /// Host functions the scripts may call while polling
    pub bindings: Vec<PageBinding>,
}

/// Executes one selector dialect
#[async_trait]
pub trait QueryHandler: Send + Sync + std::fmt::Debug {
    fn dialect(&self) -> Dialect;

    fn scripts(&self) -> &QueryScripts;

    /// Host functions exposed while waiting
    fn bindings(&self) -> Vec<PageBinding> {
        Vec::new()
    }

    /// Resolve the scripts and selector argument for `selector`
    fn prepare(&self, selector: &str) -> Result<PreparedQuery> {
        Ok(PreparedQuery {
            selector: selector.to_string(),
            scripts: self.scripts().clone(),
            bindings: self.bindings(),
        })
    }

    /// First element under `element` matching `selector`
    #[instrument(skip(self, element), fields(dialect = %self.dialect()))]
    async fn query_one(&self, element: &HandleRef, selector: &str) -> Result<Option<HandleRef>> {
        let prepared = self.prepare(selector)?;
        let util = element.world().injected_utility().await?;
        let result = element
            .evaluate_handle(
                &prepared.scripts.query_selector,
                vec![prepared.selector.into(), util.into()],
            )
            .await?;
        element_or_dispose(result).await
    }

    /// Lazy stream of every element under `element` matching `selector`
    ///
    /// Each call runs the remote generator again.
    fn query_all(&self, element: HandleRef, selector: &str) -> BoxStream<'static, Result<HandleRef>> {
        match self.prepare(selector) {
            Ok(prepared) => batched_query(element, prepared),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    /// Poll until `selector` matches under `element` (or the whole document)
    ///
    /// Returns `None` when waiting for `hidden` succeeded.
    #[instrument(skip(self, world, element, options), fields(dialect = %self.dialect()))]
    async fn wait_for(
        &self,
        world: Arc<dyn ExecutionWorld>,
        element: Option<HandleRef>,
        selector: &str,
        options: WaitForSelectorOptions,
    ) -> Result<Option<HandleRef>> {
        let prepared = self.prepare(selector)?;
        let util = world.injected_utility().await?;

        let check_visibility = options.visible || options.hidden;
        let mut args: Vec<EvalArg> = vec![
            util.into(),
            prepared.scripts.query_selector.into(),
            prepared.selector.into(),
            element.into(),
        ];
        if check_visibility {
            args.push(Value::Bool(options.visible).into());
        }

        let polling = if check_visibility { Polling::Raf } else { Polling::Mutation };
        debug!("Waiting for selector with {:?} polling", polling);
        let result = world
            .wait_for_function(
                WAIT_FOR_SCRIPT,
                WaitForFunctionOptions {
                    timeout: options.timeout,
                    polling,
                },
                prepared.bindings,
                args,
            )
            .await?;
        element_or_dispose(result).await
    }
}

/// Keep element handles, dispose anything else
pub(crate) async fn element_or_dispose(handle: HandleRef) -> Result<Option<HandleRef>> {
    if handle.is_element() {
        return Ok(Some(handle));
    }
    dispose_quietly(&handle).await;
    Ok(None)
}

/// Remote iterator plus handles fetched but not yet yielded
struct Cursor {
    iterator: Option<HandleRef>,
    buffered: VecDeque<HandleRef>,
    exhausted: bool,
}

impl Cursor {
    async fn finish(mut self) {
        if let Some(iterator) = self.iterator.take() {
            dispose_quietly(&iterator).await;
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if let Some(iterator) = self.iterator.take() {
            dispose_detached(iterator);
        }
        for handle in self.buffered.drain(..) {
            dispose_detached(handle);
        }
    }
}

enum QueryAllState {
    Start(HandleRef, PreparedQuery),
    Draining(Cursor),
    Done,
}

fn batched_query(element: HandleRef, prepared: PreparedQuery) -> BoxStream<'static, Result<HandleRef>> {
    stream::unfold(QueryAllState::Start(element, prepared), |mut state| async move {
        loop {
            state = match state {
                QueryAllState::Start(element, prepared) => match open_iterator(&element, &prepared).await {
                    Ok(iterator) => QueryAllState::Draining(Cursor {
                        iterator: Some(iterator),
                        buffered: VecDeque::new(),
                        exhausted: false,
                    }),
                    Err(e) => return Some((Err(e), QueryAllState::Done)),
                },
                QueryAllState::Draining(mut cursor) => {
                    if let Some(handle) = cursor.buffered.pop_front() {
                        return Some((Ok(handle), QueryAllState::Draining(cursor)));
                    }
                    if cursor.exhausted {
                        cursor.finish().await;
                        return None;
                    }
                    let Some(iterator) = cursor.iterator.clone() else {
                        return None;
                    };
                    match next_batch(&iterator).await {
                        Ok((batch, exhausted)) => {
                            cursor.buffered.extend(batch);
                            cursor.exhausted = exhausted;
                            QueryAllState::Draining(cursor)
                        }
                        Err(e) => {
                            cursor.finish().await;
                            return Some((Err(e), QueryAllState::Done));
                        }
                    }
                }
                QueryAllState::Done => return None,
            };
        }
    })
    .boxed()
}

async fn open_iterator(element: &HandleRef, prepared: &PreparedQuery) -> Result<HandleRef> {
    let util = element.world().injected_utility().await?;
    element
        .evaluate_handle(
            ITERATOR_SCRIPT,
            vec![
                prepared.scripts.query_selector_all.clone().into(),
                prepared.selector.clone().into(),
                util.into(),
            ],
        )
        .await
}

/// Next batch of element handles and whether the iterator is exhausted
async fn next_batch(iterator: &HandleRef) -> Result<(Vec<HandleRef>, bool)> {
    let array = iterator
        .evaluate_handle(NEXT_BATCH_SCRIPT, vec![Value::from(BATCH_SIZE).into()])
        .await?;
    let items = array.array_items().await;
    dispose_quietly(&array).await;
    let items = items?;

    let exhausted = (items.len() as u64) < BATCH_SIZE;
    let mut elements = Vec::with_capacity(items.len());
    for item in items {
        if let Some(element) = element_or_dispose(item).await? {
            elements.push(element);
        }
    }
    Ok((elements, exhausted))
}
