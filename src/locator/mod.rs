//! # 定位器
//!
//! 可组合、自动重试的元素定位与操作。
//!
//! 每次尝试：解析句柄 → （可选）滚动到视口 → （可选）等待包围盒稳定 →
//! （可选）等待元素可用 → 执行操作。任何一步失败都会释放句柄，等待
//! 100ms 后从头重试，直到超时或被取消。
//!
//! ## 模块结构
//! - `kinds`: 各类定位器的句柄解析（节点、函数、过滤、映射、竞速）
//! - `actions`: 操作前置检查与填充逻辑
//! - `retry`: 截止时间与取消令牌

pub mod actions;
pub mod kinds;
pub mod retry;

use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::session::{dispose_quietly, HandleGuard};
use crate::session::traits::{ClickOptions, HandleRef, MouseButton, Offset, PageContext};
use crate::Result;

pub use actions::{plan_typing, FillKind, TypingPlan};
pub use kinds::LocatorKind;
pub use retry::RETRY_DELAY;

use retry::RetryContext;

/// Default locator timeout in milliseconds
pub const DEFAULT_TIMEOUT: u64 = 30_000;

const EVENT_CAPACITY: usize = 16;

/// Required visibility of the located element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Locator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LocatorOptions {
    /// Milliseconds, 0 disables the timeout
    pub timeout: u64,
    pub visibility: Option<Visibility>,
    pub ensure_in_viewport: bool,
    pub wait_for_enabled: bool,
    pub wait_for_stable_bounding_box: bool,
}

impl Default for LocatorOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            visibility: None,
            ensure_in_viewport: true,
            wait_for_enabled: true,
            wait_for_stable_bounding_box: true,
        }
    }
}

/// Emitted by a locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorEvent {
    /// Preconditions passed and the action is about to run
    Action,
}

/// Options shared by every action
#[derive(Debug, Clone, Default)]
pub struct ActionOptions {
    pub signal: Option<CancellationToken>,
}

#[derive(Debug, Clone)]
pub struct LocatorClickOptions {
    pub button: MouseButton,
    pub count: u32,
    /// Milliseconds between press and release
    pub delay: u64,
    pub offset: Option<Offset>,
    pub signal: Option<CancellationToken>,
}

impl Default for LocatorClickOptions {
    fn default() -> Self {
        Self {
            button: MouseButton::Left,
            count: 1,
            delay: 0,
            offset: None,
            signal: None,
        }
    }
}

impl LocatorClickOptions {
    fn click_options(&self) -> ClickOptions {
        ClickOptions {
            button: self.button,
            count: self.count,
            delay: self.delay,
            offset: self.offset,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocatorScrollOptions {
    pub scroll_top: Option<f64>,
    pub scroll_left: Option<f64>,
    pub signal: Option<CancellationToken>,
}

enum Action<'a> {
    WaitHandle,
    Click(ClickOptions),
    Hover,
    Scroll { top: Option<f64>, left: Option<f64> },
    Fill(&'a str),
}

impl Action<'_> {
    fn name(&self) -> &'static str {
        match self {
            Action::WaitHandle => "wait",
            Action::Click(_) => "click",
            Action::Hover => "hover",
            Action::Scroll { .. } => "scroll",
            Action::Fill(_) => "fill",
        }
    }
}

/// Retrying element resolver
///
/// Setters reconfigure this instance (and any delegates); clones are
/// independent snapshots that share the event channel.
#[derive(Debug, Clone)]
pub struct Locator {
    options: LocatorOptions,
    kind: LocatorKind,
    events: broadcast::Sender<LocatorEvent>,
}

impl Locator {
    fn with_kind(options: LocatorOptions, kind: LocatorKind) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { options, kind, events }
    }

    /// Locate the element matching `selector` in `page`
    pub fn node(page: Arc<dyn PageContext>, selector: impl Into<String>) -> Self {
        Self::with_kind(
            LocatorOptions::default(),
            LocatorKind::Node {
                page,
                selector: selector.into(),
            },
        )
    }

    /// Locate the truthy result of `script`
    pub fn function(page: Arc<dyn PageContext>, script: impl Into<String>) -> Self {
        Self::with_kind(
            LocatorOptions::default(),
            LocatorKind::Function {
                page,
                script: script.into(),
            },
        )
    }

    /// Resolve to whichever of `locators` produces a handle first
    pub fn race(locators: impl IntoIterator<Item = Locator>) -> Self {
        Self::with_kind(
            LocatorOptions::default(),
            LocatorKind::Race(locators.into_iter().collect()),
        )
    }

    /// Only accept handles for which `predicate(handle)` becomes truthy
    pub fn filter(&self, predicate: impl Into<String>) -> Self {
        Self::with_kind(
            self.options.clone(),
            LocatorKind::Filtered {
                delegate: Box::new(self.clone()),
                predicate: predicate.into(),
            },
        )
    }

    /// Resolve to `mapper(handle)` instead of the handle itself
    pub fn map(&self, mapper: impl Into<String>) -> Self {
        Self::with_kind(
            self.options.clone(),
            LocatorKind::Mapped {
                delegate: Box::new(self.clone()),
                mapper: mapper.into(),
            },
        )
    }

    pub fn options(&self) -> &LocatorOptions {
        &self.options
    }

    pub fn kind(&self) -> &LocatorKind {
        &self.kind
    }

    fn configure(&mut self, apply: &dyn Fn(&mut LocatorOptions)) -> &mut Self {
        apply(&mut self.options);
        match &mut self.kind {
            LocatorKind::Filtered { delegate, .. } | LocatorKind::Mapped { delegate, .. } => {
                delegate.configure(apply);
            }
            LocatorKind::Race(locators) => {
                for locator in locators {
                    locator.configure(apply);
                }
            }
            LocatorKind::Node { .. } | LocatorKind::Function { .. } => {}
        }
        self
    }

    /// Timeout in milliseconds, 0 waits forever
    pub fn set_timeout(&mut self, timeout: u64) -> &mut Self {
        self.configure(&|options| options.timeout = timeout)
    }

    pub fn set_visibility(&mut self, visibility: Option<Visibility>) -> &mut Self {
        self.configure(&|options| options.visibility = visibility)
    }

    pub fn set_wait_for_enabled(&mut self, value: bool) -> &mut Self {
        self.configure(&|options| options.wait_for_enabled = value)
    }

    pub fn set_ensure_element_is_in_the_viewport(&mut self, value: bool) -> &mut Self {
        self.configure(&|options| options.ensure_in_viewport = value)
    }

    pub fn set_wait_for_stable_bounding_box(&mut self, value: bool) -> &mut Self {
        self.configure(&|options| options.wait_for_stable_bounding_box = value)
    }

    /// Receive this locator's events
    pub fn subscribe(&self) -> broadcast::Receiver<LocatorEvent> {
        self.events.subscribe()
    }

    /// Resolve a handle; the caller owns (and must dispose) it
    pub async fn wait_handle(&self, options: ActionOptions) -> Result<HandleRef> {
        match self.run(Action::WaitHandle, options.signal.as_ref()).await? {
            Some(handle) => Ok(handle),
            None => Err(crate::Error::internal("Locator produced no handle")),
        }
    }

    /// Resolve and read the handle's JSON value
    pub async fn wait_value<T: DeserializeOwned>(&self, options: ActionOptions) -> Result<T> {
        let handle = HandleGuard::new(self.wait_handle(options).await?);
        let value = handle.handle().json_value().await;
        handle.dispose().await;
        Ok(serde_json::from_value(value?)?)
    }

    /// Resolve once and release the handle
    pub async fn wait(&self, options: ActionOptions) -> Result<()> {
        let handle = self.wait_handle(options).await?;
        dispose_quietly(&handle).await;
        Ok(())
    }

    pub async fn click(&self, options: LocatorClickOptions) -> Result<()> {
        self.run(Action::Click(options.click_options()), options.signal.as_ref())
            .await
            .map(drop)
    }

    pub async fn hover(&self, options: ActionOptions) -> Result<()> {
        self.run(Action::Hover, options.signal.as_ref()).await.map(drop)
    }

    /// Set `scrollTop` / `scrollLeft` on the element
    pub async fn scroll(&self, options: LocatorScrollOptions) -> Result<()> {
        let action = Action::Scroll {
            top: options.scroll_top,
            left: options.scroll_left,
        };
        self.run(action, options.signal.as_ref()).await.map(drop)
    }

    /// Fill a `<select>`, text input, textarea or contenteditable with `value`
    pub async fn fill(&self, value: &str, options: ActionOptions) -> Result<()> {
        self.run(Action::Fill(value), options.signal.as_ref()).await.map(drop)
    }

    #[instrument(skip(self, action, signal), fields(action = action.name(), timeout = self.options.timeout))]
    async fn run(&self, action: Action<'_>, signal: Option<&CancellationToken>) -> Result<Option<HandleRef>> {
        let ctx = RetryContext::new(self.options.timeout, signal);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.attempt(&ctx, &action).await {
                Ok(result) => {
                    debug!("Locator succeeded on attempt {}", attempt);
                    return Ok(result);
                }
                Err(e) => {
                    if let Some(interruption) = ctx.interruption() {
                        debug!("Locator gave up after {} attempts: {}", attempt, e);
                        return Err(interruption);
                    }
                    debug!("Attempt {} failed, retrying: {}", attempt, e);
                    ctx.pause().await?;
                }
            }
        }
    }

    async fn attempt(&self, ctx: &RetryContext, action: &Action<'_>) -> Result<Option<HandleRef>> {
        let handle = HandleGuard::new(self.resolve(ctx).await?);
        if let Action::WaitHandle = action {
            return Ok(Some(handle.into_inner()));
        }

        let outcome = ctx.guard(self.act(handle.handle(), action)).await;
        handle.dispose().await;
        outcome.map(|()| None)
    }

    async fn act(&self, handle: &HandleRef, action: &Action<'_>) -> Result<()> {
        let options = &self.options;
        actions::ensure_in_viewport(options, handle).await?;
        actions::wait_for_stable_bounding_box(options, handle).await?;
        if matches!(action, Action::Click(_) | Action::Fill(_)) {
            actions::wait_for_enabled(options, handle).await?;
        }

        let _ = self.events.send(LocatorEvent::Action);
        match action {
            Action::WaitHandle => Ok(()),
            Action::Click(click) => handle.click(click).await,
            Action::Hover => handle.hover().await,
            Action::Scroll { top, left } => actions::scroll(handle, *top, *left).await,
            Action::Fill(value) => actions::fill(handle, value).await,
        }
    }
}

/// Locator constructors on a page or frame
pub trait PageLocatorExt {
    fn locator(&self, selector: &str) -> Locator;

    fn function_locator(&self, script: &str) -> Locator;
}

impl PageLocatorExt for Arc<dyn PageContext> {
    fn locator(&self, selector: &str) -> Locator {
        Locator::node(self.clone(), selector)
    }

    fn function_locator(&self, script: &str) -> Locator {
        Locator::function(self.clone(), script)
    }
}
