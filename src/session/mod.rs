//! # 会话层
//!
//! 定位器所依赖的协作者接口及其 CDP 实现：页面/框架作用域、执行环境（world）
//! 和远程对象句柄。
//!
//! ## 核心概念
//! - **PageContext**: 页面或框架作用域，提供等待和查询原语
//! - **ExecutionWorld**: 脚本执行环境，持有注入的工具脚本句柄
//! - **JsHandle**: 远程对象引用，必须显式释放
//!
//! ## 模块结构
//! - `traits`: 协作者 trait 定义
//! - `world`: 基于 CDP 的执行环境
//! - `handle`: 基于 CDP 的远程句柄
//! - `frame`: 基于 CDP 的页面作用域
//! - `mock`: 用于测试的 Mock 实现

pub mod traits;
pub mod world;
pub mod handle;
pub mod frame;
pub mod mock;

use tracing::warn;

pub use traits::{
    BoundingBox, ClickOptions, EvalArg, ExecutionWorld, HandleRef, JsHandle, MouseButton, Offset,
    PageBinding, PageContext, Polling, WaitForFunctionOptions, WaitForSelectorOptions,
};

pub use frame::CdpFrame;
pub use handle::CdpHandle;
pub use world::CdpWorld;

pub use mock::{MockElement, MockHandle, MockPage, MockValue, MockWorld};

/// Built-in injected matcher bundle
pub const DEFAULT_UTILITY_SCRIPT: &str = include_str!("injected.js");

/// Dispose a handle, logging instead of failing
pub async fn dispose_quietly(handle: &HandleRef) {
    if let Err(e) = handle.dispose().await {
        warn!("Failed to dispose handle {}: {}", handle.id(), e);
    }
}

/// Owns a handle until it is disposed or handed on
///
/// Dropped while still owning the handle (a cancelled future), it disposes
/// the handle in the background.
pub(crate) struct HandleGuard {
    handle: HandleRef,
    armed: bool,
}

impl HandleGuard {
    pub(crate) fn new(handle: HandleRef) -> Self {
        Self { handle, armed: true }
    }

    pub(crate) fn handle(&self) -> &HandleRef {
        &self.handle
    }

    /// Give up ownership without disposing
    pub(crate) fn into_inner(mut self) -> HandleRef {
        self.armed = false;
        self.handle.clone()
    }

    pub(crate) async fn dispose(mut self) {
        dispose_quietly(&self.handle).await;
        self.armed = false;
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if self.armed {
            dispose_detached(self.handle.clone());
        }
    }
}

/// Dispose a handle from a synchronous context
pub(crate) fn dispose_detached(handle: HandleRef) {
    if handle.is_disposed() {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move { dispose_quietly(&handle).await });
        }
        Err(_) => warn!("No runtime to dispose handle {}", handle.id()),
    }
}
