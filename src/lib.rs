//! Chaser-Locator: selector dialects and retrying locators for CDP browser automation
//!
//! Selectors are resolved to a query dialect (CSS with `>>>` / `::-p-*`
//! extensions, ARIA, XPath, text, shadow-piercing or user-registered) and
//! evaluated through the page collaborator traits in [`session`]. A
//! [`Locator`] wraps that in a retry loop that re-resolves the element and
//! re-checks its preconditions until the action succeeds or times out.

pub mod error;
pub mod config;

pub mod cdp;
pub mod selector;
pub mod query;
pub mod session;
pub mod locator;

// Re-exports
pub use error::{Error, Result};
pub use locator::{Locator, LocatorOptions, PageLocatorExt, Visibility};
pub use query::{CustomQueryHandler, CustomQuerySelectorRegistry};

/// Chaser-Locator library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
