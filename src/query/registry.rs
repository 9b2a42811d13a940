//! Dialect registry
//!
//! Maps a selector's `name/` or `name=` prefix to its handler. Built-in
//! prefixes are checked before custom ones; selectors without a known
//! prefix go to the CSS handler.

use regex::Regex;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{debug, info};

use super::aria::AriaQueryHandler;
use super::builtin::{CssQueryHandler, PierceQueryHandler, TextQueryHandler, UserQueryHandler, XPathQueryHandler};
use super::scripts::QueryScripts;
use super::{Dialect, QueryHandler};
use crate::{Error, Result};

const SEPARATORS: [char; 2] = ['=', '/'];

/// User supplied query functions; at least one must be set
#[derive(Debug, Clone, Default)]
pub struct CustomQueryHandler {
    /// `(node, selector) => Node | null`
    pub query_one: Option<String>,
    /// `(node, selector) => Iterable<Node>`
    pub query_all: Option<String>,
}

fn handler_name_regex() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r"^[a-zA-Z]+$").expect("handler name pattern is valid"))
}

/// Strip `prefix` plus a separator from `selector`, ignoring ASCII case
fn strip_dialect_prefix<'a>(selector: &'a str, prefix: &str) -> Option<&'a str> {
    let head = selector.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = &selector[prefix.len()..];
    SEPARATORS
        .iter()
        .find_map(|separator| rest.strip_prefix(*separator))
}

/// Registry of selector dialects
#[derive(Debug)]
pub struct CustomQuerySelectorRegistry {
    builtins: Vec<Arc<dyn QueryHandler>>,
    custom: RwLock<Vec<(String, Arc<dyn QueryHandler>)>>,
    css: Arc<dyn QueryHandler>,
}

impl CustomQuerySelectorRegistry {
    pub fn new() -> Self {
        Self {
            builtins: vec![
                Arc::new(AriaQueryHandler::new()),
                Arc::new(PierceQueryHandler::new()),
                Arc::new(TextQueryHandler::new()),
                Arc::new(XPathQueryHandler::new()),
            ],
            custom: RwLock::new(Vec::new()),
            css: Arc::new(CssQueryHandler::new()),
        }
    }

    /// Handler for `selector` and the selector with its prefix removed
    pub fn get_query_handler_and_selector(&self, selector: &str) -> (String, Arc<dyn QueryHandler>) {
        for handler in &self.builtins {
            let dialect = handler.dialect();
            if let Some(stripped) = strip_dialect_prefix(selector, dialect.name()) {
                return (stripped.to_string(), Arc::clone(handler));
            }
        }

        let custom = self.custom.read().unwrap_or_else(|e| e.into_inner());
        for (name, handler) in custom.iter() {
            if let Some(stripped) = strip_dialect_prefix(selector, name) {
                return (stripped.to_string(), Arc::clone(handler));
            }
        }

        (selector.to_string(), Arc::clone(&self.css))
    }

    /// Add a dialect under `name`
    pub fn register_custom_query_handler(&self, name: &str, handler: CustomQueryHandler) -> Result<()> {
        if Dialect::is_builtin_name(name) {
            return Err(Error::query_handler(format!(
                "A query handler named \"{}\" already exists",
                name
            )));
        }
        if !handler_name_regex().is_match(name) {
            return Err(Error::query_handler(
                "Custom query handler names may only contain [a-zA-Z]",
            ));
        }

        let scripts = QueryScripts::from_parts(handler.query_one.as_deref(), handler.query_all.as_deref())?;

        let mut custom = self
            .custom
            .write()
            .map_err(|_| Error::internal("Query handler registry lock poisoned"))?;
        if custom.iter().any(|(existing, _)| existing == name) {
            return Err(Error::query_handler(format!(
                "Cannot register over existing handler: {}",
                name
            )));
        }

        info!("Registered custom query handler {}", name);
        custom.push((name.to_string(), Arc::new(UserQueryHandler::new(name, scripts))));
        Ok(())
    }

    /// Remove the dialect registered under `name`, if any
    pub fn unregister_custom_query_handler(&self, name: &str) {
        let mut custom = self.custom.write().unwrap_or_else(|e| e.into_inner());
        let before = custom.len();
        custom.retain(|(existing, _)| existing != name);
        if custom.len() != before {
            debug!("Unregistered custom query handler {}", name);
        }
    }

    /// Names of the custom dialects in registration order
    pub fn custom_query_handler_names(&self) -> Vec<String> {
        self.custom
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn clear_custom_query_handlers(&self) {
        self.custom.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Default for CustomQuerySelectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
