//! ARIA dialect
//!
//! `aria/Accessible name[role="button"]` selectors are resolved through the
//! browser's accessibility tree rather than the DOM.

use async_trait::async_trait;
use futures::future::FutureExt;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::{debug, instrument};

use super::scripts::QueryScripts;
use super::{Dialect, QueryHandler};
use crate::session::traits::{EvalArg, HandleRef, JsHandle, PageBinding};
use crate::{Error, Result};

const ARIA_QUERY_ONE: &str = "(node, selector, {ariaQuerySelector}) => ariaQuerySelector(node, selector)";
const ARIA_QUERY_ALL: &str = "async function* (node, selector, {ariaQuerySelectorAll}) { yield* ariaQuerySelectorAll(node, selector); }";

/// Page binding name used by the injected matcher to reach the host
pub const ARIA_BINDING_NAME: &str = "ariaQuerySelector";

const MAX_SELECTOR_LENGTH: usize = 10_000;

/// Parsed `aria/` selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AriaSelector {
    pub name: Option<String>,
    pub role: Option<String>,
}

fn attribute_regex() -> &'static Regex {
    static ATTRIBUTE: OnceLock<Regex> = OnceLock::new();
    ATTRIBUTE.get_or_init(|| {
        Regex::new(r#"\[\s*(\w+)\s*=\s*(?:"((?:\\.|[^"\\])*)"|'((?:\\.|[^'\\])*)')\s*\]"#)
            .expect("aria attribute pattern is valid")
    })
}

fn normalize(value: &str) -> String {
    value.split(' ').filter(|part| !part.is_empty()).collect::<Vec<_>>().join(" ")
}

/// Split an `aria/` selector into accessible name and role
///
/// Text outside `[attr="value"]` groups is the accessible name unless a
/// `name` attribute was given.
pub fn parse_aria_selector(selector: &str) -> Result<AriaSelector> {
    if selector.len() > MAX_SELECTOR_LENGTH {
        return Err(Error::invalid_selector(format!(
            "Selector of {} characters is too long (limit {})",
            selector.len(),
            MAX_SELECTOR_LENGTH
        )));
    }

    let mut parsed = AriaSelector::default();
    let mut default_name = String::new();
    let mut last = 0;
    for captures in attribute_regex().captures_iter(selector) {
        let (Some(whole), Some(attribute)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        default_name.push_str(&selector[last..whole.start()]);
        last = whole.end();

        let value = captures
            .get(2)
            .or_else(|| captures.get(3))
            .map(|m| normalize(m.as_str()))
            .unwrap_or_default();
        match attribute.as_str() {
            "name" => parsed.name = Some(value),
            "role" => parsed.role = Some(value),
            other => {
                return Err(Error::invalid_selector(format!(
                    "Unknown aria attribute \"{}\" in selector",
                    other
                )))
            }
        }
    }
    default_name.push_str(&selector[last..]);

    let default_name = normalize(&default_name);
    if !default_name.is_empty() && parsed.name.is_none() {
        parsed.name = Some(default_name);
    }
    Ok(parsed)
}

/// Backend ids of the accessible nodes under `root` matching `selector`
async fn query_backend_ids(root: &dyn JsHandle, selector: &AriaSelector) -> Result<Vec<i64>> {
    let nodes = root
        .world()
        .query_ax_tree(root, selector.name.as_deref(), selector.role.as_deref())
        .await?;
    Ok(nodes
        .into_iter()
        .filter(|node| !node.ignored && node.role() != Some("StaticText"))
        .filter_map(|node| node.backend_dom_node_id)
        .collect())
}

/// First match for the page-side `ariaQuerySelector(root, selector)` binding
async fn binding_query(args: Vec<HandleRef>) -> Result<EvalArg> {
    let mut args = args.into_iter();
    let (Some(root), Some(selector)) = (args.next(), args.next()) else {
        return Err(Error::query_handler("ariaQuerySelector expects (root, selector)"));
    };
    let selector = match selector.json_value().await? {
        Value::String(selector) => selector,
        other => return Err(Error::invalid_selector(format!("Expected a string selector, got {}", other))),
    };

    let parsed = parse_aria_selector(&selector)?;
    let ids = query_backend_ids(root.as_ref(), &parsed).await?;
    match ids.first() {
        Some(id) => Ok(EvalArg::Handle(root.world().adopt_backend_node(*id).await?)),
        None => Ok(EvalArg::Value(Value::Null)),
    }
}

/// Bindings installed while waiting on ARIA queries
pub fn aria_bindings() -> Vec<PageBinding> {
    vec![PageBinding::new(ARIA_BINDING_NAME, |args| binding_query(args).boxed())]
}

/// `aria/` handler
#[derive(Debug)]
pub struct AriaQueryHandler {
    scripts: QueryScripts,
}

impl AriaQueryHandler {
    pub fn new() -> Self {
        Self {
            scripts: QueryScripts {
                query_selector: ARIA_QUERY_ONE.to_string(),
                query_selector_all: ARIA_QUERY_ALL.to_string(),
            },
        }
    }
}

impl Default for AriaQueryHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryHandler for AriaQueryHandler {
    fn dialect(&self) -> Dialect {
        Dialect::Aria
    }

    fn scripts(&self) -> &QueryScripts {
        &self.scripts
    }

    fn bindings(&self) -> Vec<PageBinding> {
        aria_bindings()
    }

    #[instrument(skip(self, element))]
    async fn query_one(&self, element: &HandleRef, selector: &str) -> Result<Option<HandleRef>> {
        let parsed = parse_aria_selector(selector)?;
        let ids = query_backend_ids(element.as_ref(), &parsed).await?;
        debug!("Accessibility query matched {} nodes", ids.len());
        match ids.first() {
            Some(id) => Ok(Some(element.world().adopt_backend_node(*id).await?)),
            None => Ok(None),
        }
    }

    fn query_all(&self, element: HandleRef, selector: &str) -> BoxStream<'static, Result<HandleRef>> {
        let selector = selector.to_string();
        stream::once(async move {
            let parsed = parse_aria_selector(&selector)?;
            let ids = query_backend_ids(element.as_ref(), &parsed).await?;
            Ok::<_, Error>((element.world(), ids))
        })
        .map_ok(|(world, ids)| {
            stream::iter(ids).then(move |id| {
                let world = world.clone();
                async move { world.adopt_backend_node(id).await }
            })
        })
        .try_flatten()
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name() {
        let parsed = parse_aria_selector("  Submit   order ").unwrap();
        assert_eq!(parsed.name.as_deref(), Some("Submit order"));
        assert_eq!(parsed.role, None);
    }

    #[test]
    fn test_name_and_role() {
        let parsed = parse_aria_selector(r#"Sign in[role="button"]"#).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("Sign in"));
        assert_eq!(parsed.role.as_deref(), Some("button"));
    }

    #[test]
    fn test_explicit_name_wins() {
        let parsed = parse_aria_selector(r#"ignored[name='Real  name'][role="link"]"#).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("Real name"));
        assert_eq!(parsed.role.as_deref(), Some("link"));
    }

    #[test]
    fn test_role_only() {
        let parsed = parse_aria_selector(r#"[role="heading"]"#).unwrap();
        assert_eq!(parsed.name, None);
        assert_eq!(parsed.role.as_deref(), Some("heading"));
    }

    #[test]
    fn test_unknown_attribute_is_named() {
        let err = parse_aria_selector(r#"Go[level="2"]"#).unwrap_err();
        assert!(err.to_string().contains("Unknown aria attribute \"level\" in selector"));
    }

    #[test]
    fn test_too_long() {
        let selector = "a".repeat(MAX_SELECTOR_LENGTH + 1);
        let message = parse_aria_selector(&selector).unwrap_err().to_string();
        assert!(message.contains("Selector of 10001 characters is too long"));
        assert!(!message.contains("aaaa"));
    }

    #[test]
    fn test_handler_bindings() {
        let handler = AriaQueryHandler::new();
        let bindings = handler.bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].name, ARIA_BINDING_NAME);
    }
}
