//! Script-only dialects: CSS, pierce, text, XPath and user handlers

use async_trait::async_trait;
use tracing::debug;

use super::aria::aria_bindings;
use super::scripts::{one_from_all, QueryScripts};
use super::{Dialect, PreparedQuery, QueryHandler};
use crate::selector;
use crate::Result;

const CSS_QUERY_ONE: &str = "(element, selector, {cssQuerySelector}) => cssQuerySelector(element, selector)";
const CSS_QUERY_ALL: &str = "(element, selector, {cssQuerySelectorAll}) => cssQuerySelectorAll(element, selector)";
const P_QUERY_ONE: &str = "(element, selector, {pQuerySelector}) => pQuerySelector(element, selector)";
const P_QUERY_ALL: &str = "(element, selector, {pQuerySelectorAll}) => pQuerySelectorAll(element, selector)";
const PIERCE_QUERY_ONE: &str = "(element, selector, {pierceQuerySelector}) => pierceQuerySelector(element, selector)";
const PIERCE_QUERY_ALL: &str = "(element, selector, {pierceQuerySelectorAll}) => pierceQuerySelectorAll(element, selector)";
const XPATH_QUERY_ALL: &str = "(element, selector, {xpathQuerySelectorAll}) => xpathQuerySelectorAll(element, selector)";
const TEXT_QUERY_ALL: &str = "(element, selector, {textQuerySelectorAll}) => textQuerySelectorAll(element, selector)";

/// Plain CSS, switching to the P-selector matcher for extended syntax
#[derive(Debug)]
pub struct CssQueryHandler {
    scripts: QueryScripts,
    p_scripts: QueryScripts,
}

impl CssQueryHandler {
    pub fn new() -> Self {
        Self {
            scripts: QueryScripts {
                query_selector: CSS_QUERY_ONE.to_string(),
                query_selector_all: CSS_QUERY_ALL.to_string(),
            },
            p_scripts: QueryScripts {
                query_selector: P_QUERY_ONE.to_string(),
                query_selector_all: P_QUERY_ALL.to_string(),
            },
        }
    }
}

impl Default for CssQueryHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryHandler for CssQueryHandler {
    fn dialect(&self) -> Dialect {
        Dialect::Css
    }

    fn scripts(&self) -> &QueryScripts {
        &self.scripts
    }

    fn prepare(&self, selector: &str) -> Result<PreparedQuery> {
        let parsed = selector::parse(selector);
        let Some(ast_json) = parsed.ast_json()? else {
            return Ok(PreparedQuery {
                selector: selector.to_string(),
                scripts: self.scripts.clone(),
                bindings: Vec::new(),
            });
        };

        debug!("Selector {:?} uses extended syntax", selector);
        Ok(PreparedQuery {
            selector: ast_json,
            scripts: self.p_scripts.clone(),
            bindings: if parsed.has_aria { aria_bindings() } else { Vec::new() },
        })
    }
}

macro_rules! script_handler {
    ($(#[$doc:meta])* $name:ident, $dialect:expr, $one:expr, $all:expr) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name {
            scripts: QueryScripts,
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    scripts: QueryScripts {
                        query_selector: $one,
                        query_selector_all: $all,
                    },
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        #[async_trait]
        impl QueryHandler for $name {
            fn dialect(&self) -> Dialect {
                $dialect
            }

            fn scripts(&self) -> &QueryScripts {
                &self.scripts
            }
        }
    };
}

script_handler!(
    /// `pierce/`: CSS matched inside every open shadow root
    PierceQueryHandler,
    Dialect::Pierce,
    PIERCE_QUERY_ONE.to_string(),
    PIERCE_QUERY_ALL.to_string()
);

script_handler!(
    /// `xpath/`: XPath expression evaluated against the element
    XPathQueryHandler,
    Dialect::XPath,
    one_from_all(XPATH_QUERY_ALL),
    XPATH_QUERY_ALL.to_string()
);

script_handler!(
    /// `text/`: deepest elements whose text contains the selector
    TextQueryHandler,
    Dialect::Text,
    one_from_all(TEXT_QUERY_ALL),
    TEXT_QUERY_ALL.to_string()
);

/// Handler registered at runtime from user scripts
#[derive(Debug)]
pub struct UserQueryHandler {
    name: String,
    scripts: QueryScripts,
}

impl UserQueryHandler {
    pub fn new(name: impl Into<String>, scripts: QueryScripts) -> Self {
        Self {
            name: name.into(),
            scripts,
        }
    }
}

#[async_trait]
impl QueryHandler for UserQueryHandler {
    fn dialect(&self) -> Dialect {
        Dialect::Custom(self.name.clone())
    }

    fn scripts(&self) -> &QueryScripts {
        &self.scripts
    }
}
