//! Query script pairs
//!
//! Every dialect is described by two page functions with the signature
//! `(node, selector, PuppeteerUtil)`: one returning the first match and one
//! async generator yielding every match. A dialect may author either and
//! have the other synthesized.

use crate::{Error, Result};

/// The two query functions of a dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryScripts {
    /// `(node, selector, util) => Node | null`
    pub query_selector: String,
    /// `async function* (node, selector, util)`
    pub query_selector_all: String,
}

impl QueryScripts {
    /// Build a pair from whichever functions were authored
    pub fn from_parts(query_one: Option<&str>, query_all: Option<&str>) -> Result<Self> {
        match (query_one, query_all) {
            (Some(one), Some(all)) => Ok(Self {
                query_selector: one.to_string(),
                query_selector_all: all.to_string(),
            }),
            (Some(one), None) => Ok(Self {
                query_selector: one.to_string(),
                query_selector_all: all_from_one(one),
            }),
            (None, Some(all)) => Ok(Self {
                query_selector: one_from_all(all),
                query_selector_all: all.to_string(),
            }),
            (None, None) => Err(Error::query_handler(
                "At least one query method must be implemented",
            )),
        }
    }
}

/// Generator yielding the single result of `query_one`, if any
pub fn all_from_one(query_one: &str) -> String {
    format!(
        "async function* (node, selector, PuppeteerUtil) {{\
         \n  const querySelector = ({query_one});\
         \n  const result = await querySelector(node, selector, PuppeteerUtil);\
         \n  if (result) {{\
         \n    yield result;\
         \n  }}\
         \n}}"
    )
}

/// Function returning the first item produced by `query_all`
pub fn one_from_all(query_all: &str) -> String {
    format!(
        "async (node, selector, PuppeteerUtil) => {{\
         \n  const querySelectorAll = ({query_all});\
         \n  const results = querySelectorAll(node, selector, PuppeteerUtil);\
         \n  for await (const result of results) {{\
         \n    return result;\
         \n  }}\
         \n  return null;\
         \n}}"
    )
}

/// Wraps a query generator so results can be pulled in batches
pub(crate) const ITERATOR_SCRIPT: &str = "(node, query, selector, PuppeteerUtil) => {\
    \n  const querySelectorAll = PuppeteerUtil.createFunction(query);\
    \n  return querySelectorAll(node, selector, PuppeteerUtil)[Symbol.asyncIterator]();\
    \n}";

/// Pulls up to `size` results from an iterator created by `ITERATOR_SCRIPT`
pub(crate) const NEXT_BATCH_SCRIPT: &str = "async (iterator, size) => {\
    \n  const results = [];\
    \n  while (results.length < size) {\
    \n    const result = await iterator.next();\
    \n    if (result.done) {\
    \n      break;\
    \n    }\
    \n    results.push(result.value);\
    \n  }\
    \n  return results;\
    \n}";

/// Number of handles fetched per round trip in `query_all`
pub(crate) const BATCH_SIZE: u64 = 20;

/// Polling predicate used by `wait_for`
pub(crate) const WAIT_FOR_SCRIPT: &str = "async (PuppeteerUtil, query, selector, root, visible) => {\
    \n  if (!PuppeteerUtil) {\
    \n    return;\
    \n  }\
    \n  const node = await PuppeteerUtil.createFunction(query)(root || document, selector, PuppeteerUtil);\
    \n  return PuppeteerUtil.checkVisibility(node, visible);\
    \n}";
