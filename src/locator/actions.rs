//! Action preconditions and fill logic
//!
//! Each check runs once per attempt; a failed check fails the attempt and
//! the locator's retry loop starts over from resolving the handle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::LocatorOptions;
use crate::session::traits::{EvalArg, HandleRef};
use crate::{Error, Result};

/// Samples the bounding box on two consecutive animation frames
pub(crate) const STABLE_BOUNDING_BOX_SCRIPT: &str = "element => new Promise(resolve => {\
    \n  window.requestAnimationFrame(() => {\
    \n    const first = element.getBoundingClientRect();\
    \n    window.requestAnimationFrame(() => {\
    \n      const second = element.getBoundingClientRect();\
    \n      resolve(first.x === second.x && first.y === second.y\
    \n        && first.width === second.width && first.height === second.height);\
    \n    });\
    \n  });\
    \n})";

pub(crate) const DISABLED_SCRIPT: &str =
    "element => typeof element.disabled === 'boolean' && element.disabled === true";

pub(crate) const FILL_KIND_SCRIPT: &str = "element => {\
    \n  if (element instanceof HTMLSelectElement) {\
    \n    return 'select';\
    \n  }\
    \n  if (element instanceof HTMLTextAreaElement) {\
    \n    return 'typeable-input';\
    \n  }\
    \n  if (element instanceof HTMLInputElement) {\
    \n    const typeable = ['textarea', 'text', 'url', 'tel', 'search', 'password', 'number', 'email'];\
    \n    return typeable.includes(element.type) ? 'typeable-input' : 'other-input';\
    \n  }\
    \n  if (element.isContentEditable) {\
    \n    return 'contenteditable';\
    \n  }\
    \n  return 'unknown';\
    \n}";

pub(crate) const TEXT_VALUE_SCRIPT: &str =
    "element => element.isContentEditable ? element.innerText : element.value";

pub(crate) const CLEAR_VALUE_SCRIPT: &str = "element => {\
    \n  if (element.isContentEditable) {\
    \n    element.innerText = '';\
    \n  } else {\
    \n    element.value = '';\
    \n  }\
    \n}";

pub(crate) const ASSIGN_VALUE_SCRIPT: &str = "(element, value) => {\
    \n  element.value = value;\
    \n  element.dispatchEvent(new Event('input', { bubbles: true }));\
    \n  element.dispatchEvent(new Event('change', { bubbles: true }));\
    \n}";

pub(crate) const SCROLL_SCRIPT: &str = "(element, top, left) => {\
    \n  if (top !== null && top !== undefined) {\
    \n    element.scrollTop = top;\
    \n  }\
    \n  if (left !== null && left !== undefined) {\
    \n    element.scrollLeft = left;\
    \n  }\
    \n}";

/// How an element accepts a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FillKind {
    Select,
    TypeableInput,
    OtherInput,
    Contenteditable,
    Unknown,
}

/// Keystrokes needed to turn `current` into `desired`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingPlan {
    /// Empty the field before typing
    pub clear: bool,
    pub text: String,
}

/// Type only the missing suffix when `desired` extends `current`
pub fn plan_typing(current: &str, desired: &str) -> TypingPlan {
    if desired.len() <= current.len() || !desired.starts_with(current) {
        return TypingPlan {
            clear: true,
            text: desired.to_string(),
        };
    }
    TypingPlan {
        clear: false,
        text: desired[current.len()..].to_string(),
    }
}

pub(crate) async fn ensure_in_viewport(options: &LocatorOptions, handle: &HandleRef) -> Result<()> {
    if !options.ensure_in_viewport {
        return Ok(());
    }
    if !handle.is_intersecting_viewport(0.0).await? {
        debug!("Scrolling element into view");
        handle.scroll_into_view().await?;
    }
    Ok(())
}

pub(crate) async fn wait_for_stable_bounding_box(options: &LocatorOptions, handle: &HandleRef) -> Result<()> {
    if !options.wait_for_stable_bounding_box {
        return Ok(());
    }
    match handle.evaluate(STABLE_BOUNDING_BOX_SCRIPT, vec![]).await? {
        Value::Bool(true) => Ok(()),
        _ => Err(Error::element_not_ready("Bounding box is still moving")),
    }
}

pub(crate) async fn wait_for_enabled(options: &LocatorOptions, handle: &HandleRef) -> Result<()> {
    if !options.wait_for_enabled {
        return Ok(());
    }
    match handle.evaluate(DISABLED_SCRIPT, vec![]).await? {
        Value::Bool(true) => Err(Error::element_not_ready("Element is disabled")),
        _ => Ok(()),
    }
}

pub(crate) async fn scroll(handle: &HandleRef, top: Option<f64>, left: Option<f64>) -> Result<()> {
    handle
        .evaluate(SCROLL_SCRIPT, vec![Value::from(top).into(), Value::from(left).into()])
        .await?;
    Ok(())
}

/// Put `value` into the element the way its kind expects
pub(crate) async fn fill(handle: &HandleRef, value: &str) -> Result<()> {
    let kind: FillKind = serde_json::from_value(handle.evaluate(FILL_KIND_SCRIPT, vec![]).await?)?;
    debug!("Filling {:?} element", kind);

    match kind {
        FillKind::Select => {
            handle.select(&[value.to_string()]).await?;
        }
        FillKind::TypeableInput | FillKind::Contenteditable => {
            let current = match handle.evaluate(TEXT_VALUE_SCRIPT, vec![]).await? {
                Value::String(current) => current,
                _ => String::new(),
            };
            let plan = plan_typing(&current, value);
            if plan.clear {
                handle.evaluate(CLEAR_VALUE_SCRIPT, vec![]).await?;
            }
            handle.type_text(&plan.text).await?;
        }
        FillKind::OtherInput => {
            handle.focus().await?;
            handle
                .evaluate(ASSIGN_VALUE_SCRIPT, vec![EvalArg::from(value)])
                .await?;
        }
        FillKind::Unknown => return Err(Error::unsupported_element("Element cannot be filled out")),
    }
    Ok(())
}
