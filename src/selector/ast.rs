//! Selector AST
//!
//! The serde representation of these types is the wire format consumed by the
//! in-page `pQuerySelector` matcher: arrays of arrays, with combinators as bare
//! strings and pseudo nodes as `{"name": .., "value": ..}` objects.

use serde::{Deserialize, Serialize};

/// Shadow-DOM-piercing combinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combinator {
    /// `>>>`: any shadow-including descendant
    #[serde(rename = ">>>")]
    Descendant,
    /// `>>>>`: direct shadow-root children
    #[serde(rename = ">>>>")]
    Child,
}

impl Combinator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Combinator::Descendant => ">>>",
            Combinator::Child => ">>>>",
        }
    }
}

/// `::-p-<name>(<value>)` pseudo-element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PseudoSelector {
    pub name: String,
    pub value: String,
}

/// One entry of a compound selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompoundPart {
    /// Raw CSS handed to the native engine
    Css(String),
    Pseudo(PseudoSelector),
}

pub type CompoundSelector = Vec<CompoundPart>;

/// One entry of a complex selector: a compound or the combinator joining two
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComplexPart {
    Combinator(Combinator),
    Compound(CompoundSelector),
}

pub type ComplexSelector = Vec<ComplexPart>;

pub type SelectorList = Vec<ComplexSelector>;

/// Serialize an AST to the matcher's JSON shape
pub fn to_json(list: &SelectorList) -> crate::Result<String> {
    Ok(serde_json::to_string(list)?)
}

/// Read an AST back from the matcher's JSON shape
pub fn from_json(json: &str) -> crate::Result<SelectorList> {
    Ok(serde_json::from_str(json)?)
}
