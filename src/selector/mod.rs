//! Extended selector syntax
//!
//! Standard CSS plus `>>>` / `>>>>` shadow-piercing combinators and
//! `::-p-<name>(<value>)` pseudo-elements.

pub mod ast;
pub mod parser;

pub use ast::{
    Combinator, ComplexPart, ComplexSelector, CompoundPart, CompoundSelector, PseudoSelector,
    SelectorList,
};
pub use parser::{parse, ParseResult};
