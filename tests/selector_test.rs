//! Selector parsing and dialect resolution

use chaser_locator::query::{Dialect, QueryHandler};
use chaser_locator::selector::{
    ast, parse, Combinator, ComplexPart, CompoundPart, PseudoSelector,
};
use chaser_locator::{CustomQueryHandler, CustomQuerySelectorRegistry, Error};

#[test]
fn test_plain_css_has_no_ast() {
    let result = parse("div.card");
    assert!(result.is_pure_css);
    assert!(result.ast.is_none());
    assert!(!result.has_aria);
}

#[test]
fn test_piercing_combinator() {
    let result = parse("div >>> span");
    assert!(!result.is_pure_css);

    let list = result.ast.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(
        list[0],
        vec![
            ComplexPart::Compound(vec![CompoundPart::Css("div".to_string())]),
            ComplexPart::Combinator(Combinator::Descendant),
            ComplexPart::Compound(vec![CompoundPart::Css("span".to_string())]),
        ]
    );
}

#[test]
fn test_text_pseudo() {
    let list = parse("::-p-text(\"Hello\")").ast.unwrap();
    assert_eq!(
        list,
        vec![vec![ComplexPart::Compound(vec![CompoundPart::Pseudo(PseudoSelector {
            name: "text".to_string(),
            value: "Hello".to_string(),
        })])]]
    );
}

#[test]
fn test_selector_list() {
    let result = parse("a, b >>>> c");
    assert_eq!(result.ast.unwrap().len(), 2);
}

#[test]
fn test_aria_pseudo_is_flagged() {
    let result = parse("form ::-p-aria(Submit)");
    assert!(!result.is_pure_css);
    assert!(result.has_aria);
}

#[test]
fn test_ast_json_reparse_is_stable() {
    let result = parse("div >>> ::-p-text(a, b) > span, x >>>> y");
    let json = result.ast_json().unwrap().unwrap();
    let reparsed = ast::from_json(&json).unwrap();
    assert_eq!(Some(reparsed.clone()), result.ast);
    assert_eq!(ast::to_json(&reparsed).unwrap(), json);
}

#[test]
fn test_css_handler_switches_to_extended_scripts() {
    let registry = CustomQuerySelectorRegistry::new();

    let (selector, handler) = registry.get_query_handler_and_selector("div.card");
    assert_eq!(handler.dialect(), Dialect::Css);
    let plain = handler.prepare(&selector).unwrap();
    assert_eq!(plain.selector, "div.card");
    assert!(plain.scripts.query_selector.contains("cssQuerySelector"));

    let (selector, handler) = registry.get_query_handler_and_selector("div >>> span");
    let extended = handler.prepare(&selector).unwrap();
    assert!(extended.scripts.query_selector.contains("pQuerySelector"));
    assert_eq!(extended.selector, parse("div >>> span").ast_json().unwrap().unwrap());
    assert!(extended.bindings.is_empty());

    let (selector, handler) = registry.get_query_handler_and_selector("::-p-aria(Submit)");
    let aria = handler.prepare(&selector).unwrap();
    assert_eq!(aria.bindings.len(), 1);
}

#[test]
fn test_aria_prefix_resolution() {
    let registry = CustomQuerySelectorRegistry::new();

    let (selector, handler) = registry.get_query_handler_and_selector("aria/Submit");
    assert_eq!(handler.dialect(), Dialect::Aria);
    assert_eq!(selector, "Submit");

    let (selector, handler) = registry.get_query_handler_and_selector("bogus/x");
    assert_eq!(handler.dialect(), Dialect::Css);
    assert_eq!(selector, "bogus/x");
}

#[test]
fn test_prefixes_and_separators() {
    let registry = CustomQuerySelectorRegistry::new();
    for (input, dialect, stripped) in [
        ("xpath///div", Dialect::XPath, "//div"),
        ("text=Sign in", Dialect::Text, "Sign in"),
        ("PIERCE/button", Dialect::Pierce, "button"),
    ] {
        let (selector, handler) = registry.get_query_handler_and_selector(input);
        assert_eq!(handler.dialect(), dialect, "{}", input);
        assert_eq!(selector, stripped);
    }
}

#[test]
fn test_registration_rules() {
    let registry = CustomQuerySelectorRegistry::new();
    let handler = CustomQueryHandler {
        query_one: Some("(node, selector) => node.querySelector(selector)".to_string()),
        query_all: None,
    };

    assert!(matches!(
        registry.register_custom_query_handler("aria", handler.clone()),
        Err(Error::QueryHandler(_))
    ));
    assert!(registry.register_custom_query_handler("foo1", handler.clone()).is_err());
    assert!(registry
        .register_custom_query_handler("foo", CustomQueryHandler::default())
        .is_err());

    registry.register_custom_query_handler("foo", handler.clone()).unwrap();
    let err = registry.register_custom_query_handler("foo", handler.clone()).unwrap_err();
    assert!(err.to_string().contains("Cannot register over existing handler"));

    let (selector, resolved) = registry.get_query_handler_and_selector("foo/.item");
    assert_eq!(resolved.dialect(), Dialect::Custom("foo".to_string()));
    assert_eq!(selector, ".item");
    assert!(resolved.scripts().query_selector_all.starts_with("async function*"));

    registry.register_custom_query_handler("bar", handler).unwrap();
    assert_eq!(registry.custom_query_handler_names(), vec!["foo", "bar"]);

    registry.unregister_custom_query_handler("foo");
    let (_, fallback) = registry.get_query_handler_and_selector("foo/.item");
    assert_eq!(fallback.dialect(), Dialect::Css);

    registry.clear_custom_query_handlers();
    assert!(registry.custom_query_handler_names().is_empty());
}
