//! Selector parser
//!
//! Single pass over the selector text. Plain CSS is left alone for the native
//! engine; `>>>`, `>>>>` and `::-p-*` pseudo-elements produce a structured AST.

use serde::Serialize;

use super::ast::{
    Combinator, ComplexPart, ComplexSelector, CompoundPart, CompoundSelector, PseudoSelector,
    SelectorList,
};

/// Outcome of parsing one selector string
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseResult {
    /// No extended syntax was found
    pub is_pure_css: bool,
    /// Structured form, present only when `is_pure_css` is false
    pub ast: Option<SelectorList>,
    /// A single-colon pseudo-class appeared somewhere
    pub has_pseudo_classes: bool,
    /// A `::-p-aria(...)` pseudo-element appeared somewhere
    pub has_aria: bool,
}

impl ParseResult {
    /// JSON handed to the in-page matcher, if the selector needs one
    pub fn ast_json(&self) -> crate::Result<Option<String>> {
        self.ast.as_ref().map(super::ast::to_json).transpose()
    }
}

/// Parse a selector string
pub fn parse(selector: &str) -> ParseResult {
    SelectorParser::new(selector).run()
}

struct SelectorParser<'a> {
    input: &'a str,
    pos: usize,
    buffer: String,
    compound: CompoundSelector,
    complex: ComplexSelector,
    list: SelectorList,
    is_pure_css: bool,
    has_pseudo_classes: bool,
    has_aria: bool,
}

impl<'a> SelectorParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            buffer: String::new(),
            compound: Vec::new(),
            complex: Vec::new(),
            list: Vec::new(),
            is_pure_css: true,
            has_pseudo_classes: false,
            has_aria: false,
        }
    }

    fn run(mut self) -> ParseResult {
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b'"' | b'\'' => self.take(scan_string(self.input, self.pos)),
                b'[' => self.take(scan_group(self.input, self.pos, b'[', b']').0),
                b'(' => self.take(scan_group(self.input, self.pos, b'(', b')').0),
                b'\\' => self.take(skip_escape(self.input, self.pos)),
                b'>' if self.rest().starts_with(">>>") => self.combinator(),
                b':' if self.rest().starts_with("::-p-") => self.p_pseudo_element(),
                b':' if self.rest().starts_with("::") => self.take(self.pos + 2),
                b':' => self.pseudo_class(),
                b',' => {
                    self.pos += 1;
                    self.close_complex();
                    self.skip_whitespace();
                }
                _ => self.take(next_char(self.input, self.pos)),
            }
        }
        self.finish()
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    /// Copy `pos..end` into the CSS buffer
    fn take(&mut self, end: usize) {
        self.buffer.push_str(&self.input[self.pos..end]);
        self.pos = end;
    }

    fn skip_whitespace(&mut self) {
        let skipped = self.rest().len() - self.rest().trim_start().len();
        self.pos += skipped;
    }

    fn flush(&mut self) {
        let css = self.buffer.trim();
        if !css.is_empty() {
            self.compound.push(CompoundPart::Css(css.to_string()));
        }
        self.buffer.clear();
    }

    fn close_compound(&mut self) {
        self.flush();
        let compound = std::mem::take(&mut self.compound);
        self.complex.push(ComplexPart::Compound(compound));
    }

    fn close_complex(&mut self) {
        self.close_compound();
        let complex = std::mem::take(&mut self.complex);
        self.list.push(complex);
    }

    fn combinator(&mut self) {
        let combinator = if self.rest().starts_with(">>>>") {
            Combinator::Child
        } else {
            Combinator::Descendant
        };
        self.pos += combinator.as_str().len();
        self.is_pure_css = false;
        self.close_compound();
        self.complex.push(ComplexPart::Combinator(combinator));
        self.skip_whitespace();
    }

    fn p_pseudo_element(&mut self) {
        let name_start = self.pos + "::-p-".len();
        let name_len = self.input[name_start..]
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'-')
            .count();
        if name_len == 0 {
            // not a pseudo-element after all, keep the text
            self.take(name_start);
            return;
        }
        let name_end = name_start + name_len;
        let name = self.input[name_start..name_end].to_string();

        let mut end = name_end;
        let mut value = String::new();
        if self.input.as_bytes().get(name_end) == Some(&b'(') {
            let (group_end, closed) = scan_group(self.input, name_end, b'(', b')');
            let inner_end = if closed { group_end - 1 } else { group_end };
            value = unquote(self.input[name_end + 1..inner_end].trim());
            end = group_end;
        }

        self.flush();
        if name == "aria" {
            self.has_aria = true;
        }
        self.compound
            .push(CompoundPart::Pseudo(PseudoSelector { name, value }));
        self.is_pure_css = false;
        self.pos = end;
    }

    fn pseudo_class(&mut self) {
        let ident_start = self.pos + 1;
        let ident_len = self.input[ident_start..]
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_')
            .count();
        let mut end = ident_start + ident_len;
        if ident_len > 0 {
            self.has_pseudo_classes = true;
            if self.input.as_bytes().get(end) == Some(&b'(') {
                end = scan_group(self.input, end, b'(', b')').0;
            }
        }
        self.take(end);
    }

    fn finish(mut self) -> ParseResult {
        self.close_complex();
        ParseResult {
            is_pure_css: self.is_pure_css,
            ast: (!self.is_pure_css).then_some(self.list),
            has_pseudo_classes: self.has_pseudo_classes,
            has_aria: self.has_aria,
        }
    }
}

/// Byte offset just past the character at `pos`
fn next_char(input: &str, pos: usize) -> usize {
    pos + input[pos..].chars().next().map_or(1, char::len_utf8)
}

/// Byte offset just past a backslash escape starting at `pos`
fn skip_escape(input: &str, pos: usize) -> usize {
    let after = pos + 1;
    if after >= input.len() {
        return input.len();
    }
    next_char(input, after)
}

/// End of a quoted string starting at `start`; unterminated strings run to the end
fn scan_string(input: &str, start: usize) -> usize {
    let bytes = input.as_bytes();
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i = skip_escape(input, i);
                continue;
            }
            b if b == quote => return i + 1,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// End of a bracketed group starting at `start`, and whether it was closed
fn scan_group(input: &str, start: usize, open: u8, close: u8) -> (usize, bool) {
    let bytes = input.as_bytes();
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i = skip_escape(input, i);
                continue;
            }
            b'"' | b'\'' => {
                i = scan_string(input, i);
                continue;
            }
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return (i + 1, true);
                }
            }
            _ => {}
        }
        i += 1;
    }
    (bytes.len(), false)
}

/// Strip matching outer quotes and drop backslash escapes
fn unquote(text: &str) -> String {
    let mut inner = text;
    if let Some(first) = text.chars().next() {
        if text.len() >= 2 && (first == '"' || first == '\'') && text.ends_with(first) {
            inner = &text[1..text.len() - 1];
        }
    }

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn css(s: &str) -> CompoundPart {
        CompoundPart::Css(s.to_string())
    }

    fn pseudo(name: &str, value: &str) -> CompoundPart {
        CompoundPart::Pseudo(PseudoSelector {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    #[test]
    fn test_plain_css_is_pure() {
        let result = parse("div.card");
        assert!(result.is_pure_css);
        assert!(result.ast.is_none());
        assert!(!result.has_pseudo_classes);
    }

    #[test]
    fn test_descendant_piercing() {
        let result = parse("div >>> span");
        assert!(!result.is_pure_css);
        let ast = result.ast.unwrap();
        assert_eq!(ast.len(), 1);
        assert_eq!(
            ast[0],
            vec![
                ComplexPart::Compound(vec![css("div")]),
                ComplexPart::Combinator(Combinator::Descendant),
                ComplexPart::Compound(vec![css("span")]),
            ]
        );
    }

    #[test]
    fn test_child_piercing() {
        let ast = parse("my-app >>>> .item").ast.unwrap();
        assert_eq!(ast[0][1], ComplexPart::Combinator(Combinator::Child));
        assert_eq!(ast[0][2], ComplexPart::Compound(vec![css(".item")]));
    }

    #[test]
    fn test_text_pseudo_element() {
        let ast = parse("::-p-text(\"Hello\")").ast.unwrap();
        assert_eq!(ast, vec![vec![ComplexPart::Compound(vec![pseudo("text", "Hello")])]]);
    }

    #[test]
    fn test_pseudo_element_after_css() {
        let ast = parse("button::-p-text(Sign in)").ast.unwrap();
        assert_eq!(
            ast[0][0],
            ComplexPart::Compound(vec![css("button"), pseudo("text", "Sign in")])
        );
    }

    #[test]
    fn test_pseudo_element_without_argument() {
        let ast = parse("div::-p-hidden").ast.unwrap();
        assert_eq!(ast[0][0], ComplexPart::Compound(vec![css("div"), pseudo("hidden", "")]));
    }

    #[test]
    fn test_pseudo_value_unescaped() {
        let ast = parse(r#"::-p-text('it\'s (here)')"#).ast.unwrap();
        assert_eq!(ast[0][0], ComplexPart::Compound(vec![pseudo("text", "it's (here)")]));
    }

    #[test]
    fn test_aria_flag() {
        let result = parse("::-p-aria(Submit)");
        assert!(result.has_aria);
        assert!(!result.is_pure_css);
    }

    #[test]
    fn test_selector_list() {
        let result = parse("a >>> b, c");
        let ast = result.ast.unwrap();
        assert_eq!(ast.len(), 2);
        assert_eq!(ast[1], vec![ComplexPart::Compound(vec![css("c")])]);
    }

    #[test]
    fn test_pure_list_has_no_ast() {
        let result = parse("a, b");
        assert!(result.is_pure_css);
        assert!(result.ast.is_none());
    }

    #[test]
    fn test_list_of_two_extended_selectors() {
        let ast = parse("a::-p-text(x), b::-p-text(y)").ast.unwrap();
        assert_eq!(ast.len(), 2);
    }

    #[test]
    fn test_commas_inside_spans_are_literal() {
        let ast = parse(r#"div[title="a, b"]::-p-text(x, y)"#).ast.unwrap();
        assert_eq!(ast.len(), 1);
        assert_eq!(
            ast[0][0],
            ComplexPart::Compound(vec![css(r#"div[title="a, b"]"#), pseudo("text", "x, y")])
        );
    }

    #[test]
    fn test_combinator_inside_attribute_is_literal() {
        let result = parse(r#"a[data-x=">>>"]"#);
        assert!(result.is_pure_css);
    }

    #[test]
    fn test_pseudo_class_passthrough() {
        let result = parse("li:nth-child(2n + 1) >>> a:hover");
        assert!(result.has_pseudo_classes);
        let ast = result.ast.unwrap();
        assert_eq!(ast[0][0], ComplexPart::Compound(vec![css("li:nth-child(2n + 1)")]));
        assert_eq!(ast[0][2], ComplexPart::Compound(vec![css("a:hover")]));
    }

    #[test]
    fn test_pseudo_class_keeps_purity() {
        let result = parse("input:not([disabled])");
        assert!(result.is_pure_css);
        assert!(result.has_pseudo_classes);
    }

    #[test]
    fn test_standard_pseudo_element_is_css() {
        let result = parse("p::first-line");
        assert!(result.is_pure_css);
        assert!(!result.has_pseudo_classes);
    }

    #[test]
    fn test_malformed_pseudo_element_degrades_to_css() {
        let result = parse("div::-p-(x)");
        assert!(result.is_pure_css);
    }

    #[test]
    fn test_unterminated_argument_runs_to_end() {
        let ast = parse("::-p-text(\"never closed").ast.unwrap();
        assert_eq!(ast[0][0], ComplexPart::Compound(vec![pseudo("text", "\"never closed")]));
    }

    #[test]
    fn test_unterminated_string_is_consumed() {
        let result = parse("a[title=\"x >>> y");
        assert!(result.is_pure_css);
    }

    #[test]
    fn test_non_ascii_text() {
        let ast = parse("section >>> ::-p-text(héllo wörld)").ast.unwrap();
        assert_eq!(ast[0][2], ComplexPart::Compound(vec![pseudo("text", "héllo wörld")]));
    }

    #[test]
    fn test_json_round_trip() {
        let result = parse(r#"div.list >>>> li::-p-text("x") >>> a, ::-p-xpath(//b)"#);
        let json = result.ast_json().unwrap().unwrap();
        let reparsed = super::super::ast::from_json(&json).unwrap();
        assert_eq!(Some(reparsed), result.ast);
    }
}
