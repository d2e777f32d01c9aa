//! JSX to `h(type, props, ...children)` transpiler.
//!
//! V8 cannot parse JSX, so component source is lowered before it enters the
//! isolate. The scanner understands strings, template literals and comments
//! well enough to leave them alone; regex literals are not recognized.

use thiserror::Error;

/// Element factory the lowered code calls.
pub const ELEMENT_FACTORY: &str = "h";

/// Identifier used for `<>...</>`.
pub const FRAGMENT: &str = "Fragment";

/// Words after which `<` starts an element rather than a comparison.
const EXPRESSION_KEYWORDS: &[&str] = &["return", "yield", "default", "case", "await"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("JSX syntax error at offset {offset}: {message}")]
pub struct JsxError {
    pub message: String,
    pub offset: usize,
}

/// Lower every JSX element in `source` to factory calls.
pub fn transpile(source: &str) -> Result<String, JsxError> {
    let mut parser = Parser {
        chars: source.chars().collect(),
        pos: 0,
    };
    parser.js(false)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> JsxError {
        JsxError {
            message: message.into(),
            offset,
        }
    }

    fn error(&self, message: impl Into<String>) -> JsxError {
        self.error_at(self.pos, message)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), JsxError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{expected}'")))
        }
    }

    fn eat(&mut self, literal: &str) -> bool {
        let matches = literal
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c));
        if matches {
            self.pos += literal.chars().count();
        }
        matches
    }

    /// Copy plain JavaScript, lowering any element found in expression
    /// position. With `in_braces`, stops after the `}` closing the current
    /// expression container (the opening `{` is already consumed).
    fn js(&mut self, in_braces: bool) -> Result<String, JsxError> {
        let start = self.pos;
        let mut out = String::new();
        let mut depth = 0usize;

        while let Some(c) = self.peek() {
            match c {
                '\'' | '"' => self.copy_string(&mut out, c),
                '`' => self.copy_template(&mut out)?,
                '/' if self.peek_at(1) == Some('/') => self.copy_until(&mut out, "\n"),
                '/' if self.peek_at(1) == Some('*') => self.copy_until(&mut out, "*/"),
                '{' => {
                    depth += 1;
                    out.push(c);
                    self.pos += 1;
                }
                '}' => {
                    if depth == 0 && in_braces {
                        self.pos += 1;
                        return Ok(out);
                    }
                    depth = depth.saturating_sub(1);
                    out.push(c);
                    self.pos += 1;
                }
                '<' if in_expression_position(&out) && self.element_follows() => {
                    let element = self.element()?;
                    out.push_str(&element);
                }
                _ => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }

        if in_braces {
            Err(self.error_at(start, "unterminated expression container"))
        } else {
            Ok(out)
        }
    }

    fn element_follows(&self) -> bool {
        matches!(self.peek_at(1), Some(c) if c == '>' || c.is_alphabetic() || c == '_' || c == '$')
    }

    fn copy_string(&mut self, out: &mut String, quote: char) {
        out.push(quote);
        self.pos += 1;
        while let Some(c) = self.peek() {
            out.push(c);
            self.pos += 1;
            if c == '\\' {
                if let Some(escaped) = self.peek() {
                    out.push(escaped);
                    self.pos += 1;
                }
            } else if c == quote || c == '\n' {
                break;
            }
        }
    }

    fn copy_template(&mut self, out: &mut String) -> Result<(), JsxError> {
        let start = self.pos;
        out.push('`');
        self.pos += 1;
        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    out.push(c);
                    self.pos += 1;
                    if let Some(escaped) = self.peek() {
                        out.push(escaped);
                        self.pos += 1;
                    }
                }
                '`' => {
                    out.push(c);
                    self.pos += 1;
                    return Ok(());
                }
                '$' if self.peek_at(1) == Some('{') => {
                    self.pos += 2;
                    let inner = self.js(true)?;
                    out.push_str("${");
                    out.push_str(&inner);
                    out.push('}');
                }
                _ => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
        Err(self.error_at(start, "unterminated template literal"))
    }

    fn copy_until(&mut self, out: &mut String, terminator: &str) {
        while self.peek().is_some() {
            if self.eat(terminator) {
                out.push_str(terminator);
                return;
            }
            if let Some(c) = self.peek() {
                out.push(c);
            }
            self.pos += 1;
        }
    }

    fn name(&mut self) -> Result<String, JsxError> {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || matches!(c, '_' | '$' | '.' | ':' | '-') {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        if name.is_empty() {
            Err(self.error("expected a tag or attribute name"))
        } else {
            Ok(name)
        }
    }

    fn element(&mut self) -> Result<String, JsxError> {
        let start = self.pos;
        self.pos += 1;
        self.skip_ws();

        let tag = if self.peek() == Some('>') {
            self.pos += 1;
            None
        } else {
            Some(self.name()?)
        };

        let mut attributes = Vec::new();
        if tag.is_some() {
            loop {
                self.skip_ws();
                match self.peek() {
                    Some('/') => {
                        self.pos += 1;
                        self.skip_ws();
                        self.expect('>')?;
                        return Ok(emit(tag.as_deref(), &attributes, &[]));
                    }
                    Some('>') => {
                        self.pos += 1;
                        break;
                    }
                    Some('{') => {
                        self.pos += 1;
                        self.skip_ws();
                        if !self.eat("...") {
                            return Err(self.error("expected a spread attribute"));
                        }
                        let expr = self.js(true)?;
                        attributes.push(format!("...{}", wrap(&expr)));
                    }
                    Some(_) => {
                        let name = self.name()?;
                        self.skip_ws();
                        let value = if self.peek() == Some('=') {
                            self.pos += 1;
                            self.skip_ws();
                            self.attribute_value()?
                        } else {
                            String::from("true")
                        };
                        attributes.push(format!("{}: {}", quote(&name), value));
                    }
                    None => return Err(self.error_at(start, "unterminated element")),
                }
            }
        }

        let children = self.children(tag.as_deref(), start)?;
        Ok(emit(tag.as_deref(), &attributes, &children))
    }

    fn attribute_value(&mut self) -> Result<String, JsxError> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                let mut raw = String::new();
                while let Some(c) = self.peek() {
                    self.pos += 1;
                    if c == q {
                        return Ok(quote(&decode_entities(&raw)));
                    }
                    raw.push(c);
                }
                Err(self.error("unterminated attribute string"))
            }
            Some('{') => {
                self.pos += 1;
                let expr = self.js(true)?;
                Ok(wrap(&expr))
            }
            Some('<') => self.element(),
            _ => Err(self.error("expected an attribute value")),
        }
    }

    fn children(&mut self, tag: Option<&str>, start: usize) -> Result<Vec<String>, JsxError> {
        let mut children = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(self.error_at(
                        start,
                        format!("unterminated element <{}>", tag.unwrap_or("")),
                    ))
                }
                Some('<') if self.peek_at(1) == Some('/') => {
                    self.pos += 2;
                    self.skip_ws();
                    let closing = if self.peek() == Some('>') {
                        None
                    } else {
                        Some(self.name()?)
                    };
                    self.skip_ws();
                    self.expect('>')?;
                    if closing.as_deref() != tag {
                        return Err(self.error_at(
                            start,
                            format!(
                                "closing tag </{}> does not match <{}>",
                                closing.unwrap_or_default(),
                                tag.unwrap_or("")
                            ),
                        ));
                    }
                    return Ok(children);
                }
                Some('<') => children.push(self.element()?),
                Some('{') => {
                    self.pos += 1;
                    let expr = self.js(true)?;
                    if !is_empty_expression(&expr) {
                        children.push(wrap(&expr));
                    }
                }
                Some(_) => {
                    let mut text = String::new();
                    while let Some(c) = self.peek() {
                        if c == '<' || c == '{' {
                            break;
                        }
                        text.push(c);
                        self.pos += 1;
                    }
                    if let Some(cleaned) = clean_text(&text) {
                        children.push(quote(&decode_entities(&cleaned)));
                    }
                }
            }
        }
    }
}

fn in_expression_position(out: &str) -> bool {
    let trimmed = out.trim_end();
    match trimmed.chars().last() {
        None => true,
        Some(c) if "([{,;=:?!&|>".contains(c) => true,
        Some(c) if c.is_alphanumeric() || c == '_' || c == '$' => {
            let word: String = trimmed
                .chars()
                .rev()
                .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            EXPRESSION_KEYWORDS.contains(&word.as_str())
        }
        Some(_) => false,
    }
}

fn emit(tag: Option<&str>, attributes: &[String], children: &[String]) -> String {
    let element_type = match tag {
        None => FRAGMENT.to_string(),
        Some(name) if is_intrinsic(name) => quote(name),
        Some(name) => name.to_string(),
    };
    let props = if attributes.is_empty() {
        String::from("null")
    } else {
        format!("{{ {} }}", attributes.join(", "))
    };
    let mut call = format!("{ELEMENT_FACTORY}({element_type}, {props}");
    for child in children {
        call.push_str(", ");
        call.push_str(child);
    }
    call.push(')');
    call
}

/// Lowercase tags and custom elements are host elements; anything else is a
/// component reference.
fn is_intrinsic(name: &str) -> bool {
    name.contains('-') || (name.starts_with(|c: char| c.is_lowercase()) && !name.contains('.'))
}

fn wrap(expr: &str) -> String {
    if expr.contains("//") {
        format!("({expr}\n)")
    } else {
        format!("({})", expr.trim())
    }
}

fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn is_empty_expression(expr: &str) -> bool {
    let mut rest = expr.trim();
    while let Some(stripped) = rest.strip_prefix("/*") {
        match stripped.find("*/") {
            Some(end) => rest = stripped[end + 2..].trim_start(),
            None => return false,
        }
    }
    rest.is_empty()
}

/// JSX text rules: lines are trimmed, blank lines dropped, the rest joined
/// with single spaces. Text without a line break is kept verbatim.
fn clean_text(text: &str) -> Option<String> {
    if !text.contains('\n') {
        return (!text.is_empty()).then(|| text.to_string());
    }

    let lines: Vec<&str> = text.lines().collect();
    let last_non_empty = lines.iter().rposition(|line| !line.trim().is_empty())?;
    let last_index = lines.len() - 1;
    let ends_with_newline = text.ends_with('\n');

    let mut cleaned = String::new();
    for (i, line) in lines.iter().enumerate() {
        let mut piece = *line;
        if i != 0 {
            piece = piece.trim_start();
        }
        if i != last_index || ends_with_newline {
            piece = piece.trim_end();
        }
        if piece.is_empty() {
            continue;
        }
        cleaned.push_str(piece);
        if i != last_non_empty {
            cleaned.push(' ');
        }
    }
    (!cleaned.is_empty()).then_some(cleaned)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", "\u{a0}")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&copy;", "\u{a9}")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_closing_element() {
        assert_eq!(transpile("const a = <br/>;").unwrap(), r#"const a = h("br", null);"#);
    }

    #[test]
    fn test_attributes() {
        let out = transpile(r#"return <input type="text" disabled value={v} {...rest} />"#).unwrap();
        assert_eq!(
            out,
            r#"return h("input", { "type": "text", "disabled": true, "value": (v), ...(rest) })"#
        );
    }

    #[test]
    fn test_nested_children_and_text() {
        let source = r#"return (
    <div className="box">
      <h3>{title}</h3>
      Hello   world
      <Child count={1} />
    </div>
  );"#;
        let out = transpile(source).unwrap();
        assert_eq!(
            out,
            r#"return (
    h("div", { "className": "box" }, h("h3", null, (title)), "Hello   world", h(Child, { "count": (1) }))
  );"#
        );
    }

    #[test]
    fn test_fragment_and_member_tags() {
        let out = transpile("x = <><UI.Card>a</UI.Card></>").unwrap();
        assert_eq!(out, r#"x = h(Fragment, null, h(UI.Card, null, "a"))"#);
    }

    #[test]
    fn test_comparisons_are_untouched() {
        let source = "if (a<b && c < d) { return i <= n; }";
        assert_eq!(transpile(source).unwrap(), source);
    }

    #[test]
    fn test_strings_and_comments_are_untouched() {
        let source = "const s = '<div>'; // <p>\n/* <span> */ const t = \"<b>\";";
        assert_eq!(transpile(source).unwrap(), source);
    }

    #[test]
    fn test_jsx_inside_expressions() {
        let out = transpile("{items.map((x) => <li key={x}>{x}</li>)}").unwrap();
        assert_eq!(out, r#"{items.map((x) => h("li", { "key": (x) }, (x)))}"#);

        let out = transpile("return ok ? <a/> : <b/>;").unwrap();
        assert_eq!(out, r#"return ok ? h("a", null) : h("b", null);"#);
    }

    #[test]
    fn test_template_literal_with_jsx() {
        let out = transpile("const s = `n=${n}`; const e = <p title={`${n}%`}>x</p>;").unwrap();
        assert_eq!(
            out,
            r#"const s = `n=${n}`; const e = h("p", { "title": (`${n}%`) }, "x");"#
        );
    }

    #[test]
    fn test_same_line_space_between_expressions() {
        let out = transpile("<p>{first} {last}</p>").unwrap();
        assert_eq!(out, r#"h("p", null, (first), " ", (last))"#);

        let out = transpile("<p>\n  {first}\n  {last}\n</p>").unwrap();
        assert_eq!(out, r#"h("p", null, (first), (last))"#);
    }

    #[test]
    fn test_comment_children_are_dropped() {
        let out = transpile("<div>{/* note */}<span/></div>").unwrap();
        assert_eq!(out, r#"h("div", null, h("span", null))"#);
    }

    #[test]
    fn test_entities_and_quotes_in_text() {
        let out = transpile(r#"<p>Tom &amp; "Jerry" don't</p>"#).unwrap();
        assert_eq!(out, r#"h("p", null, "Tom & \"Jerry\" don't")"#);
    }

    #[test]
    fn test_mismatched_closing_tag() {
        let err = transpile("return <div><span></div></span>;").unwrap_err();
        assert!(err.message.contains("does not match"));
    }

    #[test]
    fn test_unterminated_element() {
        let err = transpile("return <div>hello").unwrap_err();
        assert!(err.message.contains("unterminated element <div>"));
        assert_eq!(err.offset, 7);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("\n   \n  "), None);
        assert_eq!(clean_text("  a  "), Some("  a  ".to_string()));
        assert_eq!(clean_text(" "), Some(" ".to_string()));
        assert_eq!(clean_text("\n  "), None);
        assert_eq!(clean_text("\n  one\n  two\n"), Some("one two".to_string()));
    }
}
