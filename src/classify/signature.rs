use std::fmt;
use std::sync::Arc;

/// Normalized textual key for a computation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(Arc<str>);

impl Signature {
    /// Normalize a computation's source text.
    ///
    /// Whitespace is dropped, trailing `;` removed, parentheses enclosing the
    /// whole expression stripped, a parenthesized single parameter `(x)=>`
    /// rewritten as `x=>`, a `=>{return E;}` block body unwrapped to `=>E`,
    /// and parentheses enclosing a whole arrow body dropped (`x=>(E)`).
    /// An object-literal body such as `x=>({a:1})` keeps its parentheses.
    pub fn normalize(source: &str) -> Self {
        let mut text: String = source.chars().filter(|c| !c.is_whitespace()).collect();

        loop {
            let before = text.len();
            trim_semicolons(&mut text);
            strip_enclosing_parens(&mut text);
            unwrap_single_param(&mut text);
            unwrap_return_block(&mut text);
            strip_body_parens(&mut text);
            if text.len() == before {
                break;
            }
        }

        Self(Arc::from(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split an arrow signature into `(parameter, body)`
    pub fn arrow_parts(&self) -> Option<(&str, &str)> {
        let (param, body) = self.0.split_once("=>")?;
        if is_identifier(param) {
            Some((param, body))
        } else {
            None
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Signature {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn trim_semicolons(text: &mut String) {
    while text.ends_with(';') {
        text.pop();
    }
}

/// `((x=>x*2))` -> `x=>x*2`, but `(a)+(b)` is left alone
fn strip_enclosing_parens(text: &mut String) {
    while text.starts_with('(') && text.ends_with(')') && closes_at_end(text) {
        text.pop();
        text.remove(0);
    }
}

/// True when the `(` at index 0 is matched by the final `)`
fn closes_at_end(text: &str) -> bool {
    let mut depth = 0usize;
    let last = text.len() - 1;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i == last;
                }
            }
            _ => {}
        }
    }
    false
}

fn unwrap_single_param(text: &mut String) {
    if !text.starts_with('(') {
        return;
    }
    if let Some(end) = text.find(")=>") {
        let param = &text[1..end];
        if is_identifier(param) {
            *text = format!("{}{}", param, &text[end + 1..]);
        }
    }
}

/// `x=>(x*2)` -> `x=>x*2`
fn strip_body_parens(text: &mut String) {
    let Some((param, body)) = text.split_once("=>") else {
        return;
    };
    if !is_identifier(param) {
        return;
    }
    let mut inner = body.to_string();
    strip_enclosing_parens(&mut inner);
    if inner.len() == body.len() || inner.starts_with('{') {
        return;
    }
    *text = format!("{param}=>{inner}");
}

fn unwrap_return_block(text: &mut String) {
    let Some(arrow) = text.find("=>{return") else {
        return;
    };
    if !text.ends_with('}') {
        return;
    }
    let body = text[arrow + "=>{return".len()..text.len() - 1].trim_end_matches(';');
    // Nested blocks are not simple returns
    if body.contains('{') || body.contains(';') {
        return;
    }
    *text = format!("{}=>{}", &text[..arrow], body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_whitespace_insensitive() {
        assert_eq!(Signature::normalize("x => x * 2").as_str(), "x=>x*2");
        assert_eq!(Signature::normalize("x=>x*2\n").as_str(), "x=>x*2");
        assert_eq!(
            Signature::normalize("x => x * 2"),
            Signature::normalize("x=>x*2")
        );
    }

    #[test]
    fn test_redundant_delimiters() {
        assert_eq!(Signature::normalize("(x) => x * 2").as_str(), "x=>x*2");
        assert_eq!(Signature::normalize("((x => x * 2))").as_str(), "x=>x*2");
        assert_eq!(
            Signature::normalize("(x) => { return x * 2; }").as_str(),
            "x=>x*2"
        );
        assert_eq!(Signature::normalize("x => x + 1;").as_str(), "x=>x+1");
    }

    #[test]
    fn test_parenthesized_body() {
        assert_eq!(Signature::normalize("x => (x * 2)").as_str(), "x=>x*2");
        assert_eq!(Signature::normalize("(x) => ((x + 1))").as_str(), "x=>x+1");
        assert_eq!(Signature::normalize("x => (x + 1) * 2").as_str(), "x=>(x+1)*2");
        assert_eq!(Signature::normalize("x => ({ v: x })").as_str(), "x=>({v:x})");
    }

    #[test]
    fn test_non_redundant_parens_kept() {
        assert_eq!(Signature::normalize("(a)+(b)").as_str(), "(a)+(b)");
        assert_eq!(
            Signature::normalize("(a, b) => a + b").as_str(),
            "(a,b)=>a+b"
        );
    }

    #[test]
    fn test_arrow_parts() {
        let sig = Signature::normalize("value => value.length");
        assert_eq!(sig.arrow_parts(), Some(("value", "value.length")));
        assert_eq!(Signature::normalize("(a,b)=>a").arrow_parts(), None);
    }
}
