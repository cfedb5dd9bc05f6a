//! Sub-path patterns with named segments.
//!
//! # Responsibilities
//! - Compile `dev/{ident}` style patterns into literal and placeholder tokens
//! - Match a whole sub-path and extract one value per placeholder
//!
//! # Design Decisions
//! - Literals compare case-sensitively
//! - A placeholder captures one or more characters, never a `/`
//! - Adjacent tokens are resolved by backtracking, so `{a}-{b}` works

/// One compiled piece of a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Param(String),
}

/// A compiled sub-path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    tokens: Vec<Token>,
}

impl PathPattern {
    /// Compile a pattern. An unclosed `{` is taken literally.
    pub fn new(pattern: impl Into<String>) -> Self {
        let source = pattern.into();
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = source.as_str();

        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|c| open + c) else {
                break;
            };
            literal.push_str(&rest[..open]);
            let name = &rest[open + 1..close];
            if name.is_empty() {
                literal.push_str("{}");
            } else {
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(Token::Param(name.to_string()));
            }
            rest = &rest[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Self { source, tokens }
    }

    /// The pattern as registered.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Names of the placeholders, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Param(name) => Some(name.as_str()),
            Token::Literal(_) => None,
        })
    }

    /// Match the entire `path`; returns the captured values by name.
    pub fn match_entire(&self, path: &str) -> Option<Vec<(String, String)>> {
        let mut captures = Vec::new();
        match_tokens(&self.tokens, path, &mut captures).then_some(captures)
    }
}

fn match_tokens(tokens: &[Token], input: &str, captures: &mut Vec<(String, String)>) -> bool {
    let Some((first, rest)) = tokens.split_first() else {
        return input.is_empty();
    };
    match first {
        Token::Literal(text) => match input.strip_prefix(text.as_str()) {
            Some(remaining) => match_tokens(rest, remaining, captures),
            None => false,
        },
        Token::Param(name) => {
            let segment_end = input.find('/').unwrap_or(input.len());
            // try the longest capture first
            for end in (1..=segment_end).rev() {
                if !input.is_char_boundary(end) {
                    continue;
                }
                captures.push((name.clone(), input[..end].to_string()));
                if match_tokens(rest, &input[end..], captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
    }
}

/// Strip a mount prefix from a request path, yielding the sub-path without
/// its leading `/`. `None` when `path` is not under `prefix`.
pub fn trim_mount<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(pattern: &str, path: &str) -> Option<Vec<(String, String)>> {
        PathPattern::new(pattern).match_entire(path)
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn named_segment() {
        assert_eq!(captured("dev/{ident}", "dev/42"), Some(pairs(&[("ident", "42")])));
        assert_eq!(captured("dev/{ident}", "dev/"), None);
        assert_eq!(captured("dev/{ident}", "dev/4/2"), None);
        assert_eq!(captured("dev/{ident}", "data/42"), None);
    }

    #[test]
    fn literal_only() {
        assert_eq!(captured("status", "status"), Some(vec![]));
        assert_eq!(captured("status", "status/x"), None);
        assert_eq!(captured("", ""), Some(vec![]));
    }

    #[test]
    fn adjacent_placeholders_backtrack() {
        assert_eq!(
            captured("{a}-{b}/x", "left-right-more/x"),
            Some(pairs(&[("a", "left-right"), ("b", "more")]))
        );
        assert_eq!(
            captured("room/{id}.json", "room/r1.json"),
            Some(pairs(&[("id", "r1")]))
        );
    }

    #[test]
    fn param_names_in_order() {
        let pattern = PathPattern::new("{org}/dev/{ident}");
        assert_eq!(pattern.param_names().collect::<Vec<_>>(), ["org", "ident"]);
        assert_eq!(pattern.as_str(), "{org}/dev/{ident}");
    }

    #[test]
    fn unclosed_brace_is_literal() {
        assert_eq!(captured("a{b", "a{b"), Some(vec![]));
        assert_eq!(captured("a{}b", "a{}b"), Some(vec![]));
    }

    #[test]
    fn mount_trimming() {
        assert_eq!(trim_mount("/ws", "/ws"), Some(""));
        assert_eq!(trim_mount("/ws/", "/ws"), Some(""));
        assert_eq!(trim_mount("/ws/dev/42", "/ws/"), Some("dev/42"));
        assert_eq!(trim_mount("/wss/dev", "/ws"), None);
        assert_eq!(trim_mount("/other", "/ws"), None);
    }
}
