//! LIKE pattern parsing
//!
//! `%` matches any run of characters, `_` exactly one, and `\` makes the next
//! character literal. Patterns are anchored at both ends. Each adapter renders
//! the parsed tokens into its own native pattern syntax.

/// One element of a parsed LIKE pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LikeToken {
    Literal(char),
    AnyChar,
    AnyRun,
}

/// Parse a LIKE pattern into tokens
pub fn parse(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        match c {
            '%' => {
                // Collapse consecutive runs
                if tokens.last() != Some(&LikeToken::AnyRun) {
                    tokens.push(LikeToken::AnyRun);
                }
            }
            '_' => tokens.push(LikeToken::AnyChar),
            '\\' => match chars.next() {
                Some(escaped) => tokens.push(LikeToken::Literal(escaped)),
                None => tokens.push(LikeToken::Literal('\\')),
            },
            other => tokens.push(LikeToken::Literal(other)),
        }
    }

    tokens
}

/// Render as an anchored regular expression
pub fn to_regex(pattern: &str) -> String {
    let mut out = String::from("(?s)^");
    let mut buf = [0u8; 4];

    for token in parse(pattern) {
        match token {
            LikeToken::AnyRun => out.push_str(".*"),
            LikeToken::AnyChar => out.push('.'),
            LikeToken::Literal(c) => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }

    out.push('$');
    out
}

/// Render as an SQLite GLOB pattern (case-sensitive, implicitly anchored)
pub fn to_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());

    for token in parse(pattern) {
        match token {
            LikeToken::AnyRun => out.push('*'),
            LikeToken::AnyChar => out.push('?'),
            LikeToken::Literal(c @ ('*' | '?' | '[')) => {
                out.push('[');
                out.push(c);
                out.push(']');
            }
            LikeToken::Literal(c) => out.push(c),
        }
    }

    out
}
