//! Redis-style glob patterns for key matching.
//!
//! Supported syntax, as `SCAN ... MATCH` understands it:
//! - `*` any run of characters, `?` exactly one character
//! - `[abc]`, `[a-z]`, `[^a]` character classes
//! - `\x` the literal character `x`

use regex::Regex;
use staticdex_core::CacheError;

/// A compiled key pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile a glob pattern.
    pub fn new(pattern: &str) -> Result<Self, CacheError> {
        let translated = translate(pattern)?;
        let regex = Regex::new(&translated).map_err(|e| CacheError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether a whole key matches the pattern.
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

fn invalid(pattern: &str, reason: &str) -> CacheError {
    CacheError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}

fn escape_char(c: char) -> String {
    regex::escape(c.encode_utf8(&mut [0u8; 4]))
}

fn translate(pattern: &str) -> Result<String, CacheError> {
    let mut out = String::with_capacity(pattern.len() * 2 + 8);
    out.push_str("(?s)^");

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| invalid(pattern, "trailing escape"))?;
                out.push_str(&escape_char(escaped));
            }
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'^') {
                    chars.next();
                    class.push('^');
                }

                let mut members = 0usize;
                let mut closed = false;
                while let Some(m) = chars.next() {
                    let member = match m {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' => chars
                            .next()
                            .ok_or_else(|| invalid(pattern, "trailing escape"))?,
                        other => other,
                    };

                    // `a-z` is a range unless the dash is the last member.
                    let is_range = chars.peek() == Some(&'-') && {
                        let mut lookahead = chars.clone();
                        lookahead.next();
                        matches!(lookahead.peek(), Some(end) if *end != ']')
                    };

                    if is_range {
                        chars.next();
                        let end = match chars.next() {
                            Some('\\') => chars
                                .next()
                                .ok_or_else(|| invalid(pattern, "trailing escape"))?,
                            Some(end) => end,
                            None => return Err(invalid(pattern, "unterminated range")),
                        };
                        let (lo, hi) = if member <= end { (member, end) } else { (end, member) };
                        class.push_str(&escape_char(lo));
                        class.push('-');
                        class.push_str(&escape_char(hi));
                    } else {
                        class.push_str(&escape_char(member));
                    }
                    members += 1;
                }

                if !closed {
                    return Err(invalid(pattern, "unterminated character class"));
                }
                if members == 0 {
                    return Err(invalid(pattern, "empty character class"));
                }
                class.push(']');
                out.push_str(&class);
            }
            other => out.push_str(&escape_char(other)),
        }
    }

    out.push('$');
    Ok(out)
}
