//! The cursor: a read-only reference to an immutable source string plus a
//! byte offset, per spec.md §3/§4.A.
//!
//! Per the §9 redesign note ("express [backtracking] as a result value
//! returned by lexers"), lexers here never mutate a `Cursor` in place: every
//! operation that can fail takes a `Cursor` by value and, on success,
//! returns a *new* one. A failed attempt simply drops the value it would
//! have produced; the caller's original `Cursor` was never touched.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

/// A position within an immutable MML source string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.text.len()
    }

    /// The unconsumed suffix of the source.
    pub fn remaining(&self) -> &'a str {
        &self.text[self.pos..]
    }

    pub fn remaining_len(&self) -> usize {
        self.text.len() - self.pos
    }

    /// Returns the next `n` bytes without consuming them, clamped to a char
    /// boundary and to the end of the source.
    pub fn peek(&self, n: usize) -> &'a str {
        let rem = self.remaining();
        let mut end = n.min(rem.len());
        while end > 0 && !rem.is_char_boundary(end) {
            end -= 1;
        }
        &rem[..end]
    }

    /// Seeks to an absolute byte offset, clamped to the source length.
    pub fn seek(&self, pos: usize) -> Self {
        Self {
            text: self.text,
            pos: pos.min(self.text.len()),
        }
    }

    /// Advances by `n` bytes, clamped to the source length.
    pub fn advance(&self, n: usize) -> Self {
        self.seek(self.pos + n)
    }

    /// Advances past any leading whitespace.
    pub fn skip_ws(&self) -> Self {
        let rem = self.remaining();
        let skip = rem.len() - rem.trim_start().len();
        self.advance(skip)
    }

    /// Attempts to match `pattern` (see [`translate_pattern`]) at the
    /// cursor. On a match, returns the matched text and a cursor advanced
    /// past it; the original cursor is unaffected either way.
    pub fn trim(&self, pattern: &str) -> Option<(&'a str, Self)> {
        let re = compiled_pattern(pattern);
        let rem = self.remaining();
        let m = re.find(rem)?;
        if m.start() != 0 {
            return None;
        }
        Some((&rem[..m.end()], self.advance(m.end())))
    }

    /// Matches a literal string at the cursor without regex interpretation.
    pub fn trim_literal(&self, literal: &str) -> Option<Self> {
        if self.remaining().starts_with(literal) {
            Some(self.advance(literal.len()))
        } else {
            None
        }
    }

    /// Finds the first occurrence of `pattern` at or after the cursor.
    /// `literal` disables regex interpretation (plain substring search).
    pub fn find(&self, pattern: &str, literal: bool) -> Option<usize> {
        let rem = self.remaining();
        if literal {
            rem.find(pattern).map(|i| self.pos + i)
        } else {
            let re = compiled_pattern(pattern);
            re.find(rem).map(|m| self.pos + m.start())
        }
    }
}

/// Translates the POSIX-ish character classes used by spec.md §4.A
/// (`%d %a %w %s %x`, bracket classes, `* + - ?`) into `regex` crate syntax.
/// `-` is treated as the source's non-greedy `*`.
pub fn translate_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    let mut in_bracket = false;
    while let Some(c) = chars.next() {
        if in_bracket {
            // Bracket-class contents are already valid regex syntax in our
            // patterns (e.g. `[A-Za-z0-9_]`, `[+\-]`); copy them verbatim
            // and only watch for the closing bracket.
            out.push(c);
            if c == ']' {
                in_bracket = false;
            }
            continue;
        }
        match c {
            '[' => {
                in_bracket = true;
                out.push(c);
            }
            '%' => match chars.next() {
                Some('d') => out.push_str("[0-9]"),
                Some('a') => out.push_str("[A-Za-z]"),
                Some('w') => out.push_str("[A-Za-z0-9_]"),
                Some('s') => out.push_str("[ \\t\\r\\n]"),
                Some('x') => out.push_str("[0-9A-Fa-f]"),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('%'),
            },
            // Outside a bracket class, `-` is the source's non-greedy `*`.
            '-' => out.push_str("*?"),
            '.' | '\\' | '(' | ')' | '|' | '^' | '$' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out
}

fn compiled_pattern(pattern: &str) -> Regex {
    static CACHE: OnceLock<std::sync::Mutex<HashMap<String, Regex>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| std::sync::Mutex::new(HashMap::new()));
    let mut guard = cache.lock().expect("pattern cache poisoned");
    if let Some(re) = guard.get(pattern) {
        return re.clone();
    }
    let translated = translate_pattern(pattern);
    let re = Regex::new(&translated).expect("invalid cursor pattern");
    guard.insert(pattern.to_string(), re.clone());
    re
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_matches_digits_at_cursor() {
        let c = Cursor::new("123abc");
        let (matched, next) = c.trim("%d+").unwrap();
        assert_eq!(matched, "123");
        assert_eq!(next.pos(), 3);
    }

    #[test]
    fn trim_fails_when_not_at_cursor() {
        let c = Cursor::new("abc123");
        assert!(c.trim("%d+").is_none());
    }

    #[test]
    fn trim_does_not_mutate_on_failure() {
        let c = Cursor::new("abc");
        let before = c;
        assert!(c.trim("%d+").is_none());
        assert_eq!(c, before);
    }

    #[test]
    fn skip_ws_advances_past_blanks() {
        let c = Cursor::new("   x");
        assert_eq!(c.skip_ws().pos(), 3);
    }

    #[test]
    fn bracket_class_and_star() {
        let c = Cursor::new("ABCx");
        let (matched, next) = c.trim("[A-Z]*").unwrap();
        assert_eq!(matched, "ABC");
        assert_eq!(next.pos(), 3);
    }

    #[test]
    fn bracket_hyphen_is_a_range_not_non_greedy_star() {
        let c = Cursor::new("FC");
        let (matched, _) = c.trim("[A-Ga-g]+").unwrap();
        assert_eq!(matched, "FC");
    }

    #[test]
    fn find_literal_vs_regex() {
        let c = Cursor::new("a.b.c");
        assert_eq!(c.find(".", true), Some(1));
        assert_eq!(c.find("%a+", false), Some(0));
    }
}
