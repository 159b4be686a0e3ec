//! Error kinds for the compiler pipeline.
//!
//! [`spec.md`] groups errors into five kinds: `ParamError`, `SyntaxError`,
//! `CommandError`, `RuntimeError` and `ArgumentError`, with `SyntaxError` and
//! `CommandError` described as sub-kinds of `RuntimeError`. We flatten that
//! hierarchy into one sum type, [`MgcError`], instead of modelling it with
//! inheritance.

use std::fmt;

/// Failure of a single parameter lexer to match at the cursor.
///
/// Not user-observable: [`crate::parser::Parser::read_command`] catches this
/// and tries the next command variant. If one leaks out of
/// [`crate::pipeline::Compiler::process_file`] that is a bug in the engine
/// calling this crate, not a condition users should see.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ParamError(pub String);

impl ParamError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Malformed MML: no legal interpretation exists at the cursor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyntaxError {
    #[error("unknown command")]
    UnknownCommand,
    #[error("illegal command parameters")]
    IllegalParameters,
}

/// Semantic violation raised while applying an accepted command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("note {0} is out of range")]
    NoteOutOfRange(i32),
    #[error("invalid loop count {0}")]
    InvalidLoopCount(i64),
    #[error("writing to protected range {0:#06x}..={1:#06x}")]
    ProtectedRange(u64, u64),
    #[error("unknown pointer label {label:?} on stream {stream:?}")]
    UnknownLabel { stream: String, label: String },
}

/// A framework invariant was violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("duplicate label {0:?}")]
    DuplicateLabel(String),
    #[error("stream joined to itself")]
    SelfJoin,
    #[error("feature {0:?} already imported")]
    DuplicateFeature(String),
    #[error("unclosed loop in channel {0}")]
    UnclosedLoop(usize),
    #[error("duplicate channel name {0:?} in channel map")]
    DuplicateChannelName(char),
    #[error("{0}")]
    Message(String),
}

/// Misuse of the framework by the program assembling an [`crate::engine::Engine`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    #[error("invalid engine definition: {0}")]
    InvalidEngine(String),
    #[error("builder misconfigured: {0}")]
    BadBuilder(String),
}

/// Union of all user-observable compile errors.
#[derive(Debug, thiserror::Error)]
pub enum MgcError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Argument(#[from] ArgumentError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Traced(#[source] Box<MgcError>, Trace),
}

pub type MgcResult<T> = Result<T, MgcError>;

/// A `(row, column, source snippet)` trace computed from a byte offset into
/// the original MML text, per spec.md §4.A / §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub row: usize,
    pub col: usize,
    pub snippet: String,
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "line {}, column {}:", self.row, self.col)?;
        write!(f, "{}", self.snippet)
    }
}

/// Locates `offset` within `text`, returning a 1-based `(row, col)` and a
/// two-line snippet of the source with a caret under the error position.
pub fn locate(text: &str, offset: usize) -> Trace {
    let offset = offset.min(text.len());
    let mut row = 1usize;
    let mut line_start = 0usize;
    for (i, b) in text.as_bytes().iter().enumerate() {
        if i >= offset {
            break;
        }
        if *b == b'\n' {
            row += 1;
            line_start = i + 1;
        }
    }
    let line_end = text[line_start..]
        .find('\n')
        .map(|i| line_start + i)
        .unwrap_or(text.len());
    let line = &text[line_start..line_end];
    let col = offset - line_start + 1;
    let caret_offset = line[..offset.saturating_sub(line_start).min(line.len())]
        .chars()
        .count();
    let mut snippet = String::new();
    snippet.push_str(line);
    snippet.push('\n');
    snippet.extend(std::iter::repeat(' ').take(caret_offset));
    snippet.push('^');
    Trace { row, col, snippet }
}

/// Wraps `err` with a trace computed from `offset` into `text`.
pub fn trace(text: &str, offset: usize, err: impl Into<MgcError>) -> MgcError {
    MgcError::Traced(Box::new(err.into()), locate(text, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_first_line() {
        let t = locate("abc\ndef", 1);
        assert_eq!(t.row, 1);
        assert_eq!(t.col, 2);
    }

    #[test]
    fn locate_second_line() {
        let t = locate("abc\ndef", 5);
        assert_eq!(t.row, 2);
        assert_eq!(t.col, 2);
        assert!(t.snippet.starts_with("def"));
    }

    #[test]
    fn trace_wraps_source_error() {
        let err = trace("x y", 2, SyntaxError::UnknownCommand);
        match err {
            MgcError::Traced(inner, tr) => {
                assert_eq!(tr.col, 3);
                assert!(matches!(*inner, MgcError::Syntax(SyntaxError::UnknownCommand)));
            }
            _ => panic!("expected Traced"),
        }
    }
}
