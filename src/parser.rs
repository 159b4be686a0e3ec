//! Macro tables and the command/directive parser, per spec.md §4.B/§4.F.

use crate::command::CommandVariant;
use crate::cursor::Cursor;
use crate::error::{MgcError, ParamError, RuntimeError, SyntaxError};
use crate::lexers::ParamValue;
use crate::song::Song;
use crate::trie::Trie;

/// A map from MML command/directive name to an ordered list of variants,
/// backed by [`Trie`] for longest-prefix matching. Not `Debug`: a
/// `CommandVariant`'s handlers are `Arc<dyn Fn(...)>`, which carries no
/// `Debug` impl, the same reason [`crate::engine::Engine`] omits it.
#[derive(Default)]
pub struct MacroTable {
    trie: Trie<Vec<CommandVariant>>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `variants` to the list under `name`, inserting a fresh entry
    /// if `name` is new. Insertion order within a name is preserved.
    pub fn insert(&mut self, name: &str, variants: Vec<CommandVariant>) {
        let slot = self.trie.get_or_insert_with(name, Vec::new);
        slot.extend(variants);
    }

    pub fn lookup<'a>(&self, cursor: &Cursor<'a>) -> Option<(&'a str, &Vec<CommandVariant>)> {
        self.trie.lookup(cursor)
    }
}

/// Owns the two macro tables (`commands`, `directives`) an
/// [`crate::engine::Engine`] dispatches through.
#[derive(Default)]
pub struct Parser {
    pub commands: MacroTable,
    pub directives: MacroTable,
}

impl Parser {
    /// Builds a parser with an empty command table and the default
    /// directive set (`#define`, `#undef`, `#ifdef`, `#ifndef`, `#if`,
    /// `#else`, `#endif`, `#remap`) already registered in `directives`.
    pub fn new() -> Self {
        let mut directives = MacroTable::new();
        crate::preprocess::install_default_directives(&mut directives);
        Self {
            commands: MacroTable::new(),
            directives,
        }
    }

    /// Tries each variant registered under the longest-matching command name
    /// in insertion order, per spec.md §4.F.
    #[allow(clippy::type_complexity)]
    pub fn read_command<'a>(
        &self,
        cursor: Cursor<'a>,
    ) -> Result<Option<(usize, &CommandVariant, Vec<ParamValue>, Cursor<'a>)>, MgcError> {
        let cursor = cursor.skip_ws();
        if cursor.is_empty() {
            return Ok(None);
        }
        let b0 = cursor.pos();
        let (matched, variants) = self.commands.lookup(&cursor).ok_or(SyntaxError::UnknownCommand)?;
        let after_name = cursor.advance(matched.len());
        for variant in variants {
            match variant.read_params(after_name) {
                Ok((params, next)) => return Ok(Some((b0, variant, params, next))),
                Err(ParamError(_)) => continue,
            }
        }
        Err(SyntaxError::IllegalParameters.into())
    }

    /// Same dispatch as [`Parser::read_command`], against the directive
    /// table, additionally requiring the remainder of the line to be
    /// whitespace or a single-line comment, and running `apply_song`
    /// immediately (spec.md §4.E step 3).
    pub fn read_directive<'a>(&self, song: &mut Song, cursor: Cursor<'a>) -> Result<Option<Cursor<'a>>, MgcError> {
        let cursor = cursor.skip_ws();
        if cursor.is_empty() {
            return Ok(None);
        }
        let (matched, variants) = self.directives.lookup(&cursor).ok_or(SyntaxError::UnknownCommand)?;
        let after_name = cursor.advance(matched.len());
        for variant in variants {
            if let Ok((params, next)) = variant.read_params(after_name) {
                let rest = next.remaining().trim_start();
                if !rest.is_empty() && !rest.starts_with(';') {
                    return Err(
                        RuntimeError::Message("Trailing text after preprocessor directive".to_string()).into(),
                    );
                }
                variant.apply_song(song, &params)?;
                return Ok(Some(next));
            }
        }
        Err(SyntaxError::IllegalParameters.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandBuilder;
    use crate::lexers::{lex_uint8, lexer};

    #[test]
    fn longest_command_name_wins() {
        let mut table = MacroTable::new();
        table.insert("O", CommandBuilder::new().param(lexer(lex_uint8)).build());
        table.insert("O<", CommandBuilder::new().build());
        table.insert("O>", CommandBuilder::new().build());

        let cursor = Cursor::new("O<3");
        let (name, _) = table.lookup(&cursor).unwrap();
        assert_eq!(name, "O<");
    }

    #[test]
    fn unknown_command_is_a_syntax_error() {
        let parser = Parser::new();
        let err = parser.read_command(Cursor::new("zzz")).unwrap_err();
        assert!(matches!(err, MgcError::Syntax(SyntaxError::UnknownCommand)));
    }

    #[test]
    fn empty_cursor_yields_no_command() {
        let parser = Parser::new();
        assert!(parser.read_command(Cursor::new("   ")).unwrap().is_none());
    }

    #[test]
    fn failing_full_variant_falls_through_to_elided_variant() {
        let mut parser = Parser::new();
        parser.commands.insert(
            "x",
            CommandBuilder::new()
                .param(lexer(lex_uint8))
                .param(lexer(lex_uint8))
                .optional(1)
                .build(),
        );
        let (_, _, params, _) = parser.read_command(Cursor::new("x 5")).unwrap().unwrap();
        assert_eq!(params.get(0), Some(&ParamValue::UInt(5)));
    }
}
