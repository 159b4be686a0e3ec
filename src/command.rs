//! Command objects and the fluent builder that expands optional-argument
//! variants, per spec.md §4.D.
//!
//! Builder methods consume and return `self`, the same fluent style the
//! teacher crate uses for `WriteOptions`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::channel::ChannelState;
use crate::cursor::Cursor;
use crate::error::{CommandError, MgcResult, ParamError};
use crate::lexers::{LexerFn, ParamValue};
use crate::song::Song;

/// Regex-free check for "two newlines separated only by whitespace", the
/// blank-line terminator for variadic parameters (spec.md §4.D).
fn crosses_blank_line(skipped: &str) -> bool {
    let mut newlines = 0;
    for c in skipped.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines >= 2 {
                return true;
            }
        } else if !c.is_whitespace() {
            // non-whitespace between newlines means it wasn't a blank line;
            // this only happens if the caller passed more than the
            // whitespace run, which callers here never do.
        }
    }
    false
}

pub type ChannelHandler = Arc<dyn Fn(&mut ChannelState, &[ParamValue]) -> MgcResult<()> + Send + Sync>;
pub type SongHandler = Arc<dyn Fn(&mut Song, &[ParamValue]) -> MgcResult<()> + Send + Sync>;

/// One parameter slot declared on a [`CommandBuilder`].
#[derive(Clone)]
struct ParamSlot {
    lexer: LexerFn,
    delim: Option<char>,
    default: Option<String>,
}

/// Fluent configurator that expands into one or more [`CommandVariant`]s.
#[derive(Clone, Default)]
pub struct CommandBuilder {
    params: Vec<ParamSlot>,
    optional: BTreeSet<usize>,
    option_order: Vec<usize>,
    variadic: bool,
    handler: Option<ChannelHandler>,
    song_handler: Option<SongHandler>,
}

impl CommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter lexed by `lexer`.
    pub fn param(mut self, lexer: LexerFn) -> Self {
        self.params.push(ParamSlot {
            lexer,
            delim: None,
            default: None,
        });
        self
    }

    /// Overrides the delimiter expected before the parameter at `pos`
    /// (0-based); the default is an optional `,` surrounded by optional
    /// whitespace.
    pub fn delim(mut self, pos: usize, ch: char) -> Self {
        if let Some(slot) = self.params.get_mut(pos) {
            slot.delim = Some(ch);
        }
        self
    }

    /// Marks the parameter at `pos` as eligible for elision, adding it to
    /// `option_order`.
    pub fn optional(mut self, pos: usize) -> Self {
        self.optional.insert(pos);
        self.option_order.push(pos);
        self
    }

    /// Sets the default string re-lexed when the parameter at `pos` is
    /// elided. Without a default, elision drops the position from the
    /// parameter tuple entirely (spec.md §4.D: "substituting none").
    pub fn default_value(mut self, pos: usize, text: impl Into<String>) -> Self {
        if let Some(slot) = self.params.get_mut(pos) {
            slot.default = Some(text.into());
        }
        self
    }

    /// Marks the last parameter as variadic: after one value, the same
    /// lexer is retried until it fails or a blank line is crossed.
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub fn on_channel(mut self, f: ChannelHandler) -> Self {
        self.handler = Some(f);
        self
    }

    pub fn on_song(mut self, f: SongHandler) -> Self {
        self.song_handler = Some(f);
        self
    }

    /// Produces the full variant plus one elided variant per entry in
    /// `option_order`, each omitting that position and all previously
    /// elided ones, in `option_order`'s order.
    pub fn build(self) -> Vec<CommandVariant> {
        let mut variants = Vec::with_capacity(1 + self.option_order.len());
        let mut omitted = BTreeSet::new();
        variants.push(self.make_variant(&omitted));
        for &pos in &self.option_order {
            omitted.insert(pos);
            variants.push(self.make_variant(&omitted));
        }
        variants
    }

    fn make_variant(&self, omitted: &BTreeSet<usize>) -> CommandVariant {
        CommandVariant {
            params: self.params.clone(),
            omitted: omitted.clone(),
            variadic: self.variadic,
            handler: self.handler.clone(),
            song_handler: self.song_handler.clone(),
        }
    }
}

/// One concrete, orderable overload of a command name.
#[derive(Clone)]
pub struct CommandVariant {
    params: Vec<ParamSlot>,
    omitted: BTreeSet<usize>,
    variadic: bool,
    handler: Option<ChannelHandler>,
    song_handler: Option<SongHandler>,
}

impl CommandVariant {
    /// How many textual parameters this variant actually consumes from the
    /// cursor (full arity minus elided positions).
    pub fn consumed_arity(&self) -> usize {
        self.params.len() - self.omitted.len()
    }

    /// Parses this variant's parameters starting at `cursor`. On any
    /// mismatch returns [`ParamError`] and the caller is responsible for
    /// discarding the attempted cursor advance (it never sees one: we
    /// return by value only on success).
    pub fn read_params<'a>(&self, mut cursor: Cursor<'a>) -> Result<(Vec<ParamValue>, Cursor<'a>), ParamError> {
        cursor = cursor.skip_ws();
        let mut values = Vec::with_capacity(self.params.len());
        let mut consumed_any = false;
        for (pos, slot) in self.params.iter().enumerate() {
            if self.omitted.contains(&pos) {
                if let Some(v) = synthesize_default(slot)? {
                    values.push(v);
                }
                continue;
            }
            if consumed_any {
                cursor = consume_delimiter(cursor, slot.delim);
            }
            consumed_any = true;
            let is_last = pos == self.params.len() - 1;
            if is_last && self.variadic {
                let (first, next) = (slot.lexer)(cursor)?;
                cursor = next;
                let mut items = vec![first];
                loop {
                    let before_gap = cursor;
                    let skipped = cursor.remaining();
                    let after_ws = cursor.skip_ws();
                    let gap = &skipped[..skipped.len() - after_ws.remaining().len()];
                    if crosses_blank_line(gap) {
                        cursor = before_gap;
                        break;
                    }
                    let attempt = after_ws
                        .trim_literal(",")
                        .map(|c| c.skip_ws())
                        .unwrap_or(after_ws);
                    match (slot.lexer)(attempt) {
                        Ok((value, next)) => {
                            items.push(value);
                            cursor = next;
                        }
                        Err(_) => {
                            cursor = before_gap;
                            break;
                        }
                    }
                }
                values.push(ParamValue::List(items));
            } else {
                let (value, next) = (slot.lexer)(cursor)?;
                values.push(value);
                cursor = next;
            }
        }
        Ok((values, cursor))
    }

    pub fn apply_song(&self, song: &mut Song, params: &[ParamValue]) -> MgcResult<()> {
        if let Some(f) = &self.song_handler {
            f(song, params)?;
        }
        Ok(())
    }

    pub fn apply_channel(&self, channel: &mut ChannelState, params: &[ParamValue]) -> MgcResult<()> {
        if let Some(f) = &self.handler {
            f(channel, params)?;
        }
        Ok(())
    }

    /// Runs the default `apply` sequence from spec.md §4.D: `apply_song`
    /// first, then `apply_channel` on every channel that is active
    /// *after* `apply_song` ran, in channel-index order.
    pub fn apply(&self, song: &mut Song, params: &[ParamValue]) -> MgcResult<()> {
        self.apply_song(song, params)?;
        let active: Vec<usize> = song
            .channels()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.active)
            .map(|(i, _)| i)
            .collect();
        for idx in active {
            song.set_current_channel(idx);
            self.apply_channel(song.channel_mut(idx), params)?;
        }
        Ok(())
    }
}

/// Synthesizes the value for an elided parameter: re-lexes the default
/// string if one was configured, or returns `None` to drop the position
/// from the parameter tuple entirely (spec.md §4.D).
fn synthesize_default(slot: &ParamSlot) -> Result<Option<ParamValue>, ParamError> {
    match &slot.default {
        Some(text) => {
            let cursor = Cursor::new(text.as_str());
            let (value, _) = (slot.lexer)(cursor)?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn consume_delimiter(cursor: Cursor<'_>, custom: Option<char>) -> Cursor<'_> {
    let cursor = cursor.skip_ws();
    let delim = custom.unwrap_or(',');
    let mut buf = [0u8; 4];
    let delim_str = delim.encode_utf8(&mut buf);
    match cursor.trim_literal(delim_str) {
        Some(next) => next.skip_ws(),
        None => cursor,
    }
}

/// A [`HashMap`] of positions to required delimiter characters, exposed for
/// callers that want to inspect a builder's configuration before calling
/// [`CommandBuilder::build`]. Not used internally; kept because several
/// engines query it to render diagnostics.
pub type DelimMap = HashMap<usize, char>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexers::{lexer, lex_uint8};

    #[test]
    fn full_variant_then_elided_variant() {
        let builder = CommandBuilder::new()
            .param(lexer(lex_uint8))
            .param(lexer(lex_uint8))
            .optional(1);
        let variants = builder.build();
        assert_eq!(variants.len(), 2);

        // "x 5" - the full variant fails on the missing second byte, the
        // elided variant succeeds with one value.
        let cursor = Cursor::new("5");
        assert!(variants[0].read_params(cursor).is_err());
        let (values, _) = variants[1].read_params(cursor).unwrap();
        assert_eq!(values, vec![ParamValue::UInt(5)]);

        // "x 5 7" - the full variant succeeds with two values.
        let cursor = Cursor::new("5 7");
        let (values, _) = variants[0].read_params(cursor).unwrap();
        assert_eq!(values, vec![ParamValue::UInt(5), ParamValue::UInt(7)]);
    }

    #[test]
    fn variadic_stops_at_blank_line() {
        let builder = CommandBuilder::new().param(lexer(lex_uint8)).variadic();
        let variants = builder.build();
        let cursor = Cursor::new("8 7 6\n\nc");
        let (values, next) = variants[0].read_params(cursor).unwrap();
        assert_eq!(
            values,
            vec![ParamValue::List(vec![
                ParamValue::UInt(8),
                ParamValue::UInt(7),
                ParamValue::UInt(6)
            ])]
        );
        assert!(next.remaining().trim_start_matches(['\n', ' ']).starts_with("c"));
    }

    #[test]
    fn default_string_synthesizes_elided_value() {
        let builder = CommandBuilder::new()
            .param(lexer(lex_uint8))
            .default_value(0, "3")
            .optional(0);
        let variants = builder.build();
        let (values, _) = variants[1].read_params(Cursor::new("")).unwrap();
        assert_eq!(values, vec![ParamValue::UInt(3)]);
    }

    #[test]
    fn eliding_a_middle_parameter_without_a_default_shifts_the_tuple() {
        // [A, B, C] with only B optional and no default: the elided variant
        // must deliver (A, C), never (A, Omitted, C).
        let builder = CommandBuilder::new()
            .param(lexer(lex_uint8))
            .param(lexer(lex_uint8))
            .param(lexer(lex_uint8))
            .optional(1);
        let variants = builder.build();
        let (values, _) = variants[1].read_params(Cursor::new("5 7")).unwrap();
        assert_eq!(values, vec![ParamValue::UInt(5), ParamValue::UInt(7)]);
    }
}
