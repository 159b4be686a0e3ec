//! The pipeline orchestrator, per spec.md §4.F: `Compiler::process_file`
//! drives one engine through setup → (preprocess → parse/apply →
//! finalize → insert) per song → finish.

use std::sync::Arc;

use enumset::{EnumSet, EnumSetType};

use crate::cursor::Cursor;
use crate::engine::{Engine, Output};
use crate::error::{self, MgcResult};
use crate::preprocess::preprocess;

/// Flags accepted by [`Compiler::new_with_options`], mirroring the
/// teacher crate's `EnumSet<Options>` reader-configuration pattern.
#[derive(EnumSetType, Debug)]
pub enum CompileOption {
    /// Promote every warning (non-ASCII source, duplicate `#define`, …) to
    /// a hard error for this run, per spec.md §7.
    Strict,
}

/// Drives [`Engine::run_setup`]/[`Engine::run_insert`]/[`Engine::run_finish`]
/// across one or more MML sources, per spec.md §4.F.
#[derive(Default)]
pub struct Compiler {
    options: EnumSet<CompileOption>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_options(options: EnumSet<CompileOption>) -> Self {
        Self { options }
    }

    /// Compiles every `(mml_text, track)` pair against `engine`, writing the
    /// result into `output`. `engine.setup_cb` runs once before the first
    /// song and `engine.finish_cb` once after the last, per spec.md §4.F.
    pub fn process_file(
        &self,
        engine: &Arc<Engine>,
        inputs: &[(&str, u32)],
        output: &mut dyn Output,
    ) -> MgcResult<()> {
        engine.run_setup(output)?;
        for &(mml_text, track) in inputs {
            let mut song = engine.make_song();
            song.set_strict(self.options.contains(CompileOption::Strict));
            let stripped = preprocess(&mut song, mml_text)?;
            song.before_default()?;

            let mut cursor = Cursor::new(&stripped);
            loop {
                let skipped = cursor.skip_ws();
                if skipped.is_empty() {
                    break;
                }
                let b0 = skipped.pos();
                match engine.parser.read_command(skipped) {
                    Ok(None) => break,
                    Ok(Some((_, variant, params, next))) => {
                        if let Err(e) = variant.apply(&mut song, &params) {
                            return Err(error::trace(&stripped, b0, e));
                        }
                        cursor = next;
                    }
                    Err(e) => return Err(error::trace(&stripped, b0, e)),
                }
            }

            song.after_default()?;
            engine.run_insert(output, &mut song, track)?;
        }
        engine.run_finish(output)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandBuilder;
    use crate::engine::EngineBuilder;
    use crate::lexers::{lex_uint8, lexer};
    use crate::linker::Linker;
    use crate::parser::Parser;
    use std::io::Cursor as IoCursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// An engine whose single command `c <byte>` writes one byte to the
    /// active channel's stream; `insert_cb` links that stream at file
    /// offset 0 and flushes it.
    fn byte_emitting_engine() -> Arc<Engine> {
        let mut parser = Parser::new();
        parser.commands.insert(
            "c",
            CommandBuilder::new()
                .param(lexer(lex_uint8))
                .on_channel(Arc::new(|channel, params| {
                    let crate::lexers::ParamValue::UInt(v) = params[0] else {
                        unreachable!()
                    };
                    channel.custom.insert("byte".to_string(), v as i64);
                    Ok(())
                }))
                .build(),
        );
        Arc::new(
            EngineBuilder::new("toy", 1, parser)
                .insert_cb(move |_engine, out, song, _track| {
                    let handle = song.channels()[0].current_stream();
                    let byte = song.channels()[0].custom.get("byte").copied().unwrap_or(0) as u8;
                    if let Some(stream) = song.arena.get_mut(handle) {
                        stream.push_byte(byte);
                    }
                    let mut linker = Linker::new();
                    linker.writable(0, 0xFFFF);
                    linker.set_pos(0);
                    linker.add_stream(&mut song.arena, handle)?;
                    linker.flush(&song.arena, out)?;
                    Ok(())
                })
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn setup_runs_once_and_finish_runs_once_across_multiple_songs() {
        let setup_calls = Arc::new(AtomicUsize::new(0));
        let finish_calls = Arc::new(AtomicUsize::new(0));
        let setup_calls2 = Arc::clone(&setup_calls);
        let finish_calls2 = Arc::clone(&finish_calls);
        let engine = Arc::new(
            EngineBuilder::new("toy", 1, Parser::new())
                .setup_cb(move |_, _| {
                    setup_calls2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .finish_cb(move |_, _| {
                    finish_calls2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build()
                .unwrap(),
        );
        let compiler = Compiler::new();
        let mut buf = IoCursor::new(Vec::new());
        compiler
            .process_file(&engine, &[("", 1), ("", 2)], &mut buf)
            .unwrap();
        assert_eq!(setup_calls.load(Ordering::SeqCst), 1);
        assert_eq!(finish_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_command_is_traced_with_row_and_column() {
        let mut parser = Parser::new();
        parser.commands.insert("a", CommandBuilder::new().build());
        let engine = Arc::new(EngineBuilder::new("toy", 1, parser).build().unwrap());
        let compiler = Compiler::new();
        let mut buf = IoCursor::new(Vec::new());
        let err = compiler
            .process_file(&engine, &[("a\nzzz", 1)], &mut buf)
            .unwrap_err();
        match err {
            crate::error::MgcError::Traced(inner, trace) => {
                assert_eq!(trace.row, 2);
                assert!(matches!(
                    *inner,
                    crate::error::MgcError::Syntax(crate::error::SyntaxError::UnknownCommand)
                ));
            }
            other => panic!("expected a traced error, got {other:?}"),
        }
    }

    #[test]
    fn command_apply_runs_on_active_channel() {
        let engine = byte_emitting_engine();
        let compiler = Compiler::new();
        let mut buf = IoCursor::new(vec![0u8; 4]);
        compiler.process_file(&engine, &[("c 5", 1)], &mut buf).unwrap();
        let bytes = buf.into_inner();
        assert_eq!(bytes[0], 5);
    }

    #[test]
    fn strict_mode_turns_warnings_into_errors() {
        let engine = Arc::new(EngineBuilder::new("toy", 1, Parser::new()).build().unwrap());
        let compiler = Compiler::new_with_options(CompileOption::Strict.into());
        let mut buf = IoCursor::new(Vec::new());
        let err = compiler.process_file(&engine, &[("caf\u{e9}", 1)], &mut buf);
        assert!(err.is_err());
    }
}
