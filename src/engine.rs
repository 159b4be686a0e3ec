//! Immutable engine configuration, per spec.md §3/§4.H.
//!
//! `setup_cb`/`insert_cb`/`finish_cb` are single-shot: [`Engine`] stores them
//! behind a `RefCell` so [`crate::pipeline::Compiler::process_file`] can
//! `take()` each one out, run it, and leave a no-op behind, mirroring the
//! teacher crate's `RefCell`-guarded one-shot writer state rather than
//! reaching for a `Mutex` nothing here is ever shared across threads.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io::{Seek, Write};
use std::sync::Arc;

use crate::channel::ChannelState;
use crate::command::CommandVariant;
use crate::error::{ArgumentError, MgcResult};
use crate::feature::{ChannelMethod, SongMethod};
use crate::parser::Parser;
use crate::song::Song;

/// Marker blanket trait for the file handle engines patch bytes into.
pub trait Output: Write + Seek {}
impl<T: Write + Seek> Output for T {}

pub type SetupCb = Box<dyn FnMut(&Engine, &mut dyn Output) -> MgcResult<()> + Send>;
pub type InsertCb = Box<dyn FnMut(&Engine, &mut dyn Output, &mut Song, u32) -> MgcResult<()> + Send>;
pub type FinishCb = Box<dyn FnMut(&Engine, &mut dyn Output) -> MgcResult<()> + Send>;

pub type SongCallback = Arc<dyn Fn(&mut Song) -> MgcResult<()> + Send + Sync>;
pub type ChannelCallback = Arc<dyn Fn(&mut ChannelState) -> MgcResult<()> + Send + Sync>;

fn noop_setup(_: &Engine, _: &mut dyn Output) -> MgcResult<()> {
    Ok(())
}
fn noop_insert(_: &Engine, _: &mut dyn Output, _: &mut Song, _: u32) -> MgcResult<()> {
    Ok(())
}
fn noop_finish(_: &Engine, _: &mut dyn Output) -> MgcResult<()> {
    Ok(())
}

/// Immutable (at compile time) configuration bundle bound to one family of
/// MML songs.
pub struct Engine {
    pub name: String,
    pub channel_count: usize,
    pub parser: Parser,
    setup_cb: RefCell<SetupCb>,
    insert_cb: RefCell<InsertCb>,
    finish_cb: RefCell<FinishCb>,
    /// Feature names imported while this engine was built, per spec.md §3
    /// ("features: set<feature-kind>, prevents double-import of a
    /// feature"). Imports only ever happen on [`EngineBuilder`], before the
    /// engine exists, so this is a frozen set rather than the `RefCell` the
    /// earlier draft used for runtime mutation.
    features: HashSet<String>,
    pub(crate) song_pre: Vec<SongCallback>,
    pub(crate) song_post: Vec<SongCallback>,
    pub(crate) channel_pre: Vec<ChannelCallback>,
    pub(crate) channel_post: Vec<ChannelCallback>,
    /// Capability table for feature-attached Song/Channel methods, the
    /// §9 redesign of runtime mixin injection into a fixed, immutable
    /// lookup built once at engine-construction time.
    song_methods: HashMap<String, SongMethod>,
    channel_methods: HashMap<String, ChannelMethod>,
}

impl Engine {
    /// Constructs a [`Song`] with `channel_count` channels, channel 1 active.
    pub fn make_song(self: &Arc<Self>) -> Song {
        Song::new(Arc::clone(self))
    }

    /// Runs `setup_cb` once, replacing it with a no-op afterward.
    pub fn run_setup(&self, output: &mut dyn Output) -> MgcResult<()> {
        let mut cb = self.setup_cb.borrow_mut();
        let result = cb(self, output);
        *cb = Box::new(noop_setup);
        result
    }

    pub fn run_insert(&self, output: &mut dyn Output, song: &mut Song, track: u32) -> MgcResult<()> {
        // insert runs once per song, not once per process_file call, so it
        // is not cleared to a no-op here.
        (self.insert_cb.borrow_mut())(self, output, song, track)
    }

    pub fn run_finish(&self, output: &mut dyn Output) -> MgcResult<()> {
        let mut cb = self.finish_cb.borrow_mut();
        let result = cb(self, output);
        *cb = Box::new(noop_finish);
        result
    }

    /// Whether `name` was imported via [`EngineBuilder::import_feature`]
    /// while this engine was being built.
    pub fn has_feature(&self, name: &str) -> bool {
        self.features.contains(name)
    }

    /// Looks up a feature-attached Song capability method by name.
    pub fn song_method(&self, name: &str) -> Option<&SongMethod> {
        self.song_methods.get(name)
    }

    /// Looks up a feature-attached Channel capability method by name.
    pub fn channel_method(&self, name: &str) -> Option<&ChannelMethod> {
        self.channel_methods.get(name)
    }
}

/// Fluent, validating constructor for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    name: String,
    channel_count: usize,
    parser: Option<Parser>,
    setup_cb: Option<SetupCb>,
    insert_cb: Option<InsertCb>,
    finish_cb: Option<FinishCb>,
    pub(crate) song_pre: Vec<SongCallback>,
    pub(crate) song_post: Vec<SongCallback>,
    pub(crate) channel_pre: Vec<ChannelCallback>,
    pub(crate) channel_post: Vec<ChannelCallback>,
    /// Commands contributed by [`crate::feature::Feature`] imports, queued
    /// here and only inserted into the parser's macro table at [`build`]
    /// time (`name`, variants).
    pub(crate) commands: Vec<(String, Vec<CommandVariant>)>,
    pub(crate) imported_features: HashSet<String>,
    pub(crate) song_methods: HashMap<String, SongMethod>,
    pub(crate) channel_methods: HashMap<String, ChannelMethod>,
}

impl EngineBuilder {
    pub fn new(name: impl Into<String>, channel_count: usize, parser: Parser) -> Self {
        Self {
            name: name.into(),
            channel_count,
            parser: Some(parser),
            ..Default::default()
        }
    }

    pub fn setup_cb(mut self, f: impl FnMut(&Engine, &mut dyn Output) -> MgcResult<()> + Send + 'static) -> Self {
        self.setup_cb = Some(Box::new(f));
        self
    }

    pub fn insert_cb(
        mut self,
        f: impl FnMut(&Engine, &mut dyn Output, &mut Song, u32) -> MgcResult<()> + Send + 'static,
    ) -> Self {
        self.insert_cb = Some(Box::new(f));
        self
    }

    pub fn finish_cb(mut self, f: impl FnMut(&Engine, &mut dyn Output) -> MgcResult<()> + Send + 'static) -> Self {
        self.finish_cb = Some(Box::new(f));
        self
    }

    pub fn song_pre(mut self, f: SongCallback) -> Self {
        self.song_pre.push(f);
        self
    }

    pub fn song_post(mut self, f: SongCallback) -> Self {
        self.song_post.push(f);
        self
    }

    pub fn channel_pre(mut self, f: ChannelCallback) -> Self {
        self.channel_pre.push(f);
        self
    }

    pub fn channel_post(mut self, f: ChannelCallback) -> Self {
        self.channel_post.push(f);
        self
    }

    pub fn build(self) -> Result<Engine, ArgumentError> {
        if self.name.trim().is_empty() {
            return Err(ArgumentError::InvalidEngine("name must not be empty".to_string()));
        }
        if self.channel_count < 1 {
            return Err(ArgumentError::InvalidEngine("chcount must be >= 1".to_string()));
        }
        let mut parser = self
            .parser
            .ok_or_else(|| ArgumentError::InvalidEngine("parser is required".to_string()))?;
        for (name, variants) in self.commands {
            parser.commands.insert(&name, variants);
        }
        Ok(Engine {
            name: self.name,
            channel_count: self.channel_count,
            parser,
            setup_cb: RefCell::new(self.setup_cb.unwrap_or_else(|| Box::new(noop_setup))),
            insert_cb: RefCell::new(self.insert_cb.unwrap_or_else(|| Box::new(noop_insert))),
            finish_cb: RefCell::new(self.finish_cb.unwrap_or_else(|| Box::new(noop_finish))),
            features: self.imported_features,
            song_pre: self.song_pre,
            song_post: self.song_post,
            channel_pre: self.channel_pre,
            channel_post: self.channel_post,
            song_methods: self.song_methods,
            channel_methods: self.channel_methods,
        })
    }
}
