//! Per-song compile-time state, per spec.md §3/§4.H.

use std::collections::BTreeMap;
use std::sync::Arc;

use bimap::BiMap;

use crate::channel::ChannelState;
use crate::engine::Engine;
use crate::error::{MgcResult, RuntimeError};
use crate::preprocess::PPContext;
use crate::stream::StreamArena;
use crate::warnings::Warnings;

/// The channel-name map, modelled as a type-state: `ByIndex` before
/// `beforeDefault` (the phase `#remap` directives mutate), `ByName` after
/// (the phase commands like channel-select read). Per spec.md §3's
/// "inverted from index→name to name→index" invariant.
#[derive(Debug, Clone)]
pub enum ChMap {
    ByIndex(BTreeMap<usize, char>),
    ByName(BiMap<char, usize>),
}

impl ChMap {
    /// The default naming scheme: `1`-`9`, then `A`-`Z`, then `a`-`z`.
    pub fn default_for(channel_count: usize) -> Self {
        let mut map = BTreeMap::new();
        for idx in 1..=channel_count {
            map.insert(idx, default_channel_name(idx));
        }
        ChMap::ByIndex(map)
    }

    /// Inverts `ByIndex` into `ByName`, failing on a duplicate name.
    pub fn invert(self) -> Result<Self, RuntimeError> {
        match self {
            ChMap::ByIndex(map) => {
                let mut by_name = BiMap::new();
                for (idx, name) in map {
                    if by_name.insert_no_overwrite(name, idx).is_err() {
                        return Err(RuntimeError::DuplicateChannelName(name));
                    }
                }
                Ok(ChMap::ByName(by_name))
            }
            already => Ok(already),
        }
    }

    pub fn remap(&mut self, index: usize, name: char) -> Result<(), RuntimeError> {
        match self {
            ChMap::ByIndex(map) => {
                map.insert(index, name);
                Ok(())
            }
            ChMap::ByName(_) => Err(RuntimeError::Message(
                "cannot remap channels after beforeDefault".to_string(),
            )),
        }
    }

    pub fn index_of(&self, name: char) -> Option<usize> {
        match self {
            ChMap::ByIndex(_) => None,
            ChMap::ByName(map) => map.get_by_left(&name).copied(),
        }
    }
}

fn default_channel_name(idx: usize) -> char {
    match idx {
        1..=9 => char::from(b'0' + idx as u8),
        10..=35 => char::from(b'A' + (idx - 10) as u8),
        36..=61 => char::from(b'a' + (idx - 36) as u8),
        _ => '?',
    }
}

/// Per-song compile-time state: channels, the channel name map, the
/// preprocessor context, and the resolved code-generation arena.
pub struct Song {
    channels: Vec<ChannelState>,
    pub chmap: ChMap,
    current_channel: Option<usize>,
    pub engine: Arc<Engine>,
    pub pp: PPContext,
    pub warnings: Warnings,
    pub arena: StreamArena,
}

impl Song {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        let mut arena = StreamArena::new();
        let channels = (1..=engine.channel_count)
            .map(|id| ChannelState::new(id, &mut arena))
            .collect();
        let chmap = ChMap::default_for(engine.channel_count);
        Self {
            channels,
            chmap,
            current_channel: Some(0),
            engine,
            pp: PPContext::new(),
            warnings: Warnings::new(false),
            arena,
        }
    }

    /// Replaces the song's warnings channel with one running in strict
    /// (warnings-become-errors) mode. Must be called before
    /// [`crate::preprocess::preprocess`] if strict mode should apply to
    /// preprocessing warnings too.
    pub fn set_strict(&mut self, strict: bool) {
        self.warnings = Warnings::new(strict);
    }

    pub fn channels(&self) -> &[ChannelState] {
        &self.channels
    }

    pub fn channel_mut(&mut self, idx: usize) -> &mut ChannelState {
        &mut self.channels[idx]
    }

    pub fn current_channel(&self) -> Option<usize> {
        self.current_channel
    }

    pub fn set_current_channel(&mut self, idx: usize) {
        self.current_channel = Some(idx);
    }

    /// `#remap n c` from the preprocessor: only legal before `beforeDefault`.
    pub fn remap_channel(&mut self, index: usize, name: char) -> MgcResult<()> {
        self.chmap.remap(index, name)?;
        Ok(())
    }

    /// Inverts `chmap`, then runs song-level pre-callbacks, then every
    /// channel's pre-callbacks, in channel-index order.
    pub fn before_default(&mut self) -> MgcResult<()> {
        self.chmap = std::mem::replace(&mut self.chmap, ChMap::ByIndex(BTreeMap::new())).invert()?;
        let song_pre = self.engine.song_pre.clone();
        for cb in &song_pre {
            cb(self)?;
        }
        let channel_pre = self.engine.channel_pre.clone();
        for channel in &mut self.channels {
            for cb in &channel_pre {
                cb(channel)?;
            }
        }
        Ok(())
    }

    /// Runs every channel's post-callbacks (including the
    /// unclosed-loop/`END`-label invariant), then song-level post-callbacks.
    pub fn after_default(&mut self) -> MgcResult<()> {
        let channel_post = self.engine.channel_post.clone();
        for channel in &mut self.channels {
            channel.after_default(&mut self.arena)?;
            for cb in &channel_post {
                cb(channel)?;
            }
        }
        let song_post = self.engine.song_post.clone();
        for cb in &song_post {
            cb(self)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::engine::EngineBuilder;

    fn toy_engine(chcount: usize) -> Arc<Engine> {
        Arc::new(EngineBuilder::new("toy", chcount, Parser::new()).build().unwrap())
    }

    #[test]
    fn make_song_activates_only_channel_one() {
        let song = toy_engine(3).make_song();
        assert!(song.channels()[0].active);
        assert!(!song.channels()[1].active);
        assert!(!song.channels()[2].active);
    }

    #[test]
    fn default_chmap_covers_digits_then_letters() {
        let map = ChMap::default_for(11);
        match map {
            ChMap::ByIndex(m) => {
                assert_eq!(m[&1], '1');
                assert_eq!(m[&9], '9');
                assert_eq!(m[&10], 'A');
                assert_eq!(m[&11], 'B');
            }
            _ => panic!("expected ByIndex"),
        }
    }

    #[test]
    fn before_default_inverts_chmap() {
        let mut song = toy_engine(2).make_song();
        song.before_default().unwrap();
        assert_eq!(song.chmap.index_of('1'), Some(1));
        assert_eq!(song.chmap.index_of('2'), Some(2));
    }

    #[test]
    fn remap_after_before_default_fails() {
        let mut song = toy_engine(2).make_song();
        song.before_default().unwrap();
        assert!(song.remap_channel(1, 'X').is_err());
    }

    #[test]
    fn after_default_fails_on_unclosed_loop() {
        let mut song = toy_engine(1).make_song();
        song.before_default().unwrap();
        song.channel_mut(0).push_stream(&mut song.arena);
        assert!(song.after_default().is_err());
    }
}
