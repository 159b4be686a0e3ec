//! Feature injection, per spec.md §4.I.
//!
//! A dynamic language can attach new methods to a Song/Channel class at
//! runtime; Rust cannot. Per the §9 redesign note ("model as an immutable
//! capability table rather than dynamic method-mixins"), a [`Feature`]'s
//! extra "methods" are named closures a caller looks up through
//! [`Feature::song_method`]/[`Feature::channel_method`] instead of calling
//! directly on `Song`/`ChannelState`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::channel::ChannelState;
use crate::command::CommandVariant;
use crate::engine::{ChannelCallback, EngineBuilder, SongCallback};
use crate::error::{MgcResult, RuntimeError};
use crate::song::Song;

pub type SongMethod = Arc<dyn Fn(&mut Song, &[crate::lexers::ParamValue]) -> MgcResult<()> + Send + Sync>;
pub type ChannelMethod = Arc<dyn Fn(&mut ChannelState, &[crate::lexers::ParamValue]) -> MgcResult<()> + Send + Sync>;

/// Per-identifier override a caller supplies when importing a [`Feature`]:
/// suppress the command entirely, or register it under a different name.
#[derive(Debug, Clone)]
pub enum Override {
    Suppress,
    Rename(String),
}

/// A bundle of extra commands, extra capability methods, and pre/post
/// callbacks, importable into an [`EngineBuilder`] exactly once.
#[derive(Default)]
pub struct Feature {
    pub name: String,
    commands: Vec<(String, Vec<CommandVariant>)>,
    song_methods: HashMap<String, SongMethod>,
    channel_methods: HashMap<String, ChannelMethod>,
    song_pre: Vec<SongCallback>,
    song_post: Vec<SongCallback>,
    channel_pre: Vec<ChannelCallback>,
    channel_post: Vec<ChannelCallback>,
}

impl Feature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn command(mut self, default_name: impl Into<String>, variants: Vec<CommandVariant>) -> Self {
        self.commands.push((default_name.into(), variants));
        self
    }

    pub fn song_method(mut self, name: impl Into<String>, f: SongMethod) -> Self {
        self.song_methods.insert(name.into(), f);
        self
    }

    pub fn channel_method(mut self, name: impl Into<String>, f: ChannelMethod) -> Self {
        self.channel_methods.insert(name.into(), f);
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

    pub fn get_song_method(&self, name: &str) -> Option<&SongMethod> {
        self.song_methods.get(name)
    }

    pub fn get_channel_method(&self, name: &str) -> Option<&ChannelMethod> {
        self.channel_methods.get(name)
    }
}

impl EngineBuilder {
    /// Merges `feature`'s commands, capability methods and callbacks into
    /// this builder. `overrides` maps a feature-proposed command name to a
    /// [`Override::Suppress`] or [`Override::Rename`]; a name absent from
    /// the map keeps the feature's default name.
    pub fn import_feature(
        mut self,
        feature: Feature,
        overrides: &HashMap<String, Override>,
    ) -> Result<Self, RuntimeError> {
        if !self.imported_features.insert(feature.name.clone()) {
            return Err(RuntimeError::DuplicateFeature(feature.name));
        }
        for (default_name, variants) in feature.commands {
            let registered_name = match overrides.get(&default_name) {
                Some(Override::Suppress) => continue,
                Some(Override::Rename(new_name)) => new_name.clone(),
                None => default_name,
            };
            self.commands.push((registered_name, variants));
        }
        self.song_methods.extend(feature.song_methods);
        self.channel_methods.extend(feature.channel_methods);
        self.song_pre.extend(feature.song_pre);
        self.song_post.extend(feature.song_post);
        self.channel_pre.extend(feature.channel_pre);
        self.channel_post.extend(feature.channel_post);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandBuilder;
    use crate::parser::Parser;

    #[test]
    fn double_import_fails() {
        let feature = Feature::new("vibrato");
        let builder = EngineBuilder::new("toy", 1, Parser::new());
        let builder = builder.import_feature(feature, &HashMap::new()).unwrap();
        let feature2 = Feature::new("vibrato");
        assert!(builder.import_feature(feature2, &HashMap::new()).is_err());
    }

    #[test]
    fn suppressed_command_is_dropped() {
        let feature = Feature::new("vibrato").command("VIB", CommandBuilder::new().build());
        let mut overrides = HashMap::new();
        overrides.insert("VIB".to_string(), Override::Suppress);
        let builder = EngineBuilder::new("toy", 1, Parser::new())
            .import_feature(feature, &overrides)
            .unwrap();
        assert!(builder.commands.is_empty());
    }

    #[test]
    fn renamed_command_uses_override_name() {
        let feature = Feature::new("vibrato").command("VIB", CommandBuilder::new().build());
        let mut overrides = HashMap::new();
        overrides.insert("VIB".to_string(), Override::Rename("V".to_string()));
        let builder = EngineBuilder::new("toy", 1, Parser::new())
            .import_feature(feature, &overrides)
            .unwrap();
        assert_eq!(builder.commands[0].0, "V");
    }
}
