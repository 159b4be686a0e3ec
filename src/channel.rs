//! Per-channel compile-time state, per spec.md §3/§4.H.
//!
//! A [`ChannelState`] never holds a back-reference to its owning
//! [`crate::song::Song`] (the original's `parent` pointer); command
//! handlers receive `&mut Song` explicitly and index into
//! `Song::channel_mut` instead, which sidesteps a borrow cycle the rest of
//! the crate otherwise builds around exactly once: see
//! [`crate::stream::StreamHandle`] for the same move applied to streams.

use std::collections::BTreeMap;

use crate::error::RuntimeError;
use crate::stream::{StreamArena, StreamHandle};

/// Per-channel key signature, octave, last note and the rest of the
/// engine-defined state a feature or engine initializer attaches.
#[derive(Debug, Clone, Default)]
pub struct ChannelState {
    pub id: usize,
    pub active: bool,
    stream_stack: Vec<StreamHandle>,
    pub key_signature: Option<BTreeMap<char, i8>>,
    pub octave: Option<i32>,
    pub last_note: Option<i32>,
    pub muted: bool,
    /// Offset of a `LOOP` label within the channel's current stream at the
    /// moment [`ChannelState::mark_loop`] was last called, if ever. Generic
    /// storage any engine may use to decide a loop-epilogue encoding at
    /// `afterDefault`; the framework itself never reads it.
    pub loop_label: Option<u64>,
    /// Engine- or feature-defined scalar state, keyed by name: the Rust
    /// stand-in for arbitrary attribute assignment on the original's
    /// per-channel object.
    pub custom: BTreeMap<String, i64>,
}

impl ChannelState {
    /// Allocates the channel's main stream in `arena` and seats it as the
    /// sole entry of the stream stack.
    pub fn new(id: usize, arena: &mut StreamArena) -> Self {
        let main = arena.alloc();
        Self {
            id,
            active: id == 1,
            stream_stack: vec![main],
            ..Default::default()
        }
    }

    /// The stream that MML commands currently write into, the top of the
    /// stack.
    pub fn current_stream(&self) -> StreamHandle {
        *self.stream_stack.last().expect("stream stack is never empty")
    }

    pub fn stack_depth(&self) -> usize {
        self.stream_stack.len()
    }

    /// Opens a nested stream (loop body) on top of the stack.
    pub fn push_stream(&mut self, arena: &mut StreamArena) -> StreamHandle {
        let handle = arena.alloc();
        self.stream_stack.push(handle);
        handle
    }

    /// Closes the current nested stream, returning it. Never pops the
    /// channel's main (bottom) stream.
    pub fn pop_stream(&mut self) -> Option<StreamHandle> {
        if self.stream_stack.len() <= 1 {
            return None;
        }
        self.stream_stack.pop()
    }

    /// Declares a `LOOP` label at the current stream's present end and
    /// records its offset in [`ChannelState::loop_label`]. An engine's LOOP
    /// command calls this (via a `Song`-level handler, which has the
    /// `&mut StreamArena` access a per-channel handler lacks) instead of
    /// touching the label map directly.
    pub fn mark_loop(&mut self, arena: &mut StreamArena) -> Result<(), RuntimeError> {
        let stream = self.current_stream();
        let offset = arena.get(stream).map(|s| s.size()).unwrap_or(0);
        if let Some(s) = arena.get_mut(stream) {
            s.add_label("LOOP")?;
        }
        self.loop_label = Some(offset);
        Ok(())
    }

    /// Enforces the `afterDefault` lifecycle invariant: every opened loop
    /// must have been closed, and the main stream gets its `END` label.
    pub fn after_default(&mut self, arena: &mut StreamArena) -> Result<(), RuntimeError> {
        if self.stack_depth() != 1 {
            return Err(RuntimeError::UnclosedLoop(self.id));
        }
        let main = self.current_stream();
        if let Some(stream) = arena.get_mut(main) {
            // afterDefault can run more than once defensively is never the
            // case here (Song calls it exactly once), so a duplicate label
            // would be a framework bug, not a user error.
            stream.add_label("END").map_err(|_| RuntimeError::UnclosedLoop(self.id))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_channel_one_is_active_others_are_not() {
        let mut arena = StreamArena::new();
        let one = ChannelState::new(1, &mut arena);
        let two = ChannelState::new(2, &mut arena);
        assert!(one.active);
        assert!(!two.active);
    }

    #[test]
    fn push_pop_stream_tracks_depth() {
        let mut arena = StreamArena::new();
        let mut c = ChannelState::new(1, &mut arena);
        assert_eq!(c.stack_depth(), 1);
        c.push_stream(&mut arena);
        assert_eq!(c.stack_depth(), 2);
        assert!(c.pop_stream().is_some());
        assert_eq!(c.stack_depth(), 1);
        assert!(c.pop_stream().is_none());
    }

    #[test]
    fn after_default_rejects_unclosed_loop() {
        let mut arena = StreamArena::new();
        let mut c = ChannelState::new(1, &mut arena);
        c.push_stream(&mut arena);
        assert!(c.after_default(&mut arena).is_err());
    }

    #[test]
    fn after_default_adds_end_label() {
        let mut arena = StreamArena::new();
        let mut c = ChannelState::new(1, &mut arena);
        c.after_default(&mut arena).unwrap();
        let main = c.current_stream();
        assert_eq!(arena.get(main).unwrap().get_label("END"), Some(0));
    }

    #[test]
    fn mark_loop_records_offset_and_label() {
        let mut arena = StreamArena::new();
        let mut c = ChannelState::new(1, &mut arena);
        let main = c.current_stream();
        arena.get_mut(main).unwrap().push_bytes(vec![0; 5]);
        c.mark_loop(&mut arena).unwrap();
        assert_eq!(c.loop_label, Some(5));
        assert_eq!(arena.get(main).unwrap().get_label("LOOP"), Some(5));
    }
}
