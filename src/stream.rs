//! Append-only streams of chunks and the arena that owns them, per
//! spec.md §3 and the §9 redesign note on cyclic pointer graphs: pointer
//! chunks hold a stable [`StreamHandle`] index into a [`StreamArena`]
//! rather than a reference to another `Stream`, so the object graph between
//! channels' streams can never cycle through borrow-checked references.

use std::collections::BTreeMap;

use crate::chunk::Chunk;
use crate::error::{CommandError, RuntimeError};

/// A stable index into a [`StreamArena`]. Cheap to copy, never dangling for
/// the lifetime of the arena that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(usize);

/// Owns every [`Stream`] created while compiling one [`crate::song::Song`].
#[derive(Debug, Default)]
pub struct StreamArena {
    streams: Vec<Stream>,
}

impl StreamArena {
    pub fn new() -> Self {
        Self { streams: Vec::new() }
    }

    pub fn alloc(&mut self) -> StreamHandle {
        self.streams.push(Stream::new());
        StreamHandle(self.streams.len() - 1)
    }

    pub fn get(&self, handle: StreamHandle) -> Option<&Stream> {
        self.streams.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: StreamHandle) -> Option<&mut Stream> {
        self.streams.get_mut(handle.0)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Appends clones of `src`'s chunks onto `dest`. Unlike [`Stream::join`],
    /// which takes two `&Stream` borrows the compiler already forbids from
    /// aliasing, handles carry no such guarantee, so this is the call site
    /// that can and does detect a stream joined to itself (spec.md §7).
    pub fn join(&mut self, dest: StreamHandle, src: StreamHandle) -> Result<(), RuntimeError> {
        if dest == src {
            return Err(RuntimeError::SelfJoin);
        }
        let chunks = self.get(src).map(|s| s.chunks.clone()).unwrap_or_default();
        if let Some(d) = self.get_mut(dest) {
            for chunk in chunks {
                d.push_chunk(chunk);
            }
        }
        Ok(())
    }
}

/// An append-only sequence of chunks carrying labels and a base address.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    chunks: Vec<Chunk>,
    labels: BTreeMap<String, u64>,
    size: u64,
    base: Option<u64>,
    /// Offsets, within this stream, of every pointer chunk pushed via
    /// [`Stream::push_chunk`], lets subclassed pointer resolution compute
    /// the address it is being written at (spec.md §3).
    pointer_offsets: Vec<u64>,
}

impl Stream {
    pub fn new() -> Self {
        let mut s = Self::default();
        s.labels.insert("START".to_string(), 0);
        s
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn base(&self) -> Option<u64> {
        self.base
    }

    pub fn set_base(&mut self, base: u64) {
        self.base = Some(base);
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn pointer_offsets(&self) -> &[u64] {
        &self.pointer_offsets
    }

    /// Pushes a chunk directly, recording its offset if it is a pointer.
    pub fn push_chunk(&mut self, chunk: Chunk) {
        if matches!(chunk, Chunk::Pointer { .. }) {
            self.pointer_offsets.push(self.size);
        }
        self.size += chunk.size();
        self.chunks.push(chunk);
    }

    pub fn push_bytes(&mut self, data: Vec<u8>) {
        self.push_chunk(Chunk::Bytes(data));
    }

    pub fn push_byte(&mut self, b: u8) {
        self.push_chunk(Chunk::byte(b));
    }

    /// Removes and returns the last chunk, if any.
    pub fn pop(&mut self) -> Option<Chunk> {
        let chunk = self.chunks.pop()?;
        self.size -= chunk.size();
        if matches!(chunk, Chunk::Pointer { .. }) {
            self.pointer_offsets.pop();
        }
        Some(chunk)
    }

    /// Appends clones of `other`'s chunks; `other` is left untouched. Takes
    /// two distinct borrows, so self-aliasing is already impossible here;
    /// see [`StreamArena::join`] for the handle-identity check.
    pub fn join(&mut self, other: &Stream) {
        for chunk in &other.chunks {
            self.push_chunk(chunk.clone());
        }
    }

    /// Declares `name` at the stream's current end. Fails if already
    /// declared.
    pub fn add_label(&mut self, name: impl Into<String>) -> Result<(), RuntimeError> {
        let name = name.into();
        if self.labels.contains_key(&name) {
            return Err(RuntimeError::DuplicateLabel(name));
        }
        self.labels.insert(name, self.size);
        Ok(())
    }

    pub fn get_label(&self, name: &str) -> Option<u64> {
        self.labels.get(name).copied()
    }

    pub fn labels(&self) -> &BTreeMap<String, u64> {
        &self.labels
    }

    /// Concatenates every chunk's compiled bytes.
    pub fn build(&self, arena: &StreamArena) -> Result<Vec<u8>, CommandError> {
        let mut out = Vec::with_capacity(self.size as usize);
        for chunk in &self.chunks {
            out.extend(chunk.compile(arena)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Endian;

    #[test]
    fn start_label_exists_from_construction() {
        let s = Stream::new();
        assert_eq!(s.get_label("START"), Some(0));
    }

    #[test]
    fn size_tracks_sum_of_chunk_sizes() {
        let mut s = Stream::new();
        s.push_bytes(vec![1, 2, 3]);
        s.push_byte(9);
        assert_eq!(s.size(), 4);
        s.pop();
        assert_eq!(s.size(), 3);
    }

    #[test]
    fn duplicate_label_fails() {
        let mut s = Stream::new();
        assert!(s.add_label("START").is_err());
        s.add_label("END").unwrap();
        assert!(s.add_label("END").is_err());
    }

    #[test]
    fn labels_stay_within_bounds() {
        let mut s = Stream::new();
        s.push_bytes(vec![0; 4]);
        s.add_label("MID").unwrap();
        s.push_bytes(vec![0; 4]);
        s.add_label("END").unwrap();
        for (_, &offset) in s.labels() {
            assert!(offset <= s.size());
        }
    }

    #[test]
    fn join_does_not_clear_the_source_stream() {
        let mut a = Stream::new();
        a.push_byte(1);
        let mut b = Stream::new();
        b.join(&a);
        assert_eq!(b.size(), 1);
        assert_eq!(a.size(), 1);
    }

    #[test]
    fn arena_join_copies_source_chunks_onto_dest() {
        let mut arena = StreamArena::new();
        let dest = arena.alloc();
        let src = arena.alloc();
        arena.get_mut(src).unwrap().push_byte(7);
        arena.join(dest, src).unwrap();
        assert_eq!(arena.get(dest).unwrap().size(), 1);
        assert_eq!(arena.get(src).unwrap().size(), 1);
    }

    #[test]
    fn arena_join_rejects_a_stream_joined_to_itself() {
        let mut arena = StreamArena::new();
        let handle = arena.alloc();
        assert_eq!(arena.join(handle, handle), Err(RuntimeError::SelfJoin));
    }

    #[test]
    fn pointer_chunk_records_its_own_offset() {
        let mut arena = StreamArena::new();
        let target = arena.alloc();
        let mut s = Stream::new();
        s.push_byte(0xAA);
        s.push_chunk(Chunk::Pointer {
            target,
            label: "START".to_string(),
            width: 2,
            endian: Endian::Little,
            transform: None,
        });
        assert_eq!(s.pointer_offsets(), &[1]);
    }
}
