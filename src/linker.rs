//! The writable-range-protected linker, per spec.md §3/§4.G.

use std::io::{Seek, SeekFrom, Write};

use crate::error::{CommandError, MgcResult};
use crate::stream::{StreamArena, StreamHandle};

/// Sets stream base addresses, enforces the writable-range whitelist, and
/// commits bytes to the output image.
#[derive(Debug, Default)]
pub struct Linker {
    delta: i64,
    blocks: Vec<Block>,
    writable_ranges: Vec<(u64, u64)>,
    current_pos: u64,
}

#[derive(Debug)]
struct Block {
    file_pos: u64,
    streams: Vec<StreamHandle>,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subsequent target-address-to-file-offset conversions use
    /// `addr - delta`.
    pub fn set_delta(&mut self, delta: i64) {
        self.delta = delta;
    }

    /// Begins a new block at `file_pos`.
    pub fn set_pos(&mut self, file_pos: u64) {
        self.current_pos = file_pos;
        self.blocks.push(Block {
            file_pos,
            streams: Vec::new(),
        });
    }

    /// Unions `[b, e]` (swapped if reversed) into the writable set, merging
    /// overlapping or adjacent ranges.
    pub fn writable(&mut self, b: u64, e: u64) {
        let (lo, hi) = if b <= e { (b, e) } else { (e, b) };
        self.writable_ranges.push((lo, hi));
        self.writable_ranges.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(self.writable_ranges.len());
        for (lo, hi) in self.writable_ranges.drain(..) {
            match merged.last_mut() {
                Some((_, last_hi)) if lo <= last_hi.saturating_add(1) => {
                    *last_hi = (*last_hi).max(hi);
                }
                _ => merged.push((lo, hi)),
            }
        }
        self.writable_ranges = merged;
    }

    fn is_fully_writable(&self, lo: u64, hi: u64) -> bool {
        self.writable_ranges.iter().any(|&(rlo, rhi)| rlo <= lo && hi <= rhi)
    }

    /// Stamps `handle`'s stream with its target-address base, verifies it
    /// lies entirely within a writable range, and appends it to the block
    /// in progress.
    pub fn add_stream(&mut self, arena: &mut StreamArena, handle: StreamHandle) -> Result<(), CommandError> {
        let size = arena.get(handle).map(|s| s.size()).unwrap_or(0);
        let base = (self.current_pos as i64 + self.delta) as u64;
        if size > 0 {
            let lo = self.current_pos;
            let hi = self.current_pos + size - 1;
            if !self.is_fully_writable(lo, hi) {
                return Err(CommandError::ProtectedRange(lo, hi));
            }
        }
        if let Some(stream) = arena.get_mut(handle) {
            stream.set_base(base);
        }
        if self.blocks.is_empty() {
            self.set_pos(self.current_pos);
        }
        self.blocks
            .last_mut()
            .expect("a block always exists after set_pos")
            .streams
            .push(handle);
        self.current_pos += size;
        Ok(())
    }

    /// Two-phase commit: builds every block's bytes purely (phase 1), then
    /// writes them (phase 2). An I/O failure mid-phase-2 can leave a
    /// partial write; the blocks are already cleared by then, so `flush`
    /// is only idempotent across successful runs (spec.md §4.G).
    pub fn flush<F: Write + Seek + ?Sized>(&mut self, arena: &StreamArena, file: &mut F) -> MgcResult<()> {
        let mut prepared = Vec::with_capacity(self.blocks.len());
        for block in self.blocks.drain(..) {
            let mut bytes = Vec::new();
            for handle in &block.streams {
                if let Some(stream) = arena.get(*handle) {
                    bytes.extend(stream.build(arena)?);
                }
            }
            prepared.push((block.file_pos, bytes));
        }
        for (pos, bytes) in prepared {
            file.seek(SeekFrom::Start(pos))?;
            file.write_all(&bytes)?;
        }
        Ok(())
    }

    /// Seeks `file` to `addr - delta`, returning that file offset.
    pub fn seek_delta<F: Seek + ?Sized>(&self, file: &mut F, addr: u64) -> std::io::Result<u64> {
        let offset = (addr as i64 - self.delta) as u64;
        file.seek(SeekFrom::Start(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor as IoCursor;

    #[test]
    fn writable_merges_overlapping_and_adjacent_ranges() {
        let mut l = Linker::new();
        l.writable(0, 10);
        l.writable(11, 20);
        l.writable(5, 8);
        assert_eq!(l.writable_ranges, vec![(0, 20)]);
    }

    #[test]
    fn writable_is_idempotent() {
        let mut l = Linker::new();
        l.writable(0, 10);
        l.writable(0, 10);
        assert_eq!(l.writable_ranges, vec![(0, 10)]);
    }

    #[test]
    fn add_stream_outside_writable_range_fails() {
        let mut arena = StreamArena::new();
        let h = arena.alloc();
        arena.get_mut(h).unwrap().push_bytes(vec![0; 4]);
        let mut l = Linker::new();
        l.set_pos(0);
        // no writable() call at all
        assert!(l.add_stream(&mut arena, h).is_err());
    }

    #[test]
    fn pointer_resolution_end_to_end_scenario() {
        // spec.md §8 scenario 5.
        use crate::chunk::{Chunk, Endian};

        let mut arena = StreamArena::new();
        let stream_a = arena.alloc();
        let stream_b = arena.alloc();

        arena.get_mut(stream_b).unwrap().push_bytes(vec![0x10, 0x20]);
        arena.get_mut(stream_b).unwrap().push_chunk(Chunk::Pointer {
            target: stream_a,
            label: "START".to_string(),
            width: 2,
            endian: Endian::Little,
            transform: None,
        });

        let mut l = Linker::new();
        l.set_delta(0x8000);
        l.writable(0x0000, 0xFFFF);
        l.set_pos(0);
        l.add_stream(&mut arena, stream_b).unwrap();
        l.set_pos(16);
        l.add_stream(&mut arena, stream_a).unwrap();

        let mut file = IoCursor::new(vec![0u8; 32]);
        l.flush(&arena, &mut file).unwrap();

        assert_eq!(arena.get(stream_a).unwrap().base(), Some(0x8010));
        let bytes = file.into_inner();
        assert_eq!(&bytes[0..4], &[0x10, 0x20, 0x10, 0x80]);
    }
}
