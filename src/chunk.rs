//! Emitted binary units, per spec.md §3: byte-string, integer, pointer and
//! composite chunks.

use std::fmt;
use std::sync::Arc;

use byteorder::{WriteBytesExt, BE, LE};

use crate::error::CommandError;
use crate::stream::{StreamArena, StreamHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// A transform applied to a resolved pointer address before serialization,
/// the Rust expression of spec.md §3's "Engines may subclass [the pointer
/// chunk] to... index into a pattern table rather than directly."
pub type PointerTransform = Arc<dyn Fn(u64) -> u64 + Send + Sync>;

#[derive(Clone)]
pub enum Chunk {
    Bytes(Vec<u8>),
    Integer {
        value: u64,
        width: u8,
        endian: Endian,
    },
    Pointer {
        target: StreamHandle,
        label: String,
        width: u8,
        endian: Endian,
        transform: Option<PointerTransform>,
    },
    Composite(Vec<Chunk>),
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Chunk::Integer { value, width, endian } => f
                .debug_struct("Integer")
                .field("value", value)
                .field("width", width)
                .field("endian", endian)
                .finish(),
            Chunk::Pointer { target, label, width, endian, .. } => f
                .debug_struct("Pointer")
                .field("target", target)
                .field("label", label)
                .field("width", width)
                .field("endian", endian)
                .finish(),
            Chunk::Composite(items) => f.debug_tuple("Composite").field(&items.len()).finish(),
        }
    }
}

impl Chunk {
    pub fn integer(value: u64, width: u8, endian: Endian) -> Self {
        debug_assert!((1..=4).contains(&width), "chunk width must be 1..=4");
        Chunk::Integer { value, width, endian }
    }

    pub fn byte(value: u8) -> Self {
        Chunk::integer(value as u64, 1, Endian::Little)
    }

    /// Size in bytes. Stable between construction and emission, except that
    /// a composite chunk's size is the live sum of its sub-chunks' sizes
    /// (spec.md §3).
    pub fn size(&self) -> u64 {
        match self {
            Chunk::Bytes(b) => b.len() as u64,
            Chunk::Integer { width, .. } => *width as u64,
            Chunk::Pointer { width, .. } => *width as u64,
            Chunk::Composite(items) => items.iter().map(Chunk::size).sum(),
        }
    }

    /// Serializes this chunk to bytes, resolving any pointer chunks against
    /// `arena`.
    pub fn compile(&self, arena: &StreamArena) -> Result<Vec<u8>, CommandError> {
        match self {
            Chunk::Bytes(b) => Ok(b.clone()),
            Chunk::Integer { value, width, endian } => Ok(write_width(*value, *width, *endian)),
            Chunk::Pointer {
                target,
                label,
                width,
                endian,
                transform,
            } => {
                let stream = arena.get(*target).ok_or_else(|| CommandError::UnknownLabel {
                    stream: format!("{target:?}"),
                    label: label.clone(),
                })?;
                let offset = stream.get_label(label).ok_or_else(|| CommandError::UnknownLabel {
                    stream: format!("{target:?}"),
                    label: label.clone(),
                })?;
                let base = stream.base().ok_or_else(|| CommandError::UnknownLabel {
                    stream: format!("{target:?}"),
                    label: label.clone(),
                })?;
                let mut addr = base + offset;
                if let Some(f) = transform {
                    addr = f(addr);
                }
                Ok(write_width(addr, *width, *endian))
            }
            Chunk::Composite(items) => {
                let mut out = Vec::with_capacity(self.size() as usize);
                for c in items {
                    out.extend(c.compile(arena)?);
                }
                Ok(out)
            }
        }
    }
}

fn write_width(value: u64, width: u8, endian: Endian) -> Vec<u8> {
    let mut out = Vec::with_capacity(width as usize);
    match endian {
        Endian::Little => out.write_uint::<LE>(value, width as usize).expect("in-memory write"),
        Endian::Big => out.write_uint::<BE>(value, width as usize).expect("in-memory write"),
    }
    out
}
