//! Byte stream framing for node records.
//!
//! `NodeStream` wraps a seekable byte stream and adds the typed helpers
//! the node records are built from: little-endian scalars and slot
//! arrays. Slot arrays are framed in one of two modes: in the default
//! mode a node record always spans its full slot-count footprint, with
//! the unused suffix skipped rather than written; in compact mode only
//! the used prefix is emitted. Readers behave symmetrically.

use arbor_common::{ArborError, Result};
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};

/// A fixed-width, trivially copyable on-disk scalar.
///
/// Keys and values of the tree must implement this; the width is known
/// at compile time and determines the on-disk slot sizes. Encoding is
/// little-endian for the provided integer implementations.
pub trait FixedWidth: Copy + Default + fmt::Debug {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Writes the encoding into `buf[..WIDTH]`.
    fn encode_into(&self, buf: &mut [u8]);

    /// Reads a value from `buf[..WIDTH]`.
    fn decode_from(buf: &[u8]) -> Self;
}

macro_rules! fixed_width_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FixedWidth for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode_into(&self, buf: &mut [u8]) {
                    buf[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode_from(buf: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&buf[..Self::WIDTH]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

fixed_width_int!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

/// Seekable byte stream with typed record framing.
pub struct NodeStream<S> {
    io: S,
    compact: bool,
}

impl<S: Read + Write + Seek> NodeStream<S> {
    /// Wraps a byte stream in the default (padded) framing mode.
    pub fn new(io: S) -> Self {
        Self { io, compact: false }
    }

    /// Returns the wrapped stream.
    pub fn into_inner(self) -> S {
        self.io
    }

    /// Returns true when slot arrays are framed without padding.
    pub fn is_compact(&self) -> bool {
        self.compact
    }

    /// Switches the slot-array framing mode.
    pub fn set_compact(&mut self, compact: bool) {
        self.compact = compact;
    }

    /// Seeks to an absolute byte position.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.io.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    /// Advances the position by `bytes` without writing.
    pub fn skip(&mut self, bytes: u64) -> Result<()> {
        self.io.seek(SeekFrom::Current(bytes as i64))?;
        Ok(())
    }

    /// Current byte position.
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.io.stream_position()?)
    }

    /// Reads exactly `buf.len()` bytes.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.io.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                let offset = self.io.stream_position().unwrap_or(0);
                Err(ArborError::ShortRead { offset })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes all of `buf`.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if let Err(source) = self.io.write_all(buf) {
            let offset = self.io.stream_position().unwrap_or(0);
            return Err(ArborError::WriteFailed { offset, source });
        }
        Ok(())
    }

    /// Extends the stream with `bytes` zero bytes.
    pub fn write_zeros(&mut self, bytes: u64) -> Result<()> {
        const CHUNK: [u8; 512] = [0u8; 512];
        let mut remaining = bytes as usize;
        while remaining > 0 {
            let n = remaining.min(CHUNK.len());
            self.write_all(&CHUNK[..n])?;
            remaining -= n;
        }
        Ok(())
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value])
    }

    /// Reads a little-endian u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Writes a little-endian u64.
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    /// Reads `used` slots into `out`, then skips the padding for the
    /// remaining `count - used` slots unless the stream is compact.
    pub fn read_slots<T: FixedWidth>(
        &mut self,
        out: &mut [T],
        used: usize,
        count: usize,
    ) -> Result<()> {
        debug_assert!(used <= out.len() && used <= count);
        let mut raw = vec![0u8; used * T::WIDTH];
        self.read_exact(&mut raw)?;
        for (slot, chunk) in out[..used].iter_mut().zip(raw.chunks_exact(T::WIDTH)) {
            *slot = T::decode_from(chunk);
        }
        if !self.compact {
            self.skip(((count - used) * T::WIDTH) as u64)?;
        }
        Ok(())
    }

    /// Writes the used prefix `slots`, then skips the padding for the
    /// remaining `count - slots.len()` slots unless the stream is
    /// compact.
    pub fn write_slots<T: FixedWidth>(&mut self, slots: &[T], count: usize) -> Result<()> {
        debug_assert!(slots.len() <= count);
        let mut buf = BytesMut::with_capacity(slots.len() * T::WIDTH);
        let mut scratch = [0u8; 16];
        for slot in slots {
            slot.encode_into(&mut scratch);
            buf.put_slice(&scratch[..T::WIDTH]);
        }
        self.write_all(&buf)?;
        if !self.compact {
            self.skip(((count - slots.len()) * T::WIDTH) as u64)?;
        }
        Ok(())
    }
}
