//! Byte-oriented stream abstraction used by every layer of the codec.
//!
//! The archive core never touches files or buffers directly: storage,
//! in-memory staging, the CRC-32 tap, the compressors and the encryption
//! layers all implement [`Stream`]. Layers are stacked per entry, each one
//! configured with the next as its base, and each direction (read or write)
//! is driven through the same trait.

use std::io::SeekFrom;

use crate::error::{Result, ZipError};

mod crc;
mod file;
mod memory;
mod raw;

pub(crate) mod deflate;
#[cfg(feature = "bzip2-support")]
pub(crate) mod bzip;
#[cfg(feature = "lzma-support")]
pub(crate) mod lzma;

pub use crc::CrcStream;
pub use file::FileStream;
pub use memory::MemStream;
pub use raw::RawStream;

/// Numeric stream properties.
///
/// Not every stream supports every property; unsupported reads return
/// `None` and unsupported writes are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProp {
    /// Bytes consumed from the base stream (read) or from the caller (write)
    TotalIn,
    /// Bytes produced to the caller (read) or to the base stream (write)
    TotalOut,
    /// Read-side input budget in bytes
    TotalInMax,
    /// Read-side output bound in bytes
    TotalOutMax,
    /// Size of the layer's leading header, in bytes
    HeaderSize,
    /// Size of the layer's trailing footer, in bytes
    FooterSize,
    /// Compression level
    CompressLevel,
    /// Disk number the stream is currently positioned on
    DiskNumber,
    /// Size of one disk when the storage stream splits output
    DiskSize,
}

/// A seekable byte stream with numeric properties.
///
/// Multi-byte integer helpers are little-endian, matching the ZIP format.
pub trait Stream {
    /// Read up to `buf.len()` bytes. Returns 0 at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `buf.len()` bytes, returning the number written.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Reposition the stream.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Current position.
    fn tell(&mut self) -> Result<u64>;

    /// Flush buffered output to the base.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Query a numeric property. `None` when the stream does not carry it.
    fn get_prop(&self, _prop: StreamProp) -> Option<i64> {
        None
    }

    /// Set a numeric property.
    fn set_prop(&mut self, _prop: StreamProp, _value: i64) -> Result<()> {
        Err(ZipError::Param("stream property not supported"))
    }

    /// Read exactly `buf.len()` bytes or fail with `EndOfStream`.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut pos = 0;
        while pos < buf.len() {
            let n = self.read(&mut buf[pos..])?;
            if n == 0 {
                return Err(ZipError::EndOfStream);
            }
            pos += n;
        }
        Ok(())
    }

    /// Write all of `buf` or fail.
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut pos = 0;
        while pos < buf.len() {
            let n = self.write(&buf[pos..])?;
            if n == 0 {
                return Err(ZipError::EndOfStream);
            }
            pos += n;
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value])
    }

    fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }
}

impl<S: Stream + ?Sized> Stream for &mut S {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        (**self).seek(pos)
    }

    fn tell(&mut self) -> Result<u64> {
        (**self).tell()
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        (**self).get_prop(prop)
    }

    fn set_prop(&mut self, prop: StreamProp, value: i64) -> Result<()> {
        (**self).set_prop(prop, value)
    }
}

/// Copy exactly `len` bytes from `src` to `dst`.
pub fn copy_stream(dst: &mut dyn Stream, src: &mut dyn Stream, len: u64) -> Result<()> {
    let mut buf = [0u8; 16 * 1024];
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        src.read_exact(&mut buf[..chunk])?;
        dst.write_all(&buf[..chunk])?;
        remaining -= chunk as u64;
    }
    Ok(())
}
