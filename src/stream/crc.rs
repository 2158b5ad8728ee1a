//! CRC-32 tap layer.
//!
//! Sits at the payload-facing end of the entry pipeline and observes every
//! byte that crosses it, in either direction, while counting totals.

use std::io::SeekFrom;

use crc32fast::Hasher as Crc32;

use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamProp};

/// Pass-through stream computing CRC-32 over the bytes it carries.
pub struct CrcStream<S: Stream> {
    base: S,
    crc: Crc32,
    total: u64,
}

impl<S: Stream> CrcStream<S> {
    pub fn new(base: S) -> Self {
        Self {
            base,
            crc: Crc32::new(),
            total: 0,
        }
    }

    /// CRC-32 of everything observed so far.
    pub fn value(&self) -> u32 {
        self.crc.clone().finalize()
    }

    /// Bytes observed so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Unwrap, returning the base stream, the final CRC and the byte count.
    pub fn finish(self) -> (S, u32, u64) {
        (self.base, self.crc.finalize(), self.total)
    }
}

impl<S: Stream> Stream for CrcStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.base.read(buf)?;
        self.crc.update(&buf[..n]);
        self.total += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.base.write(buf)?;
        self.crc.update(&buf[..n]);
        self.total += n as u64;
        Ok(n)
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(ZipError::Param("crc stream is not seekable"))
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.total)
    }

    fn flush(&mut self) -> Result<()> {
        self.base.flush()
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        match prop {
            StreamProp::TotalIn | StreamProp::TotalOut => Some(self.total as i64),
            _ => self.base.get_prop(prop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemStream;

    #[test]
    fn crc_matches_crc32fast_on_write() {
        let mut tap = CrcStream::new(MemStream::new());
        tap.write_all(b"hi\n").unwrap();
        let (base, crc, total) = tap.finish();
        assert_eq!(crc, crc32fast::hash(b"hi\n"));
        assert_eq!(total, 3);
        assert_eq!(base.as_slice(), b"hi\n");
    }

    #[test]
    fn crc_accumulates_across_reads() {
        let mut tap = CrcStream::new(MemStream::from_vec(b"abcdef".to_vec()));
        let mut buf = [0u8; 4];
        tap.read_exact(&mut buf).unwrap();
        tap.read_exact(&mut buf[..2]).unwrap();
        let (_, crc, total) = tap.finish();
        assert_eq!(crc, crc32fast::hash(b"abcdef"));
        assert_eq!(total, 6);
    }
}
