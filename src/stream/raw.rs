//! Bounded pass-through layer.
//!
//! Serves the `store` method and raw-mode transfers: bytes cross unchanged,
//! reads are clamped to the input budget, totals are tracked on both sides.

use std::io::SeekFrom;

use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamProp};

/// Identity stream with a read-side byte budget.
pub struct RawStream<S: Stream> {
    base: S,
    total_in: u64,
    total_out: u64,
    /// Remaining read budget; `u64::MAX` means unbounded.
    remaining: u64,
}

impl<S: Stream> RawStream<S> {
    pub fn new(base: S) -> Self {
        Self {
            base,
            total_in: 0,
            total_out: 0,
            remaining: u64::MAX,
        }
    }

    /// Bound reads to `max` bytes of base-stream input.
    pub fn with_limit(base: S, max: u64) -> Self {
        let mut stream = Self::new(base);
        stream.remaining = max;
        stream
    }

    pub fn into_inner(self) -> S {
        self.base
    }
}

impl<S: Stream> Stream for RawStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = (buf.len() as u64).min(self.remaining) as usize;
        if want == 0 {
            return Ok(0);
        }
        let n = self.base.read(&mut buf[..want])?;
        self.total_in += n as u64;
        self.total_out += n as u64;
        if self.remaining != u64::MAX {
            self.remaining -= n as u64;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.base.write(buf)?;
        self.total_in += n as u64;
        self.total_out += n as u64;
        Ok(n)
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(ZipError::Param("raw stream is not seekable"))
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.total_out)
    }

    fn flush(&mut self) -> Result<()> {
        self.base.flush()
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        match prop {
            StreamProp::TotalIn => Some(self.total_in as i64),
            StreamProp::TotalOut => Some(self.total_out as i64),
            _ => self.base.get_prop(prop),
        }
    }

    fn set_prop(&mut self, prop: StreamProp, value: i64) -> Result<()> {
        match prop {
            StreamProp::TotalInMax => {
                self.remaining = value as u64;
                Ok(())
            }
            _ => self.base.set_prop(prop, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemStream;

    #[test]
    fn read_respects_budget() {
        let mut raw = RawStream::with_limit(MemStream::from_vec(b"0123456789".to_vec()), 4);
        let mut buf = [0u8; 8];
        assert_eq!(raw.read(&mut buf).unwrap(), 4);
        assert_eq!(raw.read(&mut buf).unwrap(), 0);
        assert_eq!(&buf[..4], b"0123");
    }

    #[test]
    fn write_counts_totals() {
        let mut raw = RawStream::new(MemStream::new());
        raw.write_all(b"abc").unwrap();
        assert_eq!(raw.get_prop(StreamProp::TotalOut), Some(3));
        assert_eq!(raw.into_inner().as_slice(), b"abc");
    }
}
