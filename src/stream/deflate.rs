//! Deflate compression layer.
//!
//! Drives the raw `flate2` codec objects so one stream type serves both
//! directions of the entry pipeline: on write, caller bytes are compressed
//! and pushed to the base stream; on read, compressed bytes are pulled from
//! the base (respecting the input budget) and inflated into the caller's
//! buffer.

use std::io::SeekFrom;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamProp};

const CHUNK: usize = 16 * 1024;

enum Codec {
    Deflate(Compress),
    Inflate(Decompress),
}

pub struct DeflateStream<S: Stream> {
    base: S,
    codec: Codec,
    /// Scratch: output staging on write, input staging on read.
    buf: Box<[u8]>,
    buf_pos: usize,
    buf_len: usize,
    /// Remaining read-side input budget; `u64::MAX` means unbounded.
    remaining_in: u64,
    stream_end: bool,
    level: u32,
}

impl<S: Stream> DeflateStream<S> {
    /// Compressing layer for entry writes. Raw deflate, no zlib wrapper.
    pub fn new_writer(base: S, level: u32) -> Self {
        Self {
            base,
            codec: Codec::Deflate(Compress::new(Compression::new(level.min(9)), false)),
            buf: vec![0u8; CHUNK].into_boxed_slice(),
            buf_pos: 0,
            buf_len: 0,
            remaining_in: u64::MAX,
            stream_end: false,
            level: level.min(9),
        }
    }

    /// Decompressing layer for entry reads, bounded to `max_in` compressed
    /// bytes from the base stream.
    pub fn new_reader(base: S, max_in: u64) -> Self {
        Self {
            base,
            codec: Codec::Inflate(Decompress::new(false)),
            buf: vec![0u8; CHUNK].into_boxed_slice(),
            buf_pos: 0,
            buf_len: 0,
            remaining_in: max_in,
            stream_end: false,
            level: 0,
        }
    }

    /// Flush the compressor to stream end and return the base stream with
    /// the (total_in, total_out) byte counts.
    pub fn finish(mut self) -> Result<(S, u64, u64)> {
        if let Codec::Deflate(ref mut c) = self.codec {
            loop {
                let before = c.total_out();
                let status = c
                    .compress(&[], &mut self.buf, FlushCompress::Finish)
                    .map_err(|_| ZipError::Internal("deflate finish failed"))?;
                let produced = (c.total_out() - before) as usize;
                self.base.write_all(&self.buf[..produced])?;
                if status == Status::StreamEnd {
                    break;
                }
            }
            self.base.flush()?;
        }
        let (total_in, total_out) = match &self.codec {
            Codec::Deflate(c) => (c.total_in(), c.total_out()),
            Codec::Inflate(d) => (d.total_in(), d.total_out()),
        };
        Ok((self.base, total_in, total_out))
    }

}

impl<S: Stream> Stream for DeflateStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let d = match self.codec {
            Codec::Inflate(ref mut d) => d,
            Codec::Deflate(_) => return Err(ZipError::Param("deflate stream opened for write")),
        };
        if buf.is_empty() || self.stream_end {
            return Ok(0);
        }
        loop {
            if self.buf_pos == self.buf_len {
                self.buf_pos = 0;
                self.buf_len = 0;
                let want = (self.buf.len() as u64).min(self.remaining_in) as usize;
                if want > 0 {
                    let n = self.base.read(&mut self.buf[..want])?;
                    self.buf_len = n;
                    if self.remaining_in != u64::MAX {
                        self.remaining_in -= n as u64;
                    }
                }
            }
            let input = &self.buf[self.buf_pos..self.buf_len];
            let before_in = d.total_in();
            let before_out = d.total_out();
            let status = d
                .decompress(input, buf, FlushDecompress::None)
                .map_err(|_| ZipError::Format("corrupt deflate stream"))?;
            self.buf_pos += (d.total_in() - before_in) as usize;
            let produced = (d.total_out() - before_out) as usize;
            if status == Status::StreamEnd {
                self.stream_end = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            // No progress: either more input is available, or the stream
            // was truncated before its final block.
            if self.buf_pos == self.buf_len && self.remaining_in == 0 {
                return Err(ZipError::Format("incomplete deflate stream"));
            }
            if self.buf_pos == self.buf_len && self.buf_len == 0 {
                return Err(ZipError::EndOfStream);
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let c = match self.codec {
            Codec::Deflate(ref mut c) => c,
            Codec::Inflate(_) => return Err(ZipError::Param("deflate stream opened for read")),
        };
        let mut consumed_total = 0;
        while consumed_total < buf.len() {
            let before_in = c.total_in();
            let before_out = c.total_out();
            c.compress(&buf[consumed_total..], &mut self.buf, FlushCompress::None)
                .map_err(|_| ZipError::Internal("deflate compression failed"))?;
            consumed_total += (c.total_in() - before_in) as usize;
            let produced = (c.total_out() - before_out) as usize;
            self.base.write_all(&self.buf[..produced])?;
        }
        Ok(buf.len())
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(ZipError::Param("deflate stream is not seekable"))
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(match &self.codec {
            Codec::Deflate(c) => c.total_in(),
            Codec::Inflate(d) => d.total_out(),
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.base.flush()
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        match (&self.codec, prop) {
            (Codec::Deflate(c), StreamProp::TotalIn) => Some(c.total_in() as i64),
            (Codec::Deflate(c), StreamProp::TotalOut) => Some(c.total_out() as i64),
            (Codec::Inflate(d), StreamProp::TotalIn) => Some(d.total_in() as i64),
            (Codec::Inflate(d), StreamProp::TotalOut) => Some(d.total_out() as i64),
            (_, StreamProp::CompressLevel) => Some(self.level as i64),
            _ => self.base.get_prop(prop),
        }
    }

    fn set_prop(&mut self, prop: StreamProp, value: i64) -> Result<()> {
        match prop {
            StreamProp::TotalInMax => {
                self.remaining_in = value as u64;
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

    fn roundtrip(data: &[u8], level: u32) -> Vec<u8> {
        let mut writer = DeflateStream::new_writer(MemStream::new(), level);
        writer.write_all(data).unwrap();
        let (compressed, total_in, _) = writer.finish().unwrap();
        assert_eq!(total_in, data.len() as u64);

        let len = compressed.len();
        let mut stream = compressed;
        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut reader = DeflateStream::new_reader(stream, len);
        let mut out = Vec::new();
        let mut buf = [0u8; 777];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn compress_roundtrip() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(roundtrip(&data, 6), data);
    }

    #[test]
    fn empty_input_roundtrip() {
        assert_eq!(roundtrip(b"", 9), b"");
    }

    #[test]
    fn truncated_stream_is_a_format_error() {
        let mut writer = DeflateStream::new_writer(MemStream::new(), 6);
        writer.write_all(b"some data to compress, long enough").unwrap();
        let (compressed, _, _) = writer.finish().unwrap();
        let bytes = compressed.into_inner();

        let truncated = MemStream::from_vec(bytes[..bytes.len() - 2].to_vec());
        let mut reader = DeflateStream::new_reader(truncated, (bytes.len() - 2) as u64);
        let mut sink = [0u8; 256];
        let mut result = Ok(0);
        for _ in 0..16 {
            result = reader.read(&mut sink);
            match result {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        assert!(matches!(result, Err(ZipError::Format(_))));
    }
}
