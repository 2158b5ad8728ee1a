//! Bzip2 compression layer (ZIP method 12).
//!
//! Same shape as the deflate layer, driving the raw `bzip2` codec objects.

use std::io::SeekFrom;

use bzip2::{Action, Compress, Compression, Decompress, Status};

use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamProp};

const CHUNK: usize = 16 * 1024;

enum Codec {
    Compress(Compress),
    Decompress(Decompress),
}

pub struct BzipStream<S: Stream> {
    base: S,
    codec: Codec,
    buf: Box<[u8]>,
    buf_pos: usize,
    buf_len: usize,
    remaining_in: u64,
    stream_end: bool,
}

impl<S: Stream> BzipStream<S> {
    pub fn new_writer(base: S, level: u32) -> Self {
        Self {
            base,
            codec: Codec::Compress(Compress::new(Compression::new(level.clamp(1, 9)), 30)),
            buf: vec![0u8; CHUNK].into_boxed_slice(),
            buf_pos: 0,
            buf_len: 0,
            remaining_in: u64::MAX,
            stream_end: false,
        }
    }

    pub fn new_reader(base: S, max_in: u64) -> Self {
        Self {
            base,
            codec: Codec::Decompress(Decompress::new(false)),
            buf: vec![0u8; CHUNK].into_boxed_slice(),
            buf_pos: 0,
            buf_len: 0,
            remaining_in: max_in,
            stream_end: false,
        }
    }

    pub fn finish(mut self) -> Result<(S, u64, u64)> {
        if let Codec::Compress(ref mut c) = self.codec {
            loop {
                let before = c.total_out();
                let status = c
                    .compress(&[], &mut self.buf, Action::Finish)
                    .map_err(|_| ZipError::Internal("bzip2 finish failed"))?;
                let produced = (c.total_out() - before) as usize;
                self.base.write_all(&self.buf[..produced])?;
                if status == Status::StreamEnd {
                    break;
                }
            }
            self.base.flush()?;
        }
        let (total_in, total_out) = match &self.codec {
            Codec::Compress(c) => (c.total_in(), c.total_out()),
            Codec::Decompress(d) => (d.total_in(), d.total_out()),
        };
        Ok((self.base, total_in, total_out))
    }
}

impl<S: Stream> Stream for BzipStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let d = match self.codec {
            Codec::Decompress(ref mut d) => d,
            Codec::Compress(_) => return Err(ZipError::Param("bzip2 stream opened for write")),
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
                .decompress(input, buf)
                .map_err(|_| ZipError::Format("corrupt bzip2 stream"))?;
            self.buf_pos += (d.total_in() - before_in) as usize;
            let produced = (d.total_out() - before_out) as usize;
            if status == Status::StreamEnd {
                self.stream_end = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            if self.buf_pos == self.buf_len && self.remaining_in == 0 {
                return Err(ZipError::Format("incomplete bzip2 stream"));
            }
            if self.buf_pos == self.buf_len && self.buf_len == 0 {
                return Err(ZipError::EndOfStream);
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let c = match self.codec {
            Codec::Compress(ref mut c) => c,
            Codec::Decompress(_) => return Err(ZipError::Param("bzip2 stream opened for read")),
        };
        let mut consumed_total = 0;
        while consumed_total < buf.len() {
            let before_in = c.total_in();
            let before_out = c.total_out();
            c.compress(&buf[consumed_total..], &mut self.buf, Action::Run)
                .map_err(|_| ZipError::Internal("bzip2 compression failed"))?;
            consumed_total += (c.total_in() - before_in) as usize;
            let produced = (c.total_out() - before_out) as usize;
            self.base.write_all(&self.buf[..produced])?;
        }
        Ok(buf.len())
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(ZipError::Param("bzip2 stream is not seekable"))
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(match &self.codec {
            Codec::Compress(c) => c.total_in(),
            Codec::Decompress(d) => d.total_out(),
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.base.flush()
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        let (total_in, total_out) = match &self.codec {
            Codec::Compress(c) => (c.total_in(), c.total_out()),
            Codec::Decompress(d) => (d.total_in(), d.total_out()),
        };
        match prop {
            StreamProp::TotalIn => Some(total_in as i64),
            StreamProp::TotalOut => Some(total_out as i64),
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

    #[test]
    fn compress_roundtrip() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 13) as u8).collect();
        let mut writer = BzipStream::new_writer(MemStream::new(), 9);
        writer.write_all(&data).unwrap();
        let (compressed, total_in, _) = writer.finish().unwrap();
        assert_eq!(total_in, data.len() as u64);

        let len = compressed.len();
        let mut stream = compressed;
        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut reader = BzipStream::new_reader(stream, len);
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, data);
    }
}
