//! LZMA compression layer (ZIP method 14).
//!
//! The method-14 payload is framed as: version major/minor (2 bytes),
//! properties size (u16, always 5), the 5 LZMA property bytes, then the raw
//! LZMA stream. liblzma's "alone" codec carries the same properties followed
//! by an 8-byte uncompressed-size field, so the writer strips that field
//! from the encoder output and the reader synthesizes it (unknown size) for
//! the decoder.
//!
//! The framing travels through the encryption layer like any other payload
//! byte, so the caller reads/writes it via [`read_zip_header`] /
//! [`write_zip_header`] before wrapping the stream. Constructors hand the
//! base stream back on failure.

use std::io::SeekFrom;

use xz2::stream::{Action, LzmaOptions, Status, Stream as LzmaCodec};

use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamProp};

const CHUNK: usize = 16 * 1024;

/// Bytes of the alone header: 5 property bytes + 8 size bytes.
const ALONE_HEADER_SIZE: usize = 13;
const PROPS_SIZE: usize = 5;

/// Version bytes advertised in the ZIP framing (LZMA SDK 9.20).
const VER_MAJOR: u8 = 9;
const VER_MINOR: u8 = 20;

/// Size of the ZIP method-14 framing preceding the property bytes.
pub const ZIP_HEADER_SIZE: u64 = 4 + PROPS_SIZE as u64;

/// Emit the method-14 version/props-size framing.
pub fn write_zip_header(base: &mut dyn Stream) -> Result<()> {
    base.write_u8(VER_MAJOR)?;
    base.write_u8(VER_MINOR)?;
    base.write_u16(PROPS_SIZE as u16)?;
    Ok(())
}

/// Consume the method-14 framing, returning the LZMA property bytes.
pub fn read_zip_header(base: &mut dyn Stream) -> Result<[u8; PROPS_SIZE]> {
    let _major = base.read_u8()?;
    let _minor = base.read_u8()?;
    if base.read_u16()? as usize != PROPS_SIZE {
        return Err(ZipError::Format("unexpected lzma properties size"));
    }
    let mut props = [0u8; PROPS_SIZE];
    base.read_exact(&mut props)?;
    Ok(props)
}

enum Direction {
    Write {
        /// Alone-header bytes already seen from the encoder; the 8-byte
        /// size field is dropped on the way through.
        header_seen: usize,
    },
    Read {
        remaining_in: u64,
        remaining_out: u64,
        /// Synthesized alone header not yet fed to the decoder.
        pending: Vec<u8>,
    },
}

pub struct LzmaStream<S: Stream> {
    base: S,
    codec: LzmaCodec,
    direction: Direction,
    buf: Box<[u8]>,
    buf_pos: usize,
    buf_len: usize,
    stream_end: bool,
}

impl<S: Stream> LzmaStream<S> {
    /// Compressing layer; the caller has already emitted the framing via
    /// [`write_zip_header`]. The alone encoder always terminates the
    /// stream with an end marker.
    pub fn new_writer(base: S, level: u32) -> std::result::Result<Self, (S, ZipError)> {
        let codec = match LzmaOptions::new_preset(level.min(9))
            .and_then(|options| LzmaCodec::new_lzma_encoder(&options))
        {
            Ok(codec) => codec,
            Err(_) => return Err((base, ZipError::Internal("lzma encoder init failed"))),
        };
        Ok(Self {
            base,
            codec,
            direction: Direction::Write { header_seen: 0 },
            buf: vec![0u8; CHUNK].into_boxed_slice(),
            buf_pos: 0,
            buf_len: 0,
            stream_end: false,
        })
    }

    /// Decompressing layer bounded to `data_len` compressed bytes past the
    /// framing and, when the entry carries no end-of-stream marker, to
    /// `max_out` produced bytes. The caller has already consumed the
    /// framing via [`read_zip_header`].
    pub fn new_reader(
        base: S,
        props: [u8; PROPS_SIZE],
        data_len: u64,
        max_out: Option<u64>,
    ) -> std::result::Result<Self, (S, ZipError)> {
        let codec = match LzmaCodec::new_lzma_decoder(u64::MAX) {
            Ok(codec) => codec,
            Err(_) => return Err((base, ZipError::Internal("lzma decoder init failed"))),
        };

        // Alone header with the size field marked unknown.
        let mut pending = Vec::with_capacity(ALONE_HEADER_SIZE);
        pending.extend_from_slice(&props);
        pending.extend_from_slice(&u64::MAX.to_le_bytes());

        Ok(Self {
            base,
            codec,
            direction: Direction::Read {
                remaining_in: data_len,
                remaining_out: max_out.unwrap_or(u64::MAX),
                pending,
            },
            buf: vec![0u8; CHUNK].into_boxed_slice(),
            buf_pos: 0,
            buf_len: 0,
            stream_end: false,
        })
    }

    pub fn finish(mut self) -> Result<(S, u64, u64)> {
        if let Direction::Write { ref mut header_seen } = self.direction {
            loop {
                let before = self.codec.total_out();
                let status = self
                    .codec
                    .process(&[], &mut self.buf, Action::Finish)
                    .map_err(|_| ZipError::Internal("lzma finish failed"))?;
                let produced = (self.codec.total_out() - before) as usize;
                write_stripping_size_field(&mut self.base, &self.buf[..produced], header_seen)?;
                if status == Status::StreamEnd {
                    break;
                }
            }
            self.base.flush()?;
        }
        Ok((self.base, self.codec.total_in(), self.codec.total_out()))
    }
}

/// Forward encoder output, dropping the 8-byte size field that follows the
/// 5 property bytes of the alone header.
fn write_stripping_size_field<S: Stream>(
    base: &mut S,
    mut chunk: &[u8],
    header_seen: &mut usize,
) -> Result<()> {
    while !chunk.is_empty() && *header_seen < ALONE_HEADER_SIZE {
        let offset = *header_seen;
        let take = chunk.len().min(ALONE_HEADER_SIZE - offset);
        let (head, rest) = chunk.split_at(take);
        if offset < PROPS_SIZE {
            let props_take = head.len().min(PROPS_SIZE - offset);
            base.write_all(&head[..props_take])?;
        }
        *header_seen += take;
        chunk = rest;
    }
    if !chunk.is_empty() {
        base.write_all(chunk)?;
    }
    Ok(())
}

impl<S: Stream> Stream for LzmaStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (remaining_in, remaining_out, pending) = match self.direction {
            Direction::Read {
                ref mut remaining_in,
                ref mut remaining_out,
                ref mut pending,
            } => (remaining_in, remaining_out, pending),
            Direction::Write { .. } => {
                return Err(ZipError::Param("lzma stream opened for write"))
            }
        };
        if buf.is_empty() || self.stream_end || *remaining_out == 0 {
            return Ok(0);
        }
        let out_cap = (buf.len() as u64).min(*remaining_out) as usize;
        let out = &mut buf[..out_cap];
        loop {
            // Feed the synthesized alone header before any payload bytes.
            let input: &[u8] = if !pending.is_empty() {
                pending
            } else {
                if self.buf_pos == self.buf_len {
                    self.buf_pos = 0;
                    self.buf_len = 0;
                    let want = (self.buf.len() as u64).min(*remaining_in) as usize;
                    if want > 0 {
                        let n = self.base.read(&mut self.buf[..want])?;
                        self.buf_len = n;
                        *remaining_in -= n as u64;
                    }
                }
                &self.buf[self.buf_pos..self.buf_len]
            };
            let from_pending = !pending.is_empty();
            let before_in = self.codec.total_in();
            let before_out = self.codec.total_out();
            let status = self
                .codec
                .process(input, out, Action::Run)
                .map_err(|_| ZipError::Format("corrupt lzma stream"))?;
            let consumed = (self.codec.total_in() - before_in) as usize;
            if from_pending {
                pending.drain(..consumed);
            } else {
                self.buf_pos += consumed;
            }
            let produced = (self.codec.total_out() - before_out) as usize;
            if *remaining_out != u64::MAX {
                *remaining_out -= produced as u64;
            }
            if status == Status::StreamEnd {
                self.stream_end = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            if pending.is_empty() && self.buf_pos == self.buf_len && *remaining_in == 0 {
                // Entries without an end-of-stream marker stop exactly at
                // the output bound; running out of input earlier is damage.
                if *remaining_out == 0 {
                    self.stream_end = true;
                    return Ok(0);
                }
                return Err(ZipError::Format("incomplete lzma stream"));
            }
            if pending.is_empty() && self.buf_pos == self.buf_len && self.buf_len == 0 {
                return Err(ZipError::EndOfStream);
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let header_seen = match self.direction {
            Direction::Write { ref mut header_seen } => header_seen,
            Direction::Read { .. } => return Err(ZipError::Param("lzma stream opened for read")),
        };
        let mut consumed_total = 0;
        while consumed_total < buf.len() {
            let before_in = self.codec.total_in();
            let before_out = self.codec.total_out();
            self.codec
                .process(&buf[consumed_total..], &mut self.buf, Action::Run)
                .map_err(|_| ZipError::Internal("lzma compression failed"))?;
            consumed_total += (self.codec.total_in() - before_in) as usize;
            let produced = (self.codec.total_out() - before_out) as usize;
            write_stripping_size_field(&mut self.base, &self.buf[..produced], header_seen)?;
        }
        Ok(buf.len())
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(ZipError::Param("lzma stream is not seekable"))
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(match self.direction {
            Direction::Write { .. } => self.codec.total_in(),
            Direction::Read { .. } => self.codec.total_out(),
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.base.flush()
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        match prop {
            StreamProp::TotalIn => Some(self.codec.total_in() as i64),
            StreamProp::TotalOut => Some(self.codec.total_out() as i64),
            _ => self.base.get_prop(prop),
        }
    }

    fn set_prop(&mut self, prop: StreamProp, value: i64) -> Result<()> {
        match (&mut self.direction, prop) {
            (Direction::Read { remaining_in, .. }, StreamProp::TotalInMax) => {
                *remaining_in = value as u64;
                Ok(())
            }
            (Direction::Read { remaining_out, .. }, StreamProp::TotalOutMax) => {
                *remaining_out = value as u64;
                Ok(())
            }
            _ => self.base.set_prop(prop, value),
        }
    }
}
