//! Traditional PKZIP cipher layer.
//!
//! The cipher is a rolling three-key schedule driven by a CRC-32 step; the
//! 12-byte encrypted header ends with a two-byte password verifier, of
//! which the final byte is checked on read.
//!
//! Key state and stream are split so the caller can produce or check the
//! header while it still owns the base stream, then wrap it.

use std::io::SeekFrom;

use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamProp};

/// Size of the encrypted header preceding the payload.
pub const HEADER_SIZE: usize = 12;

static CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 {
                0xedb88320 ^ (c >> 1)
            } else {
                c >> 1
            };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

fn crc32_byte(crc: u32, byte: u8) -> u32 {
    CRC_TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8)
}

/// Cipher key schedule, initialised from the password.
pub struct ZipCryptoKeys {
    keys: [u32; 3],
}

impl ZipCryptoKeys {
    pub fn new(password: &[u8]) -> Self {
        let mut keys = Self {
            keys: [0x12345678, 0x23456789, 0x34567890],
        };
        for &byte in password {
            keys.update(byte);
        }
        keys
    }

    /// Build the encrypted 12-byte header carrying `verifier` in its last
    /// two bytes, advancing the key schedule past it.
    pub fn make_header(&mut self, verifier: u16) -> Result<[u8; HEADER_SIZE]> {
        let mut header = [0u8; HEADER_SIZE];
        getrandom::getrandom(&mut header[..HEADER_SIZE - 2])
            .map_err(|_| ZipError::Internal("random header generation failed"))?;
        header[HEADER_SIZE - 2] = verifier as u8;
        header[HEADER_SIZE - 1] = (verifier >> 8) as u8;
        for byte in header.iter_mut() {
            *byte = self.encrypt_byte(*byte);
        }
        Ok(header)
    }

    /// Decrypt a stored header and check the verifier's high byte (the
    /// only byte the format guarantees).
    pub fn check_header(&mut self, mut header: [u8; HEADER_SIZE], verifier: u16) -> Result<()> {
        for byte in header.iter_mut() {
            *byte = self.decrypt_byte(*byte);
        }
        if header[HEADER_SIZE - 1] != (verifier >> 8) as u8 {
            return Err(ZipError::IncorrectPassword);
        }
        Ok(())
    }

    fn update(&mut self, byte: u8) {
        self.keys[0] = crc32_byte(self.keys[0], byte);
        self.keys[1] = self.keys[1]
            .wrapping_add(self.keys[0] & 0xff)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        self.keys[2] = crc32_byte(self.keys[2], (self.keys[1] >> 24) as u8);
    }

    fn keystream_byte(&self) -> u8 {
        let temp = (self.keys[2] | 2) & 0xffff;
        ((temp.wrapping_mul(temp ^ 1)) >> 8) as u8
    }

    fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.keystream_byte();
        self.update(plain);
        cipher
    }

    fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.keystream_byte();
        self.update(plain);
        plain
    }
}

/// Traditional PKZIP cipher stream. The header has already been produced
/// or consumed through [`ZipCryptoKeys`].
pub struct ZipCryptoStream<S: Stream> {
    base: S,
    keys: ZipCryptoKeys,
    total_in: u64,
    total_out: u64,
}

impl<S: Stream> ZipCryptoStream<S> {
    pub fn new(base: S, keys: ZipCryptoKeys) -> Self {
        Self {
            base,
            keys,
            total_in: 0,
            total_out: 0,
        }
    }

    pub fn finish(self) -> Result<S> {
        Ok(self.base)
    }

    pub fn into_inner(self) -> S {
        self.base
    }
}

impl<S: Stream> Stream for ZipCryptoStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.base.read(buf)?;
        for byte in buf[..n].iter_mut() {
            *byte = self.keys.decrypt_byte(*byte);
        }
        self.total_in += n as u64;
        self.total_out += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut scratch = [0u8; 4096];
        let mut written = 0;
        while written < buf.len() {
            let chunk = (buf.len() - written).min(scratch.len());
            for (dst, &src) in scratch[..chunk].iter_mut().zip(&buf[written..written + chunk]) {
                *dst = self.keys.encrypt_byte(src);
            }
            self.base.write_all(&scratch[..chunk])?;
            written += chunk;
        }
        self.total_in += buf.len() as u64;
        self.total_out += buf.len() as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(ZipError::Param("cipher stream is not seekable"))
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
            StreamProp::HeaderSize => Some(HEADER_SIZE as i64),
            StreamProp::FooterSize => Some(0),
            _ => self.base.get_prop(prop),
        }
    }
}
