//! WinZip AES encryption layer.
//!
//! AE-1/AE-2 format: per-entry salt and a 2-byte password verifier, an
//! AES-CTR payload (little-endian counter starting at one) and a 10-byte
//! authentication trailer (HMAC-SHA1 over the ciphertext, truncated).
//! Keys are derived with PBKDF2-HMAC-SHA1 at 1000 iterations; the derived
//! material splits into cipher key, authentication key and verifier.
//!
//! Key state and stream are split so the caller can produce or check the
//! salt/verifier header while it still owns the base stream, then wrap it.

use std::io::SeekFrom;

use aes::{Aes128, Aes192, Aes256};
use ctr::{
    cipher::{KeyIvInit, StreamCipher},
    Ctr128LE,
};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;

use crate::crypto::{aes_key_len, aes_salt_len};
use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamProp};

type HmacSha1 = Hmac<Sha1>;

/// PBKDF2 iteration count fixed by the WinZip AE specification.
const KDF_ROUNDS: u32 = 1000;

/// Size of the truncated HMAC trailer.
pub const FOOTER_SIZE: usize = 10;

/// Length of the password-verification value following the salt.
pub const VERIFY_SIZE: usize = 2;

enum AnyCtr {
    Aes128(Ctr128LE<Aes128>),
    Aes192(Ctr128LE<Aes192>),
    Aes256(Ctr128LE<Aes256>),
}

impl AnyCtr {
    fn new(strength: u8, key: &[u8]) -> Self {
        // Counter block: little-endian, starts at one.
        let mut iv = [0u8; 16];
        iv[0] = 1;
        match strength {
            1 => AnyCtr::Aes128(Ctr128LE::<Aes128>::new(key.into(), iv.as_slice().into())),
            2 => AnyCtr::Aes192(Ctr128LE::<Aes192>::new(key.into(), iv.as_slice().into())),
            _ => AnyCtr::Aes256(Ctr128LE::<Aes256>::new(key.into(), iv.as_slice().into())),
        }
    }

    fn apply_keystream(&mut self, data: &mut [u8]) {
        match self {
            AnyCtr::Aes128(c) => c.apply_keystream(data),
            AnyCtr::Aes192(c) => c.apply_keystream(data),
            AnyCtr::Aes256(c) => c.apply_keystream(data),
        }
    }
}

struct DerivedKeys {
    cipher_key: Vec<u8>,
    auth_key: Vec<u8>,
    verify: [u8; VERIFY_SIZE],
}

fn derive_keys(password: &[u8], salt: &[u8], strength: u8) -> Result<DerivedKeys> {
    let key_len = aes_key_len(strength).ok_or(ZipError::Param("invalid AES strength"))?;
    let mut derived = vec![0u8; key_len * 2 + VERIFY_SIZE];
    pbkdf2_hmac::<Sha1>(password, salt, KDF_ROUNDS, &mut derived);
    Ok(DerivedKeys {
        cipher_key: derived[..key_len].to_vec(),
        auth_key: derived[key_len..key_len * 2].to_vec(),
        verify: [derived[key_len * 2], derived[key_len * 2 + 1]],
    })
}

/// Derived cipher and authentication state for one entry.
pub struct AesState {
    cipher: AnyCtr,
    hmac: HmacSha1,
    salt_len: usize,
}

impl AesState {
    /// Writer-side derivation: generates the salt and returns the header
    /// bytes (salt + verifier) the caller must store before the payload.
    pub fn for_writer(password: &[u8], strength: u8) -> Result<(Self, Vec<u8>)> {
        let salt_len = aes_salt_len(strength).ok_or(ZipError::Param("invalid AES strength"))?;
        let mut salt = vec![0u8; salt_len];
        getrandom::getrandom(&mut salt).map_err(|_| ZipError::Internal("salt generation failed"))?;

        let keys = derive_keys(password, &salt, strength)?;
        let hmac = HmacSha1::new_from_slice(&keys.auth_key)
            .map_err(|_| ZipError::Internal("HMAC init failed"))?;

        let mut header = salt;
        header.extend_from_slice(&keys.verify);
        Ok((
            Self {
                cipher: AnyCtr::new(strength, &keys.cipher_key),
                hmac,
                salt_len,
            },
            header,
        ))
    }

    /// Reader-side derivation from the stored salt; checks the verifier.
    pub fn for_reader(
        password: &[u8],
        strength: u8,
        salt: &[u8],
        verify: [u8; VERIFY_SIZE],
    ) -> Result<Self> {
        let salt_len = aes_salt_len(strength).ok_or(ZipError::Param("invalid AES strength"))?;
        if salt.len() != salt_len {
            return Err(ZipError::Param("salt length does not match strength"));
        }
        let keys = derive_keys(password, salt, strength)?;
        if verify != keys.verify {
            return Err(ZipError::IncorrectPassword);
        }
        let hmac = HmacSha1::new_from_slice(&keys.auth_key)
            .map_err(|_| ZipError::Internal("HMAC init failed"))?;
        Ok(Self {
            cipher: AnyCtr::new(strength, &keys.cipher_key),
            hmac,
            salt_len,
        })
    }
}

/// WinZip AES cipher stream.
pub struct AesStream<S: Stream> {
    base: S,
    cipher: AnyCtr,
    hmac: HmacSha1,
    salt_len: usize,
    /// Read side: payload ciphertext bytes still to deliver.
    remaining: u64,
    footer_verified: bool,
    writing: bool,
    total_in: u64,
    total_out: u64,
}

impl<S: Stream> AesStream<S> {
    /// Encrypting layer; the caller has already written the header bytes
    /// from [`AesState::for_writer`].
    pub fn writer(base: S, state: AesState) -> Self {
        Self {
            base,
            cipher: state.cipher,
            hmac: state.hmac,
            salt_len: state.salt_len,
            remaining: 0,
            footer_verified: false,
            writing: true,
            total_in: 0,
            total_out: 0,
        }
    }

    /// Decrypting layer over `data_len` ciphertext bytes (the stored
    /// payload minus header and trailer); the caller has already consumed
    /// the header into [`AesState::for_reader`].
    pub fn reader(base: S, state: AesState, data_len: u64) -> Self {
        Self {
            base,
            cipher: state.cipher,
            hmac: state.hmac,
            salt_len: state.salt_len,
            remaining: data_len,
            footer_verified: false,
            writing: false,
            total_in: 0,
            total_out: 0,
        }
    }

    /// Emit the authentication trailer and return the base stream.
    pub fn finish_writer(mut self) -> Result<S> {
        let mac = self.hmac.finalize().into_bytes();
        self.base.write_all(&mac[..FOOTER_SIZE])?;
        self.base.flush()?;
        Ok(self.base)
    }

    /// Return the base stream, verifying the trailer when the payload was
    /// fully drained and the inline check has not already run.
    pub fn finish_reader(mut self, fully_consumed: bool) -> Result<S> {
        if fully_consumed && !self.footer_verified {
            self.verify_footer()?;
        }
        Ok(self.base)
    }

    /// Abandon the layer, returning the base stream untouched.
    pub fn into_inner(self) -> S {
        self.base
    }

    /// True once the trailer was read and matched.
    pub fn authenticated(&self) -> bool {
        self.footer_verified
    }

    fn verify_footer(&mut self) -> Result<()> {
        let mut footer = [0u8; FOOTER_SIZE];
        self.base.read_exact(&mut footer)?;
        let expected = self.hmac.clone().finalize().into_bytes();
        if footer != expected[..FOOTER_SIZE] {
            return Err(ZipError::AuthFailed);
        }
        self.footer_verified = true;
        Ok(())
    }
}

impl<S: Stream> Stream for AesStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.writing {
            return Err(ZipError::Param("cipher stream opened for write"));
        }
        let want = (buf.len() as u64).min(self.remaining) as usize;
        if want == 0 {
            if self.remaining == 0 && !self.footer_verified {
                self.verify_footer()?;
            }
            return Ok(0);
        }
        let n = self.base.read(&mut buf[..want])?;
        if n == 0 {
            return Err(ZipError::EndOfStream);
        }
        // Authenticate the ciphertext, then decrypt in place.
        self.hmac.update(&buf[..n]);
        self.cipher.apply_keystream(&mut buf[..n]);
        self.remaining -= n as u64;
        self.total_in += n as u64;
        self.total_out += n as u64;
        if self.remaining == 0 {
            self.verify_footer()?;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.writing {
            return Err(ZipError::Param("cipher stream opened for read"));
        }
        let mut scratch = [0u8; 4096];
        let mut written = 0;
        while written < buf.len() {
            let chunk = (buf.len() - written).min(scratch.len());
            scratch[..chunk].copy_from_slice(&buf[written..written + chunk]);
            self.cipher.apply_keystream(&mut scratch[..chunk]);
            self.hmac.update(&scratch[..chunk]);
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
            StreamProp::HeaderSize => Some((self.salt_len + VERIFY_SIZE) as i64),
            StreamProp::FooterSize => Some(FOOTER_SIZE as i64),
            _ => self.base.get_prop(prop),
        }
    }
}
