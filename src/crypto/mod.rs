//! Encryption stream layers.
//!
//! Both ciphers are expressed as [`Stream`](crate::stream::Stream) layers
//! with the key state split out, so the archive can produce or consume the
//! leading header (zipcrypto's 12 encrypted bytes, AES's salt and password
//! verifier) while it still owns the storage stream, then wrap it. The
//! payload is transformed in place as it crosses, and the AES trailer is
//! emitted on finish or verified when the read side drains its budget.

mod aes;
mod zipcrypto;

pub use aes::{AesState, AesStream, FOOTER_SIZE as AES_FOOTER_SIZE, VERIFY_SIZE as AES_VERIFY_SIZE};
pub use zipcrypto::{ZipCryptoKeys, ZipCryptoStream, HEADER_SIZE as ZIPCRYPTO_HEADER_SIZE};

/// AES key length per WinZip strength code.
pub fn aes_key_len(strength: u8) -> Option<usize> {
    match strength {
        1 => Some(16),
        2 => Some(24),
        3 => Some(32),
        _ => None,
    }
}

/// Salt length is half the key length for every WinZip strength.
pub fn aes_salt_len(strength: u8) -> Option<usize> {
    aes_key_len(strength).map(|k| k / 2)
}

/// Total stored framing of an AES entry: salt, verifier and trailer.
pub fn aes_overhead(strength: u8) -> Option<u64> {
    aes_salt_len(strength).map(|s| (s + AES_VERIFY_SIZE + AES_FOOTER_SIZE) as u64)
}
