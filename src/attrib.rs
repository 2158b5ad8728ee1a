//! Cross-system file attribute conversion.
//!
//! External attributes in the central directory are interpreted according
//! to the host system in the upper byte of version-made-by. Conversions are
//! defined between the Windows/MSDOS family and the POSIX/Darwin family;
//! everything else is unsupported.

use crate::error::{Result, ZipError};

/// Host systems, per the upper byte of version-made-by.
pub mod host {
    pub const MSDOS: u8 = 0;
    pub const UNIX: u8 = 3;
    pub const WINDOWS_NTFS: u8 = 10;
    pub const DARWIN: u8 = 19;
}

/// Windows file attribute bits.
pub mod win {
    pub const READONLY: u32 = 0x01;
    pub const DIRECTORY: u32 = 0x10;
    pub const NORMAL: u32 = 0x80;
    pub const REPARSE_POINT: u32 = 0x400;
}

/// POSIX mode bits.
pub mod posix {
    pub const IFMT: u32 = 0o170000;
    pub const IFDIR: u32 = 0o040000;
    pub const IFREG: u32 = 0o100000;
    pub const IFLNK: u32 = 0o120000;
}

fn is_windows_family(system: u8) -> bool {
    system == host::MSDOS || system == host::WINDOWS_NTFS
}

fn is_posix_family(system: u8) -> bool {
    system == host::UNIX || system == host::DARWIN
}

/// Convert `attributes` from `src` host conventions to `dst` host
/// conventions. Same-family conversion is the identity.
pub fn convert_attrib(attributes: u32, src: u8, dst: u8) -> Result<u32> {
    if is_windows_family(src) && is_windows_family(dst) {
        Ok(attributes)
    } else if is_posix_family(src) && is_posix_family(dst) {
        Ok(attributes)
    } else if is_posix_family(src) && is_windows_family(dst) {
        Ok(posix_to_win(attributes))
    } else if is_windows_family(src) && is_posix_family(dst) {
        Ok(win_to_posix(attributes))
    } else {
        Err(ZipError::Unsupported("attribute conversion between hosts"))
    }
}

/// Map a POSIX mode to Windows attribute bits.
pub fn posix_to_win(mode: u32) -> u32 {
    let mut attrib = 0;
    if mode & 0o222 == 0 && mode & 0o444 != 0 {
        attrib |= win::READONLY;
    }
    match mode & posix::IFMT {
        posix::IFDIR => attrib |= win::DIRECTORY,
        posix::IFLNK => attrib |= win::REPARSE_POINT,
        _ => {}
    }
    if attrib == 0 {
        attrib = win::NORMAL;
    }
    attrib
}

/// Map Windows attribute bits to a POSIX mode.
pub fn win_to_posix(attrib: u32) -> u32 {
    let mut mode = 0o444;
    if attrib & win::READONLY == 0 {
        mode |= 0o222;
    }
    if attrib & win::REPARSE_POINT != 0 {
        mode |= posix::IFLNK;
    } else if attrib & win::DIRECTORY != 0 {
        mode |= posix::IFDIR | 0o111;
    } else {
        mode |= posix::IFREG;
    }
    mode
}
