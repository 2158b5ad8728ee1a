//! Entry records and the local/central header codec.
//!
//! One routine reads either header flavour, parameterised by `local`; the
//! central form carries seven trailing fields the local form lacks. The
//! open-ended extra-field area is a sequence of `(type, length, payload)`
//! records; ZIP64, NTFS, UNIX1 and AES subfields are interpreted, everything
//! else is preserved as opaque bytes.

use tracing::trace;

use crate::attrib::{self, host, win};
use crate::dostime;
use crate::error::{Result, ZipError};
use crate::stream::Stream;

/// Local file header signature ("PK\x03\x04")
pub const LOCAL_HEADER_SIGNATURE: u32 = 0x04034b50;
/// Central directory file header signature ("PK\x01\x02")
pub const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014b50;
/// Data descriptor signature ("PK\x07\x08")
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

/// Fixed size of a local header, before the variable fields.
pub const LOCAL_HEADER_SIZE: u64 = 30;
/// Fixed size of a central header, before the variable fields.
pub const CENTRAL_HEADER_SIZE: u64 = 46;

/// Compression methods carried in entry headers.
pub mod method {
    pub const STORE: u16 = 0;
    pub const DEFLATE: u16 = 8;
    pub const BZIP2: u16 = 12;
    pub const LZMA: u16 = 14;
    /// Stand-in method for WinZip AES entries; the actual method lives in
    /// the AES extra field.
    pub const AES: u16 = 99;
}

/// General-purpose bit flags.
pub mod flag {
    pub const ENCRYPTED: u16 = 0x0001;
    pub const DEFLATE_MAX: u16 = 0x0002;
    pub const DEFLATE_FAST: u16 = 0x0004;
    pub const DEFLATE_SUPER_FAST: u16 = 0x0006;
    /// Same bit as `DEFLATE_MAX`, interpreted for LZMA entries.
    pub const LZMA_EOS_MARKER: u16 = 0x0002;
    pub const DATA_DESCRIPTOR: u16 = 0x0008;
    pub const UTF8: u16 = 0x0800;
}

/// Extra-field type tags.
pub mod extension {
    pub const ZIP64: u16 = 0x0001;
    pub const NTFS: u16 = 0x000a;
    pub const UNIX1: u16 = 0x000d;
    pub const AES: u16 = 0x9901;
}

/// Sentinel marking a classic 32-bit field as resolved by ZIP64.
const SENTINEL32: u32 = 0xffffffff;
const SENTINEL16: u16 = 0xffff;

/// Default version-made-by: UNIX host, specification version 4.5.
pub const DEFAULT_VERSION_MADEBY: u16 = ((host::UNIX as u16) << 8) | 45;

/// ZIP64 handling for emitted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zip64Policy {
    /// Emit the subfield when a field overflows its classic width.
    #[default]
    Auto,
    /// Always emit sentinels and the subfield.
    Force,
    /// Never emit; overflowing values are an error.
    Disable,
}

/// Per-entry metadata, as stored in local and central headers.
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    pub version_madeby: u16,
    pub version_needed: u16,
    pub flag: u16,
    pub compression_method: u16,
    /// POSIX seconds; 0 when absent.
    pub modified_date: i64,
    pub accessed_date: i64,
    pub creation_date: i64,
    pub crc: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub disk_number: u32,
    pub internal_fa: u16,
    pub external_fa: u32,
    /// Offset of the local header, relative to disk 0.
    pub disk_offset: u64,
    pub filename: String,
    pub extrafield: Vec<u8>,
    pub comment: String,
    /// WinZip AES version (1 or 2); 0 when not AES-encrypted.
    pub aes_version: u16,
    /// WinZip AES strength code (1, 2 or 3); 0 when not AES-encrypted.
    pub aes_strength: u8,
    pub zip64: Zip64Policy,
}

impl FileInfo {
    /// Host system the external attributes belong to.
    pub fn host_system(&self) -> u8 {
        (self.version_madeby >> 8) as u8
    }

    /// External attributes in the host's native position: POSIX modes
    /// occupy the upper half of the field.
    fn native_attributes(&self) -> u32 {
        match self.host_system() {
            host::UNIX | host::DARWIN => self.external_fa >> 16,
            _ => self.external_fa,
        }
    }

    /// External attributes converted to MSDOS conventions, when the host
    /// pair supports it.
    pub fn dos_attributes(&self) -> Option<u32> {
        attrib::convert_attrib(self.native_attributes(), self.host_system(), host::MSDOS).ok()
    }

    /// True when the entry describes a directory: either the attributes
    /// say so (after cross-system conversion) or the name carries a
    /// trailing separator.
    pub fn is_dir(&self) -> bool {
        if self.filename.ends_with('/') || self.filename.ends_with('\\') {
            return true;
        }
        matches!(self.dos_attributes(), Some(attrs) if attrs & win::DIRECTORY != 0)
    }

    /// True when the entry payload is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.flag & flag::ENCRYPTED != 0
    }
}

/// Iterator over `(type, payload)` pairs of an extra-field area. Records
/// whose declared length overruns the buffer terminate the walk.
pub struct ExtraFieldIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ExtraFieldIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for ExtraFieldIter<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + 4 > self.data.len() {
            return None;
        }
        let id = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        let len = u16::from_le_bytes([self.data[self.pos + 2], self.data[self.pos + 3]]) as usize;
        self.pos += 4;
        if self.pos + len > self.data.len() {
            self.pos = self.data.len();
            return None;
        }
        let payload = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some((id, payload))
    }
}

fn read_u16_at(data: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([data[pos], data[pos + 1]])
}

fn read_u32_at(data: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn read_u64_at(data: &[u8], pos: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[pos..pos + 8]);
    u64::from_le_bytes(buf)
}

/// Classic-width header fields whose sentinel values defer to ZIP64.
struct RawFields {
    uncompressed_size: u32,
    compressed_size: u32,
    disk_offset: u32,
    disk_number: u16,
}

/// Interpret the recognised extra-field subfields, in source order.
fn apply_extra_fields(info: &mut FileInfo, raw: &RawFields) -> Result<()> {
    let extrafield = std::mem::take(&mut info.extrafield);
    let mut seen_zip64 = false;

    for (id, data) in ExtraFieldIter::new(&extrafield) {
        match id {
            extension::ZIP64 => {
                // Only the sentinel-valued fields appear, in fixed order.
                let mut pos = 0;
                if raw.uncompressed_size == SENTINEL32 {
                    if pos + 8 > data.len() {
                        return Err(ZipError::Format("truncated zip64 extra field"));
                    }
                    info.uncompressed_size = read_u64_at(data, pos);
                    pos += 8;
                }
                if raw.compressed_size == SENTINEL32 {
                    if pos + 8 > data.len() {
                        return Err(ZipError::Format("truncated zip64 extra field"));
                    }
                    info.compressed_size = read_u64_at(data, pos);
                    pos += 8;
                }
                if raw.disk_offset == SENTINEL32 {
                    if pos + 8 > data.len() {
                        return Err(ZipError::Format("truncated zip64 extra field"));
                    }
                    info.disk_offset = read_u64_at(data, pos);
                    pos += 8;
                }
                if raw.disk_number == SENTINEL16 {
                    if pos + 4 > data.len() {
                        return Err(ZipError::Format("truncated zip64 extra field"));
                    }
                    info.disk_number = read_u32_at(data, pos);
                }
                seen_zip64 = true;
            }
            extension::NTFS => {
                // 4 reserved bytes, then nested (attr_id, attr_size) pairs.
                let mut pos = 4;
                while pos + 4 <= data.len() {
                    let attr_id = read_u16_at(data, pos);
                    let attr_size = read_u16_at(data, pos + 2) as usize;
                    pos += 4;
                    if pos + attr_size > data.len() {
                        break;
                    }
                    if attr_id == 0x01 && attr_size == 24 {
                        info.modified_date = dostime::ntfs_to_unix(read_u64_at(data, pos));
                        info.accessed_date = dostime::ntfs_to_unix(read_u64_at(data, pos + 8));
                        info.creation_date = dostime::ntfs_to_unix(read_u64_at(data, pos + 16));
                    }
                    pos += attr_size;
                }
            }
            extension::UNIX1 => {
                if data.len() >= 8 {
                    let atime = read_u32_at(data, 0);
                    let mtime = read_u32_at(data, 4);
                    if info.accessed_date == 0 {
                        info.accessed_date = atime as i64;
                    }
                    if info.modified_date == 0 {
                        info.modified_date = mtime as i64;
                    }
                }
                // UID/GID and any trailing bytes are ignored; the iterator
                // already accounts for the full declared size.
            }
            extension::AES => {
                if data.len() < 7 {
                    return Err(ZipError::Format("truncated AES extra field"));
                }
                if data[2] != b'A' || data[3] != b'E' {
                    return Err(ZipError::Format("invalid AES extra field marker"));
                }
                info.aes_version = read_u16_at(data, 0);
                info.aes_strength = data[4];
                // The outer record carries the AES stand-in method; the
                // real one lives here.
                info.compression_method = read_u16_at(data, 5);
            }
            _ => {}
        }
    }

    info.extrafield = extrafield;

    // A size of exactly 0xffffffff is stored literally and looks like the
    // sentinel, so sizes stand as read when no subfield resolves them. An
    // offset or disk number left at the sentinel is unusable.
    let unresolved =
        (raw.disk_offset == SENTINEL32 || raw.disk_number == SENTINEL16) && !seen_zip64;
    if unresolved {
        return Err(ZipError::Format("zip64 sentinel without zip64 extra field"));
    }
    Ok(())
}

/// Read a local or central header at the current stream position.
///
/// Returns the parsed record and the number of bytes the record occupies.
/// While scanning central records, hitting either end-of-central-directory
/// signature terminates iteration with [`ZipError::EndOfList`].
pub(crate) fn read_header(stream: &mut dyn Stream, local: bool) -> Result<(FileInfo, u64)> {
    let signature = stream.read_u32()?;
    if local {
        if signature != LOCAL_HEADER_SIGNATURE {
            return Err(ZipError::Format("bad local header signature"));
        }
    } else {
        if signature == crate::eocd::EOCD_SIGNATURE || signature == crate::eocd::ZIP64_EOCD_SIGNATURE
        {
            return Err(ZipError::EndOfList);
        }
        if signature != CENTRAL_HEADER_SIGNATURE {
            return Err(ZipError::Format("bad central header signature"));
        }
    }

    let mut info = FileInfo::default();
    if !local {
        info.version_madeby = stream.read_u16()?;
    }
    info.version_needed = stream.read_u16()?;
    info.flag = stream.read_u16()?;
    info.compression_method = stream.read_u16()?;
    let dos_date = stream.read_u32()?;
    info.modified_date = dostime::dos_to_unix(dos_date).unwrap_or(0);
    info.crc = stream.read_u32()?;

    let raw_compressed = stream.read_u32()?;
    let raw_uncompressed = stream.read_u32()?;
    let filename_size = stream.read_u16()? as usize;
    let extrafield_size = stream.read_u16()? as usize;

    let mut comment_size = 0usize;
    let mut raw_offset = 0u32;
    let mut raw_disk = 0u16;
    if !local {
        comment_size = stream.read_u16()? as usize;
        raw_disk = stream.read_u16()?;
        info.internal_fa = stream.read_u16()?;
        info.external_fa = stream.read_u32()?;
        raw_offset = stream.read_u32()?;
    }

    info.compressed_size = raw_compressed as u64;
    info.uncompressed_size = raw_uncompressed as u64;
    info.disk_offset = raw_offset as u64;
    info.disk_number = raw_disk as u32;

    let mut filename = vec![0u8; filename_size];
    stream.read_exact(&mut filename)?;
    info.filename = String::from_utf8_lossy(&filename).into_owned();

    let mut extrafield = vec![0u8; extrafield_size];
    stream.read_exact(&mut extrafield)?;
    info.extrafield = extrafield;

    if comment_size > 0 {
        let mut comment = vec![0u8; comment_size];
        stream.read_exact(&mut comment)?;
        info.comment = String::from_utf8_lossy(&comment).into_owned();
    }

    let raw_fields_uncompressed_size = if local && info.flag & flag::DATA_DESCRIPTOR != 0 {
        // Descriptor-streamed local headers legitimately carry
        // zero or sentinel sizes; don't demand ZIP64 resolution.
        if raw_uncompressed == SENTINEL32 && has_zip64_field(&info.extrafield) {
            SENTINEL32
        } else {
            0
        }
    } else {
        raw_uncompressed
    };
    let raw_fields_compressed_size = if local && info.flag & flag::DATA_DESCRIPTOR != 0 {
        if raw_compressed == SENTINEL32 && has_zip64_field(&info.extrafield) {
            SENTINEL32
        } else {
            0
        }
    } else {
        raw_compressed
    };

    apply_extra_fields(
        &mut info,
        &RawFields {
            uncompressed_size: raw_fields_uncompressed_size,
            compressed_size: raw_fields_compressed_size,
            disk_offset: raw_offset,
            disk_number: raw_disk,
        },
    )?;

    trace!(
        name = %info.filename,
        method = info.compression_method,
        compressed = info.compressed_size,
        uncompressed = info.uncompressed_size,
        "scanned {} header",
        if local { "local" } else { "central" }
    );

    let fixed = if local {
        LOCAL_HEADER_SIZE
    } else {
        CENTRAL_HEADER_SIZE
    };
    let record_size = fixed + filename_size as u64 + extrafield_size as u64 + comment_size as u64;
    Ok((info, record_size))
}

fn has_zip64_field(extrafield: &[u8]) -> bool {
    ExtraFieldIter::new(extrafield).any(|(id, _)| id == extension::ZIP64)
}

/// Compute the version needed to extract, unless the caller overrode it.
fn version_needed(info: &FileInfo, zip64: bool) -> u16 {
    if info.version_needed != 0 {
        return info.version_needed;
    }
    let mut needed = 20;
    if zip64 {
        needed = needed.max(45);
    }
    if info.aes_version != 0 {
        needed = needed.max(51);
    }
    if info.compression_method == method::LZMA {
        needed = needed.max(63);
    }
    needed
}

/// Write a local or central header for `info` at the current position.
pub(crate) fn write_header(stream: &mut dyn Stream, info: &FileInfo, local: bool) -> Result<()> {
    let force = info.zip64 == Zip64Policy::Force;
    let disable = info.zip64 == Zip64Policy::Disable;

    let need_uncompressed = info.uncompressed_size > u32::MAX as u64 || force;
    let need_compressed = info.compressed_size > u32::MAX as u64 || force;
    let need_offset = !local && (info.disk_offset > u32::MAX as u64 || force);
    let need_disk = !local && info.disk_number > u16::MAX as u32;
    let zip64 = !disable && (need_uncompressed || need_compressed || need_offset || need_disk);
    if disable && (need_uncompressed || need_compressed || need_offset || need_disk) {
        return Err(ZipError::Param("entry requires zip64 but it is disabled"));
    }

    // Directory entries carry a trailing separator in their stored name.
    let is_dir = matches!(info.dos_attributes(), Some(attrs) if attrs & win::DIRECTORY != 0);
    let mut filename = info.filename.clone();
    if is_dir && !filename.ends_with('/') && !filename.ends_with('\\') {
        filename.push('/');
    }

    let extrafield = build_extrafield(info, local, zip64, need_uncompressed, need_compressed, need_offset, need_disk);

    if filename.len() > u16::MAX as usize
        || extrafield.len() > u16::MAX as usize
        || info.comment.len() > u16::MAX as usize
    {
        return Err(ZipError::Param("variable header field too long"));
    }

    stream.write_u32(if local {
        LOCAL_HEADER_SIGNATURE
    } else {
        CENTRAL_HEADER_SIGNATURE
    })?;
    if !local {
        stream.write_u16(info.version_madeby)?;
    }
    stream.write_u16(version_needed(info, zip64))?;
    stream.write_u16(info.flag)?;
    stream.write_u16(if info.aes_version != 0 {
        method::AES
    } else {
        info.compression_method
    })?;
    stream.write_u32(dostime::unix_to_dos(info.modified_date))?;
    stream.write_u32(info.crc)?;
    stream.write_u32(if need_compressed && zip64 {
        SENTINEL32
    } else {
        info.compressed_size as u32
    })?;
    stream.write_u32(if need_uncompressed && zip64 {
        SENTINEL32
    } else {
        info.uncompressed_size as u32
    })?;
    stream.write_u16(filename.len() as u16)?;
    stream.write_u16(extrafield.len() as u16)?;
    if !local {
        stream.write_u16(info.comment.len() as u16)?;
        stream.write_u16(if need_disk {
            SENTINEL16
        } else {
            info.disk_number as u16
        })?;
        stream.write_u16(info.internal_fa)?;
        stream.write_u32(info.external_fa)?;
        stream.write_u32(if need_offset && zip64 {
            SENTINEL32
        } else {
            info.disk_offset as u32
        })?;
    }
    stream.write_all(filename.as_bytes())?;
    stream.write_all(&extrafield)?;
    if !local {
        stream.write_all(info.comment.as_bytes())?;
    }
    Ok(())
}

fn build_extrafield(
    info: &FileInfo,
    local: bool,
    zip64: bool,
    need_uncompressed: bool,
    need_compressed: bool,
    need_offset: bool,
    need_disk: bool,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(info.extrafield.len() + 64);

    // Caller-supplied subfields, minus the ones this emitter owns.
    let mut caller_aes = false;
    for (id, data) in ExtraFieldIter::new(&info.extrafield) {
        match id {
            extension::ZIP64 | extension::NTFS => {}
            extension::AES => {
                caller_aes = true;
                out.extend_from_slice(&id.to_le_bytes());
                out.extend_from_slice(&(data.len() as u16).to_le_bytes());
                out.extend_from_slice(data);
            }
            _ => {
                out.extend_from_slice(&id.to_le_bytes());
                out.extend_from_slice(&(data.len() as u16).to_le_bytes());
                out.extend_from_slice(data);
            }
        }
    }

    if zip64 {
        let mut payload = Vec::with_capacity(28);
        if need_uncompressed {
            payload.extend_from_slice(&info.uncompressed_size.to_le_bytes());
        }
        if need_compressed {
            payload.extend_from_slice(&info.compressed_size.to_le_bytes());
        }
        if !local && need_offset {
            payload.extend_from_slice(&info.disk_offset.to_le_bytes());
        }
        if !local && need_disk {
            payload.extend_from_slice(&info.disk_number.to_le_bytes());
        }
        out.extend_from_slice(&extension::ZIP64.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&payload);
    }

    if info.modified_date != 0 && info.accessed_date != 0 && info.creation_date != 0 {
        out.extend_from_slice(&extension::NTFS.to_le_bytes());
        out.extend_from_slice(&32u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // reserved
        out.extend_from_slice(&0x01u16.to_le_bytes());
        out.extend_from_slice(&24u16.to_le_bytes());
        out.extend_from_slice(&dostime::unix_to_ntfs(info.modified_date).to_le_bytes());
        out.extend_from_slice(&dostime::unix_to_ntfs(info.accessed_date).to_le_bytes());
        out.extend_from_slice(&dostime::unix_to_ntfs(info.creation_date).to_le_bytes());
    }

    if info.aes_version != 0 && !caller_aes {
        out.extend_from_slice(&extension::AES.to_le_bytes());
        out.extend_from_slice(&7u16.to_le_bytes());
        out.extend_from_slice(&info.aes_version.to_le_bytes());
        out.push(b'A');
        out.push(b'E');
        out.push(info.aes_strength);
        out.extend_from_slice(&info.compression_method.to_le_bytes());
    }

    out
}
