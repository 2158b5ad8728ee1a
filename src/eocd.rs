//! End-of-central-directory discovery and emission.
//!
//! Reading starts from the archive tail: the classic EOCD record is located
//! by a backward scan over the last 64 KiB (plus record size), the ZIP64
//! locator and record supersede it when the classic fields carry sentinels,
//! and a signature probe compensates for producers whose stored
//! central-directory offset is off by a constant (typically archives that
//! gained a self-extractor stub after creation).

use tracing::{trace, warn};

use crate::entry::CENTRAL_HEADER_SIGNATURE;
use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamProp};
use std::io::SeekFrom;

/// Classic EOCD signature ("PK\x05\x06")
pub const EOCD_SIGNATURE: u32 = 0x06054b50;
/// ZIP64 EOCD record signature ("PK\x06\x06")
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x06064b50;
/// ZIP64 EOCD locator signature ("PK\x06\x07")
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x07064b50;

/// Classic EOCD record size, without the comment.
pub const EOCD_SIZE: u64 = 22;
/// ZIP64 EOCD locator size.
pub const ZIP64_LOCATOR_SIZE: u64 = 20;

/// Maximum tail span that can hold the EOCD: a 65535-byte comment plus the
/// record itself.
const MAX_TAIL: u64 = 65535 + EOCD_SIZE;

const SENTINEL16: u16 = 0xffff;
const SENTINEL32: u32 = 0xffffffff;

/// Resolved central-directory extents.
#[derive(Debug, Default)]
pub(crate) struct CentralDir {
    /// Stored offset of the central directory (uncorrected).
    pub offset: u64,
    pub size: u64,
    pub entries: u64,
    pub disk_with_cd: u32,
    /// Correction added to every stored offset before seeking.
    pub offset_shift: u64,
    pub version_madeby: u16,
    pub comment: String,
    pub eocd_pos: u64,
}

/// Locate and parse the EOCD chain of `stream`.
pub(crate) fn discover(stream: &mut dyn Stream) -> Result<CentralDir> {
    let file_size = stream.seek(SeekFrom::End(0))?;
    if file_size < EOCD_SIZE {
        return Err(ZipError::Format("archive smaller than an EOCD record"));
    }

    let tail_len = file_size.min(MAX_TAIL);
    let tail_start = file_size - tail_len;
    stream.seek(SeekFrom::Start(tail_start))?;
    let mut tail = vec![0u8; tail_len as usize];
    stream.read_exact(&mut tail)?;

    let signature = EOCD_SIGNATURE.to_le_bytes();
    let mut eocd_pos = None;
    for i in (0..=(tail.len() - EOCD_SIZE as usize)).rev() {
        if tail[i..i + 4] == signature {
            eocd_pos = Some(tail_start + i as u64);
            break;
        }
    }
    let eocd_pos = eocd_pos.ok_or(ZipError::Format("end of central directory not found"))?;
    trace!(eocd_pos, "found end of central directory");

    stream.seek(SeekFrom::Start(eocd_pos + 4))?;
    let _disk_number = stream.read_u16()?;
    let disk_with_cd = stream.read_u16()?;
    let _disk_entries = stream.read_u16()?;
    let total_entries = stream.read_u16()?;
    let cd_size32 = stream.read_u32()?;
    let cd_offset32 = stream.read_u32()?;
    let comment_len = stream.read_u16()? as usize;

    let mut comment = String::new();
    if comment_len > 0 {
        let available = (file_size - (eocd_pos + EOCD_SIZE)) as usize;
        let mut bytes = vec![0u8; comment_len.min(available)];
        stream.read_exact(&mut bytes)?;
        comment = String::from_utf8_lossy(&bytes).into_owned();
    }

    let mut dir = CentralDir {
        offset: cd_offset32 as u64,
        size: cd_size32 as u64,
        entries: total_entries as u64,
        disk_with_cd: disk_with_cd as u32,
        comment,
        eocd_pos,
        ..CentralDir::default()
    };

    // End of the central directory, used as both the sanity bound and the
    // origin for offset compensation.
    let mut cd_end = eocd_pos;

    let zip64_hint =
        total_entries == SENTINEL16 || cd_size32 == SENTINEL32 || cd_offset32 == SENTINEL32;
    if zip64_hint {
        match read_zip64_locator(stream, eocd_pos)? {
            Some(zip64_eocd_pos) => {
                stream.seek(SeekFrom::Start(zip64_eocd_pos))?;
                if stream.read_u32()? != ZIP64_EOCD_SIGNATURE {
                    return Err(ZipError::Format("zip64 end of central directory missing"));
                }
                let _record_size = stream.read_u64()?;
                dir.version_madeby = stream.read_u16()?;
                let _version_needed = stream.read_u16()?;
                let _disk_number = stream.read_u32()?;
                dir.disk_with_cd = stream.read_u32()?;
                let _disk_entries = stream.read_u64()?;
                dir.entries = stream.read_u64()?;
                dir.size = stream.read_u64()?;
                dir.offset = stream.read_u64()?;

                if total_entries != SENTINEL16 && total_entries as u64 != dir.entries {
                    return Err(ZipError::Format(
                        "entry counts disagree between classic and zip64 records",
                    ));
                }
                cd_end = zip64_eocd_pos;
                trace!(entries = dir.entries, offset = dir.offset, "zip64 upgrade");
            }
            None => {
                // An entry count of exactly 0xffff is stored literally and
                // looks like the sentinel; without a locator the classic
                // values stand, provided they are actually resolvable.
                if cd_size32 == SENTINEL32 || cd_offset32 == SENTINEL32 {
                    return Err(ZipError::Format("zip64 sentinels without a zip64 record"));
                }
            }
        }
    }

    if cd_end < dir.offset.saturating_add(dir.size) {
        return Err(ZipError::Format("central directory extends past its footer"));
    }

    // Producer-bug compensation: probe the stored offset; when the
    // signature is not there but the directory sits flush against its
    // footer, adopt the shifted position.
    if dir.entries > 0 && dir.size >= 4 {
        stream.seek(SeekFrom::Start(dir.offset))?;
        let probe = stream.read_u32().unwrap_or(0);
        if probe != CENTRAL_HEADER_SIGNATURE {
            let candidate = cd_end - dir.size;
            stream.seek(SeekFrom::Start(candidate))?;
            if stream.read_u32()? == CENTRAL_HEADER_SIGNATURE {
                dir.offset_shift = candidate - dir.offset;
                warn!(
                    stored = dir.offset,
                    actual = candidate,
                    shift = dir.offset_shift,
                    "central directory offset corrected"
                );
            } else {
                return Err(ZipError::Format("central directory not found"));
            }
        }
    }

    Ok(dir)
}

/// Read the ZIP64 EOCD locator expected immediately before the classic
/// record, returning the ZIP64 EOCD position it points at, or `None` when
/// no locator is present.
fn read_zip64_locator(stream: &mut dyn Stream, eocd_pos: u64) -> Result<Option<u64>> {
    if eocd_pos < ZIP64_LOCATOR_SIZE {
        return Ok(None);
    }
    stream.seek(SeekFrom::Start(eocd_pos - ZIP64_LOCATOR_SIZE))?;
    if stream.read_u32()? != ZIP64_LOCATOR_SIGNATURE {
        return Ok(None);
    }
    let _locator_disk = stream.read_u32()?;
    let zip64_eocd_pos = stream.read_u64()?;
    let _total_disks = stream.read_u32()?;
    Ok(Some(zip64_eocd_pos))
}

/// Parameters for footer emission.
pub(crate) struct EmitParams<'a> {
    pub cd_offset: u64,
    pub cd_size: u64,
    pub entries: u64,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub version_madeby: u16,
    pub comment: &'a str,
}

/// Emit the EOCD chain: the ZIP64 record and locator when the archive
/// needs them, then the classic record (always) and the comment.
pub(crate) fn emit(stream: &mut dyn Stream, params: &EmitParams<'_>) -> Result<()> {
    if params.comment.len() > u16::MAX as usize {
        return Err(ZipError::Param("archive comment too long"));
    }

    let zip64 = params.cd_offset >= 1u64 << 32 || params.entries >= 1u64 << 16;
    if zip64 {
        let zip64_eocd_pos = stream.tell()?;
        stream.write_u32(ZIP64_EOCD_SIGNATURE)?;
        stream.write_u64(44)?; // record size, excluding signature and itself
        stream.write_u16(params.version_madeby)?;
        stream.write_u16(45)?; // version needed
        stream.write_u32(params.disk_number)?;
        stream.write_u32(params.disk_with_cd)?;
        stream.write_u64(params.entries)?;
        stream.write_u64(params.entries)?;
        stream.write_u64(params.cd_size)?;
        stream.write_u64(params.cd_offset)?;

        stream.write_u32(ZIP64_LOCATOR_SIGNATURE)?;
        stream.write_u32(params.disk_with_cd)?;
        stream.write_u64(zip64_eocd_pos)?;
        stream.write_u32(params.disk_number + 1)?;
        trace!(zip64_eocd_pos, "emitted zip64 footer");
    }

    stream.write_u32(EOCD_SIGNATURE)?;
    stream.write_u16(params.disk_number.min(SENTINEL16 as u32) as u16)?;
    stream.write_u16(params.disk_with_cd.min(SENTINEL16 as u32) as u16)?;
    let entries16 = params.entries.min(SENTINEL16 as u64) as u16;
    stream.write_u16(entries16)?;
    stream.write_u16(entries16)?;
    stream.write_u32(params.cd_size.min(SENTINEL32 as u64) as u32)?;
    stream.write_u32(params.cd_offset.min(SENTINEL32 as u64) as u32)?;
    stream.write_u16(params.comment.len() as u16)?;
    stream.write_all(params.comment.as_bytes())?;
    stream.flush()?;
    Ok(())
}

/// Query the storage stream for split-archive placement; streams without
/// disk support land everything on disk 0.
pub(crate) fn disk_placement(stream: &dyn Stream) -> (u32, u32, bool) {
    let disk_number = stream
        .get_prop(StreamProp::DiskNumber)
        .unwrap_or(0)
        .max(0) as u32;
    let split = stream
        .get_prop(StreamProp::DiskSize)
        .map(|size| size > 0)
        .unwrap_or(false);
    (disk_number, disk_number, split)
}
