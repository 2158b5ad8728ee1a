use std::io::SeekFrom;

use zipio::{method, FileInfo, MemStream, OpenMode, Stream, ZipArchive, ZipError};

fn write_archive(entries: &[(&str, &[u8], u16, u32)]) -> Vec<u8> {
    let mut archive =
        ZipArchive::open(MemStream::new(), OpenMode::WRITE | OpenMode::CREATE).unwrap();
    for &(name, data, compression_method, level) in entries {
        let info = FileInfo {
            filename: name.into(),
            compression_method,
            ..FileInfo::default()
        };
        archive.entry_write_open(&info, level, false, None).unwrap();
        archive.entry_write(data).unwrap();
        archive.entry_close().unwrap();
    }
    archive.close().unwrap().into_inner()
}

fn reopen(bytes: Vec<u8>) -> ZipArchive<MemStream> {
    ZipArchive::open(MemStream::from_vec(bytes), OpenMode::READ).unwrap()
}

#[test]
fn single_stored_entry_exact_layout() {
    let bytes = write_archive(&[("hello.txt", b"hi\n", method::STORE, 0)]);

    // local header (30 + 9) + data (3) + descriptor (16)
    // + central header (46 + 9) + EOCD (22)
    assert_eq!(bytes.len(), 135);

    // Local header at 0.
    assert_eq!(&bytes[0..4], &0x04034b50u32.to_le_bytes());
    assert_eq!(u16::from_le_bytes([bytes[26], bytes[27]]), 9); // name len
    assert_eq!(u16::from_le_bytes([bytes[28], bytes[29]]), 0); // extra len
    assert_eq!(&bytes[30..39], b"hello.txt");
    assert_eq!(&bytes[39..42], b"hi\n");

    // Data descriptor at 42.
    assert_eq!(&bytes[42..46], &0x08074b50u32.to_le_bytes());
    assert_eq!(u32::from_le_bytes([bytes[46], bytes[47], bytes[48], bytes[49]]), 0xd7d541c2);
    assert_eq!(u32::from_le_bytes([bytes[50], bytes[51], bytes[52], bytes[53]]), 3); // compressed
    assert_eq!(u32::from_le_bytes([bytes[54], bytes[55], bytes[56], bytes[57]]), 3); // uncompressed

    // Central header at 58.
    assert_eq!(&bytes[58..62], &0x02014b50u32.to_le_bytes());
    assert_eq!(
        u32::from_le_bytes([bytes[58 + 16], bytes[58 + 17], bytes[58 + 18], bytes[58 + 19]]),
        0xd7d541c2
    );

    // Classic EOCD at 113, no comment.
    assert_eq!(&bytes[113..117], &0x06054b50u32.to_le_bytes());
    assert_eq!(u16::from_le_bytes([bytes[121], bytes[122]]), 1); // entries on disk
    assert_eq!(u16::from_le_bytes([bytes[123], bytes[124]]), 1); // total entries
    assert_eq!(u32::from_le_bytes([bytes[125], bytes[126], bytes[127], bytes[128]]), 55); // cd size
    assert_eq!(u32::from_le_bytes([bytes[129], bytes[130], bytes[131], bytes[132]]), 58); // cd offset
    assert_eq!(u16::from_le_bytes([bytes[133], bytes[134]]), 0); // comment len

    // Read it back.
    let mut archive = reopen(bytes);
    assert_eq!(archive.number_entries(), 1);
    archive.locate_entry("hello.txt", false).unwrap();
    assert_eq!(archive.entry_info().unwrap().uncompressed_size, 3);
    archive.entry_read_open(false, None).unwrap();
    let data = archive.entry_read_to_end().unwrap();
    archive.entry_close().unwrap();
    assert_eq!(data, b"hi\n");
}

#[test]
fn deflate_entries_roundtrip() {
    let big: Vec<u8> = (0..200_000u32).map(|i| (i % 101) as u8).collect();
    let bytes = write_archive(&[
        ("a.bin", &big, method::DEFLATE, 6),
        ("b.txt", b"second entry", method::DEFLATE, 9),
        ("empty", b"", method::DEFLATE, 6),
    ]);

    let mut archive = reopen(bytes);
    assert_eq!(archive.number_entries(), 3);

    archive.locate_entry("a.bin", false).unwrap();
    assert!(archive.entry_info().unwrap().compressed_size < big.len() as u64);
    archive.entry_read_open(false, None).unwrap();
    let data = archive.entry_read_to_end().unwrap();
    archive.entry_close().unwrap();
    assert_eq!(data, big);

    archive.locate_entry("b.txt", false).unwrap();
    archive.entry_read_open(false, None).unwrap();
    let data = archive.entry_read_to_end().unwrap();
    archive.entry_close().unwrap();
    assert_eq!(data, b"second entry");

    archive.locate_entry("empty", false).unwrap();
    archive.entry_read_open(false, None).unwrap();
    let data = archive.entry_read_to_end().unwrap();
    archive.entry_close().unwrap();
    assert!(data.is_empty());
}

#[test]
fn iteration_preserves_write_order() {
    let bytes = write_archive(&[
        ("one", b"1", method::STORE, 0),
        ("two", b"22", method::STORE, 0),
        ("three", b"333", method::STORE, 0),
    ]);

    let mut archive = reopen(bytes);
    let mut names = Vec::new();
    let mut step = archive.goto_first_entry();
    loop {
        match step {
            Ok(()) => names.push(archive.entry_info().unwrap().filename.clone()),
            Err(ZipError::EndOfList) => break,
            Err(err) => panic!("unexpected error: {err}"),
        }
        step = archive.goto_next_entry();
    }
    assert_eq!(names, ["one", "two", "three"]);
}

#[test]
fn goto_entry_is_idempotent() {
    let bytes = write_archive(&[
        ("first", b"x", method::STORE, 0),
        ("second", b"y", method::STORE, 0),
    ]);

    let mut archive = reopen(bytes);
    archive.goto_first_entry().unwrap();
    archive.goto_next_entry().unwrap();
    let pos = archive.entry_pos();
    let name = archive.entry_info().unwrap().filename.clone();
    archive.goto_entry(pos).unwrap();
    assert_eq!(archive.entry_pos(), pos);
    assert_eq!(archive.entry_info().unwrap().filename, name);
}

#[test]
fn case_insensitive_locate() {
    let bytes = write_archive(&[("Docs/README", b"read me", method::STORE, 0)]);

    let mut archive = reopen(bytes);
    archive.locate_entry("docs/readme", true).unwrap();
    assert_eq!(archive.entry_info().unwrap().filename, "Docs/README");

    assert!(matches!(
        archive.locate_entry("docs/readme", false),
        Err(ZipError::EntryNotFound(_))
    ));
    // Backslash separators compare equal.
    archive.locate_entry("Docs\\README", false).unwrap();
}

#[test]
fn locate_callback_scan() {
    let bytes = write_archive(&[
        ("small", b"s", method::STORE, 0),
        ("large", b"0123456789", method::STORE, 0),
    ]);

    let mut archive = reopen(bytes);
    archive
        .locate_first_entry(|info| info.uncompressed_size > 5)
        .unwrap();
    assert_eq!(archive.entry_info().unwrap().filename, "large");
    assert!(matches!(
        archive.locate_next_entry(|info| info.uncompressed_size > 5),
        Err(ZipError::EndOfList)
    ));
}

#[test]
fn archive_comment_roundtrip() {
    let mut archive =
        ZipArchive::open(MemStream::new(), OpenMode::WRITE | OpenMode::CREATE).unwrap();
    archive.set_comment("made by zipio").unwrap();
    let info = FileInfo {
        filename: "x".into(),
        ..FileInfo::default()
    };
    archive.entry_write_open(&info, 0, false, None).unwrap();
    archive.entry_close().unwrap();
    let bytes = archive.close().unwrap().into_inner();

    let archive = reopen(bytes);
    assert_eq!(archive.comment(), Some("made by zipio"));
}

#[test]
fn directory_entries() {
    let mut archive =
        ZipArchive::open(MemStream::new(), OpenMode::WRITE | OpenMode::CREATE).unwrap();
    let info = FileInfo {
        filename: "dir/".into(),
        ..FileInfo::default()
    };
    archive.entry_write_open(&info, 6, false, None).unwrap();
    archive.entry_close().unwrap();
    let bytes = archive.close().unwrap().into_inner();

    let mut archive = reopen(bytes);
    archive.goto_first_entry().unwrap();
    assert!(archive.entry_is_dir().unwrap());
    // A trailing-slash name forces the store method.
    assert_eq!(
        archive.entry_info().unwrap().compression_method,
        method::STORE
    );
}

#[test]
fn crc_mismatch_is_detected() {
    let mut bytes = write_archive(&[("hello.txt", b"hi\n", method::STORE, 0)]);
    // Corrupt one payload byte (payload lives at 39..42).
    bytes[40] ^= 0xff;

    let mut archive = reopen(bytes);
    archive.locate_entry("hello.txt", false).unwrap();
    archive.entry_read_open(false, None).unwrap();
    let _ = archive.entry_read_to_end().unwrap();
    assert!(matches!(
        archive.entry_close(),
        Err(ZipError::Crc { .. })
    ));
}

#[test]
fn unknown_method_is_a_support_error() {
    let bytes = write_archive(&[("hello.txt", b"hi\n", method::STORE, 0)]);
    // Patch the central record's method field (cd offset 58, method at +10).
    let mut bytes = bytes;
    bytes[58 + 10] = 97; // WavPack
    bytes[58 + 11] = 0;

    let mut archive = reopen(bytes);
    archive.goto_first_entry().unwrap();
    assert!(matches!(
        archive.entry_read_open(false, None),
        Err(ZipError::UnsupportedMethod(97))
    ));
    // Raw access still works and the handle stays usable.
    archive.entry_read_open(true, None).unwrap();
    let raw = archive.entry_read_to_end().unwrap();
    archive.entry_close().unwrap();
    assert_eq!(raw, b"hi\n");
}

#[test]
fn reading_in_write_mode_sees_staged_entries() {
    let mut archive =
        ZipArchive::open(MemStream::new(), OpenMode::WRITE | OpenMode::CREATE).unwrap();
    for name in ["a", "b"] {
        let info = FileInfo {
            filename: name.into(),
            ..FileInfo::default()
        };
        archive.entry_write_open(&info, 0, false, None).unwrap();
        archive.entry_write(name.as_bytes()).unwrap();
        archive.entry_close().unwrap();
    }
    assert_eq!(archive.number_entries(), 2);

    archive.locate_entry("a", false).unwrap();
    archive.entry_read_open(false, None).unwrap();
    let data = archive.entry_read_to_end().unwrap();
    archive.entry_close().unwrap();
    assert_eq!(data, b"a");

    // Writing continues cleanly after the detour.
    let info = FileInfo {
        filename: "c".into(),
        ..FileInfo::default()
    };
    archive.entry_write_open(&info, 0, false, None).unwrap();
    archive.entry_write(b"c").unwrap();
    archive.entry_close().unwrap();
    let bytes = archive.close().unwrap().into_inner();

    let mut archive = reopen(bytes);
    assert_eq!(archive.number_entries(), 3);
    archive.locate_entry("c", false).unwrap();
    archive.entry_read_open(false, None).unwrap();
    assert_eq!(archive.entry_read_to_end().unwrap(), b"c");
    archive.entry_close().unwrap();
}

#[test]
fn open_rejects_garbage() {
    let result = ZipArchive::open(
        MemStream::from_vec(b"this is not a zip archive".to_vec()),
        OpenMode::READ,
    );
    assert!(matches!(result, Err(ZipError::Format(_))));
}

#[test]
fn storage_stream_round_trips_through_close() {
    let mut archive =
        ZipArchive::open(MemStream::new(), OpenMode::WRITE | OpenMode::CREATE).unwrap();
    let info = FileInfo {
        filename: "f".into(),
        ..FileInfo::default()
    };
    archive.entry_write_open(&info, 0, false, None).unwrap();
    archive.entry_write(b"payload").unwrap();
    // Close with the entry still open: it is finalised first.
    let mut storage = archive.close().unwrap();
    let end = storage.seek(SeekFrom::End(0)).unwrap();
    assert_eq!(end, storage.len());
}
