use grfpak::{decompress, EntryKind, FormatVersion, GrfArchive, NameEncoding};
use grfpak::{MAGIC_GRAT, MAGIC_PAK, TAG_COMPRESSED, TAG_FOLDER, TAG_STORED};

// --- Fixture helpers ---

/// Inverse of the archive's per-byte name obfuscation (a nibble swap),
/// for building GRAT fixtures.
fn encode_name_byte(b: u8) -> u8 {
    let b = if b == b'\\' { b'/' } else { b };
    (b << 4) ^ (b >> 4)
}

fn encode_name(name: &[u8]) -> Vec<u8> {
    name.iter().map(|&b| encode_name_byte(b)).collect()
}

fn record(name: &[u8], tag: u8, offset: u32, csize: u32, osize: u32) -> Vec<u8> {
    let mut rec = Vec::new();
    rec.push(name.len() as u8);
    rec.push(tag);
    rec.extend_from_slice(&(offset as i32).to_le_bytes());
    rec.extend_from_slice(&(csize as i32).to_le_bytes());
    rec.extend_from_slice(&(osize as i32).to_le_bytes());
    rec.extend_from_slice(name);
    rec.push(0);
    rec
}

fn build_pak(payload: &[u8], records: &[Vec<u8>]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(MAGIC_PAK);
    data.extend_from_slice(payload);
    let table_offset = data.len() as i32;
    for rec in records {
        data.extend_from_slice(rec);
    }
    data.extend_from_slice(&table_offset.to_le_bytes());
    data.extend_from_slice(&(records.len() as i32).to_le_bytes());
    data.push(0);
    data
}

fn build_grat(payload: &[u8], records: &[Vec<u8>]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(MAGIC_GRAT);
    data.extend_from_slice(payload);
    let table_offset = data.len() as i32;
    for rec in records {
        data.extend_from_slice(rec);
    }
    data.extend_from_slice(&table_offset.to_le_bytes());
    data.extend_from_slice(&0i16.to_le_bytes());
    data.extend_from_slice(&(records.len() as i16).to_le_bytes());
    data.push(0);
    data
}

// --- Reference compressor ---
//
// A conforming greedy compressor for the mask/back-reference scheme, used
// to exercise the decompressor against streams it did not hand-pick.

fn compress(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < input.len() {
        let mask_pos = out.len();
        out.push(0);
        let mut mask = 0u8;
        for bit in 0..8 {
            if pos >= input.len() {
                break;
            }
            let (len, dist) = longest_match(input, pos);
            if len >= 2 {
                mask |= 1 << bit;
                out.push((dist & 0xFF) as u8);
                out.push((((len - 2) << 4) | (dist >> 8)) as u8);
                pos += len;
            } else {
                out.push(input[pos]);
                pos += 1;
            }
        }
        out[mask_pos] = mask;
    }
    out
}

fn longest_match(input: &[u8], pos: usize) -> (usize, usize) {
    let mut best = (0, 0);
    for start in pos.saturating_sub(4095)..pos {
        let mut len = 0;
        while len < 17 && pos + len < input.len() && input[start + len] == input[pos + len] {
            len += 1;
        }
        if len > best.0 {
            best = (len, pos - start);
        }
    }
    best
}

// --- Tests ---

#[test]
fn test_round_trip_repetitive() {
    let input = b"The quick brown fox jumps over the lazy dog. ".repeat(100);
    let compressed = compress(&input);
    assert!(compressed.len() < input.len());
    assert_eq!(decompress(&compressed, input.len()).unwrap(), input);
}

#[test]
fn test_round_trip_single_byte_run() {
    // Maximal use of overlapping distance-1 copies.
    let input = vec![0x7Fu8; 4096];
    let compressed = compress(&input);
    assert_eq!(decompress(&compressed, input.len()).unwrap(), input);
}

#[test]
fn test_round_trip_mixed() {
    let input: Vec<u8> = (0..5000).map(|i| ((i * 17 + 31) % 256) as u8).collect();
    let compressed = compress(&input);
    assert_eq!(decompress(&compressed, input.len()).unwrap(), input);
}

#[test]
fn test_round_trip_empty() {
    assert_eq!(compress(&[]), Vec::<u8>::new());
    assert_eq!(decompress(&[], 0).unwrap(), Vec::<u8>::new());
}

#[test]
fn test_pak_extract_end_to_end() {
    // A PAK with one folder "data" and one file "a.txt" whose payload is
    // two literals behind a zero mask byte.
    let payload = [0x00, 0x41, 0x42];
    let records = vec![
        record(b"data", TAG_FOLDER, 0, 0, 0),
        record(b"a.txt", TAG_COMPRESSED, 5, 3, 2),
    ];
    let data = build_pak(&payload, &records);

    let archive = GrfArchive::parse(&data).unwrap();
    assert_eq!(archive.version, FormatVersion::Pak);
    assert_eq!(archive.entries.len(), 2);

    assert_eq!(archive.entries[0].name, "data");
    assert_eq!(archive.entries[0].kind, EntryKind::Folder);

    let file = &archive.entries[1];
    assert_eq!(file.name, "a.txt");
    assert_eq!(file.kind, EntryKind::Compressed);
    assert_eq!(file.extract(&data).unwrap(), [0x41, 0x42]);
}

#[test]
fn test_grat_extract_end_to_end() {
    let text = b"item_id,item_name,price\n501,Red Potion,50\n";
    let table_data = text.repeat(40);
    let sprite: Vec<u8> = (0..2000).map(|i| ((i * 31 + 7) % 256) as u8).collect();

    let table_z = compress(&table_data);
    // Sprite payload stored verbatim under the uncompressed tag.
    let mut payload = Vec::new();
    payload.extend_from_slice(&table_z);
    payload.extend_from_slice(&sprite);

    let table_off = 5u32;
    let sprite_off = table_off + table_z.len() as u32;
    let records = vec![
        record(&encode_name(b"db"), TAG_FOLDER, 0, 0, 0),
        record(
            &encode_name(b"db\\item.csv"),
            TAG_COMPRESSED,
            table_off,
            table_z.len() as u32,
            table_data.len() as u32,
        ),
        record(
            &encode_name(b"db\\npc.spr"),
            TAG_STORED,
            sprite_off,
            sprite.len() as u32,
            sprite.len() as u32,
        ),
    ];
    let data = build_grat(&payload, &records);

    let archive = GrfArchive::parse(&data).unwrap();
    assert_eq!(archive.version, FormatVersion::Grat);
    assert_eq!(archive.entries.len(), 3);

    assert_eq!(archive.entries[0].name, "db");
    assert!(archive.entries[0].is_folder());

    let table_entry = &archive.entries[1];
    assert_eq!(table_entry.name, "db\\item.csv");
    assert_eq!(table_entry.extract(&data).unwrap(), table_data);

    let sprite_entry = &archive.entries[2];
    assert_eq!(sprite_entry.name, "db\\npc.spr");
    assert_eq!(sprite_entry.extract(&data).unwrap(), sprite);
}

#[test]
fn test_grat_korean_names() {
    // "무기" (weapon) in EUC-KR is BB F3 B1 E2... use a short real pair:
    // 0xB9 0xAB = '무', 0xB1 0xE2 = '기'.
    let name = b"\xB9\xAB\xB1\xE2.dat";
    let records = vec![record(&encode_name(name), TAG_STORED, 5, 0, 0)];
    let data = build_grat(&[], &records);

    let archive = GrfArchive::parse_with_encoding(&data, NameEncoding::Korean).unwrap();
    assert_eq!(archive.entries[0].name, "무기.dat");

    // The same bytes under the default encoding come out as mojibake,
    // not an error.
    let western = GrfArchive::parse(&data).unwrap();
    assert_ne!(western.entries[0].name, "무기.dat");
}

#[test]
fn test_duplicate_names_are_preserved() {
    // The format does not enforce unique paths; both records must survive
    // parsing in table order.
    let payload = [0x00, b'1', 0x00, b'2'];
    let records = vec![
        record(b"twice.txt", TAG_COMPRESSED, 5, 2, 1),
        record(b"twice.txt", TAG_COMPRESSED, 7, 2, 1),
    ];
    let data = build_pak(&payload, &records);

    let archive = GrfArchive::parse(&data).unwrap();
    assert_eq!(archive.entries.len(), 2);
    assert_eq!(archive.entries[0].extract(&data).unwrap(), b"1");
    assert_eq!(archive.entries[1].extract(&data).unwrap(), b"2");
}

#[test]
fn test_compressed_payloads_from_reference_compressor() {
    // Whole-archive check with payloads produced by the reference
    // compressor rather than hand-written token streams.
    let bodies: Vec<Vec<u8>> = vec![
        b"x".to_vec(),
        b"abababababababababababab".to_vec(),
        (0..1024).map(|i| (i % 7) as u8).collect(),
    ];

    let mut payload = Vec::new();
    let mut records = Vec::new();
    for (i, body) in bodies.iter().enumerate() {
        let z = compress(body);
        let offset = 5 + payload.len() as u32;
        payload.extend_from_slice(&z);
        records.push(record(
            format!("file{}.bin", i).as_bytes(),
            TAG_COMPRESSED,
            offset,
            z.len() as u32,
            body.len() as u32,
        ));
    }
    let data = build_pak(&payload, &records);

    let archive = GrfArchive::parse(&data).unwrap();
    for (entry, body) in archive.entries.iter().zip(&bodies) {
        assert_eq!(&entry.extract(&data).unwrap(), body);
    }
}
