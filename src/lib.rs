//! Arcturus PAK / Ragnarok GRAT archive parser and decompressor.
//!
//! This crate reads the game-data archive container used by Arcturus and
//! early Ragnarok clients and reconstructs the stored directory tree and
//! file contents.
//!
//! # Supported Formats
//!
//! - **PAK** (`"\0GRSC"` signature) - plain file names, 4+4 byte footer
//! - **GRAT** (`"\0GRAT"` signature) - per-byte obfuscated file names,
//!   4+2+2+1 byte footer
//!
//! Both variants share the entry record layout and the mask-driven
//! LZ compression of file payloads.
//!
//! # Example
//!
//! ```no_run
//! use grfpak::GrfArchive;
//!
//! let data = std::fs::read("data.pak").unwrap();
//! let archive = GrfArchive::parse(&data).unwrap();
//!
//! for entry in &archive.entries {
//!     println!("{}: {} bytes", entry.name, entry.original_size);
//! }
//!
//! let payload = archive.entries[0].extract(&data).unwrap();
//! ```

use encoding_rs::{EUC_KR, WINDOWS_1252};
use log::{debug, warn};
use std::io::{Cursor, Read};
use thiserror::Error;

/// Errors that can occur when reading PAK/GRAT archives.
#[derive(Error, Debug)]
pub enum GrfError {
    /// The stream does not start with a known archive signature.
    #[error("unrecognized archive signature {0:02x?}")]
    UnrecognizedSignature([u8; 5]),

    /// An entry carries a type tag outside the known set.
    #[error("unknown entry type {tag:#04x} for entry {index}")]
    UnknownEntryTag { index: usize, tag: u8 },

    /// The stream is too short to hold the signature and footer.
    #[error("archive truncated: {len} bytes is too short for signature and footer")]
    TruncatedArchive { len: usize },

    /// The footer declares a table offset or entry count that cannot be used.
    #[error("footer declares invalid {field}: {value}")]
    InvalidFooter { field: &'static str, value: i32 },

    /// The footer points the entry table outside the stream.
    #[error("entry table offset {offset:#x} is outside the archive ({len} bytes)")]
    TableOutOfBounds { offset: u32, len: usize },

    /// The entry table ends before the declared record count is reached.
    #[error("entry table truncated at entry {index} of {count}")]
    TruncatedTable { index: usize, count: usize },

    /// An entry record carries a negative offset or size.
    #[error("entry {index} has negative {field}: {value}")]
    NegativeField { index: usize, field: &'static str, value: i32 },

    /// An entry's payload span does not fit in the stream.
    #[error("payload of '{name}' ({offset:#x}+{size} bytes) is outside the archive ({len} bytes)")]
    PayloadOutOfBounds {
        name: String,
        offset: u32,
        size: u32,
        len: usize,
    },

    /// A back-reference points before the start of the output buffer.
    #[error("back-reference at input offset {at} reaches {distance} bytes back with only {written} written")]
    BadBackReference {
        at: usize,
        distance: usize,
        written: usize,
    },

    /// The compressed stream ends in the middle of a back-reference token.
    #[error("compressed stream truncated inside a token at offset {at}")]
    TruncatedToken { at: usize },

    /// Decompression produced more bytes than the declared original size.
    #[error("decompressed output exceeds the declared size of {expected} bytes")]
    OutputOverflow { expected: usize },

    /// The decompressed byte count does not match the declared original size.
    #[error("decompressed {actual} bytes, expected {expected}")]
    SizeMismatch { actual: usize, expected: usize },

    /// A folder entry has no payload to extract.
    #[error("entry '{0}' is a folder and has no payload")]
    FolderPayload(String),

    /// An I/O error occurred while reading the stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// PAK signature, first 5 bytes of the stream.
pub const MAGIC_PAK: &[u8; 5] = b"\0GRSC";
/// GRAT signature, first 5 bytes of the stream.
pub const MAGIC_GRAT: &[u8; 5] = b"\0GRAT";

/// Entry tag: payload stored verbatim, no compression.
pub const TAG_STORED: u8 = 0;
/// Entry tag: payload compressed with the mask/back-reference scheme.
pub const TAG_COMPRESSED: u8 = 1;
/// Entry tag: folder placeholder, no payload.
pub const TAG_FOLDER: u8 = 2;

const FOOTER_LEN: usize = 9;
// Fixed record header plus the name terminator; the shortest possible entry.
const MIN_RECORD_LEN: usize = 15;

/// The two container variants, selected once from the signature.
///
/// The variant carries everything that differs between the formats: the
/// footer field widths and whether stored file names are obfuscated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    /// Arcturus PAK, `"\0GRSC"`.
    Pak,
    /// Ragnarok GRAT, `"\0GRAT"`.
    Grat,
}

impl FormatVersion {
    /// Match the 5-byte signature at the start of a stream.
    #[must_use]
    pub fn detect(magic: &[u8; 5]) -> Option<Self> {
        if magic == MAGIC_PAK {
            Some(FormatVersion::Pak)
        } else if magic == MAGIC_GRAT {
            Some(FormatVersion::Grat)
        } else {
            None
        }
    }

    /// Whether stored file names go through the per-byte decode.
    #[must_use]
    pub fn encoded_names(self) -> bool {
        matches!(self, FormatVersion::Grat)
    }

    /// Read `(table_offset, entry_count)` from the 9-byte footer.
    ///
    /// Both footers are 9 bytes, all fields little-endian:
    /// - PAK:  `i32 table_offset`, `i32 entry_count`, `u8 reserved`
    /// - GRAT: `i32 table_offset`, `i16 reserved`, `i16 entry_count`,
    ///   `u8 reserved`
    fn read_footer(self, footer: &[u8]) -> Result<(u32, u32), GrfError> {
        let table_offset = i32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        let entry_count = match self {
            FormatVersion::Pak => {
                i32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]])
            }
            FormatVersion::Grat => i16::from_le_bytes([footer[6], footer[7]]) as i32,
        };

        if table_offset < 0 {
            return Err(GrfError::InvalidFooter {
                field: "table offset",
                value: table_offset,
            });
        }
        if entry_count < 0 {
            return Err(GrfError::InvalidFooter {
                field: "entry count",
                value: entry_count,
            });
        }

        Ok((table_offset as u32, entry_count as u32))
    }
}

/// Character encoding used for stored file names.
///
/// The archives predate Unicode; the right choice depends on which client
/// shipped the data, so the caller selects it explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NameEncoding {
    /// Windows-1252, the common case for western clients.
    #[default]
    Western,
    /// EUC-KR, for archives shipped with Korean clients.
    Korean,
}

impl NameEncoding {
    fn decode(self, bytes: &[u8]) -> String {
        let encoding = match self {
            NameEncoding::Western => WINDOWS_1252,
            NameEncoding::Korean => EUC_KR,
        };
        encoding.decode(bytes).0.trim_end_matches('\0').to_string()
    }
}

/// How an entry's payload is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Payload stored verbatim.
    Stored,
    /// Payload compressed with the mask/back-reference scheme.
    Compressed,
    /// Directory placeholder; carries no payload.
    Folder,
}

impl EntryKind {
    fn from_tag(tag: u8, index: usize) -> Result<Self, GrfError> {
        match tag {
            TAG_STORED => Ok(EntryKind::Stored),
            TAG_COMPRESSED => Ok(EntryKind::Compressed),
            TAG_FOLDER => Ok(EntryKind::Folder),
            _ => Err(GrfError::UnknownEntryTag { index, tag }),
        }
    }
}

/// A single entry (file or folder) in a PAK/GRAT archive.
///
/// Entries hold metadata only; payload bytes stay in the archive stream
/// until [`GrfEntry::extract`] is called.
#[derive(Debug, Clone)]
pub struct GrfEntry {
    /// Path inside the archive, `\`-separated as stored.
    pub name: String,

    /// How the payload is stored, or whether this is a folder.
    pub kind: EntryKind,

    /// Byte offset from the start of the archive to the payload.
    /// Meaningless for folders.
    pub offset: u32,

    /// Length of the stored payload in bytes.
    pub compressed_size: u32,

    /// Length of the payload after decompression. 0 for folders.
    pub original_size: u32,
}

impl GrfEntry {
    /// True for folder placeholder entries.
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }

    /// Read this entry's payload out of the archive stream.
    ///
    /// `data` must be the same stream the entry was parsed from. Stored
    /// payloads are returned verbatim; compressed payloads are expanded
    /// to exactly `original_size` bytes.
    pub fn extract(&self, data: &[u8]) -> Result<Vec<u8>, GrfError> {
        if self.kind == EntryKind::Folder {
            return Err(GrfError::FolderPayload(self.name.clone()));
        }

        let start = self.offset as usize;
        let end = start + self.compressed_size as usize;
        if end > data.len() {
            return Err(GrfError::PayloadOutOfBounds {
                name: self.name.clone(),
                offset: self.offset,
                size: self.compressed_size,
                len: data.len(),
            });
        }

        let span = &data[start..end];
        match self.kind {
            EntryKind::Stored => Ok(span.to_vec()),
            _ => decompress(span, self.original_size as usize),
        }
    }
}

/// A parsed PAK/GRAT archive: the detected variant and its entry table.
#[derive(Debug, Clone)]
pub struct GrfArchive {
    /// Which container variant the signature selected.
    pub version: FormatVersion,
    /// The entries in table order.
    pub entries: Vec<GrfEntry>,
}

impl GrfArchive {
    /// Parse an archive, decoding file names as Windows-1252.
    pub fn parse(data: &[u8]) -> Result<Self, GrfError> {
        Self::parse_with_encoding(data, NameEncoding::Western)
    }

    /// Parse an archive with an explicit file name encoding.
    pub fn parse_with_encoding(data: &[u8], encoding: NameEncoding) -> Result<Self, GrfError> {
        if data.len() < MAGIC_PAK.len() + FOOTER_LEN {
            return Err(GrfError::TruncatedArchive { len: data.len() });
        }

        let mut magic = [0u8; 5];
        magic.copy_from_slice(&data[..5]);
        let version =
            FormatVersion::detect(&magic).ok_or(GrfError::UnrecognizedSignature(magic))?;

        let footer = &data[data.len() - FOOTER_LEN..];
        let (table_offset, entry_count) = version.read_footer(footer)?;
        debug!(
            "detected {:?} archive: table at {:#x}, {} entries",
            version, table_offset, entry_count
        );

        // Records live strictly between the payload region and the footer;
        // a record crossing into the footer means the table is truncated.
        let table_end = data.len() - FOOTER_LEN;
        if table_offset as usize > table_end {
            return Err(GrfError::TableOutOfBounds {
                offset: table_offset,
                len: data.len(),
            });
        }

        // Bound the declared count by what the region can physically hold
        // before trusting it for an allocation.
        let max_records = (table_end - table_offset as usize) / MIN_RECORD_LEN;
        if entry_count as usize > max_records {
            return Err(GrfError::TruncatedTable {
                index: max_records,
                count: entry_count as usize,
            });
        }

        let mut cursor = Cursor::new(&data[table_offset as usize..table_end]);
        let mut entries = Vec::with_capacity(entry_count as usize);
        for index in 0..entry_count as usize {
            entries.push(read_entry(
                &mut cursor,
                version,
                encoding,
                index,
                entry_count as usize,
            )?);
        }

        Ok(GrfArchive { version, entries })
    }
}

/// Read one entry record. Layout, repeated `entry_count` times:
///
/// - 0:     `u8` name length `L` (the stored name occupies `L+1` bytes)
/// - 1:     `u8` type tag
/// - 2-5:   `i32` payload offset
/// - 6-9:   `i32` compressed size
/// - 10-13: `i32` original size
/// - 14..:  `L+1` name bytes, NUL-terminated (obfuscated in GRAT)
fn read_entry(
    cursor: &mut Cursor<&[u8]>,
    version: FormatVersion,
    encoding: NameEncoding,
    index: usize,
    count: usize,
) -> Result<GrfEntry, GrfError> {
    let eof = |_: std::io::Error| GrfError::TruncatedTable { index, count };

    let name_len = read_u8(cursor).map_err(eof)? as usize;
    let tag = read_u8(cursor).map_err(eof)?;
    let offset = read_i32_le(cursor).map_err(eof)?;
    let compressed_size = read_i32_le(cursor).map_err(eof)?;
    let original_size = read_i32_le(cursor).map_err(eof)?;

    let mut name_bytes = vec![0u8; name_len + 1];
    cursor.read_exact(&mut name_bytes).map_err(eof)?;

    let kind = EntryKind::from_tag(tag, index)?;

    for (field, value) in [
        ("offset", offset),
        ("compressed size", compressed_size),
        ("original size", original_size),
    ] {
        if value < 0 {
            return Err(GrfError::NegativeField { index, field, value });
        }
    }

    if version.encoded_names() {
        for b in name_bytes.iter_mut() {
            *b = decode_name_byte(*b);
        }
    }
    let name = encoding.decode(&name_bytes);

    if kind == EntryKind::Folder && original_size != 0 {
        warn!(
            "folder entry '{}' declares original size {}",
            name, original_size
        );
    }

    Ok(GrfEntry {
        name,
        kind,
        offset: offset as u32,
        compressed_size: compressed_size as u32,
        original_size: original_size as u32,
    })
}

/// Reverse the per-byte file name obfuscation used by GRAT archives.
///
/// The stored byte is a nibble swap of the real one; a result of `/` is
/// remapped to `\` so path separators survive the transform. Applied to
/// every stored name byte independently, terminator included.
#[must_use]
pub fn decode_name_byte(b: u8) -> u8 {
    let swapped = (b << 4) ^ (b >> 4);
    if swapped == b'/' {
        b'\\'
    } else {
        swapped
    }
}

/// Expand a compressed payload into exactly `original_size` bytes.
///
/// The stream is a sequence of groups: one mask byte, then up to 8 tokens
/// selected by its bits, low bit first. A set bit is a two-byte
/// back-reference (`length = (m1 >> 4) + 2`, `distance` = the low nibble
/// of `m1` and all of `m0`, 12 bits); a clear bit is one literal byte.
/// A group ends early when the input runs out.
pub fn decompress(input: &[u8], original_size: usize) -> Result<Vec<u8>, GrfError> {
    // A token is at least two bytes and expands to at most 17, so no
    // stream grows past that ratio; don't trust the declared size for
    // the up-front allocation beyond it.
    let cap = original_size.min((input.len() / 2 + 1) * 17);
    let mut out = Vec::with_capacity(cap);
    let mut pos = 0;

    while pos < input.len() {
        let mut mask = input[pos];
        pos += 1;

        for _ in 0..8 {
            if pos >= input.len() {
                break;
            }

            if mask & 1 != 0 {
                let at = pos;
                if pos + 2 > input.len() {
                    return Err(GrfError::TruncatedToken { at });
                }
                let m0 = input[pos] as usize;
                let m1 = input[pos + 1] as usize;
                pos += 2;

                let length = (m1 >> 4) + 2;
                let distance = ((m1 & 0xF) << 8) | m0;
                if distance == 0 || distance > out.len() {
                    return Err(GrfError::BadBackReference {
                        at,
                        distance,
                        written: out.len(),
                    });
                }
                if out.len() + length > original_size {
                    return Err(GrfError::OutputOverflow {
                        expected: original_size,
                    });
                }

                // Byte-by-byte so a short distance replicates bytes written
                // earlier in this same copy.
                for _ in 0..length {
                    let b = out[out.len() - distance];
                    out.push(b);
                }
            } else {
                if out.len() == original_size {
                    return Err(GrfError::OutputOverflow {
                        expected: original_size,
                    });
                }
                out.push(input[pos]);
                pos += 1;
            }

            mask >>= 1;
        }
    }

    if out.len() != original_size {
        return Err(GrfError::SizeMismatch {
            actual: out.len(),
            expected: original_size,
        });
    }
    Ok(out)
}

// Helpers
fn read_u8<R: Read>(r: &mut R) -> Result<u8, std::io::Error> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_i32_le<R: Read>(r: &mut R) -> Result<i32, std::io::Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}
