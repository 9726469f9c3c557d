use crate::error::{ArchiveError, IdentityKind, Result};
use crate::identity::IdentityLookup;
use crate::io::BLOCK_SIZE;
use serde::Serialize;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::warn;

/// ustar format tag, NUL terminated
pub const MAGIC: [u8; 6] = *b"ustar\0";
pub const VERSION: [u8; 2] = *b"00";

/// Type flag for regular files, the only kind this engine writes
pub const REGTYPE: u8 = b'0';

pub const NAME_LEN: usize = 100;
pub const IDENT_NAME_LEN: usize = 32;

// Field offsets within the 512-byte header block
const NAME: std::ops::Range<usize> = 0..100;
const MODE: std::ops::Range<usize> = 100..108;
const UID: std::ops::Range<usize> = 108..116;
const GID: std::ops::Range<usize> = 116..124;
const SIZE: std::ops::Range<usize> = 124..136;
const MTIME: std::ops::Range<usize> = 136..148;
const CHKSUM: std::ops::Range<usize> = 148..156;
const TYPEFLAG: usize = 156;
const MAGIC_FIELD: std::ops::Range<usize> = 257..263;
const VERSION_FIELD: std::ops::Range<usize> = 263..265;
const UNAME: std::ops::Range<usize> = 265..297;
const GNAME: std::ops::Range<usize> = 297..329;
const DEVMAJOR: std::ops::Range<usize> = 329..337;
const DEVMINOR: std::ops::Range<usize> = 337..345;

/// One ustar header record (a single 512-byte block)
///
/// Every numeric field travels as zero-padded octal ASCII terminated by a
/// NUL byte. The checksum is never taken from this struct when writing:
/// [`Header::to_bytes`] recomputes it over the serialized block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mtime: u64,
    /// Checksum as decoded; zero for headers built from the filesystem
    pub checksum: u32,
    pub type_flag: u8,
    #[serde(skip)]
    pub magic: [u8; 6],
    #[serde(skip)]
    pub version: [u8; 2],
    pub uname: String,
    pub gname: String,
    pub dev_major: u32,
    pub dev_minor: u32,
    /// Stored name was not valid UTF-8; `name` is only a lossy rendering
    #[serde(skip)]
    pub lossy_name: bool,
}

impl Header {
    /// Build a header from filesystem metadata of `source`, stored under `name`
    ///
    /// `name` is what the archive records; `source` is where the file is
    /// actually found (they differ when a working directory is configured).
    pub fn for_file(name: &str, source: &Path, identity: &dyn IdentityLookup) -> Result<Self> {
        if name.len() > NAME_LEN {
            return Err(ArchiveError::NameTooLong {
                name: name.to_string(),
                len: name.len(),
            });
        }

        let meta = std::fs::metadata(source).map_err(|source_err| ArchiveError::Stat {
            path: source.to_path_buf(),
            source: source_err,
        })?;

        if !meta.is_file() {
            return Err(ArchiveError::UnsupportedFileType {
                path: source.to_path_buf(),
            });
        }

        let uid = meta.uid();
        let gid = meta.gid();

        let uname = identity
            .user_name(uid)
            .ok_or_else(|| ArchiveError::IdentityLookup {
                kind: IdentityKind::Owner,
                id: uid,
                path: source.to_path_buf(),
            })?;
        let gname = identity
            .group_name(gid)
            .ok_or_else(|| ArchiveError::IdentityLookup {
                kind: IdentityKind::Group,
                id: gid,
                path: source.to_path_buf(),
            })?;

        let mtime = u64::try_from(meta.mtime()).map_err(|_| ArchiveError::FieldOverflow {
            field: "mtime",
            value: meta.mtime().unsigned_abs(),
        })?;

        let (dev_major, dev_minor) = split_dev(meta.dev());

        Ok(Header {
            name: name.to_string(),
            mode: meta.mode() & 0o7777,
            uid,
            gid,
            size: meta.size(),
            mtime,
            checksum: 0,
            type_flag: REGTYPE,
            magic: MAGIC,
            version: VERSION,
            uname: clip_ident(uname, IdentityKind::Owner),
            gname: clip_ident(gname, IdentityKind::Group),
            dev_major,
            dev_minor,
            lossy_name: false,
        })
    }

    /// Serialize into a header block, computing the checksum last
    pub fn to_bytes(&self) -> Result<[u8; BLOCK_SIZE]> {
        if self.name.len() > NAME_LEN {
            return Err(ArchiveError::NameTooLong {
                name: self.name.clone(),
                len: self.name.len(),
            });
        }

        let mut block = [0u8; BLOCK_SIZE];

        block[NAME][..self.name.len()].copy_from_slice(self.name.as_bytes());
        write_octal(&mut block[MODE], self.mode as u64, "mode")?;
        write_octal(&mut block[UID], self.uid as u64, "uid")?;
        write_octal(&mut block[GID], self.gid as u64, "gid")?;
        write_octal(&mut block[SIZE], self.size, "size")?;
        write_octal(&mut block[MTIME], self.mtime, "mtime")?;
        block[TYPEFLAG] = self.type_flag;
        block[MAGIC_FIELD].copy_from_slice(&self.magic);
        block[VERSION_FIELD].copy_from_slice(&self.version);
        write_text(&mut block[UNAME], &self.uname);
        write_text(&mut block[GNAME], &self.gname);
        write_octal(&mut block[DEVMAJOR], self.dev_major as u64, "devmajor")?;
        write_octal(&mut block[DEVMINOR], self.dev_minor as u64, "devminor")?;

        let sum = checksum(&block);
        write_octal(&mut block[CHKSUM], sum as u64, "checksum")?;

        Ok(block)
    }

    /// Parse a header block
    ///
    /// No validation happens here: octal fields stop at the first non-octal
    /// byte and text fields at the first NUL. Check [`is_end_block`] first to
    /// tell the end sentinel apart from an entry.
    pub fn from_bytes(block: &[u8; BLOCK_SIZE]) -> Self {
        let mut magic = [0u8; 6];
        magic.copy_from_slice(&block[MAGIC_FIELD]);
        let mut version = [0u8; 2];
        version.copy_from_slice(&block[VERSION_FIELD]);

        let name_bytes = text_bytes(&block[NAME]);

        Header {
            name: String::from_utf8_lossy(name_bytes).into_owned(),
            mode: parse_octal(&block[MODE]) as u32,
            uid: parse_octal(&block[UID]) as u32,
            gid: parse_octal(&block[GID]) as u32,
            size: parse_octal(&block[SIZE]),
            mtime: parse_octal(&block[MTIME]),
            checksum: parse_octal(&block[CHKSUM]) as u32,
            type_flag: block[TYPEFLAG],
            magic,
            version,
            uname: parse_text(&block[UNAME]),
            gname: parse_text(&block[GNAME]),
            dev_major: parse_octal(&block[DEVMAJOR]) as u32,
            dev_minor: parse_octal(&block[DEVMINOR]) as u32,
            lossy_name: std::str::from_utf8(name_bytes).is_err(),
        }
    }

    pub fn is_regular_file(&self) -> bool {
        self.type_flag == REGTYPE || self.type_flag == 0
    }

    pub fn is_ustar(&self) -> bool {
        self.magic == MAGIC
    }
}

/// True for the block that marks the end of archive content
///
/// An empty name is enough; a real entry always has one.
pub fn is_end_block(block: &[u8; BLOCK_SIZE]) -> bool {
    block[NAME.start] == 0
}

/// Unsigned sum of the header bytes, with the checksum field read as spaces
pub fn checksum(block: &[u8; BLOCK_SIZE]) -> u32 {
    block
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if CHKSUM.contains(&i) {
                b' ' as u32
            } else {
                b as u32
            }
        })
        .sum()
}

/// Does the stored checksum match the block contents?
pub fn verify_checksum(block: &[u8; BLOCK_SIZE]) -> bool {
    parse_octal(&block[CHKSUM]) as u32 == checksum(block)
}

/// Zero-padded octal filling all but the last byte of `field`, then NUL
fn write_octal(field: &mut [u8], value: u64, name: &'static str) -> Result<()> {
    let digits = field.len() - 1;
    let text = format!("{:0width$o}", value, width = digits);
    if text.len() > digits {
        return Err(ArchiveError::FieldOverflow { field: name, value });
    }
    field[..digits].copy_from_slice(text.as_bytes());
    field[digits] = 0;
    Ok(())
}

fn write_text(field: &mut [u8], text: &str) {
    let n = text.len().min(field.len());
    field[..n].copy_from_slice(&text.as_bytes()[..n]);
}

fn parse_octal(field: &[u8]) -> u64 {
    field
        .iter()
        .skip_while(|&&b| b == b' ')
        .take_while(|&&b| (b'0'..=b'7').contains(&b))
        .fold(0u64, |acc, &b| acc.wrapping_mul(8).wrapping_add((b - b'0') as u64))
}

fn text_bytes(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

fn parse_text(field: &[u8]) -> String {
    String::from_utf8_lossy(text_bytes(field)).into_owned()
}

fn clip_ident(mut name: String, kind: IdentityKind) -> String {
    if name.len() > IDENT_NAME_LEN {
        warn!("Truncating {} name '{}' to {} bytes", kind, name, IDENT_NAME_LEN);
        let mut cut = IDENT_NAME_LEN;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}

/// Split a raw `st_dev` into (major, minor)
#[cfg(target_os = "linux")]
fn split_dev(dev: u64) -> (u32, u32) {
    let major = ((dev >> 8) & 0xfff) | ((dev >> 32) & !0xfff);
    let minor = (dev & 0xff) | ((dev >> 12) & !0xff);
    (major as u32, minor as u32)
}

#[cfg(not(target_os = "linux"))]
fn split_dev(dev: u64) -> (u32, u32) {
    (((dev >> 24) & 0xff) as u32, (dev & 0xff_ffff) as u32)
}
