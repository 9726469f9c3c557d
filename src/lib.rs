//! # minitar - POSIX ustar archives
//!
//! `minitar` reads and writes `ustar` tar archives holding regular files:
//!
//! - **create** a new archive from an ordered list of files
//! - **append** files to the end of an existing archive
//! - **list** the names stored in an archive, in physical order
//! - **update** files already present by appending newer copies
//! - **extract** every entry into a flat directory
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use minitar::{Archive, Result};
//!
//! # fn main() -> Result<()> {
//! let archive = Archive::new("backup.tar");
//!
//! archive.create(&["notes.txt", "todo.txt"])?;
//! archive.append(&["later.txt"])?;
//!
//! for name in archive.list()? {
//!     println!("{}", name);
//! }
//!
//! // Appends a second copy; the physically last one wins
//! archive.update(&["notes.txt"])?;
//!
//! let report = archive.extract()?;
//! println!("{} extracted, {} skipped", report.extracted.len(), report.skipped.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! use minitar::{Archive, StaticIdentity, Result};
//!
//! # fn main() -> Result<()> {
//! let archive = Archive::builder("release.tar")
//!     .working_dir("/srv/export")
//!     .verify_checksums(true)
//!     .identity(StaticIdentity::fixed("build", "build"))
//!     .build();
//!
//! archive.create(&["app.bin"])?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Format
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ Header (512 B)               │  name, mode, ids, size, mtime,
//! │                              │  checksum, "ustar\0" "00", names
//! ├──────────────────────────────┤
//! │ Content, zero-padded to 512  │
//! ├──────────────────────────────┤
//! │ ... more entries ...         │
//! ├──────────────────────────────┤
//! │ 2 x 512 B of zeros           │  end sentinel, nothing after it
//! └──────────────────────────────┘
//! ```
//!
//! Concurrent operations on the same archive path are not supported: the
//! append point is computed by scanning and then written to.

pub mod core;

#[allow(unused_imports)]
pub(crate) use crate::core::{config, error, header, identity, io, scanner, writer};

pub use crate::core::{
    config::Config,
    error::{ArchiveError, IdentityKind, Result},
    header::Header,
    identity::{IdentityLookup, StaticIdentity, SystemIdentity},
    io::{padded_length, BLOCK_SIZE},
    scanner::{ContentRange, Scanner},
    writer::ArchiveWriter,
};

use serde::Serialize;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of an extraction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractReport {
    /// Names written to disk, in archive order
    pub extracted: Vec<String>,
    /// Entries left alone, with the reason
    pub skipped: Vec<SkippedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
}

/// A tar archive on disk plus the settings used to operate on it
///
/// Nothing is cached between calls: every operation reopens and rescans
/// the file.
#[derive(Clone)]
pub struct Archive {
    path: PathBuf,
    config: Config,
    identity: Arc<dyn IdentityLookup>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Archive {
    /// Archive at `path` with default settings and system identity lookup
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Archive::builder(path).build()
    }

    pub fn builder<P: AsRef<Path>>(path: P) -> ArchiveBuilder {
        ArchiveBuilder::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Write a new archive containing `files`, replacing any existing one
    pub fn create<S: AsRef<str>>(&self, files: &[S]) -> Result<()> {
        writer::create(&self.path, files, &self.config, self.identity.as_ref())
    }

    /// Add `files` after the last entry of the existing archive
    pub fn append<S: AsRef<str>>(&self, files: &[S]) -> Result<()> {
        writer::append(&self.path, files, &self.config, self.identity.as_ref())
    }

    /// Names of every entry, duplicates included, in physical order
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.entries()?.into_iter().map(|h| h.name).collect())
    }

    /// Every decoded header, in physical order
    pub fn entries(&self) -> Result<Vec<Header>> {
        debug!("Listing archive {:?}", self.path);
        self.scanner()?.headers()
    }

    /// Append newer copies of `files`, all of which must already be archived
    ///
    /// Fails with `NotSubset` without touching the archive if any name is
    /// missing. Updated names appear twice afterwards; the later entry is
    /// the current one.
    pub fn update<S: AsRef<str>>(&self, files: &[S]) -> Result<()> {
        info!("Updating {} file(s) in archive {:?}", files.len(), self.path);

        // A lossy rendering of a non-UTF-8 name does not count as present
        let present: HashSet<String> = self
            .entries()?
            .into_iter()
            .filter(|h| !h.lossy_name)
            .map(|h| h.name)
            .collect();
        let missing: Vec<String> = files
            .iter()
            .map(|f| f.as_ref())
            .filter(|name| !present.contains(*name))
            .map(String::from)
            .collect();

        if !missing.is_empty() {
            return Err(ArchiveError::NotSubset { missing });
        }

        self.append(files)
    }

    /// Write every entry into the working directory
    ///
    /// Entries whose name is not a plain UTF-8 file name, entries of other
    /// types, and entries whose output file cannot be written are skipped and
    /// reported. Existing symlinks in the working directory are never
    /// followed. Only failures reading the archive itself abort.
    pub fn extract(&self) -> Result<ExtractReport> {
        info!(
            "Extracting archive {:?} into {:?}",
            self.path, self.config.working_dir
        );

        let mut scanner = self.scanner()?;
        let mut report = ExtractReport::default();

        while let Some((header, range)) = scanner.next_entry()? {
            if header.lossy_name {
                report.skip(header.name, "name is not valid UTF-8".to_string());
                continue;
            }
            if let Err(e) = check_entry_name(&header.name) {
                report.skip(header.name, e.to_string());
                continue;
            }
            if !header.is_regular_file() {
                let reason = format!("unsupported entry type '{}'", header.type_flag as char);
                report.skip(header.name, reason);
                continue;
            }

            let target = self.config.working_dir.join(&header.name);
            let opened = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .custom_flags(libc::O_NOFOLLOW)
                .open(&target);
            let mut out = match opened {
                Ok(out) => out,
                Err(e) => {
                    report.skip(header.name, format!("failed to create extracted file: {}", e));
                    continue;
                }
            };

            let content = scanner.content_reader(&range)?;
            match copy_entry(content, &mut out, range.len)? {
                Ok(()) => {
                    debug!("Extracted '{}' ({} bytes)", header.name, range.len);
                    report.extracted.push(header.name);
                }
                Err(e) => {
                    report.skip(header.name, format!("failed to write extracted file: {}", e));
                }
            }
        }

        Ok(report)
    }

    fn scanner(&self) -> Result<Scanner<BufReader<File>>> {
        let file = File::open(&self.path).map_err(|source| ArchiveError::ArchiveOpen {
            path: self.path.clone(),
            source,
        })?;
        Ok(Scanner::new(BufReader::new(file)).verify_checksums(self.config.verify_checksums))
    }
}

impl ExtractReport {
    fn skip(&mut self, name: String, reason: String) {
        warn!("Skipping '{}': {}", name, reason);
        self.skipped.push(SkippedEntry { name, reason });
    }
}

/// Builder for [`Archive`]
pub struct ArchiveBuilder {
    path: PathBuf,
    config: Config,
    identity: Option<Arc<dyn IdentityLookup>>,
}

impl ArchiveBuilder {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        ArchiveBuilder {
            path: path.as_ref().to_path_buf(),
            config: Config::default(),
            identity: None,
        }
    }

    /// Replace all settings at once (e.g. a loaded config file)
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Directory source names are resolved against and extraction writes into
    pub fn working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.working_dir = dir.into();
        self
    }

    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.config.verify_checksums = verify;
        self
    }

    /// Owner/group name resolution (defaults to [`SystemIdentity`])
    pub fn identity<I: IdentityLookup + 'static>(mut self, identity: I) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    pub fn build(self) -> Archive {
        Archive {
            path: self.path,
            config: self.config,
            identity: self.identity.unwrap_or_else(|| Arc::new(SystemIdentity)),
        }
    }
}

/// Create `archive` from `files` with default settings
pub fn create<P: AsRef<Path>, S: AsRef<str>>(archive: P, files: &[S]) -> Result<()> {
    Archive::new(archive).create(files)
}

/// Append `files` to `archive` with default settings
pub fn append<P: AsRef<Path>, S: AsRef<str>>(archive: P, files: &[S]) -> Result<()> {
    Archive::new(archive).append(files)
}

/// List the entry names of `archive`
pub fn list<P: AsRef<Path>>(archive: P) -> Result<Vec<String>> {
    Archive::new(archive).list()
}

/// Update `files` in `archive` with default settings
pub fn update<P: AsRef<Path>, S: AsRef<str>>(archive: P, files: &[S]) -> Result<()> {
    Archive::new(archive).update(files)
}

/// Extract `archive` into the current directory
pub fn extract<P: AsRef<Path>>(archive: P) -> Result<ExtractReport> {
    Archive::new(archive).extract()
}

/// Refuse names that could land outside the working directory
fn check_entry_name(name: &str) -> Result<()> {
    if name.contains('/') || name == "." || name == ".." {
        return Err(ArchiveError::UnsafeName(name.to_string()));
    }
    Ok(())
}

/// Copy `len` content bytes into `out`
///
/// The outer error is a failed archive read and is fatal; the inner one is a
/// failed write to the output file and only affects this entry.
fn copy_entry<R: Read, W: Write>(
    mut content: R,
    out: &mut W,
    len: u64,
) -> Result<std::io::Result<()>> {
    let mut buf = [0u8; BLOCK_SIZE * 8];
    let mut remaining = len;

    while remaining > 0 {
        let n = match content.read(&mut buf) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("archive ended {} bytes short of entry content", remaining),
                )
                .into())
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        remaining -= n as u64;

        if let Err(e) = out.write_all(&buf[..n]) {
            return Ok(Err(e));
        }
    }

    Ok(out.flush())
}
