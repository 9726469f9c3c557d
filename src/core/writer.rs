//! Writing entries into an archive
//!
//! Both `create` and `append` funnel through [`ArchiveWriter`], which emits
//! header + padded content per file and finishes with the end sentinel,
//! cutting off anything the storage held past it.

use crate::config::Config;
use crate::error::{ArchiveError, Result};
use crate::header::Header;
use crate::identity::IdentityLookup;
use crate::io::{BlockStream, SetLen};
use crate::scanner::Scanner;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, Write};
use std::path::Path;
use tracing::{debug, info};

/// Appends entries at the current stream position
pub struct ArchiveWriter<'a, F> {
    stream: BlockStream<F>,
    identity: &'a dyn IdentityLookup,
    working_dir: &'a Path,
}

impl<'a, F: Write + Seek + SetLen> ArchiveWriter<'a, F> {
    pub fn new(inner: F, identity: &'a dyn IdentityLookup, working_dir: &'a Path) -> Self {
        ArchiveWriter {
            stream: BlockStream::new(inner),
            identity,
            working_dir,
        }
    }

    /// Write the header and padded content of the file stored as `name`
    ///
    /// The source is opened before anything is written, so a file that
    /// cannot be read leaves no orphan header behind.
    pub fn append_file(&mut self, name: &str) -> Result<Header> {
        let source = self.working_dir.join(name);
        let header = Header::for_file(name, &source, self.identity)?;
        let block = header.to_bytes()?;
        let file = File::open(&source)?;

        self.stream.write_padded(&block)?;
        self.stream.copy_padded(BufReader::new(file), header.size)?;

        debug!("Archived '{}' ({} bytes)", name, header.size);
        Ok(header)
    }

    /// Write the end sentinel and truncate the storage right after it
    ///
    /// Returns the final archive length.
    pub fn finish(mut self) -> Result<u64> {
        self.stream.write_end_sentinel()?;
        self.stream.truncate_here()
    }
}

/// Write a fresh archive at `archive` holding `names` in order
///
/// Existing content is discarded. A failing file aborts the call, leaving
/// whatever was written for earlier files in place.
pub fn create<S: AsRef<str>>(
    archive: &Path,
    names: &[S],
    config: &Config,
    identity: &dyn IdentityLookup,
) -> Result<()> {
    info!("Creating archive {:?} with {} file(s)", archive, names.len());

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(archive)
        .map_err(|source| ArchiveError::ArchiveOpen {
            path: archive.to_path_buf(),
            source,
        })?;

    write_entries(file, names, config, identity)
}

/// Add `names` to the end of an existing archive
///
/// New entries overwrite the old end sentinel; a new sentinel follows them.
pub fn append<S: AsRef<str>>(
    archive: &Path,
    names: &[S],
    config: &Config,
    identity: &dyn IdentityLookup,
) -> Result<()> {
    info!("Appending {} file(s) to archive {:?}", names.len(), archive);

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(archive)
        .map_err(|source| ArchiveError::ArchiveOpen {
            path: archive.to_path_buf(),
            source,
        })?;

    let mut scanner = Scanner::new(file).verify_checksums(config.verify_checksums);
    let append_at = scanner.end_of_data_offset()?;
    let mut file = scanner.into_inner();
    file.seek(std::io::SeekFrom::Start(append_at))?;
    debug!("Append point at offset {}", append_at);

    write_entries(file, names, config, identity)
}

fn write_entries<S: AsRef<str>>(
    file: File,
    names: &[S],
    config: &Config,
    identity: &dyn IdentityLookup,
) -> Result<()> {
    let mut writer = ArchiveWriter::new(file, identity, &config.working_dir);
    for name in names {
        writer.append_file(name.as_ref())?;
    }
    let len = writer.finish()?;
    debug!("Archive length now {} bytes", len);
    Ok(())
}
