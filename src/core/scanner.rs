//! Sequential archive scanning
//!
//! The scanner walks an archive from its first block, one header at a time.
//! Content is never read here; callers that want it use
//! [`Scanner::content_reader`] before asking for the next entry.

use crate::error::{ArchiveError, Result};
use crate::header::{self, Header};
use crate::io::{BlockStream, BLOCK_SIZE};
use std::io::{Read, Seek, Take};
use tracing::{debug, trace};

/// Where an entry's content lives in the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// Offset of the first content byte (just past the header block)
    pub offset: u64,
    /// Unpadded content length, as declared by the header
    pub len: u64,
}

impl ContentRange {
    pub fn padded_len(&self) -> u64 {
        crate::io::padded_length(self.len)
    }

    /// Offset of the block following the padded content
    pub fn end(&self) -> u64 {
        self.offset + self.padded_len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Expecting a header or the end sentinel at `offset`
    AtHeader { offset: u64 },
    /// An entry was returned; its content still has to be skipped
    AfterEntry { content: ContentRange },
    /// End sentinel or physical end of file reached
    Done { end_of_data: u64 },
}

pub struct Scanner<R> {
    stream: BlockStream<R>,
    state: ScanState,
    verify_checksums: bool,
}

impl<R: Read + Seek> Scanner<R> {
    /// Scan `reader` from offset zero
    pub fn new(reader: R) -> Self {
        Scanner {
            stream: BlockStream::new(reader),
            state: ScanState::AtHeader { offset: 0 },
            verify_checksums: false,
        }
    }

    /// Fail with `ChecksumMismatch` on headers whose stored checksum is wrong
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Decode the next header, or `None` once the archive is exhausted
    ///
    /// A block shorter than 512 bytes counts as end of archive, so archives
    /// missing their sentinel still scan cleanly.
    pub fn next_entry(&mut self) -> Result<Option<(Header, ContentRange)>> {
        let offset = match self.state {
            ScanState::Done { .. } => return Ok(None),
            ScanState::AtHeader { offset } => {
                self.stream.seek_to(offset)?;
                offset
            }
            ScanState::AfterEntry { content } => {
                self.stream.seek_to(content.offset)?;
                self.stream.skip_entry(content.len)?
            }
        };

        let mut block = [0u8; BLOCK_SIZE];
        let filled = self.stream.read_block(&mut block)?;

        if filled < BLOCK_SIZE {
            trace!("Short header block ({} bytes) at offset {}", filled, offset);
            self.state = ScanState::Done {
                end_of_data: offset,
            };
            return Ok(None);
        }
        if header::is_end_block(&block) {
            trace!("End sentinel at offset {}", offset);
            self.state = ScanState::Done {
                end_of_data: offset,
            };
            return Ok(None);
        }

        if self.verify_checksums && !header::verify_checksum(&block) {
            let decoded = Header::from_bytes(&block);
            return Err(ArchiveError::ChecksumMismatch {
                name: decoded.name,
                stored: decoded.checksum,
                computed: header::checksum(&block),
            });
        }

        let header = Header::from_bytes(&block);
        let content = ContentRange {
            offset: offset + BLOCK_SIZE as u64,
            len: header.size,
        };
        debug!(
            "Scanned entry '{}' ({} bytes) at offset {}",
            header.name, header.size, offset
        );

        self.state = ScanState::AfterEntry { content };
        Ok(Some((header, content)))
    }

    /// Reader over the unpadded content of `range`
    pub fn content_reader(&mut self, range: &ContentRange) -> Result<Take<&mut R>> {
        self.stream.seek_to(range.offset)?;
        Ok(self.stream.get_mut().take(range.len))
    }

    /// Run to exhaustion and return the offset just before the end sentinel
    ///
    /// This is where new entries get appended.
    pub fn end_of_data_offset(&mut self) -> Result<u64> {
        loop {
            if let ScanState::Done { end_of_data } = self.state {
                return Ok(end_of_data);
            }
            self.next_entry()?;
        }
    }

    /// Names of every remaining entry, duplicates included, in physical order
    pub fn names(&mut self) -> Result<Vec<String>> {
        Ok(self.headers()?.into_iter().map(|h| h.name).collect())
    }

    /// Every remaining header in physical order
    pub fn headers(&mut self) -> Result<Vec<Header>> {
        let mut headers = Vec::new();
        while let Some((header, _)) = self.next_entry()? {
            headers.push(header);
        }
        Ok(headers)
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, ScanState::Done { .. })
    }

    pub fn into_inner(self) -> R {
        self.stream.into_inner()
    }
}

/// Names of all entries in `reader`, in physical order
pub fn list_names<R: Read + Seek>(reader: R) -> Result<Vec<String>> {
    Scanner::new(reader).names()
}

/// Offset at which the next entry of `reader` would be appended
pub fn end_of_data_offset<R: Read + Seek>(reader: R) -> Result<u64> {
    Scanner::new(reader).end_of_data_offset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{MAGIC, REGTYPE, VERSION};
    use std::io::{Cursor, Read};

    fn header(name: &str, size: u64) -> Header {
        Header {
            name: name.to_string(),
            mode: 0o644,
            uid: 0,
            gid: 0,
            size,
            mtime: 0,
            checksum: 0,
            type_flag: REGTYPE,
            magic: MAGIC,
            version: VERSION,
            uname: "root".to_string(),
            gname: "root".to_string(),
            dev_major: 0,
            dev_minor: 0,
            lossy_name: false,
        }
    }

    fn archive(entries: &[(&str, &[u8])], sentinel: bool) -> Vec<u8> {
        let mut stream = BlockStream::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            let block = header(name, data.len() as u64).to_bytes().unwrap();
            stream.write_padded(&block).unwrap();
            stream.write_padded(data).unwrap();
        }
        if sentinel {
            stream.write_end_sentinel().unwrap();
        }
        stream.into_inner().into_inner()
    }

    #[test]
    fn test_scan_entries_and_ranges() {
        let bytes = archive(&[("a", b"hello"), ("b", &[9u8; 600])], true);
        let mut scanner = Scanner::new(Cursor::new(bytes));

        let (h, range) = scanner.next_entry().unwrap().unwrap();
        assert_eq!(h.name, "a");
        assert_eq!(range, ContentRange { offset: 512, len: 5 });
        assert_eq!(range.end(), 1024);

        let (h, range) = scanner.next_entry().unwrap().unwrap();
        assert_eq!(h.name, "b");
        assert_eq!(range, ContentRange { offset: 1536, len: 600 });
        assert_eq!(range.padded_len(), 1024);

        assert!(scanner.next_entry().unwrap().is_none());
        assert!(scanner.is_done());
        assert!(scanner.next_entry().unwrap().is_none());
        assert_eq!(scanner.end_of_data_offset().unwrap(), 2560);
    }

    #[test]
    fn test_content_reader() {
        let bytes = archive(&[("a", b"hello"), ("b", b"world!")], true);
        let mut scanner = Scanner::new(Cursor::new(bytes));

        let (_, range) = scanner.next_entry().unwrap().unwrap();
        let mut text = String::new();
        scanner
            .content_reader(&range)
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "hello");

        // Reading content must not disturb the walk
        let (h, _) = scanner.next_entry().unwrap().unwrap();
        assert_eq!(h.name, "b");
    }

    #[test]
    fn test_list_names_keeps_duplicates() {
        let bytes = archive(&[("a", b"1"), ("b", b"2"), ("a", b"3")], true);
        assert_eq!(list_names(Cursor::new(bytes)).unwrap(), vec!["a", "b", "a"]);
    }

    #[test]
    fn test_empty_archive() {
        let bytes = archive(&[], true);
        assert!(list_names(Cursor::new(bytes.clone())).unwrap().is_empty());
        assert_eq!(end_of_data_offset(Cursor::new(bytes)).unwrap(), 0);
        assert_eq!(end_of_data_offset(Cursor::new(Vec::new())).unwrap(), 0);
    }

    #[test]
    fn test_missing_sentinel_is_end() {
        let bytes = archive(&[("a", b"hello")], false);
        assert_eq!(bytes.len(), 1024);
        assert_eq!(list_names(Cursor::new(bytes.clone())).unwrap(), vec!["a"]);
        assert_eq!(end_of_data_offset(Cursor::new(bytes)).unwrap(), 1024);
    }

    #[test]
    fn test_truncated_header_is_end() {
        let mut bytes = archive(&[("a", b"hello"), ("b", b"x")], false);
        bytes.truncate(1024 + 100);
        assert_eq!(list_names(Cursor::new(bytes.clone())).unwrap(), vec!["a"]);
        assert_eq!(end_of_data_offset(Cursor::new(bytes)).unwrap(), 1024);
    }

    #[test]
    fn test_checksum_verification() {
        let mut bytes = archive(&[("a", b"hello")], true);
        bytes[0] = b'z';

        // Lenient by default
        assert_eq!(list_names(Cursor::new(bytes.clone())).unwrap(), vec!["z"]);

        let mut scanner = Scanner::new(Cursor::new(bytes)).verify_checksums(true);
        assert!(matches!(
            scanner.next_entry(),
            Err(ArchiveError::ChecksumMismatch { ref name, .. }) if name == "z"
        ));
    }

    #[test]
    fn test_verification_passes_clean_archive() {
        let bytes = archive(&[("a", b"hello"), ("b", b"")], true);
        let mut scanner = Scanner::new(Cursor::new(bytes)).verify_checksums(true);
        assert_eq!(scanner.names().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_listing_is_repeatable() {
        let bytes = archive(&[("a", b"1"), ("b", b"2")], true);
        let first = list_names(Cursor::new(bytes.clone())).unwrap();
        let second = list_names(Cursor::new(bytes)).unwrap();
        assert_eq!(first, second);
    }
}
