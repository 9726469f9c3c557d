//! Block-level I/O for tar archives
//!
//! A tar archive is a sequence of 512-byte blocks. Every header occupies one
//! block, every content region is zero-padded up to a block boundary, and the
//! archive ends with two all-zero blocks.

use crate::error::Result;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// Size of one archive block in bytes
pub const BLOCK_SIZE: usize = 512;

/// Number of all-zero blocks terminating an archive
pub const TRAILING_BLOCKS: usize = 2;

const ZERO_BLOCK: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

/// Round `n` up to the next multiple of [`BLOCK_SIZE`]
pub fn padded_length(n: u64) -> u64 {
    n.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64
}

/// Number of zero bytes that must follow `n` content bytes
pub fn padding_for(n: u64) -> u64 {
    padded_length(n) - n
}

/// Storage whose length can be cut back after writing
///
/// Appending over an existing end sentinel can leave stale bytes past the new
/// one; the writer truncates them away through this trait.
pub trait SetLen {
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl SetLen for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

impl SetLen for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length too large"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

/// An archive viewed as a sequence of 512-byte blocks
pub struct BlockStream<F> {
    inner: F,
}

impl<F> BlockStream<F> {
    pub fn new(inner: F) -> Self {
        BlockStream { inner }
    }

    pub fn get_ref(&self) -> &F {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut F {
        &mut self.inner
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: Seek> BlockStream<F> {
    /// Current byte offset
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    /// Move to an absolute byte offset
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Advance past the padded content of an entry declaring `declared_size`
    /// bytes, without reading it
    pub fn skip_entry(&mut self, declared_size: u64) -> Result<u64> {
        let skip = i64::try_from(padded_length(declared_size)).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "entry size out of range")
        })?;
        Ok(self.inner.seek(SeekFrom::Current(skip))?)
    }
}

impl<F: Read> BlockStream<F> {
    /// Read up to one block, returning how many bytes were filled
    ///
    /// Stops early only at end of file; anything short of [`BLOCK_SIZE`]
    /// means the archive ends inside this block.
    pub fn read_block(&mut self, block: &mut [u8; BLOCK_SIZE]) -> Result<usize> {
        fill_buf(&mut self.inner, block)
    }
}

impl<F: Write> BlockStream<F> {
    /// Write `bytes` followed by zero-fill up to the next block boundary
    pub fn write_padded(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        let pad = padding_for(bytes.len() as u64) as usize;
        self.inner.write_all(&ZERO_BLOCK[..pad])?;
        Ok(())
    }

    /// Stream exactly `size` bytes from `source` into padded blocks
    ///
    /// Fails with `UnexpectedEof` if `source` runs dry before `size` bytes.
    pub fn copy_padded<R: Read>(&mut self, source: R, size: u64) -> Result<u64> {
        let mut source = source.take(size);
        let mut block = [0u8; BLOCK_SIZE];
        let mut copied = 0u64;

        loop {
            let n = fill_buf(&mut source, &mut block)?;
            if n == 0 {
                break;
            }
            block[n..].fill(0);
            self.inner.write_all(&block)?;
            copied += n as u64;
            if n < BLOCK_SIZE {
                break;
            }
        }

        if copied != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended after {} of {} bytes", copied, size),
            )
            .into());
        }

        Ok(copied)
    }

    /// Write the two all-zero blocks that terminate an archive
    pub fn write_end_sentinel(&mut self) -> Result<()> {
        for _ in 0..TRAILING_BLOCKS {
            self.inner.write_all(&ZERO_BLOCK)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

impl<F: Write + Seek + SetLen> BlockStream<F> {
    /// Cut the storage off at the current position
    pub fn truncate_here(&mut self) -> Result<u64> {
        let end = self.inner.stream_position()?;
        self.inner.flush()?;
        self.inner.set_len(end)?;
        Ok(end)
    }
}

/// Read until `buf` is full or the reader is exhausted
fn fill_buf<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_length() {
        assert_eq!(padded_length(0), 0);
        assert_eq!(padded_length(1), 512);
        assert_eq!(padded_length(511), 512);
        assert_eq!(padded_length(512), 512);
        assert_eq!(padded_length(513), 1024);
        assert_eq!(padding_for(100), 412);
        assert_eq!(padding_for(1024), 0);
    }

    #[test]
    fn test_write_padded_aligns_stream() {
        let mut stream = BlockStream::new(Cursor::new(Vec::new()));
        stream.write_padded(b"Hello").unwrap();
        assert_eq!(stream.position().unwrap(), 512);

        let bytes = stream.into_inner().into_inner();
        assert_eq!(&bytes[..5], b"Hello");
        assert!(bytes[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_padded_empty_writes_nothing() {
        let mut stream = BlockStream::new(Cursor::new(Vec::new()));
        stream.write_padded(&[]).unwrap();
        assert_eq!(stream.position().unwrap(), 0);
    }

    #[test]
    fn test_copy_padded_exact_size() {
        let data = vec![0xAB; 1000];
        let mut stream = BlockStream::new(Cursor::new(Vec::new()));
        let copied = stream.copy_padded(&data[..], 1000).unwrap();
        assert_eq!(copied, 1000);

        let bytes = stream.into_inner().into_inner();
        assert_eq!(bytes.len(), 1024);
        assert!(bytes[..1000].iter().all(|&b| b == 0xAB));
        assert!(bytes[1000..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_copy_padded_ignores_growth() {
        let data = vec![7u8; 600];
        let mut stream = BlockStream::new(Cursor::new(Vec::new()));
        stream.copy_padded(&data[..], 100).unwrap();
        assert_eq!(stream.into_inner().into_inner().len(), 512);
    }

    #[test]
    fn test_copy_padded_short_source() {
        let data = vec![1u8; 10];
        let mut stream = BlockStream::new(Cursor::new(Vec::new()));
        let err = stream.copy_padded(&data[..], 20).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ArchiveError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof
        ));
    }

    #[test]
    fn test_skip_entry() {
        let mut stream = BlockStream::new(Cursor::new(vec![0u8; 4096]));
        assert_eq!(stream.skip_entry(1).unwrap(), 512);
        assert_eq!(stream.skip_entry(0).unwrap(), 512);
        assert_eq!(stream.skip_entry(1025).unwrap(), 2048);
    }

    #[test]
    fn test_read_block_short() {
        let mut stream = BlockStream::new(Cursor::new(vec![1u8; 700]));
        let mut block = [0u8; BLOCK_SIZE];
        assert_eq!(stream.read_block(&mut block).unwrap(), 512);
        assert_eq!(stream.read_block(&mut block).unwrap(), 188);
        assert_eq!(stream.read_block(&mut block).unwrap(), 0);
    }

    #[test]
    fn test_sentinel_and_truncate() {
        let mut stream = BlockStream::new(Cursor::new(vec![0xFF; 5000]));
        stream.write_end_sentinel().unwrap();
        let end = stream.truncate_here().unwrap();
        assert_eq!(end, 1024);

        let bytes = stream.into_inner().into_inner();
        assert_eq!(bytes.len(), 1024);
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
