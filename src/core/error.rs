use std::path::PathBuf;
use thiserror::Error;

/// Which identity table a failed lookup went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Owner,
    Group,
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityKind::Owner => f.write_str("owner"),
            IdentityKind::Group => f.write_str("group"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to stat file {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to look up {kind} name for id {id} of file {}", path.display())]
    IdentityLookup {
        kind: IdentityKind,
        id: u32,
        path: PathBuf,
    },

    #[error("Unable to open archive file {}: {source}", path.display())]
    ArchiveOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Files not present in archive: {}", missing.join(", "))]
    NotSubset { missing: Vec<String> },

    #[error("Extraction of file with path not allowed: {0}")]
    UnsafeName(String),

    #[error("File name too long for a ustar header ({len} bytes, max 100): {name}")]
    NameTooLong { name: String, len: usize },

    #[error("Value {value} does not fit the {field} header field")]
    FieldOverflow { field: &'static str, value: u64 },

    #[error("Not a regular file: {}", path.display())]
    UnsupportedFileType { path: PathBuf },

    #[error("Header checksum mismatch for {name}: stored {stored:o}, computed {computed:o}")]
    ChecksumMismatch {
        name: String,
        stored: u32,
        computed: u32,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
