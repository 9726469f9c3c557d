//! Archive engine
//!
//! - [`header`] - 512-byte ustar header codec and checksum
//! - [`io`] - block stream: padding, skipping, end sentinel
//! - [`scanner`] - sequential walk over existing archives
//! - [`writer`] - create/append entry emission
//! - [`identity`] - owner/group name resolution
//! - [`config`] - engine settings

pub mod config;
pub mod error;
pub mod header;
pub mod identity;
pub mod io;
pub mod scanner;
pub mod writer;

pub use config::Config;
pub use error::{ArchiveError, IdentityKind, Result};
pub use header::Header;
pub use identity::{IdentityLookup, StaticIdentity, SystemIdentity};
pub use scanner::{ContentRange, Scanner};
pub use writer::ArchiveWriter;
