//! ziptree zips a file, or every regular file under a directory,
//! into a flat ZIP archive:
//!
//! ```no_run
//! // Every file under some/dir becomes an entry named by its base name,
//! // so some/dir/sub/notes.txt is stored as notes.txt.
//! ziptree::zip("some/dir", "out.zip")?;
//! # Ok::<(), ziptree::result::ZipError>(())
//! ```
//!
//! Directories are walked depth first, children in name order,
//! so the same tree always produces the same list of entries.
//! Nothing deduplicates base names: `a/x.txt` and `b/x.txt`
//! both become entries named `x.txt`.
//!
//! For more control (stored entries, skipping symbolic links,
//! hearing about each file as it's added), build an [`Archiver`]:
//!
//! ```no_run
//! use std::path::Path;
//! use ziptree::*;
//!
//! struct Printer;
//!
//! impl EntryLog for Printer {
//!     fn entry_added(&self, name: &str, source: &Path) {
//!         println!("{name} <- {}", source.display());
//!     }
//! }
//!
//! Archiver::new()
//!     .compression(CompressionMethod::None)
//!     .symlinks(Symlinks::Skip)
//!     .with_log(Printer)
//!     .zip("some/dir", "out.zip")?;
//! # Ok::<(), ziptree::result::ZipError>(())
//! ```
//!
//! The archive is written front to back without seeking:
//! each entry's CRC-32 and sizes follow its data in a data descriptor,
//! and the central directory comes last.
//! The [`write`] module exposes that writer for building archives
//! from things other than files on disk.

pub mod archiver;
pub mod checksum;
pub mod entry_log;
pub mod result;
pub mod write;

pub use archiver::{entry_name, Archiver, Symlinks, BUFFER_SIZE};
pub use entry_log::{EntryLog, Facade, Silent, SkipReason};
pub use write::{ArchiveWriter, CompressionMethod, EntryOptions};

mod spec;

pub use spec::DosDateTime;

use std::path::{Path, PathBuf};

use result::ZipResult;

/// Zips `source` (a file or directory) into a new archive at `destination`
/// with the default [`Archiver`] settings, returning the destination.
///
/// Fails with [`ZipError::NotFound`](result::ZipError::NotFound)
/// if `source` or `destination`'s directory doesn't exist,
/// with [`ZipError::SameFile`](result::ZipError::SameFile)
/// if `destination` is the very file being zipped,
/// and with [`ZipError::Io`](result::ZipError::Io) on any read or write failure.
pub fn zip<P: AsRef<Path>, Q: AsRef<Path>>(source: P, destination: Q) -> ZipResult<PathBuf> {
    Archiver::new().zip(source, destination)
}
