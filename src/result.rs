//! Error types and the related `Result<T>`

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] io::Error),

    /// The source, or the directory the archive should be written to,
    /// doesn't exist.
    #[error("No such file or directory: {}", .0.display())]
    NotFound(PathBuf),

    /// A path couldn't be turned into an entry name
    /// (no final component, too long...)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The destination is the very file being zipped,
    /// so writing the archive would destroy its contents.
    #[error("{} is both the file to zip and the archive to write", .0.display())]
    SameFile(PathBuf),
}

impl ZipError {
    /// Maps an I/O error on `path` to [`ZipError::NotFound`] when that's what it is.
    pub(crate) fn at(path: &Path, e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            ZipError::NotFound(path.to_owned())
        } else {
            ZipError::Io(e)
        }
    }
}
