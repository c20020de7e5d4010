//! Hooks for hearing about each file as it's archived (or passed over).
//!
//! An [`Archiver`](crate::Archiver) reports through whatever [`EntryLog`]
//! it was built with. The default, [`Silent`], drops everything;
//! [`Facade`] forwards to the [`log`] crate.

use std::io;
use std::path::Path;

use log::*;

/// Why a child of a directory being zipped didn't become an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A symbolic link, and we were told not to follow links.
    Symlink,
    /// A symbolic link pointing at nothing.
    BrokenLink,
    /// A directory already being zipped further up the tree.
    Cycle,
    /// Not a regular file or directory (FIFO, socket, device...).
    SpecialFile,
    /// The archive we're writing to.
    Destination,
    /// A directory whose contents couldn't be listed.
    Unlistable(io::ErrorKind),
}

pub trait EntryLog {
    /// Called once an entry named `name` has been written from `source`.
    fn entry_added(&self, name: &str, source: &Path);

    /// Called when `source` is passed over.
    fn entry_skipped(&self, _source: &Path, _reason: SkipReason) {}
}

impl<T: EntryLog + ?Sized> EntryLog for &T {
    fn entry_added(&self, name: &str, source: &Path) {
        (**self).entry_added(name, source)
    }

    fn entry_skipped(&self, source: &Path, reason: SkipReason) {
        (**self).entry_skipped(source, reason)
    }
}

/// Says nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl EntryLog for Silent {
    fn entry_added(&self, _name: &str, _source: &Path) {}
}

/// Logs through the `log` facade: additions at debug level,
/// surprising skips as warnings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Facade;

impl EntryLog for Facade {
    fn entry_added(&self, name: &str, source: &Path) {
        debug!("Adding zip entry: {name} (from {})", source.display());
    }

    fn entry_skipped(&self, source: &Path, reason: SkipReason) {
        match reason {
            SkipReason::Symlink => debug!("Skipping symbolic link {}", source.display()),
            SkipReason::SpecialFile => debug!("Skipping special file {}", source.display()),
            SkipReason::Destination => debug!("Not adding the archive to itself"),
            SkipReason::BrokenLink => warn!("Skipping broken link {}", source.display()),
            SkipReason::Cycle => warn!(
                "Skipping {}: it links back to a directory being zipped",
                source.display()
            ),
            SkipReason::Unlistable(kind) => warn!(
                "Couldn't list {} ({kind}); treating it as empty",
                source.display()
            ),
        }
    }
}
