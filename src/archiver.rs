//! Walking a file or directory tree into a ZIP archive.

use std::ffi::OsStr;
use std::fs::{self, File, Metadata};
use std::io::{self, prelude::*, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::*;

use crate::checksum::Adler32Writer;
use crate::entry_log::{EntryLog, Silent, SkipReason};
use crate::result::*;
use crate::spec::DosDateTime;
use crate::write::{ArchiveWriter, CompressionMethod, EntryOptions};

/// Files are copied into the archive this many bytes at a time.
pub const BUFFER_SIZE: usize = 2048;

/// What to do with symbolic links found inside a directory.
///
/// The source path itself is always followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Symlinks {
    /// Archive whatever the link points to.
    /// Links back up the tree being zipped are skipped.
    #[default]
    Follow,
    /// Leave links out.
    Skip,
}

/// Zips files and directory trees.
///
/// Every regular file becomes one entry, named by its base name.
/// Directories don't get entries of their own, so `a/x.txt` and `b/x.txt`
/// both land in the archive as `x.txt`.
///
/// ```no_run
/// use ziptree::{Archiver, CompressionMethod, Facade};
///
/// let archiver = Archiver::new()
///     .compression(CompressionMethod::None)
///     .with_log(Facade);
/// archiver.zip("some/dir", "out.zip")?;
/// # Ok::<(), ziptree::result::ZipError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Archiver<L = Silent> {
    compression: CompressionMethod,
    symlinks: Symlinks,
    log: L,
}

impl Archiver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<L: EntryLog> Archiver<L> {
    /// Reports each entry to `log` instead.
    pub fn with_log<M: EntryLog>(self, log: M) -> Archiver<M> {
        Archiver {
            compression: self.compression,
            symlinks: self.symlinks,
            log,
        }
    }

    pub fn compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    pub fn symlinks(mut self, symlinks: Symlinks) -> Self {
        self.symlinks = symlinks;
        self
    }

    /// Zips `source` (a file or a directory) into a new archive at `destination`,
    /// replacing anything already there.
    ///
    /// On error, whatever was written to `destination` is not a usable archive.
    pub fn zip<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        source: P,
        destination: Q,
    ) -> ZipResult<PathBuf> {
        let source = source.as_ref();
        let destination = destination.as_ref();

        // Check the source first so we don't leave an empty archive lying around.
        let metadata = fs::metadata(source).map_err(|e| ZipError::at(source, e))?;

        // Creating the destination truncates it. Make sure that's not our input.
        if metadata.is_file() {
            if let Ok(existing) = fs::metadata(destination) {
                if file_id(source, &metadata)? == file_id(destination, &existing)? {
                    return Err(ZipError::SameFile(destination.to_owned()));
                }
            }
        }

        let file = File::create(destination).map_err(|e| ZipError::at(destination, e))?;
        // If we're writing into the tree we're zipping, don't zip the zip.
        let exclude = file_id(destination, &file.metadata()?)?;

        let sink = BufWriter::new(Adler32Writer::new(file));
        let sink = self.write_tree(source, &metadata, Some(&exclude), sink)?;
        let checked = sink.into_inner().map_err(|e| e.into_error())?;
        let checksum = checked.checksum();
        // Dropping a file swallows errors; make sure everything landed.
        checked.into_inner().sync_all()?;
        debug!(
            "Wrote {} (Adler-32 {:08x})",
            destination.display(),
            checksum
        );
        Ok(destination.to_owned())
    }

    /// Zips `source` into `sink`, returning the sink once the archive is finished.
    pub fn write_archive<W: Write>(&self, source: &Path, sink: W) -> ZipResult<W> {
        let metadata = fs::metadata(source).map_err(|e| ZipError::at(source, e))?;
        self.write_tree(source, &metadata, None, sink)
    }

    fn write_tree<W: Write>(
        &self,
        source: &Path,
        metadata: &Metadata,
        exclude: Option<&FileId>,
        sink: W,
    ) -> ZipResult<W> {
        let mut archive = ArchiveWriter::new(sink);
        if metadata.is_dir() {
            let mut walk = Walk {
                archiver: self,
                archive: &mut archive,
                ancestors: vec![fs::canonicalize(source)?],
                exclude,
                buffer: [0; BUFFER_SIZE],
            };
            walk.directory(source)?;
        } else {
            let mut buffer = [0; BUFFER_SIZE];
            self.add_entry(&mut archive, source, metadata, &mut buffer)?;
        }
        archive.finish()
    }

    fn add_entry<W: Write>(
        &self,
        archive: &mut ArchiveWriter<W>,
        path: &Path,
        metadata: &Metadata,
        buffer: &mut [u8; BUFFER_SIZE],
    ) -> ZipResult<()> {
        let name = entry_name(path)?;
        let options = EntryOptions {
            compression_method: self.compression,
            last_modified: last_modified(metadata),
            unix_mode: unix_mode(metadata),
        };

        // Open the file before the entry so a missing file doesn't leave a dangling header.
        let mut source = File::open(path)?;
        let mut entry = archive.start_entry(&name, &options)?;
        loop {
            let count = match source.read(&mut buffer[..]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            entry.write_all(&buffer[..count])?;
        }
        entry.finish()?;

        self.log.entry_added(&String::from_utf8_lossy(&name), path);
        Ok(())
    }
}

/// One directory traversal's worth of state
struct Walk<'a, 'b, L, W: Write> {
    archiver: &'a Archiver<L>,
    archive: &'a mut ArchiveWriter<W>,
    /// Canonical paths of the directories we're inside of, outermost first
    ancestors: Vec<PathBuf>,
    exclude: Option<&'b FileId>,
    buffer: [u8; BUFFER_SIZE],
}

/// A directory's child, sorted out
enum Child {
    Directory,
    File(Metadata),
    Skip(SkipReason),
}

impl<L: EntryLog, W: Write> Walk<'_, '_, L, W> {
    /// Adds every file under `dir`, depth first.
    fn directory(&mut self, dir: &Path) -> ZipResult<()> {
        for child in self.children(dir) {
            match self.classify(&child)? {
                Child::Directory => {
                    let canonical = fs::canonicalize(&child)?;
                    if self.ancestors.contains(&canonical) {
                        self.skip(&child, SkipReason::Cycle);
                        continue;
                    }
                    self.ancestors.push(canonical);
                    self.directory(&child)?;
                    self.ancestors.pop();
                }
                Child::File(metadata) => {
                    if self.is_excluded(&child, &metadata)? {
                        self.skip(&child, SkipReason::Destination);
                        continue;
                    }
                    self.archiver
                        .add_entry(self.archive, &child, &metadata, &mut self.buffer)?;
                }
                Child::Skip(reason) => self.skip(&child, reason),
            }
        }
        Ok(())
    }

    /// Lists `dir`, sorted by name so archives come out the same every time.
    ///
    /// A directory we can't list is treated as empty.
    fn children(&self, dir: &Path) -> Vec<PathBuf> {
        let listing = fs::read_dir(dir).and_then(|entries| {
            entries
                .map(|entry| entry.map(|e| e.path()))
                .collect::<io::Result<Vec<_>>>()
        });
        match listing {
            Ok(mut children) => {
                children.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
                children
            }
            Err(e) => {
                self.skip(dir, SkipReason::Unlistable(e.kind()));
                Vec::new()
            }
        }
    }

    fn classify(&self, path: &Path) -> ZipResult<Child> {
        let mut metadata = fs::symlink_metadata(path)?;
        if metadata.file_type().is_symlink() {
            if self.archiver.symlinks == Symlinks::Skip {
                return Ok(Child::Skip(SkipReason::Symlink));
            }
            metadata = match fs::metadata(path) {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Ok(Child::Skip(SkipReason::BrokenLink))
                }
                Err(e) => return Err(e.into()),
            };
        }

        Ok(if metadata.is_dir() {
            Child::Directory
        } else if metadata.is_file() {
            Child::File(metadata)
        } else {
            Child::Skip(SkipReason::SpecialFile)
        })
    }

    /// Is this the archive we're writing, by whatever name or link?
    fn is_excluded(&self, path: &Path, metadata: &Metadata) -> ZipResult<bool> {
        match self.exclude {
            Some(exclude) => Ok(file_id(path, metadata)? == *exclude),
            None => Ok(false),
        }
    }

    fn skip(&self, path: &Path, reason: SkipReason) {
        self.archiver.log.entry_skipped(path, reason);
    }
}

/// The name a file gets in the archive: its base name, with the rest of the path dropped.
///
/// On Unix, names that aren't UTF-8 keep their bytes as-is.
///
/// ```
/// # use std::path::Path;
/// # use ziptree::entry_name;
/// assert_eq!(entry_name(Path::new("some/dir/notes.txt"))?, b"notes.txt");
/// # Ok::<(), ziptree::result::ZipError>(())
/// ```
pub fn entry_name(path: &Path) -> ZipResult<Vec<u8>> {
    let base = path.file_name().ok_or_else(|| {
        ZipError::InvalidPath(format!("{} doesn't end in a file name", path.display()))
    })?;
    Ok(name_bytes(base))
}

#[cfg(unix)]
fn name_bytes(name: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    name.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn name_bytes(name: &OsStr) -> Vec<u8> {
    name.to_string_lossy().into_owned().into_bytes()
}

/// Identifies a file however it's reached: by another name, a hard link, or a symbolic link.
#[cfg(unix)]
type FileId = (u64, u64);

#[cfg(unix)]
fn file_id(_path: &Path, metadata: &Metadata) -> ZipResult<FileId> {
    use std::os::unix::fs::MetadataExt;
    Ok((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
type FileId = PathBuf;

#[cfg(not(unix))]
fn file_id(path: &Path, _metadata: &Metadata) -> ZipResult<FileId> {
    Ok(fs::canonicalize(path)?)
}

/// The file's modification time in local time, or now if the platform won't say.
fn last_modified(metadata: &Metadata) -> DosDateTime {
    let local: DateTime<Local> = match metadata.modified() {
        Ok(time) => time.into(),
        Err(_) => Local::now(),
    };
    DosDateTime::from_naive(local.naive_local())
}

#[cfg(unix)]
fn unix_mode(metadata: &Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode())
}

#[cfg(not(unix))]
fn unix_mode(_metadata: &Metadata) -> Option<u32> {
    None
}
