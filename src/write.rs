//! Tools for writing a ZIP archive.
//!
//! To start writing an archive, wrap any [`Write`] in an [`ArchiveWriter`],
//! then add entries one at a time with [`ArchiveWriter::start_entry()`].
//!
//! The sink is never seeked, so each entry's CRC and sizes follow its data
//! in a data descriptor. This lets the archive stream through buffers
//! and checksums on its way to disk.
//!
//! [`Write`]: std::io::Write

use std::io::{self, Write};

use crc32fast::Hasher;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::*;

use crate::checksum::CountingWriter;
use crate::result::*;
use crate::spec::{self, DataDescriptor, DosDateTime, System};

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    /// The file is stored uncompressed
    None,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    #[default]
    Deflate,
}

impl CompressionMethod {
    fn to_u16(self) -> u16 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Deflate => 8,
        }
    }
}

/// Metadata for an entry about to be written
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryOptions {
    pub compression_method: CompressionMethod,

    /// When the file was last modified, in MS-DOS format
    pub last_modified: DosDateTime,

    /// Unix mode bits. When set, the entry is marked as made on Unix
    /// so readers can restore permissions.
    pub unix_mode: Option<u32>,
}

/// What the central directory needs to know about a finished entry
#[derive(Debug)]
struct WrittenEntry {
    name: Vec<u8>,
    flags: u16,
    compression_method: CompressionMethod,
    last_modified: DosDateTime,
    system: System,
    external_file_attributes: u32,
    header_offset: u64,
    descriptor: DataDescriptor,
}

impl WrittenEntry {
    fn central_directory_entry(&self) -> spec::CentralDirectoryEntry<'_> {
        spec::CentralDirectoryEntry {
            system: self.system,
            flags: self.flags,
            compression_method: self.compression_method.to_u16(),
            last_modified: self.last_modified,
            descriptor: self.descriptor,
            external_file_attributes: self.external_file_attributes,
            header_offset: self.header_offset,
            path: &self.name,
        }
    }
}

/// A ZIP archive being written
///
/// Nothing is written when the archive is dropped:
/// call [`finish()`](ArchiveWriter::finish) to add the central directory.
/// A dropped, unfinished archive is incomplete and unreadable.
pub struct ArchiveWriter<W: Write> {
    out: CountingWriter<W>,
    entries: Vec<WrittenEntry>,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            out: CountingWriter::new(inner),
            entries: Vec::new(),
        }
    }

    /// Number of entries finished so far
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Writes a local file header for `name` and returns a writer for its contents.
    ///
    /// Names are usually UTF-8, and flagged as such when they aren't plain ASCII.
    /// Other bytes are written as-is, unflagged, for readers to decode as best they can.
    ///
    /// The archive is borrowed until the entry is finished (or dropped),
    /// so entries can't interleave.
    pub fn start_entry<N: AsRef<[u8]>>(
        &mut self,
        name: N,
        options: &EntryOptions,
    ) -> ZipResult<EntryWriter<'_, W>> {
        let name = name.as_ref();
        let header_offset = self.out.position();
        let mut flags = spec::FLAG_DATA_DESCRIPTOR;
        if !name.is_ascii() && std::str::from_utf8(name).is_ok() {
            flags |= spec::FLAG_UTF8;
        }

        spec::LocalFileHeader {
            flags,
            compression_method: options.compression_method.to_u16(),
            last_modified: options.last_modified,
            path: name,
        }
        .write(&mut self.out)?;

        let (system, external_file_attributes) = match options.unix_mode {
            Some(mode) => (System::Unix, (mode & 0xFFFF) << 16),
            None => (System::Dos, 0),
        };
        let entry = WrittenEntry {
            name: name.to_vec(),
            flags,
            compression_method: options.compression_method,
            last_modified: options.last_modified,
            system,
            external_file_attributes,
            header_offset,
            descriptor: DataDescriptor {
                crc32: 0,
                compressed_size: 0,
                uncompressed_size: 0,
            },
        };
        trace!("Started {:?}", entry);

        let data_start = self.out.position();
        let sink = match options.compression_method {
            CompressionMethod::None => EntrySink::Stored(&mut self.out),
            CompressionMethod::Deflate => {
                EntrySink::Deflated(DeflateEncoder::new(&mut self.out, Compression::default()))
            }
        };

        Ok(EntryWriter {
            sink,
            hasher: Hasher::new(),
            uncompressed_size: 0,
            data_start,
            entry,
            entries: &mut self.entries,
        })
    }

    /// Writes the central directory and the end of central directory record,
    /// flushes, and hands back the underlying writer.
    pub fn finish(mut self) -> ZipResult<W> {
        let central_directory_offset = self.out.position();
        for entry in &self.entries {
            entry.central_directory_entry().write(&mut self.out)?;
        }
        let central_directory_size = self.out.position() - central_directory_offset;

        let eocdr = spec::EndOfCentralDirectory {
            entries: self.entries.len() as u64,
            central_directory_size,
            central_directory_offset,
        };
        trace!("{:?}", eocdr);
        eocdr.write(&mut self.out)?;

        self.out.flush()?;
        debug!(
            "Finished archive: {} entries, {} bytes",
            self.entries.len(),
            self.out.position()
        );
        Ok(self.out.into_inner())
    }
}

enum EntrySink<'a, W: Write> {
    Stored(&'a mut CountingWriter<W>),
    Deflated(DeflateEncoder<&'a mut CountingWriter<W>>),
}

/// Writes the contents of one entry.
///
/// Call [`finish()`](EntryWriter::finish) once all the data is written.
/// An entry dropped before then is left out of the central directory.
pub struct EntryWriter<'a, W: Write> {
    sink: EntrySink<'a, W>,
    hasher: Hasher,
    uncompressed_size: u64,
    data_start: u64,
    entry: WrittenEntry,
    entries: &'a mut Vec<WrittenEntry>,
}

impl<W: Write> Write for EntryWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = match &mut self.sink {
            EntrySink::Stored(w) => w.write(buf)?,
            EntrySink::Deflated(w) => w.write(buf)?,
        };
        self.hasher.update(&buf[..count]);
        self.uncompressed_size += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.sink {
            EntrySink::Stored(w) => w.flush(),
            EntrySink::Deflated(w) => w.flush(),
        }
    }
}

impl<W: Write> EntryWriter<'_, W> {
    /// Ends the compressed stream and writes the data descriptor.
    pub fn finish(self) -> ZipResult<()> {
        let EntryWriter {
            sink,
            hasher,
            uncompressed_size,
            data_start,
            mut entry,
            entries,
        } = self;

        let out = match sink {
            EntrySink::Stored(w) => w,
            EntrySink::Deflated(encoder) => encoder.finish()?,
        };
        let compressed_size = out.position() - data_start;

        entry.descriptor = DataDescriptor {
            crc32: hasher.finalize(),
            compressed_size,
            uncompressed_size,
        };
        entry.descriptor.write(out)?;
        trace!("Finished {:?}", entry);

        entries.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{Cursor, Read};

    fn stored() -> EntryOptions {
        EntryOptions {
            compression_method: CompressionMethod::None,
            ..Default::default()
        }
    }

    fn u16_at(bytes: &[u8], at: usize) -> u16 {
        u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap())
    }

    fn u32_at(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn write_empty_zip() {
        let archive = ArchiveWriter::new(Vec::new());
        let result = archive.finish().unwrap();
        assert_eq!(
            result,
            [80, 75, 5, 6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn write_stored_layout() {
        let mut archive = ArchiveWriter::new(Vec::new());
        let mut entry = archive.start_entry("hello.txt", &stored()).unwrap();
        entry.write_all(b"hello").unwrap();
        entry.finish().unwrap();
        assert_eq!(archive.entry_count(), 1);
        let bytes = archive.finish().unwrap();

        // Local header: 30 bytes + name
        assert_eq!(bytes[..4], [b'P', b'K', 3, 4]);
        assert_eq!(u16_at(&bytes, 6), spec::FLAG_DATA_DESCRIPTOR);
        assert_eq!(u32_at(&bytes, 14), 0); // CRC deferred
        assert_eq!(&bytes[30..39], b"hello.txt");
        assert_eq!(&bytes[39..44], b"hello");

        // Data descriptor
        assert_eq!(bytes[44..48], [b'P', b'K', 7, 8]);
        assert_eq!(u32_at(&bytes, 48), crc32fast::hash(b"hello"));
        assert_eq!(u32_at(&bytes, 52), 5);
        assert_eq!(u32_at(&bytes, 56), 5);

        // Central directory, then the end record
        assert_eq!(bytes[60..64], [b'P', b'K', 1, 2]);
        assert_eq!(u32_at(&bytes, 60 + 16), crc32fast::hash(b"hello"));
        assert_eq!(u32_at(&bytes, 60 + 42), 0); // header offset
        let eocdr = &bytes[bytes.len() - 22..];
        assert_eq!(eocdr[..4], [b'P', b'K', 5, 6]);
        assert_eq!(u16_at(eocdr, 10), 1);
        assert_eq!(u32_at(eocdr, 12), 46 + 9);
        assert_eq!(u32_at(eocdr, 16), 60);
        assert_eq!(bytes.len(), 60 + 55 + 22);
    }

    #[test]
    fn write_deflated_readable() {
        let text = "All work and no play makes Jack a dull boy. ".repeat(200);

        let mut archive = ArchiveWriter::new(Vec::new());
        let mut entry = archive
            .start_entry("jack.txt", &EntryOptions::default())
            .unwrap();
        entry.write_all(text.as_bytes()).unwrap();
        entry.finish().unwrap();
        let mut entry = archive.start_entry("empty", &EntryOptions::default()).unwrap();
        entry.flush().unwrap();
        entry.finish().unwrap();
        let bytes = archive.finish().unwrap();
        assert!(bytes.len() < text.len());

        let mut reader = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.len(), 2);

        let mut file = reader.by_index(0).unwrap();
        assert_eq!(file.name(), "jack.txt");
        assert_eq!(file.compression(), zip::CompressionMethod::Deflated);
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, text);
        drop(file);

        let mut file = reader.by_index(1).unwrap();
        assert_eq!(file.name(), "empty");
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        assert!(contents.is_empty());
    }

    #[test]
    fn write_utf8_name_and_mode() {
        let options = EntryOptions {
            unix_mode: Some(0o100644),
            ..stored()
        };
        let mut archive = ArchiveWriter::new(Vec::new());
        let mut entry = archive.start_entry("naïve.txt", &options).unwrap();
        entry.write_all(b"caf\xc3\xa9").unwrap();
        entry.finish().unwrap();
        let bytes = archive.finish().unwrap();

        assert_eq!(
            u16_at(&bytes, 6),
            spec::FLAG_DATA_DESCRIPTOR | spec::FLAG_UTF8
        );

        let mut reader = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let file = reader.by_index(0).unwrap();
        assert_eq!(file.name(), "naïve.txt");
        assert_eq!(file.unix_mode(), Some(0o100644));
    }

    #[test]
    fn abandoned_entry_is_left_out() {
        let mut archive = ArchiveWriter::new(Vec::new());
        {
            let mut entry = archive.start_entry("partial", &stored()).unwrap();
            entry.write_all(b"half of it").unwrap();
        }
        assert_eq!(archive.entry_count(), 0);
        let bytes = archive.finish().unwrap();

        let reader = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.len(), 0);
    }

    #[test]
    fn overlong_name() {
        let name = "x".repeat(u16::MAX as usize + 1);
        let mut archive = ArchiveWriter::new(Vec::new());
        assert!(matches!(
            archive.start_entry(&name, &stored()),
            Err(ZipError::InvalidPath(_))
        ));
    }

    #[test]
    fn write_raw_name_unflagged() {
        let mut archive = ArchiveWriter::new(Vec::new());
        let mut entry = archive.start_entry(b"caf\xe9.txt", &stored()).unwrap();
        entry.write_all(b"latin-1").unwrap();
        entry.finish().unwrap();
        let bytes = archive.finish().unwrap();

        // Not UTF-8, so not flagged as such
        assert_eq!(u16_at(&bytes, 6), spec::FLAG_DATA_DESCRIPTOR);
        assert_eq!(&bytes[30..38], b"caf\xe9.txt");

        let mut reader = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = reader.by_index(0).unwrap();
        assert_eq!(file.name_raw(), b"caf\xe9.txt");
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"latin-1");
    }

    #[test]
    fn write_more_entries_than_classic_zip_holds() {
        const COUNT: usize = u16::MAX as usize + 1;

        let mut archive = ArchiveWriter::new(Vec::new());
        for i in 0..COUNT {
            let entry = archive
                .start_entry(format!("{:05x}", i), &stored())
                .unwrap();
            entry.finish().unwrap();
        }
        assert_eq!(archive.entry_count(), COUNT);
        let bytes = archive.finish().unwrap();

        // Zip64 end record and locator, then the classic record saying "look there"
        let classic = &bytes[bytes.len() - 22..];
        assert_eq!(u16_at(classic, 10), u16::MAX);
        let locator = &bytes[bytes.len() - 42..bytes.len() - 22];
        assert_eq!(locator[..4], [b'P', b'K', 6, 7]);

        let mut reader = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.len(), COUNT);
        assert_eq!(reader.by_index(COUNT - 1).unwrap().name(), "10000");
    }
}
