//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`write`] module.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [_Zip Files: History, Explanation and Implementation_]
//! is also a fantastic resource and a great read.
//!
//! [`write`]: ../write/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [_Zip Files: History, Explanation and Implementation_]: https://www.hanshq.net/zip.html

use std::io::{self, Write};

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Central directory magic number
const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];
/// Data descriptor magic number
const DATA_DESCRIPTOR_MAGIC: [u8; 4] = [b'P', b'K', 7, 8];
/// Zip64 end of central directory magic number
const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];

/// Version 2.0: DEFLATE, and data descriptors after file data.
pub const VERSION_NEEDED: u16 = 20;
/// Version 4.5: Zip64 format extensions
pub const VERSION_ZIP64: u16 = 45;

/// Header ID of the Zip64 extended information extra field
const ZIP64_EXTRA_FIELD: u16 = 0x0001;

/// The OS a file in the archive was compressed on.
/// Tells readers how to interpret the external attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum System {
    Dos,
    Unix,
}

impl System {
    /// The "version made by" field.
    pub fn source_version(self) -> u16 {
        // 4.4.2.1 The upper byte indicates the compatibility of the file
        // attribute information. [...]
        //
        //  0 - MS-DOS and OS/2 (FAT / VFAT / FAT32 file systems)
        //  3 - UNIX
        //
        // 4.4.2.3 The lower byte indicates the ZIP specification version
        // (the version of this document) supported by the software
        // used to encode the file.
        let system: u16 = match self {
            System::Dos => 0,
            System::Unix => 3,
        };
        (system << 8) | VERSION_ZIP64
    }
}

/// Bit 3: the CRC and sizes are zero in the local header
/// and follow the file data in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// Bit 11: Language encoding flag (EFS). If this bit is set,
/// the filename and comment fields for this file
/// MUST be encoded using UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Writes a little-endian u32.
fn write_u32<W: Write>(out: &mut W, value: u32) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

/// Writes a little-endian u16.
fn write_u16<W: Write>(out: &mut W, value: u16) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

/// Writes a little-endian u64.
fn write_u64<W: Write>(out: &mut W, value: u64) -> io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

/// Splits a size or offset into what goes in its classic 32-bit field
/// and, if it doesn't fit, the 64-bit value for the Zip64 extra field.
///
/// `0xFFFFFFFF` itself is reserved: it tells readers to look for a Zip64 extra field.
fn zip64_split(value: u64) -> (u32, Option<u64>) {
    if value >= u32::MAX as u64 {
        (u32::MAX, Some(value))
    } else {
        (value as u32, None)
    }
}

/// The length of a file name, which ZIP gives 16 bits.
fn path_length(path: &[u8]) -> ZipResult<u16> {
    u16::try_from(path.len()).map_err(|_| {
        ZipError::InvalidPath(format!(
            "File name is {} bytes long; ZIP allows {}",
            path.len(),
            u16::MAX
        ))
    })
}

/// A timestamp in MS-DOS format, as ZIP stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl Default for DosDateTime {
    /// 1980-01-01 00:00:00, the earliest time MS-DOS can represent.
    fn default() -> Self {
        Self {
            time: 0,
            date: (1 << 5) | 1,
        }
    }
}

impl DosDateTime {
    /// Converts a local date and time, clamping it into the range
    /// MS-DOS timestamps cover (1980 through 2107).
    pub fn from_naive(datetime: NaiveDateTime) -> Self {
        let year = datetime.year();
        if year < 1980 {
            return Self::default();
        }
        if year > 2107 {
            return Self {
                time: (23 << 11) | (59 << 5) | (58 / 2),
                date: (127 << 9) | (12 << 5) | 31,
            };
        }

        // MSDOS uses 2-second precision
        let time = (datetime.hour() << 11) | (datetime.minute() << 5) | (datetime.second() / 2);
        // MSDOS uses years since 1980
        let date = ((year as u32 - 1980) << 9) | (datetime.month() << 5) | datetime.day();
        Self {
            time: time as u16,
            date: date as u16,
        }
    }
}

/// A local file header
///
/// Precedes each file's data. We always stream, so the CRC and sizes
/// are left zero and written to a [`DataDescriptor`] afterwards.
#[derive(Debug)]
pub struct LocalFileHeader<'a> {
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified: DosDateTime,
    pub path: &'a [u8],
}

impl LocalFileHeader<'_> {
    pub fn write<W: Write>(&self, out: &mut W) -> ZipResult<()> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        let path_length = path_length(self.path)?;
        out.write_all(&LOCAL_FILE_HEADER_MAGIC)?;
        write_u16(out, VERSION_NEEDED)?;
        write_u16(out, self.flags)?;
        write_u16(out, self.compression_method)?;
        write_u16(out, self.last_modified.time)?;
        write_u16(out, self.last_modified.date)?;
        // 4.4.4 [...] If bit 3 of the general purpose bit flag is set,
        // these fields are set to zero in the local header and the
        // correct values are put in the data descriptor
        // and in the central directory.
        write_u32(out, 0)?;
        write_u32(out, 0)?;
        write_u32(out, 0)?;
        write_u16(out, path_length)?;
        write_u16(out, 0)?;
        out.write_all(self.path)?;
        Ok(())
    }
}

/// The data descriptor following a streamed file's data.
#[derive(Debug, Clone, Copy)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Do the sizes need more than 32 bits?
    pub fn is_zip64(&self) -> bool {
        self.compressed_size >= u32::MAX as u64 || self.uncompressed_size >= u32::MAX as u64
    }

    pub fn write<W: Write>(&self, out: &mut W) -> ZipResult<()> {
        // 4.3.9.3 Although not originally assigned a signature, the value
        // 0x08074b50 has commonly been adopted as a signature value
        // for the data descriptor record.  Implementers SHOULD write
        // ZIP files using this signature value.
        //
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        //
        // 4.3.9.2 When compressing files, compressed and uncompressed sizes
        // SHOULD be stored in ZIP64 format (as 8 byte values) when a
        // file's size exceeds 0xFFFFFFFF.
        out.write_all(&DATA_DESCRIPTOR_MAGIC)?;
        write_u32(out, self.crc32)?;
        if self.is_zip64() {
            write_u64(out, self.compressed_size)?;
            write_u64(out, self.uncompressed_size)?;
        } else {
            write_u32(out, self.compressed_size as u32)?;
            write_u32(out, self.uncompressed_size as u32)?;
        }
        Ok(())
    }
}

/// A central directory entry
///
/// Each of these records contains information about a file
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub system: System,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified: DosDateTime,
    pub descriptor: DataDescriptor,
    pub external_file_attributes: u32,
    pub header_offset: u64,
    pub path: &'a [u8],
}

impl CentralDirectoryEntry<'_> {
    pub fn write<W: Write>(&self, out: &mut W) -> ZipResult<()> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        let path_length = path_length(self.path)?;
        let (uncompressed_size, zip64_uncompressed) =
            zip64_split(self.descriptor.uncompressed_size);
        let (compressed_size, zip64_compressed) = zip64_split(self.descriptor.compressed_size);
        let (header_offset, zip64_offset) = zip64_split(self.header_offset);

        // 4.5.3 -Zip64 Extended Information Extra Field (0x0001):
        //
        // The order of the fields in the zip64 extended
        // information record is fixed, but the fields MUST
        // only appear if the corresponding Local or Central
        // directory record field is set to 0xFFFF or 0xFFFFFFFF.
        let zip64: Vec<u64> = [zip64_uncompressed, zip64_compressed, zip64_offset]
            .into_iter()
            .flatten()
            .collect();
        let (version_needed, extra_field_length) = if zip64.is_empty() {
            (VERSION_NEEDED, 0)
        } else {
            (VERSION_ZIP64, 4 + 8 * zip64.len() as u16)
        };

        out.write_all(&CENTRAL_DIRECTORY_MAGIC)?;
        write_u16(out, self.system.source_version())?;
        write_u16(out, version_needed)?;
        write_u16(out, self.flags)?;
        write_u16(out, self.compression_method)?;
        write_u16(out, self.last_modified.time)?;
        write_u16(out, self.last_modified.date)?;
        write_u32(out, self.descriptor.crc32)?;
        write_u32(out, compressed_size)?;
        write_u32(out, uncompressed_size)?;
        write_u16(out, path_length)?;
        write_u16(out, extra_field_length)?;
        write_u16(out, 0)?; // comment
        write_u16(out, 0)?; // disk
        write_u16(out, 0)?; // internal attributes
        write_u32(out, self.external_file_attributes)?;
        write_u32(out, header_offset)?;
        out.write_all(self.path)?;
        if !zip64.is_empty() {
            write_u16(out, ZIP64_EXTRA_FIELD)?;
            write_u16(out, 8 * zip64.len() as u16)?;
            for value in zip64 {
                write_u64(out, value)?;
            }
        }
        Ok(())
    }
}

/// The End of central directory record
///
/// Written at the very back of the archive so readers can find
/// the central directory. Multi-disk fields all say "disk zero".
///
/// When the counts or offsets outgrow their classic fields,
/// a Zip64 end of central directory record and its locator come first.
#[derive(Debug)]
pub struct EndOfCentralDirectory {
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl EndOfCentralDirectory {
    /// Do any of the fields need more room than the classic record gives them?
    pub fn is_zip64(&self) -> bool {
        self.entries >= u16::MAX as u64
            || self.central_directory_size >= u32::MAX as u64
            || self.central_directory_offset >= u32::MAX as u64
    }

    /// Writes the record(s), assuming they immediately follow the central directory.
    pub fn write<W: Write>(&self, out: &mut W) -> ZipResult<()> {
        if self.is_zip64() {
            self.write_zip64(out)?;
        }

        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        let entries = self.entries.min(u16::MAX as u64) as u16;
        let (central_directory_size, _) = zip64_split(self.central_directory_size);
        let (central_directory_offset, _) = zip64_split(self.central_directory_offset);
        out.write_all(&EOCDR_MAGIC)?;
        write_u16(out, 0)?;
        write_u16(out, 0)?;
        write_u16(out, entries)?;
        write_u16(out, entries)?;
        write_u32(out, central_directory_size)?;
        write_u32(out, central_directory_offset)?;
        write_u16(out, 0)?;
        Ok(())
    }

    fn write_zip64<W: Write>(&self, out: &mut W) -> ZipResult<()> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        //
        // 4.3.14.1 The value stored into the "size of zip64 end of central
        // directory record" SHOULD be the size of the remaining
        // record and SHOULD NOT include the leading 12 bytes.
        let zip64_eocdr_offset = self.central_directory_offset + self.central_directory_size;
        out.write_all(&ZIP64_EOCDR_MAGIC)?;
        write_u64(out, ZIP64_EOCDR_SIZE - 12)?;
        write_u16(out, System::Dos.source_version())?;
        write_u16(out, VERSION_ZIP64)?;
        write_u32(out, 0)?;
        write_u32(out, 0)?;
        write_u64(out, self.entries)?;
        write_u64(out, self.entries)?;
        write_u64(out, self.central_directory_size)?;
        write_u64(out, self.central_directory_offset)?;

        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        out.write_all(&ZIP64_EOCDR_LOCATOR_MAGIC)?;
        write_u32(out, 0)?;
        write_u64(out, zip64_eocdr_offset)?;
        write_u32(out, 1)?;
        Ok(())
    }
}

/// Size of the Zip64 end of central directory record we write (no extensible data)
const ZIP64_EOCDR_SIZE: u64 = 56;

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    fn datetime(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_dos_datetime() {
        let dos = DosDateTime::from_naive(datetime(2018, 8, 15, 20, 45, 6));
        assert_eq!(dos.time, 0xA5A3);
        assert_eq!(dos.date, 0x4D0F);

        // Odd seconds round down
        let dos = DosDateTime::from_naive(datetime(2018, 8, 15, 20, 45, 7));
        assert_eq!(dos.time, 0xA5A3);
    }

    #[test]
    fn test_dos_datetime_clamps() {
        let before = DosDateTime::from_naive(datetime(1970, 1, 1, 12, 0, 0));
        assert_eq!(before, DosDateTime::default());
        assert_eq!(before.date, 0x0021);

        let after = DosDateTime::from_naive(datetime(2200, 6, 1, 0, 0, 0));
        assert_eq!(after.date >> 9, 127);
        assert_eq!((after.date >> 5) & 0xF, 12);
        assert_eq!(after.date & 0x1F, 31);
    }

    #[test]
    fn test_empty_eocdr() {
        let mut out = Vec::new();
        EndOfCentralDirectory {
            entries: 0,
            central_directory_size: 0,
            central_directory_offset: 0,
        }
        .write(&mut out)
        .unwrap();
        assert_eq!(
            out,
            [80, 75, 5, 6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_local_header_layout() {
        let mut out = Vec::new();
        LocalFileHeader {
            flags: FLAG_DATA_DESCRIPTOR,
            compression_method: 8,
            last_modified: DosDateTime::default(),
            path: b"hi.txt",
        }
        .write(&mut out)
        .unwrap();
        assert_eq!(out.len(), 30 + 6);
        assert_eq!(out[..4], LOCAL_FILE_HEADER_MAGIC);
        assert_eq!(out[6..8], [8, 0]); // flags
        assert_eq!(out[8..10], [8, 0]); // deflate
        assert_eq!(out[26..28], [6, 0]); // name length
        assert_eq!(&out[30..], b"hi.txt");
    }

    #[test]
    fn test_source_version() {
        assert_eq!(System::Unix.source_version(), 0x032D);
        assert_eq!(System::Dos.source_version(), 0x002D);
    }

    fn u16_at(bytes: &[u8], at: usize) -> u16 {
        u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap())
    }

    fn u32_at(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn u64_at(bytes: &[u8], at: usize) -> u64 {
        u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
    }

    #[test]
    fn test_small_descriptor() {
        let mut out = Vec::new();
        DataDescriptor {
            crc32: 0xDEADBEEF,
            compressed_size: 3,
            uncompressed_size: 5,
        }
        .write(&mut out)
        .unwrap();
        assert_eq!(out.len(), 16);
        assert_eq!(u32_at(&out, 4), 0xDEADBEEF);
        assert_eq!(u32_at(&out, 8), 3);
        assert_eq!(u32_at(&out, 12), 5);
    }

    #[test]
    fn test_zip64_descriptor() {
        let mut out = Vec::new();
        DataDescriptor {
            crc32: 1,
            compressed_size: 4_000_000_000,
            uncompressed_size: 5_000_000_000,
        }
        .write(&mut out)
        .unwrap();
        assert_eq!(out.len(), 24);
        assert_eq!(u64_at(&out, 8), 4_000_000_000);
        assert_eq!(u64_at(&out, 16), 5_000_000_000);
    }

    #[test]
    fn test_central_directory_without_zip64() {
        let mut out = Vec::new();
        CentralDirectoryEntry {
            system: System::Unix,
            flags: FLAG_DATA_DESCRIPTOR,
            compression_method: 0,
            last_modified: DosDateTime::default(),
            descriptor: DataDescriptor {
                crc32: 0,
                compressed_size: 10,
                uncompressed_size: 10,
            },
            external_file_attributes: 0,
            header_offset: 100,
            path: b"a",
        }
        .write(&mut out)
        .unwrap();
        assert_eq!(out.len(), 46 + 1);
        assert_eq!(u16_at(&out, 6), VERSION_NEEDED);
        assert_eq!(u16_at(&out, 30), 0); // no extra field
        assert_eq!(u32_at(&out, 42), 100);
    }

    #[test]
    fn test_central_directory_zip64_extra_field() {
        let mut out = Vec::new();
        CentralDirectoryEntry {
            system: System::Unix,
            flags: FLAG_DATA_DESCRIPTOR,
            compression_method: 8,
            last_modified: DosDateTime::default(),
            descriptor: DataDescriptor {
                crc32: 0,
                compressed_size: 1000,
                uncompressed_size: 6_000_000_000,
            },
            external_file_attributes: 0,
            header_offset: 7_000_000_000,
            path: b"big",
        }
        .write(&mut out)
        .unwrap();

        assert_eq!(u16_at(&out, 6), VERSION_ZIP64);
        // Overflowed fields point at the extra field; the rest stay put.
        assert_eq!(u32_at(&out, 20), 1000);
        assert_eq!(u32_at(&out, 24), u32::MAX);
        assert_eq!(u32_at(&out, 42), u32::MAX);
        assert_eq!(u16_at(&out, 30), 4 + 16);
        assert_eq!(&out[46..49], b"big");

        let extra = &out[49..];
        assert_eq!(extra.len(), 20);
        assert_eq!(u16_at(extra, 0), ZIP64_EXTRA_FIELD);
        assert_eq!(u16_at(extra, 2), 16);
        assert_eq!(u64_at(extra, 4), 6_000_000_000);
        assert_eq!(u64_at(extra, 12), 7_000_000_000);
    }

    #[test]
    fn test_zip64_eocdr() {
        let eocdr = EndOfCentralDirectory {
            entries: 70_000,
            central_directory_size: 3_500_000,
            central_directory_offset: 5_000_000_000,
        };
        assert!(eocdr.is_zip64());
        let mut out = Vec::new();
        eocdr.write(&mut out).unwrap();
        assert_eq!(out.len(), 56 + 20 + 22);

        assert_eq!(out[..4], ZIP64_EOCDR_MAGIC);
        assert_eq!(u64_at(&out, 4), 44);
        assert_eq!(u64_at(&out, 24), 70_000);
        assert_eq!(u64_at(&out, 32), 70_000);
        assert_eq!(u64_at(&out, 40), 3_500_000);
        assert_eq!(u64_at(&out, 48), 5_000_000_000);

        let locator = &out[56..76];
        assert_eq!(locator[..4], ZIP64_EOCDR_LOCATOR_MAGIC);
        assert_eq!(u64_at(locator, 8), 5_003_500_000);
        assert_eq!(u32_at(locator, 16), 1);

        let classic = &out[76..];
        assert_eq!(classic[..4], EOCDR_MAGIC);
        assert_eq!(u16_at(classic, 8), u16::MAX);
        assert_eq!(u16_at(classic, 10), u16::MAX);
        assert_eq!(u32_at(classic, 12), 3_500_000);
        assert_eq!(u32_at(classic, 16), u32::MAX);
    }

    #[test]
    fn test_overlong_path() {
        let path = vec![b'a'; 70_000];
        let mut out = Vec::new();
        let header = LocalFileHeader {
            flags: 0,
            compression_method: 0,
            last_modified: DosDateTime::default(),
            path: &path,
        };
        assert!(matches!(
            header.write(&mut out),
            Err(ZipError::InvalidPath(_))
        ));
        // Checked before anything is written
        assert!(out.is_empty());
    }
}
