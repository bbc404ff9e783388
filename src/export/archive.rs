//! Uncompressed ZIP-compatible archive encoding.
//!
//! Entries are stored, never deflated: the payloads are already-compressed
//! images and small text files, and keeping the container dependency-free
//! matters more than a few percent of size. The layout is the minimal
//! subset any standard unzip tool accepts: one local file header per entry,
//! a central directory, and a single end-of-central-directory record. All
//! multi-byte integers are little-endian.

use chrono::{Datelike, TimeZone, Timelike, Utc};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_SIG: u32 = 0x0605_4b50;

/// Version 2.0, the floor for the stored method.
const VERSION_NEEDED: u16 = 20;

/// General-purpose flag bit 11: filenames are UTF-8.
const FLAG_UTF8: u16 = 0x0800;

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-32 over the reflected polynomial, as ZIP requires.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in bytes {
        crc = (crc >> 8) ^ CRC_TABLE[((crc ^ byte as u32) & 0xFF) as usize];
    }
    !crc
}

struct EntryRecord {
    name: String,
    crc: u32,
    size: u32,
    header_offset: u32,
    dos_time: u16,
    dos_date: u16,
}

/// Incremental writer producing the archive bytes in memory.
pub struct ArchiveWriter {
    buffer: Vec<u8>,
    entries: Vec<EntryRecord>,
    dos_time: u16,
    dos_date: u16,
}

impl ArchiveWriter {
    /// Writer stamping every entry with `modified_at_ms` (epoch ms).
    pub fn new(modified_at_ms: u64) -> Self {
        let (dos_date, dos_time) = dos_datetime(modified_at_ms);
        Self {
            buffer: Vec::new(),
            entries: Vec::new(),
            dos_time,
            dos_date,
        }
    }

    /// Append one stored entry.
    pub fn add_file(&mut self, name: &str, bytes: &[u8]) {
        let header_offset = self.buffer.len() as u32;
        let crc = crc32(bytes);
        let size = bytes.len() as u32;
        let name_bytes = name.as_bytes();

        push_u32(&mut self.buffer, LOCAL_HEADER_SIG);
        push_u16(&mut self.buffer, VERSION_NEEDED);
        push_u16(&mut self.buffer, FLAG_UTF8);
        push_u16(&mut self.buffer, 0); // stored, no compression
        push_u16(&mut self.buffer, self.dos_time);
        push_u16(&mut self.buffer, self.dos_date);
        push_u32(&mut self.buffer, crc);
        push_u32(&mut self.buffer, size); // compressed == uncompressed
        push_u32(&mut self.buffer, size);
        push_u16(&mut self.buffer, name_bytes.len() as u16);
        push_u16(&mut self.buffer, 0); // no extra field
        self.buffer.extend_from_slice(name_bytes);
        self.buffer.extend_from_slice(bytes);

        self.entries.push(EntryRecord {
            name: name.to_string(),
            crc,
            size,
            header_offset,
            dos_time: self.dos_time,
            dos_date: self.dos_date,
        });
    }

    /// Write the central directory and end record, returning the archive.
    pub fn finish(mut self) -> Vec<u8> {
        let central_offset = self.buffer.len() as u32;

        for entry in &self.entries {
            let name_bytes = entry.name.as_bytes();
            push_u32(&mut self.buffer, CENTRAL_HEADER_SIG);
            push_u16(&mut self.buffer, VERSION_NEEDED); // version made by
            push_u16(&mut self.buffer, VERSION_NEEDED);
            push_u16(&mut self.buffer, FLAG_UTF8);
            push_u16(&mut self.buffer, 0);
            push_u16(&mut self.buffer, entry.dos_time);
            push_u16(&mut self.buffer, entry.dos_date);
            push_u32(&mut self.buffer, entry.crc);
            push_u32(&mut self.buffer, entry.size);
            push_u32(&mut self.buffer, entry.size);
            push_u16(&mut self.buffer, name_bytes.len() as u16);
            push_u16(&mut self.buffer, 0); // extra
            push_u16(&mut self.buffer, 0); // comment
            push_u16(&mut self.buffer, 0); // disk number start
            push_u16(&mut self.buffer, 0); // internal attributes
            push_u32(&mut self.buffer, 0); // external attributes
            push_u32(&mut self.buffer, entry.header_offset);
            self.buffer.extend_from_slice(name_bytes);
        }

        let central_size = self.buffer.len() as u32 - central_offset;
        let count = self.entries.len() as u16;

        push_u32(&mut self.buffer, END_OF_CENTRAL_SIG);
        push_u16(&mut self.buffer, 0); // this disk
        push_u16(&mut self.buffer, 0); // disk with central directory
        push_u16(&mut self.buffer, count);
        push_u16(&mut self.buffer, count);
        push_u32(&mut self.buffer, central_size);
        push_u32(&mut self.buffer, central_offset);
        push_u16(&mut self.buffer, 0); // no comment

        self.buffer
    }
}

fn push_u16(buffer: &mut Vec<u8>, value: u16) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(buffer: &mut Vec<u8>, value: u32) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

/// Epoch-ms to DOS (date, time). DOS has no notion of anything before 1980,
/// so earlier stamps collapse to the DOS epoch.
fn dos_datetime(epoch_ms: u64) -> (u16, u16) {
    let dt = match Utc.timestamp_millis_opt(epoch_ms as i64).single() {
        Some(dt) if dt.year() >= 1980 => dt,
        _ => return (0x0021, 0), // 1980-01-01 00:00:00
    };
    let year = dt.year().min(2107);
    let date = (((year - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
    let time =
        ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | ((dt.second() as u16) / 2);
    (date, time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_reference_vector() {
        // The check value for the reflected 0xEDB88320 polynomial.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn empty_archive_is_a_bare_end_record() {
        let bytes = ArchiveWriter::new(0).finish();
        assert_eq!(bytes.len(), 22);
        assert_eq!(&bytes[0..4], &END_OF_CENTRAL_SIG.to_le_bytes());
        // Entry counts and directory size are all zero.
        assert!(bytes[4..20].iter().all(|&b| b == 0));
    }

    #[test]
    fn single_entry_layout_is_byte_exact() {
        let mut writer = ArchiveWriter::new(0);
        writer.add_file("a.txt", b"hello");
        let bytes = writer.finish();

        assert_eq!(&bytes[0..4], &LOCAL_HEADER_SIG.to_le_bytes());
        // Stored method.
        assert_eq!(&bytes[8..10], &0u16.to_le_bytes());
        // crc32("hello")
        assert_eq!(&bytes[14..18], &0x3610_A686u32.to_le_bytes());
        // Both sizes equal the raw length.
        assert_eq!(&bytes[18..22], &5u32.to_le_bytes());
        assert_eq!(&bytes[22..26], &5u32.to_le_bytes());
        // Name then payload immediately after the 30-byte header.
        assert_eq!(&bytes[30..35], b"a.txt");
        assert_eq!(&bytes[35..40], b"hello");

        // Central directory starts right after the payload.
        let central = 40;
        assert_eq!(&bytes[central..central + 4], &CENTRAL_HEADER_SIG.to_le_bytes());
        // Its recorded local-header offset points at the start.
        assert_eq!(&bytes[central + 42..central + 46], &0u32.to_le_bytes());

        // End record carries the count and directory offset.
        let end = bytes.len() - 22;
        assert_eq!(&bytes[end..end + 4], &END_OF_CENTRAL_SIG.to_le_bytes());
        assert_eq!(&bytes[end + 10..end + 12], &1u16.to_le_bytes());
        assert_eq!(&bytes[end + 16..end + 20], &(central as u32).to_le_bytes());
    }

    #[test]
    fn offsets_accumulate_across_entries() {
        let mut writer = ArchiveWriter::new(1_722_700_000_000);
        writer.add_file("one.bin", &[1, 2, 3]);
        writer.add_file("two.bin", &[4, 5]);
        let bytes = writer.finish();

        // Second local header follows the first entry (30 + 7 + 3).
        let second = 40;
        assert_eq!(&bytes[second..second + 4], &LOCAL_HEADER_SIG.to_le_bytes());

        let end = bytes.len() - 22;
        assert_eq!(&bytes[end + 10..end + 12], &2u16.to_le_bytes());
    }

    #[test]
    fn pre_dos_epoch_clamps() {
        assert_eq!(dos_datetime(0), (0x0021, 0));
        let (date, time) = dos_datetime(1_722_700_000_000); // 2024-08-03T15:46:40Z
        assert_eq!(date >> 9, 2024 - 1980);
        assert_eq!((date >> 5) & 0x0F, 8);
        assert_eq!(time >> 11, 15);
    }
}
