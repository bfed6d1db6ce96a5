// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Witness log file format.
//!
//! ```text
//! [Header: 40 bytes]
//!   magic "CAGEWTNS" | version u32 | flags u32 | entry_count u64 | reserved 8 | crc64 u64
//! [Entry frames]
//!   len u32 | bincode(WitnessEntry)
//! [Root: 32 bytes, sealed files only]
//! ```
//!
//! The header is written with a zero count when the file is created and
//! rewritten in place on seal or truncation. A file whose header carries
//! neither flag was left behind by a writer that never finished; it reads
//! back as a truncated log.
//!
//! Entry frames carry no checksum of their own. The hash chain covers them,
//! and a flipped bit must surface as a root mismatch, not as a framing error.

use crate::error::{PersistenceError, Result};
use byteorder::{ByteOrder, LittleEndian};
use cage_kernel::config::WITNESS_FORMAT_VERSION;
use cage_kernel::witness::{WitnessEntry, WitnessLog, WitnessSink};
use cage_kernel::Hash;
use crc64fast::Digest;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const FLAG_SEALED: u32 = 1;
pub const FLAG_TRUNCATED: u32 = 2;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessFileHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub flags: u32,
    pub entry_count: u64,
    pub reserved: [u8; 8],
    pub checksum: u64,
}

impl WitnessFileHeader {
    pub const SIZE: usize = 8 + 4 + 4 + 8 + 8 + 8; // 40 bytes
    pub const MAGIC: [u8; 8] = *b"CAGEWTNS";

    pub fn new(flags: u32, entry_count: u64) -> Self {
        let mut header = Self {
            magic: Self::MAGIC,
            version: WITNESS_FORMAT_VERSION,
            flags,
            entry_count,
            reserved: [0; 8],
            checksum: 0,
        };
        header.checksum = header.compute_checksum();
        header
    }

    fn body_bytes(&self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        buf[0..8].copy_from_slice(&self.magic);
        LittleEndian::write_u32(&mut buf[8..12], self.version);
        LittleEndian::write_u32(&mut buf[12..16], self.flags);
        LittleEndian::write_u64(&mut buf[16..24], self.entry_count);
        buf[24..32].copy_from_slice(&self.reserved);
        buf
    }

    fn compute_checksum(&self) -> u64 {
        let mut digest = Digest::new();
        digest.write(&self.body_bytes());
        digest.sum64()
    }

    pub fn is_sealed(&self) -> bool {
        self.flags & FLAG_SEALED != 0
    }

    pub fn is_truncated(&self) -> bool {
        self.flags & FLAG_TRUNCATED != 0
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..32].copy_from_slice(&self.body_bytes());
        LittleEndian::write_u64(&mut buf[32..40], self.checksum);
        buf
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf)?;

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[0..8]);
        if magic != Self::MAGIC {
            return Err(PersistenceError::InvalidMagic);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[24..32]);
        let header = Self {
            magic,
            version: LittleEndian::read_u32(&buf[8..12]),
            flags: LittleEndian::read_u32(&buf[12..16]),
            entry_count: LittleEndian::read_u64(&buf[16..24]),
            reserved,
            checksum: LittleEndian::read_u64(&buf[32..40]),
        };

        let found = header.compute_checksum();
        if found != header.checksum {
            return Err(PersistenceError::ChecksumMismatch {
                expected: header.checksum,
                found,
            });
        }
        if header.version != WITNESS_FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion(header.version));
        }
        Ok(header)
    }
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Streams recorder output to disk. This is the sink the cage records into.
pub struct WitnessFileWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    entries: u64,
}

impl WitnessFileWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&WitnessFileHeader::new(0, 0).to_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_data()?;

        Ok(Self {
            writer,
            path,
            entries: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rewrite_header(&mut self, flags: u32, entry_count: u64) -> io::Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_mut();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&WitnessFileHeader::new(flags, entry_count).to_bytes())?;
        file.seek(SeekFrom::End(0))?;
        file.sync_data()
    }
}

impl WitnessSink for WitnessFileWriter {
    fn append(&mut self, entry: &WitnessEntry) -> io::Result<()> {
        let bytes = bincode::serde::encode_to_vec(entry, bincode::config::standard())
            .map_err(|e| invalid_data(e.to_string()))?;
        let len = u32::try_from(bytes.len()).map_err(|_| invalid_data("entry too large".into()))?;

        let mut len_buf = [0u8; 4];
        LittleEndian::write_u32(&mut len_buf, len);
        self.writer.write_all(&len_buf)?;
        self.writer.write_all(&bytes)?;
        self.entries += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }

    fn seal(&mut self, entry_count: u64, root: &Hash) -> io::Result<()> {
        if entry_count != self.entries {
            return Err(invalid_data(format!(
                "sealing {entry_count} entries but {} were written",
                self.entries
            )));
        }
        self.writer.write_all(root)?;
        self.rewrite_header(FLAG_SEALED, entry_count)
    }

    fn mark_truncated(&mut self) -> io::Result<()> {
        let count = self.entries;
        self.rewrite_header(FLAG_TRUNCATED, count)
    }
}

pub fn read_header(path: impl AsRef<Path>) -> Result<WitnessFileHeader> {
    let file = File::open(path)?;
    WitnessFileHeader::read_from(file)
}

/// Read one frame. `Ok(None)` on a clean end of file.
fn read_frame<R: Read>(reader: &mut R) -> Result<Option<WitnessEntry>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = LittleEndian::read_u32(&len_buf);
    if len > MAX_FRAME_LEN {
        return Err(PersistenceError::InvalidFormat(format!("entry frame of {len} bytes")));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;

    let (entry, read): (WitnessEntry, usize) =
        bincode::serde::decode_from_slice(&body, bincode::config::standard())
            .map_err(|e| PersistenceError::InvalidFormat(format!("undecodable entry: {e}")))?;
    if read != body.len() {
        return Err(PersistenceError::InvalidFormat("trailing bytes in entry frame".into()));
    }
    Ok(Some(entry))
}

pub fn read_witness_file(path: impl AsRef<Path>) -> Result<(WitnessFileHeader, WitnessLog)> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = WitnessFileHeader::read_from(&mut reader)?;
    let mut entries = Vec::new();

    if header.is_sealed() {
        for _ in 0..header.entry_count {
            match read_frame(&mut reader)? {
                Some(entry) => entries.push(entry),
                None => {
                    return Err(PersistenceError::InvalidFormat(format!(
                        "sealed log holds {} of {} entries",
                        entries.len(),
                        header.entry_count
                    )))
                }
            }
        }
        let mut root = [0u8; 32];
        reader.read_exact(&mut root)?;
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest)?;
        if !rest.is_empty() {
            return Err(PersistenceError::InvalidFormat(format!(
                "{} trailing bytes after root",
                rest.len()
            )));
        }
        let truncated = header.is_truncated();
        return Ok((header, WitnessLog::from_parts(entries, Some(root), truncated)));
    }

    // Unsealed: keep every complete frame, stop at the first torn one.
    loop {
        match read_frame(&mut reader) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => break,
            Err(PersistenceError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
    }
    Ok((header, WitnessLog::from_parts(entries, None, true)))
}

pub fn read_witness_log(path: impl AsRef<Path>) -> Result<WitnessLog> {
    Ok(read_witness_file(path)?.1)
}

/// Write a complete log in one go. Sealed logs get their stored root,
/// anything else is marked truncated.
pub fn write_witness_log(path: impl AsRef<Path>, log: &WitnessLog) -> Result<()> {
    let mut writer = WitnessFileWriter::create(path)?;
    for entry in log.entries() {
        writer.append(entry)?;
    }
    match log.merkle_root() {
        Some(root) if !log.is_truncated() => writer.seal(log.len() as u64, &root)?,
        _ => writer.mark_truncated()?,
    }
    WitnessSink::flush(&mut writer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cage_kernel::witness::{MemorySink, OperationKind, WitnessRecorder};
    use tempfile::tempdir;

    fn recorded(path: &Path, seal: bool) -> WitnessLog {
        let writer = WitnessFileWriter::create(path).unwrap();
        let mut rec = WitnessRecorder::new(writer, true, 1).with_batch_size(2);
        rec.record_environment("TZ", "UTC").unwrap();
        rec.record_input(OperationKind::FileRead, "stdin", b"abc").unwrap();
        rec.record(OperationKind::FileWrite, "stdout", b"out").unwrap();
        if seal {
            rec.seal().unwrap();
        } else {
            rec.abort().unwrap();
        }
        rec.into_parts().0
    }

    #[test]
    fn test_header_checksum() {
        let header = WitnessFileHeader::new(FLAG_SEALED, 7);
        let mut bytes = header.to_bytes();
        assert_eq!(WitnessFileHeader::read_from(&bytes[..]).unwrap(), header);

        bytes[16] ^= 1;
        assert!(matches!(
            WitnessFileHeader::read_from(&bytes[..]),
            Err(PersistenceError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = [0u8; WitnessFileHeader::SIZE];
        bytes[0..8].copy_from_slice(b"BADMAGIC");
        let result = WitnessFileHeader::read_from(&bytes[..]);
        assert!(matches!(result, Err(PersistenceError::InvalidMagic)));
    }

    #[test]
    fn test_sealed_file_reads_back_identically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("witness.log");
        let log = recorded(&path, true);

        let (header, back) = read_witness_file(&path).unwrap();
        assert!(header.is_sealed());
        assert_eq!(header.entry_count, 3);
        assert_eq!(back, log);
    }

    #[test]
    fn test_aborted_file_reads_back_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("witness.log");
        let log = recorded(&path, false);

        let (header, back) = read_witness_file(&path).unwrap();
        assert!(header.is_truncated());
        assert!(back.is_truncated());
        assert!(back.merkle_root().is_none());
        assert_eq!(back.entries(), log.entries());
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("witness.log");

        let mut writer = WitnessFileWriter::create(&path).unwrap();
        let mut rec = WitnessRecorder::new(MemorySink::default(), true, 1);
        rec.record(OperationKind::FileWrite, "stdout", b"a").unwrap();
        rec.record(OperationKind::FileWrite, "stderr", b"b").unwrap();
        for e in rec.log().entries() {
            writer.append(e).unwrap();
        }
        WitnessSink::flush(&mut writer).unwrap();
        drop(writer);

        // Chop the last frame in half
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 10).unwrap();

        let back = read_witness_log(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert!(back.is_truncated());
    }

    #[test]
    fn test_write_witness_log_roundtrip() {
        let dir = tempdir().unwrap();
        let original = recorded(&dir.path().join("a.log"), true);
        let copy = dir.path().join("b.log");
        write_witness_log(&copy, &original).unwrap();
        assert_eq!(read_witness_log(&copy).unwrap(), original);
    }
}
