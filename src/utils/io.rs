//! Byte-order I/O helpers
//!
//! ISO-BMFF stores every integer big-endian. These helpers wrap the
//! `from_be_bytes`/`to_be_bytes` plumbing used throughout the atom parser
//! and the rewrite writer.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::core::error::TagResult;

/// Buffer size for copying byte ranges between streams.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Read a big-endian `u16`.
pub fn read_u16_be<R: Read>(reader: &mut R) -> TagResult<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

/// Read a big-endian `u32`.
pub fn read_u32_be<R: Read>(reader: &mut R) -> TagResult<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Read a big-endian `u64`.
pub fn read_u64_be<R: Read>(reader: &mut R) -> TagResult<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// Read exactly `len` bytes into a fresh buffer.
pub fn read_vec<R: Read>(reader: &mut R, len: usize) -> TagResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write a big-endian `u16`.
pub fn write_u16_be<W: Write>(writer: &mut W, value: u16) -> TagResult<()> {
    writer.write_all(&value.to_be_bytes())?;
    Ok(())
}

/// Write a big-endian `u32`.
pub fn write_u32_be<W: Write>(writer: &mut W, value: u32) -> TagResult<()> {
    writer.write_all(&value.to_be_bytes())?;
    Ok(())
}

/// Write a big-endian `u64`.
pub fn write_u64_be<W: Write>(writer: &mut W, value: u64) -> TagResult<()> {
    writer.write_all(&value.to_be_bytes())?;
    Ok(())
}

/// Copy `len` bytes starting at `start` from `source` to `sink` in bounded
/// chunks so arbitrarily large media data never lands in memory at once.
pub fn copy_range<R: Read + Seek, W: Write>(
    source: &mut R,
    sink: &mut W,
    start: u64,
    len: u64,
) -> TagResult<()> {
    source.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(COPY_BUFFER_SIZE as u64) as usize;
        source.read_exact(&mut buf[..chunk])?;
        sink.write_all(&buf[..chunk])?;
        remaining -= chunk as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_round_trip_integers() {
        let mut buf = Vec::new();
        write_u16_be(&mut buf, 0xBEEF).unwrap();
        write_u32_be(&mut buf, 0xDEADBEEF).unwrap();
        write_u64_be(&mut buf, 0x0123456789ABCDEF).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_u16_be(&mut cursor).unwrap(), 0xBEEF);
        assert_eq!(read_u32_be(&mut cursor).unwrap(), 0xDEADBEEF);
        assert_eq!(read_u64_be(&mut cursor).unwrap(), 0x0123456789ABCDEF);
    }

    #[test]
    fn test_copy_range() {
        let data: Vec<u8> = (0..=255u8).cycle().take(200_000).collect();
        let mut source = Cursor::new(data.clone());
        let mut sink = Vec::new();
        copy_range(&mut source, &mut sink, 1000, 150_000).unwrap();
        assert_eq!(sink, &data[1000..151_000]);
    }

    #[test]
    fn test_copy_range_past_end_fails() {
        let mut source = Cursor::new(vec![0u8; 16]);
        let mut sink = Vec::new();
        assert!(copy_range(&mut source, &mut sink, 8, 16).is_err());
    }
}
