// Binary codec shared by the store, transaction identity and the wire

use std::io::{self, Read, Write};
use thiserror::Error;

use crate::core::Hash256;

/// Decoding failures
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid data: {0}")]
    Invalid(String),
}

/// Trait for serializable types
pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;
    fn deserialize(data: &[u8]) -> Result<Self, CodecError> where Self: Sized;
}

/// Upper bound for any length prefix, guards allocations on hostile input
const MAX_VAR_LEN: u64 = 32 * 1024 * 1024;

/// Write a variable-length integer (VarInt)
pub fn write_varint<W: Write + ?Sized>(writer: &mut W, value: u64) -> io::Result<()> {
    match value {
        0..=0xfc => {
            writer.write_all(&[value as u8])?;
        }
        0xfd..=0xffff => {
            writer.write_all(&[0xfd])?;
            writer.write_all(&(value as u16).to_le_bytes())?;
        }
        0x10000..=0xffffffff => {
            writer.write_all(&[0xfe])?;
            writer.write_all(&(value as u32).to_le_bytes())?;
        }
        _ => {
            writer.write_all(&[0xff])?;
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Read a variable-length integer (VarInt)
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut first_byte = [0u8; 1];
    reader.read_exact(&mut first_byte)?;

    match first_byte[0] {
        0..=0xfc => Ok(first_byte[0] as u64),
        0xfd => {
            let mut bytes = [0u8; 2];
            reader.read_exact(&mut bytes)?;
            Ok(u16::from_le_bytes(bytes) as u64)
        }
        0xfe => {
            let mut bytes = [0u8; 4];
            reader.read_exact(&mut bytes)?;
            Ok(u32::from_le_bytes(bytes) as u64)
        }
        0xff => {
            let mut bytes = [0u8; 8];
            reader.read_exact(&mut bytes)?;
            Ok(u64::from_le_bytes(bytes))
        }
    }
}

/// Read a length prefix and check it against the allocation bound
pub fn read_len<R: Read + ?Sized>(reader: &mut R) -> Result<usize, CodecError> {
    let len = read_varint(reader)?;
    if len > MAX_VAR_LEN {
        return Err(CodecError::Invalid(format!("length prefix too large: {}", len)));
    }
    Ok(len as usize)
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes<W: Write + ?Sized>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    write_varint(writer, data.len() as u64)?;
    writer.write_all(data)?;
    Ok(())
}

/// Read bytes with length prefix
pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>, CodecError> {
    let len = read_len(reader)?;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;
    Ok(data)
}

pub fn write_var_str<W: Write + ?Sized>(writer: &mut W, s: &str) -> io::Result<()> {
    write_var_bytes(writer, s.as_bytes())
}

pub fn read_var_str<R: Read + ?Sized>(reader: &mut R) -> Result<String, CodecError> {
    let bytes = read_var_bytes(reader)?;
    String::from_utf8(bytes).map_err(|e| CodecError::Invalid(format!("invalid utf-8: {}", e)))
}

pub fn read_hash<R: Read + ?Sized>(reader: &mut R) -> Result<Hash256, CodecError> {
    let mut bytes = [0u8; 32];
    reader.read_exact(&mut bytes)?;
    Ok(Hash256::new(bytes))
}

pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> Result<u64, CodecError> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

pub fn read_i64<R: Read + ?Sized>(reader: &mut R) -> Result<i64, CodecError> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(i64::from_le_bytes(bytes))
}

pub fn read_i32<R: Read + ?Sized>(reader: &mut R) -> Result<i32, CodecError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}

pub fn read_u32<R: Read + ?Sized>(reader: &mut R) -> Result<u32, CodecError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

/// Fail if a decoder left bytes behind
pub fn expect_consumed(cursor: &io::Cursor<&[u8]>) -> Result<(), CodecError> {
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if remaining != 0 {
        return Err(CodecError::Invalid(format!("{} trailing bytes", remaining)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_varint_small() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 100).unwrap();
        assert_eq!(buf, vec![100]);

        let mut cursor = Cursor::new(buf);
        let value = read_varint(&mut cursor).unwrap();
        assert_eq!(value, 100);
    }

    #[test]
    fn test_varint_widths() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 1000).unwrap();
        assert_eq!(buf.len(), 3); // 0xfd + 2 bytes

        let mut buf = Vec::new();
        write_varint(&mut buf, 100000).unwrap();
        assert_eq!(buf.len(), 5); // 0xfe + 4 bytes

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_varint(&mut cursor).unwrap(), 100000);
    }

    #[test]
    fn test_var_str() {
        let mut buf = Vec::new();
        write_var_str(&mut buf, "localhost:3000").unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_var_str(&mut cursor).unwrap(), "localhost:3000");
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buf = Vec::new();
        write_varint(&mut buf, u64::MAX).unwrap();

        let mut cursor = Cursor::new(buf);
        assert!(matches!(read_var_bytes(&mut cursor), Err(CodecError::Invalid(_))));
    }

    #[test]
    fn test_truncated_input_is_io_error() {
        let mut cursor = Cursor::new(vec![5u8, 1, 2]);
        assert!(matches!(read_var_bytes(&mut cursor), Err(CodecError::Io(_))));
    }
}
