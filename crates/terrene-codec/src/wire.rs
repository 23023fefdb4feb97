//! Wire primitives.
//!
//! Little-endian fixed-width numbers via `byteorder`, LEB128 varints for
//! lengths and ids, and length-prefixed strings and byte runs, all over
//! `std::io::{Read, Write}`.

use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::error::{CodecError, CodecResult};

/// Sanity limit for any length prefix.
pub const MAX_LEN: usize = 1 << 24;

pub fn write_var_u64<W: Write>(writer: &mut W, mut value: u64) -> CodecResult<()> {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        writer.write_u8(byte)?;
        if value == 0 {
            return Ok(());
        }
    }
}

pub fn read_var_u64<R: Read>(reader: &mut R) -> CodecResult<u64> {
    let mut result = 0u64;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8()?;
        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(CodecError::VarIntTooLarge);
        }
    }
}

pub fn write_var_u32<W: Write>(writer: &mut W, value: u32) -> CodecResult<()> {
    write_var_u64(writer, u64::from(value))
}

pub fn read_var_u32<R: Read>(reader: &mut R) -> CodecResult<u32> {
    u32::try_from(read_var_u64(reader)?).map_err(|_| CodecError::VarIntTooLarge)
}

pub fn write_len<W: Write>(writer: &mut W, len: usize) -> CodecResult<()> {
    write_var_u64(writer, len as u64)
}

pub fn read_len<R: Read>(reader: &mut R) -> CodecResult<usize> {
    let len = usize::try_from(read_var_u64(reader)?).map_err(|_| CodecError::VarIntTooLarge)?;
    if len > MAX_LEN {
        return Err(CodecError::LengthLimit { len, max: MAX_LEN });
    }
    Ok(len)
}

pub fn write_bool<W: Write>(writer: &mut W, value: bool) -> CodecResult<()> {
    writer.write_u8(u8::from(value))?;
    Ok(())
}

pub fn read_bool<R: Read>(reader: &mut R) -> CodecResult<bool> {
    Ok(reader.read_u8()? != 0)
}

pub fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> CodecResult<()> {
    write_len(writer, bytes.len())?;
    writer.write_all(bytes)?;
    Ok(())
}

pub fn read_byte_vec<R: Read>(reader: &mut R) -> CodecResult<Vec<u8>> {
    let len = read_len(reader)?;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

pub fn write_string<W: Write>(writer: &mut W, value: &str) -> CodecResult<()> {
    write_bytes(writer, value.as_bytes())
}

pub fn read_string<R: Read>(reader: &mut R) -> CodecResult<String> {
    Ok(String::from_utf8(read_byte_vec(reader)?)?)
}

pub fn write_opt_string<W: Write>(writer: &mut W, value: Option<&str>) -> CodecResult<()> {
    match value {
        Some(value) => {
            write_bool(writer, true)?;
            write_string(writer, value)
        }
        None => write_bool(writer, false),
    }
}

pub fn read_opt_string<R: Read>(reader: &mut R) -> CodecResult<Option<String>> {
    if read_bool(reader)? {
        Ok(Some(read_string(reader)?))
    } else {
        Ok(None)
    }
}
