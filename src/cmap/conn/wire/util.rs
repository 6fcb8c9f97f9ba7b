use crate::error::{Error, Result};

fn take<'a>(reader: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    if reader.len() < len {
        return Err(Error::protocol(format!(
            "frame truncated while reading {what}: needed {len} bytes, {} remaining",
            reader.len()
        )));
    }
    let (head, tail) = reader.split_at(len);
    *reader = tail;
    Ok(head)
}

pub(super) fn read_u8(reader: &mut &[u8]) -> Result<u8> {
    Ok(take(reader, 1, "u8")?[0])
}

pub(super) fn read_i32_le(reader: &mut &[u8]) -> Result<i32> {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(take(reader, 4, "i32")?);
    Ok(i32::from_le_bytes(bytes))
}

pub(super) fn read_u32_le(reader: &mut &[u8]) -> Result<u32> {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(take(reader, 4, "u32")?);
    Ok(u32::from_le_bytes(bytes))
}

pub(super) fn read_i64_le(reader: &mut &[u8]) -> Result<i64> {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(take(reader, 8, "i64")?);
    Ok(i64::from_le_bytes(bytes))
}

/// Reads a null-terminated UTF-8 string.
pub(super) fn read_cstring(reader: &mut &[u8]) -> Result<String> {
    let end = reader
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| Error::protocol("unterminated cstring in frame"))?;
    let bytes = take(reader, end + 1, "cstring")?;
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|e| Error::protocol(format!("invalid UTF-8 in cstring: {e}")))
}

/// Splits off the next BSON document, using its own length prefix.
pub(super) fn read_document_bytes<'a>(reader: &mut &'a [u8]) -> Result<&'a [u8]> {
    let mut peek = *reader;
    let length = read_i32_le(&mut peek)?;
    if length < 5 {
        return Err(Error::protocol(format!("invalid BSON document length {length}")));
    }
    take(reader, length as usize, "document")
}

/// Appends `string` and a null terminator to `buf`.
pub(super) fn write_cstring(buf: &mut Vec<u8>, string: &str) {
    buf.extend_from_slice(string.as_bytes());
    buf.push(0);
}
