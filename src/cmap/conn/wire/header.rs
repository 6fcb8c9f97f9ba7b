use super::util::read_i32_le;
use crate::error::{Error, Result};

/// The wire protocol op codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OpCode {
    Reply = 1,
    Message = 2013,
}

impl OpCode {
    /// Attempt to infer the op code based on the numeric value.
    fn from_i32(i: i32) -> Result<Self> {
        match i {
            1 => Ok(OpCode::Reply),
            2013 => Ok(OpCode::Message),
            other => Err(Error::protocol(format!(
                "Invalid wire protocol opcode: {other}"
            ))),
        }
    }
}

/// The header for any wire protocol message.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Header {
    pub(crate) length: i32,
    pub(crate) request_id: i32,
    pub(crate) response_to: i32,
    pub(crate) op_code: OpCode,
}

impl Header {
    pub(crate) const LENGTH: usize = 4 * std::mem::size_of::<i32>();

    /// Serializes the Header and appends the bytes to `buf`.
    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.length.to_le_bytes());
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&self.response_to.to_le_bytes());
        buf.extend_from_slice(&(self.op_code as i32).to_le_bytes());
    }

    /// Reads the first `Header::LENGTH` bytes of `reader` and deserializes them into a header,
    /// advancing `reader` past them.
    pub(crate) fn read_from(reader: &mut &[u8]) -> Result<Self> {
        let length = read_i32_le(reader)?;
        let request_id = read_i32_le(reader)?;
        let response_to = read_i32_le(reader)?;
        let op_code = OpCode::from_i32(read_i32_le(reader)?)?;
        Ok(Self {
            length,
            request_id,
            response_to,
            op_code,
        })
    }
}
