use bitflags::bitflags;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{
    header::{Header, OpCode},
    util::{
        read_cstring,
        read_document_bytes,
        read_i32_le,
        read_i64_le,
        read_u32_le,
        read_u8,
        write_cstring,
    },
};
use crate::{
    bson::{Array, Document},
    cmap::conn::command::Command,
    error::{Error, Result},
};

pub(crate) const DEFAULT_MAX_MESSAGE_SIZE_BYTES: i32 = 48 * 1024 * 1024;

/// Represents an OP_MSG wire protocol operation.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Message {
    // OP_MSG payload type 0
    pub(crate) document_payload: Document,
    // OP_MSG payload type 1
    pub(crate) document_sequences: Vec<DocumentSequence>,
    pub(crate) request_id: i32,
    pub(crate) response_to: i32,
    pub(crate) flags: MessageFlags,
    pub(crate) checksum: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct DocumentSequence {
    pub(crate) identifier: String,
    pub(crate) documents: Vec<Document>,
}

impl Message {
    /// Creates a `Message` from a given `Command`.
    pub(crate) fn from_command(command: &Command, request_id: i32) -> Self {
        let mut flags = MessageFlags::empty();
        if command.more_to_come {
            flags |= MessageFlags::MORE_TO_COME;
        }

        Self {
            document_payload: command.to_document(),
            document_sequences: Vec::new(),
            request_id,
            response_to: 0,
            flags,
            checksum: None,
        }
    }

    /// A reply carrying `document` as its body.
    #[cfg(test)]
    pub(crate) fn new_reply(request_id: i32, response_to: i32, document: Document) -> Self {
        Self {
            document_payload: document,
            document_sequences: Vec::new(),
            request_id,
            response_to,
            flags: MessageFlags::empty(),
            checksum: None,
        }
    }

    /// Whether the sender of this message does not expect a reply to it.
    pub(crate) fn is_more_to_come(&self) -> bool {
        self.flags.contains(MessageFlags::MORE_TO_COME)
    }

    /// Consumes the message and returns its body, with each document sequence folded in as an
    /// array field named by the sequence's identifier.
    pub(crate) fn into_document(self) -> Document {
        let mut document = self.document_payload;
        for sequence in self.document_sequences {
            let documents: Array = sequence.documents.into_iter().map(Into::into).collect();
            document.insert(sequence.identifier, documents);
        }
        document
    }

    /// Reads one complete frame from `reader` and decodes it.
    ///
    /// A frame whose declared length is outside `[16, max_message_size_bytes]` is rejected before
    /// any of its body is read.
    pub(crate) async fn read_from<R: AsyncRead + Unpin>(
        reader: &mut R,
        max_message_size_bytes: Option<i32>,
    ) -> Result<Self> {
        let mut length_bytes = [0u8; 4];
        reader.read_exact(&mut length_bytes).await?;
        let length = i32::from_le_bytes(length_bytes);

        let max_len = max_message_size_bytes.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE_BYTES);
        if length < Header::LENGTH as i32 || length > max_len {
            return Err(Error::protocol(format!(
                "Message length {length} outside of allowed range [{}, {max_len}]",
                Header::LENGTH
            )));
        }

        let mut frame = vec![0u8; length as usize];
        frame[..4].copy_from_slice(&length_bytes);
        reader.read_exact(&mut frame[4..]).await?;

        Self::decode(&frame)
    }

    /// Decodes a complete frame, header included.
    pub(crate) fn decode(frame: &[u8]) -> Result<Self> {
        let mut reader = frame;
        let header = Header::read_from(&mut reader)?;
        if header.length < 0 || header.length as usize != frame.len() {
            return Err(Error::protocol(format!(
                "The server indicated that the reply would be {} bytes long, but it instead was {}",
                header.length,
                frame.len()
            )));
        }

        match header.op_code {
            OpCode::Message => Self::read_op_msg(reader, &header),
            OpCode::Reply => Self::read_op_reply(reader, &header),
        }
    }

    fn read_op_msg(mut reader: &[u8], header: &Header) -> Result<Self> {
        let flags = MessageFlags::from_bits_truncate(read_u32_le(&mut reader)?);

        let mut checksum = None;
        if flags.contains(MessageFlags::CHECKSUM_PRESENT) {
            if reader.len() < 4 {
                return Err(Error::protocol("checksum flag set but frame has no checksum"));
            }
            let (sections, mut checksum_bytes) = reader.split_at(reader.len() - 4);
            checksum = Some(read_u32_le(&mut checksum_bytes)?);
            reader = sections;
        }

        let mut document_payload = None;
        let mut document_sequences = Vec::new();
        while !reader.is_empty() {
            match MessageSection::read(&mut reader)? {
                MessageSection::Document(document) => {
                    if document_payload.is_some() {
                        return Err(Error::protocol(
                            "an OP_MSG must contain exactly one payload type 0 section",
                        ));
                    }
                    document_payload = Some(document);
                }
                MessageSection::Sequence(sequence) => document_sequences.push(sequence),
            }
        }

        Ok(Self {
            document_payload: document_payload.ok_or_else(|| {
                Error::protocol("an OP_MSG must contain exactly one payload type 0 section")
            })?,
            document_sequences,
            request_id: header.request_id,
            response_to: header.response_to,
            flags,
            checksum,
        })
    }

    /// Legacy replies only show up in answers to handshakes sent by very old servers.
    fn read_op_reply(mut reader: &[u8], header: &Header) -> Result<Self> {
        let _response_flags = read_i32_le(&mut reader)?;
        let _cursor_id = read_i64_le(&mut reader)?;
        let _starting_from = read_i32_le(&mut reader)?;
        let number_returned = read_i32_le(&mut reader)?;

        let mut documents = Vec::new();
        while !reader.is_empty() {
            documents.push(read_document(&mut reader)?);
        }
        if documents.len() != number_returned.max(0) as usize {
            return Err(Error::protocol(format!(
                "OP_REPLY announced {number_returned} documents but contained {}",
                documents.len()
            )));
        }

        let mut documents = documents.into_iter();
        let document_payload = documents
            .next()
            .ok_or_else(|| Error::protocol("OP_REPLY contained no documents"))?;

        Ok(Self {
            document_payload,
            document_sequences: Vec::new(),
            request_id: header.request_id,
            response_to: header.response_to,
            flags: MessageFlags::empty(),
            checksum: None,
        })
    }

    /// Serializes the Message to a complete frame.
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let mut flags = self.flags;
        if self.checksum.is_some() {
            flags |= MessageFlags::CHECKSUM_PRESENT;
        }

        let mut body = Vec::new();
        body.extend_from_slice(&flags.bits().to_le_bytes());

        // Payload type 0
        body.push(0);
        self.document_payload.to_writer(&mut body)?;

        for document_sequence in &self.document_sequences {
            // Payload type 1
            body.push(1);

            let mut sequence = Vec::new();
            write_cstring(&mut sequence, &document_sequence.identifier);
            for document in &document_sequence.documents {
                document.to_writer(&mut sequence)?;
            }

            // Size bytes + identifier bytes + null-terminator byte + document bytes
            let size = i32::try_from(sequence.len() + 4).map_err(|_| {
                Error::invalid_argument("document sequence exceeds the maximum message size")
            })?;
            body.extend_from_slice(&size.to_le_bytes());
            body.extend_from_slice(&sequence);
        }

        if let Some(checksum) = self.checksum {
            body.extend_from_slice(&checksum.to_le_bytes());
        }

        let length = i32::try_from(Header::LENGTH + body.len())
            .ok()
            .filter(|length| *length <= DEFAULT_MAX_MESSAGE_SIZE_BYTES)
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "message of {} bytes exceeds the maximum message size",
                    Header::LENGTH + body.len()
                ))
            })?;

        let header = Header {
            length,
            request_id: self.request_id,
            response_to: self.response_to,
            op_code: OpCode::Message,
        };

        let mut frame = Vec::with_capacity(length as usize);
        header.write_to(&mut frame);
        frame.extend_from_slice(&body);
        Ok(frame)
    }
}

bitflags! {
    /// Represents the bitwise flags for an OP_MSG.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub(crate) struct MessageFlags: u32 {
        const CHECKSUM_PRESENT = 0b_0000_0000_0000_0000_0000_0000_0000_0001;
        const MORE_TO_COME     = 0b_0000_0000_0000_0000_0000_0000_0000_0010;
        const EXHAUST_ALLOWED  = 0b_0000_0000_0000_0001_0000_0000_0000_0000;
    }
}

/// Represents a section of an OP_MSG.
#[derive(Debug)]
enum MessageSection {
    Document(Document),
    Sequence(DocumentSequence),
}

impl MessageSection {
    /// Reads bytes from `reader` and deserializes them into a MessageSection.
    fn read(reader: &mut &[u8]) -> Result<Self> {
        match read_u8(reader)? {
            0 => Ok(MessageSection::Document(read_document(reader)?)),
            1 => {
                let size = read_i32_le(reader)?;
                let length_remaining = usize::try_from(size.saturating_sub(4))
                    .ok()
                    .filter(|len| *len <= reader.len())
                    .ok_or_else(|| {
                        Error::protocol(format!(
                            "document sequence claims {size} bytes but only {} remain",
                            reader.len() + 4
                        ))
                    })?;
                let (mut section, rest) = reader.split_at(length_remaining);
                *reader = rest;

                let identifier = read_cstring(&mut section)?;
                let mut documents = Vec::new();
                while !section.is_empty() {
                    documents.push(read_document(&mut section)?);
                }

                Ok(MessageSection::Sequence(DocumentSequence {
                    identifier,
                    documents,
                }))
            }
            other => Err(Error::protocol(format!(
                "invalid OP_MSG section kind {other}"
            ))),
        }
    }
}

fn read_document(reader: &mut &[u8]) -> Result<Document> {
    let bytes = read_document_bytes(reader)?;
    Document::from_reader(bytes).map_err(|e| Error::protocol(format!("invalid document: {e}")))
}
