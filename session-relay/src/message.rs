use std::{fmt, io};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    error::CodecError,
    frame::{FrameReader, write_frame},
};

/// Separator between the four envelope fields.
pub const DELIMITER: char = ':';

/// Longest accepted `source` field, in bytes.
pub const MAX_SOURCE_LEN: usize = 100;

/// Longest accepted `data` field, in bytes.
pub const MAX_DATA_LEN: usize = 1024;

/// Identity the relay stamps on its own replies.
pub const SERVER_SOURCE: &str = "server";

/// Closed set of message types with their stable wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageType {
    Login,
    LoAck,
    LoNak,
    Exit,
    Join,
    JnAck,
    JnNak,
    LeaveSess,
    NewSess,
    NsAck,
    Message,
    Query,
    QuAck,
    Register,
    RegAck,
    RegNak,
    PrivateMessage,
}

impl MessageType {
    pub const ALL: [MessageType; 17] = [
        MessageType::Login,
        MessageType::LoAck,
        MessageType::LoNak,
        MessageType::Exit,
        MessageType::Join,
        MessageType::JnAck,
        MessageType::JnNak,
        MessageType::LeaveSess,
        MessageType::NewSess,
        MessageType::NsAck,
        MessageType::Message,
        MessageType::Query,
        MessageType::QuAck,
        MessageType::Register,
        MessageType::RegAck,
        MessageType::RegNak,
        MessageType::PrivateMessage,
    ];

    pub fn code(self) -> u32 {
        match self {
            MessageType::Login => 1,
            MessageType::LoAck => 2,
            MessageType::LoNak => 3,
            MessageType::Exit => 4,
            MessageType::Join => 5,
            MessageType::JnAck => 6,
            MessageType::JnNak => 7,
            MessageType::LeaveSess => 8,
            MessageType::NewSess => 9,
            MessageType::NsAck => 10,
            MessageType::Message => 11,
            MessageType::Query => 12,
            MessageType::QuAck => 13,
            MessageType::Register => 14,
            MessageType::RegAck => 15,
            MessageType::RegNak => 16,
            MessageType::PrivateMessage => 17,
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = CodecError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        MessageType::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .ok_or(CodecError::UnknownType(code))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Login => "LOGIN",
            MessageType::LoAck => "LO_ACK",
            MessageType::LoNak => "LO_NAK",
            MessageType::Exit => "EXIT",
            MessageType::Join => "JOIN",
            MessageType::JnAck => "JN_ACK",
            MessageType::JnNak => "JN_NAK",
            MessageType::LeaveSess => "LEAVE_SESS",
            MessageType::NewSess => "NEW_SESS",
            MessageType::NsAck => "NS_ACK",
            MessageType::Message => "MESSAGE",
            MessageType::Query => "QUERY",
            MessageType::QuAck => "QU_ACK",
            MessageType::Register => "REGISTER",
            MessageType::RegAck => "REG_ACK",
            MessageType::RegNak => "REG_NAK",
            MessageType::PrivateMessage => "PRIVATE_MESSAGE",
        };
        f.write_str(name)
    }
}

/// The four-field unit exchanged over a connection.
///
/// `size` is whatever the peer declared; nothing in the relay trusts it over
/// `data.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MessageType,
    pub size: u32,
    pub source: String,
    pub data: String,
}

impl Envelope {
    pub fn new(kind: MessageType, source: impl Into<String>, data: impl Into<String>) -> Self {
        let data = data.into();
        Self {
            kind,
            size: u32::try_from(data.len()).unwrap_or(u32::MAX),
            source: source.into(),
            data,
        }
    }

    /// A reply stamped with the relay's own identity.
    pub fn from_server(kind: MessageType, data: impl Into<String>) -> Self {
        Self::new(kind, SERVER_SOURCE, data)
    }

    /// An error notice, delivered as a MESSAGE from the server.
    pub fn notice(text: impl Into<String>) -> Self {
        Self::from_server(MessageType::Message, text)
    }

    /// Serializes as `type:size:source:data`.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        check_len("source", &self.source, MAX_SOURCE_LEN)?;
        check_len("data", &self.data, MAX_DATA_LEN)?;
        if self.source.contains(DELIMITER) {
            return Err(CodecError::DelimiterInSource);
        }

        Ok(format!(
            "{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            self.kind.code(),
            self.size,
            self.source,
            self.data
        )
        .into_bytes())
    }

    /// Parses `type:size:source:data`.
    ///
    /// Only the first three delimiters split fields; `data` keeps any
    /// further `:` verbatim and may be empty.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        let fields: Vec<&str> = text.splitn(4, DELIMITER).collect();
        let &[kind, size, source, data] = fields.as_slice() else {
            return Err(CodecError::MalformedEnvelope {
                found: fields.len() - 1,
            });
        };

        let kind = MessageType::try_from(parse_number("type", kind)?)?;
        let size = parse_number("size", size)?;
        check_len("source", source, MAX_SOURCE_LEN)?;
        check_len("data", data, MAX_DATA_LEN)?;

        Ok(Self {
            kind,
            size,
            source: source.to_string(),
            data: data.to_string(),
        })
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<u32, CodecError> {
    value.parse().map_err(|_| CodecError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn check_len(field: &'static str, value: &str, limit: usize) -> Result<(), CodecError> {
    if value.len() > limit {
        return Err(CodecError::FieldTooLong {
            field,
            len: value.len(),
            limit,
        });
    }
    Ok(())
}

/// Body of a PRIVATE_MESSAGE request, carried as JSON in `data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrivatePayload {
    pub target: String,
    pub body: String,
}

impl PrivatePayload {
    pub fn new(target: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            body: body.into(),
        }
    }

    pub fn to_data(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_data(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

/// Reads the next envelope, or `None` once the peer closes cleanly.
///
/// Framing and codec failures surface as `InvalidData`; the relay itself
/// reads frames directly so it can keep the connection after a bad envelope.
pub async fn read_envelope<R>(reader: &mut FrameReader<R>) -> io::Result<Option<Envelope>>
where
    R: AsyncRead + Unpin,
{
    let Some(frame) = reader.next_frame().await.map_err(to_io_error)? else {
        return Ok(None);
    };
    Envelope::decode(&frame).map(Some).map_err(to_io_error)
}

pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = envelope.encode().map_err(to_io_error)?;
    write_frame(writer, &encoded).await
}

fn to_io_error<E>(err: E) -> io::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}
