//! RDM (E1.20) messages as carried in the innermost layer.
//!
//! The RDM layer's vector is the start code, so the bytes handled here begin
//! at the sub start code. The start code still counts towards the message
//! length and the checksum.

use bytes::{BufMut, Bytes, BytesMut};

use crate::Uid;

pub const START_CODE: u8 = 0xcc;
pub const SUB_START_CODE: u8 = 0x01;

/// Start code through the parameter data length field.
const HEADER_LENGTH: usize = 24;
const CHECKSUM_LENGTH: usize = 2;
pub const MAX_PARAM_DATA_LENGTH: usize = 231;

/// Parameter ids used by this crate.
pub mod pid {
    pub const SUPPORTED_PARAMETERS: u16 = 0x0050;
    pub const DEVICE_LABEL: u16 = 0x0082;
}

/// NACK reason codes.
pub mod nack {
    pub const UNKNOWN_PID: u16 = 0x0000;
    pub const FORMAT_ERROR: u16 = 0x0001;
    pub const UNSUPPORTED_COMMAND_CLASS: u16 = 0x0005;
    pub const DATA_OUT_OF_RANGE: u16 = 0x0006;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    Discovery,
    DiscoveryResponse,
    Get,
    GetResponse,
    Set,
    SetResponse,
}

impl CommandClass {
    /// Parse the wire value; `None` for values RDM doesn't define.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x10 => Some(Self::Discovery),
            0x11 => Some(Self::DiscoveryResponse),
            0x20 => Some(Self::Get),
            0x21 => Some(Self::GetResponse),
            0x30 => Some(Self::Set),
            0x31 => Some(Self::SetResponse),
            _ => None,
        }
    }

    /// The wire value.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Discovery => 0x10,
            Self::DiscoveryResponse => 0x11,
            Self::Get => 0x20,
            Self::GetResponse => 0x21,
            Self::Set => 0x30,
            Self::SetResponse => 0x31,
        }
    }

    /// Whether a controller may send this class.
    pub fn is_request(self) -> bool {
        matches!(self, Self::Discovery | Self::Get | Self::Set)
    }

    /// The class a responder answers this request class with.
    pub fn response(self) -> Self {
        match self {
            Self::Discovery | Self::DiscoveryResponse => Self::DiscoveryResponse,
            Self::Get | Self::GetResponse => Self::GetResponse,
            Self::Set | Self::SetResponse => Self::SetResponse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Ack,
    AckTimer,
    NackReason,
    AckOverflow,
}

impl ResponseType {
    /// Parse the wire value; `None` for values RDM doesn't define.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Ack),
            0x01 => Some(Self::AckTimer),
            0x02 => Some(Self::NackReason),
            0x03 => Some(Self::AckOverflow),
            _ => None,
        }
    }

    /// The wire value.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Ack => 0x00,
            Self::AckTimer => 0x01,
            Self::NackReason => 0x02,
            Self::AckOverflow => 0x03,
        }
    }
}

/// Error inflating or packing an RDM message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RdmError {
    #[error("rdm message too short: {0} bytes")]
    TooShort(usize),
    #[error("invalid sub start code {0:#04x}")]
    InvalidSubStartCode(u8),
    #[error("message length {declared} does not match {actual} bytes of data")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("parameter data length {0} does not match the message length")]
    ParamDataLength(usize),
    #[error("parameter data too long: {0} bytes")]
    ParamDataTooLong(usize),
    #[error("unknown command class {0:#04x}")]
    UnknownCommandClass(u8),
    #[error("expected a request, got {0:?}")]
    NotARequest(CommandClass),
    #[error("expected a response, got {0:?}")]
    NotAResponse(CommandClass),
    #[error("invalid response type {0:#04x}")]
    InvalidResponseType(u8),
    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },
}

/// Fields shared by requests and responses, borrowed from the wire.
struct Frame<'a> {
    destination: Uid,
    source: Uid,
    transaction_number: u8,
    port_or_type: u8,
    message_count: u8,
    sub_device: u16,
    command_class: CommandClass,
    param_id: u16,
    param_data: &'a [u8],
}

fn checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(START_CODE as u16, |sum, b| sum.wrapping_add(*b as u16))
}

fn uid_at(data: &[u8], offset: usize) -> Uid {
    let mut bytes = [0u8; Uid::LENGTH];
    bytes.copy_from_slice(&data[offset..offset + Uid::LENGTH]);
    Uid::from_bytes(bytes)
}

impl<'a> Frame<'a> {
    fn parse(data: &'a [u8]) -> Result<Self, RdmError> {
        // Offsets below are relative to the sub start code.
        if data.len() < HEADER_LENGTH - 1 + CHECKSUM_LENGTH {
            return Err(RdmError::TooShort(data.len()));
        }
        if data[0] != SUB_START_CODE {
            return Err(RdmError::InvalidSubStartCode(data[0]));
        }

        let message_length = data[1] as usize;
        if message_length < HEADER_LENGTH || data.len() != message_length - 1 + CHECKSUM_LENGTH {
            return Err(RdmError::LengthMismatch {
                declared: message_length,
                actual: data.len() + 1,
            });
        }

        let param_data_length = data[22] as usize;
        if HEADER_LENGTH + param_data_length != message_length {
            return Err(RdmError::ParamDataLength(param_data_length));
        }

        let body = &data[..message_length - 1];
        let expected = u16::from_be_bytes([data[message_length - 1], data[message_length]]);
        let actual = checksum(body);
        if expected != actual {
            return Err(RdmError::ChecksumMismatch { expected, actual });
        }

        let command_class =
            CommandClass::from_u8(data[19]).ok_or(RdmError::UnknownCommandClass(data[19]))?;

        Ok(Self {
            destination: uid_at(data, 2),
            source: uid_at(data, 8),
            transaction_number: data[14],
            port_or_type: data[15],
            message_count: data[16],
            sub_device: u16::from_be_bytes([data[17], data[18]]),
            command_class,
            param_id: u16::from_be_bytes([data[20], data[21]]),
            param_data: &body[23..],
        })
    }

    fn pack(&self) -> Result<Bytes, RdmError> {
        if self.param_data.len() > MAX_PARAM_DATA_LENGTH {
            return Err(RdmError::ParamDataTooLong(self.param_data.len()));
        }
        let message_length = HEADER_LENGTH + self.param_data.len();

        let mut out = BytesMut::with_capacity(message_length + 1);
        out.put_u8(SUB_START_CODE);
        out.put_u8(message_length as u8);
        out.put_slice(&self.destination.to_bytes());
        out.put_slice(&self.source.to_bytes());
        out.put_u8(self.transaction_number);
        out.put_u8(self.port_or_type);
        out.put_u8(self.message_count);
        out.put_u16(self.sub_device);
        out.put_u8(self.command_class.as_u8());
        out.put_u16(self.param_id);
        out.put_u8(self.param_data.len() as u8);
        out.put_slice(self.param_data);
        let sum = checksum(&out);
        out.put_u16(sum);
        Ok(out.freeze())
    }
}

/// A request addressed to an endpoint's responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmRequest {
    pub destination: Uid,
    pub source: Uid,
    pub transaction_number: u8,
    pub port_id: u8,
    pub message_count: u8,
    pub sub_device: u16,
    pub command_class: CommandClass,
    pub param_id: u16,
    pub param_data: Bytes,
}

impl RdmRequest {
    /// Structurally validate `data` (sub start code onwards) as a request.
    pub fn inflate(data: &[u8]) -> Result<Self, RdmError> {
        let frame = Frame::parse(data)?;
        if !frame.command_class.is_request() {
            return Err(RdmError::NotARequest(frame.command_class));
        }
        Ok(Self {
            destination: frame.destination,
            source: frame.source,
            transaction_number: frame.transaction_number,
            port_id: frame.port_or_type,
            message_count: frame.message_count,
            sub_device: frame.sub_device,
            command_class: frame.command_class,
            param_id: frame.param_id,
            param_data: Bytes::copy_from_slice(frame.param_data),
        })
    }

    /// Serialize the request, sub start code through checksum.
    pub fn pack(&self) -> Result<Bytes, RdmError> {
        Frame {
            destination: self.destination,
            source: self.source,
            transaction_number: self.transaction_number,
            port_or_type: self.port_id,
            message_count: self.message_count,
            sub_device: self.sub_device,
            command_class: self.command_class,
            param_id: self.param_id,
            param_data: &self.param_data,
        }
        .pack()
    }

    /// Whether the destination is a broadcast UID.
    pub fn is_broadcast(&self) -> bool {
        self.destination.is_broadcast()
    }

    /// An ACK to this request carrying `param_data`.
    pub fn ack(&self, param_data: impl Into<Bytes>) -> RdmResponse {
        self.respond(ResponseType::Ack, param_data.into())
    }

    /// A NACK to this request with the given reason code.
    pub fn nack(&self, reason: u16) -> RdmResponse {
        self.respond(
            ResponseType::NackReason,
            Bytes::copy_from_slice(&reason.to_be_bytes()),
        )
    }

    fn respond(&self, response_type: ResponseType, param_data: Bytes) -> RdmResponse {
        RdmResponse {
            destination: self.source,
            source: self.destination,
            transaction_number: self.transaction_number,
            response_type,
            message_count: 0,
            sub_device: self.sub_device,
            command_class: self.command_class.response(),
            param_id: self.param_id,
            param_data,
        }
    }
}

/// A responder's answer to an [`RdmRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmResponse {
    pub destination: Uid,
    pub source: Uid,
    pub transaction_number: u8,
    pub response_type: ResponseType,
    pub message_count: u8,
    pub sub_device: u16,
    pub command_class: CommandClass,
    pub param_id: u16,
    pub param_data: Bytes,
}

impl RdmResponse {
    /// Structurally validate `data` (sub start code onwards) as a response.
    pub fn inflate(data: &[u8]) -> Result<Self, RdmError> {
        let frame = Frame::parse(data)?;
        if frame.command_class.is_request() {
            return Err(RdmError::NotAResponse(frame.command_class));
        }
        let response_type = ResponseType::from_u8(frame.port_or_type)
            .ok_or(RdmError::InvalidResponseType(frame.port_or_type))?;
        Ok(Self {
            destination: frame.destination,
            source: frame.source,
            transaction_number: frame.transaction_number,
            response_type,
            message_count: frame.message_count,
            sub_device: frame.sub_device,
            command_class: frame.command_class,
            param_id: frame.param_id,
            param_data: Bytes::copy_from_slice(frame.param_data),
        })
    }

    /// Serialize the response, sub start code through checksum.
    pub fn pack(&self) -> Result<Bytes, RdmError> {
        Frame {
            destination: self.destination,
            source: self.source,
            transaction_number: self.transaction_number,
            port_or_type: self.response_type.as_u8(),
            message_count: self.message_count,
            sub_device: self.sub_device,
            command_class: self.command_class,
            param_id: self.param_id,
            param_data: &self.param_data,
        }
        .pack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_label() -> RdmRequest {
        RdmRequest {
            destination: Uid::new(0x7a70, 1),
            source: Uid::new(0x4f4c, 0x10),
            transaction_number: 9,
            port_id: 1,
            message_count: 0,
            sub_device: 0,
            command_class: CommandClass::Get,
            param_id: pid::DEVICE_LABEL,
            param_data: Bytes::new(),
        }
    }

    #[test]
    fn packed_request_layout() {
        let data = get_label().pack().unwrap();
        // Start code is not included, so 24 header bytes - 1 + 2 checksum.
        assert_eq!(data.len(), 25);
        assert_eq!(data[0], SUB_START_CODE);
        assert_eq!(data[1], 24);
        assert_eq!(&data[2..8], &[0x7a, 0x70, 0, 0, 0, 1]);
        assert_eq!(data[19], 0x20);
        assert_eq!(&data[20..22], &[0x00, 0x82]);
        assert_eq!(data[22], 0);

        let sum = data[..23]
            .iter()
            .fold(START_CODE as u16, |s, b| s + *b as u16);
        assert_eq!(&data[23..], &sum.to_be_bytes());
    }

    #[test]
    fn inflate_request() {
        let mut request = get_label();
        request.command_class = CommandClass::Set;
        request.param_data = Bytes::from_static(b"stage left");
        let data = request.pack().unwrap();
        assert_eq!(RdmRequest::inflate(&data).unwrap(), request);
    }

    #[test]
    fn inflate_rejects_bad_checksum() {
        let mut data = get_label().pack().unwrap().to_vec();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        assert!(matches!(
            RdmRequest::inflate(&data),
            Err(RdmError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn inflate_rejects_truncated() {
        let mut request = get_label();
        request.param_data = Bytes::from_static(b"abc");
        let data = request.pack().unwrap();
        assert_eq!(
            RdmRequest::inflate(&data[..10]),
            Err(RdmError::TooShort(10))
        );
        assert!(matches!(
            RdmRequest::inflate(&data[..data.len() - 1]),
            Err(RdmError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn inflate_rejects_bad_sub_start_code() {
        let mut data = get_label().pack().unwrap().to_vec();
        data[0] = 0x02;
        assert_eq!(
            RdmRequest::inflate(&data),
            Err(RdmError::InvalidSubStartCode(0x02))
        );
    }

    #[test]
    fn request_inflate_rejects_responses() {
        let response = get_label().ack(Bytes::from_static(b"x"));
        let data = response.pack().unwrap();
        assert_eq!(
            RdmRequest::inflate(&data),
            Err(RdmError::NotARequest(CommandClass::GetResponse))
        );
        assert_eq!(RdmResponse::inflate(&data).unwrap(), response);
    }

    #[test]
    fn nack_swaps_addresses() {
        let request = get_label();
        let response = request.nack(nack::UNKNOWN_PID);
        assert_eq!(response.destination, request.source);
        assert_eq!(response.source, request.destination);
        assert_eq!(response.transaction_number, 9);
        assert_eq!(response.response_type, ResponseType::NackReason);
        assert_eq!(response.command_class, CommandClass::GetResponse);
        assert_eq!(response.param_data.as_ref(), &[0, 0]);
    }

    #[test]
    fn pack_rejects_oversized_param_data() {
        let mut request = get_label();
        request.param_data = Bytes::from(vec![0u8; MAX_PARAM_DATA_LENGTH + 1]);
        assert_eq!(
            request.pack(),
            Err(RdmError::ParamDataTooLong(MAX_PARAM_DATA_LENGTH + 1))
        );
    }
}
