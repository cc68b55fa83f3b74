//! E1.33 layer: source name, sequence number and target endpoint.

use bytes::{Buf, BufMut, BytesMut};

use super::{DecodeError, Layer};
use crate::pdu::{self, Pdu, PduError, PduShape};
use super::root::RootContext;

pub const VECTOR_FRAMING_RDM: u32 = 0x0000_0001;

pub const SOURCE_NAME_LENGTH: usize = 64;
pub const HEADER_LENGTH: usize = SOURCE_NAME_LENGTH + 4 + 2 + 1;

const OPTION_RX_ACK: u8 = 0x80;
const OPTION_TIMEOUT: u8 = 0x40;

pub const SHAPE: PduShape = PduShape {
    vector_size: 4,
    header_size: HEADER_LENGTH,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct E133Header {
    pub source_name: String,
    pub sequence: u32,
    pub endpoint: u16,
    pub rx_ack: bool,
    pub timeout: bool,
}

impl E133Header {
    /// A header with all options cleared.
    pub fn new(source_name: impl Into<String>, sequence: u32, endpoint: u16) -> Self {
        Self {
            source_name: source_name.into(),
            sequence,
            endpoint,
            rx_ack: false,
            timeout: false,
        }
    }

    /// Decode a 71-byte E1.33 header.
    pub fn decode(header: &[u8]) -> Result<Self, DecodeError> {
        if header.len() != HEADER_LENGTH {
            return Err(DecodeError::HeaderLength {
                layer: E133Layer::NAME,
                actual: header.len(),
            });
        }

        let (name, mut rest) = header.split_at(SOURCE_NAME_LENGTH);
        let end = name.iter().position(|b| *b == 0).unwrap_or(name.len());
        let source_name = std::str::from_utf8(&name[..end])
            .map_err(|_| DecodeError::InvalidSourceName)?
            .to_string();

        let sequence = rest.get_u32();
        let endpoint = rest.get_u16();
        let options = rest.get_u8();

        Ok(Self {
            source_name,
            sequence,
            endpoint,
            rx_ack: options & OPTION_RX_ACK != 0,
            timeout: options & OPTION_TIMEOUT != 0,
        })
    }

    /// The source name is NUL padded and truncated to leave room for one
    /// terminating NUL.
    pub fn encode(&self) -> [u8; HEADER_LENGTH] {
        let mut out = [0u8; HEADER_LENGTH];

        let mut end = self.source_name.len().min(SOURCE_NAME_LENGTH - 1);
        while !self.source_name.is_char_boundary(end) {
            end -= 1;
        }
        out[..end].copy_from_slice(&self.source_name.as_bytes()[..end]);

        let mut options = 0;
        if self.rx_ack {
            options |= OPTION_RX_ACK;
        }
        if self.timeout {
            options |= OPTION_TIMEOUT;
        }

        let mut tail = &mut out[SOURCE_NAME_LENGTH..];
        tail.put_u32(self.sequence);
        tail.put_u16(self.endpoint);
        tail.put_u8(options);
        out
    }
}

/// Everything known about a request once the E1.33 header is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct E133Context {
    pub parent: RootContext,
    pub header: E133Header,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct E133Layer;

impl Layer for E133Layer {
    type Parent = RootContext;
    type Output = E133Context;

    const NAME: &'static str = "e133";
    const SHAPE: PduShape = SHAPE;
    const VECTOR: u32 = VECTOR_FRAMING_RDM;

    fn inflate(&self, parent: &RootContext, pdu: &Pdu<'_>) -> Result<E133Context, DecodeError> {
        Ok(E133Context {
            parent: *parent,
            header: E133Header::decode(pdu.header)?,
        })
    }
}

/// Append an RDM-framing E1.33 PDU carrying `data` to `out`.
pub fn write(out: &mut BytesMut, header: &E133Header, data: &[u8]) -> Result<(), PduError> {
    pdu::write_pdu(out, SHAPE, VECTOR_FRAMING_RDM, &header.encode(), data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut header = E133Header::new("controller", 7, 3);
        header.rx_ack = true;
        let raw = header.encode();
        assert_eq!(raw.len(), 71);
        assert_eq!(&raw[..10], b"controller");
        assert_eq!(raw[10], 0);
        assert_eq!(&raw[64..68], &[0, 0, 0, 7]);
        assert_eq!(&raw[68..70], &[0, 3]);
        assert_eq!(raw[70], 0x80);
        assert_eq!(E133Header::decode(&raw).unwrap(), header);
    }

    #[test]
    fn long_source_name_truncated() {
        let header = E133Header::new("é".repeat(40), 1, 0);
        let raw = header.encode();
        // 63 bytes would split the last two-byte character.
        assert_eq!(raw[62], 0);
        let decoded = E133Header::decode(&raw).unwrap();
        assert_eq!(decoded.source_name, "é".repeat(31));
    }

    #[test]
    fn invalid_source_name() {
        let mut raw = E133Header::new("ok", 1, 0).encode();
        raw[0] = 0xff;
        assert_eq!(
            E133Header::decode(&raw),
            Err(DecodeError::InvalidSourceName)
        );
    }
}
