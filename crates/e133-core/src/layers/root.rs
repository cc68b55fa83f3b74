//! Root layer: vector selects the protocol, header carries the sender's CID.

use bytes::BytesMut;

use super::{DecodeError, Layer};
use crate::Cid;
use crate::chain::TransportHeader;
use crate::pdu::{self, Pdu, PduError, PduShape};

pub const VECTOR_ROOT_E131: u32 = 0x0000_0004;
pub const VECTOR_ROOT_E133: u32 = 0x0000_0005;

pub const SHAPE: PduShape = PduShape {
    vector_size: 4,
    header_size: Cid::LENGTH,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootHeader {
    pub cid: Cid,
}

impl RootHeader {
    /// Decode a 16-byte root header.
    pub fn decode(header: &[u8]) -> Result<Self, DecodeError> {
        let bytes: [u8; Cid::LENGTH] =
            header.try_into().map_err(|_| DecodeError::HeaderLength {
                layer: RootLayer::NAME,
                actual: header.len(),
            })?;
        Ok(Self {
            cid: Cid::from_bytes(bytes),
        })
    }
}

/// Transport metadata plus the root header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootContext {
    pub transport: TransportHeader,
    pub root: RootHeader,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RootLayer;

impl Layer for RootLayer {
    type Parent = TransportHeader;
    type Output = RootContext;

    const NAME: &'static str = "root";
    const SHAPE: PduShape = SHAPE;
    const VECTOR: u32 = VECTOR_ROOT_E133;

    fn inflate(&self, parent: &TransportHeader, pdu: &Pdu<'_>) -> Result<RootContext, DecodeError> {
        Ok(RootContext {
            transport: *parent,
            root: RootHeader::decode(pdu.header)?,
        })
    }
}

/// Append a root PDU carrying `data` to `out`.
pub fn write(out: &mut BytesMut, vector: u32, header: &RootHeader, data: &[u8]) -> Result<(), PduError> {
    pdu::write_pdu(out, SHAPE, vector, header.cid.as_bytes(), data)
}
