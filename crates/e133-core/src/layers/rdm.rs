//! RDM layer: the vector is the RDM start code and the data is the message.

use bytes::BytesMut;

use super::e133::E133Context;
use super::{DecodeError, Layer};
use crate::chain::DecodedRequest;
use crate::pdu::{self, Pdu, PduError, PduShape};
use crate::rdm::{RdmRequest, START_CODE};

pub const VECTOR_RDM: u32 = START_CODE as u32;

pub const SHAPE: PduShape = PduShape {
    vector_size: 1,
    header_size: 0,
};

/// Innermost layer. Only structurally valid requests leave it.
#[derive(Debug, Default, Clone, Copy)]
pub struct RdmLayer;

impl Layer for RdmLayer {
    type Parent = E133Context;
    type Output = DecodedRequest;

    const NAME: &'static str = "rdm";
    const SHAPE: PduShape = SHAPE;
    const VECTOR: u32 = VECTOR_RDM;

    fn inflate(&self, parent: &E133Context, pdu: &Pdu<'_>) -> Result<DecodedRequest, DecodeError> {
        let request = RdmRequest::inflate(pdu.data)?;
        Ok(DecodedRequest {
            transport: parent.parent.transport,
            root: parent.parent.root,
            e133: parent.header.clone(),
            request,
        })
    }
}

/// Append an RDM PDU carrying a packed message (without start code) to `out`.
pub fn write(out: &mut BytesMut, data: &[u8]) -> Result<(), PduError> {
    pdu::write_pdu(out, SHAPE, VECTOR_RDM, &[], data)
}
