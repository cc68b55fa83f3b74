//! Decoder chain and the matching envelope encoder.
//!
//! Decoding never fails loudly: a PDU that does not parse is logged and
//! skipped, and only fully inflated RDM requests come out the other end.

use std::net::SocketAddr;

use bytes::BytesMut;

use crate::layers::{self, DecodeError, E133Header, EncodeError, Layer, RootHeader};
use crate::layers::{E133Layer, RdmLayer, RootLayer};
use crate::pdu::PduBlock;
use crate::rdm::{RdmRequest, RdmResponse};
use crate::Cid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
    Tcp,
}

/// Where a PDU block came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportHeader {
    pub source: SocketAddr,
    pub transport: TransportKind,
}

impl TransportHeader {
    /// Metadata for a block that arrived in a UDP datagram from `source`.
    pub fn udp(source: SocketAddr) -> Self {
        Self {
            source,
            transport: TransportKind::Udp,
        }
    }

    /// Metadata for a block read off the TCP connection with `source`.
    pub fn tcp(source: SocketAddr) -> Self {
        Self {
            source,
            transport: TransportKind::Tcp,
        }
    }
}

/// A fully decoded request with the metadata every layer exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRequest {
    pub transport: TransportHeader,
    pub root: RootHeader,
    pub e133: E133Header,
    pub request: RdmRequest,
}

impl DecodedRequest {
    /// The endpoint id from the E1.33 header.
    pub fn endpoint(&self) -> u16 {
        self.e133.endpoint
    }

    /// The sequence number from the E1.33 header.
    pub fn sequence(&self) -> u32 {
        self.e133.sequence
    }
}

/// Run one layer over a PDU block, pairing each output with its data.
pub fn decode_layer<'a, L: Layer>(
    layer: &L,
    parent: &L::Parent,
    block: &'a [u8],
) -> Vec<(L::Output, &'a [u8])> {
    let mut outputs = Vec::new();
    for pdu in PduBlock::new(block, L::SHAPE) {
        let pdu = match pdu {
            Ok(pdu) => pdu,
            Err(e) => {
                tracing::warn!(layer = L::NAME, "Dropping malformed PDU block: {}", e);
                break;
            }
        };

        if pdu.vector != L::VECTOR {
            tracing::debug!(layer = L::NAME, "Skipping PDU with vector {:#x}", pdu.vector);
            continue;
        }

        match layer.inflate(parent, &pdu) {
            Ok(output) => outputs.push((output, pdu.data)),
            Err(e) => tracing::warn!(layer = L::NAME, "Failed to inflate PDU: {}", e),
        }
    }
    outputs
}

/// Root → E1.33 → RDM.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecoderChain {
    root: RootLayer,
    e133: E133Layer,
    rdm: RdmLayer,
}

impl DecoderChain {
    /// Create a chain of the root, E1.33 and RDM layers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one root PDU block (preamble already removed).
    pub fn decode(&self, transport: TransportHeader, block: &[u8]) -> Vec<DecodedRequest> {
        let mut requests = Vec::new();
        for (root, data) in decode_layer(&self.root, &transport, block) {
            if data.is_empty() {
                tracing::debug!("Empty root PDU from {} ({})", transport.source, root.root.cid);
                continue;
            }
            for (e133, data) in decode_layer(&self.e133, &root, data) {
                for (request, _) in decode_layer(&self.rdm, &e133, data) {
                    requests.push(request);
                }
            }
        }
        requests
    }
}

/// Builds outgoing root PDU blocks stamped with the device CID.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeEncoder {
    root: RootHeader,
}

impl EnvelopeEncoder {
    /// Create an encoder that stamps every root PDU with `cid`.
    pub fn new(cid: Cid) -> Self {
        Self {
            root: RootHeader { cid },
        }
    }

    /// The CID written into every root header.
    pub fn cid(&self) -> Cid {
        self.root.cid
    }

    /// Wrap packed RDM data in the E1.33 and root layers.
    pub fn encode_rdm(&self, header: &E133Header, rdm_data: &[u8]) -> Result<BytesMut, EncodeError> {
        let mut rdm = BytesMut::new();
        layers::rdm::write(&mut rdm, rdm_data)?;

        let mut e133 = BytesMut::new();
        layers::e133::write(&mut e133, header, &rdm)?;

        let mut block = BytesMut::new();
        layers::root::write(&mut block, layers::root::VECTOR_ROOT_E133, &self.root, &e133)?;
        Ok(block)
    }

    /// A complete request block, as a controller sends it.
    pub fn encode_request(&self, header: &E133Header, request: &RdmRequest) -> Result<BytesMut, EncodeError> {
        self.encode_rdm(header, &request.pack()?)
    }

    /// A complete response block for the given E1.33 header.
    pub fn encode_response(&self, header: &E133Header, response: &RdmResponse) -> Result<BytesMut, EncodeError> {
        self.encode_rdm(header, &response.pack()?)
    }

    /// A root PDU with no data.
    pub fn encode_heartbeat(&self) -> Result<BytesMut, EncodeError> {
        let mut block = BytesMut::new();
        layers::root::write(&mut block, layers::root::VECTOR_ROOT_E133, &self.root, &[])?;
        Ok(block)
    }
}

/// Decode a response block, as a controller would.
pub fn decode_response(block: &[u8]) -> Result<(RootHeader, E133Header, RdmResponse), DecodeError> {
    let mut roots = PduBlock::new(block, layers::root::SHAPE);
    let root = roots
        .next()
        .ok_or(crate::pdu::PduError::Truncated { needed: 2, available: 0 })??;
    let root_header = RootHeader::decode(root.header)?;

    let e133 = PduBlock::new(root.data, layers::e133::SHAPE)
        .next()
        .ok_or(crate::pdu::PduError::Truncated { needed: 2, available: 0 })??;
    let e133_header = E133Header::decode(e133.header)?;

    let rdm = PduBlock::new(e133.data, layers::rdm::SHAPE)
        .next()
        .ok_or(crate::pdu::PduError::Truncated { needed: 2, available: 0 })??;
    let response = RdmResponse::inflate(rdm.data)?;

    Ok((root_header, e133_header, response))
}
