//! Transport preambles and TCP stream reassembly.
//!
//! UDP datagrams carry exactly one block behind a fixed preamble. The TCP
//! preamble carries the block length instead, which is what lets
//! [`TcpBlockCodec`] find block boundaries in the byte stream.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const ACN_PACKET_IDENTIFIER: [u8; 12] = *b"ASC-E1.17\0\0\0";
pub const PREAMBLE_LENGTH: usize = 16;

const UDP_PREAMBLE_SIZE: u16 = 0x0010;
const UDP_POSTAMBLE_SIZE: u16 = 0x0000;

/// Default cap on a single TCP block.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("datagram too short for preamble: {0} bytes")]
    Short(usize),
    #[error("invalid preamble")]
    InvalidPreamble,
    #[error("bad ACN packet identifier")]
    BadPacketIdentifier,
    #[error("block of {size} bytes exceeds limit of {max}")]
    BlockTooLarge { size: usize, max: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Strip the UDP preamble, returning the root PDU block.
pub fn strip_udp_preamble(datagram: &[u8]) -> Result<&[u8], FramingError> {
    if datagram.len() < PREAMBLE_LENGTH {
        return Err(FramingError::Short(datagram.len()));
    }
    let mut preamble = &datagram[..4];
    if preamble.get_u16() != UDP_PREAMBLE_SIZE || preamble.get_u16() != UDP_POSTAMBLE_SIZE {
        return Err(FramingError::InvalidPreamble);
    }
    if datagram[4..PREAMBLE_LENGTH] != ACN_PACKET_IDENTIFIER {
        return Err(FramingError::BadPacketIdentifier);
    }
    Ok(&datagram[PREAMBLE_LENGTH..])
}

/// Prefix a root PDU block with the UDP preamble.
pub fn udp_frame(block: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(PREAMBLE_LENGTH + block.len());
    out.put_u16(UDP_PREAMBLE_SIZE);
    out.put_u16(UDP_POSTAMBLE_SIZE);
    out.put_slice(&ACN_PACKET_IDENTIFIER);
    out.put_slice(block);
    out.freeze()
}

/// Reassembles root PDU blocks from a TCP byte stream.
///
/// Partial input stays buffered between reads. A bad packet identifier means
/// the stream position is lost and the connection has to go.
#[derive(Debug, Clone)]
pub struct TcpBlockCodec {
    max_block_size: usize,
}

impl TcpBlockCodec {
    /// A codec that rejects blocks larger than `max_block_size`.
    pub fn new(max_block_size: usize) -> Self {
        Self { max_block_size }
    }
}

impl Default for TcpBlockCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BLOCK_SIZE)
    }
}

impl Decoder for TcpBlockCodec {
    type Item = BytesMut;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, FramingError> {
        let checked = src.len().min(ACN_PACKET_IDENTIFIER.len());
        if src[..checked] != ACN_PACKET_IDENTIFIER[..checked] {
            return Err(FramingError::BadPacketIdentifier);
        }
        if src.len() < PREAMBLE_LENGTH {
            return Ok(None);
        }

        let mut length = &src[ACN_PACKET_IDENTIFIER.len()..PREAMBLE_LENGTH];
        let size = length.get_u32() as usize;
        if size > self.max_block_size {
            return Err(FramingError::BlockTooLarge {
                size,
                max: self.max_block_size,
            });
        }

        let total = PREAMBLE_LENGTH + size;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(PREAMBLE_LENGTH);
        Ok(Some(src.split_to(size)))
    }

    /// A peer that hangs up mid-block has simply closed; the partial block is
    /// discarded rather than reported as an I/O error.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, FramingError> {
        if let Some(block) = self.decode(src)? {
            return Ok(Some(block));
        }
        if !src.is_empty() {
            tracing::debug!("Discarding {} bytes of partial block at end of stream", src.len());
            src.clear();
        }
        Ok(None)
    }
}

impl Encoder<Bytes> for TcpBlockCodec {
    type Error = FramingError;

    fn encode(&mut self, block: Bytes, dst: &mut BytesMut) -> Result<(), FramingError> {
        if block.len() > self.max_block_size {
            return Err(FramingError::BlockTooLarge {
                size: block.len(),
                max: self.max_block_size,
            });
        }
        dst.reserve(PREAMBLE_LENGTH + block.len());
        dst.put_slice(&ACN_PACKET_IDENTIFIER);
        dst.put_u32(block.len() as u32);
        dst.put_slice(&block);
        Ok(())
    }
}
