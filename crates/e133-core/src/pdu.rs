//! ACN PDU framing shared by every layer.
//!
//! ```text
//! +-------+--------+--------+--------+------+
//! | flags | length | vector | header | data |
//! +-------+--------+--------+--------+------+
//!  4 bits  12 or 20 bits
//! ```
//!
//! The length covers the whole PDU. Within a block, a PDU that leaves the
//! vector, header or data flag clear reuses that field from the PDU before it.

use bytes::{Buf, BufMut, BytesMut};

pub const FLAG_EXTENDED_LENGTH: u8 = 0x80;
pub const FLAG_VECTOR: u8 = 0x40;
pub const FLAG_HEADER: u8 = 0x20;
pub const FLAG_DATA: u8 = 0x10;

const MAX_SHORT_LENGTH: usize = 0x0fff;
const MAX_EXTENDED_LENGTH: usize = 0x0f_ffff;

/// Vector and header sizes of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduShape {
    pub vector_size: usize,
    pub header_size: usize,
}

/// One PDU with inherited fields already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pdu<'a> {
    pub vector: u32,
    pub header: &'a [u8],
    pub data: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduField {
    Vector,
    Header,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PduError {
    #[error("pdu truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("invalid pdu length {0}")]
    InvalidLength(usize),
    #[error("first pdu in block inherits its {0:?}")]
    NothingToInherit(PduField),
    #[error("pdu too long to encode: {0} bytes")]
    TooLong(usize),
}

/// Iterates over the PDUs of a block.
///
/// Framing errors end the iteration: once a length is bad, nothing after it
/// can be located.
pub struct PduBlock<'a> {
    remaining: &'a [u8],
    shape: PduShape,
    previous: Option<Pdu<'a>>,
    failed: bool,
}

impl<'a> PduBlock<'a> {
    /// Iterate the PDUs of `data`, each laid out as `shape`.
    pub fn new(data: &'a [u8], shape: PduShape) -> Self {
        Self {
            remaining: data,
            shape,
            previous: None,
            failed: false,
        }
    }

    fn parse_next(&mut self) -> Result<Pdu<'a>, PduError> {
        let buf = self.remaining;
        if buf.len() < 2 {
            return Err(PduError::Truncated {
                needed: 2,
                available: buf.len(),
            });
        }

        let flags = buf[0] & 0xf0;
        let (length, length_size) = if flags & FLAG_EXTENDED_LENGTH != 0 {
            if buf.len() < 3 {
                return Err(PduError::Truncated {
                    needed: 3,
                    available: buf.len(),
                });
            }
            let length = ((buf[0] as usize & 0x0f) << 16) | ((buf[1] as usize) << 8) | buf[2] as usize;
            (length, 3)
        } else {
            (((buf[0] as usize & 0x0f) << 8) | buf[1] as usize, 2)
        };

        if length < length_size {
            return Err(PduError::InvalidLength(length));
        }
        if length > buf.len() {
            return Err(PduError::Truncated {
                needed: length,
                available: buf.len(),
            });
        }

        let mut body = &buf[length_size..length];

        let vector = if flags & FLAG_VECTOR != 0 {
            let size = self.shape.vector_size;
            if body.len() < size {
                return Err(PduError::InvalidLength(length));
            }
            let (mut raw, rest) = body.split_at(size);
            body = rest;
            raw.get_uint(size) as u32
        } else {
            self.previous
                .map(|p| p.vector)
                .ok_or(PduError::NothingToInherit(PduField::Vector))?
        };

        let header = if flags & FLAG_HEADER != 0 {
            let size = self.shape.header_size;
            if body.len() < size {
                return Err(PduError::InvalidLength(length));
            }
            let (header, rest) = body.split_at(size);
            body = rest;
            header
        } else {
            self.previous
                .map(|p| p.header)
                .ok_or(PduError::NothingToInherit(PduField::Header))?
        };

        let data = if flags & FLAG_DATA != 0 {
            body
        } else if body.is_empty() {
            self.previous
                .map(|p| p.data)
                .ok_or(PduError::NothingToInherit(PduField::Data))?
        } else {
            return Err(PduError::InvalidLength(length));
        };

        self.remaining = &buf[length..];
        Ok(Pdu {
            vector,
            header,
            data,
        })
    }
}

impl<'a> Iterator for PduBlock<'a> {
    type Item = Result<Pdu<'a>, PduError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining.is_empty() {
            return None;
        }
        match self.parse_next() {
            Ok(pdu) => {
                self.previous = Some(pdu);
                Some(Ok(pdu))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Append a PDU with every field present.
pub fn write_pdu(
    out: &mut BytesMut,
    shape: PduShape,
    vector: u32,
    header: &[u8],
    data: &[u8],
) -> Result<(), PduError> {
    debug_assert_eq!(header.len(), shape.header_size);

    let body = shape.vector_size + header.len() + data.len();
    let flags = FLAG_VECTOR | FLAG_HEADER | FLAG_DATA;

    if body + 2 <= MAX_SHORT_LENGTH {
        let length = body + 2;
        out.put_u8(flags | (length >> 8) as u8);
        out.put_u8(length as u8);
    } else if body + 3 <= MAX_EXTENDED_LENGTH {
        let length = body + 3;
        out.put_u8(flags | FLAG_EXTENDED_LENGTH | (length >> 16) as u8);
        out.put_u16(length as u16);
    } else {
        return Err(PduError::TooLong(body + 3));
    }

    out.put_uint(vector as u64, shape.vector_size);
    out.put_slice(header);
    out.put_slice(data);
    Ok(())
}
