//! Core types and codecs for an E1.33 device.
//!
//! This crate knows how envelopes look on the wire and nothing about sockets.
//! An envelope nests three layers:
//!
//! - root: vector plus the sender's CID
//! - E1.33: source name, sequence number, target endpoint
//! - RDM: the request or response itself
//!
//! UDP datagrams and the TCP stream wrap root blocks in different preambles,
//! see [`framing`].

mod identity;

pub mod chain;
pub mod framing;
pub mod layers;
pub mod pdu;
pub mod rdm;
pub mod url_entry;

pub use chain::{DecodedRequest, DecoderChain, EnvelopeEncoder, TransportHeader, TransportKind};
pub use identity::{Cid, Uid, UidParseError};
pub use layers::{DecodeError, E133Header, EncodeError, RootHeader};
pub use rdm::{RdmError, RdmRequest, RdmResponse};
pub use url_entry::UrlEntry;

/// Well-known port for both the UDP socket and the TCP listener.
pub const E133_PORT: u16 = 5569;
