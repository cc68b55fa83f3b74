//! The three nested layers of an E1.33 envelope.
//!
//! Each layer turns one PDU plus the metadata its parent exposed into a
//! typed output. The decoder chain composes them statically:
//! root → E1.33 → RDM.

pub mod e133;
pub mod rdm;
pub mod root;

use crate::pdu::{Pdu, PduError, PduShape};
use crate::rdm::RdmError;

pub use e133::{E133Context, E133Header, E133Layer};
pub use rdm::RdmLayer;
pub use root::{RootContext, RootHeader, RootLayer};

/// A single decoding stage.
pub trait Layer {
    /// Metadata accumulated by the enclosing layers.
    type Parent;
    type Output;

    const NAME: &'static str;
    const SHAPE: PduShape;
    /// PDUs with any other vector are skipped.
    const VECTOR: u32;

    fn inflate(&self, parent: &Self::Parent, pdu: &Pdu<'_>) -> Result<Self::Output, DecodeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Pdu(#[from] PduError),
    #[error("{layer} header is {actual} bytes")]
    HeaderLength { layer: &'static str, actual: usize },
    #[error("source name is not valid utf-8")]
    InvalidSourceName,
    #[error(transparent)]
    Rdm(#[from] RdmError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error(transparent)]
    Pdu(#[from] PduError),
    #[error(transparent)]
    Rdm(#[from] RdmError),
}
