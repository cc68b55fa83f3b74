//! The interface a logical sub-device exposes to the dispatcher.

use std::sync::Arc;

use e133_core::{RdmRequest, RdmResponse};
use tokio::sync::oneshot;

/// Why a request did not produce a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RdmFailure {
    #[error("timeout")]
    Timeout,
    #[error("failed to send")]
    FailedToSend,
    #[error("unknown uid")]
    UnknownUid,
    #[error("invalid response")]
    InvalidResponse,
    #[error("checksum incorrect")]
    ChecksumIncorrect,
    #[error("transaction mismatch")]
    TransactionMismatch,
    #[error("sub-device mismatch")]
    SubDeviceMismatch,
    #[error("device mismatch")]
    DeviceMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    CompletedOk,
    /// The request went to a broadcast UID; there is nothing to answer.
    WasBroadcast,
    Failed(RdmFailure),
}

/// The outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmReply {
    pub status: ResponseStatus,
    pub response: Option<RdmResponse>,
}

impl RdmReply {
    /// A successful completion carrying `response`.
    pub fn ok(response: RdmResponse) -> Self {
        Self {
            status: ResponseStatus::CompletedOk,
            response: Some(response),
        }
    }

    /// The request was a broadcast; nothing will be sent.
    pub fn broadcast() -> Self {
        Self {
            status: ResponseStatus::WasBroadcast,
            response: None,
        }
    }

    /// The request failed; nothing will be sent.
    pub fn failed(failure: RdmFailure) -> Self {
        Self {
            status: ResponseStatus::Failed(failure),
            response: None,
        }
    }
}

/// One-shot completion for a single request.
///
/// Completing consumes the responder. Dropping it without completing is
/// reported to the dispatcher as a dropped request.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<RdmReply>,
}

impl Responder {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<RdmReply>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Finish the request.
    pub fn complete(self, reply: RdmReply) {
        // The receiver only goes away if the runtime is shutting down.
        let _ = self.tx.send(reply);
    }
}

/// A logical sub-device.
///
/// `handle_request` must not block. Long-running work moves the responder
/// into a task and completes it later.
pub trait Endpoint: Send + Sync {
    fn handle_request(&self, request: RdmRequest, responder: Responder);
}

pub type EndpointHandle = Arc<dyn Endpoint>;
