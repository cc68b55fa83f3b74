//! A minimal RDM responder that answers DEVICE_LABEL.

use e133_core::rdm::{CommandClass, nack, pid};
use e133_core::{RdmRequest, RdmResponse, Uid};
use parking_lot::Mutex;

use crate::endpoint::{Endpoint, RdmFailure, RdmReply, Responder};

pub const MAX_LABEL_LENGTH: usize = 32;

#[derive(Debug)]
pub struct LabelResponder {
    uid: Uid,
    label: Mutex<String>,
}

impl LabelResponder {
    /// A responder for `uid` with an initial label, cut to 32 bytes.
    pub fn new(uid: Uid, label: impl Into<String>) -> Self {
        let mut label = label.into();
        truncate_label(&mut label);
        Self {
            uid,
            label: Mutex::new(label),
        }
    }

    /// The UID this responder answers to.
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// The current device label.
    pub fn label(&self) -> String {
        self.label.lock().clone()
    }

    fn addressed_to_us(&self, destination: Uid) -> bool {
        destination == self.uid
            || destination == Uid::all_devices()
            || (destination.is_broadcast() && destination.manufacturer() == self.uid.manufacturer())
    }

    fn respond(&self, request: &RdmRequest) -> RdmResponse {
        match (request.param_id, request.command_class) {
            (pid::DEVICE_LABEL, CommandClass::Get) => {
                if !request.param_data.is_empty() {
                    return request.nack(nack::FORMAT_ERROR);
                }
                request.ack(self.label().into_bytes())
            }
            (pid::DEVICE_LABEL, CommandClass::Set) => {
                if request.param_data.len() > MAX_LABEL_LENGTH {
                    return request.nack(nack::DATA_OUT_OF_RANGE);
                }
                let label = String::from_utf8_lossy(&request.param_data).into_owned();
                tracing::debug!("{} label set to {:?}", self.uid, label);
                *self.label.lock() = label;
                request.ack(Vec::new())
            }
            (pid::SUPPORTED_PARAMETERS, CommandClass::Get) => {
                request.ack(pid::DEVICE_LABEL.to_be_bytes().to_vec())
            }
            (pid::DEVICE_LABEL | pid::SUPPORTED_PARAMETERS, _) => {
                request.nack(nack::UNSUPPORTED_COMMAND_CLASS)
            }
            _ => request.nack(nack::UNKNOWN_PID),
        }
    }
}

impl Endpoint for LabelResponder {
    fn handle_request(&self, request: RdmRequest, responder: Responder) {
        if !self.addressed_to_us(request.destination) {
            responder.complete(RdmReply::failed(RdmFailure::UnknownUid));
            return;
        }

        let response = self.respond(&request);
        if request.is_broadcast() {
            responder.complete(RdmReply::broadcast());
        } else {
            responder.complete(RdmReply::ok(response));
        }
    }
}

fn truncate_label(label: &mut String) {
    if label.len() <= MAX_LABEL_LENGTH {
        return;
    }
    let mut end = MAX_LABEL_LENGTH;
    while !label.is_char_boundary(end) {
        end -= 1;
    }
    label.truncate(end);
}
