//! Routes decoded requests to endpoints and sends their responses.
//!
//! A request is routed only if its endpoint has a routing entry. Entries
//! follow registry notifications, and the root entry appears once a root
//! endpoint is installed. The handle is re-resolved at dispatch time, so an
//! unregister that lands between decode and dispatch fails cleanly.
//!
//! Responses always go out over UDP to the requester's address, whichever
//! transport carried the request.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use e133_core::framing::udp_frame;
use e133_core::{DecodedRequest, E133Header, EnvelopeEncoder};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::oneshot::error::RecvError;

use crate::endpoint::{EndpointHandle, RdmReply, Responder, ResponseStatus};
use crate::registry::{EndpointObserver, EndpointRegistry, ROOT_ENDPOINT};

/// A datagram queued for the UDP socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingDatagram {
    pub destination: SocketAddr,
    pub payload: Bytes,
}

/// Captured at decode time and owned by the completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub source: SocketAddr,
    pub sequence: u32,
    pub endpoint: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler for endpoint {0}")]
    NoRoute(u16),
    #[error("request to endpoint {0} but no endpoint has been registered")]
    EndpointGone(u16),
}

/// What became of a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Sent,
    Broadcast,
    Failed,
    Dropped,
}

/// Builds and queues responses. Cloned into every pending completion.
#[derive(Clone)]
pub struct ResponseSender {
    encoder: EnvelopeEncoder,
    source_name: Arc<str>,
    outgoing: mpsc::UnboundedSender<OutgoingDatagram>,
}

impl ResponseSender {
    /// Responses are stamped with `source_name` and queued on `outgoing`.
    pub fn new(
        encoder: EnvelopeEncoder,
        source_name: impl Into<Arc<str>>,
        outgoing: mpsc::UnboundedSender<OutgoingDatagram>,
    ) -> Self {
        Self {
            encoder,
            source_name: source_name.into(),
            outgoing,
        }
    }

    /// Turn a completion into at most one queued response.
    pub fn complete(&self, ctx: RequestContext, reply: Result<RdmReply, RecvError>) -> Completion {
        let reply = match reply {
            Ok(reply) => reply,
            Err(_) => {
                tracing::debug!("Endpoint {} dropped request {}", ctx.endpoint, ctx.sequence);
                return Completion::Dropped;
            }
        };

        let response = match (reply.status, reply.response) {
            (ResponseStatus::CompletedOk, Some(response)) => response,
            (ResponseStatus::CompletedOk, None) => {
                tracing::warn!("E1.33 request completed without a response, dropping request");
                return Completion::Failed;
            }
            (ResponseStatus::WasBroadcast, _) => return Completion::Broadcast,
            (ResponseStatus::Failed(failure), _) => {
                tracing::warn!("E1.33 request failed with code {}, dropping request", failure);
                return Completion::Failed;
            }
        };

        let header = E133Header::new(&*self.source_name, ctx.sequence, ctx.endpoint);
        let block = match self.encoder.encode_response(&header, &response) {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!("Failed to encode E1.33 response: {}", e);
                return Completion::Failed;
            }
        };

        let datagram = OutgoingDatagram {
            destination: ctx.source,
            payload: udp_frame(&block),
        };
        if self.outgoing.send(datagram).is_err() {
            tracing::warn!("Failed to send E1.33 response, UDP transport is gone");
            return Completion::Failed;
        }
        Completion::Sent
    }
}

pub struct Dispatcher {
    registry: Arc<EndpointRegistry>,
    root: RwLock<Option<EndpointHandle>>,
    routes: Mutex<HashSet<u16>>,
    responses: ResponseSender,
}

impl Dispatcher {
    /// Create a dispatcher and subscribe it to `registry`. Endpoints already
    /// registered get routing entries as part of the subscription.
    pub fn new(registry: Arc<EndpointRegistry>, responses: ResponseSender) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            registry: registry.clone(),
            root: RwLock::new(None),
            routes: Mutex::new(HashSet::new()),
            responses,
        });
        let observer: Arc<dyn EndpointObserver> = dispatcher.clone();
        registry.subscribe(Arc::downgrade(&observer));
        dispatcher
    }

    /// Install the endpoint that answers id 0, replacing any previous one.
    pub fn set_root_endpoint(&self, endpoint: EndpointHandle) {
        *self.root.write() = Some(endpoint);
        self.routes.lock().insert(ROOT_ENDPOINT);
    }

    /// Whether requests for `id` are routed.
    pub fn has_route(&self, id: u16) -> bool {
        self.routes.lock().contains(&id)
    }

    fn resolve(&self, id: u16) -> Option<EndpointHandle> {
        if id == ROOT_ENDPOINT {
            self.root.read().clone()
        } else {
            self.registry.lookup(id)
        }
    }

    /// Hand a decoded request to its endpoint. Returns as soon as the
    /// endpoint has it; the response, if any, is sent on completion.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, decoded: DecodedRequest) -> Result<(), DispatchError> {
        let id = decoded.endpoint();
        if !self.has_route(id) {
            return Err(DispatchError::NoRoute(id));
        }

        tracing::info!(
            "Got request for endpoint {} from {}",
            id, decoded.transport.source
        );

        let endpoint = self.resolve(id).ok_or(DispatchError::EndpointGone(id))?;

        let ctx = RequestContext {
            source: decoded.transport.source,
            sequence: decoded.sequence(),
            endpoint: id,
        };
        let (responder, reply) = Responder::channel();
        let responses = self.responses.clone();
        tokio::spawn(async move {
            responses.complete(ctx, reply.await);
        });

        endpoint.handle_request(decoded.request, responder);
        Ok(())
    }
}

impl EndpointObserver for Dispatcher {
    fn endpoint_added(&self, id: u16) {
        self.routes.lock().insert(id);
    }

    fn endpoint_removed(&self, id: u16) {
        self.routes.lock().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Endpoint, RdmFailure};
    use bytes::Bytes;
    use e133_core::chain::decode_response;
    use e133_core::rdm::{CommandClass, pid};
    use e133_core::{Cid, RdmRequest, TransportHeader, Uid};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn requester() -> SocketAddr {
        "10.0.0.5:6000".parse().unwrap()
    }

    fn get_label() -> RdmRequest {
        RdmRequest {
            destination: Uid::new(0x7a70, 1),
            source: Uid::new(0x4f4c, 2),
            transaction_number: 1,
            port_id: 1,
            message_count: 0,
            sub_device: 0,
            command_class: CommandClass::Get,
            param_id: pid::DEVICE_LABEL,
            param_data: Bytes::new(),
        }
    }

    fn decoded(endpoint: u16, sequence: u32) -> DecodedRequest {
        DecodedRequest {
            transport: TransportHeader::udp(requester()),
            root: e133_core::RootHeader { cid: Cid::generate() },
            e133: E133Header::new("controller", sequence, endpoint),
            request: get_label(),
        }
    }

    /// Completes every request with a fixed reply.
    struct Fixed(Option<RdmReply>);

    impl Endpoint for Fixed {
        fn handle_request(&self, request: RdmRequest, responder: Responder) {
            match &self.0 {
                Some(reply) => responder.complete(reply.clone()),
                None => responder.complete(RdmReply::ok(request.ack(Bytes::from_static(b"hi")))),
            }
        }
    }

    /// Hands the responder out so the test decides when to complete.
    struct Deferred(Mutex<Option<oneshot::Sender<Responder>>>);

    impl Endpoint for Deferred {
        fn handle_request(&self, _request: RdmRequest, responder: Responder) {
            if let Some(tx) = self.0.lock().take() {
                let _ = tx.send(responder);
            }
        }
    }

    fn setup() -> (
        Arc<EndpointRegistry>,
        Arc<Dispatcher>,
        mpsc::UnboundedReceiver<OutgoingDatagram>,
    ) {
        let registry = EndpointRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let responses = ResponseSender::new(EnvelopeEncoder::new(Cid::generate()), "device", tx);
        let dispatcher = Dispatcher::new(registry.clone(), responses);
        (registry, dispatcher, rx)
    }

    async fn next_datagram(
        rx: &mut mpsc::UnboundedReceiver<OutgoingDatagram>,
    ) -> Option<OutgoingDatagram> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn success_sends_one_correlated_response() {
        let (registry, dispatcher, mut rx) = setup();
        registry.register(3, Arc::new(Fixed(None))).unwrap();

        dispatcher.dispatch(decoded(3, 7)).unwrap();

        let datagram = next_datagram(&mut rx).await.unwrap();
        assert_eq!(datagram.destination, requester());
        let block = e133_core::framing::strip_udp_preamble(&datagram.payload).unwrap();
        let (_, header, response) = decode_response(block).unwrap();
        assert_eq!(header.sequence, 7);
        assert_eq!(header.endpoint, 3);
        assert_eq!(header.source_name, "device");
        assert_eq!(response.param_data.as_ref(), b"hi");

        assert!(next_datagram(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn unknown_endpoint_is_dropped() {
        let (registry, dispatcher, mut rx) = setup();
        assert_eq!(
            dispatcher.dispatch(decoded(5, 1)),
            Err(DispatchError::NoRoute(5))
        );
        assert!(registry.is_empty());
        assert!(next_datagram(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn root_needs_installing() {
        let (_registry, dispatcher, mut rx) = setup();
        assert_eq!(
            dispatcher.dispatch(decoded(0, 1)),
            Err(DispatchError::NoRoute(0))
        );

        dispatcher.set_root_endpoint(Arc::new(Fixed(None)));
        dispatcher.dispatch(decoded(0, 2)).unwrap();
        let datagram = next_datagram(&mut rx).await.unwrap();
        let block = e133_core::framing::strip_udp_preamble(&datagram.payload).unwrap();
        let (_, header, _) = decode_response(block).unwrap();
        assert_eq!(header.endpoint, 0);
        assert_eq!(header.sequence, 2);
    }

    #[tokio::test]
    async fn broadcast_and_failure_send_nothing() {
        let (registry, dispatcher, mut rx) = setup();
        registry
            .register(1, Arc::new(Fixed(Some(RdmReply::broadcast()))))
            .unwrap();
        registry
            .register(2, Arc::new(Fixed(Some(RdmReply::failed(RdmFailure::Timeout)))))
            .unwrap();
        registry
            .register(
                3,
                Arc::new(Fixed(Some(RdmReply {
                    status: ResponseStatus::CompletedOk,
                    response: None,
                }))),
            )
            .unwrap();

        for id in 1..=3 {
            dispatcher.dispatch(decoded(id, 10)).unwrap();
        }
        assert!(next_datagram(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn unregistered_endpoint_loses_its_route() {
        let (registry, dispatcher, _rx) = setup();
        registry.register(8, Arc::new(Fixed(None))).unwrap();
        assert!(dispatcher.has_route(8));
        registry.unregister(8).unwrap();
        assert!(!dispatcher.has_route(8));
        assert_eq!(
            dispatcher.dispatch(decoded(8, 1)),
            Err(DispatchError::NoRoute(8))
        );
    }

    #[test]
    fn routes_follow_racing_registry_changes() {
        let registry = EndpointRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let responses = ResponseSender::new(EnvelopeEncoder::new(Cid::generate()), "device", tx);

        // Subscribed ahead of the dispatcher and slow to hear about removals.
        struct Sluggish;
        impl EndpointObserver for Sluggish {
            fn endpoint_added(&self, _id: u16) {}
            fn endpoint_removed(&self, _id: u16) {
                std::thread::sleep(Duration::from_millis(50));
            }
        }
        let sluggish: Arc<dyn EndpointObserver> = Arc::new(Sluggish);
        registry.subscribe(Arc::downgrade(&sluggish));

        registry.register(9, Arc::new(Fixed(None))).unwrap();
        let dispatcher = Dispatcher::new(registry.clone(), responses);
        assert!(dispatcher.has_route(9));

        let remover = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.unregister(9).map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(10));
        while registry.register(9, Arc::new(Fixed(None))).is_err() {
            std::thread::yield_now();
        }
        remover.join().unwrap().unwrap();

        assert!(registry.lookup(9).is_some());
        assert!(dispatcher.has_route(9));
    }

    #[tokio::test]
    async fn out_of_order_completions_keep_their_context() {
        let (registry, dispatcher, mut rx) = setup();
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        registry
            .register(1, Arc::new(Deferred(Mutex::new(Some(first_tx)))))
            .unwrap();
        registry
            .register(2, Arc::new(Deferred(Mutex::new(Some(second_tx)))))
            .unwrap();

        dispatcher.dispatch(decoded(1, 100)).unwrap();
        dispatcher.dispatch(decoded(2, 200)).unwrap();

        let first = first_rx.await.unwrap();
        let second = second_rx.await.unwrap();
        second.complete(RdmReply::ok(get_label().ack(Bytes::new())));
        first.complete(RdmReply::ok(get_label().ack(Bytes::new())));

        let mut seen = Vec::new();
        for _ in 0..2 {
            let datagram = next_datagram(&mut rx).await.unwrap();
            let block = e133_core::framing::strip_udp_preamble(&datagram.payload).unwrap();
            let (_, header, _) = decode_response(block).unwrap();
            seen.push((header.endpoint, header.sequence));
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![(1, 100), (2, 200)]);
    }

    #[test]
    fn dropped_responder_sends_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let responses = ResponseSender::new(EnvelopeEncoder::new(Cid::generate()), "device", tx);
        let (responder, reply) = Responder::channel();
        drop(responder);

        let ctx = RequestContext {
            source: requester(),
            sequence: 1,
            endpoint: 1,
        };
        let reply = reply.blocking_recv();
        assert_eq!(responses.complete(ctx, reply), Completion::Dropped);
        assert!(rx.try_recv().is_err());
    }
}
