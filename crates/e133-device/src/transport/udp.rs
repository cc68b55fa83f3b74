//! UDP binding: one root block per datagram in, responses out.

use std::sync::Arc;

use e133_core::framing::strip_udp_preamble;
use e133_core::{DecoderChain, TransportHeader};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{Dispatcher, OutgoingDatagram};

// Largest UDP payload, so nothing arrives truncated.
const MAX_DATAGRAM_SIZE: usize = 65535;

pub struct UdpBinding {
    socket: UdpSocket,
    dispatcher: Arc<Dispatcher>,
    outgoing: mpsc::UnboundedReceiver<OutgoingDatagram>,
    chain: DecoderChain,
}

impl UdpBinding {
    /// Serve `socket`, sending whatever arrives on `outgoing` back out of it.
    pub fn new(
        socket: UdpSocket,
        dispatcher: Arc<Dispatcher>,
        outgoing: mpsc::UnboundedReceiver<OutgoingDatagram>,
    ) -> Self {
        Self {
            socket,
            dispatcher,
            outgoing,
            chain: DecoderChain::new(),
        }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, source)) => self.on_datagram(&buf[..len], TransportHeader::udp(source)),
                    Err(e) => tracing::warn!("UDP receive failed: {}", e),
                },

                Some(datagram) = self.outgoing.recv() => {
                    if let Err(e) = self.socket.send_to(&datagram.payload, datagram.destination).await {
                        tracing::warn!("Failed to send E1.33 response to {}: {}", datagram.destination, e);
                    }
                }
            }
        }
        tracing::info!("UDP transport stopped");
    }

    fn on_datagram(&self, datagram: &[u8], transport: TransportHeader) {
        let block = match strip_udp_preamble(datagram) {
            Ok(block) => block,
            Err(e) => {
                tracing::debug!("Dropping datagram from {}: {}", transport.source, e);
                return;
            }
        };

        for request in self.chain.decode(transport, block) {
            if let Err(e) = self.dispatcher.dispatch(request) {
                tracing::warn!("Dropping request from {}: {}", transport.source, e);
            }
        }
    }
}
