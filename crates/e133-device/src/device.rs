//! The device owner: identity, registry and both transports.

use std::net::SocketAddr;
use std::sync::Arc;

use e133_core::{Cid, EnvelopeEncoder};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::DeviceConfig;
use crate::connection::{ConnectionEvent, ConnectionSlot, TcpConnectionStats};
use crate::dispatcher::{Dispatcher, OutgoingDatagram, ResponseSender};
use crate::endpoint::EndpointHandle;
use crate::registry::EndpointRegistry;
use crate::transport::{TcpBinding, UdpBinding};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to bind UDP socket to {addr}: {source}")]
    UdpBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to listen on {addr}: {source}")]
    TcpListen {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// A configured device that hasn't opened its sockets yet.
pub struct E133Device {
    config: DeviceConfig,
    encoder: EnvelopeEncoder,
    registry: Arc<EndpointRegistry>,
    dispatcher: Arc<Dispatcher>,
    connections: ConnectionSlot,
    outgoing: mpsc::UnboundedReceiver<OutgoingDatagram>,
}

impl E133Device {
    /// Create a device with a fresh CID. Nothing is bound until [`E133Device::start`].
    pub fn new(config: DeviceConfig) -> Self {
        let cid = Cid::generate();
        let encoder = EnvelopeEncoder::new(cid);
        let registry = EndpointRegistry::new();
        let (tx, outgoing) = mpsc::unbounded_channel();
        let responses = ResponseSender::new(encoder, config.source_name.as_str(), tx);
        let dispatcher = Dispatcher::new(registry.clone(), responses);

        Self {
            config,
            encoder,
            registry,
            dispatcher,
            connections: ConnectionSlot::new(),
            outgoing,
        }
    }

    /// The CID this device stamps on everything it sends.
    pub fn cid(&self) -> Cid {
        self.encoder.cid()
    }

    /// The dynamic endpoint registry.
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Install the endpoint that answers id 0.
    pub fn set_root_endpoint(&self, endpoint: EndpointHandle) {
        self.dispatcher.set_root_endpoint(endpoint);
    }

    /// The TCP connection slot, for stats and events.
    pub fn connections(&self) -> &ConnectionSlot {
        &self.connections
    }

    /// Bind both sockets and start serving.
    ///
    /// UDP binds first. With port 0 the TCP listener takes whatever port the
    /// UDP socket was given so both transports share one port.
    pub async fn start(self) -> Result<RunningDevice, DeviceError> {
        let addr = self.config.listen_addr();
        tracing::info!("Attempting to start E1.33 device at {}", addr);

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| DeviceError::UdpBind { addr, source })?;
        let udp_addr = socket.local_addr().map_err(DeviceError::LocalAddr)?;

        let tcp_bind = SocketAddr::new(addr.ip(), udp_addr.port());
        let listener = TcpListener::bind(tcp_bind)
            .await
            .map_err(|source| DeviceError::TcpListen {
                addr: tcp_bind,
                source,
            })?;
        let tcp_addr = listener.local_addr().map_err(DeviceError::LocalAddr)?;

        let shutdown = CancellationToken::new();
        let udp = UdpBinding::new(socket, self.dispatcher.clone(), self.outgoing);
        let tcp = TcpBinding::new(
            listener,
            self.connections.clone(),
            self.dispatcher.clone(),
            self.encoder,
            self.config.health_check_interval(),
            self.config.max_block_size,
        );
        let tasks = vec![
            tokio::spawn(udp.run(shutdown.clone())),
            tokio::spawn(tcp.run(shutdown.clone())),
        ];

        tracing::info!(
            "E1.33 device {} listening on UDP {} and TCP {}",
            self.encoder.cid(),
            udp_addr,
            tcp_addr
        );

        Ok(RunningDevice {
            cid: self.encoder.cid(),
            udp_addr,
            tcp_addr,
            registry: self.registry,
            dispatcher: self.dispatcher,
            connections: self.connections,
            shutdown,
            tasks,
        })
    }
}

pub struct RunningDevice {
    cid: Cid,
    udp_addr: SocketAddr,
    tcp_addr: SocketAddr,
    registry: Arc<EndpointRegistry>,
    dispatcher: Arc<Dispatcher>,
    connections: ConnectionSlot,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningDevice {
    /// The device CID.
    pub fn cid(&self) -> Cid {
        self.cid
    }

    /// Local address of the UDP socket.
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Local address of the TCP listener.
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    /// The dynamic endpoint registry.
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Install or replace the endpoint that answers id 0.
    pub fn set_root_endpoint(&self, endpoint: EndpointHandle) {
        self.dispatcher.set_root_endpoint(endpoint);
    }

    /// The TCP connection slot, for stats and events.
    pub fn connections(&self) -> &ConnectionSlot {
        &self.connections
    }

    /// A snapshot of the TCP connection counters.
    pub fn tcp_stats(&self) -> TcpConnectionStats {
        self.connections.stats()
    }

    /// Stop both transports and close the TCP connection, if any.
    ///
    /// Endpoints still registered at this point are unregistered with a
    /// warning.
    pub async fn shutdown(mut self) {
        let mut events = self.connections.subscribe();
        self.shutdown.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::warn!("Transport task failed: {}", e);
            }
        }

        if self.connections.active_peer().is_some() {
            loop {
                match events.recv().await {
                    Ok(ConnectionEvent::Closed { .. }) | Err(_) => break,
                    Ok(ConnectionEvent::Opened { .. }) => {}
                }
            }
        }

        let leftover = self.registry.endpoint_ids();
        if !leftover.is_empty() {
            tracing::warn!("Some endpoints weren't removed correctly: {:?}", leftover);
            for id in leftover {
                let _ = self.registry.unregister(id);
            }
        }
        tracing::info!("E1.33 device stopped");
    }
}

/// Dropping a running device stops its transports without waiting for them.
impl Drop for RunningDevice {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
