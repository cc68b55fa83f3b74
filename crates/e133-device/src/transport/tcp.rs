//! TCP binding: accepts at most one health-checked control connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use e133_core::framing::{FramingError, TcpBlockCodec};
use e133_core::{DecoderChain, EnvelopeEncoder, TransportHeader};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::connection::{CloseReason, ConnectionGuard, ConnectionSlot};
use crate::dispatcher::Dispatcher;
use crate::health::{HealthAction, HealthCheck};

/// Everything a connection task needs, cloned per connection.
#[derive(Clone)]
struct ConnectionContext {
    dispatcher: Arc<Dispatcher>,
    encoder: EnvelopeEncoder,
    health_check_interval: Duration,
    max_block_size: usize,
}

pub struct TcpBinding {
    listener: TcpListener,
    slot: ConnectionSlot,
    ctx: ConnectionContext,
}

impl TcpBinding {
    /// Accept connections on `listener` into `slot`.
    pub fn new(
        listener: TcpListener,
        slot: ConnectionSlot,
        dispatcher: Arc<Dispatcher>,
        encoder: EnvelopeEncoder,
        health_check_interval: Duration,
        max_block_size: usize,
    ) -> Self {
        Self {
            listener,
            slot,
            ctx: ConnectionContext {
                dispatcher,
                encoder,
                health_check_interval,
                max_block_size,
            },
        }
    }

    /// Accept until `shutdown` is cancelled. Cancelling also closes the active connection.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.on_accept(stream, peer, &shutdown),
                    Err(e) => tracing::warn!("TCP accept failed: {}", e),
                },
            }
        }
        tracing::info!("TCP transport stopped");
    }

    fn on_accept(&self, stream: TcpStream, peer: SocketAddr, shutdown: &CancellationToken) {
        tracing::info!("New TCP connection from {}", peer);

        let guard = match self.slot.try_install(peer) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!("{}, closing the new one from {}", e, peer);
                drop(stream);
                return;
            }
        };

        let ctx = self.ctx.clone();
        let shutdown = shutdown.child_token();
        tokio::spawn(async move {
            serve_connection(stream, guard, ctx, shutdown).await;
        });
    }
}

async fn serve_connection(
    stream: TcpStream,
    guard: ConnectionGuard,
    ctx: ConnectionContext,
    shutdown: CancellationToken,
) {
    let peer = guard.peer();
    let heartbeat: Bytes = match ctx.encoder.encode_heartbeat() {
        Ok(block) => block.freeze(),
        Err(e) => {
            tracing::warn!("Failed to build heartbeat, closing TCP connection: {}", e);
            guard.close(CloseReason::IoError);
            return;
        }
    };

    let (reader, writer) = stream.into_split();
    let mut frames = FramedRead::new(reader, TcpBlockCodec::new(ctx.max_block_size));
    let mut sink = FramedWrite::new(writer, TcpBlockCodec::new(ctx.max_block_size));

    // Scoped to this connection so partial input dies with it.
    let chain = DecoderChain::new();
    let mut health = HealthCheck::new(ctx.health_check_interval);
    let mut ticker = tokio::time::interval(ctx.health_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break CloseReason::Shutdown,

            tick = ticker.tick() => match health.poll(tick) {
                HealthAction::SendHeartbeat => {
                    let sent = send_heartbeat(&mut sink, heartbeat.clone(), health.interval()).await;
                    if let Err(e) = sent {
                        tracing::warn!("Failed to send heartbeat to {}: {}", peer, e);
                        break CloseReason::IoError;
                    }
                    health.heartbeat_sent(tick);
                }
                HealthAction::Unhealthy => {
                    tracing::info!("TCP connection to {} went unhealthy, closing", peer);
                    break CloseReason::Unhealthy;
                }
                HealthAction::Idle => {}
            },

            frame = frames.next() => match frame {
                Some(Ok(block)) => {
                    health.traffic_received(Instant::now());
                    tracing::debug!("Got {} byte block from {}", block.len(), peer);
                    for request in chain.decode(TransportHeader::tcp(peer), &block) {
                        if let Err(e) = ctx.dispatcher.dispatch(request) {
                            tracing::warn!("Dropping request from {}: {}", peer, e);
                        }
                    }
                }
                Some(Err(FramingError::Io(e))) => {
                    tracing::debug!("TCP read from {} failed: {}", peer, e);
                    break CloseReason::IoError;
                }
                Some(Err(e)) => {
                    tracing::warn!("TCP stream from {} desynchronized: {}", peer, e);
                    break CloseReason::Desynchronized;
                }
                None => break CloseReason::PeerClosed,
            },
        }
    };

    health.close();
    // Close the socket before the slot frees up for the next connection.
    drop(frames);
    drop(sink);
    guard.close(reason);
}

#[derive(Debug, thiserror::Error)]
enum HeartbeatError {
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("peer stopped reading for {0:?}")]
    Stalled(Duration),
}

/// Write one heartbeat, giving up if the peer doesn't drain it within `limit`.
async fn send_heartbeat<S>(sink: &mut S, heartbeat: Bytes, limit: Duration) -> Result<(), HeartbeatError>
where
    S: Sink<Bytes, Error = FramingError> + Unpin,
{
    match tokio::time::timeout(limit, sink.send(heartbeat)).await {
        Ok(sent) => Ok(sent?),
        Err(_) => Err(HeartbeatError::Stalled(limit)),
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use super::*;

    /// A peer whose receive window never opens.
    struct Stalled;

    impl Sink<Bytes> for Stalled {
        type Error = FramingError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), FramingError>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Bytes) -> Result<(), FramingError> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), FramingError>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), FramingError>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn stalled_heartbeat_gives_up() {
        let limit = Duration::from_millis(20);
        let result = send_heartbeat(&mut Stalled, Bytes::from_static(b"hb"), limit).await;
        assert!(matches!(result, Err(HeartbeatError::Stalled(d)) if d == limit));
    }

    #[tokio::test]
    async fn heartbeat_reaches_a_reading_peer() {
        let mut sink = futures_util::sink::drain::<Bytes>()
            .sink_map_err(|never: std::convert::Infallible| -> FramingError { match never {} });
        send_heartbeat(&mut sink, Bytes::from_static(b"hb"), Duration::from_millis(20))
            .await
            .unwrap();
    }
}
