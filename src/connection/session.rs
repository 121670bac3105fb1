// src/connection/session.rs

//! One TCP connection's request/reply loop: decode a frame, hand it to
//! the gateway, write back the reply. Frames on one connection are
//! processed strictly in order — the protocol has no pipelining.

use crate::core::wire::{MasterFrame, MasterFrameCodec};
use crate::master::Gateway;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Runs until the peer disconnects, a protocol error occurs, or shutdown
/// fires. Errors writing the reply end the connection; errors decoding a
/// single frame are reported back as a `MasterFrame::Error` and the
/// connection stays open.
pub async fn handle_connection(
    socket: TcpStream,
    addr: SocketAddr,
    gateway: Arc<Gateway>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut framed = Framed::new(socket, MasterFrameCodec);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(%addr, "connection closing for shutdown");
                return;
            }
            frame = framed.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        warn!(%addr, error = %e, "malformed frame, closing connection");
                        let _ = framed.send(MasterFrame::Error { code: e.code(), message: e.to_string() }).await;
                        return;
                    }
                    None => {
                        debug!(%addr, "connection closed by peer");
                        return;
                    }
                };

                let reply = gateway.handle_frame(frame).await;
                if let Err(e) = framed.send(reply).await {
                    warn!(%addr, error = %e, "failed to write reply, closing connection");
                    return;
                }
            }
        }
    }
}
