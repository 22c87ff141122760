//! UDP broadcast announcer.
//!
//! Each datagram carries exactly one encoded `Announce` frame. The
//! sender's address is taken from the datagram, not from the payload, so
//! a peer behind a misconfigured interface still gets dialled correctly.

use super::Announcer;
use crate::transport::TransportError;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use sync_types::{Announce, Frame, Message};
use tokio::net::UdpSocket;
use tracing::{debug, trace};

const MAX_DATAGRAM: usize = 64 * 1024;

/// Announcer over a broadcast UDP socket.
#[derive(Debug)]
pub struct UdpAnnouncer {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpAnnouncer {
    /// Bind `0.0.0.0:port` and broadcast to `255.255.255.255:port`.
    pub async fn bind(port: u16) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        socket
            .set_broadcast(true)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            socket,
            target: SocketAddr::from((Ipv4Addr::BROADCAST, port)),
        })
    }

    /// Bind `local` and send announcements to `target` only.
    pub async fn unicast(local: SocketAddr, target: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self { socket, target })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket
            .local_addr()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }
}

#[async_trait]
impl Announcer for UdpAnnouncer {
    async fn announce(&self, announce: &Announce) -> Result<(), TransportError> {
        let bytes = Frame::from_message(&Message::Announce(announce.clone()))?.encode()?;
        self.socket
            .send_to(&bytes, self.target)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        trace!(target = %self.target, "announcement sent");
        Ok(())
    }

    async fn receive(&self) -> Result<Announce, TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

            let message = match Frame::decode(&buf[..len]).and_then(Frame::into_message) {
                Ok(message) => message,
                Err(e) => {
                    debug!(%from, error = %e, "ignoring malformed datagram");
                    continue;
                }
            };
            match message {
                Message::Announce(mut announce) => {
                    announce.device.ip_address = from.ip();
                    return Ok(announce);
                }
                other => debug!(%from, kind = other.name(), "ignoring non-announce datagram"),
            }
        }
    }
}
