use crate::Result;
use async_trait::async_trait;
use rsip::SipMessage;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub mod channel;
pub mod udp;

pub use channel::{ChannelPeer, ChannelTransport};
pub use udp::UdpTransport;

#[cfg(test)]
mod tests;

pub const KEEPALIVE_REQUEST: &[u8] = b"\r\n\r\n";
pub const KEEPALIVE_RESPONSE: &[u8] = b"\r\n";

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A parsed message and the address it came from.
    Incoming(SipMessage, SocketAddr),
}

pub type TransportReceiver = UnboundedReceiver<TransportEvent>;
pub type TransportSender = UnboundedSender<TransportEvent>;

/// Wire-level collaborator of the user agent.
///
/// Implementations parse inbound bytes into [`SipMessage`]s and drop anything
/// malformed before it reaches the user agent.
#[async_trait]
pub trait SipTransport: Send + Sync {
    fn local_addr(&self) -> SocketAddr;
    fn is_reliable(&self) -> bool;
    /// Inbound message stream. Only the first caller gets it.
    fn take_incoming(&self) -> Option<TransportReceiver>;
    async fn send_request(&self, req: &rsip::Request, target: SocketAddr) -> Result<()>;
    async fn send_response(&self, resp: &rsip::Response, target: SocketAddr) -> Result<()>;
    /// Release sockets. Calling it again is a no-op.
    async fn close_transports(&self) -> Result<()>;
}

pub type TransportRef = Arc<dyn SipTransport>;
