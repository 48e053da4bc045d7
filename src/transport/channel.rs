use super::{SipTransport, TransportEvent, TransportReceiver, TransportSender};
use crate::{Error, Result};
use async_trait::async_trait;
use rsip::SipMessage;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

struct ChannelTransportInner {
    incoming: Mutex<Option<TransportReceiver>>,
    outgoing: UnboundedSender<(SipMessage, SocketAddr)>,
    addr: SocketAddr,
    reliable: bool,
    fail_sends: AtomicBool,
    closed: AtomicBool,
    close_count: AtomicUsize,
}

/// In-memory transport. Every message the user agent sends shows up on the
/// paired [`ChannelPeer`], and the peer injects inbound messages.
#[derive(Clone)]
pub struct ChannelTransport {
    inner: Arc<ChannelTransportInner>,
}

/// The far side of a [`ChannelTransport`].
pub struct ChannelPeer {
    pub sender: TransportSender,
    pub outgoing: UnboundedReceiver<(SipMessage, SocketAddr)>,
}

impl ChannelPeer {
    /// Deliver `msg` to the user agent as if it arrived from `source`.
    pub fn inject(&self, msg: impl Into<SipMessage>, source: SocketAddr) -> Result<()> {
        self.sender
            .send(TransportEvent::Incoming(msg.into(), source))
            .map_err(|e| e.into())
    }
}

impl ChannelTransport {
    pub fn new(addr: SocketAddr) -> (Self, ChannelPeer) {
        Self::with_reliability(addr, false)
    }

    pub fn with_reliability(addr: SocketAddr, reliable: bool) -> (Self, ChannelPeer) {
        let (in_tx, in_rx) = unbounded_channel();
        let (out_tx, out_rx) = unbounded_channel();
        let t = ChannelTransport {
            inner: Arc::new(ChannelTransportInner {
                incoming: Mutex::new(Some(in_rx)),
                outgoing: out_tx,
                addr,
                reliable,
                fail_sends: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                close_count: AtomicUsize::new(0),
            }),
        };
        let peer = ChannelPeer {
            sender: in_tx,
            outgoing: out_rx,
        };
        (t, peer)
    }

    /// Make every following send fail with a transport error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// How many times the underlying channel was actually released.
    pub fn close_count(&self) -> usize {
        self.inner.close_count.load(Ordering::SeqCst)
    }

    fn send(&self, msg: SipMessage, target: SocketAddr) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::TransportError(format!("{} is closed", self.inner.addr)));
        }
        if self.inner.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::TransportError(format!(
                "{} -> {}: send failed",
                self.inner.addr, target
            )));
        }
        self.inner
            .outgoing
            .send((msg, target))
            .map_err(|e| Error::TransportError(e.to_string()))
    }
}

#[async_trait]
impl SipTransport for ChannelTransport {
    fn local_addr(&self) -> SocketAddr {
        self.inner.addr
    }

    fn is_reliable(&self) -> bool {
        self.inner.reliable
    }

    fn take_incoming(&self) -> Option<TransportReceiver> {
        self.inner.incoming.lock().ok().and_then(|mut i| i.take())
    }

    async fn send_request(&self, req: &rsip::Request, target: SocketAddr) -> Result<()> {
        self.send(req.clone().into(), target)
    }

    async fn send_response(&self, resp: &rsip::Response, target: SocketAddr) -> Result<()> {
        self.send(resp.clone().into(), target)
    }

    async fn close_transports(&self) -> Result<()> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.close_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel://{}", self.inner.addr)
    }
}
