use super::{SipTransport, TransportEvent, TransportReceiver, TransportSender};
use super::{KEEPALIVE_REQUEST, KEEPALIVE_RESPONSE};
use crate::{Error, Result};
use async_trait::async_trait;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, RwLock},
};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

struct UdpTransportInner {
    conn: RwLock<Option<Arc<UdpSocket>>>,
    addr: SocketAddr,
    incoming: Mutex<Option<TransportReceiver>>,
    cancel_token: CancellationToken,
}

#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

impl UdpTransport {
    /// Bind `local` and start receiving. `external` is the address advertised
    /// to peers when the socket sits behind NAT.
    pub async fn bind(local: SocketAddr, external: Option<SocketAddr>) -> Result<Self> {
        let conn = Arc::new(UdpSocket::bind(local).await?);
        let bound = conn.local_addr()?;
        let addr = external.unwrap_or(bound);
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();

        let t = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                conn: RwLock::new(Some(conn.clone())),
                addr,
                incoming: Mutex::new(Some(receiver)),
                cancel_token: CancellationToken::new(),
            }),
        };
        let token = t.inner.cancel_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = Self::serve_loop(conn, sender) => {}
            }
            debug!("udp receive loop stopped: {}", bound);
        });
        info!("created UDP transport: {} external: {:?}", bound, external);
        Ok(t)
    }

    async fn serve_loop(conn: Arc<UdpSocket>, sender: TransportSender) -> Result<()> {
        let mut buf = vec![0u8; 65535];
        loop {
            let (len, addr) = match conn.recv_from(&mut buf).await {
                Ok((len, addr)) => (len, addr),
                Err(e) => {
                    warn!("error receiving UDP packet: {}", e);
                    continue;
                }
            };

            match &buf[..len] {
                KEEPALIVE_REQUEST => {
                    conn.send_to(KEEPALIVE_RESPONSE, addr).await.ok();
                    continue;
                }
                KEEPALIVE_RESPONSE => continue,
                data => {
                    if data.iter().all(|b| b.is_ascii_whitespace()) {
                        continue;
                    }
                }
            }

            let undecoded = match std::str::from_utf8(&buf[..len]) {
                Ok(s) => s,
                Err(e) => {
                    info!("decoding text from: {} error: {}", addr, e);
                    continue;
                }
            };

            let msg = match rsip::SipMessage::try_from(undecoded) {
                Ok(msg) => msg,
                Err(e) => {
                    info!(
                        "error parsing SIP message from: {} error: {} buf: {}",
                        addr, e, undecoded
                    );
                    continue;
                }
            };

            trace!("received {} {} {}", len, addr, undecoded);
            sender.send(TransportEvent::Incoming(msg, addr))?;
        }
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        self.inner
            .conn
            .read()
            .ok()
            .and_then(|c| c.clone())
            .ok_or_else(|| Error::TransportError(format!("{} is closed", self.inner.addr)))
    }

    async fn send_to(&self, buf: String, target: SocketAddr) -> Result<()> {
        let conn = self.socket()?;
        trace!("sending {} -> {} {}", buf.len(), target, buf);
        conn.send_to(buf.as_bytes(), target)
            .await
            .map_err(|e| Error::TransportError(format!("{} -> {}: {}", self.inner.addr, target, e)))
            .map(|_| ())
    }
}

#[async_trait]
impl SipTransport for UdpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.inner.addr
    }

    fn is_reliable(&self) -> bool {
        false
    }

    fn take_incoming(&self) -> Option<TransportReceiver> {
        self.inner.incoming.lock().ok().and_then(|mut i| i.take())
    }

    async fn send_request(&self, req: &rsip::Request, target: SocketAddr) -> Result<()> {
        self.send_to(req.to_string(), target).await
    }

    async fn send_response(&self, resp: &rsip::Response, target: SocketAddr) -> Result<()> {
        self.send_to(resp.to_string(), target).await
    }

    async fn close_transports(&self) -> Result<()> {
        let conn = self.inner.conn.write().ok().and_then(|mut c| c.take());
        if conn.is_some() {
            self.inner.cancel_token.cancel();
            info!("closed UDP transport: {}", self.inner.addr);
        }
        Ok(())
    }
}

impl std::fmt::Display for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "udp://{}", self.inner.addr)
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}
