use super::{UserAgentEvent, UserAgentEventSender};
use crate::{
    config::{Config, DEFAULT_SIP_PORT},
    dialog::DialogManagerRef,
    media::MediaManagerRef,
    transaction::{make_via_branch, message::make_response, TransactionManagerRef},
    transport::TransportRef,
    Error, Result,
};
use rsip::{prelude::UntypedHeader, Header, Request, Response, StatusCode};
use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, RwLock,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// State shared by the UAC and UAS roles and every handler.
pub struct UserAgentCore {
    pub config: Config,
    pub tm: TransactionManagerRef,
    pub dm: DialogManagerRef,
    pub transport: TransportRef,
    pub media: MediaManagerRef,
    pub cancel_token: CancellationToken,
    outbound_proxy: Option<rsip::Uri>,
    public_addr: RwLock<Option<IpAddr>>,
    events: Option<UserAgentEventSender>,
    cseq: AtomicU32,
    peers: RwLock<Vec<String>>,
    registered: AtomicBool,
    register_call_id: String,
    pub(super) closed: AtomicBool,
}

pub type UserAgentCoreRef = Arc<UserAgentCore>;

/// Parse a SIP or SIPS URI, rejecting anything else.
pub fn parse_sip_uri(target: &str) -> Result<rsip::Uri> {
    let target = target.trim();
    let lower = target.to_ascii_lowercase();
    if !(lower.starts_with("sip:") || lower.starts_with("sips:"))
        || target.chars().any(char::is_whitespace)
    {
        return Err(Error::UriSyntaxError(format!("not a SIP URI: {:?}", target)));
    }
    let uri = rsip::Uri::try_from(target)
        .map_err(|e| Error::UriSyntaxError(format!("{}: {}", target, e)))?;
    if uri.host_with_port.host.to_string().is_empty() {
        return Err(Error::UriSyntaxError(format!("missing host: {}", target)));
    }
    Ok(uri)
}

async fn resolve_uri(uri: &rsip::Uri) -> Result<SocketAddr> {
    let port = uri
        .host_with_port
        .port
        .as_ref()
        .and_then(|p| p.to_string().parse::<u16>().ok())
        .unwrap_or(DEFAULT_SIP_PORT);
    match &uri.host_with_port.host {
        rsip::Host::IpAddr(ip) => Ok(SocketAddr::new(*ip, port)),
        rsip::Host::Domain(domain) => {
            let host = domain.to_string();
            if let Ok(ip) = host.parse::<IpAddr>() {
                return Ok(SocketAddr::new(ip, port));
            }
            let mut addrs = tokio::net::lookup_host((host.as_str(), port))
                .await
                .map_err(|e| Error::AddressResolutionError(format!("{}: {}", host, e)))?;
            addrs
                .next()
                .ok_or_else(|| Error::AddressResolutionError(format!("{}: no address", host)))
        }
    }
}

impl UserAgentCore {
    pub(super) fn new(
        config: Config,
        transport: TransportRef,
        tm: TransactionManagerRef,
        dm: DialogManagerRef,
        media: MediaManagerRef,
        events: Option<UserAgentEventSender>,
        cancel_token: CancellationToken,
    ) -> Result<Self> {
        let outbound_proxy = config
            .outbound_proxy
            .as_deref()
            .map(parse_sip_uri)
            .transpose()?;
        let public_addr = RwLock::new(config.public_inet_address);
        let register_call_id = crate::transaction::make_call_id(Some(&config.domain))
            .value()
            .to_string();
        Ok(UserAgentCore {
            config,
            tm,
            dm,
            transport,
            media,
            cancel_token,
            outbound_proxy,
            public_addr,
            events,
            cseq: AtomicU32::new(1),
            peers: RwLock::new(Vec::new()),
            registered: AtomicBool::new(false),
            register_call_id,
            closed: AtomicBool::new(false),
        })
    }

    pub fn emit(&self, event: UserAgentEvent) {
        trace!(?event, "user agent event");
        if let Some(sender) = &self.events {
            sender.send(event).ok();
        }
    }

    /// Take the next CSeq number. Each call consumes exactly one value.
    pub fn next_seq(&self) -> u32 {
        self.cseq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn generate_cseq(&self, method: rsip::Method) -> String {
        format!("{} {}", self.next_seq(), method)
    }

    pub fn outbound_proxy(&self) -> Option<&rsip::Uri> {
        self.outbound_proxy.as_ref()
    }

    pub fn register_call_id(&self) -> &str {
        &self.register_call_id
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }

    pub fn add_peer(&self, peer: impl Into<String>) {
        if let Ok(mut peers) = self.peers.write() {
            peers.push(peer.into());
        }
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers.read().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn public_addr(&self) -> Option<IpAddr> {
        self.public_addr.read().ok().and_then(|a| *a)
    }

    pub fn clear_public_addr(&self) {
        if let Ok(mut addr) = self.public_addr.write() {
            *addr = None;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn local_ip(&self) -> IpAddr {
        self.config
            .local_inet_address
            .unwrap_or_else(|| self.transport.local_addr().ip())
    }

    /// Address put in Via, Contact and SDP.
    pub fn advertised_ip(&self) -> IpAddr {
        self.public_addr().unwrap_or_else(|| self.local_ip())
    }

    pub fn local_port(&self) -> u16 {
        self.transport.local_addr().port()
    }

    fn host_port(&self) -> String {
        match self.advertised_ip() {
            IpAddr::V6(ip) => format!("[{}]:{}", ip, self.local_port()),
            ip => format!("{}:{}", ip, self.local_port()),
        }
    }

    /// Via with a fresh branch.
    pub fn make_via(&self) -> rsip::headers::Via {
        let transport = if self.transport.is_reliable() {
            "TCP"
        } else {
            "UDP"
        };
        rsip::headers::Via::new(format!(
            "SIP/2.0/{} {};rport{}",
            transport,
            self.host_port(),
            make_via_branch()
        ))
    }

    pub fn contact(&self) -> rsip::headers::Contact {
        rsip::headers::Contact::new(format!(
            "<sip:{}@{}>",
            self.config.user_part,
            self.host_port()
        ))
    }

    pub fn make_response(
        &self,
        req: &Request,
        status: StatusCode,
        body: Option<Vec<u8>>,
    ) -> Response {
        make_response(req, status, body, &self.config.user_agent)
    }

    /// Where a request goes: the outbound proxy, else the first Route, else
    /// the Request-URI.
    pub async fn resolve_request(&self, req: &Request) -> Result<SocketAddr> {
        if let Some(proxy) = &self.outbound_proxy {
            return resolve_uri(proxy).await;
        }
        let first_route = req.headers.iter().find_map(|h| match h {
            Header::Route(route) => Some(route.value().to_string()),
            _ => None,
        });
        if let Some(route) = first_route {
            let route = route
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .trim_start_matches('<');
            let route = route.split('>').next().unwrap_or_default();
            if let Ok(uri) = rsip::Uri::try_from(route) {
                debug!(%uri, "routing via first Route");
                return resolve_uri(&uri).await;
            }
        }
        resolve_uri(&req.uri).await
    }
}

/// Append body headers. Requests and responses always carry Content-Length.
pub fn set_body(headers: &mut rsip::Headers, body: &mut Vec<u8>, content: Option<(&str, Vec<u8>)>) {
    headers.retain(|h| !matches!(h, Header::ContentLength(_) | Header::ContentType(_)));
    match content {
        Some((content_type, data)) => {
            headers.push(Header::ContentType(content_type.into()));
            headers.push(Header::ContentLength((data.len() as u32).into()));
            *body = data;
        }
        None => {
            headers.push(Header::ContentLength(0u32.into()));
            body.clear();
        }
    }
}
