use super::{UserAgent, UserAgentBuilder, UserAgentEvent, UserAgentEventReceiver};
use crate::{
    config::{Config, TimerConfig},
    transaction::message::make_response,
    transport::{ChannelPeer, ChannelTransport},
};
use rsip::{headers::*, prelude::HeadersExt, Request, Response, SipMessage, StatusCode};
use std::{net::SocketAddr, sync::Arc, time::Duration};

mod test_cseq;
mod test_lifecycle;
mod test_register;

pub(super) const LOCAL: &str = "127.0.0.1:5060";
pub(super) const PROXY: &str = "127.0.0.1:5070";

pub(super) const REMOTE_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\nm=audio 9000 RTP/AVP 0 101\r\na=rtpmap:0 PCMU/8000\r\n";

pub(super) fn proxy() -> SocketAddr {
    PROXY.parse().expect("proxy addr")
}

pub(super) fn test_config() -> Config {
    Config {
        user_part: "alice".to_string(),
        domain: "example.com".to_string(),
        password: Some("secret".to_string()),
        outbound_proxy: Some(format!("sip:{}", PROXY)),
        timers: TimerConfig {
            t1_ms: 10,
            t2_ms: 40,
            t4_ms: 50,
            poll_interval_ms: 2,
            timer_c_ms: 300,
        },
        ..Default::default()
    }
}

pub(super) struct TestAgent {
    pub ua: UserAgent,
    pub transport: ChannelTransport,
    pub peer: ChannelPeer,
    pub events: UserAgentEventReceiver,
}

/// A serving user agent on a reliable in-memory transport, so nothing is
/// retransmitted behind the test's back.
pub(super) fn create_test_agent(config: Config) -> crate::Result<TestAgent> {
    create_agent_on(config, true)
}

pub(super) fn create_agent_on(config: Config, reliable: bool) -> crate::Result<TestAgent> {
    let (transport, peer) = ChannelTransport::with_reliability(LOCAL.parse()?, reliable);
    let (sender, events) = tokio::sync::mpsc::unbounded_channel();
    let ua = UserAgentBuilder::new()
        .with_config(config)
        .with_transport(Arc::new(transport.clone()))
        .with_event_sender(sender)
        .build()?;
    let serving = ua.clone();
    tokio::spawn(async move { serving.serve().await });
    Ok(TestAgent {
        ua,
        transport,
        peer,
        events,
    })
}

pub(super) async fn next_outgoing(peer: &mut ChannelPeer) -> Option<(SipMessage, SocketAddr)> {
    tokio::time::timeout(Duration::from_millis(300), peer.outgoing.recv())
        .await
        .ok()
        .flatten()
}

pub(super) async fn expect_request(peer: &mut ChannelPeer, method: rsip::Method) -> Request {
    match next_outgoing(peer).await {
        Some((SipMessage::Request(req), _)) if req.method == method => req,
        other => panic!("expected {}, got {:?}", method, other),
    }
}

pub(super) async fn expect_response(peer: &mut ChannelPeer, status: StatusCode) -> Response {
    match next_outgoing(peer).await {
        Some((SipMessage::Response(resp), _)) if resp.status_code == status => resp,
        other => panic!("expected {}, got {:?}", status, other),
    }
}

/// Wait for the first event `matches` accepts, skipping others.
pub(super) async fn wait_for_event(
    events: &mut UserAgentEventReceiver,
    matches: impl Fn(&UserAgentEvent) -> bool,
) -> Option<UserAgentEvent> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) if matches(&event) => return Some(event),
            Ok(Some(_)) => continue,
            _ => return None,
        }
    }
}

/// Response from the far side to a request the user agent sent.
pub(super) fn respond(req: &Request, status: StatusCode, to_tag: Option<&str>) -> Response {
    let mut resp = make_response(req, status, None, "peer");
    if let Some(tag) = to_tag {
        resp.to_header_mut()
            .and_then(|to| to.mut_tag(tag.to_string().into()))
            .expect("to tag");
        resp.headers
            .push(Contact::new(format!("<sip:bob@{}>", PROXY)).into());
    }
    resp
}

pub(super) fn with_sdp(mut msg: Response) -> Response {
    msg.headers.retain(|h| !matches!(h, rsip::Header::ContentLength(_)));
    msg.headers.push(ContentType::new("application/sdp").into());
    msg.headers
        .push(ContentLength::new(REMOTE_SDP.len().to_string()).into());
    msg.body = REMOTE_SDP.as_bytes().to_vec();
    msg
}

/// 401 carrying a digest challenge.
pub(super) fn challenge(req: &Request) -> Response {
    let mut resp = respond(req, StatusCode::Unauthorized, Some("reg-401"));
    resp.headers.push(
        WwwAuthenticate::new(
            r#"Digest realm="example.com", nonce="ea9c8e88df84f1cec4341ae6cbe5a359", algorithm=MD5, qop="auth""#,
        )
        .into(),
    );
    resp
}

/// Request from Bob's side, as it arrives at the user agent.
pub(super) fn peer_request(
    method: rsip::Method,
    branch: &str,
    seq: u32,
    call_id: &str,
    to_tag: Option<&str>,
) -> Request {
    let to = match to_tag {
        Some(tag) => format!("<sip:alice@example.com>;tag={}", tag),
        None => "<sip:alice@example.com>".to_string(),
    };
    Request {
        method,
        uri: rsip::Uri::try_from(format!("sip:alice@{}", LOCAL)).expect("uri"),
        headers: vec![
            Via::new(format!("SIP/2.0/UDP {};branch={}", PROXY, branch)).into(),
            MaxForwards::new("70").into(),
            From::new("Bob <sip:bob@example.com>;tag=bob-tag").into(),
            To::new(to).into(),
            CallId::new(call_id).into(),
            CSeq::new(format!("{} {}", seq, method)).into(),
            Contact::new(format!("<sip:bob@{}>", PROXY)).into(),
            ContentLength::new("0").into(),
        ]
        .into(),
        version: rsip::Version::V2,
        body: vec![],
    }
}

pub(super) fn peer_invite(branch: &str, call_id: &str) -> Request {
    let mut req = peer_request(rsip::Method::Invite, branch, 1, call_id, None);
    req.headers.retain(|h| !matches!(h, rsip::Header::ContentLength(_)));
    req.headers.push(ContentType::new("application/sdp").into());
    req.headers
        .push(ContentLength::new(REMOTE_SDP.len().to_string()).into());
    req.body = REMOTE_SDP.as_bytes().to_vec();
    req
}
