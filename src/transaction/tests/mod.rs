use super::{message::make_response, TransactionManager};
use crate::{
    config::TimerConfig,
    transport::{ChannelPeer, ChannelTransport},
};
use rsip::prelude::HeadersExt;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;


pub(super) const REMOTE: &str = "127.0.0.1:5070";

pub(super) fn remote() -> SocketAddr {
    REMOTE.parse().expect("remote addr")
}

pub(super) fn fast_timers() -> TimerConfig {
    TimerConfig {
        t1_ms: 10,
        t2_ms: 40,
        t4_ms: 50,
        poll_interval_ms: 2,
        timer_c_ms: 300,
    }
}

pub(super) fn create_test_manager(
    timers: TimerConfig,
) -> (Arc<TransactionManager>, ChannelTransport, ChannelPeer) {
    let (transport, peer) = ChannelTransport::new("127.0.0.1:5060".parse().expect("local addr"));
    let tm = Arc::new(TransactionManager::new(Arc::new(transport.clone()), timers));
    (tm, transport, peer)
}

/// Run the timer loop until the returned token is cancelled.
pub(super) fn serve_timers(tm: &Arc<TransactionManager>) -> CancellationToken {
    let token = CancellationToken::new();
    let tm = tm.clone();
    let child = token.clone();
    tokio::spawn(async move { tm.serve(child).await });
    token
}

pub(super) fn create_test_request(method: rsip::Method, branch: &str) -> rsip::Request {
    use rsip::headers::*;
    rsip::Request {
        method,
        uri: rsip::Uri::try_from("sip:bob@127.0.0.1:5070").expect("uri"),
        headers: vec![
            Via::new(format!("SIP/2.0/UDP 127.0.0.1:5060;branch={}", branch)).into(),
            CSeq::new(format!("1 {}", method)).into(),
            From::new("Alice <sip:alice@example.com>;tag=1928301774").into(),
            To::new("Bob <sip:bob@example.com>").into(),
            CallId::new("a84b4c76e66710@pc33.atlanta.com").into(),
            MaxForwards::new("70").into(),
        ]
        .into(),
        version: rsip::Version::V2,
        body: Default::default(),
    }
}

pub(super) fn create_test_response(
    req: &rsip::Request,
    status: rsip::StatusCode,
    to_tag: Option<&str>,
) -> rsip::Response {
    let mut resp = make_response(req, status, None, "test");
    if let Some(tag) = to_tag {
        resp.to_header_mut()
            .and_then(|to| to.mut_tag(tag.to_string().into()))
            .expect("to tag");
    }
    resp
}

/// Next message the user agent put on the wire, or none within 200ms.
pub(super) async fn next_outgoing(peer: &mut ChannelPeer) -> Option<rsip::SipMessage> {
    tokio::time::timeout(Duration::from_millis(200), peer.outgoing.recv())
        .await
        .ok()
        .flatten()
        .map(|(msg, _)| msg)
}

#[test]
fn test_random_text() {
    let text = super::random_text(10);
    assert_eq!(text.len(), 10);
    let branch = super::make_via_branch().to_string();
    assert_eq!(branch.len(), 27); // ;branch=z9hG4bK
    assert_eq!(super::make_tag().to_string().len(), super::TAG_LEN);
    let call_id = super::make_call_id(Some("example.com"));
    assert!(call_id.to_string().ends_with("@example.com"));
}
