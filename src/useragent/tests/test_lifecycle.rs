use super::{
    create_test_agent, expect_response, next_outgoing, peer_invite, peer_request, proxy,
    test_config, wait_for_event, LOCAL,
};
use crate::{
    media::{MediaManager, SessionMediaManager},
    transport::ChannelTransport,
    useragent::{UserAgentBuilder, UserAgentEvent},
};
use rsip::{SipMessage, StatusCode};
use std::{sync::Arc, time::Duration};

fn allow_header(resp: &rsip::Response) -> Option<String> {
    resp.headers.iter().find_map(|h| match h {
        rsip::Header::Other(name, value) if name.eq_ignore_ascii_case("Allow") => {
            Some(value.to_string())
        }
        _ => None,
    })
}

#[tokio::test]
async fn test_close_is_idempotent() -> crate::Result<()> {
    let agent = create_test_agent(test_config())?;
    assert!(!agent.ua.is_closed());
    agent.ua.close().await;
    agent.ua.close().await;
    assert!(agent.ua.is_closed());
    assert_eq!(agent.transport.close_count(), 1);
    assert!(agent.ua.transaction_manager().is_closed());
    assert_eq!(agent.ua.public_addr(), None);

    assert!(matches!(agent.ua.register().await, Err(crate::Error::Closed)));
    assert!(matches!(
        agent.ua.invite("sip:bob@example.com", None).await,
        Err(crate::Error::Closed)
    ));
    Ok(())
}

#[tokio::test]
async fn test_close_stops_serve() -> crate::Result<()> {
    let (transport, _peer) = ChannelTransport::with_reliability(LOCAL.parse()?, true);
    let ua = UserAgentBuilder::new()
        .with_config(test_config())
        .with_transport(Arc::new(transport))
        .build()?;
    let serving = ua.clone();
    let handle = tokio::spawn(async move { serving.serve().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // only one reader of the transport
    assert!(ua.serve().await.is_err());

    ua.close().await;
    let served = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("serve returns after close")
        .expect("serve task");
    assert!(served.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_close_stops_media() -> crate::Result<()> {
    let config = test_config();
    let media = Arc::new(SessionMediaManager::new(&config));
    let (transport, mut peer) = ChannelTransport::with_reliability(LOCAL.parse()?, true);
    let (sender, mut events) = tokio::sync::mpsc::unbounded_channel();
    let ua = UserAgentBuilder::new()
        .with_config(config)
        .with_transport(Arc::new(transport))
        .with_media_manager(media.clone())
        .with_event_sender(sender)
        .build()?;
    let serving = ua.clone();
    tokio::spawn(async move { serving.serve().await });

    peer.inject(peer_invite("z9hG4bKmedia", "media@example.com"), proxy())?;
    let (invite, dialog) = match wait_for_event(&mut events, |e| {
        matches!(e, UserAgentEvent::IncomingCall(_, _))
    })
    .await
    {
        Some(UserAgentEvent::IncomingCall(req, dialog)) => (req, dialog),
        other => panic!("expected IncomingCall, got {:?}", other),
    };
    ua.accept_call(&invite, &dialog).await?;
    assert!(media.is_active());
    assert_eq!(
        media.session().map(|s| s.remote.port()),
        Some(9000)
    );

    ua.close().await;
    assert!(!media.is_active());
    Ok(())
}

#[tokio::test]
async fn test_invalid_uri() -> crate::Result<()> {
    let agent = create_test_agent(test_config())?;
    assert!(matches!(
        agent.ua.options("not a uri").await,
        Err(crate::Error::UriSyntaxError(_))
    ));
    assert!(matches!(
        agent.ua.invite("sip:bob @example.com", None).await,
        Err(crate::Error::UriSyntaxError(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_invalid_outbound_proxy() {
    let mut config = test_config();
    config.outbound_proxy = Some("proxy.example.com".to_string());
    let (transport, _peer) =
        ChannelTransport::with_reliability(LOCAL.parse().expect("addr"), true);
    let built = UserAgentBuilder::new()
        .with_config(config)
        .with_transport(Arc::new(transport))
        .build();
    assert!(matches!(built, Err(crate::Error::UriSyntaxError(_))));
}

#[tokio::test]
async fn test_send_failure_is_returned() -> crate::Result<()> {
    let mut agent = create_test_agent(test_config())?;
    agent.transport.set_fail_sends(true);
    assert!(matches!(
        agent.ua.register().await,
        Err(crate::Error::TransportError(_))
    ));
    // the unsent transaction waits for its timeout timer
    assert_eq!(agent.ua.transaction_manager().len(), 1);
    assert!(next_outgoing(&mut agent.peer).await.is_none());

    agent.transport.set_fail_sends(false);
    agent.ua.register().await?;
    assert!(matches!(
        next_outgoing(&mut agent.peer).await,
        Some((SipMessage::Request(req), _)) if req.method == rsip::Method::Register
    ));
    Ok(())
}

#[tokio::test]
async fn test_get_sip_request() -> crate::Result<()> {
    let mut agent = create_test_agent(test_config())?;
    let register = agent.ua.register().await?;
    let sent = super::expect_request(&mut agent.peer, rsip::Method::Register).await;
    let resp = super::respond(&sent, StatusCode::Trying, None);

    let found = agent.ua.get_sip_request(&resp.into());
    assert_eq!(found.map(|r| r.to_string()), Some(register.to_string()));

    let msg: SipMessage = register.clone().into();
    assert_eq!(agent.ua.get_sip_request(&msg), Some(register));

    let stray = peer_request(rsip::Method::Bye, "z9hG4bKstray", 5, "x@example.com", None);
    let stray_resp = super::respond(&stray, StatusCode::OK, None);
    assert_eq!(agent.ua.get_sip_request(&stray_resp.into()), None);
    Ok(())
}

#[tokio::test]
async fn test_incoming_options() -> crate::Result<()> {
    let mut agent = create_test_agent(test_config())?;
    agent.peer.inject(
        peer_request(rsip::Method::Options, "z9hG4bKopt", 1, "opt@example.com", None),
        proxy(),
    )?;
    let ok = expect_response(&mut agent.peer, StatusCode::OK).await;
    let allow = allow_header(&ok).expect("Allow header");
    for method in ["INVITE", "ACK", "CANCEL", "BYE", "OPTIONS"] {
        assert!(allow.contains(method), "{} missing from {}", method, allow);
    }
    assert!(String::from_utf8_lossy(&ok.body).starts_with("v=0"));
    assert!(agent.ua.dialog_manager().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unsupported_methods() -> crate::Result<()> {
    let mut agent = create_test_agent(test_config())?;
    for (i, method) in [rsip::Method::Message, rsip::Method::Register]
        .into_iter()
        .enumerate()
    {
        let branch = format!("z9hG4bKunsup{}", i);
        agent.peer.inject(
            peer_request(method, &branch, 1, "unsup@example.com", None),
            proxy(),
        )?;
        let resp = expect_response(&mut agent.peer, StatusCode::MethodNotAllowed).await;
        assert!(allow_header(&resp).is_some());
    }
    Ok(())
}

#[tokio::test]
async fn test_accessors() -> crate::Result<()> {
    let agent = create_test_agent(test_config())?;
    assert_eq!(agent.ua.sip_port(), 5060);
    assert_eq!(agent.ua.rtp_port(), crate::config::RTP_DEFAULT_PORT);
    assert_eq!(agent.ua.domain(), "example.com");
    assert_eq!(agent.ua.user_part(), "alice");
    assert_eq!(
        agent.ua.outbound_proxy().map(|u| u.to_string()),
        Some("sip:127.0.0.1:5070".to_string())
    );
    assert_eq!(agent.ua.media_mode(), crate::config::MediaMode::None);
    assert!(!agent.ua.is_registered());
    assert!(agent.ua.peers().is_empty());
    assert_eq!(agent.ua.config().aor(), "sip:alice@example.com");
    Ok(())
}
