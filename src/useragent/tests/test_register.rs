use super::{
    challenge, create_test_agent, expect_request, next_outgoing, proxy, respond, test_config,
    wait_for_event,
};
use crate::{
    rsip_ext::RsipMessageExt,
    useragent::{handlers::register::expires_of, FailureReason, UserAgentEvent},
};
use rsip::{prelude::HeadersExt, StatusCode};

#[tokio::test]
async fn test_register_with_challenge() -> crate::Result<()> {
    let mut agent = create_test_agent(test_config())?;
    agent.ua.register().await?;
    assert!(matches!(
        wait_for_event(&mut agent.events, |e| matches!(e, UserAgentEvent::Registering(_))).await,
        Some(UserAgentEvent::Registering(_))
    ));

    let first = match next_outgoing(&mut agent.peer).await {
        Some((rsip::SipMessage::Request(req), dest)) => {
            assert_eq!(dest, proxy());
            req
        }
        other => panic!("expected REGISTER, got {:?}", other),
    };
    assert_eq!(first.method, rsip::Method::Register);
    assert_eq!(first.uri.to_string(), "sip:example.com");
    assert!(first.authorization_header().is_none());

    agent.peer.inject(challenge(&first), proxy())?;
    let second = expect_request(&mut agent.peer, rsip::Method::Register).await;
    assert!(second.authorization_header().is_some());
    assert_eq!(second.call_id()?, first.call_id()?);
    assert!(second.cseq_seq()? > first.cseq_seq()?);
    assert_ne!(second.top_branch(), first.top_branch());

    agent
        .peer
        .inject(respond(&second, StatusCode::OK, Some("reg-ok")), proxy())?;
    assert!(matches!(
        wait_for_event(&mut agent.events, |e| matches!(e, UserAgentEvent::Registered)).await,
        Some(UserAgentEvent::Registered)
    ));
    assert!(agent.ua.is_registered());
    assert!(agent.ua.challenge_manager().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_register_wrong_password_retries_once() -> crate::Result<()> {
    let mut agent = create_test_agent(test_config())?;
    agent.ua.register().await?;
    let first = expect_request(&mut agent.peer, rsip::Method::Register).await;
    agent.peer.inject(challenge(&first), proxy())?;
    let second = expect_request(&mut agent.peer, rsip::Method::Register).await;
    agent.peer.inject(challenge(&second), proxy())?;

    let failed = wait_for_event(&mut agent.events, |e| {
        matches!(e, UserAgentEvent::RegistrationFailed(_))
    })
    .await;
    assert!(matches!(
        failed,
        Some(UserAgentEvent::RegistrationFailed(
            FailureReason::AuthenticationFailed
        ))
    ));
    // exactly two REGISTERs went out
    assert!(next_outgoing(&mut agent.peer).await.is_none());
    assert!(!agent.ua.is_registered());
    Ok(())
}

#[tokio::test]
async fn test_register_without_password_gives_up() -> crate::Result<()> {
    let mut config = test_config();
    config.password = None;
    let mut agent = create_test_agent(config)?;
    agent.ua.register().await?;
    let first = expect_request(&mut agent.peer, rsip::Method::Register).await;
    agent.peer.inject(challenge(&first), proxy())?;
    assert!(matches!(
        wait_for_event(&mut agent.events, |e| matches!(e, UserAgentEvent::RegistrationFailed(_))).await,
        Some(UserAgentEvent::RegistrationFailed(FailureReason::AuthenticationFailed))
    ));
    assert!(next_outgoing(&mut agent.peer).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_register_rejected() -> crate::Result<()> {
    let mut agent = create_test_agent(test_config())?;
    agent.ua.register().await?;
    let first = expect_request(&mut agent.peer, rsip::Method::Register).await;
    agent
        .peer
        .inject(respond(&first, StatusCode::Forbidden, Some("f")), proxy())?;
    assert!(matches!(
        wait_for_event(&mut agent.events, |e| matches!(e, UserAgentEvent::RegistrationFailed(_))).await,
        Some(UserAgentEvent::RegistrationFailed(FailureReason::Rejected(StatusCode::Forbidden)))
    ));
    Ok(())
}

#[tokio::test]
async fn test_register_timeout() -> crate::Result<()> {
    let mut agent = create_test_agent(test_config())?;
    agent.ua.register().await?;
    expect_request(&mut agent.peer, rsip::Method::Register).await;
    // Timer F is 64*T1
    assert!(matches!(
        wait_for_event(&mut agent.events, |e| matches!(e, UserAgentEvent::RegistrationFailed(_))).await,
        Some(UserAgentEvent::RegistrationFailed(FailureReason::Timeout))
    ));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(agent.ua.transaction_manager().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_challenged_retry_timeout_forgets_challenge() -> crate::Result<()> {
    let mut agent = create_test_agent(test_config())?;
    agent.ua.register().await?;
    let first = expect_request(&mut agent.peer, rsip::Method::Register).await;
    agent.peer.inject(challenge(&first), proxy())?;
    expect_request(&mut agent.peer, rsip::Method::Register).await;
    assert_eq!(agent.ua.challenge_manager().len(), 1);

    assert!(matches!(
        wait_for_event(&mut agent.events, |e| matches!(e, UserAgentEvent::RegistrationFailed(_))).await,
        Some(UserAgentEvent::RegistrationFailed(FailureReason::Timeout))
    ));
    assert!(agent.ua.challenge_manager().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unregister() -> crate::Result<()> {
    let mut agent = create_test_agent(test_config())?;
    agent.ua.register().await?;
    let register = expect_request(&mut agent.peer, rsip::Method::Register).await;
    agent
        .peer
        .inject(respond(&register, StatusCode::OK, Some("r1")), proxy())?;
    wait_for_event(&mut agent.events, |e| matches!(e, UserAgentEvent::Registered)).await;
    assert!(agent.ua.is_registered());

    agent.ua.unregister().await?;
    let unregister = expect_request(&mut agent.peer, rsip::Method::Register).await;
    assert_eq!(unregister.call_id()?, register.call_id()?);
    assert_eq!(expires_of(&register), 3600);
    assert_eq!(expires_of(&unregister), 0);
    agent
        .peer
        .inject(respond(&unregister, StatusCode::OK, Some("r2")), proxy())?;
    assert!(matches!(
        wait_for_event(&mut agent.events, |e| matches!(e, UserAgentEvent::Unregistered)).await,
        Some(UserAgentEvent::Unregistered)
    ));
    assert!(!agent.ua.is_registered());
    Ok(())
}

#[tokio::test]
async fn test_register_unresolvable_domain() -> crate::Result<()> {
    let mut config = test_config();
    config.outbound_proxy = None;
    config.domain = "registrar.invalid".to_string();
    let agent = create_test_agent(config)?;
    assert!(matches!(
        agent.ua.register().await,
        Err(crate::Error::AddressResolutionError(_))
    ));
    Ok(())
}
