use crate::dialog::authenticate::{make_authorized_request, ChallengeKind, Credential};
use rsip::headers::*;
use rsip::prelude::{HeadersExt, ToTypedHeader};
use rsip::{Request, Response, StatusCode};

fn register_request(branch: &str) -> Request {
    Request {
        method: rsip::Method::Register,
        uri: rsip::Uri::try_from("sip:example.com").expect("uri"),
        headers: vec![
            Via::new(format!("SIP/2.0/UDP alice.example.com:5060;branch={}", branch)).into(),
            CSeq::new("1 REGISTER").into(),
            From::new("<sip:alice@example.com>;tag=1928301774").into(),
            To::new("<sip:alice@example.com>").into(),
            CallId::new("a84b4c76e66710@alice.example.com").into(),
            MaxForwards::new("70").into(),
        ]
        .into(),
        version: rsip::Version::V2,
        body: vec![],
    }
}

fn challenge(status_code: StatusCode, header: rsip::Header) -> Response {
    Response {
        status_code,
        version: rsip::Version::V2,
        headers: vec![
            Via::new("SIP/2.0/UDP alice.example.com:5060;branch=z9hG4bKoriginal123").into(),
            CSeq::new("1 REGISTER").into(),
            From::new("<sip:alice@example.com>;tag=1928301774").into(),
            To::new("<sip:alice@example.com>;tag=srv1").into(),
            CallId::new("a84b4c76e66710@alice.example.com").into(),
            header,
        ]
        .into(),
        body: vec![],
    }
}

const CHALLENGE: &str =
    r#"Digest realm="example.com", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", algorithm=MD5, qop="auth""#;

fn credential() -> Credential {
    Credential {
        username: "alice".to_string(),
        password: "secret123".to_string(),
        realm: None,
    }
}

#[test]
fn test_authorized_request_gets_new_branch_and_cseq() -> crate::Result<()> {
    let original = register_request("z9hG4bKoriginal123");
    let resp = challenge(StatusCode::Unauthorized, WwwAuthenticate::new(CHALLENGE).into());

    let retry = make_authorized_request(&original, &resp, &credential(), 2)?;

    let via = retry.via_header()?.typed()?;
    let branch = via.branch().map(|b| b.to_string()).expect("branch");
    assert_ne!(branch, "z9hG4bKoriginal123");
    assert!(branch.starts_with("z9hG4bK"));
    assert_eq!(
        via.params
            .iter()
            .filter(|p| matches!(p, rsip::Param::Branch(_)))
            .count(),
        1
    );
    assert_eq!(retry.cseq_header()?.seq()?, 2);
    assert_eq!(retry.call_id_header()?.value(), "a84b4c76e66710@alice.example.com");

    let auth = retry
        .headers
        .iter()
        .find_map(|h| match h {
            rsip::Header::Authorization(a) => Some(a.clone()),
            _ => None,
        })
        .expect("authorization header");
    let auth = auth.typed()?;
    assert_eq!(auth.username, "alice");
    assert_eq!(auth.realm, "example.com");
    assert!(auth.qop.is_some());
    Ok(())
}

#[test]
fn test_proxy_challenge_uses_proxy_authorization() -> crate::Result<()> {
    let original = register_request("z9hG4bKoriginal123");
    let resp = challenge(
        StatusCode::ProxyAuthenticationRequired,
        ProxyAuthenticate::new(CHALLENGE).into(),
    );
    assert_eq!(
        ChallengeKind::from_status(&resp.status_code),
        Some(ChallengeKind::Proxy)
    );

    let retry = make_authorized_request(&original, &resp, &credential(), 3)?;
    assert!(retry
        .headers
        .iter()
        .any(|h| matches!(h, rsip::Header::ProxyAuthorization(_))));
    assert!(!retry
        .headers
        .iter()
        .any(|h| matches!(h, rsip::Header::Authorization(_))));
    Ok(())
}

#[test]
fn test_challenge_errors() {
    let original = register_request("z9hG4bKoriginal123");
    let no_header = challenge(StatusCode::Unauthorized, MaxForwards::new("70").into());
    assert!(matches!(
        make_authorized_request(&original, &no_header, &credential(), 2),
        Err(crate::Error::AuthenticationFailed(_))
    ));

    let resp = challenge(StatusCode::Unauthorized, WwwAuthenticate::new(CHALLENGE).into());
    let other_realm = Credential {
        realm: Some("elsewhere.com".to_string()),
        ..credential()
    };
    assert!(matches!(
        make_authorized_request(&original, &resp, &other_realm, 2),
        Err(crate::Error::AuthenticationFailed(_))
    ));
}

#[test]
fn test_retry_keeps_credentials_of_other_kind() -> crate::Result<()> {
    let count = |req: &Request| {
        let proxy = req
            .headers
            .iter()
            .filter(|h| matches!(h, rsip::Header::ProxyAuthorization(_)))
            .count();
        let www = req
            .headers
            .iter()
            .filter(|h| matches!(h, rsip::Header::Authorization(_)))
            .count();
        (proxy, www)
    };
    let original = register_request("z9hG4bKoriginal123");
    let proxy_challenge = challenge(
        StatusCode::ProxyAuthenticationRequired,
        ProxyAuthenticate::new(CHALLENGE).into(),
    );
    let second = make_authorized_request(&original, &proxy_challenge, &credential(), 2)?;
    assert_eq!(count(&second), (1, 0));

    let www_challenge = challenge(StatusCode::Unauthorized, WwwAuthenticate::new(CHALLENGE).into());
    let third = make_authorized_request(&second, &www_challenge, &credential(), 3)?;
    assert_eq!(count(&third), (1, 1));

    // a fresh proxy challenge replaces the stale proxy credentials
    let fourth = make_authorized_request(&third, &proxy_challenge, &credential(), 4)?;
    assert_eq!(count(&fourth), (1, 1));
    Ok(())
}
