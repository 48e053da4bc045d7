use rsip::headers::*;
use rsip::{Request, Response, StatusCode};

mod test_authenticate;

pub(super) fn invite_request() -> Request {
    Request {
        method: rsip::Method::Invite,
        uri: rsip::Uri::try_from("sip:bob@biloxi.example.com").expect("uri"),
        headers: vec![
            Via::new("SIP/2.0/UDP pc33.atlanta.example.com;branch=z9hG4bKnashds8").into(),
            CSeq::new("7 INVITE").into(),
            From::new("Alice <sip:alice@atlanta.example.com>;tag=1928301774").into(),
            To::new("Bob <sip:bob@biloxi.example.com>").into(),
            CallId::new("a84b4c76e66710@pc33.atlanta.example.com").into(),
            Contact::new("<sip:alice@pc33.atlanta.example.com>").into(),
            MaxForwards::new("70").into(),
        ]
        .into(),
        version: rsip::Version::V2,
        body: vec![],
    }
}

pub(super) fn response_to(req: &Request, status_code: StatusCode, to_tag: &str) -> Response {
    let mut headers: Vec<rsip::Header> = vec![
        Via::new("SIP/2.0/UDP pc33.atlanta.example.com;branch=z9hG4bKnashds8").into(),
        CSeq::new(format!("7 {}", req.method)).into(),
        From::new("Alice <sip:alice@atlanta.example.com>;tag=1928301774").into(),
        To::new(format!("Bob <sip:bob@biloxi.example.com>;tag={}", to_tag)).into(),
        CallId::new("a84b4c76e66710@pc33.atlanta.example.com").into(),
        Contact::new("<sip:bob@192.0.2.4>").into(),
    ];
    headers.push(RecordRoute::new("<sip:p1.example.com;lr>").into());
    headers.push(RecordRoute::new("<sip:p2.example.com;lr>").into());
    Response {
        status_code,
        version: rsip::Version::V2,
        headers: headers.into(),
        body: vec![],
    }
}
