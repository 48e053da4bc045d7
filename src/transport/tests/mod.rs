mod test_channel;

pub(crate) fn options_request(branch: &str) -> rsip::Request {
    use rsip::headers::*;
    rsip::Request {
        method: rsip::Method::Options,
        uri: rsip::Uri::try_from("sip:bob@127.0.0.1").expect("uri"),
        headers: vec![
            Via::new(format!("SIP/2.0/UDP 127.0.0.1:5061;branch={}", branch)).into(),
            CSeq::new("1 OPTIONS").into(),
            From::new("<sip:alice@127.0.0.1>;tag=a73kszlfl").into(),
            To::new("<sip:bob@127.0.0.1>").into(),
            CallId::new("1j9FpLxk3uxtm8tn@127.0.0.1").into(),
            MaxForwards::new("70").into(),
        ]
        .into(),
        version: rsip::Version::V2,
        body: Default::default(),
    }
}
