use rsip::{
    headers::ContentLength,
    prelude::{HeadersExt, UntypedHeader},
    Header, Request, Response, StatusCode,
};

/// Build a request carrying the mandatory RFC 3261 headers.
///
/// Headers appear in the order Via, Call-ID, From, To, CSeq, Max-Forwards,
/// User-Agent. Contact, routing and body headers are added by the caller.
#[allow(clippy::too_many_arguments)]
pub fn make_request(
    method: rsip::Method,
    req_uri: rsip::Uri,
    via: rsip::headers::Via,
    call_id: rsip::headers::CallId,
    from: rsip::headers::From,
    to: rsip::headers::To,
    seq: u32,
    user_agent: &str,
) -> Request {
    let headers = vec![
        Header::Via(via),
        Header::CallId(call_id),
        Header::From(from),
        Header::To(to),
        Header::CSeq(rsip::typed::CSeq { seq, method }.into()),
        Header::MaxForwards(70.into()),
        Header::UserAgent(user_agent.to_string().into()),
    ];
    Request {
        method,
        uri: req_uri,
        headers: headers.into(),
        body: vec![],
        version: rsip::Version::V2,
    }
}

/// Build a response to `req`, copying the headers that identify the exchange.
pub fn make_response(
    req: &Request,
    status_code: StatusCode,
    body: Option<Vec<u8>>,
    user_agent: &str,
) -> Response {
    let mut headers = req.headers.clone();
    headers.retain(|h| {
        matches!(
            h,
            Header::Via(_)
                | Header::CallId(_)
                | Header::From(_)
                | Header::To(_)
                | Header::CSeq(_)
                | Header::RecordRoute(_)
        )
    });
    headers.push(Header::ContentLength(
        body.as_ref().map_or(0u32, |b| b.len() as u32).into(),
    ));
    headers.unique_push(Header::UserAgent(user_agent.to_string().into()));
    Response {
        status_code,
        version: req.version.clone(),
        headers,
        body: body.unwrap_or_default(),
    }
}

/// ACK for a non-2xx final response. It belongs to the INVITE transaction, so
/// it reuses the INVITE's top Via (and branch), Request-URI and Route set.
pub fn make_ack_for_non_2xx(original: &Request, resp: &Response) -> crate::Result<Request> {
    let mut headers: Vec<Header> = Vec::new();
    headers.push(Header::Via(original.via_header()?.clone()));
    headers.push(Header::CallId(original.call_id_header()?.clone()));
    headers.push(Header::From(original.from_header()?.clone()));
    headers.push(Header::To(resp.to_header()?.clone()));
    let seq = original.cseq_header()?.seq()?;
    headers.push(Header::CSeq(
        rsip::typed::CSeq {
            seq,
            method: rsip::Method::Ack,
        }
        .into(),
    ));
    for h in original.headers.iter() {
        if let Header::Route(route) = h {
            headers.push(Header::Route(route.clone()));
        }
    }
    headers.push(Header::MaxForwards(70.into()));
    headers.push(Header::ContentLength(ContentLength::default()));
    Ok(Request {
        method: rsip::Method::Ack,
        uri: original.uri.clone(),
        headers: headers.into(),
        body: vec![],
        version: rsip::Version::V2,
    })
}

/// CANCEL for a pending INVITE: same Request-URI, Call-ID, From, To, top Via
/// and CSeq number as the INVITE it cancels.
pub fn make_cancel(invite: &Request, user_agent: &str) -> crate::Result<Request> {
    let seq = invite.cseq_header()?.seq()?;
    let mut headers = vec![
        Header::Via(invite.via_header()?.clone()),
        Header::CallId(invite.call_id_header()?.clone()),
        Header::From(invite.from_header()?.clone()),
        Header::To(invite.to_header()?.clone()),
        Header::CSeq(
            rsip::typed::CSeq {
                seq,
                method: rsip::Method::Cancel,
            }
            .into(),
        ),
    ];
    for h in invite.headers.iter() {
        if let Header::Route(route) = h {
            headers.push(Header::Route(route.clone()));
        }
    }
    headers.push(Header::MaxForwards(70.into()));
    headers.push(Header::UserAgent(user_agent.to_string().into()));
    headers.push(Header::ContentLength(ContentLength::default()));
    Ok(Request {
        method: rsip::Method::Cancel,
        uri: invite.uri.clone(),
        headers: headers.into(),
        body: vec![],
        version: rsip::Version::V2,
    })
}

/// Route header values derived from Record-Route, in the order the UAC uses them.
pub fn route_set_from_record_route(record_routes: &[String], reverse: bool) -> Vec<String> {
    let mut routes = record_routes
        .iter()
        .flat_map(|rr| rr.split(','))
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect::<Vec<_>>();
    if reverse {
        routes.reverse();
    }
    routes
}

pub fn route_headers(route_set: &[String]) -> Vec<Header> {
    route_set
        .iter()
        .map(|r| Header::Route(rsip::headers::Route::new(r.clone())))
        .collect()
}
