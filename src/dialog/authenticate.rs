use crate::transaction::{make_via_branch, random_text, CNONCE_LEN};
use crate::{Error, Result};
use rsip::headers::auth::AuthQop;
use rsip::prelude::{HeadersExt, ToTypedHeader, UntypedHeader};
use rsip::services::DigestGenerator;
use rsip::typed::{Authorization, ProxyAuthorization};
use rsip::{Header, Param, Request, Response};

#[derive(Clone, Debug)]
pub struct Credential {
    pub username: String,
    pub password: String,
    /// Only answer challenges from this realm when set.
    pub realm: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    /// 401 with WWW-Authenticate
    Www,
    /// 407 with Proxy-Authenticate
    Proxy,
}

impl ChallengeKind {
    pub fn from_status(status: &rsip::StatusCode) -> Option<Self> {
        match status {
            rsip::StatusCode::Unauthorized => Some(ChallengeKind::Www),
            rsip::StatusCode::ProxyAuthenticationRequired => Some(ChallengeKind::Proxy),
            _ => None,
        }
    }
}

fn challenge_of(resp: &Response, kind: ChallengeKind) -> Result<rsip::typed::WwwAuthenticate> {
    let missing = || Error::AuthenticationFailed(format!("{} without challenge", resp.status_code));
    match kind {
        ChallengeKind::Www => Ok(resp.www_authenticate_header().ok_or_else(missing)?.typed()?),
        ChallengeKind::Proxy => {
            let value = resp
                .headers
                .iter()
                .find_map(|h| match h {
                    Header::ProxyAuthenticate(h) => Some(h.value().to_string()),
                    _ => None,
                })
                .ok_or_else(missing)?;
            Ok(rsip::headers::WwwAuthenticate::new(value).typed()?)
        }
    }
}

/// Copy of `original` answering the challenge in `resp`, with a new Via
/// branch and CSeq `new_seq`.
pub fn make_authorized_request(
    original: &Request,
    resp: &Response,
    cred: &Credential,
    new_seq: u32,
) -> Result<Request> {
    let kind = ChallengeKind::from_status(&resp.status_code).ok_or_else(|| {
        Error::AuthenticationFailed(format!("{} is not a challenge", resp.status_code))
    })?;
    let challenge = challenge_of(resp, kind)?;
    if let Some(realm) = &cred.realm {
        if realm != &challenge.realm {
            return Err(Error::AuthenticationFailed(format!(
                "no credentials for realm {}",
                challenge.realm
            )));
        }
    }

    let mut new_req = original.clone();
    new_req.cseq_header_mut()?.mut_seq(new_seq)?;

    let auth_qop = challenge.qop.as_ref().map(|_| AuthQop::Auth {
        cnonce: random_text(CNONCE_LEN),
        nc: 1,
    });

    let generator = DigestGenerator {
        username: cred.username.as_str(),
        password: cred.password.as_str(),
        algorithm: challenge.algorithm.unwrap_or_default(),
        nonce: challenge.nonce.as_str(),
        method: &original.method,
        qop: auth_qop.as_ref(),
        uri: &original.uri,
        realm: challenge.realm.as_str(),
    };

    let auth = Authorization {
        scheme: challenge.scheme,
        username: cred.username.clone(),
        realm: challenge.realm.clone(),
        nonce: challenge.nonce.clone(),
        uri: original.uri.clone(),
        response: generator.compute(),
        algorithm: challenge.algorithm,
        opaque: challenge.opaque,
        qop: auth_qop,
    };

    // new branch, the retry is a new transaction
    let mut via = new_req.via_header()?.typed()?;
    via.params.retain(|p| !matches!(p, Param::Branch(_)));
    via.params.push(make_via_branch());
    for h in new_req.headers.iter_mut() {
        if let Header::Via(top) = h {
            *top = via.into();
            break;
        }
    }

    // credentials for the other challenge kind still apply
    new_req.headers.retain(|h| match kind {
        ChallengeKind::Www => !matches!(h, Header::Authorization(_)),
        ChallengeKind::Proxy => !matches!(h, Header::ProxyAuthorization(_)),
    });
    match kind {
        ChallengeKind::Www => new_req.headers.push(auth.into()),
        ChallengeKind::Proxy => new_req.headers.push(ProxyAuthorization(auth).into()),
    }
    Ok(new_req)
}
