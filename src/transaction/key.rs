use crate::rsip_ext::RsipMessageExt;
use crate::{Error, Result};
use rsip::{
    prelude::{HeadersExt, ToTypedHeader},
    Method,
};
use std::hash::Hash;

use super::BRANCH_MAGIC_COOKIE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionRole {
    Client,
    Server,
}

impl std::fmt::Display for TransactionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionRole::Client => write!(f, "c"),
            TransactionRole::Server => write!(f, "s"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rfc3261 {
    pub branch: String,
    pub method: Method,
    pub role: TransactionRole,
}

impl Hash for Rfc3261 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.branch.hash(state);
        self.method.to_string().hash(state);
        self.role.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rfc2543 {
    pub method: Method,
    pub cseq: u32,
    pub from_tag: String,
    pub call_id: String,
    pub via_host_port: String,
    pub role: TransactionRole,
}

impl Hash for Rfc2543 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.method.to_string().hash(state);
        self.cseq.hash(state);
        self.from_tag.hash(state);
        self.call_id.hash(state);
        self.via_host_port.hash(state);
        self.role.hash(state);
    }
}

/// Identity of a transaction: branch, method and direction.
///
/// ACK shares the key of the INVITE it acknowledges. CANCEL has its own key;
/// [`TransactionKey::with_method`] yields the key of the INVITE it targets.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TransactionKey {
    RFC3261(Rfc3261),
    RFC2543(Rfc2543),
    Invalid,
}

impl std::fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKey::RFC3261(k) => write!(f, "{}({})/{}", k.method, k.branch, k.role),
            TransactionKey::RFC2543(k) => write!(
                f,
                "{} {}/{} {}[{}]/{}",
                k.call_id, k.method, k.cseq, k.from_tag, k.via_host_port, k.role
            ),
            TransactionKey::Invalid => write!(f, "INVALID"),
        }
    }
}

fn key_method(method: Method) -> Method {
    match method {
        Method::Ack => Method::Invite,
        m => m,
    }
}

impl TransactionKey {
    pub fn from_request(req: &rsip::Request, role: TransactionRole) -> Result<Self> {
        let method = key_method(req.method);
        match req.top_branch() {
            Some(branch) if branch.starts_with(BRANCH_MAGIC_COOKIE) => {
                Ok(TransactionKey::RFC3261(Rfc3261 {
                    branch,
                    method,
                    role,
                }))
            }
            _ => {
                let via = req.via_header()?.typed()?;
                Ok(TransactionKey::RFC2543(Rfc2543 {
                    method,
                    cseq: req.cseq_seq()?,
                    from_tag: req.from_tag()?.unwrap_or_default(),
                    call_id: req.call_id()?,
                    via_host_port: via.uri.host_with_port.to_string(),
                    role,
                }))
            }
        }
    }

    pub fn from_response(resp: &rsip::Response, role: TransactionRole) -> Result<Self> {
        let method = key_method(resp.cseq_method()?);
        match resp.top_branch() {
            Some(branch) if branch.starts_with(BRANCH_MAGIC_COOKIE) => {
                Ok(TransactionKey::RFC3261(Rfc3261 {
                    branch,
                    method,
                    role,
                }))
            }
            _ => {
                let via = resp.via_header()?.typed()?;
                Ok(TransactionKey::RFC2543(Rfc2543 {
                    method,
                    cseq: resp.cseq_seq()?,
                    from_tag: resp.from_tag()?.unwrap_or_default(),
                    call_id: resp.call_id()?,
                    via_host_port: via.uri.host_with_port.to_string(),
                    role,
                }))
            }
        }
    }

    pub fn method(&self) -> Option<Method> {
        match self {
            TransactionKey::RFC3261(k) => Some(k.method),
            TransactionKey::RFC2543(k) => Some(k.method),
            TransactionKey::Invalid => None,
        }
    }

    pub fn role(&self) -> Option<TransactionRole> {
        match self {
            TransactionKey::RFC3261(k) => Some(k.role),
            TransactionKey::RFC2543(k) => Some(k.role),
            TransactionKey::Invalid => None,
        }
    }

    /// Same branch and direction, different method.
    pub fn with_method(&self, method: Method) -> Self {
        let method = key_method(method);
        match self {
            TransactionKey::RFC3261(k) => TransactionKey::RFC3261(Rfc3261 {
                method,
                ..k.clone()
            }),
            TransactionKey::RFC2543(k) => TransactionKey::RFC2543(Rfc2543 {
                method,
                ..k.clone()
            }),
            TransactionKey::Invalid => TransactionKey::Invalid,
        }
    }
}

impl TryFrom<&rsip::Request> for TransactionKey {
    type Error = Error;

    /// Key of the server transaction an inbound request belongs to.
    fn try_from(req: &rsip::Request) -> Result<Self> {
        TransactionKey::from_request(req, TransactionRole::Server)
    }
}

impl TryFrom<&rsip::Response> for TransactionKey {
    type Error = Error;

    /// Key of the client transaction an inbound response belongs to.
    fn try_from(resp: &rsip::Response) -> Result<Self> {
        TransactionKey::from_response(resp, TransactionRole::Client)
    }
}
