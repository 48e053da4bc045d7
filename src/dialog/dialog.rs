use super::DialogId;
use crate::{
    rsip_ext::{strip_tag, RsipMessageExt},
    transaction::{
        message::{make_request, route_headers, route_set_from_record_route},
        TransactionKey,
    },
    Result,
};
use rsip::{
    prelude::{HeadersExt, ToTypedHeader, UntypedHeader},
    Header, Request, Response,
};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, RwLock,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Early,
    Confirmed,
    Terminated,
}

impl DialogState {
    fn rank(&self) -> u8 {
        match self {
            DialogState::Early => 0,
            DialogState::Confirmed => 1,
            DialogState::Terminated => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogRole {
    Uac,
    Uas,
}

pub struct DialogInner {
    pub id: DialogId,
    pub role: DialogRole,
    /// Transaction that created the dialog.
    pub created_by: TransactionKey,
    /// Local party, From/To value without tag.
    pub local_uri: String,
    pub remote_uri: String,
    state: RwLock<DialogState>,
    local_seq: AtomicU32,
    /// 0 until the remote peer sends a request.
    remote_seq: AtomicU32,
    remote_target: RwLock<rsip::Uri>,
    route_set: RwLock<Vec<String>>,
}

/// Shared handle on a dialog. The [`super::DialogManager`] owns the table;
/// call legs keep clones for status queries.
#[derive(Clone)]
pub struct Dialog {
    inner: Arc<DialogInner>,
}

impl Dialog {
    /// Dialog created by a response to a request we sent.
    pub fn new_uac(tx_key: TransactionKey, original: &Request, resp: &Response) -> Result<Self> {
        let id = DialogId::from_uac_response(resp)?;
        let remote_target = resp.contact_uri().unwrap_or_else(|| original.uri.clone());
        let route_set = route_set_from_record_route(&resp.record_routes(), true);
        let state = if resp.status_code.code() < 200 {
            DialogState::Early
        } else {
            DialogState::Confirmed
        };
        Ok(Dialog {
            inner: Arc::new(DialogInner {
                id,
                role: DialogRole::Uac,
                created_by: tx_key,
                local_uri: strip_tag(original.from_header()?.value()),
                remote_uri: strip_tag(resp.to_header()?.value()),
                state: RwLock::new(state),
                local_seq: AtomicU32::new(original.cseq_seq()?),
                remote_seq: AtomicU32::new(0),
                remote_target: RwLock::new(remote_target),
                route_set: RwLock::new(route_set),
            }),
        })
    }

    /// Early dialog for a request we are answering with `local_tag`.
    pub fn new_uas(tx_key: TransactionKey, req: &Request, local_tag: &str) -> Result<Self> {
        let id = DialogId::from_uas_request(req, local_tag)?;
        let remote_target = match req.contact_uri() {
            Some(uri) => uri,
            None => req.from_header()?.typed()?.uri,
        };
        let route_set = route_set_from_record_route(&req.record_routes(), false);
        Ok(Dialog {
            inner: Arc::new(DialogInner {
                id,
                role: DialogRole::Uas,
                created_by: tx_key,
                local_uri: strip_tag(req.to_header()?.value()),
                remote_uri: strip_tag(req.from_header()?.value()),
                state: RwLock::new(DialogState::Early),
                local_seq: AtomicU32::new(0),
                remote_seq: AtomicU32::new(req.cseq_seq()?),
                remote_target: RwLock::new(remote_target),
                route_set: RwLock::new(route_set),
            }),
        })
    }

    pub fn id(&self) -> &DialogId {
        &self.inner.id
    }

    pub fn role(&self) -> DialogRole {
        self.inner.role
    }

    pub fn created_by(&self) -> &TransactionKey {
        &self.inner.created_by
    }

    pub fn local_uri(&self) -> &str {
        &self.inner.local_uri
    }

    pub fn remote_uri(&self) -> &str {
        &self.inner.remote_uri
    }

    pub fn state(&self) -> DialogState {
        self.inner
            .state
            .read()
            .map(|s| *s)
            .unwrap_or(DialogState::Terminated)
    }

    pub fn is_confirmed(&self) -> bool {
        self.state() == DialogState::Confirmed
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == DialogState::Terminated
    }

    /// Monotonic state change; returns false when `state` is not later.
    pub fn transition(&self, state: DialogState) -> bool {
        match self.inner.state.write() {
            Ok(mut current) if state.rank() > current.rank() => {
                *current = state;
                true
            }
            _ => false,
        }
    }

    pub fn local_seq(&self) -> u32 {
        self.inner.local_seq.load(Ordering::SeqCst)
    }

    /// Record the CSeq of a request we sent in this dialog. Never goes back.
    pub fn set_local_seq(&self, seq: u32) {
        self.inner.local_seq.fetch_max(seq, Ordering::SeqCst);
    }

    pub fn remote_seq(&self) -> u32 {
        self.inner.remote_seq.load(Ordering::SeqCst)
    }

    /// Accept `seq` from the remote peer if it is newer than anything seen so
    /// far. Returns false for duplicates and out-of-order requests.
    pub fn update_remote_seq(&self, seq: u32) -> bool {
        self.inner
            .remote_seq
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current == 0 || seq > current {
                    Some(seq)
                } else {
                    None
                }
            })
            .is_ok()
    }

    pub fn remote_target(&self) -> rsip::Uri {
        self.inner
            .remote_target
            .read()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub fn set_remote_target(&self, uri: rsip::Uri) {
        if let Ok(mut t) = self.inner.remote_target.write() {
            *t = uri;
        }
    }

    pub fn route_set(&self) -> Vec<String> {
        self.inner
            .route_set
            .read()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn set_route_set(&self, route_set: Vec<String>) {
        if let Ok(mut r) = self.inner.route_set.write() {
            *r = route_set;
        }
    }

    /// Refresh target and route set from a response that confirms the dialog.
    pub fn update_from_response(&self, resp: &Response) {
        if let Some(uri) = resp.contact_uri() {
            self.set_remote_target(uri);
        }
        let routes = resp.record_routes();
        if !routes.is_empty() && self.role() == DialogRole::Uac {
            self.set_route_set(route_set_from_record_route(&routes, true));
        }
    }

    /// Build a request inside this dialog. `seq` is recorded as the local CSeq
    /// unless the request is an ACK.
    pub fn make_request(
        &self,
        method: rsip::Method,
        seq: u32,
        via: rsip::headers::Via,
        contact: Option<rsip::headers::Contact>,
        user_agent: &str,
    ) -> Request {
        let id = self.id();
        let from = rsip::headers::From::new(format!("{};tag={}", self.local_uri(), id.local_tag));
        let to = if id.remote_tag.is_empty() {
            rsip::headers::To::new(self.remote_uri().to_string())
        } else {
            rsip::headers::To::new(format!("{};tag={}", self.remote_uri(), id.remote_tag))
        };
        let mut req = make_request(
            method,
            self.remote_target(),
            via,
            rsip::headers::CallId::new(id.call_id.clone()),
            from,
            to,
            seq,
            user_agent,
        );
        for route in route_headers(&self.route_set()) {
            req.headers.push(route);
        }
        if let Some(contact) = contact {
            req.headers.push(Header::Contact(contact));
        }
        if method != rsip::Method::Ack {
            self.set_local_seq(seq);
        }
        req
    }
}

impl std::fmt::Debug for Dialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialog")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .field("local_seq", &self.local_seq())
            .field("remote_seq", &self.remote_seq())
            .finish()
    }
}
