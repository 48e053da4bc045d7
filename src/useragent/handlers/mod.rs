//! Per-method request handlers.
//!
//! Every SIP method the user agent understands has one handler. The UAS side
//! calls [`MethodHandler::process_request`] for inbound requests; the UAC side
//! feeds responses and timeouts of its client transactions back through
//! [`MethodHandler::process_response`] and [`MethodHandler::abort_transaction`].
use super::shared::UserAgentCoreRef;
use crate::{
    dialog::Dialog,
    transaction::{Transaction, TransactionKey},
    Result,
};
use async_trait::async_trait;
use rsip::{prelude::HeadersExt, Header, Request, Response, StatusCode};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, info};

pub mod bye;
pub mod cancel;
pub mod invite;
pub mod options;
pub mod register;

pub use bye::ByeHandler;
pub use cancel::CancelHandler;
pub use invite::InviteHandler;
pub use options::OptionsHandler;
pub use register::RegisterHandler;

pub const ALLOW_METHODS: &str = "INVITE, ACK, CANCEL, BYE, OPTIONS";
pub const ACCEPT_CONTENT: &str = "application/sdp";

/// An inbound request on its way to a handler.
#[derive(Clone, Debug)]
pub struct IncomingRequest {
    pub request: Request,
    /// Server transaction; `None` only for ACK.
    pub key: Option<TransactionKey>,
    pub source: SocketAddr,
    /// Set by the mid-dialog manager.
    pub dialog: Option<Dialog>,
}

#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn process_request(&self, incoming: IncomingRequest) -> Result<()>;
    async fn process_response(&self, resp: &Response, tx: &Transaction) -> Result<()>;
    async fn abort_transaction(&self, tx: &Transaction) -> Result<()>;
}

/// The fixed set of handlers, built once per user agent.
pub struct Handlers {
    core: UserAgentCoreRef,
    pub invite: Arc<InviteHandler>,
    pub cancel: Arc<CancelHandler>,
    pub bye: Arc<ByeHandler>,
    pub options: Arc<OptionsHandler>,
    pub register: Arc<RegisterHandler>,
}

impl Handlers {
    pub fn new(core: UserAgentCoreRef) -> Self {
        let invite = Arc::new(InviteHandler::new(core.clone()));
        Handlers {
            cancel: Arc::new(CancelHandler::new(core.clone(), invite.clone())),
            bye: Arc::new(ByeHandler::new(core.clone())),
            options: Arc::new(OptionsHandler::new(core.clone())),
            register: Arc::new(RegisterHandler::new(core.clone())),
            invite,
            core,
        }
    }

    /// ACK belongs to the INVITE handler. `None` means 405.
    pub fn for_method(&self, method: rsip::Method) -> Option<Arc<dyn MethodHandler>> {
        let handler: Arc<dyn MethodHandler> = match method {
            rsip::Method::Invite | rsip::Method::Ack => self.invite.clone(),
            rsip::Method::Cancel => self.cancel.clone(),
            rsip::Method::Bye => self.bye.clone(),
            rsip::Method::Options => self.options.clone(),
            rsip::Method::Register => self.register.clone(),
            _ => return None,
        };
        Some(handler)
    }

    pub async fn process_request(&self, incoming: IncomingRequest) -> Result<()> {
        match self.for_method(incoming.request.method) {
            Some(handler) => handler.process_request(incoming).await,
            None => {
                info!(method = %incoming.request.method, "method not allowed");
                reply(&self.core, &incoming, StatusCode::MethodNotAllowed).await
            }
        }
    }

    pub async fn process_response(&self, resp: &Response, tx: &Transaction) -> Result<()> {
        match self.for_method(tx.method()) {
            Some(handler) => handler.process_response(resp, tx).await,
            None => {
                debug!(key = %tx.key, "response for a method without handler");
                Ok(())
            }
        }
    }

    pub async fn abort_transaction(&self, tx: &Transaction) -> Result<()> {
        match self.for_method(tx.method()) {
            Some(handler) => handler.abort_transaction(tx).await,
            None => Ok(()),
        }
    }
}

/// Send `resp` on the request's server transaction.
pub(crate) async fn send_response(
    core: &UserAgentCoreRef,
    incoming: &IncomingRequest,
    resp: Response,
) -> Result<()> {
    match &incoming.key {
        Some(key) => core.tm.send_response(key, resp).await,
        None => {
            debug!(status = %resp.status_code, "response without transaction");
            core.transport.send_response(&resp, incoming.source).await
        }
    }
}

/// Answer with a bodyless response.
pub(crate) async fn reply(
    core: &UserAgentCoreRef,
    incoming: &IncomingRequest,
    status: StatusCode,
) -> Result<()> {
    let mut resp = core.make_response(&incoming.request, status.clone(), None);
    if status == StatusCode::MethodNotAllowed {
        resp.headers
            .push(Header::Other("Allow".into(), ALLOW_METHODS.into()));
    }
    send_response(core, incoming, resp).await
}

/// Put our dialog tag on the To header of a response.
pub(crate) fn tag_response(resp: &mut Response, tag: &str) -> Result<()> {
    resp.to_header_mut()?.mut_tag(tag.to_string().into())?;
    Ok(())
}
