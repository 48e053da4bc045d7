use super::{
    handlers::{send_response, Handlers, IncomingRequest},
    shared::UserAgentCoreRef,
};
use crate::{dialog::Dialog, rsip_ext::RsipMessageExt, transaction::Transaction, Error, Result};
use rsip::{Response, StatusCode};
use std::sync::Arc;
use tracing::{info, trace};

/// Routes requests and responses inside an established dialog.
pub struct MidDialogRequestManager {
    core: UserAgentCoreRef,
    handlers: Arc<Handlers>,
}

impl MidDialogRequestManager {
    pub fn new(core: UserAgentCoreRef, handlers: Arc<Handlers>) -> Self {
        MidDialogRequestManager { core, handlers }
    }

    /// A request whose CSeq is not above the last one the peer sent in this
    /// dialog is answered with 500. ACK and CANCEL reuse the CSeq of the
    /// request they refer to and skip the check.
    pub async fn route_request(&self, incoming: IncomingRequest) -> Result<()> {
        let dialog = incoming.dialog.clone().ok_or_else(|| {
            Error::SipMessageError("mid-dialog request without a dialog".to_string())
        })?;
        let method = incoming.request.method;
        if !matches!(method, rsip::Method::Ack | rsip::Method::Cancel) {
            let seq = incoming.request.cseq_seq()?;
            if !dialog.update_remote_seq(seq) {
                info!(id = %dialog.id(), seq, last = dialog.remote_seq(), "request out of order");
                let resp = self.core.make_response(
                    &incoming.request,
                    StatusCode::ServerInternalError,
                    None,
                );
                return send_response(&self.core, &incoming, resp).await;
            }
        }
        trace!(id = %dialog.id(), %method, "mid-dialog request");
        self.handlers.process_request(incoming).await
    }

    pub async fn route_response(&self, resp: &Response, tx: &Transaction, dialog: &Dialog) -> Result<()> {
        trace!(id = %dialog.id(), status = %resp.status_code, "mid-dialog response");
        self.handlers.process_response(resp, tx).await
    }
}
