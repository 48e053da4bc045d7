use super::{
    handlers::{Handlers, IncomingRequest},
    initial::{InitialRequestManager, Routing},
    mid_dialog::MidDialogRequestManager,
};
use crate::{dialog::Dialog, transaction::TransactionKey, Result};
use rsip::Request;
use std::{net::SocketAddr, sync::Arc};

/// Server role: processes inbound requests and answers incoming calls.
#[derive(Clone)]
pub struct Uas {
    initial: Arc<InitialRequestManager>,
    mid_dialog: Arc<MidDialogRequestManager>,
    handlers: Arc<Handlers>,
}

impl Uas {
    pub fn new(
        initial: Arc<InitialRequestManager>,
        mid_dialog: Arc<MidDialogRequestManager>,
        handlers: Arc<Handlers>,
    ) -> Self {
        Uas {
            initial,
            mid_dialog,
            handlers,
        }
    }

    /// Route an inbound request. `key` is its server transaction, absent
    /// only for ACK.
    pub async fn process_request(
        &self,
        request: Request,
        key: Option<TransactionKey>,
        source: SocketAddr,
    ) -> Result<()> {
        let incoming = IncomingRequest {
            request,
            key,
            source,
            dialog: None,
        };
        match self.initial.route_request(incoming).await? {
            Routing::Handled => Ok(()),
            Routing::Declined(incoming) => self.mid_dialog.route_request(incoming).await,
        }
    }

    pub async fn accept_call(&self, req: &Request, dialog: &Dialog) -> Result<()> {
        self.handlers.invite.accept_call(req, dialog).await
    }

    pub async fn reject_call(&self, req: &Request) -> Result<()> {
        self.handlers.invite.reject_call(req).await
    }
}
