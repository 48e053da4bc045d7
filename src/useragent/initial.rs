use super::{
    handlers::{Handlers, IncomingRequest},
    shared::UserAgentCoreRef,
};
use crate::{dialog::Dialog, transaction::Transaction, Result};
use rsip::Response;
use std::sync::Arc;
use tracing::trace;

/// Result of offering a message to a request manager.
#[derive(Debug)]
pub enum Routing<T> {
    Handled,
    /// The message belongs to an existing dialog; hand it to the mid-dialog
    /// manager.
    Declined(T),
}

/// Routes requests and responses that match no existing dialog.
pub struct InitialRequestManager {
    core: UserAgentCoreRef,
    handlers: Arc<Handlers>,
}

impl InitialRequestManager {
    pub fn new(core: UserAgentCoreRef, handlers: Arc<Handlers>) -> Self {
        InitialRequestManager { core, handlers }
    }

    pub async fn route_request(
        &self,
        incoming: IncomingRequest,
    ) -> Result<Routing<IncomingRequest>> {
        if let Some(dialog) = self.core.dm.find_for_request(&incoming.request) {
            return Ok(Routing::Declined(IncomingRequest {
                dialog: Some(dialog),
                ..incoming
            }));
        }
        trace!(method = %incoming.request.method, "initial request");
        self.handlers.process_request(incoming).await?;
        Ok(Routing::Handled)
    }

    pub async fn route_response(&self, resp: &Response, tx: &Transaction) -> Result<Routing<Dialog>> {
        if let Some(dialog) = self.core.dm.find_for_response(resp) {
            return Ok(Routing::Declined(dialog));
        }
        self.handlers.process_response(resp, tx).await?;
        Ok(Routing::Handled)
    }
}
