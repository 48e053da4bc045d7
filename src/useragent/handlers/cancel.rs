use super::{reply, IncomingRequest, InviteHandler, MethodHandler};
use crate::{
    transaction::{message::make_cancel, Transaction, TransactionKey, TransactionState},
    useragent::shared::UserAgentCoreRef,
    Error, Result,
};
use async_trait::async_trait;
use rsip::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, info};

pub struct CancelHandler {
    core: UserAgentCoreRef,
    invite: Arc<InviteHandler>,
}

impl CancelHandler {
    pub fn new(core: UserAgentCoreRef, invite: Arc<InviteHandler>) -> Self {
        CancelHandler { core, invite }
    }

    /// CANCEL for an INVITE client transaction that has not seen a final
    /// response yet.
    pub fn create_cancel(&self, invite_tx: &Transaction) -> Result<Request> {
        if !matches!(
            invite_tx.state,
            TransactionState::Calling | TransactionState::Proceeding
        ) {
            return Err(Error::TransactionError(
                "transaction does not exist".to_string(),
                invite_tx.key.clone(),
            ));
        }
        make_cancel(&invite_tx.original, &self.core.config.user_agent)
    }

    fn is_cancellable(&self, invite_key: &TransactionKey) -> bool {
        let proceeding = matches!(
            self.core.tm.get_transaction(invite_key),
            Some(tx) if tx.state == TransactionState::Proceeding
        );
        proceeding && self.invite.is_ringing(invite_key)
    }
}

#[async_trait]
impl MethodHandler for CancelHandler {
    async fn process_request(&self, incoming: IncomingRequest) -> Result<()> {
        let invite_key = match &incoming.key {
            Some(key) => key.with_method(rsip::Method::Invite),
            None => return Ok(()),
        };
        if !self.is_cancellable(&invite_key) {
            info!(%invite_key, "CANCEL matches no pending INVITE");
            return reply(&self.core, &incoming, StatusCode::CallTransactionDoesNotExist).await;
        }
        reply(&self.core, &incoming, StatusCode::OK).await?;
        self.invite.cancel_incoming(&invite_key).await?;
        Ok(())
    }

    async fn process_response(&self, resp: &Response, tx: &Transaction) -> Result<()> {
        // the INVITE itself reports the outcome with its 487
        debug!(key = %tx.key, status = %resp.status_code, "CANCEL answered");
        Ok(())
    }

    async fn abort_transaction(&self, tx: &Transaction) -> Result<()> {
        info!(key = %tx.key, "CANCEL timed out");
        Ok(())
    }
}
