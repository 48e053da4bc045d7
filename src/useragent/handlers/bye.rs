use super::{reply, IncomingRequest, MethodHandler};
use crate::{
    dialog::Dialog,
    rsip_ext::RsipMessageExt,
    transaction::Transaction,
    useragent::{
        challenge::{answer_challenge, ChallengeManager},
        shared::{set_body, UserAgentCoreRef},
        UserAgentEvent,
    },
    Result,
};
use async_trait::async_trait;
use rsip::{Request, Response, StatusCode};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

pub struct ByeHandler {
    core: UserAgentCoreRef,
    challenge: OnceLock<Arc<ChallengeManager>>,
}

impl ByeHandler {
    pub fn new(core: UserAgentCoreRef) -> Self {
        ByeHandler {
            core,
            challenge: OnceLock::new(),
        }
    }

    pub fn set_challenge_manager(&self, challenge: Arc<ChallengeManager>) {
        self.challenge.set(challenge).ok();
    }

    pub fn create_bye(&self, dialog: &Dialog) -> Request {
        let mut req = dialog.make_request(
            rsip::Method::Bye,
            self.core.next_seq(),
            self.core.make_via(),
            None,
            &self.core.config.user_agent,
        );
        set_body(&mut req.headers, &mut req.body, None);
        req
    }

    async fn end_call(&self, dialog: Option<Dialog>, call_id: String) {
        if let Some(dialog) = dialog {
            self.core.dm.terminate_dialog(&dialog);
        }
        if let Err(e) = self.core.media.stop_session().await {
            warn!("failed to stop media: {}", e);
        }
        info!(call_id, "call terminated");
        self.core.emit(UserAgentEvent::CallTerminated(call_id));
    }

    fn dialog_of(&self, req: &Request) -> Option<Dialog> {
        let call_id = req.call_id().ok()?;
        let local_tag = req.from_tag().ok()??;
        let remote_tag = req.to_tag().ok()??;
        self.core.dm.find_dialog(&call_id, &local_tag, &remote_tag)
    }
}

#[async_trait]
impl MethodHandler for ByeHandler {
    async fn process_request(&self, incoming: IncomingRequest) -> Result<()> {
        let dialog = match &incoming.dialog {
            Some(dialog) if dialog.is_confirmed() => dialog.clone(),
            _ => {
                info!("BYE outside a confirmed dialog");
                return reply(&self.core, &incoming, StatusCode::CallTransactionDoesNotExist)
                    .await;
            }
        };
        reply(&self.core, &incoming, StatusCode::OK).await?;
        self.core.dm.terminate_dialog(&dialog);
        if let Err(e) = self.core.media.stop_session().await {
            warn!("failed to stop media: {}", e);
        }
        info!(id = %dialog.id(), "remote hangup");
        self.core
            .emit(UserAgentEvent::RemoteHangup(dialog.id().call_id.clone()));
        Ok(())
    }

    async fn process_response(&self, resp: &Response, tx: &Transaction) -> Result<()> {
        let code = resp.status_code.code();
        if code < 200 {
            return Ok(());
        }
        if matches!(code, 401 | 407) && answer_challenge(self.challenge.get(), resp, tx).await {
            return Ok(());
        }
        if let Some(challenge) = self.challenge.get() {
            challenge.resolve(&tx.original);
        }
        // the dialog ends whatever the final response says
        self.end_call(self.dialog_of(&tx.original), tx.original.call_id()?)
            .await;
        Ok(())
    }

    async fn abort_transaction(&self, tx: &Transaction) -> Result<()> {
        self.end_call(self.dialog_of(&tx.original), tx.original.call_id()?)
            .await;
        Ok(())
    }
}
