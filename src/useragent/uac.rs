use super::{
    shared::{parse_sip_uri, UserAgentCoreRef},
    handlers::Handlers,
    initial::{InitialRequestManager, Routing},
    mid_dialog::MidDialogRequestManager,
    UserAgentEvent,
};
use crate::{
    dialog::Dialog,
    rsip_ext::RsipMessageExt,
    transaction::{
        key::TransactionRole, Transaction, TransactionEvent, TransactionKey, TransactionReceiver,
    },
    Error, Result,
};
use rsip::{Request, Response};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub struct UacInner {
    core: UserAgentCoreRef,
    initial: Arc<InitialRequestManager>,
    mid_dialog: Arc<MidDialogRequestManager>,
    handlers: Arc<Handlers>,
}

/// Client role: sends requests and routes what comes back.
#[derive(Clone)]
pub struct Uac {
    inner: Arc<UacInner>,
}

impl Uac {
    pub fn new(
        core: UserAgentCoreRef,
        initial: Arc<InitialRequestManager>,
        mid_dialog: Arc<MidDialogRequestManager>,
        handlers: Arc<Handlers>,
    ) -> Self {
        Uac {
            inner: Arc::new(UacInner {
                core,
                initial,
                mid_dialog,
                handlers,
            }),
        }
    }

    pub(super) fn from_inner(inner: Arc<UacInner>) -> Self {
        Uac { inner }
    }

    pub(super) fn downgrade(&self) -> Weak<UacInner> {
        Arc::downgrade(&self.inner)
    }

    /// Open a client transaction for `req` and send it. Responses and
    /// timeouts are handed to the method's handler as they arrive.
    ///
    /// When the send fails the transaction stays unsent and the error is
    /// returned; the transaction's timeout timer removes it later.
    pub async fn send_request(&self, req: Request) -> Result<TransactionKey> {
        let core = &self.inner.core;
        if core.is_closed() {
            return Err(Error::Closed);
        }
        let dest = core.resolve_request(&req).await?;
        let method = req.method;
        let (key, receiver) = core.tm.create_client_transaction(req, dest)?;
        core.tm.send_request(&key).await?;
        debug!(%key, %dest, %method, "request sent");

        let uac = self.clone();
        tokio::spawn(async move { uac.process_transaction(receiver).await });
        Ok(key)
    }

    async fn process_transaction(&self, mut receiver: TransactionReceiver) {
        while let Some(event) = receiver.recv().await {
            let result = match event {
                TransactionEvent::Response(resp, tx) => self.dispatch_response(&resp, &tx).await,
                TransactionEvent::Timeout(tx) => {
                    info!(key = %tx.key, "transaction timed out");
                    self.inner.handlers.abort_transaction(&tx).await
                }
            };
            if let Err(e) = result {
                warn!("failed to process transaction event: {}", e);
            }
        }
    }

    /// Route a response of one of our client transactions.
    pub async fn dispatch_response(&self, resp: &Response, tx: &Transaction) -> Result<()> {
        match self.inner.initial.route_response(resp, tx).await? {
            Routing::Handled => Ok(()),
            Routing::Declined(dialog) => {
                self.inner
                    .mid_dialog
                    .route_response(resp, tx, &dialog)
                    .await
            }
        }
    }

    pub async fn register(&self) -> Result<Request> {
        let expires = self.inner.core.config.register_expires;
        self.send_register(expires).await
    }

    pub async fn unregister(&self) -> Result<Request> {
        self.send_register(0).await
    }

    async fn send_register(&self, expires: u32) -> Result<Request> {
        let req = self.inner.handlers.register.create_register(expires)?;
        self.send_request(req.clone()).await?;
        self.inner
            .core
            .emit(UserAgentEvent::Registering(req.clone()));
        Ok(req)
    }

    /// Call `target_uri`. A fresh Call-ID is generated unless one is given.
    pub async fn invite(&self, target_uri: &str, call_id: Option<String>) -> Result<Request> {
        let target = parse_sip_uri(target_uri)?;
        let req = self.inner.handlers.invite.create_invite(target, call_id)?;
        self.send_request(req.clone()).await?;
        self.inner.core.add_peer(target_uri);
        info!(uri = target_uri, "calling");
        Ok(req)
    }

    pub async fn options(&self, target_uri: &str) -> Result<Request> {
        let target = parse_sip_uri(target_uri)?;
        let req = self.inner.handlers.options.create_options(target);
        self.send_request(req.clone()).await?;
        Ok(req)
    }

    /// The live client INVITE transaction of the call `invite` started.
    pub fn pending_invite(&self, invite: &Request) -> Option<Transaction> {
        let call_id = invite.call_id().ok()?;
        let from_tag = invite.from_tag().ok()??;
        self.inner
            .core
            .tm
            .find_pending_client(&call_id, &from_tag, rsip::Method::Invite)
    }

    /// Hang up a confirmed dialog.
    pub async fn bye(&self, dialog: &Dialog) -> Result<Request> {
        if !dialog.is_confirmed() {
            return Err(Error::DialogError(
                "dialog is not confirmed".to_string(),
                dialog.id().clone(),
            ));
        }
        let req = self.inner.handlers.bye.create_bye(dialog);
        self.send_request(req.clone()).await?;
        Ok(req)
    }

    /// Cancel an INVITE we sent that has no final response yet. `invite` may
    /// be the first attempt of a call that was since retried with credentials.
    pub async fn cancel(&self, invite: &Request) -> Result<Request> {
        let key = TransactionKey::from_request(invite, TransactionRole::Client)?;
        let tx = self.pending_invite(invite).ok_or_else(|| {
            Error::TransactionError("transaction does not exist".to_string(), key.clone())
        })?;
        let req = self.inner.handlers.cancel.create_cancel(&tx)?;
        self.send_request(req.clone()).await?;
        Ok(req)
    }
}
