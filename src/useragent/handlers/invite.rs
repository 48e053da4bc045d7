use super::{reply, send_response, tag_response, IncomingRequest, MethodHandler, ACCEPT_CONTENT};
use crate::{
    dialog::{Dialog, DialogId, DialogRole, DialogState},
    rsip_ext::RsipMessageExt,
    sdp::SdpManager,
    transaction::{
        key::TransactionRole, make_call_id, make_tag, message::make_request, Transaction,
        TransactionKey,
    },
    useragent::{
        challenge::{answer_challenge, ChallengeManager},
        shared::{set_body, UserAgentCoreRef},
        uac::{Uac, UacInner},
        FailureReason, UserAgentEvent,
    },
    Error, Result,
};
use async_trait::async_trait;
use rsip::{
    prelude::{HeadersExt, ToTypedHeader, UntypedHeader},
    Header, Request, Response, StatusCode,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, OnceLock, Weak},
};
use tokio::{select, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An incoming call we have answered with 180 but not yet finished.
struct PendingCall {
    key: TransactionKey,
    request: Request,
    dialog: Dialog,
    source: SocketAddr,
    /// Set once the call is accepted; cancelled when the ACK arrives.
    answered: Option<CancellationToken>,
}

type PendingCalls = Arc<Mutex<HashMap<DialogId, PendingCall>>>;

pub struct InviteHandler {
    core: UserAgentCoreRef,
    challenge: OnceLock<Arc<ChallengeManager>>,
    sdp: OnceLock<Arc<SdpManager>>,
    uac: OnceLock<Weak<UacInner>>,
    pending: PendingCalls,
    retransmissions: CancellationToken,
}

impl InviteHandler {
    pub fn new(core: UserAgentCoreRef) -> Self {
        let retransmissions = core.cancel_token.child_token();
        InviteHandler {
            core,
            challenge: OnceLock::new(),
            sdp: OnceLock::new(),
            uac: OnceLock::new(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            retransmissions,
        }
    }

    pub fn set_challenge_manager(&self, challenge: Arc<ChallengeManager>) {
        self.challenge.set(challenge).ok();
    }

    pub fn set_sdp_manager(&self, sdp: Arc<SdpManager>) {
        self.sdp.set(sdp).ok();
    }

    /// Used to hang up an answered call whose ACK never arrives.
    pub fn set_uac(&self, uac: &Uac) {
        self.uac.set(uac.downgrade()).ok();
    }

    /// Build an initial INVITE with an SDP offer.
    pub fn create_invite(&self, target: rsip::Uri, call_id: Option<String>) -> Result<Request> {
        let core = &self.core;
        let call_id = match call_id {
            Some(id) => rsip::headers::CallId::new(id),
            None => make_call_id(Some(&core.config.domain)),
        };
        let from = rsip::headers::From::new(format!("<{}>;tag={}", core.config.aor(), make_tag()));
        let to = rsip::headers::To::new(format!("<{}>", target));
        let mut req = make_request(
            rsip::Method::Invite,
            target,
            core.make_via(),
            call_id,
            from,
            to,
            core.next_seq(),
            &core.config.user_agent,
        );
        req.headers.push(Header::Contact(core.contact()));
        let offer = self
            .sdp
            .get()
            .map(|sdp| (ACCEPT_CONTENT, sdp.create_offer().into_bytes()));
        set_body(&mut req.headers, &mut req.body, offer);
        Ok(req)
    }

    /// Session description answering `remote`, or an offer when the peer sent
    /// none.
    fn local_sdp(&self, remote: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(sdp) = self.sdp.get() else {
            return Ok(None);
        };
        if remote.is_empty() {
            return Ok(Some(sdp.create_offer().into_bytes()));
        }
        Ok(Some(sdp.create_answer(remote)?.into_bytes()))
    }

    async fn start_media(&self, remote_sdp: &[u8]) {
        if remote_sdp.is_empty() {
            return;
        }
        if let Err(e) = self.core.media.start_session(remote_sdp).await {
            warn!("failed to start media: {}", e);
        }
    }

    /// Answer a ringing incoming call with 200 OK.
    pub async fn accept_call(&self, req: &Request, dialog: &Dialog) -> Result<()> {
        let (key, source) = {
            let pending = self
                .pending
                .lock()
                .map_err(|e| Error::Error(e.to_string()))?;
            match pending.get(dialog.id()) {
                Some(call) if call.answered.is_none() => (call.key.clone(), call.source),
                _ => {
                    return Err(Error::DialogError(
                        "no pending call".to_string(),
                        dialog.id().clone(),
                    ))
                }
            }
        };

        let body = self.local_sdp(&req.body)?;
        let mut resp = self.core.make_response(req, StatusCode::OK, None);
        tag_response(&mut resp, &dialog.id().local_tag)?;
        resp.headers.push(Header::Contact(self.core.contact()));
        set_body(
            &mut resp.headers,
            &mut resp.body,
            body.map(|b| (ACCEPT_CONTENT, b)),
        );
        self.core.tm.send_response(&key, resp.clone()).await?;
        dialog.transition(DialogState::Confirmed);
        info!(id = %dialog.id(), "call accepted");
        self.start_media(&req.body).await;

        let token = self.retransmissions.child_token();
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(call) = pending.get_mut(dialog.id()) {
                call.answered = Some(token.clone());
            }
        }
        if !self.core.transport.is_reliable() {
            let core = self.core.clone();
            let pending = self.pending.clone();
            let uac = self.uac.get().cloned();
            let dialog = dialog.clone();
            tokio::spawn(async move {
                if !retransmit_2xx(core, resp, source, token).await {
                    hang_up_unacked(pending, uac, dialog).await;
                }
            });
        }
        Ok(())
    }

    /// Answer a ringing incoming call with 486 Busy Here.
    pub async fn reject_call(&self, req: &Request) -> Result<()> {
        let key = TransactionKey::from_request(req, TransactionRole::Server)?;
        let call = self
            .take_pending(|call| call.key == key && call.answered.is_none())
            .ok_or_else(|| Error::TransactionError("no pending call".to_string(), key))?;
        let mut resp = self.core.make_response(&call.request, StatusCode::BusyHere, None);
        tag_response(&mut resp, &call.dialog.id().local_tag)?;
        self.core.tm.send_response(&call.key, resp).await?;
        self.core.dm.terminate_dialog(&call.dialog);
        info!(id = %call.dialog.id(), "call rejected");
        Ok(())
    }

    /// Whether the INVITE server transaction `invite_key` is still ringing.
    pub fn is_ringing(&self, invite_key: &TransactionKey) -> bool {
        self.pending
            .lock()
            .map(|pending| {
                pending
                    .values()
                    .any(|call| &call.key == invite_key && call.answered.is_none())
            })
            .unwrap_or_default()
    }

    /// End a ringing call with 487 after the peer cancelled it. Returns false
    /// when there was nothing to cancel.
    pub async fn cancel_incoming(&self, invite_key: &TransactionKey) -> Result<bool> {
        let Some(call) = self.take_pending(|call| &call.key == invite_key && call.answered.is_none())
        else {
            return Ok(false);
        };
        let mut resp = self
            .core
            .make_response(&call.request, StatusCode::RequestTerminated, None);
        tag_response(&mut resp, &call.dialog.id().local_tag)?;
        self.core.tm.send_response(&call.key, resp).await?;
        self.core.dm.terminate_dialog(&call.dialog);
        info!(id = %call.dialog.id(), "call cancelled by peer");
        self.core
            .emit(UserAgentEvent::RemoteHangup(call.dialog.id().call_id.clone()));
        Ok(true)
    }

    /// Stop every 2xx retransmission and forget ringing calls.
    pub fn close_timers(&self) {
        self.retransmissions.cancel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    fn take_pending(&self, matches: impl Fn(&PendingCall) -> bool) -> Option<PendingCall> {
        let mut pending = self.pending.lock().ok()?;
        let id = pending
            .iter()
            .find(|(_, call)| matches(call))
            .map(|(id, _)| id.clone())?;
        pending.remove(&id)
    }

    async fn on_initial_invite(&self, incoming: IncomingRequest) -> Result<()> {
        let core = &self.core;
        let req = &incoming.request;
        let key = incoming.key.clone().ok_or_else(|| {
            Error::SipMessageError("INVITE without server transaction".to_string())
        })?;
        reply(core, &incoming, StatusCode::Trying).await?;

        let local_tag = make_tag().to_string();
        let dialog = core
            .dm
            .create_dialog(Dialog::new_uas(key.clone(), req, &local_tag)?);
        let mut ringing = core.make_response(req, StatusCode::Ringing, None);
        tag_response(&mut ringing, &local_tag)?;
        ringing.headers.push(Header::Contact(core.contact()));
        send_response(core, &incoming, ringing).await?;

        core.add_peer(req.from_header()?.typed()?.uri.to_string());
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(
                dialog.id().clone(),
                PendingCall {
                    key,
                    request: req.clone(),
                    dialog: dialog.clone(),
                    source: incoming.source,
                    answered: None,
                },
            );
        }
        info!(id = %dialog.id(), from = dialog.remote_uri(), "incoming call");
        core.emit(UserAgentEvent::IncomingCall(req.clone(), dialog));
        Ok(())
    }

    async fn on_reinvite(&self, incoming: IncomingRequest, dialog: Dialog) -> Result<()> {
        let req = &incoming.request;
        let body = match self.local_sdp(&req.body) {
            Ok(body) => body,
            Err(e) => {
                info!(id = %dialog.id(), "rejecting re-INVITE: {}", e);
                return reply(&self.core, &incoming, StatusCode::NotAcceptableHere).await;
            }
        };
        if let Some(uri) = req.contact_uri() {
            dialog.set_remote_target(uri);
        }
        let mut resp = self.core.make_response(req, StatusCode::OK, None);
        resp.headers.push(Header::Contact(self.core.contact()));
        set_body(
            &mut resp.headers,
            &mut resp.body,
            body.map(|b| (ACCEPT_CONTENT, b)),
        );
        debug!(id = %dialog.id(), "re-INVITE accepted");
        send_response(&self.core, &incoming, resp).await
    }

    fn on_ack(&self, dialog: &Dialog) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        let acked = matches!(pending.get(dialog.id()), Some(call) if call.answered.is_some());
        if acked {
            if let Some(token) = pending.remove(dialog.id()).and_then(|call| call.answered) {
                token.cancel();
            }
            debug!(id = %dialog.id(), "ACK received");
        }
    }

    /// Terminate early client dialogs of a failed call and report it.
    fn fail_call(&self, call_id: &str, reason: FailureReason) {
        for dialog in self.core.dm.find_by_call_id(call_id) {
            if dialog.role() == DialogRole::Uac && !dialog.is_confirmed() {
                self.core.dm.terminate_dialog(&dialog);
            }
        }
        info!(call_id, ?reason, "call failed");
        self.core.emit(UserAgentEvent::CallFailed(call_id.to_string(), reason));
    }

    async fn on_answered(&self, resp: &Response, tx: &Transaction) -> Result<()> {
        let core = &self.core;
        if let Some(challenge) = self.challenge.get() {
            challenge.resolve(&tx.original);
        }
        let dialog = match core.dm.find_for_response(resp) {
            Some(dialog) => dialog,
            None => core
                .dm
                .create_dialog(Dialog::new_uac(tx.key.clone(), &tx.original, resp)?),
        };
        dialog.update_from_response(resp);
        dialog.transition(DialogState::Confirmed);

        let mut ack = dialog.make_request(
            rsip::Method::Ack,
            tx.original.cseq_seq()?,
            core.make_via(),
            None,
            &core.config.user_agent,
        );
        set_body(&mut ack.headers, &mut ack.body, None);
        let dest = core.resolve_request(&ack).await?;
        core.tm.send_ack(&tx.key, ack, dest).await?;

        self.start_media(&resp.body).await;
        info!(id = %dialog.id(), "call answered");
        core.emit(UserAgentEvent::CallAnswered(dialog));
        Ok(())
    }
}

/// Resend the 2xx until `token` is cancelled by the ACK or by shutdown.
/// Returns false when the ACK never came.
async fn retransmit_2xx(
    core: UserAgentCoreRef,
    resp: Response,
    dest: SocketAddr,
    token: CancellationToken,
) -> bool {
    let timers = &core.config.timers;
    let deadline = Instant::now() + timers.t1() * 64;
    let mut interval = timers.t1();
    loop {
        select! {
            _ = token.cancelled() => return true,
            _ = tokio::time::sleep(interval) => {}
        }
        if Instant::now() >= deadline {
            warn!(%dest, "no ACK for 2xx");
            return false;
        }
        if let Err(e) = core.transport.send_response(&resp, dest).await {
            warn!("failed to retransmit 2xx: {}", e);
            return false;
        }
        interval = std::cmp::min(interval * 2, timers.t2());
    }
}

/// Forget an answered call that was never acknowledged and end its dialog
/// with a BYE.
async fn hang_up_unacked(pending: PendingCalls, uac: Option<Weak<UacInner>>, dialog: Dialog) {
    if let Ok(mut pending) = pending.lock() {
        pending.remove(dialog.id());
    }
    let Some(uac) = uac.and_then(|uac| uac.upgrade()).map(Uac::from_inner) else {
        return;
    };
    info!(id = %dialog.id(), "hanging up unacknowledged call");
    if let Err(e) = uac.bye(&dialog).await {
        warn!(id = %dialog.id(), "failed to hang up: {}", e);
    }
}

#[async_trait]
impl MethodHandler for InviteHandler {
    async fn process_request(&self, incoming: IncomingRequest) -> Result<()> {
        match (incoming.request.method, incoming.dialog.clone()) {
            (rsip::Method::Ack, Some(dialog)) => {
                self.on_ack(&dialog);
                Ok(())
            }
            (rsip::Method::Ack, None) => {
                debug!("ACK outside any dialog");
                Ok(())
            }
            (_, Some(dialog)) => self.on_reinvite(incoming, dialog).await,
            (_, None) => self.on_initial_invite(incoming).await,
        }
    }

    async fn process_response(&self, resp: &Response, tx: &Transaction) -> Result<()> {
        let call_id = tx.original.call_id()?;
        match resp.status_code.code() {
            100 => Ok(()),
            101..=199 => {
                if resp.to_tag()?.is_some() {
                    let dialog = self
                        .core
                        .dm
                        .create_dialog(Dialog::new_uac(tx.key.clone(), &tx.original, resp)?);
                    dialog.update_from_response(resp);
                }
                if matches!(
                    resp.status_code,
                    StatusCode::Ringing | StatusCode::SessionProgress
                ) {
                    self.core.emit(UserAgentEvent::Ringing(resp.clone()));
                }
                Ok(())
            }
            200..=299 => {
                if let Err(e) = self.on_answered(resp, tx).await {
                    self.fail_call(&call_id, FailureReason::Transport(e.to_string()));
                    return Err(e);
                }
                Ok(())
            }
            401 | 407 => {
                if !answer_challenge(self.challenge.get(), resp, tx).await {
                    self.fail_call(&call_id, FailureReason::AuthenticationFailed);
                }
                Ok(())
            }
            _ => {
                if let Some(challenge) = self.challenge.get() {
                    challenge.resolve(&tx.original);
                }
                self.fail_call(&call_id, FailureReason::Rejected(resp.status_code.clone()));
                Ok(())
            }
        }
    }

    async fn abort_transaction(&self, tx: &Transaction) -> Result<()> {
        if let Some(challenge) = self.challenge.get() {
            challenge.resolve(&tx.original);
        }
        let call_id = tx.original.call_id()?;
        self.fail_call(&call_id, FailureReason::Timeout);
        Ok(())
    }
}
