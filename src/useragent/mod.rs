//! The user agent: wiring of transport, transaction and dialog layers, the
//! per-method handlers and both client and server roles.
//!
//! ```rust,no_run
//! use sip_useragent::{transport::udp::UdpTransport, Config, UserAgentBuilder};
//! use std::sync::Arc;
//!
//! # async fn example() -> sip_useragent::Result<()> {
//! let config = Config {
//!     user_part: "alice".to_string(),
//!     domain: "example.com".to_string(),
//!     ..Default::default()
//! };
//! let transport = UdpTransport::bind("0.0.0.0:5060".parse()?, None).await?;
//! let (events, mut receiver) = tokio::sync::mpsc::unbounded_channel();
//! let ua = UserAgentBuilder::new()
//!     .with_config(config)
//!     .with_transport(Arc::new(transport))
//!     .with_event_sender(events)
//!     .build()?;
//!
//! let serving = ua.clone();
//! tokio::spawn(async move { serving.serve().await });
//! ua.register().await?;
//! while let Some(event) = receiver.recv().await {
//!     println!("{:?}", event);
//! }
//! ua.close().await;
//! # Ok(())
//! # }
//! ```
use crate::{
    config::{Config, MediaMode},
    dialog::{Dialog, DialogManager, DialogManagerRef},
    media::{MediaManagerRef, SessionMediaManager},
    rsip_ext::RsipMessageExt,
    sdp::SdpManager,
    transaction::{
        key::TransactionRole, TransactionKey, TransactionManager, TransactionManagerRef,
    },
    transport::{TransportEvent, TransportRef},
    Error, Result,
};
use rsip::{Request, Response, SipMessage, StatusCode};
use std::{net::SocketAddr, sync::atomic::Ordering, sync::Arc};
use tokio::{
    select,
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod challenge;
pub mod handlers;
pub mod initial;
pub mod mid_dialog;
pub mod shared;
pub mod uac;
pub mod uas;

pub use challenge::ChallengeManager;
pub use initial::{InitialRequestManager, Routing};
pub use mid_dialog::MidDialogRequestManager;
pub use shared::{UserAgentCore, UserAgentCoreRef};
pub use uac::Uac;
pub use uas::Uas;

#[cfg(test)]
mod tests;

/// Why a registration or call did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Final non-2xx response.
    Rejected(StatusCode),
    /// No final response before Timer B/F fired.
    Timeout,
    /// The credentials were refused or none were configured.
    AuthenticationFailed,
    Transport(String),
}

/// What the user agent reports to the application.
#[derive(Debug, Clone)]
pub enum UserAgentEvent {
    Registering(Request),
    Registered,
    Unregistered,
    RegistrationFailed(FailureReason),
    /// A call is ringing here; answer it with [`UserAgent::accept_call`] or
    /// [`UserAgent::reject_call`].
    IncomingCall(Request, Dialog),
    Ringing(Response),
    CallAnswered(Dialog),
    /// Call-ID and reason.
    CallFailed(String, FailureReason),
    /// The peer hung up or cancelled; carries the Call-ID.
    RemoteHangup(String),
    /// Our BYE completed; carries the Call-ID.
    CallTerminated(String),
    OptionsAnswered(Response),
}

pub type UserAgentEventSender = UnboundedSender<UserAgentEvent>;
pub type UserAgentEventReceiver = UnboundedReceiver<UserAgentEvent>;

/// Whether a message belongs to an existing dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Initial,
    MidDialog,
}

pub struct UserAgentBuilder {
    config: Option<Config>,
    transport: Option<TransportRef>,
    media: Option<MediaManagerRef>,
    events: Option<UserAgentEventSender>,
    cancel_token: Option<CancellationToken>,
}

impl Default for UserAgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UserAgentBuilder {
    pub fn new() -> Self {
        UserAgentBuilder {
            config: None,
            transport: None,
            media: None,
            events: None,
            cancel_token: None,
        }
    }

    pub fn with_config(&mut self, config: Config) -> &mut Self {
        self.config.replace(config);
        self
    }

    pub fn with_transport(&mut self, transport: TransportRef) -> &mut Self {
        self.transport.replace(transport);
        self
    }

    pub fn with_media_manager(&mut self, media: MediaManagerRef) -> &mut Self {
        self.media.replace(media);
        self
    }

    pub fn with_event_sender(&mut self, events: UserAgentEventSender) -> &mut Self {
        self.events.replace(events);
        self
    }

    pub fn with_cancel_token(&mut self, cancel_token: CancellationToken) -> &mut Self {
        self.cancel_token.replace(cancel_token);
        self
    }

    /// Construct every component, then wire the back-references between
    /// them.
    pub fn build(&mut self) -> Result<UserAgent> {
        let config = self.config.take().unwrap_or_default();
        let transport = self
            .transport
            .take()
            .ok_or_else(|| Error::Error("a transport is required".to_string()))?;
        let media = match self.media.take() {
            Some(media) => media,
            None => Arc::new(SessionMediaManager::new(&config)),
        };
        let cancel_token = self.cancel_token.take().unwrap_or_default();

        let tm = Arc::new(TransactionManager::new(
            transport.clone(),
            config.timers.clone(),
        ));
        let dm = Arc::new(DialogManager::new());
        let core = Arc::new(UserAgentCore::new(
            config,
            transport,
            tm,
            dm,
            media,
            self.events.take(),
            cancel_token,
        )?);

        let handlers = Arc::new(handlers::Handlers::new(core.clone()));
        let challenge = Arc::new(ChallengeManager::new(core.clone()));
        let sdp = Arc::new(SdpManager::new(core.advertised_ip(), core.config.rtp_port));
        let initial = Arc::new(InitialRequestManager::new(core.clone(), handlers.clone()));
        let mid_dialog = Arc::new(MidDialogRequestManager::new(core.clone(), handlers.clone()));
        let uac = Uac::new(
            core.clone(),
            initial.clone(),
            mid_dialog.clone(),
            handlers.clone(),
        );
        let uas = Uas::new(initial, mid_dialog, handlers.clone());

        handlers.invite.set_challenge_manager(challenge.clone());
        handlers.bye.set_challenge_manager(challenge.clone());
        handlers.register.set_challenge_manager(challenge.clone());
        handlers.invite.set_sdp_manager(sdp.clone());
        handlers.options.set_sdp_manager(sdp.clone());
        challenge.set_uac(&uac);
        handlers.invite.set_uac(&uac);

        info!(
            aor = %core.config.aor(),
            local = %core.transport.local_addr(),
            "user agent created"
        );
        Ok(UserAgent {
            inner: Arc::new(UserAgentInner {
                core,
                uac,
                uas,
                handlers,
                challenge,
                sdp,
            }),
        })
    }
}

struct UserAgentInner {
    core: UserAgentCoreRef,
    uac: Uac,
    uas: Uas,
    handlers: Arc<handlers::Handlers>,
    challenge: Arc<ChallengeManager>,
    sdp: Arc<SdpManager>,
}

#[derive(Clone)]
pub struct UserAgent {
    inner: Arc<UserAgentInner>,
}

impl UserAgent {
    /// Read the transport and run the transaction timers until the user agent
    /// is closed.
    pub async fn serve(&self) -> Result<()> {
        let core = &self.inner.core;
        let mut incoming = core
            .transport
            .take_incoming()
            .ok_or_else(|| Error::Error("user agent is already serving".to_string()))?;
        let token = core.cancel_token.clone();
        let message_loop = async {
            while let Some(TransportEvent::Incoming(msg, source)) = incoming.recv().await {
                match msg {
                    SipMessage::Request(req) => self.on_request(req, source).await,
                    SipMessage::Response(resp) => self.on_response(resp).await,
                }
            }
        };
        select! {
            _ = token.cancelled() => {}
            _ = core.tm.serve(token.child_token()) => {}
            _ = message_loop => {
                info!("transport closed");
            }
        }
        info!("user agent shutdown");
        Ok(())
    }

    async fn on_request(&self, req: Request, source: SocketAddr) {
        let tm = &self.inner.core.tm;
        match tm.receive_request(&req, source).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                info!(%source, "dropping request: {}", e);
                return;
            }
        }
        let key = if req.method == rsip::Method::Ack {
            None
        } else {
            match tm.create_server_transaction(&req, source) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(%source, "failed to create server transaction: {}", e);
                    return;
                }
            }
        };
        let uas = self.inner.uas.clone();
        tokio::spawn(async move {
            let method = req.method;
            if let Err(e) = uas.process_request(req, key, source).await {
                warn!(%method, "failed to process request: {}", e);
            }
        });
    }

    async fn on_response(&self, resp: Response) {
        match self.inner.core.tm.receive_response(resp).await {
            Ok(true) => {}
            Ok(false) => debug!("response matches no transaction"),
            Err(e) => info!("dropping response: {}", e),
        }
    }

    pub async fn register(&self) -> Result<Request> {
        self.inner.uac.register().await
    }

    pub async fn unregister(&self) -> Result<Request> {
        self.inner.uac.unregister().await
    }

    pub async fn invite(&self, target_uri: &str, call_id: Option<String>) -> Result<Request> {
        self.inner.uac.invite(target_uri, call_id).await
    }

    pub async fn options(&self, target_uri: &str) -> Result<Request> {
        self.inner.uac.options(target_uri).await
    }

    /// End the call `request` started: BYE once confirmed, CANCEL while our
    /// INVITE is pending, 486 while an incoming INVITE is ringing.
    pub async fn terminate(&self, request: &Request) -> Result<()> {
        let core = &self.inner.core;
        let call_id = request.call_id()?;
        if let Some(dialog) = core
            .dm
            .find_by_call_id(&call_id)
            .into_iter()
            .find(|dialog| dialog.is_confirmed())
        {
            self.inner.uac.bye(&dialog).await?;
            return Ok(());
        }
        let client_key = TransactionKey::from_request(request, TransactionRole::Client)?;
        if self.inner.uac.pending_invite(request).is_some() {
            self.inner.uac.cancel(request).await?;
            return Ok(());
        }
        let server_key = TransactionKey::from_request(request, TransactionRole::Server)?;
        if self.inner.handlers.invite.is_ringing(&server_key) {
            return self.inner.uas.reject_call(request).await;
        }
        Err(Error::TransactionError(
            "transaction does not exist".to_string(),
            client_key,
        ))
    }

    pub async fn accept_call(&self, request: &Request, dialog: &Dialog) -> Result<()> {
        self.inner.uas.accept_call(request, dialog).await
    }

    pub async fn reject_call(&self, request: &Request) -> Result<()> {
        self.inner.uas.reject_call(request).await
    }

    /// Release everything. Safe to call more than once; failures are logged,
    /// never returned.
    pub async fn close(&self) {
        let core = &self.inner.core;
        if core.closed.swap(true, Ordering::SeqCst) {
            debug!("user agent already closed");
            return;
        }
        if let Err(e) = core.transport.close_transports().await {
            warn!("failed to close transport: {}", e);
        }
        core.tm.close_timers();
        self.inner.handlers.invite.close_timers();
        if core.media.is_active() {
            if let Err(e) = core.media.stop_session().await {
                warn!("failed to stop media: {}", e);
            }
        }
        core.clear_public_addr();
        core.cancel_token.cancel();
        info!("user agent closed");
    }

    pub fn generate_cseq(&self, method: rsip::Method) -> String {
        self.inner.core.generate_cseq(method)
    }

    /// The request a message is or answers, when still known.
    pub fn get_sip_request(&self, msg: &SipMessage) -> Option<Request> {
        let tm = &self.inner.core.tm;
        match msg {
            SipMessage::Request(req) => Some(req.clone()),
            SipMessage::Response(resp) => tm
                .get_client_transaction(resp)
                .or_else(|| tm.get_server_transaction(msg))
                .map(|tx| tx.original),
        }
    }

    pub fn classify(&self, msg: &SipMessage) -> RequestClass {
        let dm = &self.inner.core.dm;
        let dialog = match msg {
            SipMessage::Request(req) => dm.find_for_request(req),
            SipMessage::Response(resp) => dm.find_for_response(resp),
        };
        match dialog {
            Some(_) => RequestClass::MidDialog,
            None => RequestClass::Initial,
        }
    }

    pub fn rtp_port(&self) -> u16 {
        self.inner.sdp.rtp_port()
    }

    pub fn sip_port(&self) -> u16 {
        self.inner.core.local_port()
    }

    pub fn domain(&self) -> &str {
        &self.inner.core.config.domain
    }

    pub fn user_part(&self) -> &str {
        &self.inner.core.config.user_part
    }

    pub fn media_mode(&self) -> MediaMode {
        self.inner.core.config.media_mode
    }

    pub fn outbound_proxy(&self) -> Option<&rsip::Uri> {
        self.inner.core.outbound_proxy()
    }

    pub fn public_addr(&self) -> Option<std::net::IpAddr> {
        self.inner.core.public_addr()
    }

    pub fn is_registered(&self) -> bool {
        self.inner.core.is_registered()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.core.is_closed()
    }

    pub fn peers(&self) -> Vec<String> {
        self.inner.core.peers()
    }

    pub fn uac(&self) -> &Uac {
        &self.inner.uac
    }

    pub fn uas(&self) -> &Uas {
        &self.inner.uas
    }

    pub fn challenge_manager(&self) -> &Arc<ChallengeManager> {
        &self.inner.challenge
    }

    pub fn dialog_manager(&self) -> DialogManagerRef {
        self.inner.core.dm.clone()
    }

    pub fn transaction_manager(&self) -> TransactionManagerRef {
        self.inner.core.tm.clone()
    }

    pub fn config(&self) -> &Config {
        &self.inner.core.config
    }
}
