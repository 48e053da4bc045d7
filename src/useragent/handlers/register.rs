use super::{reply, IncomingRequest, MethodHandler};
use crate::{
    transaction::{make_tag, message::make_request, Transaction},
    useragent::{
        challenge::{answer_challenge, ChallengeManager},
        shared::{set_body, UserAgentCoreRef},
        FailureReason, UserAgentEvent,
    },
    Result,
};
use async_trait::async_trait;
use rsip::{prelude::UntypedHeader, Header, Request, Response, StatusCode};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// Registration with the domain's registrar.
pub struct RegisterHandler {
    core: UserAgentCoreRef,
    challenge: OnceLock<Arc<ChallengeManager>>,
}

/// Expires value of a REGISTER, 0 when absent or malformed.
pub fn expires_of(req: &Request) -> u32 {
    req.headers
        .iter()
        .find_map(|h| match h {
            Header::Expires(expires) => expires.value().trim().parse::<u32>().ok(),
            _ => None,
        })
        .unwrap_or_default()
}

impl RegisterHandler {
    pub fn new(core: UserAgentCoreRef) -> Self {
        RegisterHandler {
            core,
            challenge: OnceLock::new(),
        }
    }

    pub fn set_challenge_manager(&self, challenge: Arc<ChallengeManager>) {
        self.challenge.set(challenge).ok();
    }

    /// REGISTER binding our contact for `expires` seconds; 0 removes it.
    /// Every REGISTER of a user agent shares one Call-ID.
    pub fn create_register(&self, expires: u32) -> Result<Request> {
        let core = &self.core;
        let registrar = rsip::Uri::try_from(format!("sip:{}", core.config.domain))?;
        let aor = core.config.aor();
        let mut req = make_request(
            rsip::Method::Register,
            registrar,
            core.make_via(),
            rsip::headers::CallId::new(core.register_call_id()),
            rsip::headers::From::new(format!("<{}>;tag={}", aor, make_tag())),
            rsip::headers::To::new(format!("<{}>", aor)),
            core.next_seq(),
            &core.config.user_agent,
        );
        req.headers.push(Header::Contact(core.contact()));
        req.headers
            .push(rsip::headers::Expires::from(expires).into());
        set_body(&mut req.headers, &mut req.body, None);
        Ok(req)
    }
}

#[async_trait]
impl MethodHandler for RegisterHandler {
    async fn process_request(&self, incoming: IncomingRequest) -> Result<()> {
        info!(source = %incoming.source, "REGISTER sent to a user agent");
        reply(&self.core, &incoming, StatusCode::MethodNotAllowed).await
    }

    async fn process_response(&self, resp: &Response, tx: &Transaction) -> Result<()> {
        let code = resp.status_code.code();
        if code < 200 {
            return Ok(());
        }
        if matches!(code, 401 | 407) {
            if !answer_challenge(self.challenge.get(), resp, tx).await {
                warn!(status = %resp.status_code, "registration rejected credentials");
                self.core.emit(UserAgentEvent::RegistrationFailed(
                    FailureReason::AuthenticationFailed,
                ));
            }
            return Ok(());
        }
        if let Some(challenge) = self.challenge.get() {
            challenge.resolve(&tx.original);
        }
        if code < 300 {
            let expires = expires_of(&tx.original);
            self.core.set_registered(expires > 0);
            if expires > 0 {
                info!(expires, "registered");
                self.core.emit(UserAgentEvent::Registered);
            } else {
                info!("unregistered");
                self.core.emit(UserAgentEvent::Unregistered);
            }
        } else {
            warn!(status = %resp.status_code, "registration failed");
            self.core.emit(UserAgentEvent::RegistrationFailed(
                FailureReason::Rejected(resp.status_code.clone()),
            ));
        }
        Ok(())
    }

    async fn abort_transaction(&self, tx: &Transaction) -> Result<()> {
        warn!(key = %tx.key, "registration timed out");
        if let Some(challenge) = self.challenge.get() {
            challenge.resolve(&tx.original);
        }
        self.core
            .emit(UserAgentEvent::RegistrationFailed(FailureReason::Timeout));
        Ok(())
    }
}
