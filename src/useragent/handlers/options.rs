use super::{send_response, IncomingRequest, MethodHandler, ACCEPT_CONTENT, ALLOW_METHODS};
use crate::{
    sdp::SdpManager,
    transaction::{make_call_id, make_tag, message::make_request, Transaction},
    useragent::{
        shared::{set_body, UserAgentCoreRef},
        UserAgentEvent,
    },
    Result,
};
use async_trait::async_trait;
use rsip::{prelude::UntypedHeader, Header, Request, Response, StatusCode};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// Capability queries. OPTIONS never creates a dialog.
pub struct OptionsHandler {
    core: UserAgentCoreRef,
    sdp: OnceLock<Arc<SdpManager>>,
}

impl OptionsHandler {
    pub fn new(core: UserAgentCoreRef) -> Self {
        OptionsHandler {
            core,
            sdp: OnceLock::new(),
        }
    }

    pub fn set_sdp_manager(&self, sdp: Arc<SdpManager>) {
        self.sdp.set(sdp).ok();
    }

    pub fn create_options(&self, target: rsip::Uri) -> Request {
        let core = &self.core;
        let mut req = make_request(
            rsip::Method::Options,
            target.clone(),
            core.make_via(),
            make_call_id(Some(&core.config.domain)),
            rsip::headers::From::new(format!("<{}>;tag={}", core.config.aor(), make_tag())),
            rsip::headers::To::new(format!("<{}>", target)),
            core.next_seq(),
            &core.config.user_agent,
        );
        req.headers.push(Header::Contact(core.contact()));
        req.headers
            .push(Header::Accept(ACCEPT_CONTENT.into()));
        set_body(&mut req.headers, &mut req.body, None);
        req
    }
}

#[async_trait]
impl MethodHandler for OptionsHandler {
    async fn process_request(&self, incoming: IncomingRequest) -> Result<()> {
        let mut resp = self
            .core
            .make_response(&incoming.request, StatusCode::OK, None);
        resp.headers
            .push(Header::Other("Allow".into(), ALLOW_METHODS.into()));
        resp.headers.push(Header::Accept(ACCEPT_CONTENT.into()));
        resp.headers.push(Header::Contact(self.core.contact()));
        let body = self
            .sdp
            .get()
            .map(|sdp| (ACCEPT_CONTENT, sdp.create_offer().into_bytes()));
        set_body(&mut resp.headers, &mut resp.body, body);
        debug!(source = %incoming.source, "answering OPTIONS");
        send_response(&self.core, &incoming, resp).await
    }

    async fn process_response(&self, resp: &Response, _tx: &Transaction) -> Result<()> {
        if resp.status_code.code() >= 200 {
            self.core.emit(UserAgentEvent::OptionsAnswered(resp.clone()));
        }
        Ok(())
    }

    async fn abort_transaction(&self, tx: &Transaction) -> Result<()> {
        info!(key = %tx.key, "OPTIONS timed out");
        Ok(())
    }
}
