//! Digest challenge handling for requests we originate.
//!
//! A 401 or 407 is answered at most once per challenge kind for a given
//! request; a second challenge of the same kind means the credentials were
//! refused.
use super::{
    shared::UserAgentCoreRef,
    uac::{Uac, UacInner},
};
use crate::{
    dialog::authenticate::{make_authorized_request, ChallengeKind, Credential},
    rsip_ext::RsipMessageExt,
    transaction::Transaction,
    Error, Result,
};
use rsip::{Request, Response};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock, Weak},
};
use tracing::{debug, info, warn};

pub const MAX_CHALLENGE_RETRIES: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChallengeKey {
    call_id: String,
    from_tag: String,
    method: String,
}

impl ChallengeKey {
    fn from_request(req: &Request) -> Result<Self> {
        Ok(ChallengeKey {
            call_id: req.call_id()?,
            from_tag: req.from_tag()?.unwrap_or_default(),
            method: req.method.to_string(),
        })
    }
}

#[derive(Debug, Default)]
struct ChallengeAttempt {
    www: u32,
    proxy: u32,
}

impl ChallengeAttempt {
    fn count_mut(&mut self, kind: ChallengeKind) -> &mut u32 {
        match kind {
            ChallengeKind::Www => &mut self.www,
            ChallengeKind::Proxy => &mut self.proxy,
        }
    }
}

#[derive(Debug)]
pub enum ChallengeOutcome {
    /// The authorized copy that went out.
    Retried(Request),
    GaveUp,
}

pub struct ChallengeManager {
    core: UserAgentCoreRef,
    attempts: Mutex<HashMap<ChallengeKey, ChallengeAttempt>>,
    uac: OnceLock<Weak<UacInner>>,
}

impl ChallengeManager {
    pub fn new(core: UserAgentCoreRef) -> Self {
        ChallengeManager {
            core,
            attempts: Mutex::new(HashMap::new()),
            uac: OnceLock::new(),
        }
    }

    pub fn set_uac(&self, uac: &Uac) {
        self.uac.set(uac.downgrade()).ok();
    }

    /// Number of requests with an unresolved challenge.
    pub fn len(&self) -> usize {
        self.attempts.lock().map(|a| a.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Answer the challenge in `resp` by resending `tx.original` with
    /// credentials and a new CSeq.
    pub async fn handle_challenge(&self, resp: &Response, tx: &Transaction) -> Result<ChallengeOutcome> {
        let kind = ChallengeKind::from_status(&resp.status_code).ok_or_else(|| {
            Error::AuthenticationFailed(format!("{} is not a challenge", resp.status_code))
        })?;
        let key = ChallengeKey::from_request(&tx.original)?;
        {
            let mut attempts = self
                .attempts
                .lock()
                .map_err(|e| Error::Error(e.to_string()))?;
            let attempt = attempts.entry(key.clone()).or_default();
            let count = attempt.count_mut(kind);
            if *count >= MAX_CHALLENGE_RETRIES {
                attempts.remove(&key);
                info!(call_id = %key.call_id, method = %key.method, ?kind, "challenge repeated, giving up");
                return Ok(ChallengeOutcome::GaveUp);
            }
            *count += 1;
        }

        let Some(password) = self.core.config.password.clone() else {
            self.forget(&key);
            info!(method = %key.method, "challenged without credentials");
            return Ok(ChallengeOutcome::GaveUp);
        };
        let credential = Credential {
            username: self.core.config.auth_user().to_string(),
            password,
            realm: self.core.config.realm.clone(),
        };
        let seq = self.core.next_seq();
        let retry = match make_authorized_request(&tx.original, resp, &credential, seq) {
            Ok(retry) => retry,
            Err(e) => {
                self.forget(&key);
                return Err(e);
            }
        };
        if let Some(dialog) = self.core.dm.find_dialog(
            &key.call_id,
            &key.from_tag,
            &tx.original.to_tag()?.unwrap_or_default(),
        ) {
            dialog.set_local_seq(seq);
        }

        let uac = self
            .uac
            .get()
            .and_then(Weak::upgrade)
            .map(Uac::from_inner)
            .ok_or(Error::Closed)?;
        debug!(method = %key.method, seq, ?kind, "retrying with credentials");
        if let Err(e) = uac.send_request(retry.clone()).await {
            self.forget(&key);
            return Err(e);
        }
        Ok(ChallengeOutcome::Retried(retry))
    }

    /// The request got a final answer that was not a challenge.
    pub fn resolve(&self, req: &Request) {
        if let Ok(key) = ChallengeKey::from_request(req) {
            self.forget(&key);
        }
    }

    fn forget(&self, key: &ChallengeKey) {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.remove(key);
        }
    }
}

/// Retry a challenged request when a challenge manager is wired in. Returns
/// true when an authorized retry went out.
pub async fn answer_challenge(
    challenge: Option<&Arc<ChallengeManager>>,
    resp: &Response,
    tx: &Transaction,
) -> bool {
    let Some(challenge) = challenge else {
        return false;
    };
    match challenge.handle_challenge(resp, tx).await {
        Ok(ChallengeOutcome::Retried(_)) => true,
        Ok(ChallengeOutcome::GaveUp) => false,
        Err(e) => {
            warn!("failed to answer challenge: {}", e);
            false
        }
    }
}
