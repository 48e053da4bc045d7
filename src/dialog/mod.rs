use crate::rsip_ext::RsipMessageExt;
use crate::Result;

pub mod authenticate;
pub mod dialog;
pub mod dialog_manager;

pub use dialog::{Dialog, DialogRole, DialogState};
pub use dialog_manager::{DialogManager, DialogManagerRef};

#[cfg(test)]
mod tests;

/// Dialog identity as seen from this user agent.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct DialogId {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

impl DialogId {
    pub fn new(
        call_id: impl Into<String>,
        local_tag: impl Into<String>,
        remote_tag: impl Into<String>,
    ) -> Self {
        DialogId {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: remote_tag.into(),
        }
    }

    /// Identity for a dialog this user agent initiated: our tag is in From.
    pub fn from_uac_response(resp: &rsip::Response) -> Result<Self> {
        Ok(DialogId {
            call_id: resp.call_id()?,
            local_tag: resp.from_tag()?.unwrap_or_default(),
            remote_tag: resp.to_tag()?.unwrap_or_default(),
        })
    }

    /// Identity for a dialog the remote peer initiated, with our To tag.
    pub fn from_uas_request(req: &rsip::Request, local_tag: &str) -> Result<Self> {
        Ok(DialogId {
            call_id: req.call_id()?,
            local_tag: local_tag.to_string(),
            remote_tag: req.from_tag()?.unwrap_or_default(),
        })
    }
}

impl std::fmt::Display for DialogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.call_id, self.local_tag, self.remote_tag)
    }
}
