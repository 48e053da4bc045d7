use super::{Dialog, DialogId, DialogState};
use crate::rsip_ext::RsipMessageExt;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use tracing::{debug, info};

/// Table of dialogs keyed by identity.
///
/// A dialog is fully built before it is inserted, so readers only ever see
/// complete dialogs.
#[derive(Default)]
pub struct DialogManager {
    dialogs: RwLock<HashMap<DialogId, Dialog>>,
}

pub type DialogManagerRef = Arc<DialogManager>;

impl DialogManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.dialogs.read().map(|d| d.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert `dialog` unless one with the same identity exists; either way
    /// the dialog now in the table is returned.
    pub fn create_dialog(&self, dialog: Dialog) -> Dialog {
        let mut dialogs = match self.dialogs.write() {
            Ok(dialogs) => dialogs,
            Err(_) => return dialog,
        };
        let id = dialog.id().clone();
        dialogs
            .entry(id)
            .or_insert_with(|| {
                info!(id = %dialog.id(), state = ?dialog.state(), "dialog created");
                dialog
            })
            .clone()
    }

    pub fn find_dialog(&self, call_id: &str, local_tag: &str, remote_tag: &str) -> Option<Dialog> {
        let id = DialogId::new(call_id, local_tag, remote_tag);
        self.get(&id)
    }

    pub fn get(&self, id: &DialogId) -> Option<Dialog> {
        self.dialogs.read().ok().and_then(|d| d.get(id).cloned())
    }

    /// Dialog an inbound request belongs to: our tag is in To.
    pub fn find_for_request(&self, req: &rsip::Request) -> Option<Dialog> {
        let local_tag = req.to_tag().ok()??;
        let remote_tag = req.from_tag().ok()?.unwrap_or_default();
        self.find_dialog(&req.call_id().ok()?, &local_tag, &remote_tag)
    }

    /// Dialog an inbound response belongs to: our tag is in From.
    pub fn find_for_response(&self, resp: &rsip::Response) -> Option<Dialog> {
        let local_tag = resp.from_tag().ok()??;
        let remote_tag = resp.to_tag().ok()??;
        self.find_dialog(&resp.call_id().ok()?, &local_tag, &remote_tag)
    }

    pub fn find_by_call_id(&self, call_id: &str) -> Vec<Dialog> {
        self.dialogs
            .read()
            .map(|d| {
                d.values()
                    .filter(|dialog| dialog.id().call_id == call_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mark the dialog terminated and drop it from the table.
    pub fn terminate_dialog(&self, dialog: &Dialog) {
        dialog.transition(DialogState::Terminated);
        if let Ok(mut dialogs) = self.dialogs.write() {
            if dialogs.remove(dialog.id()).is_some() {
                debug!(id = %dialog.id(), "dialog terminated");
            }
        }
    }
}
