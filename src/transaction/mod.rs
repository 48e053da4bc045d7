use rand::{distr::Alphanumeric, Rng};
use rsip::param::Tag;

pub mod key;
pub mod manager;
pub mod message;
pub mod timer;
pub mod transaction;

pub use key::{TransactionKey, TransactionRole};
pub use manager::{TransactionManager, TransactionManagerRef};
pub use transaction::{
    Transaction, TransactionEvent, TransactionReceiver, TransactionSender, TransactionState,
    TransactionTimer, TransactionType,
};

#[cfg(test)]
mod tests;

pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";
pub const TAG_LEN: usize = 8;
pub const BRANCH_LEN: usize = 12;
pub const CNONCE_LEN: usize = 8;
pub const CALL_ID_LEN: usize = 22;

pub fn random_text(count: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(count)
        .map(char::from)
        .collect()
}

pub fn make_via_branch() -> rsip::Param {
    rsip::Param::Branch(format!("{}{}", BRANCH_MAGIC_COOKIE, random_text(BRANCH_LEN)).into())
}

pub fn make_tag() -> Tag {
    random_text(TAG_LEN).into()
}

pub fn make_call_id(domain: Option<&str>) -> rsip::headers::CallId {
    let id = random_text(CALL_ID_LEN);
    match domain {
        Some(domain) => format!("{}@{}", id, domain).into(),
        None => id.into(),
    }
}
