use super::key::{TransactionKey, TransactionRole};
use rsip::{Method, Request, Response};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    ClientInvite,
    ClientNonInvite,
    ServerInvite,
    ServerNonInvite,
}

impl TransactionType {
    pub fn new(method: Method, role: TransactionRole) -> Self {
        match (method, role) {
            (Method::Invite | Method::Ack, TransactionRole::Client) => Self::ClientInvite,
            (_, TransactionRole::Client) => Self::ClientNonInvite,
            (Method::Invite | Method::Ack, TransactionRole::Server) => Self::ServerInvite,
            (_, TransactionRole::Server) => Self::ServerNonInvite,
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Self::ClientInvite | Self::ClientNonInvite)
    }

    pub fn is_invite(&self) -> bool {
        matches!(self, Self::ClientInvite | Self::ServerInvite)
    }
}

/// Transaction state per RFC 3261 §17.
///
/// Client INVITE starts in `Calling`, client non-INVITE in `Trying`,
/// server INVITE in `Proceeding` and server non-INVITE in `Trying`.
/// `Confirmed` is only reached by a server INVITE transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Calling,
    Trying,
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
}

impl TransactionState {
    fn rank(&self) -> u8 {
        match self {
            TransactionState::Calling | TransactionState::Trying => 0,
            TransactionState::Proceeding => 1,
            TransactionState::Completed => 2,
            TransactionState::Confirmed => 3,
            TransactionState::Terminated => 4,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.rank() < TransactionState::Completed.rank()
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What a client transaction reports to whoever created it, in arrival order.
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    Response(Response, Transaction),
    Timeout(Transaction),
}

pub type TransactionSender = UnboundedSender<TransactionEvent>;
pub type TransactionReceiver = UnboundedReceiver<TransactionEvent>;

#[derive(Debug, Clone)]
pub enum TransactionTimer {
    TimerA(TransactionKey, Duration),
    TimerB(TransactionKey),
    /// Proceeding timeout of a client INVITE.
    TimerC(TransactionKey),
    TimerD(TransactionKey),
    TimerE(TransactionKey, Duration),
    TimerF(TransactionKey),
    TimerG(TransactionKey, Duration),
    TimerH(TransactionKey),
    TimerI(TransactionKey),
    TimerJ(TransactionKey),
    TimerK(TransactionKey),
    /// Removes a transaction terminated by a 2xx once the grace interval ends.
    TimerCleanup(TransactionKey),
}

impl TransactionTimer {
    pub fn key(&self) -> &TransactionKey {
        match self {
            TransactionTimer::TimerA(key, _)
            | TransactionTimer::TimerB(key)
            | TransactionTimer::TimerC(key)
            | TransactionTimer::TimerD(key)
            | TransactionTimer::TimerE(key, _)
            | TransactionTimer::TimerF(key)
            | TransactionTimer::TimerG(key, _)
            | TransactionTimer::TimerH(key)
            | TransactionTimer::TimerI(key)
            | TransactionTimer::TimerJ(key)
            | TransactionTimer::TimerK(key)
            | TransactionTimer::TimerCleanup(key) => key,
        }
    }
}

impl std::fmt::Display for TransactionTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionTimer::TimerA(key, d) => write!(f, "TimerA({:?}): {}", d, key),
            TransactionTimer::TimerB(key) => write!(f, "TimerB: {}", key),
            TransactionTimer::TimerC(key) => write!(f, "TimerC: {}", key),
            TransactionTimer::TimerD(key) => write!(f, "TimerD: {}", key),
            TransactionTimer::TimerE(key, d) => write!(f, "TimerE({:?}): {}", d, key),
            TransactionTimer::TimerF(key) => write!(f, "TimerF: {}", key),
            TransactionTimer::TimerG(key, d) => write!(f, "TimerG({:?}): {}", d, key),
            TransactionTimer::TimerH(key) => write!(f, "TimerH: {}", key),
            TransactionTimer::TimerI(key) => write!(f, "TimerI: {}", key),
            TransactionTimer::TimerJ(key) => write!(f, "TimerJ: {}", key),
            TransactionTimer::TimerK(key) => write!(f, "TimerK: {}", key),
            TransactionTimer::TimerCleanup(key) => write!(f, "TimerCleanup: {}", key),
        }
    }
}

/// A request and everything the manager knows about its exchange so far.
///
/// Handlers receive clones of this as snapshots; the authoritative copy lives
/// in the [`super::TransactionManager`] table.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub key: TransactionKey,
    pub transaction_type: TransactionType,
    pub state: TransactionState,
    pub original: Request,
    /// Request target for client transactions, request source for server ones.
    pub remote: SocketAddr,
    pub last_response: Option<Response>,
    /// ACK sent for the final response, re-sent on retransmissions of it.
    pub last_ack: Option<Request>,
}

impl Transaction {
    pub fn new(
        key: TransactionKey,
        original: Request,
        remote: SocketAddr,
        role: TransactionRole,
    ) -> Self {
        let transaction_type = TransactionType::new(original.method, role);
        let state = match transaction_type {
            TransactionType::ClientInvite => TransactionState::Calling,
            TransactionType::ServerInvite => TransactionState::Proceeding,
            _ => TransactionState::Trying,
        };
        Transaction {
            key,
            transaction_type,
            state,
            original,
            remote,
            last_response: None,
            last_ack: None,
        }
    }

    pub fn method(&self) -> Method {
        self.original.method
    }

    /// Move forward to `state`. Returns false, leaving the state untouched,
    /// when `state` is not later than the current one.
    pub fn transition(&mut self, state: TransactionState) -> bool {
        if state.rank() <= self.state.rank() {
            return false;
        }
        self.state = state;
        true
    }
}
