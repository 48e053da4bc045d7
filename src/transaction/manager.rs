use super::{
    key::{TransactionKey, TransactionRole},
    message::make_ack_for_non_2xx,
    timer::Timer,
    transaction::{
        Transaction, TransactionEvent, TransactionReceiver, TransactionSender, TransactionState,
        TransactionTimer, TransactionType,
    },
};
use crate::{config::TimerConfig, rsip_ext::RsipMessageExt, transport::TransportRef, Error, Result};
use rsip::{Method, Request, Response, SipMessage};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, RwLock,
    },
    time::{Duration, Instant},
};
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

struct TransactionEntry {
    tx: Transaction,
    sender: Option<TransactionSender>,
    /// Task id of the armed Timer C, restarted by every provisional response.
    timer_c: Option<u64>,
}

type EntryRef = Arc<Mutex<TransactionEntry>>;

fn lock(entry: &EntryRef) -> MutexGuard<'_, TransactionEntry> {
    entry.lock().unwrap_or_else(|e| e.into_inner())
}

/// What to do once the entry lock is released.
enum Followup {
    Nothing,
    Deliver(TransactionEvent),
    SendAck(Request),
    DeliverAndAck(TransactionEvent, Request),
    Resend(Request),
    ResendResponse(Response),
    Timeout,
}

/// Table of in-flight client and server transactions.
///
/// Each entry sits behind its own lock so unrelated transactions never
/// contend. No lock is held across a transport send.
pub struct TransactionManager {
    transactions: RwLock<HashMap<TransactionKey, EntryRef>>,
    timers: Timer<TransactionTimer>,
    transport: TransportRef,
    timer_config: TimerConfig,
    closed: AtomicBool,
}

pub type TransactionManagerRef = Arc<TransactionManager>;

impl TransactionManager {
    pub fn new(transport: TransportRef, timer_config: TimerConfig) -> Self {
        TransactionManager {
            transactions: RwLock::new(HashMap::new()),
            timers: Timer::new(),
            transport,
            timer_config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.read().map(|t| t.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn timer_len(&self) -> usize {
        self.timers.len()
    }

    fn entry(&self, key: &TransactionKey) -> Option<EntryRef> {
        self.transactions
            .read()
            .ok()
            .and_then(|t| t.get(key).cloned())
    }

    fn remove(&self, key: &TransactionKey) {
        if let Ok(mut t) = self.transactions.write() {
            t.remove(key);
        }
        trace!(%key, "transaction removed");
    }

    fn timeout_interval(&self) -> Duration {
        self.timer_config.t1() * 64
    }

    fn arm(&self, timer: TransactionTimer, duration: Duration) -> Option<u64> {
        if self.closed.load(Ordering::Relaxed) {
            return None;
        }
        Some(self.timers.timeout(duration, timer))
    }

    fn restart_timer_c(&self, e: &mut TransactionEntry) {
        self.stop_timer_c(e);
        e.timer_c = self.arm(
            TransactionTimer::TimerC(e.tx.key.clone()),
            self.timer_config.timer_c(),
        );
    }

    fn stop_timer_c(&self, e: &mut TransactionEntry) {
        if let Some(task_id) = e.timer_c.take() {
            self.timers.cancel(task_id);
        }
    }

    fn unreliable(&self) -> bool {
        !self.transport.is_reliable()
    }

    /// Register a client transaction for `req`, to be sent to `remote`.
    ///
    /// The timeout timer (B or F) starts now, so a transaction whose first
    /// send fails is still collected.
    pub fn create_client_transaction(
        &self,
        req: Request,
        remote: SocketAddr,
    ) -> Result<(TransactionKey, TransactionReceiver)> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::Closed);
        }
        let key = TransactionKey::from_request(&req, TransactionRole::Client)?;
        let tx = Transaction::new(key.clone(), req, remote, TransactionRole::Client);
        let timeout_timer = match tx.transaction_type {
            TransactionType::ClientInvite => TransactionTimer::TimerB(key.clone()),
            _ => TransactionTimer::TimerF(key.clone()),
        };
        let (sender, receiver) = unbounded_channel();
        let entry = Arc::new(Mutex::new(TransactionEntry {
            tx,
            sender: Some(sender),
            timer_c: None,
        }));
        {
            let mut table = self
                .transactions
                .write()
                .map_err(|e| Error::TransactionError(e.to_string(), key.clone()))?;
            if table.contains_key(&key) {
                return Err(Error::TransactionError(
                    "transaction already exists".to_string(),
                    key,
                ));
            }
            table.insert(key.clone(), entry);
        }
        self.arm(timeout_timer, self.timeout_interval());
        debug!(%key, %remote, "client transaction created");
        Ok((key, receiver))
    }

    /// First transmission of a client transaction's request.
    ///
    /// On failure the transaction stays in its initial state.
    pub async fn send_request(&self, key: &TransactionKey) -> Result<()> {
        let entry = self.entry(key).ok_or_else(|| {
            Error::TransactionError("transaction not found".to_string(), key.clone())
        })?;
        let (req, remote, tx_type) = {
            let e = lock(&entry);
            if !matches!(e.tx.state, TransactionState::Calling | TransactionState::Trying) {
                return Err(Error::TransactionError(
                    format!("invalid state for send: {}", e.tx.state),
                    key.clone(),
                ));
            }
            (e.tx.original.clone(), e.tx.remote, e.tx.transaction_type)
        };
        self.transport.send_request(&req, remote).await?;
        if self.unreliable() {
            let t1 = self.timer_config.t1();
            let timer = match tx_type {
                TransactionType::ClientInvite => TransactionTimer::TimerA(key.clone(), t1),
                _ => TransactionTimer::TimerE(key.clone(), t1),
            };
            self.arm(timer, t1);
        }
        Ok(())
    }

    /// Register a server transaction for an inbound request. Returns the
    /// existing key when the transaction is already known.
    pub fn create_server_transaction(
        &self,
        req: &Request,
        source: SocketAddr,
    ) -> Result<TransactionKey> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::Closed);
        }
        let key = TransactionKey::from_request(req, TransactionRole::Server)?;
        let mut table = self
            .transactions
            .write()
            .map_err(|e| Error::TransactionError(e.to_string(), key.clone()))?;
        table.entry(key.clone()).or_insert_with(|| {
            debug!(%key, %source, "server transaction created");
            let tx = Transaction::new(key.clone(), req.clone(), source, TransactionRole::Server);
            Arc::new(Mutex::new(TransactionEntry {
                tx,
                sender: None,
                timer_c: None,
            }))
        });
        Ok(key)
    }

    /// Send a response within a server transaction and advance its state.
    pub async fn send_response(&self, key: &TransactionKey, resp: Response) -> Result<()> {
        let entry = self.entry(key).ok_or_else(|| {
            Error::TransactionError("transaction not found".to_string(), key.clone())
        })?;
        let remote = lock(&entry).tx.remote;
        self.transport.send_response(&resp, remote).await?;

        let code = resp.status_code.code();
        let mut e = lock(&entry);
        let tx_type = e.tx.transaction_type;
        let t1 = self.timer_config.t1();
        let accepted = match (tx_type, code) {
            (_, 100..=199) => {
                // a server INVITE starts in Proceeding already
                e.tx.transition(TransactionState::Proceeding);
                e.tx.state.is_pending()
            }
            (TransactionType::ServerInvite, 200..=299) => {
                let moved = e.tx.transition(TransactionState::Terminated);
                if moved {
                    self.arm(
                        TransactionTimer::TimerCleanup(key.clone()),
                        self.timeout_interval(),
                    );
                }
                moved
            }
            (TransactionType::ServerInvite, _) => {
                let moved = e.tx.transition(TransactionState::Completed);
                if moved {
                    if self.unreliable() {
                        self.arm(TransactionTimer::TimerG(key.clone(), t1), t1);
                    }
                    self.arm(
                        TransactionTimer::TimerH(key.clone()),
                        self.timeout_interval(),
                    );
                }
                moved
            }
            _ => {
                let moved = e.tx.transition(TransactionState::Completed);
                if moved {
                    let wait = if self.unreliable() {
                        self.timeout_interval()
                    } else {
                        Duration::ZERO
                    };
                    self.arm(TransactionTimer::TimerJ(key.clone()), wait);
                }
                moved
            }
        };
        if accepted {
            e.tx.last_response = Some(resp);
        } else {
            debug!(%key, status = code, state = %e.tx.state, "late response not cached");
        }
        Ok(())
    }

    /// Send the ACK for a 2xx and keep it for retransmitted 2xx responses.
    pub async fn send_ack(&self, key: &TransactionKey, ack: Request, dest: SocketAddr) -> Result<()> {
        self.transport.send_request(&ack, dest).await?;
        if let Some(entry) = self.entry(key) {
            lock(&entry).tx.last_ack = Some(ack);
        }
        Ok(())
    }

    /// Match an inbound response to its client transaction.
    ///
    /// Returns false when no transaction owns it. Retransmitted final
    /// responses are absorbed here, re-sending the ACK where one is due.
    pub async fn receive_response(&self, resp: Response) -> Result<bool> {
        let key = TransactionKey::from_response(&resp, TransactionRole::Client)?;
        let entry = match self.entry(&key) {
            Some(entry) => entry,
            None => {
                debug!(%key, status = %resp.status_code, "no transaction for response");
                return Ok(false);
            }
        };

        let code = resp.status_code.code();
        let (followup, remote) = {
            let mut e = lock(&entry);
            let remote = e.tx.remote;
            let pending = e.tx.state.is_pending();
            let followup = match (e.tx.transaction_type, code) {
                (tx_type, 100..=199) if pending => {
                    e.tx.transition(TransactionState::Proceeding);
                    e.tx.last_response = Some(resp.clone());
                    if tx_type == TransactionType::ClientInvite {
                        self.restart_timer_c(&mut e);
                    }
                    Followup::Deliver(TransactionEvent::Response(resp, e.tx.clone()))
                }
                (TransactionType::ClientInvite, 200..=299) if pending => {
                    e.tx.transition(TransactionState::Terminated);
                    e.tx.last_response = Some(resp.clone());
                    self.arm(
                        TransactionTimer::TimerCleanup(key.clone()),
                        self.timeout_interval(),
                    );
                    Followup::Deliver(TransactionEvent::Response(resp, e.tx.clone()))
                }
                (TransactionType::ClientInvite, 200..=299) => match &e.tx.last_ack {
                    Some(ack) => Followup::SendAck(ack.clone()),
                    None => Followup::Nothing,
                },
                (TransactionType::ClientInvite, 300..=699) if pending => {
                    let ack = make_ack_for_non_2xx(&e.tx.original, &resp)?;
                    e.tx.transition(TransactionState::Completed);
                    e.tx.last_response = Some(resp.clone());
                    e.tx.last_ack = Some(ack.clone());
                    let wait = if self.unreliable() {
                        self.timeout_interval()
                    } else {
                        Duration::ZERO
                    };
                    self.arm(TransactionTimer::TimerD(key.clone()), wait);
                    Followup::DeliverAndAck(
                        TransactionEvent::Response(resp, e.tx.clone()),
                        ack,
                    )
                }
                (TransactionType::ClientInvite, 300..=699)
                    if e.tx.state == TransactionState::Completed =>
                {
                    match &e.tx.last_ack {
                        Some(ack) => Followup::SendAck(ack.clone()),
                        None => Followup::Nothing,
                    }
                }
                (TransactionType::ClientNonInvite, 200..=699) if pending => {
                    e.tx.transition(TransactionState::Completed);
                    e.tx.last_response = Some(resp.clone());
                    let wait = if self.unreliable() {
                        self.timer_config.t4()
                    } else {
                        Duration::ZERO
                    };
                    self.arm(TransactionTimer::TimerK(key.clone()), wait);
                    Followup::Deliver(TransactionEvent::Response(resp, e.tx.clone()))
                }
                _ => Followup::Nothing,
            };
            if !e.tx.state.is_pending() {
                self.stop_timer_c(&mut e);
            }
            if let Followup::Deliver(ref ev) | Followup::DeliverAndAck(ref ev, _) = followup {
                if let Some(sender) = &e.sender {
                    sender.send(ev.clone()).ok();
                }
            }
            (followup, remote)
        };

        match followup {
            Followup::SendAck(ack) | Followup::DeliverAndAck(_, ack) => {
                trace!(%key, "sending ACK");
                if let Err(e) = self.transport.send_request(&ack, remote).await {
                    warn!(%key, "failed to send ACK: {}", e);
                }
            }
            Followup::Nothing => trace!(%key, status = %code, "response absorbed"),
            _ => {}
        }
        Ok(true)
    }

    /// Match an inbound request against existing server transactions.
    ///
    /// Returns true when the request was a retransmission or an ACK for a
    /// non-2xx final response, both of which are absorbed here.
    pub async fn receive_request(&self, req: &Request, source: SocketAddr) -> Result<bool> {
        let key = TransactionKey::from_request(req, TransactionRole::Server)?;
        let entry = match self.entry(&key) {
            Some(entry) => entry,
            None => return Ok(false),
        };
        let followup = {
            let mut e = lock(&entry);
            if req.method == rsip::Method::Ack {
                match e.tx.state {
                    TransactionState::Completed => {
                        e.tx.transition(TransactionState::Confirmed);
                        let wait = if self.unreliable() {
                            self.timer_config.t4()
                        } else {
                            Duration::ZERO
                        };
                        self.arm(TransactionTimer::TimerI(key.clone()), wait);
                        debug!(%key, "ACK confirmed transaction");
                        Followup::Nothing
                    }
                    // ACK for a 2xx belongs to the dialog, not the transaction.
                    TransactionState::Terminated => return Ok(false),
                    _ => Followup::Nothing,
                }
            } else {
                match &e.tx.last_response {
                    Some(resp) => Followup::ResendResponse(resp.clone()),
                    None => Followup::Nothing,
                }
            }
        };
        if let Followup::ResendResponse(resp) = followup {
            debug!(%key, status = %resp.status_code, "retransmission, resending last response");
            if let Err(e) = self.transport.send_response(&resp, source).await {
                warn!(%key, "failed to resend response: {}", e);
            }
        }
        Ok(true)
    }

    pub fn get_transaction(&self, key: &TransactionKey) -> Option<Transaction> {
        self.entry(key).map(|e| lock(&e).tx.clone())
    }

    /// Client transaction for `method` that is still waiting for a final
    /// response in the call identified by `call_id` and `from_tag`.
    ///
    /// An authenticated retry runs on a new branch, so this finds the live
    /// transaction where a lookup by the first request's key would not.
    pub fn find_pending_client(
        &self,
        call_id: &str,
        from_tag: &str,
        method: Method,
    ) -> Option<Transaction> {
        let entries: Vec<EntryRef> = self
            .transactions
            .read()
            .ok()?
            .iter()
            .filter(|(key, _)| key.role() == Some(TransactionRole::Client))
            .map(|(_, entry)| entry.clone())
            .collect();
        entries.iter().find_map(|entry| {
            let e = lock(entry);
            let matches = e.tx.method() == method
                && e.tx.state.is_pending()
                && e.tx.original.call_id().ok().as_deref() == Some(call_id)
                && e.tx.original.from_tag().ok().flatten().as_deref() == Some(from_tag);
            if matches {
                Some(e.tx.clone())
            } else {
                None
            }
        })
    }

    /// Client transaction that owns `resp`. Absence is a normal outcome.
    pub fn get_client_transaction(&self, resp: &Response) -> Option<Transaction> {
        let key = TransactionKey::from_response(resp, TransactionRole::Client).ok()?;
        self.get_transaction(&key)
    }

    /// Server transaction that owns `msg`. Absence is a normal outcome.
    pub fn get_server_transaction(&self, msg: &SipMessage) -> Option<Transaction> {
        let key = match msg {
            SipMessage::Request(req) => TransactionKey::from_request(req, TransactionRole::Server),
            SipMessage::Response(resp) => {
                TransactionKey::from_response(resp, TransactionRole::Server)
            }
        }
        .ok()?;
        self.get_transaction(&key)
    }

    /// Cancel every pending timer. Timers that already fired are ignored once
    /// they reach [`Self::on_timer`].
    pub fn close_timers(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let n = self.timers.clear();
        info!("transaction timers closed, {} cancelled", n);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Poll timers until `token` is cancelled or the timers are closed.
    pub async fn serve(&self, token: CancellationToken) {
        let interval = self.timer_config.poll_interval();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if self.is_closed() {
                break;
            }
            for timer in self.timers.poll(Instant::now()) {
                self.on_timer(timer).await;
            }
        }
        debug!("transaction timer loop stopped");
    }

    async fn on_timer(&self, timer: TransactionTimer) {
        if self.is_closed() {
            return;
        }
        let key = timer.key().clone();
        let entry = match self.entry(&key) {
            Some(entry) => entry,
            None => return,
        };
        trace!("timer fired: {}", timer);
        let t2 = self.timer_config.t2();
        let (followup, remote) = {
            let mut e = lock(&entry);
            let remote = e.tx.remote;
            let (followup, finished) = match timer {
                TransactionTimer::TimerA(_, interval) => {
                    if e.tx.state == TransactionState::Calling {
                        let next = interval * 2;
                        self.arm(TransactionTimer::TimerA(key.clone(), next), next);
                        (Followup::Resend(e.tx.original.clone()), false)
                    } else {
                        (Followup::Nothing, false)
                    }
                }
                TransactionTimer::TimerE(_, interval) => match e.tx.state {
                    TransactionState::Trying => {
                        let next = (interval * 2).min(t2);
                        self.arm(TransactionTimer::TimerE(key.clone(), next), next);
                        (Followup::Resend(e.tx.original.clone()), false)
                    }
                    TransactionState::Proceeding => {
                        self.arm(TransactionTimer::TimerE(key.clone(), t2), t2);
                        (Followup::Resend(e.tx.original.clone()), false)
                    }
                    _ => (Followup::Nothing, false),
                },
                TransactionTimer::TimerG(_, interval) => {
                    match (&e.tx.last_response, e.tx.state) {
                        (Some(resp), TransactionState::Completed) => {
                            let next = (interval * 2).min(t2);
                            self.arm(TransactionTimer::TimerG(key.clone(), next), next);
                            (Followup::ResendResponse(resp.clone()), false)
                        }
                        _ => (Followup::Nothing, false),
                    }
                }
                TransactionTimer::TimerB(_) | TransactionTimer::TimerF(_) => {
                    let expired = match e.tx.transaction_type {
                        TransactionType::ClientInvite => e.tx.state == TransactionState::Calling,
                        _ => e.tx.state.is_pending(),
                    };
                    if expired {
                        e.tx.transition(TransactionState::Terminated);
                        let ev = TransactionEvent::Timeout(e.tx.clone());
                        if let Some(sender) = e.sender.take() {
                            sender.send(ev).ok();
                        }
                        (Followup::Timeout, true)
                    } else {
                        (Followup::Nothing, false)
                    }
                }
                TransactionTimer::TimerC(_) => {
                    if e.tx.state == TransactionState::Proceeding {
                        warn!(%key, "no final response while proceeding");
                        e.timer_c = None;
                        e.tx.transition(TransactionState::Terminated);
                        let ev = TransactionEvent::Timeout(e.tx.clone());
                        if let Some(sender) = e.sender.take() {
                            sender.send(ev).ok();
                        }
                        (Followup::Timeout, true)
                    } else {
                        (Followup::Nothing, false)
                    }
                }
                TransactionTimer::TimerH(_) => {
                    if e.tx.state == TransactionState::Completed {
                        warn!(%key, "no ACK received for final response");
                        e.tx.transition(TransactionState::Terminated);
                        (Followup::Nothing, true)
                    } else {
                        (Followup::Nothing, false)
                    }
                }
                TransactionTimer::TimerD(_)
                | TransactionTimer::TimerI(_)
                | TransactionTimer::TimerJ(_)
                | TransactionTimer::TimerK(_)
                | TransactionTimer::TimerCleanup(_) => {
                    e.tx.transition(TransactionState::Terminated);
                    (Followup::Nothing, true)
                }
            };
            if finished {
                e.sender = None;
                drop(e);
                self.remove(&key);
            }
            (followup, remote)
        };

        match followup {
            Followup::Resend(req) => {
                trace!(%key, "retransmitting request");
                if let Err(e) = self.transport.send_request(&req, remote).await {
                    warn!(%key, "retransmission failed: {}", e);
                }
            }
            Followup::ResendResponse(resp) => {
                if let Err(e) = self.transport.send_response(&resp, remote).await {
                    warn!(%key, "response retransmission failed: {}", e);
                }
            }
            Followup::Timeout => info!(%key, "transaction timed out"),
            _ => {}
        }
    }
}
