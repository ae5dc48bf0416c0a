//! Correlation of requests and their replies.
//!
//! The transport is unordered and lossy, so every exchange that expects a reply
//! is recorded under a [`ResponseKey`] until the reply has been fully assembled
//! or its deadline passes. Inbound messages that match no pending exchange are
//! dropped.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use log::{debug, trace, warn};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::{MalformedMessage, Message, MessageType};

pub mod response;

pub use response::{Response, ResponseExpectation};

/// Identity of one pending exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseKey {
    pub address: IpAddr,
    pub source: u32,
    pub sequence: u8,
    pub message_type: MessageType,
}

impl ResponseKey {
    pub fn new(address: IpAddr, source: u32, sequence: u8, message_type: MessageType) -> Self {
        ResponseKey {
            address,
            source,
            sequence,
            message_type,
        }
    }

    /// The key an inbound `message` from `address` answers.
    pub fn of(address: IpAddr, message: &Message) -> Self {
        Self::new(
            address,
            message.source,
            message.sequence,
            message.message_type,
        )
    }
}

impl Display for ResponseKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} from {} (source {:#010x}, sequence {})",
            self.message_type, self.address, self.source, self.sequence
        )
    }
}

/// Called once with the completed response, before the handle resolves.
pub type CompletionCallback<R> = Box<dyn FnOnce(&R) + Send>;

/// Type-erased view of an exchange so one table can hold every response kind.
trait PendingResponse: Send {
    fn accept(&mut self, message: &Message) -> Result<bool, MalformedMessage>;
    fn complete(self: Box<Self>);
    fn fail(self: Box<Self>, error: Error);
    fn is_abandoned(&self) -> bool;
}

struct Exchange<R: Response> {
    response: R,
    on_complete: Option<CompletionCallback<R>>,
    tx: oneshot::Sender<Result<R>>,
}

impl<R: Response> PendingResponse for Exchange<R> {
    fn accept(&mut self, message: &Message) -> Result<bool, MalformedMessage> {
        self.response.parse(message)
    }

    fn complete(self: Box<Self>) {
        let Exchange {
            response,
            on_complete,
            tx,
        } = *self;
        if let Some(on_complete) = on_complete {
            on_complete(&response);
        }
        let _ = tx.send(Ok(response));
    }

    fn fail(self: Box<Self>, error: Error) {
        let _ = self.tx.send(Err(error));
    }

    fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

struct PendingExchange {
    id: u64,
    created_at: Instant,
    deadline: Instant,
    inner: Box<dyn PendingResponse>,
}

impl PendingExchange {
    fn is_stale(&self, now: Instant) -> bool {
        self.deadline <= now || self.inner.is_abandoned()
    }
}

#[derive(Default)]
struct PendingTable {
    exchanges: Mutex<HashMap<ResponseKey, PendingExchange>>,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<ResponseKey, PendingExchange>> {
        self.exchanges.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes `key` only if it still belongs to exchange `id`.
    fn remove(&self, key: &ResponseKey, id: u64) -> Option<PendingExchange> {
        let mut exchanges = self.lock();
        match exchanges.get(key) {
            Some(exchange) if exchange.id == id => exchanges.remove(key),
            _ => None,
        }
    }
}

fn take_stale(
    exchanges: &mut HashMap<ResponseKey, PendingExchange>,
    now: Instant,
) -> Vec<(ResponseKey, PendingExchange)> {
    let stale: Vec<ResponseKey> = exchanges
        .iter()
        .filter(|(_, exchange)| exchange.is_stale(now))
        .map(|(key, _)| *key)
        .collect();
    stale
        .into_iter()
        .filter_map(|key| exchanges.remove(&key).map(|exchange| (key, exchange)))
        .collect()
}

fn fail_evicted(evicted: Vec<(ResponseKey, PendingExchange)>) {
    for (key, exchange) in evicted {
        debug!(
            "Evicting {} after {:?}",
            key,
            exchange.created_at.elapsed()
        );
        exchange.inner.fail(Error::Timeout(key));
    }
}

/// Sends requests over the client socket and matches replies to them.
pub struct Dispatcher {
    socket: Arc<UdpSocket>,
    pending: Arc<PendingTable>,
    next_id: AtomicU64,
    response_timeout: Duration,
}

impl Dispatcher {
    pub fn new(socket: Arc<UdpSocket>, response_timeout: Duration) -> Self {
        Dispatcher {
            socket,
            pending: Arc::new(PendingTable::default()),
            next_id: AtomicU64::new(0),
            response_timeout,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Sends `request` without asking for any reply and without tracking it.
    pub async fn send_fire_and_forget(&self, target: SocketAddr, mut request: Message) -> Result<()> {
        request.ack_required = false;
        request.res_required = false;
        let bytes = request.encode()?;
        self.socket.send_to(&bytes, target).await?;
        trace!(
            "Sent {} to {} (sequence {})",
            request.message_type,
            target,
            request.sequence
        );
        Ok(())
    }

    /// Sends `request` and returns a handle resolving with the assembled `R`.
    ///
    /// The reply flags are taken from `R::EXPECTS`. A key that is already
    /// pending is rejected with [`Error::ExchangeInFlight`] unless the older
    /// exchange has expired or been abandoned.
    pub async fn send_and_await<R: Response>(
        &self,
        target: SocketAddr,
        mut request: Message,
        on_complete: Option<CompletionCallback<R>>,
    ) -> Result<ResponseHandle<R>> {
        request.ack_required = R::EXPECTS.requires_ack;
        request.res_required = R::EXPECTS.requires_response;
        let bytes = request.encode()?;

        let key = ResponseKey::new(
            target.ip(),
            request.source,
            request.sequence,
            R::MESSAGE_TYPE,
        );
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let created_at = Instant::now();
        let deadline = created_at + self.response_timeout;
        let (tx, rx) = oneshot::channel();

        let replaced = {
            let mut exchanges = self.pending.lock();
            let replaced = match exchanges.get(&key) {
                Some(existing) if !existing.is_stale(created_at) => {
                    return Err(Error::ExchangeInFlight(key));
                }
                Some(_) => exchanges.remove(&key),
                None => None,
            };
            exchanges.insert(
                key,
                PendingExchange {
                    id,
                    created_at,
                    deadline,
                    inner: Box::new(Exchange {
                        response: R::default(),
                        on_complete,
                        tx,
                    }),
                },
            );
            replaced
        };
        if let Some(replaced) = replaced {
            fail_evicted(vec![(key, replaced)]);
        }

        if let Err(err) = self.socket.send_to(&bytes, target).await {
            self.pending.remove(&key, id);
            return Err(Error::Transport(err));
        }
        trace!("Awaiting {}", key);

        Ok(ResponseHandle {
            key,
            id,
            deadline,
            rx,
            pending: self.pending.clone(),
        })
    }

    /// Feeds an inbound message to the exchange it answers.
    pub fn on_message_received(&self, from: SocketAddr, message: &Message) {
        let key = ResponseKey::of(from.ip(), message);
        let mut exchanges = self.pending.lock();

        let Some(exchange) = exchanges.get_mut(&key) else {
            drop(exchanges);
            debug!("Unexpected {}, dropping", key);
            return;
        };

        match exchange.inner.accept(message) {
            Ok(false) => {
                trace!("Partial {}", key);
            }
            Ok(true) => {
                let completed = exchanges.remove(&key);
                let evicted = take_stale(&mut exchanges, Instant::now());
                drop(exchanges);
                if let Some(completed) = completed {
                    completed.inner.complete();
                }
                fail_evicted(evicted);
            }
            // accumulators leave themselves untouched on error, so the
            // exchange keeps waiting for a well-formed datagram
            Err(err) => {
                drop(exchanges);
                warn!("Dropping malformed {}: {}", key, err);
            }
        }
    }

    /// Evicts expired and abandoned exchanges, failing their waiters with
    /// [`Error::Timeout`]. Returns how many were evicted.
    pub fn evict_expired(&self) -> usize {
        let evicted = take_stale(&mut self.pending.lock(), Instant::now());
        let count = evicted.len();
        fail_evicted(evicted);
        count
    }

    /// Periodically evicts expired exchanges until `cancel` fires.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.evict_expired();
                    if evicted > 0 {
                        debug!("Swept {} expired exchanges", evicted);
                    }
                }
            }
        }
        debug!("Sweeper stopped");
    }

    pub fn is_pending(&self, key: &ResponseKey) -> bool {
        self.pending.lock().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Resolves once with the outcome of one exchange.
///
/// Await it directly or call [`ResponseHandle::wait`]. It resolves with
/// [`Error::Timeout`] at the exchange deadline at the latest.
pub struct ResponseHandle<R: Response> {
    key: ResponseKey,
    id: u64,
    deadline: Instant,
    rx: oneshot::Receiver<Result<R>>,
    pending: Arc<PendingTable>,
}

impl<R: Response> ResponseHandle<R> {
    pub fn key(&self) -> ResponseKey {
        self.key
    }

    pub async fn wait(self) -> Result<R> {
        let ResponseHandle {
            key,
            id,
            deadline,
            mut rx,
            pending,
        } = self;

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Abandoned(key)),
            Err(_) => {
                drop(pending.remove(&key, id));
                // completion may have raced the deadline
                match rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::Timeout(key)),
                }
            }
        }
    }
}

impl<R: Response> IntoFuture for ResponseHandle<R> {
    type Output = Result<R>;
    type IntoFuture = BoxFuture<'static, Result<R>>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait().boxed()
    }
}
