mod link;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Error, Result};
use crate::protocol::{CorrelationId, Frame, Request, Response, StopReason};

pub use link::{Link, link_pair};

/// Serves requests arriving from the peer. Runs on the bus reader task, one request at a time.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, peer: &str, request: Request) -> Response;
}

type Slot = oneshot::Sender<Result<Response>>;

struct Shared {
    peer: Arc<str>,
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    next_id: AtomicU64,
    pending: DashMap<CorrelationId, Slot>,
    closed: AtomicBool,
    stop: watch::Sender<Option<StopReason>>,
}

impl Shared {
    fn transmit(&self, frame: Frame) -> Result<()> {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(self.disconnected());
        };
        tx.send(frame).map_err(|_| self.disconnected())
    }

    fn disconnected(&self) -> Error {
        Error::PeerDisconnected {
            peer: self.peer.to_string(),
        }
    }

    fn complete(&self, id: CorrelationId, response: Response) {
        match self.pending.remove(&id) {
            Some((_, slot)) => {
                // The waiter may have given up in between; nothing left to do then.
                let _ = slot.send(Ok(response));
            }
            None => {
                tracing::warn!(
                    peer = %self.peer,
                    correlation_id = %id,
                    "discarding response without a pending request (duplicate or late)"
                );
            }
        }
    }

    /// Marks the peer gone and fails everything still in flight.
    fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tx.lock().take();

        let ids: Vec<CorrelationId> = self.pending.iter().map(|e| *e.key()).collect();
        let failed = ids.len();
        for id in ids {
            if let Some((_, slot)) = self.pending.remove(&id) {
                let _ = slot.send(Err(self.disconnected()));
            }
        }

        if failed > 0 {
            tracing::warn!(peer = %self.peer, failed, "peer disconnected with requests in flight");
        } else {
            tracing::info!(peer = %self.peer, "peer disconnected");
        }
    }
}

/// One end of a worker/controller connection.
///
/// Cheap to clone; all clones share the pending-request table. Call [`Bus::close`] when the
/// connection is no longer needed so the peer observes the disconnect.
#[derive(Clone)]
pub struct Bus {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("peer", &self.shared.peer)
            .field("in_flight", &self.shared.pending.len())
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Bus {
    /// Starts the reader task for `link`. Must be called within a tokio runtime.
    ///
    /// `handler` serves requests sent by the peer; without one they are answered with
    /// [`Response::Failure`].
    pub fn spawn(
        peer: impl Into<Arc<str>>,
        link: Link,
        handler: Option<Arc<dyn RequestHandler>>,
    ) -> Self {
        let (tx, rx) = link.into_parts();
        let (stop, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            peer: peer.into(),
            tx: Mutex::new(Some(tx)),
            next_id: AtomicU64::new(0),
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
            stop,
        });

        tokio::spawn(read_loop(shared.clone(), rx, handler));
        Self { shared }
    }

    #[must_use]
    pub fn peer(&self) -> &Arc<str> {
        &self.shared.peer
    }

    /// Attaches a fresh correlation id, registers a pending slot and transmits.
    pub fn send(&self, request: Request) -> Result<Pending> {
        let id = CorrelationId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (slot, rx) = oneshot::channel();
        let what = request.describe();

        self.shared.pending.insert(id, slot);
        let pending = Pending {
            id,
            rx,
            what,
            shared: self.shared.clone(),
        };

        // Checked after inserting: either `disconnect` sees our slot, or we see `closed`.
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(self.shared.disconnected());
        }
        self.shared.transmit(Frame::Request { id, request })?;
        Ok(pending)
    }

    /// `send` followed by [`Pending::wait`].
    pub async fn call(&self, request: Request, timeout: Duration) -> Result<Response> {
        self.send(request)?.wait(timeout).await
    }

    /// Tells the peer to stop issuing work.
    pub fn notify_stop(&self, reason: StopReason) -> Result<()> {
        self.shared.transmit(Frame::Stop { reason })
    }

    /// Latest stop notification received from the peer, if any.
    pub fn stop_signal(&self) -> watch::Receiver<Option<StopReason>> {
        self.shared.stop.subscribe()
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.shared.stop.borrow().is_some()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.pending.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Drops the outbound half and fails all pending requests.
    pub fn close(&self) {
        self.shared.disconnect();
    }
}

/// A request in flight.
///
/// Dropping it releases the pending slot, so a late response is discarded.
#[derive(Debug)]
pub struct Pending {
    id: CorrelationId,
    rx: oneshot::Receiver<Result<Response>>,
    what: String,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl Pending {
    #[must_use]
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Suspends until the matching response arrives, the peer disconnects, or `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> Result<Response> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.shared.disconnected()),
            Err(_) => {
                self.shared.pending.remove(&self.id);
                Err(Error::Timeout {
                    request: std::mem::take(&mut self.what),
                    after: timeout,
                })
            }
        }
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        self.shared.pending.remove(&self.id);
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    handler: Option<Arc<dyn RequestHandler>>,
) {
    while let Some(frame) = rx.recv().await {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
        match frame {
            Frame::Request { id, request } => {
                let response = match &handler {
                    Some(h) => h.handle(&shared.peer, request),
                    None => Response::Failure {
                        reason: "this end does not serve requests".to_string(),
                    },
                };
                if let Err(err) = shared.transmit(Frame::Response { id, response }) {
                    tracing::debug!(peer = %shared.peer, correlation_id = %id, "response not delivered: {err}");
                }
            }
            Frame::Response { id, response } => shared.complete(id, response),
            Frame::Stop { reason } => {
                tracing::info!(peer = %shared.peer, %reason, "stop requested by peer");
                shared.stop.send_replace(Some(reason));
            }
        }
    }
    shared.disconnect();
}
