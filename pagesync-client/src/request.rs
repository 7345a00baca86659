//! Request/response correlation, the offline send queue and rate limiting.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use pagesync_core::{Envelope, OfflineQueue, RateBucket, RequestId};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::RateLimitConfig;
use crate::connection::ConnectionManager;
use crate::error::{SessionError, SessionResult};

/// A serialized frame waiting for the socket to reopen.
#[derive(Debug)]
struct QueuedFrame {
    request_id: Option<RequestId>,
    text: String,
}

struct PendingRequest {
    tx: oneshot::Sender<SessionResult<Envelope>>,
    timer: JoinHandle<()>,
}

struct CoordinatorState {
    next_id: u64,
    pending: HashMap<RequestId, PendingRequest>,
    queue: OfflineQueue<QueuedFrame>,
    rate: Option<RateBucket>,
    closed: Option<String>,
}

impl CoordinatorState {
    /// Remove a pending request and stop its timer. Removal from the map is
    /// the only way a request completes, so each one completes at most once.
    fn claim(&mut self, request_id: &RequestId) -> Option<Responder> {
        let pending = self.pending.remove(request_id)?;
        pending.timer.abort();
        Some(Responder { tx: pending.tx })
    }

    fn complete(&mut self, request_id: &RequestId, result: SessionResult<Envelope>) -> bool {
        match self.claim(request_id) {
            Some(responder) => {
                responder.respond(result);
                true
            }
            None => false,
        }
    }
}

/// Exclusive right to answer one claimed request.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<SessionResult<Envelope>>,
}

impl Responder {
    /// Deliver the outcome to the waiting caller.
    pub fn respond(self, result: SessionResult<Envelope>) {
        // The caller may have dropped its future; nothing to deliver then.
        let _ = self.tx.send(result);
    }
}

/// Correlates outbound requests with their responses.
///
/// Frames go straight to the socket while it is open and the offline queue is
/// empty. Otherwise they are queued and flushed, in order, on the next open.
#[derive(Clone)]
pub struct RequestCoordinator {
    connection: ConnectionManager,
    default_timeout: Duration,
    state: Arc<Mutex<CoordinatorState>>,
}

impl RequestCoordinator {
    /// Create a coordinator sending through `connection`.
    #[must_use]
    pub fn new(
        connection: ConnectionManager,
        default_timeout: Duration,
        queue_capacity: usize,
        rate_limit: Option<&RateLimitConfig>,
    ) -> Self {
        let state = CoordinatorState {
            next_id: 0,
            pending: HashMap::new(),
            queue: OfflineQueue::with_max_size(queue_capacity),
            rate: rate_limit.map(|r| RateBucket::new(r.burst, r.per_second)),
            closed: None,
        };
        Self {
            connection,
            default_timeout,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Deadline used when callers do not pick one.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Next request ID. Unique and increasing within this coordinator.
    pub fn generate_request_id(&self) -> RequestId {
        let mut state = self.lock();
        state.next_id += 1;
        RequestId::from(state.next_id)
    }

    /// Consume one rate-limit token. Always true when rate limiting is off.
    pub fn check_rate_limit(&self) -> bool {
        self.lock().rate.as_mut().map_or(true, RateBucket::try_consume)
    }

    /// Register `request_id`, stamp it on `envelope`, and send or queue it.
    ///
    /// Registration happens now, not when the returned future is first
    /// polled. The future resolves with the response envelope, or fails with
    /// a timeout, a server error, or the session's shutdown reason.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send_request(
        &self,
        envelope: Envelope,
        request_id: RequestId,
        timeout: Duration,
    ) -> PendingResponse {
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return PendingResponse::failed(request_id, SessionError::Closed(reason.clone()));
        }
        if !state.rate.as_mut().map_or(true, RateBucket::try_consume) {
            tracing::warn!(request_id = %request_id, kind = %envelope.kind(), "Request rate limited");
            return PendingResponse::failed(request_id, SessionError::RateLimited);
        }
        if state.pending.contains_key(&request_id) {
            return PendingResponse::failed(
                request_id.clone(),
                SessionError::Protocol(format!("request {request_id} already pending")),
            );
        }

        let kind = envelope.kind();
        let text = match envelope.with_request_id(request_id.clone()).to_json() {
            Ok(text) => text,
            Err(e) => return PendingResponse::failed(request_id, e.into()),
        };

        let (tx, rx) = oneshot::channel();
        let timer = {
            let coordinator = self.clone();
            let request_id = request_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                coordinator.expire(&request_id, timeout);
            })
        };
        state
            .pending
            .insert(request_id.clone(), PendingRequest { tx, timer });
        tracing::debug!(request_id = %request_id, kind = %kind, "Request registered");

        self.dispatch(
            &mut state,
            QueuedFrame {
                request_id: Some(request_id.clone()),
                text,
            },
        );
        PendingResponse {
            request_id,
            inner: PendingInner::Waiting(rx),
        }
    }

    /// Send a frame that expects no response, queueing it while offline.
    ///
    /// # Errors
    ///
    /// Fails if the session is shut down or the envelope cannot be encoded.
    pub fn send_or_queue(&self, envelope: &Envelope) -> SessionResult<()> {
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(SessionError::Closed(reason.clone()));
        }
        let text = envelope.to_json()?;
        self.dispatch(
            &mut state,
            QueuedFrame {
                request_id: None,
                text,
            },
        );
        Ok(())
    }

    /// Complete a pending request. Returns false if none is registered under
    /// `request_id`, which is a safe no-op.
    pub fn resolve_pending_request(
        &self,
        request_id: &RequestId,
        result: SessionResult<Envelope>,
    ) -> bool {
        self.lock().complete(request_id, result)
    }

    /// Take the pending request registered under `request_id`, if any.
    ///
    /// The request no longer times out; the returned [`Responder`] is the
    /// only way left to complete it.
    pub fn claim(&self, request_id: &RequestId) -> Option<Responder> {
        self.lock().claim(request_id)
    }

    /// Transmit queued frames in order. Stops at the first failed send and
    /// keeps the rest queued. Returns the number of frames sent.
    pub fn flush_queue(&self) -> usize {
        let mut state = self.lock();
        let mut sent = 0;
        while let Some(frame) = state.queue.pop_front() {
            if !self.connection.send(frame.text.clone()) {
                state.queue.push_front(frame);
                break;
            }
            sent += 1;
        }
        if sent > 0 {
            tracing::info!(sent, remaining = state.queue.len(), "Flushed offline queue");
        }
        sent
    }

    /// Put frames the socket never wrote back at the head of the queue, in
    /// their original order, ahead of anything queued since.
    ///
    /// Frames for requests that already completed are discarded. If the
    /// queue overflows, the oldest frames are evicted as in `send_or_queue`.
    pub fn requeue_unsent(&self, frames: Vec<String>) {
        let mut state = self.lock();
        if state.closed.is_some() {
            return;
        }
        let mut requeued = 0;
        for text in frames.into_iter().rev() {
            let request_id = Envelope::request_id_of(&text);
            if let Some(id) = &request_id {
                if !state.pending.contains_key(id) {
                    continue;
                }
            }
            state.queue.push_front(QueuedFrame { request_id, text });
            requeued += 1;
        }
        while state.queue.len() > state.queue.max_size() {
            if let Some(evicted) = state.queue.pop_front() {
                Self::reject_evicted(&mut state, evicted);
            }
        }
        if requeued > 0 {
            tracing::info!(requeued, queued = state.queue.len(), "Requeued unsent frames");
        }
    }

    /// Reject every pending request with `reason` and drop queued frames.
    /// Later sends fail immediately.
    pub fn shutdown(&self, reason: &str) {
        let mut state = self.lock();
        state.closed = Some(reason.to_string());
        let ids: Vec<RequestId> = state.pending.keys().cloned().collect();
        for id in &ids {
            state.complete(id, Err(SessionError::Closed(reason.to_string())));
        }
        state.queue.clear();
        if !ids.is_empty() {
            tracing::info!(rejected = ids.len(), reason, "Rejected pending requests");
        }
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of frames waiting for the socket.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.lock().queue.len()
    }

    fn dispatch(&self, state: &mut CoordinatorState, frame: QueuedFrame) {
        // A non-empty queue means earlier frames are still waiting; go behind them.
        if state.queue.is_empty() && self.connection.send(frame.text.clone()) {
            return;
        }
        if let Some(evicted) = state.queue.enqueue(frame) {
            Self::reject_evicted(state, evicted);
        }
    }

    fn reject_evicted(state: &mut CoordinatorState, evicted: QueuedFrame) {
        tracing::warn!(
            capacity = state.queue.max_size(),
            "Offline queue full, dropping oldest frame"
        );
        if let Some(id) = evicted.request_id {
            state.complete(
                &id,
                Err(SessionError::Closed("dropped from offline queue".into())),
            );
        }
    }

    /// Reject a request whose deadline passed. A frame still waiting in the
    /// offline queue is withdrawn so the server never sees it.
    fn expire(&self, request_id: &RequestId, after: Duration) {
        let mut state = self.lock();
        let Some(responder) = state.claim(request_id) else {
            return;
        };
        let queued = state.queue.len();
        state
            .queue
            .retain(|frame| frame.request_id.as_ref() != Some(request_id));
        let withdrawn = queued != state.queue.len();
        drop(state);

        tracing::warn!(request_id = %request_id, withdrawn, "Request timed out");
        responder.respond(Err(SessionError::Timeout {
            request_id: request_id.clone(),
            after,
        }));
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

enum PendingInner {
    Waiting(oneshot::Receiver<SessionResult<Envelope>>),
    Failed(Option<SessionError>),
}

/// Future for the response to one request.
///
/// Dropping it does not cancel the request; the server's answer is still
/// consumed and discarded.
#[must_use = "the response is lost unless awaited"]
pub struct PendingResponse {
    request_id: RequestId,
    inner: PendingInner,
}

impl PendingResponse {
    fn failed(request_id: RequestId, error: SessionError) -> Self {
        Self {
            request_id,
            inner: PendingInner::Failed(Some(error)),
        }
    }

    /// The request this future answers.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }
}

impl Future for PendingResponse {
    type Output = SessionResult<Envelope>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            PendingInner::Waiting(rx) => Pin::new(rx).poll(cx).map(|received| {
                received.unwrap_or_else(|_| Err(SessionError::Closed("coordinator dropped".into())))
            }),
            PendingInner::Failed(error) => Poll::Ready(Err(error
                .take()
                .unwrap_or_else(|| SessionError::Closed("response already taken".into())))),
        }
    }
}

impl std::fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}
