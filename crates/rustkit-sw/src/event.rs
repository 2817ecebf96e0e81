//! Lifecycle events and the "extend lifetime" primitive.
//!
//! The host may tear the worker down between events unless work has been
//! registered against the event that is currently being handled. Every piece
//! of background work in this crate is spawned onto the runtime and tracked
//! as a [`Completion`], which can be awaited by any number of listeners.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::error::{Result, SwError};
use crate::http::{Request, Response};

/// Completion signal of a spawned unit of background work.
pub type Completion = Shared<BoxFuture<'static, Result<()>>>;

/// Spawn `future` and return both its shared completion signal and a handle
/// to its output.
pub fn spawn_tracked<T, F>(future: F) -> (Completion, JoinHandle<Result<T>>)
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let output = future.await;
        let _ = tx.send(output.as_ref().map(|_| ()).map_err(Clone::clone));
        output
    });
    let completion = async move {
        rx.await
            .unwrap_or_else(|_| Err(SwError::internal("background task ended without a result")))
    }
    .boxed()
    .shared();
    (completion, handle)
}

/// A completion that is already resolved.
pub fn resolved() -> Completion {
    futures::future::ready(Ok(())).boxed().shared()
}

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Message,
}

struct EventInner {
    kind: EventKind,
    pending: Mutex<VecDeque<Completion>>,
    preload_response: Mutex<Option<Response>>,
}

/// An event whose lifetime can be extended by background work.
///
/// Cloning yields another handle to the same event.
#[derive(Clone)]
pub struct ExtendableEvent {
    inner: Arc<EventInner>,
}

impl ExtendableEvent {
    /// Create a new event of the given kind.
    pub fn new(kind: EventKind) -> Self {
        Self {
            inner: Arc::new(EventInner {
                kind,
                pending: Mutex::new(VecDeque::new()),
                preload_response: Mutex::new(None),
            }),
        }
    }

    pub fn install() -> Self {
        Self::new(EventKind::Install)
    }

    pub fn activate() -> Self {
        Self::new(EventKind::Activate)
    }

    pub fn fetch() -> Self {
        Self::new(EventKind::Fetch)
    }

    pub fn message() -> Self {
        Self::new(EventKind::Message)
    }

    pub fn kind(&self) -> EventKind {
        self.inner.kind
    }

    pub fn is_install(&self) -> bool {
        self.inner.kind == EventKind::Install
    }

    /// Keep the event alive until `completion` resolves.
    pub fn extend_lifetime(&self, completion: Completion) {
        self.inner.pending.lock().push_back(completion);
    }

    /// Spawn `future` and keep the event alive until it finishes.
    pub fn wait_until<F>(&self, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let (completion, _handle) = spawn_tracked(future);
        self.extend_lifetime(completion);
    }

    /// Number of registered units of work not yet drained by [`settled`](Self::settled).
    pub fn pending(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Wait for every registered unit of work, including work registered
    /// while waiting. Returns the first failure, after everything settled.
    pub async fn settled(&self) -> Result<()> {
        let mut first_error = None;
        loop {
            let next = self.inner.pending.lock().pop_front();
            let Some(completion) = next else { break };
            if let Err(err) = completion.await {
                warn!(kind = ?self.inner.kind, error = %err, "Extended lifetime work failed");
                first_error.get_or_insert(err);
            }
        }
        trace!(kind = ?self.inner.kind, "Event settled");
        first_error.map_or(Ok(()), Err)
    }

    /// Provide the navigation preload response started by the host.
    pub fn set_preload_response(&self, response: Response) {
        *self.inner.preload_response.lock() = Some(response);
    }

    /// The navigation preload response, if the host started one.
    pub fn preload_response(&self) -> Option<Response> {
        self.inner.preload_response.lock().clone()
    }
}

impl fmt::Debug for ExtendableEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendableEvent")
            .field("kind", &self.inner.kind)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Register `future` against `event` and return its output.
pub async fn wait_until<T, F>(event: &ExtendableEvent, future: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let (completion, handle) = spawn_tracked(future);
    event.extend_lifetime(completion);
    handle.await?
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    pub event: ExtendableEvent,
    pub client_id: Option<String>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            event: ExtendableEvent::fetch(),
            client_id: None,
        }
    }

    pub fn with_preload_response(self, response: Response) -> Self {
        self.event.set_preload_response(response);
        self
    }
}

/// An out-of-band control message posted to the worker.
#[derive(Debug)]
pub struct MessageEvent {
    pub data: serde_json::Value,
    pub event: ExtendableEvent,
    /// Reply channel, when the sender asked for an acknowledgment.
    pub reply: Option<oneshot::Sender<bool>>,
}

impl MessageEvent {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            event: ExtendableEvent::message(),
            reply: None,
        }
    }

    /// Create a message with a reply channel.
    pub fn with_reply(data: serde_json::Value) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let mut event = Self::new(data);
        event.reply = Some(tx);
        (event, rx)
    }
}
