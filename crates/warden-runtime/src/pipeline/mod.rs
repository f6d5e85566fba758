//! Per-run event dispatch.
//!
//! Every run owns one [`EventDispatchPipeline`]. Events arrive from the run's
//! execution loop and are handed to an [`EventHandler`]:
//!
//! - **Direct path**: the queue is idle and the event does not need to gate
//!   later events. The worker starts the handler in arrival order and, if it
//!   does not finish on its first poll, detaches the rest onto the shared
//!   [`BackgroundTracker`]. Failures are logged and never reach the event
//!   source.
//! - **Chained path**: something is already queued, or the event must block
//!   (tool execution start by default). The event is enqueued on the run's
//!   single-consumer queue and each unit finishes before the next begins.
//!
//! Both paths go through the same queue, so handlers always see one run's
//! events in the order they were dispatched.
//!
//! Safeguards are evaluated inside [`EventDispatchPipeline::dispatch`] on each
//! tool execution start and trip the run's [`AbortHandle`].

pub mod background;
pub mod safeguards;

pub use background::BackgroundTracker;
pub use safeguards::{SafeguardConfig, SafeguardTrip, Safeguards, args_fingerprint};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use warden_core::{RunEvent, SessionKey};

use crate::registry::AbortHandle;
use background::panic_message;

/// Error type returned by handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Called on every dispatched event, before any handling.
pub type ActivityHook = Arc<dyn Fn(&SessionKey) + Send + Sync>;

/// Consumer of one run's events.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event.
    async fn handle(&self, session_key: &SessionKey, event: RunEvent) -> Result<(), HandlerError>;

    /// Whether later events must wait until this one is handled.
    fn must_block(&self, event: &RunEvent) -> bool {
        event.is_tool_start()
    }
}

/// Handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl EventHandler for NoopHandler {
    async fn handle(
        &self,
        _session_key: &SessionKey,
        _event: RunEvent,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Which path [`EventDispatchPipeline::dispatch`] took.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchPath {
    /// Started in order, then fire-and-forget on the background pool.
    Direct,
    /// Serialized on the run's queue.
    Chained,
}

enum QueueItem {
    Detached(RunEvent, Arc<BackgroundTracker>),
    Event(RunEvent),
    Flush(oneshot::Sender<()>),
}

/// Orders and bounds one run's event stream.
pub struct EventDispatchPipeline {
    session_key: SessionKey,
    tx: mpsc::UnboundedSender<QueueItem>,
    in_flight: Arc<AtomicUsize>,
    handler: Arc<dyn EventHandler>,
    background: Arc<BackgroundTracker>,
    safeguards: Mutex<Safeguards>,
    abort: AbortHandle,
    on_activity: Option<ActivityHook>,
    worker: JoinHandle<()>,
}

impl EventDispatchPipeline {
    /// Create a pipeline and spawn its worker. Must be called within a tokio
    /// runtime.
    pub fn new(
        session_key: SessionKey,
        handler: Arc<dyn EventHandler>,
        abort: AbortHandle,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(run_worker(
            session_key.clone(),
            Arc::clone(&handler),
            rx,
            Arc::clone(&in_flight),
        ));
        Self {
            session_key,
            tx,
            in_flight,
            handler,
            background: Arc::new(BackgroundTracker::default()),
            safeguards: Mutex::new(Safeguards::new(SafeguardConfig::default())),
            abort,
            on_activity: None,
            worker,
        }
    }

    /// Use a shared background pool for the direct path.
    #[must_use]
    pub fn with_background(mut self, background: Arc<BackgroundTracker>) -> Self {
        self.background = background;
        self
    }

    /// Replace the safeguard thresholds.
    #[must_use]
    pub fn with_safeguards(mut self, config: SafeguardConfig) -> Self {
        self.safeguards = Mutex::new(Safeguards::new(config));
        self
    }

    /// Install a hook called on every event.
    #[must_use]
    pub fn with_activity_hook(mut self, hook: ActivityHook) -> Self {
        self.on_activity = Some(hook);
        self
    }

    /// The run this pipeline serves.
    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    /// Accept one event.
    pub fn dispatch(&self, event: RunEvent) -> DispatchPath {
        if let Some(hook) = &self.on_activity {
            hook(&self.session_key);
        }

        if let RunEvent::ToolExecutionStart { tool_name, args, .. } = &event {
            let trips = self.safeguards.lock().on_tool_start(tool_name, args);
            for trip in trips {
                warn!(session_key = %self.session_key, reason = %trip, "safeguard tripped");
                let _ = self.abort.abort(trip.to_string());
            }
        }

        if !self.handler.must_block(&event) && self.is_idle() {
            let item = QueueItem::Detached(event, Arc::clone(&self.background));
            if self.tx.send(item).is_err() {
                error!(session_key = %self.session_key, "dispatch worker gone, event dropped");
            }
            return DispatchPath::Direct;
        }

        let _ = self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(QueueItem::Event(event)).is_err() {
            let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
            error!(session_key = %self.session_key, "dispatch worker gone, event dropped");
        }
        DispatchPath::Chained
    }

    /// Wait until every event queued before this call has been handled.
    pub async fn flush(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(QueueItem::Flush(reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Wait for direct-path work, including events the worker has not
    /// started yet.
    pub async fn drain_background(&self) {
        self.flush().await;
        self.background.drain_all().await;
    }

    /// Chained units enqueued and not yet finished.
    pub fn pending_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether the chained queue is empty.
    pub fn is_idle(&self) -> bool {
        self.pending_count() == 0
    }

    /// Tool turns counted by the safeguards.
    pub fn turns(&self) -> u32 {
        self.safeguards.lock().turns()
    }

    /// Handle everything queued, then stop the worker.
    pub async fn close(self) {
        let Self { tx, worker, .. } = self;
        drop(tx);
        if let Err(e) = worker.await {
            error!(error = %e, "dispatch worker failed");
        }
    }
}

impl std::fmt::Debug for EventDispatchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatchPipeline")
            .field("session_key", &self.session_key)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    session_key: SessionKey,
    handler: Arc<dyn EventHandler>,
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    in_flight: Arc<AtomicUsize>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            QueueItem::Detached(event, background) => {
                let mut unit = Box::pin(handle_logged(
                    Arc::clone(&handler),
                    session_key.clone(),
                    event,
                ));
                // Run up to the first suspension point here so the next item
                // cannot overtake this one.
                if futures::poll!(unit.as_mut()).is_pending() {
                    background.spawn(unit);
                }
            }
            QueueItem::Event(event) => {
                handle_logged(Arc::clone(&handler), session_key.clone(), event).await;
                let _ = in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            QueueItem::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
    debug!(session_key = %session_key, "dispatch worker stopped");
}

async fn handle_logged(handler: Arc<dyn EventHandler>, session_key: SessionKey, event: RunEvent) {
    let event_type = event.event_type();
    match AssertUnwindSafe(handler.handle(&session_key, event))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(session_key = %session_key, event_type, error = %e, "event handler failed");
        }
        Err(panic) => {
            error!(
                session_key = %session_key,
                event_type,
                panic = panic_message(panic.as_ref()),
                "event handler panicked"
            );
        }
    }
}
