//! Per-module subscription records.
//!
//! Each subscribing module owns exactly one queue and one dedicated worker,
//! which is what gives the bus its per-module FIFO guarantee: the worker
//! dequeues in enqueue order and never runs a handler concurrently with
//! itself. Messages sent while the owning module is still initializing sit in
//! the queue and are delivered once the worker starts.

use module_system::{BusMessage, CallContext, MessageSubscriber, ShutdownSignal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Envelope pairing a delivered copy with the context captured at send time.
pub(crate) struct Envelope {
    pub message: Box<dyn BusMessage>,
    pub origin: CallContext,
}

/// Start/stop state of a subscription record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Record exists, worker not yet started; enqueued messages buffer.
    Created,
    /// Worker is draining the queue.
    Started,
    /// Worker stopped; the record is about to be removed.
    Stopped,
}

pub(crate) struct Subscription {
    module: String,
    subscriber: Arc<dyn MessageSubscriber>,
    tx: mpsc::UnboundedSender<Envelope>,
    // Held until start() hands it to the worker.
    rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    cancel: ShutdownSignal,
    // Set during stop so the worker drops queued-but-undelivered messages.
    discard: Arc<AtomicBool>,
    state: Mutex<SubscriptionState>,
}

impl Subscription {
    pub fn new(module: &str, subscriber: Arc<dyn MessageSubscriber>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            module: module.to_string(),
            subscriber,
            tx,
            rx: Mutex::new(Some(rx)),
            worker: tokio::sync::Mutex::new(None),
            cancel: ShutdownSignal::new(),
            discard: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(SubscriptionState::Created),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.lock().expect("subscription state lock poisoned")
    }

    /// Queues an envelope for delivery. Returns false once the subscription
    /// has stopped.
    pub fn enqueue(&self, envelope: Envelope) -> bool {
        if self.state() == SubscriptionState::Stopped {
            return false;
        }
        self.tx.send(envelope).is_ok()
    }

    /// Starts the dedicated worker. Idempotent; the second call is a no-op.
    pub async fn start(&self) {
        let receiver = self.rx.lock().expect("subscription rx lock poisoned").take();
        let Some(mut rx) = receiver else {
            return;
        };
        *self.state.lock().expect("subscription state lock poisoned") =
            SubscriptionState::Started;

        let module = self.module.clone();
        let subscriber = Arc::clone(&self.subscriber);
        let cancel = self.cancel.clone();
        let discard = Arc::clone(&self.discard);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.wait() => break,
                    next = rx.recv() => match next {
                        Some(envelope) => {
                            if discard.load(Ordering::Acquire) {
                                continue;
                            }
                            let message_type = envelope.message.type_name().to_string();
                            if let Err(err) = subscriber
                                .on_message(envelope.message.as_ref(), &envelope.origin)
                                .await
                            {
                                // Contained at the worker boundary; other
                                // subscribers and the sender are unaffected.
                                error!(
                                    module = %module,
                                    message_type = %message_type,
                                    "subscriber handler failed: {err}"
                                );
                            }
                        }
                        None => break,
                    }
                }
            }
            // Queued-but-undelivered messages are dropped on shutdown.
            while rx.try_recv().is_ok() {}
            debug!(module = %module, "subscription worker exited");
        });

        *self.worker.lock().await = Some(handle);
    }

    /// Stops the worker: discard pending deliveries, signal cancellation,
    /// wait up to `timeout`. Returns false when the worker overran the bound
    /// (logged, never escalated).
    pub async fn stop(&self, timeout: Duration) -> bool {
        *self.state.lock().expect("subscription state lock poisoned") =
            SubscriptionState::Stopped;
        self.discard.store(true, Ordering::Release);
        self.cancel.trigger();

        let handle = self.worker.lock().await.take();
        match handle {
            Some(handle) => match tokio::time::timeout(timeout, handle).await {
                Ok(_) => true,
                Err(_) => {
                    warn!(
                        module = %self.module,
                        timeout_ms = timeout.as_millis() as u64,
                        "subscription worker did not stop within the unload timeout"
                    );
                    false
                }
            },
            None => {
                // Worker never started; dropping the receiver clears the queue.
                self.rx.lock().expect("subscription rx lock poisoned").take();
                true
            }
        }
    }
}
