//! The bus façade: registry plus subscription records plus the session tap.

use crate::error::BusError;
use crate::registry::SubscriberRegistry;
use crate::subscription::{Envelope, Subscription, SubscriptionState};
use dashmap::DashMap;
use module_system::{BusMessage, CallContext, MessageSubscriber, ServerState};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};

/// Current coarse server state, supplied by the host so the bus can reject
/// operations outside their valid window.
pub trait ServerStateProbe: Send + Sync {
    fn current(&self) -> ServerState;
}

/// Registry transition notifications.
///
/// `on_first_subscriber` fires when a type gains its first member,
/// `on_last_unsubscriber` when a type's set becomes empty again. Hooks are
/// invoked synchronously on the subscribing call.
pub trait BusHook: Send + Sync {
    fn on_first_subscriber(&self, _message_type: &str) {}
    fn on_last_unsubscriber(&self, _message_type: &str) {}
}

/// Mailbox tap for server-visible messages, implemented by the session
/// manager. Invoked once per send, after module fan-out.
pub trait SessionSink: Send + Sync {
    fn deliver(&self, type_name: &str, payload: serde_json::Value);
}

/// The publish/subscribe message bus.
pub struct MessageBus {
    registry: SubscriberRegistry,
    subscriptions: DashMap<String, Arc<Subscription>>,
    hooks: RwLock<Vec<Arc<dyn BusHook>>>,
    session_sink: RwLock<Option<Arc<dyn SessionSink>>>,
    state_probe: RwLock<Option<Arc<dyn ServerStateProbe>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            registry: SubscriberRegistry::new(),
            subscriptions: DashMap::new(),
            hooks: RwLock::new(Vec::new()),
            session_sink: RwLock::new(None),
            state_probe: RwLock::new(None),
        }
    }

    /// Installs the host's state probe. Without one the bus assumes Started,
    /// which is only appropriate in tests.
    pub fn set_state_probe(&self, probe: Arc<dyn ServerStateProbe>) {
        *self.state_probe.write().expect("state probe lock poisoned") = Some(probe);
    }

    pub fn add_hook(&self, hook: Arc<dyn BusHook>) {
        self.hooks.write().expect("bus hook lock poisoned").push(hook);
    }

    pub fn set_session_sink(&self, sink: Arc<dyn SessionSink>) {
        *self.session_sink.write().expect("session sink lock poisoned") = Some(sink);
    }

    fn state(&self) -> ServerState {
        self.state_probe
            .read()
            .expect("state probe lock poisoned")
            .as_ref()
            .map(|p| p.current())
            .unwrap_or(ServerState::Started)
    }

    /// Creates the subscription record for a module entering its
    /// Initializing phase. Messages sent before the worker starts buffer in
    /// the queue.
    pub fn register_subscription(&self, module: &str, subscriber: Arc<dyn MessageSubscriber>) {
        debug!(module = %module, "creating bus subscription");
        self.subscriptions
            .insert(module.to_string(), Arc::new(Subscription::new(module, subscriber)));
    }

    /// Starts the module's worker once the module reached Initialized.
    pub async fn start_subscription(&self, module: &str) -> Result<(), BusError> {
        let subscription = self
            .subscriptions
            .get(module)
            .map(|s| s.clone())
            .ok_or_else(|| BusError::UnknownSubscription(module.to_string()))?;
        subscription.start().await;
        debug!(module = %module, "bus subscription started");
        Ok(())
    }

    /// Stops the module's worker at Uninitializing. `Ok(false)` means the
    /// worker overran the unload timeout.
    pub async fn stop_subscription(
        &self,
        module: &str,
        timeout: Duration,
    ) -> Result<bool, BusError> {
        let subscription = self
            .subscriptions
            .get(module)
            .map(|s| s.clone())
            .ok_or_else(|| BusError::UnknownSubscription(module.to_string()))?;
        Ok(subscription.stop(timeout).await)
    }

    /// Drops the subscription record and every registry entry for the module
    /// at Uninitialized, firing last-unsubscriber notifications for sets
    /// that became empty.
    pub fn remove_subscription(&self, module: &str) {
        for message_type in self.registry.remove_module(module) {
            self.notify_last(&message_type);
        }
        if self.subscriptions.remove(module).is_some() {
            debug!(module = %module, "bus subscription removed");
        }
    }

    /// Whether a module currently holds a subscription record.
    pub fn is_subscriber(&self, module: &str) -> bool {
        self.subscriptions.contains_key(module)
    }

    pub fn subscription_state(&self, module: &str) -> Option<SubscriptionState> {
        self.subscriptions.get(module).map(|s| s.state())
    }

    /// Subscribes the acting module to a message type. Valid only while the
    /// server is Starting or Started and the module is a registered
    /// subscriber.
    pub fn subscribe(&self, origin: &CallContext, message_type: &str) -> Result<(), BusError> {
        let state = self.state();
        if !matches!(state, ServerState::Starting | ServerState::Started) {
            return Err(BusError::InvalidState {
                operation: "subscribe",
                state,
            });
        }
        let module = origin
            .module_name()
            .ok_or_else(|| BusError::NotSubscriber("<host>".to_string()))?;
        if !self.is_subscriber(module) {
            return Err(BusError::NotSubscriber(module.to_string()));
        }

        if self.registry.subscribe(message_type, module) {
            info!(message_type = %message_type, module = %module, "first subscriber for type");
            for hook in self.hooks.read().expect("bus hook lock poisoned").iter() {
                hook.on_first_subscriber(message_type);
            }
        }
        Ok(())
    }

    /// Removes the acting module's subscription to a message type. Valid
    /// unless the server is Stopped.
    pub fn unsubscribe(&self, origin: &CallContext, message_type: &str) -> Result<(), BusError> {
        let state = self.state();
        if state == ServerState::Stopped {
            return Err(BusError::InvalidState {
                operation: "unsubscribe",
                state,
            });
        }
        let module = origin
            .module_name()
            .ok_or_else(|| BusError::NotSubscriber("<host>".to_string()))?;

        if self.registry.unsubscribe(message_type, module) {
            info!(message_type = %message_type, module = %module, "last unsubscriber for type");
            self.notify_last(message_type);
        }
        Ok(())
    }

    fn notify_last(&self, message_type: &str) {
        for hook in self.hooks.read().expect("bus hook lock poisoned").iter() {
            hook.on_last_unsubscriber(message_type);
        }
    }

    /// Publishes a message.
    ///
    /// Captures the sender's context, fans out an independent copy to every
    /// subscribed module passing the filter, and forwards client-visible
    /// payloads to the session sink. Returns the number of module queues the
    /// message reached.
    pub fn send(
        &self,
        origin: &CallContext,
        message: &dyn BusMessage,
        filter: Option<&dyn Fn(&str) -> bool>,
    ) -> Result<usize, BusError> {
        let state = self.state();
        if state == ServerState::Stopped {
            return Err(BusError::InvalidState {
                operation: "send",
                state,
            });
        }

        let message_type = message.type_name();
        let mut queued = 0usize;
        for member in self.registry.snapshot(message_type) {
            if let Some(filter) = filter {
                if !filter(&member) {
                    continue;
                }
            }
            let Some(subscription) = self.subscriptions.get(&member).map(|s| s.clone()) else {
                continue;
            };
            let envelope = Envelope {
                message: message.duplicate(),
                origin: origin.clone(),
            };
            if subscription.enqueue(envelope) {
                queued += 1;
            }
        }

        if let Some(payload) = message.client_payload() {
            let sink = self
                .session_sink
                .read()
                .expect("session sink lock poisoned")
                .clone();
            if let Some(sink) = sink {
                sink.deliver(message_type, payload);
            }
        }

        Ok(queued)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use module_system::{async_trait, ModuleError};
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone)]
    struct Tick {
        label: String,
        visible: bool,
    }

    impl BusMessage for Tick {
        fn type_name(&self) -> &str {
            "test.tick"
        }
        fn duplicate(&self) -> Box<dyn BusMessage> {
            Box::new(self.clone())
        }
        fn client_payload(&self) -> Option<serde_json::Value> {
            self.visible
                .then(|| serde_json::json!({ "label": self.label }))
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Collector {
        labels: Mutex<Vec<String>>,
        origins: Mutex<Vec<Option<String>>>,
        notify: tokio::sync::Notify,
    }

    impl Collector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                labels: Mutex::new(Vec::new()),
                origins: Mutex::new(Vec::new()),
                notify: tokio::sync::Notify::new(),
            })
        }

        async fn wait_for(&self, count: usize) {
            while self.labels.lock().unwrap().len() < count {
                self.notify.notified().await;
            }
        }
    }

    #[async_trait]
    impl MessageSubscriber for Collector {
        async fn on_message(
            &self,
            message: &dyn BusMessage,
            origin: &CallContext,
        ) -> Result<(), ModuleError> {
            let tick = message.as_any().downcast_ref::<Tick>().unwrap();
            // Mutating our copy must not leak into other recipients.
            let mut label = tick.label.clone();
            label.push_str("-seen");
            self.labels.lock().unwrap().push(label);
            self.origins
                .lock()
                .unwrap()
                .push(origin.module_name().map(str::to_string));
            self.notify.notify_one();
            Ok(())
        }
    }

    async fn subscribed_bus(modules: &[&str]) -> (MessageBus, Vec<Arc<Collector>>) {
        let bus = MessageBus::new();
        let mut collectors = Vec::new();
        for module in modules {
            let collector = Collector::new();
            bus.register_subscription(module, collector.clone());
            bus.start_subscription(module).await.unwrap();
            bus.subscribe(&CallContext::for_module(module), "test.tick")
                .unwrap();
            collectors.push(collector);
        }
        (bus, collectors)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn send_fans_out_independent_copies_with_sender_context() {
        let (bus, collectors) = subscribed_bus(&["m1", "m2"]).await;

        let sender = CallContext::for_module("m1");
        let queued = bus
            .send(
                &sender,
                &Tick {
                    label: "a".to_string(),
                    visible: false,
                },
                None,
            )
            .unwrap();
        assert_eq!(queued, 2);

        for collector in &collectors {
            collector.wait_for(1).await;
            assert_eq!(*collector.labels.lock().unwrap(), vec!["a-seen"]);
            assert_eq!(
                *collector.origins.lock().unwrap(),
                vec![Some("m1".to_string())]
            );
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn filter_excludes_recipients() {
        let (bus, collectors) = subscribed_bus(&["m1", "m2"]).await;

        let exclude_m1 = |member: &str| member != "m1";
        let queued = bus
            .send(
                &CallContext::system(),
                &Tick {
                    label: "b".to_string(),
                    visible: false,
                },
                Some(&exclude_m1),
            )
            .unwrap();
        assert_eq!(queued, 1);

        collectors[1].wait_for(1).await;
        assert!(collectors[0].labels.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fifo_per_subscriber_across_sends() {
        let (bus, collectors) = subscribed_bus(&["m1"]).await;

        for label in ["1", "2", "3", "4"] {
            bus.send(
                &CallContext::system(),
                &Tick {
                    label: label.to_string(),
                    visible: false,
                },
                None,
            )
            .unwrap();
        }

        collectors[0].wait_for(4).await;
        assert_eq!(
            *collectors[0].labels.lock().unwrap(),
            vec!["1-seen", "2-seen", "3-seen", "4-seen"]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn first_and_last_subscriber_hooks_fire() {
        struct Counter {
            first: AtomicUsize,
            last: AtomicUsize,
        }
        impl BusHook for Counter {
            fn on_first_subscriber(&self, _message_type: &str) {
                self.first.fetch_add(1, Ordering::SeqCst);
            }
            fn on_last_unsubscriber(&self, _message_type: &str) {
                self.last.fetch_add(1, Ordering::SeqCst);
            }
        }

        let bus = MessageBus::new();
        let counter = Arc::new(Counter {
            first: AtomicUsize::new(0),
            last: AtomicUsize::new(0),
        });
        bus.add_hook(counter.clone());

        for module in ["m1", "m2"] {
            bus.register_subscription(module, Collector::new());
            bus.start_subscription(module).await.unwrap();
            bus.subscribe(&CallContext::for_module(module), "test.tick")
                .unwrap();
        }
        assert_eq!(counter.first.load(Ordering::SeqCst), 1);

        bus.unsubscribe(&CallContext::for_module("m1"), "test.tick")
            .unwrap();
        assert_eq!(counter.last.load(Ordering::SeqCst), 0);
        bus.unsubscribe(&CallContext::for_module("m2"), "test.tick")
            .unwrap();
        assert_eq!(counter.last.load(Ordering::SeqCst), 1);

        for module in ["m1", "m2"] {
            assert!(bus
                .stop_subscription(module, Duration::from_secs(1))
                .await
                .unwrap());
            bus.remove_subscription(module);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn client_visible_payload_reaches_session_sink() {
        struct Tap {
            delivered: Mutex<Vec<(String, serde_json::Value)>>,
        }
        impl SessionSink for Tap {
            fn deliver(&self, type_name: &str, payload: serde_json::Value) {
                self.delivered
                    .lock()
                    .unwrap()
                    .push((type_name.to_string(), payload));
            }
        }

        let bus = MessageBus::new();
        let tap = Arc::new(Tap {
            delivered: Mutex::new(Vec::new()),
        });
        bus.set_session_sink(tap.clone());

        bus.send(
            &CallContext::system(),
            &Tick {
                label: "hello".to_string(),
                visible: true,
            },
            None,
        )
        .unwrap();
        bus.send(
            &CallContext::system(),
            &Tick {
                label: "internal".to_string(),
                visible: false,
            },
            None,
        )
        .unwrap();

        let delivered = tap.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "test.tick");
        assert_eq!(delivered[0].1, serde_json::json!({ "label": "hello" }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn worker_control_requires_an_existing_record() {
        let bus = MessageBus::new();

        let err = bus.start_subscription("ghost").await.unwrap_err();
        assert!(matches!(err, BusError::UnknownSubscription(name) if name == "ghost"));

        let err = bus
            .stop_subscription("ghost", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownSubscription(name) if name == "ghost"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribe_requires_registered_subscriber() {
        let bus = MessageBus::new();
        let err = bus
            .subscribe(&CallContext::for_module("ghost"), "test.tick")
            .unwrap_err();
        assert!(matches!(err, BusError::NotSubscriber(name) if name == "ghost"));
    }
}
