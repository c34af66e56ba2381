//! # Bus Messages and the Subscriber Capability
//!
//! Messages are routed by their runtime type name. Every recipient gets an
//! independent copy produced by [`BusMessage::duplicate`], so mutating one
//! recipient's message can never leak into another's; each message type
//! declares how it copies instead of relying on a generic object-graph
//! cloner.

use crate::context::CallContext;
use crate::module::ModuleError;
use async_trait::async_trait;
use std::any::Any;

/// A message routable through the publish/subscribe bus.
pub trait BusMessage: Send + Sync + 'static {
    /// Routing key; subscribers register against this name.
    fn type_name(&self) -> &str;

    /// Produces the independent copy delivered to each recipient.
    fn duplicate(&self) -> Box<dyn BusMessage>;

    /// JSON payload for sessions subscribed to this type name. Returning
    /// `None` keeps the message server-internal and out of client mailboxes.
    fn client_payload(&self) -> Option<serde_json::Value> {
        None
    }

    /// Downcast support for typed handlers.
    fn as_any(&self) -> &dyn Any;
}

/// Subscriber capability implemented by a module.
///
/// `on_message` is invoked by exactly one dedicated worker per module and is
/// never run concurrently with itself; deliveries arrive in the order the
/// corresponding `send` calls enqueued them. The `origin` context is the one
/// captured at send time, not the worker's own, so any calls the handler
/// makes back into the server are attributed to the original caller.
#[async_trait]
pub trait MessageSubscriber: Send + Sync {
    async fn on_message(
        &self,
        message: &dyn BusMessage,
        origin: &CallContext,
    ) -> Result<(), ModuleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Ping {
        seq: u32,
    }

    impl BusMessage for Ping {
        fn type_name(&self) -> &str {
            "test.ping"
        }

        fn duplicate(&self) -> Box<dyn BusMessage> {
            Box::new(self.clone())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn duplicate_produces_independent_copy() {
        let original = Ping { seq: 1 };
        let copy = original.duplicate();
        let copy = copy.as_any().downcast_ref::<Ping>().expect("same type");
        assert_eq!(copy.seq, 1);
        assert_eq!(copy.type_name(), "test.ping");
    }

    #[test]
    fn default_client_payload_is_none() {
        let msg = Ping { seq: 2 };
        assert!(msg.client_payload().is_none());
    }
}
