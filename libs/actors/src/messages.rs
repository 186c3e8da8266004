//! Actor Message Capability
//!
//! The runtime never inspects message contents. It only needs a message
//! to be shareable across worker threads, to name its type for logs, and
//! to hear about it when delivery became impossible because the target
//! stopped.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared message handle passed through mailboxes.
///
/// Broadcasts hand the same `Arc` to every recipient.
pub type Msg = Arc<dyn ActorMsg>;

/// Why an actor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// Actor failed to initialize and gave up
    InitFailed,
    /// Actor was stopped explicitly or with its parent
    Stopped,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::InitFailed => f.write_str("init_failed"),
            StopReason::Stopped => f.write_str("stopped"),
        }
    }
}

/// Type erasure helper implemented for every `'static` message type
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Message trait for the actor runtime
pub trait ActorMsg: AsAny + Send + Sync + 'static {
    /// Message type name used in logs
    fn msg_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Called when the message will never be processed because its
    /// target stopped
    fn on_actor_stopped(&self, _reason: StopReason) {}
}

impl dyn ActorMsg {
    /// Check the concrete message type
    pub fn is<T: ActorMsg>(&self) -> bool {
        AsAny::as_any(self).is::<T>()
    }

    /// Borrow as a concrete message type
    pub fn downcast_ref<T: ActorMsg>(&self) -> Option<&T> {
        AsAny::as_any(self).downcast_ref::<T>()
    }
}

impl fmt::Debug for dyn ActorMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorMsg").field("type", &self.msg_type()).finish()
    }
}
