//! Actor References
//!
//! The only handle external code holds to an actor. It can name the actor
//! and send to it, nothing else; it never keeps a stopped actor alive.

use crate::error::{ActorError, Result};
use crate::mailbox::Mailbox;
use crate::messages::Msg;
use crate::registry::ActorId;
use std::fmt;
use std::sync::{Arc, Weak};

/// Something messages can be sent to
pub trait TellTarget {
    fn actor_id(&self) -> &ActorId;

    fn tell(&self, msg: Msg) -> Result<()>;

    fn tell_with_high_priority(&self, msg: Msg) -> Result<()>;
}

/// Non-owning proxy to a live actor
#[derive(Clone)]
pub struct ActorRef {
    id: ActorId,
    mailbox: Weak<Mailbox>,
}

impl ActorRef {
    pub(crate) fn new(mailbox: &Arc<Mailbox>) -> Self {
        Self {
            id: mailbox.id().clone(),
            mailbox: Arc::downgrade(mailbox),
        }
    }

    pub fn actor_id(&self) -> &ActorId {
        &self.id
    }

    /// Send a normal-priority message
    pub fn tell(&self, msg: Msg) -> Result<()> {
        self.send(msg, false)
    }

    /// Send a message that overtakes every queued normal message
    pub fn tell_with_high_priority(&self, msg: Msg) -> Result<()> {
        self.send(msg, true)
    }

    /// True until the actor is stopped
    pub fn is_alive(&self) -> bool {
        self.mailbox
            .upgrade()
            .map_or(false, |mailbox| !mailbox.is_stopping())
    }

    fn send(&self, msg: Msg, high_priority: bool) -> Result<()> {
        match self.mailbox.upgrade() {
            Some(mailbox) => mailbox.tell(msg, high_priority),
            None => Err(ActorError::not_registered(&self.id)),
        }
    }
}

impl TellTarget for ActorRef {
    fn actor_id(&self) -> &ActorId {
        ActorRef::actor_id(self)
    }

    fn tell(&self, msg: Msg) -> Result<()> {
        ActorRef::tell(self, msg)
    }

    fn tell_with_high_priority(&self, msg: Msg) -> Result<()> {
        ActorRef::tell_with_high_priority(self, msg)
    }
}

/// Two refs are equal when they point at the same actor instance
impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.mailbox, &other.mailbox)
    }
}

impl Eq for ActorRef {}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ActorMsg, StopReason};

    struct Hello;
    impl ActorMsg for Hello {}

    #[test]
    fn test_ref_equality_follows_instance() {
        let first = Mailbox::detached(ActorId::named("a"));
        let second = Mailbox::detached(ActorId::named("a"));

        let r1 = ActorRef::new(&first);
        assert_eq!(r1, r1.clone());
        assert_ne!(r1, ActorRef::new(&second));
        assert_eq!(r1.to_string(), "a");
    }

    #[test]
    fn test_tell_after_mailbox_dropped() {
        let mailbox = Mailbox::detached(ActorId::named("gone"));
        let actor_ref = ActorRef::new(&mailbox);
        assert!(actor_ref.is_alive());
        assert!(actor_ref.tell(Arc::new(Hello)).is_ok());

        drop(mailbox);
        assert!(!actor_ref.is_alive());
        let err = actor_ref.tell(Arc::new(Hello)).unwrap_err();
        assert!(matches!(err, ActorError::ActorNotRegistered { id } if id == ActorId::named("gone")));
    }

    #[test]
    fn test_tell_to_stopping_actor() {
        let mailbox = Mailbox::detached(ActorId::named("s"));
        let actor_ref = ActorRef::new(&mailbox);
        mailbox.request_destroy(StopReason::Stopped);
        assert!(!actor_ref.is_alive());
        assert!(actor_ref.tell_with_high_priority(Arc::new(Hello)).is_err());
    }
}
