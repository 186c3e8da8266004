//! Actor Context
//!
//! Capability object handed to a running actor. Extends the reference
//! contract with its own identity, its parent, and control over its own
//! direct children only.
//!
//! A context is bound to one actor instance. Once that instance starts
//! stopping, child management through it fails with `ActorNotRegistered`
//! even if a new actor has since registered under the same id.

use crate::actor::ActorCreator;
use crate::actor_ref::{ActorRef, TellTarget};
use crate::error::{ActorError, Result};
use crate::mailbox::Mailbox;
use crate::messages::{Msg, StopReason};
use crate::registry::ActorId;
use crate::scheduler::ScheduledTask;
use crate::system::ActorSystem;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct ActorCtx {
    mailbox: Arc<Mailbox>,
    system: ActorSystem,
}

impl ActorCtx {
    pub(crate) fn new(mailbox: Arc<Mailbox>, system: ActorSystem) -> Self {
        Self { mailbox, system }
    }

    pub fn self_id(&self) -> &ActorId {
        self.mailbox.id()
    }

    pub fn self_ref(&self) -> ActorRef {
        ActorRef::new(&self.mailbox)
    }

    pub fn parent_id(&self) -> Option<&ActorId> {
        self.mailbox.parent()
    }

    /// Reference to the parent, `None` for roots, a parent already gone,
    /// or once this actor is stopping
    pub fn parent_ref(&self) -> Option<ActorRef> {
        if self.mailbox.is_stopping() {
            return None;
        }
        self.mailbox
            .parent()
            .and_then(|parent| self.system.get_actor(parent))
    }

    fn ensure_live(&self) -> Result<()> {
        if self.mailbox.is_stopping() {
            return Err(ActorError::not_registered(self.self_id()));
        }
        Ok(())
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    pub fn dispatcher_name(&self) -> &str {
        self.mailbox.dispatcher_name()
    }

    /// Send to self
    pub fn tell(&self, msg: Msg) -> Result<()> {
        self.mailbox.tell(msg, false)
    }

    /// Send to self ahead of queued normal messages
    pub fn tell_with_high_priority(&self, msg: Msg) -> Result<()> {
        self.mailbox.tell(msg, true)
    }

    /// Send to any actor by identity
    pub fn tell_actor(&self, target: &ActorId, msg: Msg) -> Result<()> {
        self.system.tell(target, msg)
    }

    pub fn tell_actor_with_high_priority(&self, target: &ActorId, msg: Msg) -> Result<()> {
        self.system.tell_with_high_priority(target, msg)
    }

    /// Deliver `msg` to this instance after `delay`, e.g. for retry
    /// backoff. Dropped if the instance stopped meanwhile.
    pub fn tell_self_with_delay(&self, msg: Msg, delay: Duration) -> ScheduledTask {
        let mailbox = Arc::downgrade(&self.mailbox);
        let id = self.self_id().clone();
        self.system.scheduler().schedule_once(delay, move || {
            let delivered = match mailbox.upgrade() {
                Some(mailbox) => mailbox.tell(msg, false),
                None => {
                    msg.on_actor_stopped(StopReason::Stopped);
                    Err(ActorError::not_registered(&id))
                }
            };
            if let Err(e) = delivered {
                debug!(actor_id = %id, error = %e, "Delayed message dropped");
            }
        })
    }

    /// Existing child `id`, or a new one built by the suppliers
    pub fn get_or_create_child_actor<D, F, C>(
        &self,
        id: &ActorId,
        dispatcher: D,
        creator: F,
    ) -> Result<ActorRef>
    where
        D: FnOnce() -> String,
        F: FnOnce() -> C,
        C: ActorCreator,
    {
        self.ensure_live()?;
        self.system
            .get_or_create_child(self.self_id(), Some(&self.mailbox), id, dispatcher, creator)
    }

    pub fn create_child_actor<C: ActorCreator>(&self, dispatcher: &str, creator: C) -> Result<ActorRef> {
        self.ensure_live()?;
        self.system.create_child_of(&self.mailbox, dispatcher, creator)
    }

    /// Stop one of this actor's direct children and its subtree
    pub fn stop(&self, child: &ActorId) -> Result<()> {
        self.ensure_live()?;
        self.system.stop_child(&self.mailbox, child)
    }

    /// Stop this instance and its subtree. A successor registered under
    /// the same id is not affected.
    pub fn stop_self(&self) {
        self.system.stop_instance(&self.mailbox, StopReason::Stopped);
    }

    /// Send `msg` to every direct child; returns how many accepted it
    pub fn broadcast_to_children(&self, msg: Msg) -> Result<usize> {
        self.broadcast_to_children_filtered(msg, |_| true)
    }

    pub fn broadcast_to_children_filtered<P>(&self, msg: Msg, filter: P) -> Result<usize>
    where
        P: Fn(&ActorId) -> bool,
    {
        self.ensure_live()?;
        self.system.broadcast_from(&self.mailbox, msg, &filter)
    }

    pub fn filter_children<P>(&self, filter: P) -> Result<Vec<ActorId>>
    where
        P: Fn(&ActorId) -> bool,
    {
        self.ensure_live()?;
        self.system.filter_children_of(&self.mailbox, &filter)
    }
}

impl TellTarget for ActorCtx {
    fn actor_id(&self) -> &ActorId {
        self.self_id()
    }

    fn tell(&self, msg: Msg) -> Result<()> {
        ActorCtx::tell(self, msg)
    }

    fn tell_with_high_priority(&self, msg: Msg) -> Result<()> {
        ActorCtx::tell_with_high_priority(self, msg)
    }
}

impl std::fmt::Debug for ActorCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorCtx")
            .field("self", self.self_id())
            .field("parent", &self.parent_id())
            .finish()
    }
}
