//! Actor Capability
//!
//! The single abstraction the runtime drives. Every hook runs on a pool
//! worker with the mailbox held busy, so an actor never sees two of its
//! own hooks at once and needs no internal locking.

use crate::context::ActorCtx;
use crate::error::{ActorError, Result};
use crate::messages::Msg;
use crate::registry::ActorId;
use crate::supervision::{InitFailureStrategy, SupervisorDirective};
use tracing::error;

/// Trait for actor behavior
pub trait Actor: Send + 'static {
    /// Handle incoming message
    fn process(&mut self, ctx: &ActorCtx, msg: Msg) -> Result<()>;

    /// Called before the first message and on restart
    fn init(&mut self, _ctx: &ActorCtx) -> Result<()> {
        Ok(())
    }

    /// Called once when the actor stops, and before a restart
    fn destroy(&mut self) {}

    /// Decide what happens after `init` failed on attempt `attempt`
    fn on_init_failure(&mut self, _attempt: u32, _error: &ActorError) -> InitFailureStrategy {
        InitFailureStrategy::Retry
    }

    /// Decide what happens after `process` failed or panicked
    fn on_process_failure(&mut self, ctx: &ActorCtx, error: &ActorError) -> SupervisorDirective {
        error!(
            actor_id = %ctx.self_id(),
            error = %error,
            "Actor processing failed, escalating"
        );
        SupervisorDirective::Escalate
    }

    /// Decide what happens to a direct child that escalated a failure
    fn on_child_failure(
        &mut self,
        _ctx: &ActorCtx,
        _child: &ActorId,
        _error: &ActorError,
    ) -> SupervisorDirective {
        SupervisorDirective::Resume
    }
}

/// Supplies the identity and instance of an actor about to be created
pub trait ActorCreator: Send + 'static {
    /// Identity the new actor will be registered under
    fn actor_id(&self) -> ActorId;

    /// Build the actor instance
    fn create_actor(self: Box<Self>) -> Box<dyn Actor>;
}

/// Creator backed by a factory closure
pub struct FnCreator<F> {
    id: ActorId,
    factory: F,
}

impl<A, F> ActorCreator for FnCreator<F>
where
    A: Actor,
    F: FnOnce() -> A + Send + 'static,
{
    fn actor_id(&self) -> ActorId {
        self.id.clone()
    }

    fn create_actor(self: Box<Self>) -> Box<dyn Actor> {
        Box::new((self.factory)())
    }
}

/// Build a creator from an id and a factory closure
pub fn creator<A, F>(id: impl Into<ActorId>, factory: F) -> FnCreator<F>
where
    A: Actor,
    F: FnOnce() -> A + Send + 'static,
{
    FnCreator {
        id: id.into(),
        factory,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Actor for Noop {
        fn process(&mut self, _ctx: &ActorCtx, _msg: Msg) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_fn_creator() {
        let creator = creator("noop", || Noop);
        assert_eq!(creator.actor_id(), ActorId::named("noop"));

        let boxed: Box<dyn ActorCreator> = Box::new(creator);
        let mut actor = boxed.create_actor();
        let err = ActorError::processing("x");
        assert_eq!(actor.on_init_failure(1, &err), InitFailureStrategy::Retry);
    }
}
