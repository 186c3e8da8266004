//! Actor Mailbox
//!
//! Owns one actor's pending messages and its execution slot. Any thread
//! may enqueue; only the worker holding the busy flag touches the actor.
//!
//! # Scheduling protocol
//!
//! ```text
//!  enqueue ──► push ──► fence ──► CAS busy false→true ──► submit drain
//!                                      │ (lost)
//!                                      ▼
//!                            running drain will see it
//!
//!  drain ──► up to `throughput` messages ──► store busy=false ──► fence
//!        ──► pending work? ──► CAS busy false→true ──► submit drain
//! ```
//!
//! The re-check after releasing the busy flag closes the window where a
//! message lands after the last pop but before the release. The mailbox
//! is born busy: the init task owns it until `Actor::init` succeeds.

use crate::actor::Actor;
use crate::config::ActorSystemSettings;
use crate::context::ActorCtx;
use crate::dispatcher::Dispatcher;
use crate::error::{ActorError, Result};
use crate::messages::{Msg, StopReason};
use crate::registry::ActorId;
use crate::supervision::{InitFailureStrategy, RestartTracker, SupervisorDirective};
use crate::system::{ActorSystem, SystemInner};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Queue element
pub(crate) enum Envelope {
    /// Application message
    User(Msg),
    /// A direct child escalated a failure
    ChildFailed {
        child: ActorId,
        /// The exact instance that failed; its id may be reused later
        instance: Weak<Mailbox>,
        error: ActorError,
    },
    /// Parent asked this actor to restart
    Restart,
}

/// Per-actor mailbox
pub struct Mailbox {
    id: ActorId,
    parent: Option<ActorId>,
    dispatcher: Arc<Dispatcher>,
    system: Weak<SystemInner>,

    actor: Mutex<Box<dyn Actor>>,
    restarts: RestartTracker,
    throughput: usize,
    max_init_attempts: u32,
    init_retry_delay: Duration,

    high_tx: Sender<Envelope>,
    high_rx: Receiver<Envelope>,
    normal_tx: Sender<Envelope>,
    normal_rx: Receiver<Envelope>,

    busy: AtomicBool,
    ready: AtomicBool,
    destroy_requested: AtomicBool,
    destroyed: AtomicBool,
    stop_reason: Mutex<Option<StopReason>>,
    destroyed_signal: (Mutex<bool>, Condvar),
}

impl Mailbox {
    pub(crate) fn new(
        id: ActorId,
        parent: Option<ActorId>,
        dispatcher: Arc<Dispatcher>,
        system: Weak<SystemInner>,
        settings: &ActorSystemSettings,
        actor: Box<dyn Actor>,
    ) -> Arc<Self> {
        let (high_tx, high_rx) = unbounded();
        let (normal_tx, normal_rx) = unbounded();
        Arc::new(Self {
            id,
            parent,
            dispatcher,
            system,
            actor: Mutex::new(actor),
            restarts: RestartTracker::new(settings.max_restarts, settings.restart_window()),
            throughput: settings.actor_throughput.max(1),
            max_init_attempts: settings.max_actor_init_attempts.max(1),
            init_retry_delay: settings.init_retry_delay(),
            high_tx,
            high_rx,
            normal_tx,
            normal_rx,
            busy: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            destroy_requested: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            stop_reason: Mutex::new(None),
            destroyed_signal: (Mutex::new(false), Condvar::new()),
        })
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub fn parent(&self) -> Option<&ActorId> {
        self.parent.as_ref()
    }

    pub fn dispatcher_name(&self) -> &str {
        self.dispatcher.name()
    }

    /// True once a stop was requested; new messages are refused
    pub fn is_stopping(&self) -> bool {
        self.destroy_requested.load(Ordering::Acquire)
    }

    /// True once `Actor::init` succeeded and the actor is not stopped
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.stop_reason.lock()
    }

    pub(crate) fn pending(&self) -> usize {
        self.high_rx.len() + self.normal_rx.len()
    }

    /// Submit the first init attempt
    pub(crate) fn start(self: &Arc<Self>) {
        self.submit_init(1);
    }

    /// Queue a user message
    pub(crate) fn tell(self: &Arc<Self>, msg: Msg, high_priority: bool) -> Result<()> {
        self.enqueue(Envelope::User(msg), high_priority)
    }

    pub(crate) fn enqueue(self: &Arc<Self>, envelope: Envelope, high_priority: bool) -> Result<()> {
        if self.is_stopping() {
            self.drop_envelope(envelope);
            return Err(ActorError::not_registered(&self.id));
        }

        let queue = if high_priority {
            &self.high_tx
        } else {
            &self.normal_tx
        };
        // Receivers live as long as the mailbox, so send cannot fail
        if let Err(err) = queue.send(envelope) {
            self.drop_envelope(err.into_inner());
            return Err(ActorError::not_registered(&self.id));
        }

        if let Some(system) = self.system.upgrade() {
            system.metrics.record_enqueued(high_priority);
        }

        // Raced with destroy: nobody will drain these any more
        if self.is_destroyed() {
            self.discard_pending();
            return Ok(());
        }

        fence(Ordering::SeqCst);
        self.try_schedule();
        Ok(())
    }

    /// Request asynchronous destruction; idempotent
    pub(crate) fn request_destroy(self: &Arc<Self>, reason: StopReason) {
        {
            let mut stop_reason = self.stop_reason.lock();
            if stop_reason.is_none() {
                *stop_reason = Some(reason);
            }
        }
        if self.destroy_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(actor_id = %self.id, reason = %reason, "Actor destroy requested");
        fence(Ordering::SeqCst);
        self.try_schedule();
    }

    /// Block until `Actor::destroy` ran or `deadline` passed
    pub(crate) fn wait_destroyed(&self, deadline: Instant) -> bool {
        let (lock, signal) = &self.destroyed_signal;
        let mut done = lock.lock();
        while !*done {
            if signal.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }

    fn has_pending_work(&self) -> bool {
        if self.is_destroyed() {
            return false;
        }
        if self.is_stopping() {
            return true;
        }
        self.is_ready() && (!self.high_rx.is_empty() || !self.normal_rx.is_empty())
    }

    fn try_schedule(self: &Arc<Self>) {
        if self.has_pending_work()
            && self
                .busy
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.submit_drain();
        }
    }

    /// Give up the execution slot and re-arm if work slipped in
    fn release(self: &Arc<Self>) {
        self.busy.store(false, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        self.try_schedule();
    }

    fn submit_drain(self: &Arc<Self>) {
        let mailbox = Arc::clone(self);
        self.dispatcher.execute(Box::new(move || mailbox.drain()));
    }

    fn submit_init(self: &Arc<Self>, attempt: u32) {
        let mailbox = Arc::clone(self);
        self.dispatcher
            .execute(Box::new(move || mailbox.run_init(attempt)));
    }

    fn system(&self) -> Option<ActorSystem> {
        self.system.upgrade().map(ActorSystem::from_inner)
    }

    fn context(self: &Arc<Self>, system: ActorSystem) -> ActorCtx {
        ActorCtx::new(Arc::clone(self), system)
    }

    fn run_init(self: &Arc<Self>, attempt: u32) {
        let system = match self.system() {
            Some(system) => system,
            None => {
                self.discard_pending();
                return;
            }
        };
        if self.is_stopping() {
            self.destroy_now(&system);
            self.release();
            return;
        }

        let ctx = self.context(system.clone());
        let mut actor = self.actor.lock();
        let result = catch_unwind(AssertUnwindSafe(|| actor.init(&ctx)))
            .unwrap_or_else(|payload| Err(ActorError::from_panic(&self.id, payload)));

        match result {
            Ok(()) => {
                drop(actor);
                self.ready.store(true, Ordering::SeqCst);
                debug!(actor_id = %self.id, attempt, "Actor initialized");
                self.release();
            }
            Err(err) => {
                system.metrics().record_init_failure();
                let strategy = catch_unwind(AssertUnwindSafe(|| actor.on_init_failure(attempt, &err)))
                    .unwrap_or(InitFailureStrategy::Stop);
                drop(actor);

                let delay = match strategy {
                    InitFailureStrategy::Retry => Some(self.init_retry_delay),
                    InitFailureStrategy::RetryAfter(delay) => Some(delay),
                    InitFailureStrategy::Stop => None,
                };

                match delay {
                    Some(delay) if attempt < self.max_init_attempts => {
                        warn!(
                            actor_id = %self.id,
                            attempt,
                            max_attempts = self.max_init_attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %err,
                            "Actor failed to initialize, retrying"
                        );
                        // The slot stays busy until the retry runs
                        let mailbox = Arc::clone(self);
                        system.scheduler().schedule_once(delay, move || {
                            mailbox.submit_init(attempt + 1);
                        });
                    }
                    _ => {
                        let failure = ActorError::InitFailed {
                            id: self.id.clone(),
                            attempts: attempt,
                            message: err.to_string(),
                        };
                        error!(
                            actor_id = %self.id,
                            error = %failure,
                            error_category = failure.category(),
                            "Actor failed to initialize, stopping"
                        );
                        system.stop_instance(self, StopReason::InitFailed);
                        self.release();
                    }
                }
            }
        }
    }

    fn drain(self: &Arc<Self>) {
        let system = match self.system() {
            Some(system) => system,
            None => {
                self.discard_pending();
                return;
            }
        };
        if self.is_stopping() {
            self.destroy_now(&system);
            self.release();
            return;
        }
        if !self.is_ready() {
            self.release();
            return;
        }

        let ctx = self.context(system.clone());
        let mut actor = self.actor.lock();
        for _ in 0..self.throughput {
            if self.is_stopping() || !self.is_ready() {
                break;
            }
            let envelope = match self.high_rx.try_recv() {
                Ok(envelope) => envelope,
                Err(_) => match self.normal_rx.try_recv() {
                    Ok(envelope) => envelope,
                    Err(_) => break,
                },
            };
            self.handle_envelope(&mut **actor, &ctx, envelope);
        }
        drop(actor);
        self.release();
    }

    fn handle_envelope(self: &Arc<Self>, actor: &mut dyn Actor, ctx: &ActorCtx, envelope: Envelope) {
        match envelope {
            Envelope::User(msg) => {
                let started = Instant::now();
                let msg_type = msg.msg_type();
                let result = catch_unwind(AssertUnwindSafe(|| actor.process(ctx, msg)))
                    .unwrap_or_else(|payload| Err(ActorError::from_panic(&self.id, payload)));
                match result {
                    Ok(()) => ctx.system().metrics().record_message_handled(started.elapsed()),
                    Err(err) => {
                        ctx.system().metrics().record_processing_failure();
                        error!(
                            actor_id = %self.id,
                            msg_type,
                            error = %err,
                            error_category = err.category(),
                            processing_duration_ns = started.elapsed().as_nanos() as u64,
                            "Actor message processing failed"
                        );
                        let directive =
                            catch_unwind(AssertUnwindSafe(|| actor.on_process_failure(ctx, &err)))
                                .unwrap_or(SupervisorDirective::Escalate);
                        self.apply_own_directive(actor, ctx, directive, err);
                    }
                }
            }
            Envelope::ChildFailed {
                child,
                instance,
                error,
            } => {
                let directive =
                    catch_unwind(AssertUnwindSafe(|| actor.on_child_failure(ctx, &child, &error)))
                        .unwrap_or(SupervisorDirective::Escalate);
                debug!(
                    actor_id = %self.id,
                    child = %child,
                    directive = ?directive,
                    "Handling child failure"
                );
                self.apply_child_directive(ctx, child, instance, directive, error);
            }
            Envelope::Restart => self.restart(actor, ctx),
        }
    }

    fn apply_own_directive(
        self: &Arc<Self>,
        actor: &mut dyn Actor,
        ctx: &ActorCtx,
        directive: SupervisorDirective,
        err: ActorError,
    ) {
        match directive {
            SupervisorDirective::Resume => {
                debug!(actor_id = %self.id, directive = "Resume", "Actor resumed after error");
            }
            SupervisorDirective::Restart => {
                if self.restarts.should_restart() {
                    self.restart(actor, ctx);
                } else {
                    error!(
                        actor_id = %self.id,
                        restart_count = self.restarts.restart_count(),
                        max_restarts = self.restarts.max_restarts(),
                        "Actor exceeded restart limit - escalating to supervisor"
                    );
                    self.escalate(ctx, err);
                }
            }
            SupervisorDirective::Stop => {
                warn!(actor_id = %self.id, error = %err, "Stopping actor due to error directive");
                ctx.stop_self();
            }
            SupervisorDirective::Escalate => self.escalate(ctx, err),
        }
    }

    fn apply_child_directive(
        self: &Arc<Self>,
        ctx: &ActorCtx,
        child: ActorId,
        instance: Weak<Mailbox>,
        directive: SupervisorDirective,
        error: ActorError,
    ) {
        match directive {
            SupervisorDirective::Resume => {}
            SupervisorDirective::Restart => {
                let restarted = instance
                    .upgrade()
                    .map(|mailbox| mailbox.enqueue(Envelope::Restart, true));
                if !matches!(restarted, Some(Ok(()))) {
                    debug!(actor_id = %self.id, child = %child, "Child gone before restart");
                }
            }
            SupervisorDirective::Stop => match instance.upgrade() {
                Some(mailbox) => ctx.system().stop_instance(&mailbox, StopReason::Stopped),
                None => debug!(actor_id = %self.id, child = %child, "Child gone before stop"),
            },
            SupervisorDirective::Escalate => self.escalate(ctx, error),
        }
    }

    /// Hand a failure of this actor to its parent
    fn escalate(self: &Arc<Self>, ctx: &ActorCtx, error: ActorError) {
        match &self.parent {
            Some(parent) => {
                warn!(
                    actor_id = %self.id,
                    parent = %parent,
                    error = %error,
                    "Escalating actor error to parent supervisor"
                );
                if let Err(e) = ctx.system().escalate_to_parent(self, error) {
                    warn!(actor_id = %self.id, parent = %parent, error = %e, "Parent unavailable for escalation");
                }
            }
            None => {
                error!(
                    actor_id = %self.id,
                    error = %error,
                    "Root actor error - no parent to escalate to, resuming"
                );
            }
        }
    }

    fn restart(self: &Arc<Self>, actor: &mut dyn Actor, ctx: &ActorCtx) {
        info!(actor_id = %self.id, "Restarting actor");
        ctx.system().metrics().record_restart();
        if catch_unwind(AssertUnwindSafe(|| actor.destroy())).is_err() {
            warn!(actor_id = %self.id, "Actor panicked in destroy during restart");
        }
        let result = catch_unwind(AssertUnwindSafe(|| actor.init(ctx)))
            .unwrap_or_else(|payload| Err(ActorError::from_panic(&self.id, payload)));
        if let Err(err) = result {
            ctx.system().metrics().record_init_failure();
            error!(actor_id = %self.id, error = %err, "Actor failed to re-initialize, stopping");
            ctx.system().stop_instance(self, StopReason::InitFailed);
        }
    }

    /// Run `Actor::destroy` and drop the backlog. Caller holds the busy flag.
    fn destroy_now(&self, system: &ActorSystem) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ready.store(false, Ordering::SeqCst);
        let reason = self.stop_reason().unwrap_or(StopReason::Stopped);

        {
            let mut actor = self.actor.lock();
            if catch_unwind(AssertUnwindSafe(|| actor.destroy())).is_err() {
                warn!(actor_id = %self.id, "Actor panicked in destroy");
            }
        }
        let dropped = self.discard_pending();
        self.dispatcher.unbind();
        system.metrics().actors_stopped.fetch_add(1, Ordering::Relaxed);
        debug!(actor_id = %self.id, reason = %reason, dropped, "Actor destroyed");

        let (lock, signal) = &self.destroyed_signal;
        *lock.lock() = true;
        signal.notify_all();
    }

    /// Notify and drop everything still queued
    fn discard_pending(&self) -> usize {
        let mut dropped = 0;
        while let Ok(envelope) = self.high_rx.try_recv() {
            self.drop_envelope(envelope);
            dropped += 1;
        }
        while let Ok(envelope) = self.normal_rx.try_recv() {
            self.drop_envelope(envelope);
            dropped += 1;
        }
        dropped
    }

    fn drop_envelope(&self, envelope: Envelope) {
        if let Envelope::User(msg) = envelope {
            let reason = self.stop_reason().unwrap_or(StopReason::Stopped);
            msg.on_actor_stopped(reason);
            if let Some(system) = self.system.upgrade() {
                system.metrics.record_dropped();
            }
        }
    }

    /// Mailbox with no system behind it, for arena tests
    #[cfg(test)]
    pub(crate) fn detached(id: ActorId) -> Arc<Self> {
        use crate::dispatcher::InlineExecutor;

        struct Idle;
        impl Actor for Idle {
            fn process(&mut self, _ctx: &ActorCtx, _msg: Msg) -> Result<()> {
                Ok(())
            }
        }

        let dispatcher = Arc::new(Dispatcher::new("detached", Arc::new(InlineExecutor)));
        Self::new(
            id,
            None,
            dispatcher,
            Weak::new(),
            &ActorSystemSettings::default(),
            Box::new(Idle),
        )
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("id", &self.id)
            .field("dispatcher", &self.dispatcher.name())
            .field("busy", &self.busy.load(Ordering::Relaxed))
            .field("ready", &self.is_ready())
            .field("stopping", &self.is_stopping())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ActorMsg;
    use std::sync::atomic::AtomicUsize;

    struct Note(Arc<AtomicUsize>);
    impl ActorMsg for Note {
        fn on_actor_stopped(&self, _reason: StopReason) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_born_busy_and_not_ready() {
        let mailbox = Mailbox::detached(ActorId::named("m"));
        assert!(!mailbox.is_ready());
        assert!(!mailbox.is_stopping());
        assert!(mailbox.busy.load(Ordering::SeqCst));
    }

    #[test]
    fn test_messages_queue_before_init() {
        let mailbox = Mailbox::detached(ActorId::named("m"));
        let counter = Arc::new(AtomicUsize::new(0));
        mailbox.tell(Arc::new(Note(Arc::clone(&counter))), false).unwrap();
        mailbox.tell(Arc::new(Note(Arc::clone(&counter))), true).unwrap();
        assert_eq!(mailbox.pending(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stopping_mailbox_refuses_and_notifies() {
        let mailbox = Mailbox::detached(ActorId::named("m"));
        mailbox.request_destroy(StopReason::Stopped);
        // Second request keeps the first reason
        mailbox.request_destroy(StopReason::InitFailed);
        assert_eq!(mailbox.stop_reason(), Some(StopReason::Stopped));

        let counter = Arc::new(AtomicUsize::new(0));
        let err = mailbox
            .tell(Arc::new(Note(Arc::clone(&counter))), false)
            .unwrap_err();
        assert!(matches!(err, ActorError::ActorNotRegistered { .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(mailbox.pending(), 0);
    }

    #[test]
    fn test_discard_pending_notifies_each_message() {
        let mailbox = Mailbox::detached(ActorId::named("m"));
        let counter = Arc::new(AtomicUsize::new(0));
        for high in [true, false, false] {
            mailbox.tell(Arc::new(Note(Arc::clone(&counter))), high).unwrap();
        }
        assert_eq!(mailbox.discard_pending(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_wait_destroyed_times_out() {
        let mailbox = Mailbox::detached(ActorId::named("m"));
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(!mailbox.wait_destroyed(deadline));
    }
}
