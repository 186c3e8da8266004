//! Actor System Core
//!
//! Top-level coordinator. Owns the dispatcher registry, the actor tree and
//! the scheduler, and is the only component that creates or destroys
//! actors.
//!
//! # Lock Ordering (CRITICAL for deadlock prevention)
//!
//! When acquiring multiple locks, ALWAYS follow this order:
//! 1. `tree` (read or write)
//! 2. `dispatchers` (read or write)
//!
//! No lock is held while actor code runs, with one exception: the
//! `ActorCreator` is invoked under the tree write lock so that
//! get-or-create builds at most one actor per id. Creators must only
//! construct the actor.
//!
//! # Instances versus ids
//!
//! Named ids are reused once an actor stops. Operations issued by an actor
//! on its own behalf (stop self, child management, escalation) are keyed
//! by its mailbox instance, never by id, and are refused once that
//! instance is no longer the one registered in the tree.

use crate::actor::ActorCreator;
use crate::actor_ref::ActorRef;
use crate::config::ActorSystemSettings;
use crate::dispatcher::{self, DispatchExecutor, DispatcherRegistry, WorkerPool};
use crate::error::{ActorError, Result};
use crate::mailbox::{Envelope, Mailbox};
use crate::messages::{Msg, StopReason};
use crate::metrics::SystemMetrics;
use crate::registry::{ActorId, ActorInfo, ActorTree, TreeEntry};
use crate::scheduler::{ScheduledTask, Scheduler};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Core actor system managing actor lifecycles and routing
#[derive(Clone)]
pub struct ActorSystem {
    inner: Arc<SystemInner>,
}

pub(crate) struct SystemInner {
    /// System ID for debugging
    system_id: String,
    settings: ActorSystemSettings,
    /// Parent/child arena, the sole source of truth for hierarchy
    tree: RwLock<ActorTree>,
    dispatchers: DispatcherRegistry,
    scheduler: Scheduler,
    pub(crate) metrics: Arc<SystemMetrics>,
    shut_down: AtomicBool,
}

impl ActorSystem {
    /// Create an actor system with no dispatchers registered yet
    pub fn new(settings: ActorSystemSettings) -> Result<Self> {
        settings.validate()?;
        let system_id = format!("system-{}", Uuid::new_v4().simple());
        let scheduler = Scheduler::new(settings.scheduler_pool_size)?;
        info!(
            system_id = %system_id,
            actor_throughput = settings.actor_throughput,
            "Creating new actor system"
        );

        Ok(Self {
            inner: Arc::new(SystemInner {
                system_id,
                settings,
                tree: RwLock::new(ActorTree::new()),
                dispatchers: DispatcherRegistry::new(),
                scheduler,
                metrics: Arc::new(SystemMetrics::default()),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Create an actor system plus every dispatcher listed in `settings`
    pub fn from_settings(settings: ActorSystemSettings) -> Result<Self> {
        let dispatchers = settings.dispatchers.clone();
        let system = Self::new(settings)?;
        for dispatcher in dispatchers {
            let pool = WorkerPool::new(&dispatcher.name, dispatcher.pool_size)?;
            system.create_dispatcher(&dispatcher.name, pool)?;
        }
        Ok(system)
    }

    pub(crate) fn from_inner(inner: Arc<SystemInner>) -> Self {
        Self { inner }
    }

    pub fn system_id(&self) -> &str {
        &self.inner.system_id
    }

    pub fn settings(&self) -> &ActorSystemSettings {
        &self.inner.settings
    }

    /// Get system metrics
    pub fn metrics(&self) -> Arc<SystemMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Timer facility shared by the whole system
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(ActorError::SystemShutdown)
        } else {
            Ok(())
        }
    }

    // ----- Dispatchers -----

    /// Register a named worker pool
    pub fn create_dispatcher<E: DispatchExecutor>(&self, name: &str, executor: E) -> Result<()> {
        self.ensure_running()?;
        self.inner.dispatchers.register(name, Arc::new(executor))?;
        Ok(())
    }

    /// Unregister and shut down a worker pool.
    ///
    /// Rejected with `DispatcherInUse` while any actor bound to it has not
    /// finished stopping. Stopped actors leave the tree at once but stay
    /// bound until their `destroy` hook has run on the pool, so calling
    /// this right after a stop may still be refused. Use
    /// [`destroy_dispatcher_when_idle`](Self::destroy_dispatcher_when_idle)
    /// to wait for that to settle.
    pub fn destroy_dispatcher(&self, name: &str) -> Result<()> {
        let dispatcher = {
            // Holding the tree lock keeps creators from binding meanwhile
            let _tree = self.inner.tree.read();
            let dispatcher = self
                .inner
                .dispatchers
                .get(name)
                .ok_or_else(|| ActorError::DispatcherNotFound {
                    name: name.to_string(),
                })?;
            let bound = dispatcher.bound_actors();
            if bound > 0 {
                warn!(dispatcher = %name, bound, "Refusing to destroy dispatcher with bound actors");
                return Err(ActorError::DispatcherInUse {
                    name: name.to_string(),
                    bound,
                });
            }
            self.inner.dispatchers.remove(name);
            dispatcher
        };

        dispatcher.shutdown(self.inner.settings.shutdown_timeout());
        info!(dispatcher = %name, "Dispatcher destroyed");
        Ok(())
    }

    /// Destroy `name` once every actor bound to it has finished stopping,
    /// waiting up to `timeout`. Blocks the caller; do not call it from an
    /// actor running on that dispatcher.
    pub fn destroy_dispatcher_when_idle(&self, name: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.destroy_dispatcher(name) {
                Err(ActorError::DispatcherInUse { .. }) if Instant::now() < deadline => {
                    let Some(dispatcher) = self.inner.dispatchers.get(name) else {
                        return Err(ActorError::DispatcherNotFound {
                            name: name.to_string(),
                        });
                    };
                    dispatcher.wait_idle(deadline);
                }
                result => return result,
            }
        }
    }

    pub fn dispatcher_names(&self) -> Vec<String> {
        self.inner.dispatchers.names()
    }

    /// Actors bound to `name` that have not finished stopping. Lags the
    /// tree: a stopped actor counts until its `destroy` hook ran.
    pub fn bound_actors(&self, name: &str) -> Option<usize> {
        self.inner.dispatchers.get(name).map(|d| d.bound_actors())
    }

    // ----- Creation -----

    /// Create an actor with no parent
    pub fn create_root_actor<C: ActorCreator>(&self, dispatcher: &str, creator: C) -> Result<ActorRef> {
        let mailbox = {
            let mut tree = self.inner.tree.write();
            self.insert_actor(&mut tree, dispatcher, Box::new(creator), None)?
        };
        Ok(self.start_actor(mailbox))
    }

    /// Create an actor under a live parent
    pub fn create_child_actor<C: ActorCreator>(
        &self,
        dispatcher: &str,
        creator: C,
        parent: &ActorId,
    ) -> Result<ActorRef> {
        self.create_child(dispatcher, Box::new(creator), parent, None)
    }

    /// Create a child of the actor owning `caller`
    pub(crate) fn create_child_of<C: ActorCreator>(
        &self,
        caller: &Arc<Mailbox>,
        dispatcher: &str,
        creator: C,
    ) -> Result<ActorRef> {
        self.create_child(dispatcher, Box::new(creator), caller.id(), Some(caller))
    }

    fn create_child(
        &self,
        dispatcher: &str,
        creator: Box<dyn ActorCreator>,
        parent: &ActorId,
        caller: Option<&Arc<Mailbox>>,
    ) -> Result<ActorRef> {
        let mailbox = {
            let mut tree = self.inner.tree.write();
            Self::check_caller(&tree, caller)?;
            self.insert_actor(&mut tree, dispatcher, creator, Some(parent.clone()))?
        };
        Ok(self.start_actor(mailbox))
    }

    /// Return child `id` of `parent`, creating it if absent.
    ///
    /// Suppliers run at most once per successful creation and only when the
    /// child does not exist, so racing callers build exactly one actor and
    /// all receive a reference to it.
    pub fn get_or_create_child_actor<D, F, C>(
        &self,
        parent: &ActorId,
        id: &ActorId,
        dispatcher: D,
        creator: F,
    ) -> Result<ActorRef>
    where
        D: FnOnce() -> String,
        F: FnOnce() -> C,
        C: ActorCreator,
    {
        self.get_or_create_child(parent, None, id, dispatcher, creator)
    }

    pub(crate) fn get_or_create_child<D, F, C>(
        &self,
        parent: &ActorId,
        caller: Option<&Arc<Mailbox>>,
        id: &ActorId,
        dispatcher: D,
        creator: F,
    ) -> Result<ActorRef>
    where
        D: FnOnce() -> String,
        F: FnOnce() -> C,
        C: ActorCreator,
    {
        {
            let tree = self.inner.tree.read();
            Self::check_caller(&tree, caller)?;
            if let Some(existing) = Self::existing_child(&tree, parent, id)? {
                return Ok(existing);
            }
        }

        let mailbox = {
            let mut tree = self.inner.tree.write();
            Self::check_caller(&tree, caller)?;
            // Another caller may have won between the two locks
            if let Some(existing) = Self::existing_child(&tree, parent, id)? {
                return Ok(existing);
            }
            let creator = creator();
            if &creator.actor_id() != id {
                return Err(ActorError::configuration(
                    format!("creator builds {} but {} was requested", creator.actor_id(), id),
                    Some("actor_id"),
                ));
            }
            let dispatcher = dispatcher();
            self.insert_actor(&mut tree, &dispatcher, Box::new(creator), Some(parent.clone()))?
        };
        Ok(self.start_actor(mailbox))
    }

    /// The tree entry of `mailbox`, provided it is still the registered
    /// instance for its id
    fn registered_entry<'t>(tree: &'t ActorTree, mailbox: &Arc<Mailbox>) -> Result<&'t TreeEntry> {
        match tree.get(mailbox.id()) {
            Some(entry) if Arc::ptr_eq(&entry.mailbox, mailbox) => Ok(entry),
            _ => Err(ActorError::not_registered(mailbox.id())),
        }
    }

    fn check_caller(tree: &ActorTree, caller: Option<&Arc<Mailbox>>) -> Result<()> {
        match caller {
            Some(caller) => Self::registered_entry(tree, caller).map(|_| ()),
            None => Ok(()),
        }
    }

    fn existing_child(tree: &ActorTree, parent: &ActorId, id: &ActorId) -> Result<Option<ActorRef>> {
        match tree.get(id) {
            Some(entry) if entry.parent.as_ref() == Some(parent) => Ok(Some(ActorRef::new(&entry.mailbox))),
            Some(_) => Err(ActorError::AlreadyExists { id: id.clone() }),
            None => Ok(None),
        }
    }

    /// Validate, build and register a new actor. Caller holds the tree
    /// write lock; nothing is mutated unless every check passes.
    fn insert_actor(
        &self,
        tree: &mut ActorTree,
        dispatcher_name: &str,
        creator: Box<dyn ActorCreator>,
        parent: Option<ActorId>,
    ) -> Result<Arc<Mailbox>> {
        self.ensure_running()?;
        let id = creator.actor_id();
        let dispatcher = self
            .inner
            .dispatchers
            .get(dispatcher_name)
            .ok_or_else(|| ActorError::DispatcherNotFound {
                name: dispatcher_name.to_string(),
            })?;
        if tree.contains(&id) {
            return Err(ActorError::AlreadyExists { id });
        }
        if let Some(parent_id) = &parent {
            if !tree.contains(parent_id) {
                return Err(ActorError::ParentNotFound {
                    id: parent_id.clone(),
                });
            }
        }

        let actor = creator.create_actor();
        let mailbox = Mailbox::new(
            id.clone(),
            parent.clone(),
            Arc::clone(&dispatcher),
            Arc::downgrade(&self.inner),
            &self.inner.settings,
            actor,
        );
        dispatcher.bind();
        tree.insert(
            id.clone(),
            TreeEntry {
                mailbox: Arc::clone(&mailbox),
                parent: parent.clone(),
                children: BTreeSet::new(),
                dispatcher: dispatcher_name.to_string(),
            },
        );

        self.inner.metrics.actors_created.fetch_add(1, Ordering::Relaxed);
        debug!(
            actor_id = %id,
            parent = ?parent,
            dispatcher = %dispatcher_name,
            system_id = %self.inner.system_id,
            "Actor created"
        );
        Ok(mailbox)
    }

    /// Init runs outside the tree lock so `Actor::init` may use the tree
    fn start_actor(&self, mailbox: Arc<Mailbox>) -> ActorRef {
        let actor_ref = ActorRef::new(&mailbox);
        mailbox.start();
        actor_ref
    }

    // ----- Lookup -----

    /// Get actor reference by ID
    pub fn get_actor(&self, id: &ActorId) -> Option<ActorRef> {
        self.inner
            .tree
            .read()
            .get(id)
            .map(|entry| ActorRef::new(&entry.mailbox))
    }

    /// Parent, children and dispatcher of a live actor
    pub fn actor_info(&self, id: &ActorId) -> Option<ActorInfo> {
        self.inner.tree.read().info(id)
    }

    /// List all actors
    pub fn list_actors(&self) -> Vec<ActorId> {
        self.inner.tree.read().ids()
    }

    pub fn actor_count(&self) -> usize {
        self.inner.tree.read().len()
    }

    // ----- Messaging -----

    /// Enqueue a normal-priority message for `target`
    pub fn tell(&self, target: &ActorId, msg: Msg) -> Result<()> {
        self.deliver(target, Envelope::User(msg), false)
    }

    /// Enqueue a message that is processed before any queued normal one
    pub fn tell_with_high_priority(&self, target: &ActorId, msg: Msg) -> Result<()> {
        self.deliver(target, Envelope::User(msg), true)
    }

    /// Deliver `msg` to `target` after `delay`; dropped if the target is
    /// gone by then
    pub fn tell_with_delay(&self, target: &ActorId, msg: Msg, delay: Duration) -> ScheduledTask {
        let system = Arc::downgrade(&self.inner);
        let target = target.clone();
        self.inner.scheduler.schedule_once(delay, move || {
            let Some(inner) = system.upgrade() else {
                return;
            };
            if let Err(e) = ActorSystem::from_inner(inner).tell(&target, msg) {
                debug!(actor_id = %target, error = %e, "Delayed message dropped");
            }
        })
    }

    fn deliver(&self, target: &ActorId, envelope: Envelope, high_priority: bool) -> Result<()> {
        let mailbox = self
            .inner
            .tree
            .read()
            .get(target)
            .map(|entry| Arc::clone(&entry.mailbox));
        match mailbox {
            Some(mailbox) => mailbox.enqueue(envelope, high_priority),
            None => {
                self.inner.metrics.record_dropped();
                debug!(actor_id = %target, "Message to unregistered actor dropped");
                Err(ActorError::not_registered(target))
            }
        }
    }

    /// Queue a failure report from `child` on its parent. Refused once
    /// `child` is no longer the registered instance.
    pub(crate) fn escalate_to_parent(&self, child: &Arc<Mailbox>, error: ActorError) -> Result<()> {
        let parent = {
            let tree = self.inner.tree.read();
            let entry = Self::registered_entry(&tree, child)?;
            entry
                .parent
                .as_ref()
                .and_then(|parent| tree.get(parent))
                .map(|parent| Arc::clone(&parent.mailbox))
                .ok_or_else(|| ActorError::ParentNotFound {
                    id: child.id().clone(),
                })?
        };
        parent.enqueue(
            Envelope::ChildFailed {
                child: child.id().clone(),
                instance: Arc::downgrade(child),
                error,
            },
            true,
        )
    }

    /// Send `msg` to every direct child of `parent`
    pub fn broadcast_to_children(&self, parent: &ActorId, msg: Msg) -> Result<usize> {
        self.broadcast_to_children_filtered(parent, msg, |_| true)
    }

    /// Send `msg` to the direct children of `parent` accepted by `filter`.
    /// Grandchildren are never reached. Returns how many children took it.
    pub fn broadcast_to_children_filtered<P>(&self, parent: &ActorId, msg: Msg, filter: P) -> Result<usize>
    where
        P: Fn(&ActorId) -> bool,
    {
        let targets = self.children_of(parent, None, &filter)?;
        Ok(self.send_to_children(parent, targets, msg))
    }

    /// Broadcast from the actor owning `caller` to its own children
    pub(crate) fn broadcast_from(
        &self,
        caller: &Arc<Mailbox>,
        msg: Msg,
        filter: &dyn Fn(&ActorId) -> bool,
    ) -> Result<usize> {
        let targets = self.children_of(caller.id(), Some(caller), filter)?;
        Ok(self.send_to_children(caller.id(), targets, msg))
    }

    fn children_of(
        &self,
        parent: &ActorId,
        caller: Option<&Arc<Mailbox>>,
        filter: &dyn Fn(&ActorId) -> bool,
    ) -> Result<Vec<(ActorId, Arc<Mailbox>)>> {
        let tree = self.inner.tree.read();
        Self::check_caller(&tree, caller)?;
        tree.children_matching(parent, filter)
            .ok_or_else(|| ActorError::not_registered(parent))
    }

    fn send_to_children(&self, parent: &ActorId, targets: Vec<(ActorId, Arc<Mailbox>)>, msg: Msg) -> usize {
        let mut delivered = 0;
        for (child, mailbox) in targets {
            match mailbox.tell(Arc::clone(&msg), false) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(parent = %parent, child = %child, error = %e, "Broadcast skipped stopped child"),
            }
        }
        delivered
    }

    /// Snapshot of the direct children of `parent` accepted by `filter`
    pub fn filter_children<P>(&self, parent: &ActorId, filter: P) -> Result<Vec<ActorId>>
    where
        P: Fn(&ActorId) -> bool,
    {
        let children = self.children_of(parent, None, &filter)?;
        Ok(children.into_iter().map(|(id, _)| id).collect())
    }

    pub(crate) fn filter_children_of(
        &self,
        caller: &Arc<Mailbox>,
        filter: &dyn Fn(&ActorId) -> bool,
    ) -> Result<Vec<ActorId>> {
        let children = self.children_of(caller.id(), Some(caller), filter)?;
        Ok(children.into_iter().map(|(id, _)| id).collect())
    }

    // ----- Stopping -----

    /// Stop `id` and its whole subtree. Unknown or already stopped ids are
    /// a no-op.
    pub fn stop_actor(&self, id: &ActorId) {
        let removed = self.inner.tree.write().remove_subtree(id);
        if removed.is_empty() {
            debug!(actor_id = %id, "Stop requested for unknown or stopped actor");
            return;
        }

        let count = removed.len();
        for (removed_id, entry) in removed {
            debug!(actor_id = %removed_id, "Stopping actor");
            entry.mailbox.request_destroy(StopReason::Stopped);
        }
        info!(actor_id = %id, stopped = count, "Actor subtree stopped");
    }

    pub fn stop_ref(&self, actor_ref: &ActorRef) {
        self.stop_actor(actor_ref.actor_id());
    }

    /// Stop `mailbox` and its subtree. The subtree is only touched while
    /// `mailbox` is still the registered instance; a replaced instance is
    /// destroyed alone and its successor is left running.
    pub(crate) fn stop_instance(&self, mailbox: &Arc<Mailbox>, reason: StopReason) {
        let removed = {
            let mut tree = self.inner.tree.write();
            let registered = Self::registered_entry(&tree, mailbox).is_ok();
            if registered {
                tree.remove_subtree(mailbox.id())
            } else {
                Vec::new()
            }
        };
        mailbox.request_destroy(reason);
        for (removed_id, entry) in removed {
            debug!(actor_id = %removed_id, "Stopping actor");
            entry.mailbox.request_destroy(StopReason::Stopped);
        }
    }

    /// Stop `child` only if it is a direct child of the actor owning
    /// `caller`
    pub(crate) fn stop_child(&self, caller: &Arc<Mailbox>, child: &ActorId) -> Result<()> {
        let parent = caller.id();
        let removed = {
            let mut tree = self.inner.tree.write();
            Self::registered_entry(&tree, caller)?;
            match tree.get(child) {
                None => return Ok(()),
                Some(entry) if entry.parent.as_ref() != Some(parent) => {
                    return Err(ActorError::NotAChild {
                        parent: parent.clone(),
                        child: child.clone(),
                    });
                }
                Some(_) => tree.remove_subtree(child),
            }
        };
        for (removed_id, entry) in removed {
            debug!(actor_id = %removed_id, parent = %parent, "Stopping child actor");
            entry.mailbox.request_destroy(StopReason::Stopped);
        }
        Ok(())
    }

    /// Shutdown the entire actor system: stop every actor, then release
    /// every dispatcher and the scheduler. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down actor system {}", self.inner.system_id);

        let removed: Vec<Arc<Mailbox>> = {
            let mut tree = self.inner.tree.write();
            let roots = tree.roots();
            roots
                .iter()
                .flat_map(|root| tree.remove_subtree(root))
                .map(|(_, entry)| entry.mailbox)
                .collect()
        };
        for mailbox in &removed {
            mailbox.request_destroy(StopReason::Stopped);
        }

        let timeout = self.inner.settings.shutdown_timeout();
        if dispatcher::on_dispatcher_thread() {
            // Waiting here could wait on ourselves
            debug!("Shutdown called from a dispatcher thread, not waiting for actors");
            self.release_pools(timeout);
        } else {
            match Handle::try_current() {
                Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                    tokio::task::block_in_place(|| self.finish_shutdown(&removed, timeout));
                }
                _ => self.finish_shutdown(&removed, timeout),
            }
        }

        info!(
            system_id = %self.inner.system_id,
            stopped = removed.len(),
            "Actor system shutdown complete"
        );
    }

    fn finish_shutdown(&self, removed: &[Arc<Mailbox>], timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let pending = removed
            .iter()
            .filter(|mailbox| !mailbox.wait_destroyed(deadline))
            .count();
        if pending > 0 {
            warn!(pending, "Shutdown timed out waiting for actors to stop");
        }
        self.release_pools(timeout);
    }

    fn release_pools(&self, timeout: Duration) {
        for dispatcher in self.inner.dispatchers.take_all() {
            debug!(dispatcher = %dispatcher.name(), "Shutting down dispatcher");
            dispatcher.shutdown(timeout);
        }
        self.inner.scheduler.shutdown(timeout);
    }

    #[cfg(test)]
    pub(crate) fn tree_is_consistent(&self) -> bool {
        self.inner.tree.read().is_consistent()
    }
}

impl std::fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorSystem")
            .field("system_id", &self.inner.system_id)
            .field("actors", &self.actor_count())
            .field("dispatchers", &self.inner.dispatchers.names())
            .finish()
    }
}
