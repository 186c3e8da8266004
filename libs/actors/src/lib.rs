//! Hierarchical Actor Runtime
//!
//! Actors live in a parent/child tree, exchange type-erased messages
//! through per-actor mailboxes and run on named worker pools
//! ("dispatchers"). Failures travel up the tree to supervisors; stopping
//! an actor stops its whole subtree.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                      ActorSystem                        │
//! │                                                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────┐  │
//! │  │  ActorTree   │  │ Dispatchers  │  │   Scheduler   │  │
//! │  │ id → entry   │  │ name → pool  │  │ delayed tasks │  │
//! │  └──────┬───────┘  └──────┬───────┘  └───────┬───────┘  │
//! │         │                 │                  │          │
//! │  ┌──────▼─────────────────▼──────┐           │          │
//! │  │ Mailbox (high │ normal queue) │◄──────────┘          │
//! │  │ busy flag ─► drain on pool    │                      │
//! │  └──────┬────────────────────────┘                      │
//! │         ▼                                               │
//! │      Actor::process(ctx, msg)                           │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - At most one worker runs a given actor at any instant
//! - Messages from one sender at one priority arrive in send order
//! - High-priority messages overtake queued normal ones
//! - `Actor::init` completes before the first `Actor::process`
//! - Messages dropped because their target stopped are told so through
//!   `ActorMsg::on_actor_stopped`
//!
//! # Examples
//!
//! ```rust
//! use actor_tree::{creator, Actor, ActorCtx, ActorMsg, ActorSystem, ActorSystemSettings, InlineExecutor, Msg};
//! use std::sync::Arc;
//!
//! struct Ping;
//! impl ActorMsg for Ping {}
//!
//! struct Counter(usize);
//!
//! impl Actor for Counter {
//!     fn process(&mut self, _ctx: &ActorCtx, msg: Msg) -> actor_tree::Result<()> {
//!         if msg.is::<Ping>() {
//!             self.0 += 1;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let system = ActorSystem::new(ActorSystemSettings::default())?;
//! system.create_dispatcher("inline", InlineExecutor)?;
//!
//! let counter = system.create_root_actor("inline", creator("counter", || Counter(0)))?;
//! counter.tell(Arc::new(Ping))?;
//!
//! system.shutdown();
//! # Ok::<(), actor_tree::ActorError>(())
//! ```

pub mod actor;
pub mod actor_ref;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
mod mailbox;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod scheduler;
pub mod supervision;
pub mod system;

pub use actor::{creator, Actor, ActorCreator, FnCreator};
pub use actor_ref::{ActorRef, TellTarget};
pub use config::{ActorSystemSettings, DispatcherSettings, ENV_PREFIX};
pub use context::ActorCtx;
pub use dispatcher::{DispatchExecutor, InlineExecutor, Task, WorkerPool};
pub use error::{ActorError, Result};
pub use messages::{ActorMsg, Msg, StopReason};
pub use metrics::{SystemMetrics, SystemStats};
pub use registry::{ActorId, ActorInfo};
pub use scheduler::{ScheduledTask, Scheduler};
pub use supervision::{InitFailureStrategy, SupervisorDirective};
pub use system::ActorSystem;
