//! Actor Runtime Error Types
//!
//! Typed failures for routing, lifecycle, dispatcher management and actor
//! processing. Every public operation of the runtime either succeeds or
//! returns one of these; none of them leaves the actor tree half-mutated.

use crate::registry::ActorId;
use std::sync::Arc;
use thiserror::Error;

/// Main runtime error type
#[derive(Error, Debug, Clone)]
pub enum ActorError {
    /// Target identity is not (or no longer) registered in the tree
    #[error("Actor {id} is not registered")]
    ActorNotRegistered { id: ActorId },

    /// An actor with this identity is already registered
    #[error("Actor {id} is already registered")]
    AlreadyExists { id: ActorId },

    /// Parent identity does not resolve to a live actor
    #[error("Parent actor {id} not found")]
    ParentNotFound { id: ActorId },

    /// Tree operation attempted on an actor outside the caller's children
    #[error("Actor {child} is not a child of {parent}")]
    NotAChild { parent: ActorId, child: ActorId },

    /// Dispatcher name is unknown
    #[error("Dispatcher '{name}' not found")]
    DispatcherNotFound { name: String },

    /// Dispatcher name is already registered
    #[error("Dispatcher '{name}' already exists")]
    DispatcherAlreadyExists { name: String },

    /// Dispatcher still has live actors bound to it
    #[error("Dispatcher '{name}' still has {bound} bound actor(s)")]
    DispatcherInUse { name: String, bound: usize },

    /// Actor initialization failed permanently
    #[error("Actor {id} failed to initialize after {attempts} attempt(s): {message}")]
    InitFailed {
        id: ActorId,
        attempts: u32,
        message: String,
    },

    /// Actor logic returned an error while processing a message
    #[error("Processing error: {message}")]
    Processing {
        message: String,
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// Actor logic panicked while processing a message
    #[error("Actor {id} panicked: {message}")]
    Panicked { id: ActorId, message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Worker pool could not be built
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: Arc<std::io::Error>,
    },

    /// The actor system has been shut down
    #[error("Actor system is shut down")]
    SystemShutdown,
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, ActorError>;

impl ActorError {
    /// Create an error for an unregistered actor
    pub fn not_registered(id: &ActorId) -> Self {
        Self::ActorNotRegistered { id: id.clone() }
    }

    /// Create a processing error
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
            source: None,
        }
    }

    /// Create a processing error with source
    pub fn processing_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Build a fault from a caught panic payload
    pub(crate) fn from_panic(id: &ActorId, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked {
            id: id.clone(),
            message,
        }
    }

    /// True for routing failures a fire-and-forget sender may ignore
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            ActorError::ActorNotRegistered { .. }
                | ActorError::DispatcherNotFound { .. }
                | ActorError::SystemShutdown
        )
    }

    /// True for faults raised by actor logic
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            ActorError::Processing { .. } | ActorError::Panicked { .. } | ActorError::InitFailed { .. }
        )
    }

    /// Get error category for structured logs
    pub fn category(&self) -> &'static str {
        match self {
            ActorError::ActorNotRegistered { .. } => "not_registered",
            ActorError::AlreadyExists { .. } => "already_exists",
            ActorError::ParentNotFound { .. } => "parent_not_found",
            ActorError::NotAChild { .. } => "not_a_child",
            ActorError::DispatcherNotFound { .. } => "dispatcher_not_found",
            ActorError::DispatcherAlreadyExists { .. } => "dispatcher_exists",
            ActorError::DispatcherInUse { .. } => "dispatcher_in_use",
            ActorError::InitFailed { .. } => "init_failed",
            ActorError::Processing { .. } => "processing",
            ActorError::Panicked { .. } => "panicked",
            ActorError::Configuration { .. } => "configuration",
            ActorError::Io { .. } => "io",
            ActorError::SystemShutdown => "shutdown",
        }
    }
}

impl From<std::io::Error> for ActorError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string(), err)
    }
}
