//! Actor System Configuration
//!
//! Settings for mailbox throughput, actor initialization retries,
//! restart windows, shutdown and the dispatchers created at startup.
//! Loaded from an optional TOML file with `ACTOR_TREE__*` environment
//! overrides.

use crate::error::{ActorError, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "ACTOR_TREE";

/// Actor system settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ActorSystemSettings {
    /// Messages processed per drain before the worker is yielded
    pub actor_throughput: usize,

    /// Threads of the timer pool
    pub scheduler_pool_size: usize,

    /// Init attempts before an actor is stopped
    pub max_actor_init_attempts: u32,

    /// Delay between init attempts when the actor asks for a plain retry
    pub init_retry_delay_ms: u64,

    /// Restarts allowed per actor within `restart_window_ms`
    pub max_restarts: u32,

    pub restart_window_ms: u64,

    /// Upper bound on waiting for destroy hooks and pools at shutdown
    pub shutdown_timeout_ms: u64,

    /// Dispatchers created by `ActorSystem::from_settings`
    pub dispatchers: Vec<DispatcherSettings>,
}

/// One configured dispatcher
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct DispatcherSettings {
    pub name: String,
    pub pool_size: usize,
}

impl Default for ActorSystemSettings {
    fn default() -> Self {
        Self {
            actor_throughput: 5,
            scheduler_pool_size: 1,
            max_actor_init_attempts: 10,
            init_retry_delay_ms: 500,
            max_restarts: 5,
            restart_window_ms: 60_000,
            shutdown_timeout_ms: 5_000,
            dispatchers: Vec::new(),
        }
    }
}

impl ActorSystemSettings {
    /// Load settings from an optional TOML file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading actor system config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let settings: Self = builder
            .build()
            .map_err(|e| ActorError::configuration(format!("Failed to build configuration: {}", e), None))?
            .try_deserialize()
            .map_err(|e| {
                ActorError::configuration(format!("Failed to deserialize configuration: {}", e), None)
            })?;

        settings.validate()?;
        debug!(?settings, "Loaded actor system settings");
        Ok(settings)
    }

    /// Reject settings the runtime cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.actor_throughput == 0 {
            return Err(ActorError::configuration(
                "actor_throughput must be at least 1",
                Some("actor_throughput"),
            ));
        }
        if self.scheduler_pool_size == 0 {
            return Err(ActorError::configuration(
                "scheduler_pool_size must be at least 1",
                Some("scheduler_pool_size"),
            ));
        }
        if self.max_actor_init_attempts == 0 {
            return Err(ActorError::configuration(
                "max_actor_init_attempts must be at least 1",
                Some("max_actor_init_attempts"),
            ));
        }

        let mut names = HashSet::new();
        for dispatcher in &self.dispatchers {
            if dispatcher.name.trim().is_empty() {
                return Err(ActorError::configuration(
                    "dispatcher name must not be empty",
                    Some("dispatchers.name"),
                ));
            }
            if dispatcher.pool_size == 0 {
                return Err(ActorError::configuration(
                    format!("dispatcher '{}' needs at least one thread", dispatcher.name),
                    Some("dispatchers.pool_size"),
                ));
            }
            if !names.insert(dispatcher.name.as_str()) {
                return Err(ActorError::configuration(
                    format!("dispatcher '{}' is configured twice", dispatcher.name),
                    Some("dispatchers.name"),
                ));
            }
        }
        Ok(())
    }

    pub fn init_retry_delay(&self) -> Duration {
        Duration::from_millis(self.init_retry_delay_ms)
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_millis(self.restart_window_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Add a dispatcher definition
    pub fn with_dispatcher(mut self, name: impl Into<String>, pool_size: usize) -> Self {
        self.dispatchers.push(DispatcherSettings {
            name: name.into(),
            pool_size,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::{const_mutex, Mutex, MutexGuard};
    use std::fs;
    use tempfile::tempdir;

    /// Every test that calls `load` reads the process environment
    static ENV_LOCK: Mutex<()> = const_mutex(());

    /// Sets an `ACTOR_TREE__*` variable for the lifetime of the guard
    struct EnvVar {
        key: String,
        _lock: MutexGuard<'static, ()>,
    }

    impl EnvVar {
        fn set(lock: MutexGuard<'static, ()>, field: &str, value: &str) -> Self {
            let key = format!("{}__{}", ENV_PREFIX, field.to_uppercase());
            std::env::set_var(&key, value);
            Self { key, _lock: lock }
        }
    }

    impl Drop for EnvVar {
        fn drop(&mut self) {
            std::env::remove_var(&self.key);
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = ActorSystemSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.actor_throughput, 5);
        assert_eq!(settings.init_retry_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_file_with_env_override() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("actors.toml");

        let config_content = r#"
actor_throughput = 20
max_actor_init_attempts = 3

[[dispatchers]]
name = "app"
pool_size = 4

[[dispatchers]]
name = "io"
pool_size = 2
"#;
        fs::write(&config_path, config_content).unwrap();

        let _env = EnvVar::set(ENV_LOCK.lock(), "shutdown_timeout_ms", "250");
        let settings = ActorSystemSettings::load(Some(&config_path)).unwrap();

        assert_eq!(settings.actor_throughput, 20);
        assert_eq!(settings.max_actor_init_attempts, 3);
        assert_eq!(settings.shutdown_timeout(), Duration::from_millis(250));
        // Untouched keys keep their defaults
        assert_eq!(settings.scheduler_pool_size, 1);
        assert_eq!(
            settings.dispatchers,
            vec![
                DispatcherSettings { name: "app".into(), pool_size: 4 },
                DispatcherSettings { name: "io".into(), pool_size: 2 },
            ]
        );
    }

    #[test]
    fn test_env_alone_overrides_defaults() {
        let _env = EnvVar::set(ENV_LOCK.lock(), "actor_throughput", "9");
        let settings = ActorSystemSettings::load(None).unwrap();
        assert_eq!(settings.actor_throughput, 9);
        assert_eq!(settings.max_actor_init_attempts, ActorSystemSettings::default().max_actor_init_attempts);
    }

    #[test]
    fn test_missing_file_is_error() {
        let _env = ENV_LOCK.lock();
        let dir = tempdir().unwrap();
        let err = ActorSystemSettings::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = ActorSystemSettings::default();
        settings.actor_throughput = 0;
        assert!(matches!(
            settings.validate(),
            Err(ActorError::Configuration { field: Some(f), .. }) if f == "actor_throughput"
        ));

        let settings = ActorSystemSettings::default()
            .with_dispatcher("app", 2)
            .with_dispatcher("app", 1);
        assert!(settings.validate().is_err());

        let settings = ActorSystemSettings::default().with_dispatcher("app", 0);
        assert!(settings.validate().is_err());
    }
}
