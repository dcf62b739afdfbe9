// Copyright (c) 2025 - Cowboy AI, Inc.
//! Runtime configuration
//!
//! Loading these values from a properties file or environment is out of
//! scope for this crate (an external collaborator's job); this module only
//! owns the struct, its defaults, and basic validation, following the shape
//! of `NatsConfig`/`JetStreamConfig`: plain fields, `Duration`s where the
//! spec names a millisecond value, and a `Default` impl carrying the
//! spec-stated defaults.

use std::time::Duration;

/// Per-shard storage backend configuration.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub connection_pool_size: u32,
    pub enabled: bool,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "registry".to_string(),
            username: "registry".to_string(),
            password: String::new(),
            connection_pool_size: 10,
            enabled: true,
        }
    }
}

/// Archival worker pool configuration.
#[derive(Debug, Clone)]
pub struct ArchivalConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            max_retries: 5,
            backoff_base: Duration::from_millis(100),
        }
    }
}

/// Top-level runtime configuration.
///
/// `registry.id` derives the active database name; the history database is
/// `"<registry.id>-history"`, per spec's naming convention.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub shard: ShardConfig,
    pub registry_id: String,
    pub archival: ArchivalConfig,
    /// Must be `>= 1`.
    pub retention_days: u32,
    pub rehydrate_timeout: Duration,
    /// `Duration::ZERO` disables the idle-eviction sweeper.
    pub idle_ttl: Duration,
    pub tick_period: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shard: ShardConfig::default(),
            registry_id: "default".to_string(),
            archival: ArchivalConfig::default(),
            retention_days: 30,
            rehydrate_timeout: Duration::from_secs(5),
            idle_ttl: Duration::ZERO,
            tick_period: Duration::from_millis(1),
        }
    }
}

impl RuntimeConfig {
    /// The active store's logical database name.
    pub fn active_database(&self) -> String {
        self.registry_id.clone()
    }

    /// The history store's logical database name.
    pub fn history_database(&self) -> String {
        format!("{}-history", self.registry_id)
    }

    /// Whether the idle-eviction sweeper should run at all.
    pub fn idle_eviction_enabled(&self) -> bool {
        !self.idle_ttl.is_zero()
    }

    pub fn with_registry_id(mut self, id: impl Into<String>) -> Self {
        self.registry_id = id.into();
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_database_is_suffixed() {
        let config = RuntimeConfig::default().with_registry_id("calls");
        assert_eq!(config.active_database(), "calls");
        assert_eq!(config.history_database(), "calls-history");
    }

    #[test]
    fn idle_eviction_disabled_by_default() {
        let config = RuntimeConfig::default();
        assert!(!config.idle_eviction_enabled());
    }
}
