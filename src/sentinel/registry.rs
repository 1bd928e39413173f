//! Name → constructor registry for sentinels
//!
//! The registry is an ordinary value built once at startup and handed to the
//! pipeline. Tests build their own registry with fake sentinels.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::alarm::Alarm;

use super::{Sentinel, SentinelError, SentinelKind};

type Constructor = Arc<dyn Fn() -> Box<dyn Sentinel> + Send + Sync>;

#[derive(Clone, Default)]
pub struct SentinelRegistry {
    constructors: HashMap<String, Constructor>,
}

impl SentinelRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in sentinel
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in SentinelKind::ALL {
            registry.register(kind.name(), move || kind.build());
        }
        registry
    }

    /// Register (or replace) the constructor for `name`
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn Sentinel> + Send + Sync + 'static,
    {
        let name = name.into();
        trace!("registering sentinel {name}");
        self.constructors.insert(name, Arc::new(constructor));
    }

    /// Fresh, unconfigured sentinel
    pub fn create(&self, name: &str) -> Result<Box<dyn Sentinel>, SentinelError> {
        self.constructors
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| SentinelError::UnknownType(name.to_string()))
    }

    /// Create the alarm's sentinel and configure it from the alarm's config
    pub fn build(&self, alarm: &Alarm) -> Result<Box<dyn Sentinel>, SentinelError> {
        let mut sentinel = self.create(&alarm.sentinel_type)?;
        sentinel.configure(&alarm.config)?;
        Ok(sentinel)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for SentinelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentinelRegistry")
            .field("names", &self.names())
            .finish()
    }
}
