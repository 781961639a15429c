use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::InferencePlatform;
use super::backends::StubPlatform;

/// Registry of inference platforms by name.
///
/// The first registered platform becomes the default.
pub struct PlatformRegistry {
    platforms: BTreeMap<String, Arc<dyn InferencePlatform>>,
    default_name: Option<String>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self {
            platforms: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry holding every platform compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StubPlatform::new()));
        #[cfg(feature = "backend-tract")]
        registry.register(Arc::new(super::backends::TractPlatform::new()));
        registry
    }

    /// Register a platform, replacing any previous one with the same name.
    pub fn register(&mut self, platform: Arc<dyn InferencePlatform>) {
        let name = platform.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.platforms.insert(name, platform);
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.platforms.contains_key(name) {
            return Err(anyhow!("platform '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InferencePlatform>> {
        self.platforms.get(name).cloned()
    }

    pub fn default_platform(&self) -> Option<Arc<dyn InferencePlatform>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Registered names in sorted order.
    pub fn list(&self) -> Vec<String> {
        self.platforms.keys().cloned().collect()
    }

    /// Resolve a platform by name, or the default when no name is given.
    pub fn select(&self, name: Option<&str>) -> Result<Arc<dyn InferencePlatform>> {
        match name {
            Some(name) => self.get(name).ok_or_else(|| {
                anyhow!(
                    "inference platform '{}' is not available (registered: {})",
                    name,
                    self.list().join(", ")
                )
            }),
            None => self
                .default_platform()
                .ok_or_else(|| anyhow!("no inference platform registered")),
        }
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}
