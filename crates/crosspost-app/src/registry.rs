//! Platform registry
//!
//! Holds one immutable [`PlatformDescriptor`] per platform id, in
//! registration order. Platforms disabled in settings stay registered but are
//! hidden from listing and lookup.

use std::collections::{HashMap, HashSet};

use crosspost_core::prelude::*;
use crosspost_core::PlatformDescriptor;

use crate::catalog;
use crate::config::PlatformSettings;

#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    descriptors: Vec<PlatformDescriptor>,
    index: HashMap<String, usize>,
    disabled: HashSet<String>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in platform catalog
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for descriptor in catalog::builtin_descriptors() {
            if let Err(e) = registry.register(descriptor) {
                warn!("Skipping built-in platform: {}", e);
            }
        }
        registry
    }

    /// Add a descriptor; a second descriptor for the same id is rejected
    pub fn register(&mut self, descriptor: PlatformDescriptor) -> Result<()> {
        if self.index.contains_key(&descriptor.id) {
            return Err(Error::DuplicatePlatform { id: descriptor.id });
        }
        self.index
            .insert(descriptor.id.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn lookup(&self, platform_id: &str) -> Result<&PlatformDescriptor> {
        if self.disabled.contains(platform_id) {
            return Err(Error::unregistered(platform_id));
        }
        self.index
            .get(platform_id)
            .map(|&i| &self.descriptors[i])
            .ok_or_else(|| Error::unregistered(platform_id))
    }

    /// Enabled descriptors in registration order
    pub fn list_all(&self) -> Vec<&PlatformDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| !self.disabled.contains(&d.id))
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.list_all().into_iter().map(|d| d.id.clone()).collect()
    }

    pub fn contains(&self, platform_id: &str) -> bool {
        self.lookup(platform_id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.list_all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply the `[platforms]` settings section
    ///
    /// Unknown ids are logged and ignored.
    pub fn apply_settings(&mut self, settings: &PlatformSettings, default_ttl_secs: u64) {
        for descriptor in &mut self.descriptors {
            if descriptor.detection.cache_ttl_secs.is_none() {
                descriptor.detection.cache_ttl_secs = Some(default_ttl_secs);
            }
        }

        for id in &settings.disabled {
            if !self.index.contains_key(id) {
                warn!("Cannot disable unknown platform '{}'", id);
                continue;
            }
            debug!("Platform '{}' disabled by settings", id);
            self.disabled.insert(id.clone());
        }

        for (id, secs) in &settings.ttl_overrides {
            match self.index.get(id) {
                Some(&i) => self.descriptors[i].detection.cache_ttl_secs = Some(*secs),
                None => warn!("Cannot override TTL of unknown platform '{}'", id),
            }
        }
    }
}
