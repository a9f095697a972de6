//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Provision watcher cache."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use ds_common::{DsError, DsResult};
use ds_models::{AdminState, ProvisionWatcher};
use parking_lot::RwLock;

/// Provision watchers owned by this service, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct WatcherCache {
    watchers: Arc<RwLock<HashMap<String, ProvisionWatcher>>>,
}

impl WatcherCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_name(&self, name: &str) -> Option<ProvisionWatcher> {
        self.watchers.read().get(name).cloned()
    }

    pub fn all(&self) -> Vec<ProvisionWatcher> {
        let mut all: Vec<_> = self.watchers.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.watchers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.read().is_empty()
    }

    pub fn add(&self, watcher: ProvisionWatcher) -> DsResult<()> {
        let mut watchers = self.watchers.write();
        if watchers.contains_key(&watcher.name) {
            return Err(DsError::duplicate(format!(
                "provision watcher {} already exists in cache",
                watcher.name
            )));
        }
        watchers.insert(watcher.name.clone(), watcher);
        Ok(())
    }

    pub fn update(&self, watcher: ProvisionWatcher) -> DsResult<()> {
        let mut watchers = self.watchers.write();
        if watchers.remove(&watcher.name).is_none() {
            return Err(DsError::not_found(format!(
                "provision watcher {} does not exist in cache",
                watcher.name
            )));
        }
        watchers.insert(watcher.name.clone(), watcher);
        Ok(())
    }

    pub fn remove_by_name(&self, name: &str) -> DsResult<ProvisionWatcher> {
        self.watchers.write().remove(name).ok_or_else(|| {
            DsError::not_found(format!("provision watcher {name} does not exist in cache"))
        })
    }

    pub fn update_admin_state(&self, name: &str, state: &str) -> DsResult<()> {
        let state: AdminState = state.parse()?;
        let mut watchers = self.watchers.write();
        let watcher = watchers.get_mut(name).ok_or_else(|| {
            DsError::not_found(format!("provision watcher {name} does not exist in cache"))
        })?;
        watcher.admin_state = state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_common::ErrorKind;

    #[test]
    fn lifecycle() {
        let cache = WatcherCache::new();
        cache.add(ProvisionWatcher::new("w1", "P")).unwrap();
        assert!(cache
            .add(ProvisionWatcher::new("w1", "Q"))
            .unwrap_err()
            .is(ErrorKind::DuplicateName));
        cache.update(ProvisionWatcher::new("w1", "Q")).unwrap();
        assert_eq!(cache.for_name("w1").unwrap().profile_name, "Q");
        cache.update_admin_state("w1", "LOCKED").unwrap();
        assert_eq!(cache.all()[0].admin_state, AdminState::Locked);
        cache.remove_by_name("w1").unwrap();
        assert!(cache.is_empty());
    }
}
