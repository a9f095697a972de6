//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Concurrent caches of the metadata owned by this service."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
//! Every cache hands out clones; nothing outside a cache holds a reference
//! into its maps. Lock order, when two caches are involved, is profile
//! before device.

mod device;
mod profile;
mod watcher;

pub use device::DeviceCache;
pub use profile::{CommandMethod, ProfileCache};
pub use watcher::WatcherCache;

/// The three caches, shared by clone.
#[derive(Debug, Clone, Default)]
pub struct Caches {
    pub devices: DeviceCache,
    pub profiles: ProfileCache,
    pub watchers: WatcherCache,
}

impl Caches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop `profile_name` when no cached device references it anymore, so the
    /// next reference re-fetches it. Returns whether the profile was removed.
    pub fn evict_unused_profile(&self, profile_name: &str) -> bool {
        self.profiles
            .remove_by_name(profile_name, &self.devices)
            .is_ok()
    }
}
