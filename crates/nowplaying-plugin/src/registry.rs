//! Every key the host has shown us, and which of them are live.
//!
//! An entry outlives its activity: deactivating a key drops its timers and
//! removes it from the active set, but the entry itself stays addressable.
//! Anything that is about to act on a key asks [`KeyRegistry::is_active`]
//! first.

use nowplaying_proto::keys::{KeyConfig, KeyKind};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

use crate::interpolate::InterpolationState;
use crate::timers::TimerHandle;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId {
    pub device_id: String,
    pub key_uid: String,
}

impl KeyId {
    pub fn new(device_id: impl Into<String>, key_uid: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            key_uid: key_uid.into(),
        }
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.device_id, self.key_uid)
    }
}

/// The two periodic timers of a now-playing key.
#[derive(Debug, Default)]
pub struct KeyTimers {
    pub fetch: Option<TimerHandle>,
    pub interpolation: Option<TimerHandle>,
}

impl KeyTimers {
    pub fn live_count(&self) -> usize {
        self.fetch.is_some() as usize + self.interpolation.is_some() as usize
    }
}

#[derive(Debug)]
pub struct KeyEntry {
    pub id: KeyId,
    pub width: u32,
    pub config: KeyConfig,
    pub interpolation: InterpolationState,
    /// Counter keys only.
    pub counter: Option<i64>,
    pub timers: KeyTimers,
}

impl KeyEntry {
    fn new(id: KeyId, width: u32, config: KeyConfig) -> Self {
        Self {
            id,
            width,
            config,
            interpolation: InterpolationState::default(),
            counter: None,
            timers: KeyTimers::default(),
        }
    }

    pub fn kind(&self) -> KeyKind {
        self.config.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Unseen or previously deactivated: a fresh entry.
    New,
    /// Already active; config refreshed, timers and interpolation untouched.
    Reaffirmed,
}

#[derive(Default)]
pub struct KeyRegistry {
    entries: HashMap<KeyId, KeyEntry>,
    active: HashSet<KeyId>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: KeyId, width: u32, config: KeyConfig) -> Registration {
        if self.active.contains(&id) {
            if let Some(entry) = self.entries.get_mut(&id) {
                if entry.kind() == config.kind() {
                    entry.width = width;
                    entry.config = config;
                    return Registration::Reaffirmed;
                }
                debug!("Key {} changed kind, registering fresh", id);
            }
        }
        self.entries
            .insert(id.clone(), KeyEntry::new(id.clone(), width, config));
        self.active.insert(id);
        Registration::New
    }

    /// Stop a key's timers and take it out of the active set.  Returns
    /// whether it was active.  Unknown keys are already inactive.
    pub fn deactivate(&mut self, id: &KeyId) -> bool {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.timers = KeyTimers::default();
        }
        self.active.remove(id)
    }

    /// Deactivate every key of a device, returning those that were active.
    pub fn deactivate_device(&mut self, device_id: &str) -> Vec<KeyId> {
        let ids: Vec<KeyId> = self
            .active
            .iter()
            .filter(|id| id.device_id == device_id)
            .cloned()
            .collect();
        for id in &ids {
            self.deactivate(id);
        }
        ids
    }

    pub fn deactivate_all(&mut self) -> Vec<KeyId> {
        let ids = self.active_ids();
        for id in &ids {
            self.deactivate(id);
        }
        ids
    }

    pub fn is_active(&self, id: &KeyId) -> bool {
        self.active.contains(id)
    }

    pub fn get(&self, id: &KeyId) -> Option<&KeyEntry> {
        self.entries.get(id)
    }

    pub fn get_active(&self, id: &KeyId) -> Option<&KeyEntry> {
        if !self.is_active(id) {
            return None;
        }
        self.entries.get(id)
    }

    pub fn get_active_mut(&mut self, id: &KeyId) -> Option<&mut KeyEntry> {
        if !self.active.contains(id) {
            return None;
        }
        self.entries.get_mut(id)
    }

    /// Active keys in a stable order.
    pub fn active_ids(&self) -> Vec<KeyId> {
        let mut ids: Vec<KeyId> = self.active.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn active_of_kind(&self, kind: KeyKind) -> Vec<KeyId> {
        self.active_ids()
            .into_iter()
            .filter(|id| self.entries.get(id).map(|e| e.kind()) == Some(kind))
            .collect()
    }

    pub fn active_devices(&self) -> HashSet<String> {
        self.active.iter().map(|id| id.device_id.clone()).collect()
    }

    /// Install both timers of a key, replacing (and so cancelling) any old
    /// pair.  Ignored for inactive keys.
    pub fn set_timers(&mut self, id: &KeyId, fetch: TimerHandle, interpolation: TimerHandle) {
        if let Some(entry) = self.get_active_mut(id) {
            entry.timers = KeyTimers {
                fetch: Some(fetch),
                interpolation: Some(interpolation),
            };
        }
    }

    pub fn has_timers(&self, id: &KeyId) -> bool {
        self.entries
            .get(id)
            .map(|e| e.timers.live_count() > 0)
            .unwrap_or(false)
    }

    pub fn live_timer_count(&self) -> usize {
        self.entries.values().map(|e| e.timers.live_count()).sum()
    }
}
