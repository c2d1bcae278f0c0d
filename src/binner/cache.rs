//! Memoizing binner store shared by all pipelines of a reduction context.
//!
//! Each key owns a slot guarded by its own mutex. The first caller for a key
//! builds the binner while holding the slot; concurrent callers for the same
//! key block on that slot and receive the finished binner, so at most one
//! build runs per key. Callers for other keys are never blocked by a build.
//! A failed build leaves the slot empty and only fails the calling request.
//!
//! The cache holds at most `capacity` keys and drops the least recently used
//! one to make room. Requests carrying a geometry version older than the
//! newest seen are served with a fresh binner that is never stored.
use super::{BinResolution, BinUnit, Binner};
use crate::error::{ensure_shape, Result};
use crate::geometry::{GeometryHandle, GeometryKey};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Exact tuple a binner is valid for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BinnerKey {
    pub geometry: GeometryKey,
    pub geometry_version: u64,
    pub shape: (usize, usize),
    pub resolution: BinResolution,
    pub unit: BinUnit,
}

/// Default number of binners kept alive by a [`BinnerCache`].
pub const DEFAULT_BINNER_CAPACITY: usize = 8;

type Slot = Arc<Mutex<Option<Arc<Binner>>>>;

struct Entry {
    slot: Slot,
    last_used: u64,
}

#[derive(Default)]
struct Entries {
    newest_version: u64,
    clock: u64,
    slots: HashMap<BinnerKey, Entry>,
}

pub struct BinnerCache {
    entries: Mutex<Entries>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for BinnerCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BINNER_CAPACITY)
    }
}

impl BinnerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding at most `capacity` binners (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the binner for this exact configuration, building it on a miss.
    pub fn get_binner(
        &self,
        geometry: &GeometryHandle,
        mask_shape: (usize, usize),
        resolution: BinResolution,
        unit: BinUnit,
    ) -> Result<Arc<Binner>> {
        ensure_shape("binner", geometry.geometry.detector_shape, mask_shape)?;
        resolution.validate()?;
        let key = BinnerKey {
            geometry: geometry.geometry.key(),
            geometry_version: geometry.version,
            shape: mask_shape,
            resolution,
            unit,
        };

        let slot = self.slot_for(&key);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(binner) = guard.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(binner));
        }

        let binner = Arc::new(Binner::build(
            &geometry.geometry,
            mask_shape,
            resolution,
            unit,
        )?);
        self.misses.fetch_add(1, Ordering::Relaxed);
        info!(
            "Binner cache miss: built {} bins ({:?}, {:?}) for geometry v{} in {:.3} ms",
            binner.bin_count(),
            unit,
            resolution,
            geometry.version,
            binner.build_ms()
        );
        *guard = Some(Arc::clone(&binner));
        Ok(binner)
    }

    fn slot_for(&self, key: &BinnerKey) -> Slot {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if key.geometry_version < entries.newest_version {
            debug!(
                "Binner for stale geometry v{} (newest v{}) is built uncached",
                key.geometry_version, entries.newest_version
            );
            return Slot::default();
        }
        if key.geometry_version > entries.newest_version {
            let newest = key.geometry_version;
            let before = entries.slots.len();
            entries.slots.retain(|k, _| k.geometry_version >= newest);
            entries.newest_version = newest;
            let evicted = before - entries.slots.len();
            if evicted > 0 {
                debug!("Evicted {evicted} binner(s) built for geometry older than v{newest}");
            }
        }

        entries.clock += 1;
        let now = entries.clock;
        if let Some(entry) = entries.slots.get_mut(key) {
            entry.last_used = now;
            return Arc::clone(&entry.slot);
        }
        if entries.slots.len() >= self.capacity {
            let oldest = entries
                .slots
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                entries.slots.remove(&oldest);
                debug!("Evicted least recently used binner ({:?})", oldest.geometry);
            }
        }
        let slot = Slot::default();
        entries.slots.insert(
            *key,
            Entry {
                slot: Arc::clone(&slot),
                last_used: now,
            },
        );
        slot
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of keys currently tracked (including ones whose build failed).
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .clear();
    }
}
