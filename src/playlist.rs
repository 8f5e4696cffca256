//! The collection the engine cycles through, and the store seam it reads it by.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::events::InventoryEvent;
use crate::media::MediaReference;

pub const DEFAULT_INTERVAL_SECONDS: u32 = 5;

/// Maps a logical index to a position in the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum Ordering {
    /// The order the user curated.
    #[default]
    Selection,
    /// A shuffled order, stable until the collection changes.
    Random,
}

/// What the engine needs from persisted preferences.
///
/// Implementations use interior mutability; the engine is the only writer of
/// the index and timestamp but other tasks may edit the collection.
pub trait PlaylistStore: Send + Sync {
    fn count(&self) -> usize;
    fn ordering(&self) -> Ordering;
    fn current_index(&self) -> usize;
    fn reference_at(&self, logical_index: usize, ordering: Ordering) -> Option<MediaReference>;
    fn set_current_index(&self, index: usize);
    fn last_advance_timestamp(&self) -> Option<SystemTime>;
    fn set_last_advance_timestamp(&self, at: SystemTime);
    fn interval_seconds(&self) -> u32;

    /// Record a committed transition as one unit.
    fn commit(&self, index: usize, advanced_at: Option<SystemTime>) {
        self.set_current_index(index);
        if let Some(at) = advanced_at {
            self.set_last_advance_timestamp(at);
        }
    }
}

/// The part of the playlist that survives restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PersistedState {
    pub current_index: usize,
    #[serde(with = "humantime_serde")]
    pub last_advance: Option<SystemTime>,
    pub shuffle_seed: u64,
}

struct Inner {
    items: Vec<MediaReference>,
    ordering: Ordering,
    interval_seconds: u32,
    state: PersistedState,
    permutation: Option<Vec<usize>>,
}

impl Inner {
    fn position(&mut self, logical_index: usize, ordering: Ordering) -> Option<usize> {
        if logical_index >= self.items.len() {
            return None;
        }
        match ordering {
            Ordering::Selection => Some(logical_index),
            Ordering::Random => {
                let len = self.items.len();
                let seed = self.state.shuffle_seed;
                let perm = self.permutation.get_or_insert_with(|| {
                    let mut perm: Vec<usize> = (0..len).collect();
                    perm.shuffle(&mut StdRng::seed_from_u64(seed));
                    perm
                });
                perm.get(logical_index).copied()
            }
        }
    }

    fn invalidate(&mut self) {
        self.permutation = None;
    }
}

/// In-memory playlist, optionally mirrored to a JSON state file.
pub struct Playlist {
    inner: Mutex<Inner>,
    state_path: Option<PathBuf>,
}

impl Playlist {
    pub fn new(items: Vec<MediaReference>, ordering: Ordering, interval_seconds: u32) -> Self {
        let state = PersistedState {
            shuffle_seed: rand::random(),
            ..PersistedState::default()
        };
        Self::from_parts(items, ordering, interval_seconds, state, None)
    }

    /// Restore index, timestamp and shuffle seed from `path` if it exists.
    ///
    /// # Errors
    /// Returns [`Error::Io`] or [`Error::State`] if an existing file cannot be
    /// read or parsed.
    pub fn with_state_file(
        items: Vec<MediaReference>,
        ordering: Ordering,
        interval_seconds: u32,
        path: impl Into<PathBuf>,
    ) -> Result<Self, Error> {
        let path = path.into();
        let state = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let state: PersistedState = serde_json::from_str(&raw)?;
            info!(
                path = %path.display(),
                index = state.current_index,
                "restored playlist state"
            );
            state
        } else {
            PersistedState {
                shuffle_seed: rand::random(),
                ..PersistedState::default()
            }
        };
        Ok(Self::from_parts(
            items,
            ordering,
            interval_seconds,
            state,
            Some(path),
        ))
    }

    fn from_parts(
        items: Vec<MediaReference>,
        ordering: Ordering,
        interval_seconds: u32,
        state: PersistedState,
        state_path: Option<PathBuf>,
    ) -> Self {
        let mut deduped: Vec<MediaReference> = Vec::with_capacity(items.len());
        for item in items {
            if !deduped.contains(&item) {
                deduped.push(item);
            }
        }
        Self {
            inner: Mutex::new(Inner {
                items: deduped,
                ordering,
                interval_seconds,
                state,
                permutation: None,
            }),
            state_path,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn items(&self) -> Vec<MediaReference> {
        self.lock().items.clone()
    }

    pub fn state(&self) -> PersistedState {
        self.lock().state.clone()
    }

    /// Append a reference; duplicates (same uri) are ignored.
    pub fn push(&self, reference: MediaReference) -> bool {
        let mut inner = self.lock();
        if inner.items.contains(&reference) {
            return false;
        }
        inner.items.push(reference);
        inner.invalidate();
        true
    }

    pub fn remove(&self, uri: &str) -> bool {
        let mut inner = self.lock();
        let Some(pos) = inner.items.iter().position(|r| r.uri() == uri) else {
            return false;
        };
        inner.items.remove(pos);
        inner.invalidate();
        true
    }

    pub fn apply(&self, event: InventoryEvent) -> bool {
        match event {
            InventoryEvent::MediaAdded(reference) => {
                debug!(uri = %reference, "playlist: add");
                self.push(reference)
            }
            InventoryEvent::MediaRemoved(path) => {
                debug!(path = %path.display(), "playlist: remove");
                self.remove(&path.to_string_lossy())
            }
        }
    }

    pub fn set_ordering(&self, ordering: Ordering) {
        self.lock().ordering = ordering;
    }

    pub fn set_interval_seconds(&self, seconds: u32) {
        self.lock().interval_seconds = seconds;
    }

    /// Draw a new random order.
    pub fn reshuffle(&self, seed: u64) {
        let snapshot = {
            let mut inner = self.lock();
            inner.state.shuffle_seed = seed;
            inner.invalidate();
            inner.state.clone()
        };
        self.persist(&snapshot);
    }

    fn update_state(&self, f: impl FnOnce(&mut PersistedState)) {
        let snapshot = {
            let mut inner = self.lock();
            f(&mut inner.state);
            inner.state.clone()
        };
        self.persist(&snapshot);
    }

    fn persist(&self, state: &PersistedState) {
        let Some(path) = &self.state_path else {
            return;
        };
        if let Err(err) = write_state(path, state) {
            warn!(path = %path.display(), "failed to persist playlist state: {err}");
        }
    }
}

fn write_state(path: &Path, state: &PersistedState) -> Result<(), Error> {
    let json = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl PlaylistStore for Playlist {
    fn count(&self) -> usize {
        self.lock().items.len()
    }

    fn ordering(&self) -> Ordering {
        self.lock().ordering
    }

    fn current_index(&self) -> usize {
        self.lock().state.current_index
    }

    fn reference_at(&self, logical_index: usize, ordering: Ordering) -> Option<MediaReference> {
        let mut inner = self.lock();
        let pos = inner.position(logical_index, ordering)?;
        inner.items.get(pos).cloned()
    }

    fn set_current_index(&self, index: usize) {
        self.update_state(|s| s.current_index = index);
    }

    fn last_advance_timestamp(&self) -> Option<SystemTime> {
        self.lock().state.last_advance
    }

    fn set_last_advance_timestamp(&self, at: SystemTime) {
        self.update_state(|s| s.last_advance = Some(at));
    }

    fn interval_seconds(&self) -> u32 {
        self.lock().interval_seconds
    }

    fn commit(&self, index: usize, advanced_at: Option<SystemTime>) {
        self.update_state(|s| {
            s.current_index = index;
            if let Some(at) = advanced_at {
                s.last_advance = Some(at);
            }
        });
    }
}
