//! Song and fingerprint persistence.
//!
//! Stores are handed around as `Arc<dyn FingerprintStore>`; every call is an
//! independent transaction, so uploads for different songs never interfere.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod database;

pub use crate::fingerprint::FingerprintEntry;
pub use database::SqliteStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Song {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait FingerprintStore: Send + Sync {
    async fn create_song(&self, title: &str, artist: &str) -> Result<Song>;

    /// Attach entries to an existing song in one transaction.
    async fn add_fingerprints(&self, song_id: i64, entries: &[FingerprintEntry]) -> Result<()>;

    /// Create a song together with its entries; either everything is stored
    /// or nothing is.
    async fn register_song(&self, title: &str, artist: &str, entries: &[FingerprintEntry]) -> Result<Song>;

    async fn list_songs(&self) -> Result<Vec<Song>>;

    async fn get_song(&self, song_id: i64) -> Result<Option<Song>>;

    async fn fingerprints_for_song(&self, song_id: i64) -> Result<Vec<FingerprintEntry>>;

    /// Remove a song and its entries. Returns whether it existed.
    async fn delete_song(&self, song_id: i64) -> Result<bool>;
}

#[derive(Default)]
struct MemoryInner {
    last_id: i64,
    songs: BTreeMap<i64, Song>,
    fingerprints: BTreeMap<i64, Vec<FingerprintEntry>>,
}

/// Process-local store, mainly for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryInner {
    fn insert_song(&mut self, title: &str, artist: &str) -> Song {
        self.last_id += 1;
        let song = Song {
            id: self.last_id,
            title: title.to_string(),
            artist: artist.to_string(),
            created_at: Utc::now(),
        };
        self.songs.insert(song.id, song.clone());
        song
    }
}

#[async_trait::async_trait]
impl FingerprintStore for MemoryStore {
    async fn create_song(&self, title: &str, artist: &str) -> Result<Song> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.insert_song(title, artist))
    }

    async fn add_fingerprints(&self, song_id: i64, entries: &[FingerprintEntry]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.songs.contains_key(&song_id) {
            return Err(Error::NotFound(song_id));
        }
        inner.fingerprints.entry(song_id).or_default().extend_from_slice(entries);
        Ok(())
    }

    async fn register_song(&self, title: &str, artist: &str, entries: &[FingerprintEntry]) -> Result<Song> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let song = inner.insert_song(title, artist);
        inner.fingerprints.insert(song.id, entries.to_vec());
        Ok(song)
    }

    async fn list_songs(&self) -> Result<Vec<Song>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.songs.values().cloned().collect())
    }

    async fn get_song(&self, song_id: i64) -> Result<Option<Song>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.songs.get(&song_id).cloned())
    }

    async fn fingerprints_for_song(&self, song_id: i64) -> Result<Vec<FingerprintEntry>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.songs.contains_key(&song_id) {
            return Err(Error::NotFound(song_id));
        }
        Ok(inner.fingerprints.get(&song_id).cloned().unwrap_or_default())
    }

    async fn delete_song(&self, song_id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.fingerprints.remove(&song_id);
        Ok(inner.songs.remove(&song_id).is_some())
    }
}
