//! Shazam-style audio fingerprinting.
//!
//! Decoded audio goes through a mel spectrogram, local peak picking and
//! target-zone pair hashing; the resulting hashes are stored per song.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod persistance;
pub mod routes;
pub mod server;

pub use error::{Error, FingerprintError, Result};
pub use fingerprint::{FingerprintConfig, FingerprintMap, fingerprint_audio, fingerprint_pipeline};
pub use persistance::{FingerprintStore, MemoryStore, Song, SqliteStore};
