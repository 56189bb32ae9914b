use std::path::Path as FsPath;
use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequestParts, Multipart, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::fingerprint::{FingerprintConfig, FingerprintEntry, FingerprintMap, fingerprint_audio};
use crate::persistance::{FingerprintStore, Song};
use crate::server::AppState;

const ACCEPTED_EXTENSIONS: [&str; 2] = ["mp3", "wav"];
const UNKNOWN_ARTIST: &str = "Unknown";

#[derive(Serialize)]
pub struct FingerprintResponse {
    fingerprints: FingerprintMap,
}

/// Fields of an upload form.
#[derive(Debug, Default)]
pub struct Upload {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl Upload {
    async fn read(mut form: Multipart) -> Result<Self> {
        let mut upload = Upload::default();
        let mut has_file = false;

        while let Some(field) = form.next_field().await? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("file") => {
                    upload.filename = field.file_name().map(str::to_string);
                    upload.bytes = field.bytes().await?.to_vec();
                    has_file = true;
                }
                Some("title") => upload.title = non_blank(field.text().await?),
                Some("artist") => upload.artist = non_blank(field.text().await?),
                _ => {}
            }
        }

        if !has_file {
            return Err(Error::MissingField("file"));
        }
        Ok(upload)
    }

    /// Lower-cased extension, if it is one we accept.
    fn accepted_extension(&self) -> Result<&'static str> {
        let filename = self.filename.as_deref().unwrap_or_default();
        let extension = FsPath::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        ACCEPTED_EXTENSIONS
            .into_iter()
            .find(|accepted| *accepted == extension)
            .ok_or_else(|| Error::UnsupportedFormat(format!("{filename:?}: only MP3 or WAV files are accepted")))
    }

    fn title(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        self.filename
            .as_deref()
            .and_then(|name| FsPath::new(name).file_stem())
            .and_then(|stem| stem.to_str())
            .unwrap_or("Untitled")
            .to_string()
    }
}

/// `{id}` path segment; a malformed id is rejected with the JSON error body.
#[derive(Debug, Clone, Copy)]
pub struct SongId(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for SongId {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Path(id) = Path::<i64>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| Error::InvalidSongId(rejection.body_text()))?;
        Ok(SongId(id))
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

async fn fingerprint_blocking(
    config: Arc<FingerprintConfig>,
    bytes: Vec<u8>,
    extension: Option<&'static str>,
) -> Result<FingerprintMap> {
    tokio::task::spawn_blocking(move || fingerprint_audio(&bytes, extension, &config))
        .await
        .map_err(|e| Error::Internal(format!("fingerprint task failed: {e}")))?
}

/// Validate, fingerprint and atomically store an upload.
pub async fn store_upload(state: &AppState, upload: Upload) -> Result<Song> {
    let extension = upload.accepted_extension().inspect_err(|e| warn!(error = %e, "upload rejected"))?;
    let title = upload.title();
    let artist = upload.artist.clone().unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    info!(%title, bytes = upload.bytes.len(), "received upload");

    let fingerprints = fingerprint_blocking(state.fingerprint.clone(), upload.bytes, Some(extension)).await?;
    let entries = fingerprints.into_entries();

    state.store.register_song(&title, &artist, &entries).await
}

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Hello World" }))
}

pub async fn list_songs(State(state): State<AppState>) -> Result<Json<Vec<Song>>> {
    Ok(Json(state.store.list_songs().await?))
}

pub async fn get_song(State(state): State<AppState>, SongId(id): SongId) -> Result<Json<Song>> {
    state.store.get_song(id).await?.map(Json).ok_or(Error::NotFound(id))
}

pub async fn song_fingerprints(
    State(state): State<AppState>,
    SongId(id): SongId,
) -> Result<Json<Vec<FingerprintEntry>>> {
    Ok(Json(state.store.fingerprints_for_song(id).await?))
}

pub async fn delete_song(State(state): State<AppState>, SongId(id): SongId) -> Result<StatusCode> {
    if state.store.delete_song(id).await? {
        info!(song_id = id, "song deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::NotFound(id))
    }
}

/// Expects a form field named `file`; `title` and `artist` are optional.
pub async fn upload_song(State(state): State<AppState>, form: Multipart) -> Result<Json<Song>> {
    let upload = Upload::read(form).await?;
    Ok(Json(store_upload(&state, upload).await?))
}

/// Fingerprint an upload without storing it.
pub async fn fingerprint(State(state): State<AppState>, form: Multipart) -> Result<Json<FingerprintResponse>> {
    let upload = Upload::read(form).await?;
    let extension = upload.accepted_extension()?;

    let fingerprints = fingerprint_blocking(state.fingerprint.clone(), upload.bytes, Some(extension)).await?;
    Ok(Json(FingerprintResponse { fingerprints }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::persistance::MemoryStore;
    use std::f32::consts::PI;
    use std::io::Cursor;

    fn state() -> AppState {
        AppState::new(Arc::new(MemoryStore::new()), FingerprintConfig::default())
    }

    pub(crate) fn tone_wav() -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..44_100 {
                let t = i as f32 / 22_050.0;
                let freq = if t < 1.0 { 440.0 } else { 880.0 };
                writer.write_sample(((2.0 * PI * freq * t).sin() * 12_000.0) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn upload(filename: &str, bytes: Vec<u8>) -> Upload {
        Upload { filename: Some(filename.to_string()), bytes, ..Default::default() }
    }

    #[tokio::test]
    async fn upload_is_fingerprinted_and_stored() {
        let state = state();
        let song = store_upload(&state, upload("Isibusiso.wav", tone_wav())).await.unwrap();

        assert_eq!(song.title, "Isibusiso");
        assert_eq!(song.artist, "Unknown");

        let stored = state.store.fingerprints_for_song(song.id).await.unwrap();
        assert!(!stored.is_empty());
        assert!(stored.iter().all(|e| e.hash_value.len() == 20));
    }

    #[tokio::test]
    async fn explicit_title_and_artist_win() {
        let state = state();
        let mut form = upload("track01.WAV", tone_wav());
        form.title = Some("Song 3".into());
        form.artist = Some("Artist 3".into());

        let song = store_upload(&state, form).await.unwrap();
        assert_eq!((song.title.as_str(), song.artist.as_str()), ("Song 3", "Artist 3"));
    }

    #[tokio::test]
    async fn unsupported_files_are_rejected_before_storage() {
        let state = state();
        let err = store_upload(&state, upload("notes.txt", b"hello".to_vec())).await.unwrap_err();

        assert!(matches!(err, Error::UnsupportedFormat(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.list_songs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_audio_stores_nothing() {
        let state = state();
        let err = store_upload(&state, upload("broken.mp3", vec![0u8; 64])).await.unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.list_songs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn song_lookup_routes() {
        let state = state();
        let created = state.store.create_song("Song 1", "Artist 1").await.unwrap();

        let Json(found) = get_song(State(state.clone()), SongId(created.id)).await.unwrap();
        assert_eq!(found, created);

        let Json(all) = list_songs(State(state.clone())).await.unwrap();
        assert_eq!(all.len(), 1);

        let missing = get_song(State(state.clone()), SongId(42)).await.unwrap_err();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        assert_eq!(
            delete_song(State(state.clone()), SongId(created.id)).await.unwrap(),
            StatusCode::NO_CONTENT
        );
        assert!(delete_song(State(state), SongId(created.id)).await.is_err());
    }

    #[test]
    fn title_falls_back_to_file_stem() {
        assert_eq!(upload("My Song.mp3", vec![]).title(), "My Song");
        assert_eq!(Upload::default().title(), "Untitled");
        assert!(upload("clip.Mp3", vec![]).accepted_extension().is_ok());
        assert!(upload("clip.flac", vec![]).accepted_extension().is_err());
        assert!(Upload::default().accepted_extension().is_err());
    }
}
