use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::persistance::{FingerprintEntry, FingerprintStore, Song};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS songs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    artist TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_songs_title ON songs (title);
CREATE INDEX IF NOT EXISTS idx_songs_artist ON songs (artist);

CREATE TABLE IF NOT EXISTS fingerprints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    song_id INTEGER NOT NULL REFERENCES songs (id) ON DELETE CASCADE,
    hash_value TEXT NOT NULL CHECK (hash_value <> ''),
    "offset" INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_fingerprints_hash ON fingerprints (hash_value);
CREATE INDEX IF NOT EXISTS idx_fingerprints_song ON fingerprints (song_id);
"#;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        info!(url, "connected to sqlite");
        Self::with_pool(pool).await
    }

    /// A private database that lives as long as the store.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

async fn insert_song(conn: &mut SqliteConnection, title: &str, artist: &str) -> Result<Song> {
    let created_at = Utc::now();
    let id = sqlx::query("INSERT INTO songs (title, artist, created_at) VALUES (?, ?, ?)")
        .bind(title)
        .bind(artist)
        .bind(created_at)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    Ok(Song { id, title: title.to_string(), artist: artist.to_string(), created_at })
}

async fn insert_fingerprints(conn: &mut SqliteConnection, song_id: i64, entries: &[FingerprintEntry]) -> Result<()> {
    for entry in entries {
        sqlx::query(r#"INSERT INTO fingerprints (song_id, hash_value, "offset") VALUES (?, ?, ?)"#)
            .bind(song_id)
            .bind(&entry.hash_value)
            .bind(entry.offset)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn song_exists(conn: &mut SqliteConnection, song_id: i64) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM songs WHERE id = ?")
        .bind(song_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

#[async_trait::async_trait]
impl FingerprintStore for SqliteStore {
    async fn create_song(&self, title: &str, artist: &str) -> Result<Song> {
        let mut conn = self.pool.acquire().await?;
        insert_song(&mut conn, title, artist).await
    }

    async fn add_fingerprints(&self, song_id: i64, entries: &[FingerprintEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if !song_exists(&mut tx, song_id).await? {
            return Err(Error::NotFound(song_id));
        }

        insert_fingerprints(&mut tx, song_id, entries).await?;
        tx.commit().await?;

        debug!(song_id, rows = entries.len(), "fingerprints added");
        Ok(())
    }

    async fn register_song(&self, title: &str, artist: &str, entries: &[FingerprintEntry]) -> Result<Song> {
        let mut tx = self.pool.begin().await?;

        let song = insert_song(&mut tx, title, artist).await?;
        insert_fingerprints(&mut tx, song.id, entries).await?;
        tx.commit().await?;

        info!(song_id = song.id, title, rows = entries.len(), "song registered");
        Ok(song)
    }

    async fn list_songs(&self) -> Result<Vec<Song>> {
        Ok(sqlx::query_as::<_, Song>("SELECT id, title, artist, created_at FROM songs ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_song(&self, song_id: i64) -> Result<Option<Song>> {
        Ok(sqlx::query_as::<_, Song>("SELECT id, title, artist, created_at FROM songs WHERE id = ?")
            .bind(song_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn fingerprints_for_song(&self, song_id: i64) -> Result<Vec<FingerprintEntry>> {
        let mut conn = self.pool.acquire().await?;
        if !song_exists(&mut conn, song_id).await? {
            return Err(Error::NotFound(song_id));
        }

        Ok(sqlx::query_as::<_, FingerprintEntry>(
            r#"SELECT hash_value, "offset" FROM fingerprints WHERE song_id = ? ORDER BY id"#,
        )
        .bind(song_id)
        .fetch_all(&mut *conn)
        .await?)
    }

    async fn delete_song(&self, song_id: i64) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM songs WHERE id = ?")
            .bind(song_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}
