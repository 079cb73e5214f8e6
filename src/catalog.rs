//! Offline catalog backed by SQLite with an FTS5 index.
//!
//! Rows hold one catalog track each; the FTS table indexes the folded title
//! (with its mix name) and artist names. Search is a bm25-ranked OR query over
//! the folded query tokens, which tolerates the extra words generated queries
//! carry ("remix", "extended mix", reversed artist order).

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;

use crate::models::CandidateMetadata;
use crate::normalize::{fold_text, tokens};
use crate::source::CandidateSource;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tracks (
        id INTEGER PRIMARY KEY,
        url TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        mix_name TEXT,
        artists TEXT NOT NULL,
        key TEXT,
        bpm REAL,
        label TEXT,
        genre TEXT,
        release_name TEXT,
        release_date TEXT
    );

    CREATE VIRTUAL TABLE IF NOT EXISTS tracks_fts USING fts5(
        title, artists,
        tokenize='unicode61 remove_diacritics 2'
    );";

/// One catalog track as imported from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogEntry {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub mix_name: Option<String>,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub bpm: Option<f32>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub release_name: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
}

impl CatalogEntry {
    /// "Title (Mix Name)", or the bare title when there is no mix name.
    pub fn display_title(&self) -> String {
        full_title(&self.title, self.mix_name.as_deref())
    }
}

fn full_title(title: &str, mix_name: Option<&str>) -> String {
    match mix_name.map(str::trim).filter(|m| !m.is_empty()) {
        Some(mix) if !title.to_lowercase().contains(&mix.to_lowercase()) => format!("{} ({})", title, mix),
        _ => title.to_string(),
    }
}

/// Year from an ISO-like date ("2019-04-12", "2019").
pub fn release_year(date: Option<&str>) -> Option<i32> {
    let date = date?.trim();
    let year = date.get(..4)?;
    if year.chars().all(|c| c.is_ascii_digit()) {
        year.parse().ok()
    } else {
        None
    }
}

pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("Failed to open catalog {:?}", path))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("Failed to create catalog schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("catalog connection poisoned"))
    }

    /// Insert entries in one transaction. Entries whose URL already exists are skipped.
    pub fn insert(&self, entries: &[CatalogEntry]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut insert_track = tx.prepare_cached(
                "INSERT OR IGNORE INTO tracks
                    (url, title, mix_name, artists, key, bpm, label, genre, release_name, release_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            let mut insert_fts =
                tx.prepare_cached("INSERT INTO tracks_fts (rowid, title, artists) VALUES (?1, ?2, ?3)")?;

            for entry in entries {
                if entry.url.trim().is_empty() {
                    continue;
                }
                let artists_json = serde_json::to_string(&entry.artists)?;
                let changed = insert_track.execute(params![
                    entry.url,
                    entry.title,
                    entry.mix_name,
                    artists_json,
                    entry.key,
                    entry.bpm,
                    entry.label,
                    entry.genre,
                    entry.release_name,
                    entry.release_date,
                ])?;
                if changed == 0 {
                    continue;
                }
                let id = tx.last_insert_rowid();
                insert_fts.execute(params![
                    id,
                    fold_text(&entry.display_title()),
                    fold_text(&entry.artists.join(" ")),
                ])?;
                inserted += 1;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Load a JSON array of [`CatalogEntry`] objects.
    pub fn import_json(&self, path: &Path) -> Result<usize> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let entries: Vec<CatalogEntry> =
            serde_json::from_str(&text).with_context(|| format!("Failed to parse catalog JSON {:?}", path))?;
        let inserted = self.insert(&entries)?;
        tracing::info!("imported {} of {} catalog entries from {:?}", inserted, entries.len(), path);
        Ok(inserted)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn try_search(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        let mut words = tokens(query);
        let mut seen = rustc_hash::FxHashSet::default();
        words.retain(|w| seen.insert(w.clone()));
        if words.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }
        let fts_query = words
            .iter()
            .map(|w| format!("\"{}\"", w))
            .collect::<Vec<_>>()
            .join(" OR ");

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT t.url
             FROM tracks_fts
             JOIN tracks t ON t.id = tracks_fts.rowid
             WHERE tracks_fts MATCH ?1
             ORDER BY bm25(tracks_fts), t.id
             LIMIT ?2",
        )?;
        let urls = stmt
            .query_map(params![fts_query, max_results as i64], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(urls)
    }

    pub fn try_fetch(&self, url: &str) -> Result<Option<CandidateMetadata>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT title, mix_name, artists, key, bpm, label, genre, release_name, release_date
             FROM tracks WHERE url = ?1",
        )?;
        let row = stmt
            .query_row([url], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })
            .optional()?;

        let Some((title, mix_name, artists, key, bpm, label, genre, release_name, release_date)) = row else {
            return Ok(None);
        };
        if title.trim().is_empty() {
            return Ok(None);
        }
        let artists: Vec<String> =
            serde_json::from_str(&artists).with_context(|| format!("Bad artists column for {}", url))?;

        Ok(Some(CandidateMetadata {
            title: full_title(&title, mix_name.as_deref()),
            artists,
            key,
            bpm: bpm.map(|b| b as f32),
            label,
            genre,
            release_name,
            release_year: release_year(release_date.as_deref()),
            release_date,
        }))
    }
}

impl CandidateSource for SqliteCatalog {
    fn search(&self, query: &str, max_results: usize) -> Vec<String> {
        self.try_search(query, max_results).unwrap_or_else(|e| {
            tracing::warn!("catalog search failed for '{}': {:#}", query, e);
            Vec::new()
        })
    }

    fn fetch_metadata(&self, url: &str) -> Option<CandidateMetadata> {
        self.try_fetch(url).unwrap_or_else(|e| {
            tracing::warn!("catalog fetch failed for {}: {:#}", url, e);
            None
        })
    }
}
