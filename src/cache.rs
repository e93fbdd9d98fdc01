use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use serde::Serialize;
use tempfile::Builder;

use crate::domain::{RawFeed, Source};
use crate::error::DataError;

/// Local file cache holding the last downloaded copy of every feed.
#[derive(Debug, Clone)]
pub struct StaleCache {
    cache_root: Utf8PathBuf,
}

impl StaleCache {
    pub fn new(cache_root: Utf8PathBuf) -> Self {
        Self { cache_root }
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn feed_path(&self, source: &Source) -> Utf8PathBuf {
        self.cache_root.join(&source.file_name)
    }

    pub fn ensure_cache_root(&self) -> Result<(), DataError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| DataError::Filesystem(err.to_string()))
    }

    pub fn exists(&self, source: &Source) -> bool {
        self.feed_path(source).as_std_path().is_file()
    }

    /// Last-modified time of the cached copy, if there is one.
    pub fn modified(&self, source: &Source) -> Option<DateTime<Local>> {
        let metadata = fs::metadata(self.feed_path(source).as_std_path()).ok()?;
        if !metadata.is_file() {
            return None;
        }
        metadata.modified().ok().map(DateTime::<Local>::from)
    }

    pub fn needs_refresh(&self, source: &Source) -> bool {
        self.needs_refresh_at(source, Local::now())
    }

    pub fn needs_refresh_at(&self, source: &Source, now: DateTime<Local>) -> bool {
        match self.modified(source) {
            Some(modified) => is_stale(modified, now),
            None => true,
        }
    }

    /// Newest modification time across the given sources' cached copies.
    pub fn last_update<'a>(
        &self,
        sources: impl IntoIterator<Item = &'a Source>,
    ) -> Option<DateTime<Local>> {
        sources
            .into_iter()
            .filter_map(|source| self.modified(source))
            .max()
    }

    pub fn read(&self, source: &Source) -> Result<RawFeed, DataError> {
        let path = self.feed_path(source);
        let bytes = fs::read(path.as_std_path())
            .map_err(|err| DataError::Filesystem(format!("read {path}: {err}")))?;
        let modified = self.modified(source).unwrap_or_else(Local::now);
        Ok(RawFeed {
            source: source.id,
            path,
            bytes,
            modified,
        })
    }

    /// Replaces the cached copy through a sibling temp file and a rename.
    pub fn store(&self, feed: &RawFeed) -> Result<(), DataError> {
        let parent = feed
            .path
            .parent()
            .ok_or_else(|| DataError::Filesystem("invalid cache path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| DataError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("covid19-feed")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| DataError::Filesystem(err.to_string()))?;
        temp.write_all(&feed.bytes)
            .map_err(|err| DataError::Filesystem(err.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| DataError::Filesystem(err.to_string()))?;
        temp.persist(feed.path.as_std_path())
            .map_err(|err| DataError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn entries<'a>(&self, sources: impl IntoIterator<Item = &'a Source>) -> Vec<CacheEntry> {
        sources
            .into_iter()
            .map(|source| CacheEntry {
                source: source.id.to_string(),
                path: self.feed_path(source).to_string(),
                modified: self.modified(source),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub source: String,
    pub path: String,
    pub modified: Option<DateTime<Local>>,
}

/// A cached copy is stale once the local calendar date has moved on.
pub fn is_stale(modified: DateTime<Local>, now: DateTime<Local>) -> bool {
    modified.date_naive() != now.date_naive()
}
