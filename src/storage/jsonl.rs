//! JSONL-based storage implementation with in-memory caching.
//!
//! Each collection lives in one `<name>.jsonl` file. Creates and appends go
//! to the end of the file; updates and deletes rewrite the file from cache.
//! Log collections (metrics) only ever use the append path.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{de::DeserializeOwned, Serialize};

use super::traits::{Filter, HasId, Storage};
use crate::error::{Result, TrellisError};

/// JSONL-backed storage with an in-memory cache per collection.
pub struct JsonlStorage {
    base_path: PathBuf,
    cache: RwLock<HashMap<String, Vec<serde_json::Value>>>,
}

impl JsonlStorage {
    /// Create a new JsonlStorage rooted at the given directory.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", collection))
    }

    /// Load a collection into cache if not already loaded.
    fn ensure_loaded(&self, collection: &str) -> Result<()> {
        {
            let cache = self.read_cache()?;
            if cache.contains_key(collection) {
                return Ok(());
            }
        }

        let mut cache = self.write_cache()?;
        if cache.contains_key(collection) {
            return Ok(());
        }

        let path = self.collection_path(collection);
        let mut records = Vec::new();
        if path.exists() {
            let file = File::open(&path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if !line.trim().is_empty() {
                    records.push(serde_json::from_str(&line)?);
                }
            }
        }

        cache.insert(collection.to_string(), records);
        Ok(())
    }

    fn read_cache(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Vec<serde_json::Value>>>> {
        self.cache
            .read()
            .map_err(|e| TrellisError::Storage(e.to_string()))
    }

    fn write_cache(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<serde_json::Value>>>> {
        self.cache
            .write()
            .map_err(|e| TrellisError::Storage(e.to_string()))
    }

    fn append_to_file(&self, collection: &str, record: &serde_json::Value) -> Result<()> {
        let path = self.collection_path(collection);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    /// Rewrite the entire collection file from cache.
    fn rewrite_file(&self, collection: &str) -> Result<()> {
        let cache = self.read_cache()?;
        let records = cache
            .get(collection)
            .ok_or_else(|| TrellisError::Storage(format!("collection not loaded: {}", collection)))?;

        let path = self.collection_path(collection);
        let mut file = File::create(&path)?;
        for record in records {
            writeln!(file, "{}", serde_json::to_string(record)?)?;
        }
        Ok(())
    }

    fn record_id(record: &serde_json::Value) -> Option<&str> {
        record.get("id").and_then(|v| v.as_str())
    }
}

impl Storage for JsonlStorage {
    fn create<T: Serialize + DeserializeOwned + HasId>(&self, collection: &str, record: &T) -> Result<()> {
        self.ensure_loaded(collection)?;

        let value = serde_json::to_value(record)?;

        // File first (source of truth), then cache
        self.append_to_file(collection, &value)?;

        let mut cache = self.write_cache()?;
        cache
            .get_mut(collection)
            .ok_or_else(|| TrellisError::Storage(format!("collection not loaded: {}", collection)))?
            .push(value);

        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>> {
        self.ensure_loaded(collection)?;

        let cache = self.read_cache()?;
        let records = cache
            .get(collection)
            .ok_or_else(|| TrellisError::Storage(format!("collection not loaded: {}", collection)))?;

        for record in records {
            if Self::record_id(record) == Some(id) {
                return Ok(Some(serde_json::from_value(record.clone())?));
            }
        }

        Ok(None)
    }

    fn update<T: Serialize + DeserializeOwned + HasId>(&self, collection: &str, id: &str, record: &T) -> Result<()> {
        self.ensure_loaded(collection)?;

        let value = serde_json::to_value(record)?;

        {
            let mut cache = self.write_cache()?;
            let records = cache
                .get_mut(collection)
                .ok_or_else(|| TrellisError::Storage(format!("collection not loaded: {}", collection)))?;

            let slot = records
                .iter_mut()
                .find(|r| Self::record_id(r) == Some(id))
                .ok_or_else(|| TrellisError::NotFound(id.to_string()))?;
            *slot = value;
        }

        self.rewrite_file(collection)
    }

    fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.ensure_loaded(collection)?;

        {
            let mut cache = self.write_cache()?;
            let records = cache
                .get_mut(collection)
                .ok_or_else(|| TrellisError::Storage(format!("collection not loaded: {}", collection)))?;

            let original_len = records.len();
            records.retain(|r| Self::record_id(r) != Some(id));

            if records.len() == original_len {
                return Err(TrellisError::NotFound(id.to_string()));
            }
        }

        self.rewrite_file(collection)
    }

    fn append<T: Serialize>(&self, collection: &str, record: &T) -> Result<()> {
        self.ensure_loaded(collection)?;

        let value = serde_json::to_value(record)?;
        self.append_to_file(collection, &value)?;

        let mut cache = self.write_cache()?;
        cache
            .get_mut(collection)
            .ok_or_else(|| TrellisError::Storage(format!("collection not loaded: {}", collection)))?
            .push(value);

        Ok(())
    }

    fn query<T: DeserializeOwned>(&self, collection: &str, filters: &[Filter]) -> Result<Vec<T>> {
        self.ensure_loaded(collection)?;

        let cache = self.read_cache()?;
        let records = cache
            .get(collection)
            .ok_or_else(|| TrellisError::Storage(format!("collection not loaded: {}", collection)))?;

        let mut results = Vec::new();
        for record in records {
            if filters.iter().all(|f| f.matches(record)) {
                results.push(serde_json::from_value(record.clone())?);
            }
        }

        Ok(results)
    }

    fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        self.query(collection, &[])
    }
}
