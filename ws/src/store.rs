//! Core Store implementation
//!
//! One JSONL file per collection under the base path. Mutations append a
//! full-record line (or a tombstone for deletes); the latest line per id
//! wins. Opening a store replays every file and compacts collections whose
//! dead-line ratio is high.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::record::{Filter, IndexValue, Record};

/// Fraction of dead lines that triggers compaction on open
const COMPACT_THRESHOLD: f64 = 0.5;

/// A tombstone line marking a deleted record
#[derive(Debug, Deserialize, serde::Serialize)]
struct Tombstone {
    #[serde(rename = "_deleted")]
    deleted: String,
}

/// In-memory state for one collection
#[derive(Default)]
struct Collection {
    /// id -> latest record value
    records: HashMap<String, Value>,
    /// field -> value -> ids
    indexes: HashMap<String, HashMap<IndexValue, HashSet<String>>>,
    /// Lines written since last compaction (live + dead)
    line_count: usize,
}

/// The record store
pub struct Store {
    base_path: PathBuf,
    collections: HashMap<String, Collection>,
}

impl Store {
    /// Open or create a store at the given path, replaying existing JSONL files
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        let mut store = Self {
            base_path,
            collections: HashMap::new(),
        };

        let entries: Vec<PathBuf> = fs::read_dir(&store.base_path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();

        for file in entries {
            if let Some(name) = file.file_stem().and_then(|s| s.to_str()) {
                let name = name.to_string();
                store.load_collection(&name, &file)?;
            }
        }

        debug!(path = %store.base_path.display(), collections = store.collections.len(), "Opened store");
        Ok(store)
    }

    /// Create a new record; fails if the id already exists
    pub fn create<T: Record>(&mut self, record: &T) -> Result<(), StoreError> {
        let collection = self.collection_mut(T::collection_name());
        if collection.records.contains_key(record.id()) {
            return Err(StoreError::Duplicate(record.id().to_string()));
        }
        self.put(record)
    }

    /// Insert or replace a record
    pub fn put<T: Record>(&mut self, record: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;
        let line = serde_json::to_string(&value)?;
        self.append_line(T::collection_name(), &line)?;

        let id = record.id().to_string();
        let fields = record.indexed_fields();
        let collection = self.collection_mut(T::collection_name());
        collection.records.insert(id.clone(), value);
        collection.line_count += 1;
        Self::unindex(collection, &id);
        Self::index(collection, &id, &fields);
        Ok(())
    }

    /// Update an existing record; fails if it does not exist
    pub fn update<T: Record>(&mut self, record: &T) -> Result<(), StoreError> {
        let collection = self.collection_mut(T::collection_name());
        if !collection.records.contains_key(record.id()) {
            return Err(StoreError::NotFound(record.id().to_string()));
        }
        self.put(record)
    }

    /// Get a record by id
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>, StoreError> {
        match self
            .collections
            .get(T::collection_name())
            .and_then(|c| c.records.get(id))
        {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Delete a record by id; returns whether it existed
    pub fn delete<T: Record>(&mut self, id: &str) -> Result<bool, StoreError> {
        let exists = self
            .collections
            .get(T::collection_name())
            .is_some_and(|c| c.records.contains_key(id));
        if !exists {
            return Ok(false);
        }

        let tombstone = serde_json::to_string(&Tombstone {
            deleted: id.to_string(),
        })?;
        self.append_line(T::collection_name(), &tombstone)?;

        let collection = self.collection_mut(T::collection_name());
        collection.records.remove(id);
        collection.line_count += 1;
        Self::unindex(collection, id);
        Ok(true)
    }

    /// All records in a collection, unordered
    pub fn all<T: Record>(&self) -> Result<Vec<T>, StoreError> {
        let Some(collection) = self.collections.get(T::collection_name()) else {
            return Ok(Vec::new());
        };
        collection
            .records
            .values()
            .map(|v| serde_json::from_value(v.clone()).map_err(StoreError::from))
            .collect()
    }

    /// Records matching all of the given filters
    ///
    /// Uses the index for the first equality filter when available, then
    /// applies the remaining filters against each candidate's indexed fields.
    pub fn filter<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>, StoreError> {
        let Some(collection) = self.collections.get(T::collection_name()) else {
            return Ok(Vec::new());
        };

        // Use the index for the first equality filter when that field has
        // one; an absent index means "not built", not "no matches".
        let indexed = filters
            .iter()
            .find(|f| f.op == crate::FilterOp::Eq)
            .and_then(|f| collection.indexes.get(&f.field).map(|by_value| (f, by_value)));
        let candidates: Vec<&String> = match indexed {
            Some((first, by_value)) => by_value
                .get(&first.value)
                .map(|ids| ids.iter().collect())
                .unwrap_or_default(),
            None => collection.records.keys().collect(),
        };

        let mut out = Vec::new();
        for id in candidates {
            let Some(value) = collection.records.get(id) else {
                continue;
            };
            let record: T = serde_json::from_value(value.clone())?;
            if filters.iter().all(|f| f.matches(&record.indexed_fields())) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Rebuild secondary indexes for a record type; returns the record count
    pub fn rebuild_indexes<T: Record>(&mut self) -> Result<usize, StoreError> {
        let Some(collection) = self.collections.get_mut(T::collection_name()) else {
            return Ok(0);
        };

        collection.indexes.clear();
        let entries: Vec<(String, Value)> = collection
            .records
            .iter()
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect();

        let mut count = 0;
        for (id, value) in entries {
            match serde_json::from_value::<T>(value) {
                Ok(record) => {
                    let fields = record.indexed_fields();
                    Self::index(collection, &id, &fields);
                    count += 1;
                }
                Err(e) => {
                    warn!(%id, error = %e, "Skipping unparseable record during index rebuild");
                }
            }
        }
        Ok(count)
    }

    /// Number of records in a collection
    pub fn count<T: Record>(&self) -> usize {
        self.collections
            .get(T::collection_name())
            .map(|c| c.records.len())
            .unwrap_or(0)
    }

    fn collection_mut(&mut self, name: &str) -> &mut Collection {
        self.collections.entry(name.to_string()).or_default()
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", name))
    }

    fn append_line(&self, collection: &str, line: &str) -> Result<(), StoreError> {
        let path = self.collection_path(collection);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn load_collection(&mut self, name: &str, path: &Path) -> Result<(), StoreError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut collection = Collection::default();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            collection.line_count += 1;

            if let Ok(tombstone) = serde_json::from_str::<Tombstone>(&line) {
                collection.records.remove(&tombstone.deleted);
                continue;
            }

            let value: Value = serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
                file: path.display().to_string(),
                line: line_no + 1,
                message: e.to_string(),
            })?;
            let Some(id) = value.get("id").and_then(|v| v.as_str()) else {
                return Err(StoreError::Corrupt {
                    file: path.display().to_string(),
                    line: line_no + 1,
                    message: "record line has no string 'id' field".to_string(),
                });
            };
            collection.records.insert(id.to_string(), value.clone());
        }

        let dead = collection.line_count.saturating_sub(collection.records.len());
        let needs_compaction =
            collection.line_count > 0 && dead as f64 / collection.line_count as f64 > COMPACT_THRESHOLD;

        self.collections.insert(name.to_string(), collection);

        if needs_compaction {
            self.compact(name)?;
        }
        Ok(())
    }

    /// Rewrite a collection file with only live records
    fn compact(&mut self, name: &str) -> Result<(), StoreError> {
        let path = self.base_path.join(format!("{}.jsonl", name));
        let tmp_path = self.base_path.join(format!("{}.jsonl.tmp", name));
        let Some(collection) = self.collections.get_mut(name) else {
            return Ok(());
        };
        {
            let mut tmp = File::create(&tmp_path)?;
            for value in collection.records.values() {
                writeln!(tmp, "{}", serde_json::to_string(value)?)?;
            }
        }
        fs::rename(&tmp_path, &path)?;
        collection.line_count = collection.records.len();
        info!(collection = name, records = collection.records.len(), "Compacted collection");
        Ok(())
    }

    fn index(collection: &mut Collection, id: &str, fields: &HashMap<String, IndexValue>) {
        for (field, value) in fields {
            collection
                .indexes
                .entry(field.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(id.to_string());
        }
    }

    fn unindex(collection: &mut Collection, id: &str) {
        for by_value in collection.indexes.values_mut() {
            for ids in by_value.values_mut() {
                ids.remove(id);
            }
        }
    }
}
