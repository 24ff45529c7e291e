//! Bounded, optionally persistent storage of enrolled faces.
//!
//! An [`EnrollmentStore`] holds up to `capacity` named embeddings. Once it is full, further
//! insertions overwrite the oldest entry (see [`EnrollmentStore::insert`]); callers that would
//! rather refuse can use [`EnrollmentStore::try_insert`] or [`EnrollmentStore::register`].
//!
//! # Directory Layout
//!
//! A persistent store keeps one pair of files per enrolled face in a flat directory. The `i`-th
//! enrollment (counting from 1) is stored as:
//!
//! * `{i}.db`: the raw embedding as little-endian `f32` values, without any header.
//! * `{i}.name`: the UTF-8 encoded name, without a terminator.
//!
//! Entries that were overwritten in memory keep their files, so reloading a directory replays the
//! same overwrites.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Context};

use super::{score_normalized, Embedding, MatchResult};

const EMBEDDING_EXTENSION: &str = "db";
const NAME_EXTENSION: &str = "name";

#[derive(Debug, Clone)]
struct Record {
    embedding: Embedding,
    name: String,
}

/// The outcome of [`EnrollmentStore::register`].
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// The face was enrolled into the given slot.
    Registered { slot: usize },
    /// The face already matches an enrolled entry above the threshold; nothing was changed.
    AlreadyEnrolled(MatchResult),
    /// The store has no free slot left; nothing was changed.
    Full,
}

/// A fixed-capacity collection of named face embeddings.
///
/// The store is not internally synchronized; concurrent users have to serialize access
/// themselves (eg. by wrapping it in a `Mutex`).
#[derive(Debug)]
pub struct EnrollmentStore {
    capacity: usize,
    feature_len: usize,
    /// Occupied slots. Never longer than `capacity`.
    records: Vec<Record>,
    /// Total number of insertions since the last reset, including overwritten ones.
    valid_count: usize,
    dir: Option<PathBuf>,
}

impl EnrollmentStore {
    /// Creates an empty store that only lives in memory.
    ///
    /// # Panics
    ///
    /// This will panic if `capacity` is 0.
    pub fn new(capacity: usize, feature_len: usize) -> Self {
        assert!(capacity > 0, "enrollment store capacity must be non-zero");
        Self {
            capacity,
            feature_len,
            records: Vec::with_capacity(capacity),
            valid_count: 0,
            dir: None,
        }
    }

    /// Opens a persistent store backed by `dir`, loading all records it contains.
    ///
    /// The directory is created if it doesn't exist yet.
    ///
    /// # Panics
    ///
    /// This will panic if `capacity` is 0.
    pub fn open(
        dir: impl Into<PathBuf>,
        capacity: usize,
        feature_len: usize,
    ) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create store directory '{}'", dir.display()))?;

        let mut this = Self::new(capacity, feature_len);
        this.load(&dir)?;
        this.dir = Some(dir);
        Ok(this)
    }

    /// Returns the directory new records are persisted to, if any.
    pub fn directory(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of `f32` values per embedding.
    pub fn feature_len(&self) -> usize {
        self.feature_len
    }

    /// Returns the number of insertions since creation or the last [`EnrollmentStore::reset`].
    ///
    /// This keeps counting past the capacity.
    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns whether every slot is occupied, meaning that [`EnrollmentStore::insert`] would
    /// overwrite an existing entry.
    pub fn is_full(&self) -> bool {
        self.valid_count >= self.capacity
    }

    /// Returns the names of the occupied slots, in slot order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.records.iter().map(|rec| rec.name.as_str())
    }

    /// Appends all records persisted in `dir` to the store, in enrollment order.
    ///
    /// Loaded records wrap around exactly like [`EnrollmentStore::insert`] does. Nothing is written
    /// to disk.
    ///
    /// If any record is missing or malformed, an error is returned and the store is left
    /// unchanged. Returns the number of records that were loaded.
    pub fn load(&mut self, dir: &Path) -> anyhow::Result<usize> {
        let mut file_count = 0;
        let entries = fs::read_dir(dir)
            .with_context(|| format!("failed to read store directory '{}'", dir.display()))?;
        for entry in entries {
            if entry?.file_type()?.is_file() {
                file_count += 1;
            }
        }

        let records = (1..=file_count / 2)
            .map(|i| self.read_record(dir, i))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let count = records.len();
        for record in records {
            self.commit(record);
        }
        log::info!(
            "loaded {count} faces from '{}' ({} of {} slots used)",
            dir.display(),
            self.len(),
            self.capacity,
        );
        Ok(count)
    }

    fn read_record(&self, dir: &Path, index: usize) -> anyhow::Result<Record> {
        let (emb_path, name_path) = record_paths(dir, index);

        let bytes = fs::read(&emb_path)
            .with_context(|| format!("failed to read embedding '{}'", emb_path.display()))?;
        let embedding = decode_embedding(&bytes, self.feature_len)
            .with_context(|| format!("malformed embedding '{}'", emb_path.display()))?;

        let name = fs::read(&name_path)
            .with_context(|| format!("failed to read name '{}'", name_path.display()))?;
        let name = String::from_utf8(name)
            .with_context(|| format!("name in '{}' is not valid UTF-8", name_path.display()))?;

        Ok(Record { embedding, name })
    }

    /// Enrolls `embedding` under `name`, overwriting the oldest entry if the store is full.
    ///
    /// For persistent stores, the record is written to disk before the store is modified, so a
    /// failed write leaves it unchanged. Returns the slot the embedding was stored in.
    pub fn insert(&mut self, embedding: Embedding, name: &str) -> anyhow::Result<usize> {
        ensure!(
            embedding.len() == self.feature_len,
            "embedding has {} values, store expects {}",
            embedding.len(),
            self.feature_len,
        );

        if let Some(dir) = &self.dir {
            let (emb_path, name_path) = record_paths(dir, self.valid_count + 1);
            fs::write(&emb_path, encode_embedding(&embedding))
                .with_context(|| format!("failed to write '{}'", emb_path.display()))?;
            fs::write(&name_path, name)
                .with_context(|| format!("failed to write '{}'", name_path.display()))?;
        }

        let slot = self.commit(Record {
            embedding,
            name: name.to_string(),
        });
        log::info!("enrolled '{name}' in slot {slot}");
        Ok(slot)
    }

    /// Like [`EnrollmentStore::insert`], but refuses to overwrite anything.
    ///
    /// Returns `None` without modifying the store if it is full.
    pub fn try_insert(
        &mut self,
        embedding: Embedding,
        name: &str,
    ) -> anyhow::Result<Option<usize>> {
        if self.is_full() {
            return Ok(None);
        }
        self.insert(embedding, name).map(Some)
    }

    /// Enrolls a face unless it is already known or the store is full.
    ///
    /// A face is already known if its best match scores above `threshold`.
    pub fn register(
        &mut self,
        embedding: Embedding,
        name: &str,
        threshold: f32,
    ) -> anyhow::Result<Registration> {
        let best = self.search(&embedding)?;
        if best.is_match(threshold) {
            log::debug!("not registering '{name}': already enrolled as {best}");
            return Ok(Registration::AlreadyEnrolled(best));
        }

        match self.try_insert(embedding, name)? {
            Some(slot) => Ok(Registration::Registered { slot }),
            None => {
                log::debug!("not registering '{name}': store is full");
                Ok(Registration::Full)
            }
        }
    }

    /// Finds the enrolled face that best matches `query`.
    ///
    /// Returns [`MatchResult::unknown`] if the store is empty. Entries with equal scores are
    /// resolved in favor of the lowest slot.
    pub fn search(&self, query: &Embedding) -> anyhow::Result<MatchResult> {
        ensure!(
            query.len() == self.feature_len,
            "query has {} values, store expects {}",
            query.len(),
            self.feature_len,
        );

        let query = query.normalized();
        let mut best = None;
        let mut best_score = 0.0;
        for (slot, rec) in self.records.iter().enumerate() {
            let score = score_normalized(&query, &rec.embedding.normalized());
            if score > best_score {
                best_score = score;
                best = Some(slot);
            }
        }

        let res = match best {
            Some(slot) => MatchResult {
                id: Some(slot),
                name: self.records[slot].name.clone(),
                score: best_score,
            },
            None => MatchResult::unknown(),
        };
        log::trace!("best match among {} faces: {res}", self.len());
        Ok(res)
    }

    /// Removes all entries, and deletes all files in the store directory.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        if let Some(dir) = &self.dir {
            clear_directory(dir)?;
        }

        self.records.clear();
        self.valid_count = 0;
        log::info!("enrollment store cleared");
        Ok(())
    }

    /// Stores `record` in the next slot and returns that slot.
    fn commit(&mut self, record: Record) -> usize {
        let slot = self.valid_count % self.capacity;
        if slot < self.records.len() {
            log::warn!(
                "store full, overwriting '{}' in slot {slot} with '{}'",
                self.records[slot].name,
                record.name,
            );
            self.records[slot] = record;
        } else {
            self.records.push(record);
        }
        self.valid_count += 1;
        slot
    }
}

/// Deletes every regular file in the store directory `dir`, returning how many were deleted.
///
/// Subdirectories are left alone.
pub fn clear_directory(dir: &Path) -> anyhow::Result<usize> {
    let mut deleted = 0;
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read store directory '{}'", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            let path = entry.path();
            fs::remove_file(&path)
                .with_context(|| format!("failed to delete '{}'", path.display()))?;
            deleted += 1;
        }
    }
    log::debug!("deleted {deleted} files from '{}'", dir.display());
    Ok(deleted)
}

fn record_paths(dir: &Path, index: usize) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{index}.{EMBEDDING_EXTENSION}")),
        dir.join(format!("{index}.{NAME_EXTENSION}")),
    )
}

fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    embedding
        .as_slice()
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn decode_embedding(bytes: &[u8], feature_len: usize) -> anyhow::Result<Embedding> {
    if bytes.len() != feature_len * 4 {
        bail!(
            "expected {} bytes ({feature_len} values), got {}",
            feature_len * 4,
            bytes.len()
        );
    }

    let raw = bytes
        .chunks_exact(4)
        .map(|chunk| {
            let mut buf = [0; 4];
            buf.copy_from_slice(chunk);
            f32::from_le_bytes(buf)
        })
        .collect();
    Ok(Embedding::new(raw))
}
