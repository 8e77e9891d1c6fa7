//! Global key-map: issues the opaque 16-character keys and the globally unique person ids,
//! and resolves keys back to (id, shard number).
//!
//! Entries are append-only. There is no update or delete path.

use crate::error::{AnoimaError, AnoimaResult};
use crate::models::KeyMapEntry;
use crate::storage::StorageHandle;
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;

pub const KEY_LEN: usize = 16;
pub const KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const KEY_INDEX: &str = "key";

/// 16 characters drawn uniformly from `[a-z0-9]`. Uniqueness is enforced by the store.
pub fn generate_key() -> String {
    let mut rng = rand::thread_rng();
    (0..KEY_LEN)
        .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
        .collect()
}

pub fn is_valid_key(key: &str) -> bool {
    key.len() == KEY_LEN && key.bytes().all(|b| KEY_ALPHABET.contains(&b))
}

pub struct KeyMapStore {
    global: Arc<StorageHandle>,
}

impl KeyMapStore {
    pub fn new(global: Arc<StorageHandle>) -> Self {
        Self { global }
    }

    pub fn storage(&self) -> &StorageHandle {
        &self.global
    }

    /// One insert attempt with a caller-chosen key. A taken key fails with `UniqueViolation`.
    pub fn register(&self, key: &str, shard_no: usize) -> AnoimaResult<KeyMapEntry> {
        let entry = KeyMapEntry {
            id: 0,
            key: key.to_string(),
            shard_no,
            created_at: Utc::now(),
        };
        self.global.insert_unique(entry, KEY_INDEX, key)
    }

    /// Issues a fresh key for `shard_no`, retrying with a new key on every collision.
    pub fn create(&self, shard_no: usize) -> AnoimaResult<KeyMapEntry> {
        self.create_with(shard_no, generate_key)
    }

    /// [`KeyMapStore::create`] with an injectable key source.
    pub fn create_with<G>(&self, shard_no: usize, mut next_key: G) -> AnoimaResult<KeyMapEntry>
    where
        G: FnMut() -> String,
    {
        loop {
            let key = next_key();
            match self.register(&key, shard_no) {
                Ok(entry) => {
                    tracing::debug!(
                        target: "anoima::key_map",
                        id = entry.id,
                        shard_no,
                        "issued person key"
                    );
                    return Ok(entry);
                }
                Err(e) if e.is_unique_violation() => {
                    tracing::warn!(
                        target: "anoima::key_map",
                        key = %key,
                        "key collision, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn find_by_key(&self, key: &str) -> AnoimaResult<Option<KeyMapEntry>> {
        self.global.find_by_unique(KEY_INDEX, key)
    }

    /// Like [`KeyMapStore::find_by_key`] but absent keys are `NotFound`.
    pub fn get(&self, key: &str) -> AnoimaResult<KeyMapEntry> {
        self.find_by_key(key)?
            .ok_or_else(|| AnoimaError::not_found(format!("person '{}'", key)))
    }

    pub fn find_by_id(&self, id: u64) -> AnoimaResult<Option<KeyMapEntry>> {
        self.global.find_by_id(id)
    }

    /// Batched id lookup in one round trip; input order, unknown ids skipped.
    pub fn find_by_ids(&self, ids: &[u64]) -> AnoimaResult<Vec<KeyMapEntry>> {
        self.global.find_by_ids(ids)
    }

    /// Batched key lookup in one round trip; input order, unknown keys skipped.
    pub fn find_by_keys(&self, keys: &[&str]) -> AnoimaResult<Vec<KeyMapEntry>> {
        self.global.find_by_uniques(KEY_INDEX, keys)
    }

    /// Entries in id (issue) order.
    pub fn list(&self, offset: usize, limit: usize) -> AnoimaResult<Vec<KeyMapEntry>> {
        self.global.find_where(|_: &KeyMapEntry| true, offset, limit)
    }

    pub fn count(&self) -> AnoimaResult<usize> {
        self.global.count_where(|_: &KeyMapEntry| true)
    }

    /// Every entry, in id order.
    pub fn all(&self) -> AnoimaResult<Vec<KeyMapEntry>> {
        self.global.find_where(|_: &KeyMapEntry| true, 0, usize::MAX)
    }
}
