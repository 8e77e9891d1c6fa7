//! Sled-backed storage handle. One handle per shard plus one for the global key-map store.
//!
//! Every table is a sled tree keyed by the big-endian `u64` primary key, so iteration order
//! is id order and offset/limit pages are stable. Records are JSON (`serde_json`).
//!
//! | Tree                   | Contents                                         |
//! |------------------------|--------------------------------------------------|
//! | `{table}`              | id -> JSON record                                |
//! | `{table}__{index}`     | unique index value -> id                         |
//! | `__sequences`          | table name -> last issued auto-increment id      |
//!
//! Each public method is one storage round trip; the handle counts them so callers can
//! verify how many trips a batched operation costs.

use crate::error::{AnoimaError, AnoimaResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{abort, TransactionError};
use sled::{Db, Transactional, Tree};
use std::collections::HashSet;
use std::convert::Infallible;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

const SEQUENCE_TREE: &str = "__sequences";

/// A row stored in one table of a [`StorageHandle`].
pub trait Record: Serialize + DeserializeOwned {
    /// Sled tree name for this table.
    const TABLE: &'static str;

    fn id(&self) -> u64;

    fn assign_id(&mut self, id: u64);

    /// Tombstoned rows are invisible to every read.
    fn is_deleted(&self) -> bool {
        false
    }
}

/// Tables with paranoid (tombstone) deletion.
pub trait SoftDelete: Record {
    fn mark_deleted(&mut self, at: DateTime<Utc>);
}

#[inline]
fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn decode_id(bytes: &[u8]) -> u64 {
    bytes.try_into().map(u64::from_be_bytes).unwrap_or(0)
}

fn encode<T: Record>(record: &T) -> AnoimaResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|source| AnoimaError::Codec {
        table: T::TABLE,
        source,
    })
}

fn decode<T: Record>(bytes: &[u8]) -> AnoimaResult<T> {
    serde_json::from_slice(bytes).map_err(|source| AnoimaError::Codec {
        table: T::TABLE,
        source,
    })
}

/// Handle to one independent sled database (a shard or the global store).
pub struct StorageHandle {
    label: String,
    db: Db,
    round_trips: AtomicU64,
}

impl StorageHandle {
    /// Opens or creates the database at `path`. `label` names the store in logs
    /// ("shard-0", "global").
    pub fn open_path<P: AsRef<Path>>(path: P, label: impl Into<String>) -> AnoimaResult<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            label: label.into(),
            db,
            round_trips: AtomicU64::new(0),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of storage round trips issued through this handle since it was opened.
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    fn tick(&self) {
        self.round_trips.fetch_add(1, Ordering::Relaxed);
    }

    fn table<T: Record>(&self) -> AnoimaResult<Tree> {
        Ok(self.db.open_tree(T::TABLE)?)
    }

    fn index<T: Record>(&self, index: &str) -> AnoimaResult<Tree> {
        Ok(self.db.open_tree(format!("{}__{}", T::TABLE, index))?)
    }

    fn next_id<T: Record>(&self) -> AnoimaResult<u64> {
        let sequences = self.db.open_tree(SEQUENCE_TREE)?;
        let next = sequences.update_and_fetch(T::TABLE, |old| {
            let current = old.map(decode_id).unwrap_or(0);
            Some(id_key(current + 1).to_vec())
        })?;
        Ok(next.as_deref().map(decode_id).unwrap_or(1))
    }

    fn load<T: Record>(&self, table: &Tree, id: u64) -> AnoimaResult<Option<T>> {
        match table.get(id_key(id))? {
            Some(bytes) => {
                let record: T = decode(&bytes)?;
                Ok((!record.is_deleted()).then_some(record))
            }
            None => Ok(None),
        }
    }

    /// Inserts `record` under the next id of its table's sequence (first id is 1).
    pub fn insert_with_auto_id<T: Record>(&self, mut record: T) -> AnoimaResult<T> {
        self.tick();
        let id = self.next_id::<T>()?;
        record.assign_id(id);
        self.table::<T>()?.insert(id_key(id), encode(&record)?)?;
        tracing::debug!(
            target: "anoima::storage",
            store = %self.label,
            table = T::TABLE,
            id,
            "inserted row"
        );
        Ok(record)
    }

    /// Inserts `record` under its own id. Fails with `UniqueViolation` when the id is taken.
    pub fn insert_with_id<T: Record>(&self, record: &T) -> AnoimaResult<()> {
        self.tick();
        let bytes = encode(record)?;
        let swapped = self.table::<T>()?.compare_and_swap(
            id_key(record.id()),
            None as Option<&[u8]>,
            Some(bytes),
        )?;
        if swapped.is_err() {
            return Err(AnoimaError::UniqueViolation {
                index: format!("{}.id", T::TABLE),
                value: record.id().to_string(),
            });
        }
        tracing::debug!(
            target: "anoima::storage",
            store = %self.label,
            table = T::TABLE,
            id = record.id(),
            "inserted row with explicit id"
        );
        Ok(())
    }

    /// Auto-id insert guarded by the unique index `index`. The index entry and the row are
    /// written in one transaction; a taken `value` fails with `UniqueViolation` and writes nothing.
    /// The sequence value drawn for a failed attempt is not reused.
    pub fn insert_unique<T: Record>(
        &self,
        mut record: T,
        index: &str,
        value: &str,
    ) -> AnoimaResult<T> {
        self.tick();
        let id = self.next_id::<T>()?;
        record.assign_id(id);
        let bytes = encode(&record)?;
        let table = self.table::<T>()?;
        let index_tree = self.index::<T>(index)?;

        let outcome: Result<(), TransactionError<()>> =
            (&index_tree, &table).transaction(|(idx, tbl)| {
                if idx.get(value.as_bytes())?.is_some() {
                    return abort(());
                }
                idx.insert(value.as_bytes(), &id_key(id)[..])?;
                tbl.insert(&id_key(id)[..], bytes.clone())?;
                Ok(())
            });

        match outcome {
            Ok(()) => Ok(record),
            Err(TransactionError::Abort(())) => Err(AnoimaError::UniqueViolation {
                index: format!("{}.{}", T::TABLE, index),
                value: value.to_string(),
            }),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    pub fn find_by_id<T: Record>(&self, id: u64) -> AnoimaResult<Option<T>> {
        self.tick();
        self.load(&self.table::<T>()?, id)
    }

    /// Batched lookup: one round trip for any number of ids. Output follows input order;
    /// ids without a live row are skipped.
    pub fn find_by_ids<T: Record>(&self, ids: &[u64]) -> AnoimaResult<Vec<T>> {
        self.tick();
        let table = self.table::<T>()?;
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(record) = self.load(&table, id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Looks a row up through the unique index `index`.
    pub fn find_by_unique<T: Record>(&self, index: &str, value: &str) -> AnoimaResult<Option<T>> {
        self.tick();
        match self.index::<T>(index)?.get(value.as_bytes())? {
            Some(id) => self.load(&self.table::<T>()?, decode_id(&id)),
            None => Ok(None),
        }
    }

    /// Batched unique-index lookup in one round trip. Output follows input order;
    /// values without a live row are skipped.
    pub fn find_by_uniques<T: Record>(
        &self,
        index: &str,
        values: &[&str],
    ) -> AnoimaResult<Vec<T>> {
        self.tick();
        let table = self.table::<T>()?;
        let index_tree = self.index::<T>(index)?;
        let mut out = Vec::with_capacity(values.len());
        for value in values {
            if let Some(id) = index_tree.get(value.as_bytes())? {
                if let Some(record) = self.load(&table, decode_id(&id))? {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }

    /// Live rows matching `filter`, in id order, skipping the first `offset` matches.
    pub fn find_where<T, F>(&self, filter: F, offset: usize, limit: usize) -> AnoimaResult<Vec<T>>
    where
        T: Record,
        F: Fn(&T) -> bool,
    {
        self.tick();
        let mut out = Vec::new();
        let mut skipped = 0usize;
        for item in self.table::<T>()?.iter() {
            if out.len() >= limit {
                break;
            }
            let (_, bytes) = item?;
            let record: T = decode(&bytes)?;
            if record.is_deleted() || !filter(&record) {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push(record);
        }
        Ok(out)
    }

    /// Number of live rows matching `filter`.
    pub fn count_where<T, F>(&self, filter: F) -> AnoimaResult<usize>
    where
        T: Record,
        F: Fn(&T) -> bool,
    {
        self.tick();
        let mut count = 0usize;
        for item in self.table::<T>()?.iter() {
            let (_, bytes) = item?;
            let record: T = decode(&bytes)?;
            if !record.is_deleted() && filter(&record) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Read-modify-write of one live row. The write is a compare-and-swap against the bytes
    /// `apply` saw; when another writer got there first the row is re-read and `apply` runs again.
    /// `None` once the row is missing or tombstoned.
    fn modify<T, F>(&self, table: &Tree, id: u64, mut apply: F) -> AnoimaResult<Option<T>>
    where
        T: Record,
        F: FnMut(&mut T) -> AnoimaResult<()>,
    {
        let key = id_key(id);
        loop {
            let Some(current) = table.get(key)? else {
                return Ok(None);
            };
            let mut record: T = decode(&current)?;
            if record.is_deleted() {
                return Ok(None);
            }
            apply(&mut record)?;
            let bytes = encode(&record)?;
            let swapped = table.compare_and_swap(key, Some(&current[..]), Some(bytes))?;
            if swapped.is_ok() {
                return Ok(Some(record));
            }
            tracing::debug!(
                target: "anoima::storage",
                store = %self.label,
                table = T::TABLE,
                id,
                "concurrent write, retrying"
            );
        }
    }

    /// Overwrites an existing live row. Fails with `NotFound` when the row is missing or was
    /// tombstoned, including by a writer racing this call.
    pub fn update<T: Record>(&self, record: &T) -> AnoimaResult<()> {
        self.tick();
        let table = self.table::<T>()?;
        let key = id_key(record.id());
        let bytes = encode(record)?;
        loop {
            let current = table.get(key)?;
            let live = match &current {
                Some(b) => !decode::<T>(b)?.is_deleted(),
                None => false,
            };
            if !live {
                return Err(AnoimaError::not_found(format!("{} {}", T::TABLE, record.id())));
            }
            let swapped = table.compare_and_swap(key, current.as_deref(), Some(bytes.clone()))?;
            if swapped.is_ok() {
                return Ok(());
            }
        }
    }

    /// Applies `apply` to the current live row and stores the result; `None` when no live row
    /// exists. An error from `apply` aborts without writing.
    pub fn update_with<T, F>(&self, id: u64, apply: F) -> AnoimaResult<Option<T>>
    where
        T: Record,
        F: FnMut(&mut T) -> AnoimaResult<()>,
    {
        self.tick();
        let table = self.table::<T>()?;
        self.modify(&table, id, apply)
    }

    /// Sets the tombstone on a live row and returns it; `None` when no live row exists.
    pub fn soft_delete<T: SoftDelete>(&self, id: u64) -> AnoimaResult<Option<T>> {
        self.tick();
        let table = self.table::<T>()?;
        let deleted = self.modify(&table, id, |record: &mut T| {
            record.mark_deleted(Utc::now());
            Ok(())
        })?;
        if deleted.is_some() {
            tracing::debug!(
                target: "anoima::storage",
                store = %self.label,
                table = T::TABLE,
                id,
                "soft-deleted row"
            );
        }
        Ok(deleted)
    }

    /// Physically removes a row together with its unique index entry.
    pub fn remove_unique<T: Record>(
        &self,
        id: u64,
        index: &str,
        value: &str,
    ) -> AnoimaResult<Option<T>> {
        self.tick();
        let table = self.table::<T>()?;
        let index_tree = self.index::<T>(index)?;

        let removed: Result<Option<sled::IVec>, TransactionError<Infallible>> =
            (&index_tree, &table).transaction(|(idx, tbl)| {
                idx.remove(value.as_bytes())?;
                Ok(tbl.remove(&id_key(id)[..])?)
            });

        match removed {
            Ok(Some(bytes)) => Ok(Some(decode(&bytes)?)),
            Ok(None) => Ok(None),
            Err(TransactionError::Abort(never)) => match never {},
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    /// Ids from `ids` that have a row at all, tombstoned or not.
    pub fn existing_ids<T: Record>(&self, ids: &[u64]) -> AnoimaResult<HashSet<u64>> {
        self.tick();
        let table = self.table::<T>()?;
        let mut out = HashSet::new();
        for &id in ids {
            if table.contains_key(id_key(id))? {
                out.insert(id);
            }
        }
        Ok(out)
    }

    /// Raw row count of a table, tombstones included. Used for status reporting only.
    pub fn entry_count<T: Record>(&self) -> AnoimaResult<usize> {
        Ok(self.table::<T>()?.len())
    }

    /// Flushes dirty pages to disk.
    pub fn flush(&self) -> AnoimaResult<usize> {
        Ok(self.db.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: u64,
        body: String,
        deleted: bool,
    }

    impl Note {
        fn new(body: &str) -> Self {
            Self {
                id: 0,
                body: body.to_string(),
                deleted: false,
            }
        }
    }

    impl Record for Note {
        const TABLE: &'static str = "notes";

        fn id(&self) -> u64 {
            self.id
        }

        fn assign_id(&mut self, id: u64) {
            self.id = id;
        }

        fn is_deleted(&self) -> bool {
            self.deleted
        }
    }

    impl SoftDelete for Note {
        fn mark_deleted(&mut self, _at: DateTime<Utc>) {
            self.deleted = true;
        }
    }

    fn open() -> (tempfile::TempDir, StorageHandle) {
        let dir = tempfile::tempdir().unwrap();
        let handle = StorageHandle::open_path(dir.path().join("db"), "test").unwrap();
        (dir, handle)
    }

    #[test]
    fn auto_ids_start_at_one_and_increase() {
        let (_dir, store) = open();
        let a = store.insert_with_auto_id(Note::new("a")).unwrap();
        let b = store.insert_with_auto_id(Note::new("b")).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(store.find_by_id::<Note>(2).unwrap().unwrap().body, "b");
    }

    #[test]
    fn explicit_id_collision_is_a_unique_violation() {
        let (_dir, store) = open();
        let mut note = Note::new("first");
        note.id = 7;
        store.insert_with_id(&note).unwrap();
        note.body = "second".to_string();
        let err = store.insert_with_id(&note).unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(store.find_by_id::<Note>(7).unwrap().unwrap().body, "first");
    }

    #[test]
    fn unique_index_rejects_duplicates_without_writing() {
        let (_dir, store) = open();
        let first = store.insert_unique(Note::new("x"), "body", "x").unwrap();
        let err = store.insert_unique(Note::new("x"), "body", "x").unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(store.count_where::<Note, _>(|_| true).unwrap(), 1);
        let found: Note = store.find_by_unique("body", "x").unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[test]
    fn soft_deleted_rows_are_invisible_but_still_exist() {
        let (_dir, store) = open();
        let note = store.insert_with_auto_id(Note::new("gone")).unwrap();
        assert!(store.soft_delete::<Note>(note.id).unwrap().is_some());
        assert!(store.find_by_id::<Note>(note.id).unwrap().is_none());
        assert!(store.soft_delete::<Note>(note.id).unwrap().is_none());
        assert_eq!(store.count_where::<Note, _>(|_| true).unwrap(), 0);
        assert!(store.existing_ids::<Note>(&[note.id]).unwrap().contains(&note.id));
    }

    #[test]
    fn find_where_pages_in_id_order() {
        let (_dir, store) = open();
        for body in ["a", "skip", "b", "c", "d"] {
            store.insert_with_auto_id(Note::new(body)).unwrap();
        }
        let page: Vec<Note> = store.find_where(|n: &Note| n.body != "skip", 1, 2).unwrap();
        let bodies: Vec<&str> = page.iter().map(|n| n.body.as_str()).collect();
        assert_eq!(bodies, vec!["b", "c"]);
    }

    #[test]
    fn batched_lookup_is_one_round_trip_and_keeps_order() {
        let (_dir, store) = open();
        for body in ["a", "b", "c"] {
            store.insert_with_auto_id(Note::new(body)).unwrap();
        }
        let before = store.round_trips();
        let notes: Vec<Note> = store.find_by_ids(&[3, 99, 1]).unwrap();
        assert_eq!(store.round_trips() - before, 1);
        let ids: Vec<u64> = notes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn remove_unique_frees_the_index_value() {
        let (_dir, store) = open();
        let note = store.insert_unique(Note::new("k"), "body", "k").unwrap();
        let removed: Option<Note> = store.remove_unique(note.id, "body", "k").unwrap();
        assert_eq!(removed.map(|n| n.id), Some(note.id));
        assert!(store.insert_unique(Note::new("k"), "body", "k").is_ok());
    }

    #[test]
    fn update_with_errors_leave_the_row_untouched() {
        let (_dir, store) = open();
        let note = store.insert_with_auto_id(Note::new("kept")).unwrap();
        let err = store
            .update_with::<Note, _>(note.id, |n| {
                n.body = "lost".to_string();
                Err(AnoimaError::validation("rejected"))
            })
            .unwrap_err();
        assert!(matches!(err, AnoimaError::Validation(_)));
        assert_eq!(store.find_by_id::<Note>(note.id).unwrap().unwrap().body, "kept");
    }

    #[test]
    fn update_of_a_tombstoned_row_is_not_found() {
        let (_dir, store) = open();
        let mut note = store.insert_with_auto_id(Note::new("v1")).unwrap();
        store.soft_delete::<Note>(note.id).unwrap();
        note.body = "v2".to_string();
        assert!(matches!(store.update(&note), Err(AnoimaError::NotFound(_))));
        assert!(store.update_with::<Note, _>(note.id, |_| Ok(())).unwrap().is_none());
        assert!(store.find_by_id::<Note>(note.id).unwrap().is_none());
    }

    #[test]
    fn racing_updates_never_revive_a_deleted_row() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let (_dir, store) = open();
        let store = Arc::new(store);
        for round in 0..200 {
            let note = store.insert_with_auto_id(Note::new("live")).unwrap();
            let barrier = Arc::new(Barrier::new(3));

            let deleter = {
                let (store, barrier) = (Arc::clone(&store), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    store.soft_delete::<Note>(note.id).unwrap().is_some()
                })
            };
            let writers: Vec<_> = (0..2)
                .map(|i| {
                    let (store, barrier) = (Arc::clone(&store), Arc::clone(&barrier));
                    let mut edited = note.clone();
                    edited.body = format!("edit-{}-{}", round, i);
                    thread::spawn(move || {
                        barrier.wait();
                        let _ = store.update(&edited);
                        let _ = store.update_with::<Note, _>(edited.id, |n| {
                            n.body.push('!');
                            Ok(())
                        });
                    })
                })
                .collect();

            assert!(deleter.join().unwrap(), "round {}", round);
            for writer in writers {
                writer.join().unwrap();
            }
            assert!(store.find_by_id::<Note>(note.id).unwrap().is_none(), "round {}", round);
        }
    }
}
