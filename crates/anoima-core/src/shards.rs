//! Shard registry: a fixed list of structurally identical storage handles, built once at
//! startup and read-only afterwards.

use crate::config::AnoimaConfig;
use crate::error::{AnoimaError, AnoimaResult};
use crate::models::Person;
use crate::storage::StorageHandle;
use rand::Rng;
use serde::Serialize;

/// Health snapshot for one shard.
#[derive(Debug, Clone, Serialize)]
pub struct ShardStatus {
    pub shard_no: usize,
    pub label: String,
    pub connected: bool,
    /// Person rows including tombstones.
    pub person_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ShardRegistry {
    shards: Vec<StorageHandle>,
}

impl ShardRegistry {
    /// Wraps already opened handles. Index in `shards` is the shard number.
    pub fn new(shards: Vec<StorageHandle>) -> AnoimaResult<Self> {
        if shards.is_empty() {
            return Err(AnoimaError::validation("at least one shard must be configured"));
        }
        Ok(Self { shards })
    }

    /// Opens every shard listed (or derived) in `config`.
    pub fn open(config: &AnoimaConfig) -> AnoimaResult<Self> {
        let shards = config
            .shard_paths()
            .iter()
            .enumerate()
            .map(|(i, path)| {
                tracing::info!(
                    target: "anoima::shards",
                    shard_no = i,
                    path = %path.display(),
                    "opening shard"
                );
                StorageHandle::open_path(path, format!("shard-{}", i))
            })
            .collect::<AnoimaResult<Vec<_>>>()?;
        Self::new(shards)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard(&self, shard_no: usize) -> AnoimaResult<&StorageHandle> {
        self.shards.get(shard_no).ok_or(AnoimaError::OutOfRange {
            shard_no,
            shard_count: self.shards.len(),
        })
    }

    /// Uniform over `[0, shard_count)`. Not cryptographic.
    pub fn random_shard(&self) -> usize {
        rand::thread_rng().gen_range(0..self.shards.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &StorageHandle)> {
        self.shards.iter().enumerate()
    }

    /// Sum of round trips issued against every shard.
    pub fn round_trips(&self) -> u64 {
        self.shards.iter().map(StorageHandle::round_trips).sum()
    }

    pub fn status(&self) -> Vec<ShardStatus> {
        self.iter()
            .map(|(shard_no, handle)| match handle.entry_count::<Person>() {
                Ok(person_rows) => ShardStatus {
                    shard_no,
                    label: handle.label().to_string(),
                    connected: true,
                    person_rows,
                    error: None,
                },
                Err(e) => ShardStatus {
                    shard_no,
                    label: handle.label().to_string(),
                    connected: false,
                    person_rows: 0,
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }

    pub fn flush(&self) -> AnoimaResult<()> {
        for handle in &self.shards {
            handle.flush()?;
        }
        Ok(())
    }
}
