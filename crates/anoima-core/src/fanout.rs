//! Cross-shard sampling of public persons.

use crate::error::AnoimaResult;
use crate::key_map::KeyMapStore;
use crate::models::{KeyMapEntry, MappedPerson, Person};
use crate::shards::ShardRegistry;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

pub struct FanoutExecutor {
    shards: Arc<ShardRegistry>,
    key_map: Arc<KeyMapStore>,
}

impl FanoutExecutor {
    pub fn new(shards: Arc<ShardRegistry>, key_map: Arc<KeyMapStore>) -> Self {
        Self { shards, key_map }
    }

    /// Up to `want` public rows from one shard: a `want * 2` window at a random offset,
    /// shuffled and truncated. Costs O(want) row reads plus one count.
    fn sample_shard(&self, shard_no: usize, want: usize) -> AnoimaResult<Vec<Person>> {
        let shard = self.shards.shard(shard_no)?;
        let window = want.saturating_mul(2);
        let count = shard.count_where::<Person, _>(Person::is_public)?;
        let max_offset = count.saturating_sub(window);
        let mut rng = rand::thread_rng();
        let offset = if max_offset > 0 { rng.gen_range(0..=max_offset) } else { 0 };

        let mut rows: Vec<Person> =
            shard.find_where::<Person, _>(Person::is_public, offset, window)?;
        rows.shuffle(&mut rng);
        rows.truncate(want);
        Ok(rows)
    }

    /// At most `limit` random public persons, each with its key. Starts from one random shard
    /// and falls back to the others in shard order only while the sample is short.
    /// Returns every public person when fewer than `limit` exist.
    pub fn random_public(&self, limit: usize) -> AnoimaResult<Vec<MappedPerson>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let first = self.shards.random_shard();
        let mut picked = self.sample_shard(first, limit)?;

        if picked.len() < limit {
            tracing::debug!(
                target: "anoima::fanout",
                first_shard = first,
                found = picked.len(),
                limit,
                "sample short, falling back to remaining shards"
            );
            for shard_no in (0..self.shards.shard_count()).filter(|&s| s != first) {
                if picked.len() >= limit {
                    break;
                }
                let more = self.sample_shard(shard_no, limit - picked.len())?;
                picked.extend(more);
            }
        }
        picked.truncate(limit);

        let ids: Vec<u64> = picked.iter().map(|p| p.id).collect();
        let mut maps: HashMap<u64, KeyMapEntry> = self
            .key_map
            .find_by_ids(&ids)?
            .into_iter()
            .map(|e| (e.id, e))
            .collect();

        Ok(picked
            .into_iter()
            .filter_map(|person| maps.remove(&person.id).map(|map| MappedPerson { person, map }))
            .collect())
    }
}
