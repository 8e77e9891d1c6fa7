//! Person resolver: turns public keys into shard-local rows and back.
//!
//! Every operation looks the key up in the global key-map first and then works inside the
//! single shard the entry names. Information, comments and votes are joined explicitly in
//! memory since joins cannot cross shard boundaries.

use crate::error::{AnoimaError, AnoimaResult};
use crate::key_map::KeyMapStore;
use crate::models::{
    Actor, Comment, Information, InformationView, KeyMapEntry, MappedPerson, NewComment,
    NewInformation, NewPerson, Person, PersonDetail, PersonPatch, Vote, VoteKind, VoteTally,
};
use crate::shards::ShardRegistry;
use crate::storage::StorageHandle;
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

const VOTE_OWNER_INDEX: &str = "information_owner";

pub struct PersonResolver {
    shards: Arc<ShardRegistry>,
    key_map: Arc<KeyMapStore>,
}

/// A resolved key: its map entry, the live person row, and the shard holding both.
struct Located<'a> {
    shard: &'a StorageHandle,
    map: KeyMapEntry,
    person: Person,
}

impl<'a> Located<'a> {
    fn into_mapped(self) -> MappedPerson {
        MappedPerson {
            person: self.person,
            map: self.map,
        }
    }
}

impl PersonResolver {
    pub fn new(shards: Arc<ShardRegistry>, key_map: Arc<KeyMapStore>) -> Self {
        Self { shards, key_map }
    }

    pub fn shards(&self) -> &ShardRegistry {
        &self.shards
    }

    pub fn key_map(&self) -> &KeyMapStore {
        &self.key_map
    }

    fn locate(&self, key: &str) -> AnoimaResult<Located<'_>> {
        let map = self.key_map.get(key)?;
        let shard = self.shards.shard(map.shard_no)?;
        let person = shard
            .find_by_id::<Person>(map.id)?
            .ok_or_else(|| AnoimaError::not_found(format!("person '{}'", key)))?;
        Ok(Located { shard, map, person })
    }

    /// Person for `key`, whatever its privacy. Soft-deleted persons are `NotFound`.
    pub fn resolve(&self, key: &str) -> AnoimaResult<MappedPerson> {
        Ok(self.locate(key)?.into_mapped())
    }

    /// Resolves many keys with one key-map trip and at most one trip per shard touched.
    /// Output follows input order; keys that do not resolve are dropped.
    pub fn resolve_many(&self, keys: &[&str]) -> AnoimaResult<Vec<MappedPerson>> {
        let entries = self.key_map.find_by_keys(keys)?;
        self.attach_persons(entries)
    }

    /// Pairs already loaded map entries with their persons, one batched fetch per shard.
    pub fn attach_persons(&self, entries: Vec<KeyMapEntry>) -> AnoimaResult<Vec<MappedPerson>> {
        let mut by_shard: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
        for entry in &entries {
            by_shard.entry(entry.shard_no).or_default().push(entry.id);
        }

        let mut persons: HashMap<u64, Person> = HashMap::new();
        for (shard_no, ids) in by_shard {
            let rows: Vec<Person> = self.shards.shard(shard_no)?.find_by_ids(&ids)?;
            persons.extend(rows.into_iter().map(|p| (p.id, p)));
        }

        Ok(entries
            .into_iter()
            .filter_map(|map| persons.remove(&map.id).map(|person| MappedPerson { person, map }))
            .collect())
    }

    /// Registers a person in a random shard. Fields are validated before the key is issued;
    /// a failed shard insert leaves the issued map entry behind.
    pub fn create(&self, data: NewPerson, owner_id: u64) -> AnoimaResult<MappedPerson> {
        let mut person = data.into_person(0, owner_id)?;
        let shard_no = self.shards.random_shard();
        let map = self.key_map.create(shard_no)?;
        person.id = map.id;
        self.shards.shard(shard_no)?.insert_with_id(&person)?;
        tracing::info!(
            target: "anoima::resolver",
            id = person.id,
            shard_no,
            privacy = %person.privacy,
            "person created"
        );
        Ok(MappedPerson { person, map })
    }

    /// Applies `patch` to the live row. The owner check and the patch run against the row as
    /// stored at write time, so a racing delete turns this into `NotFound`.
    pub fn update(
        &self,
        key: &str,
        patch: PersonPatch,
        actor: Actor,
    ) -> AnoimaResult<MappedPerson> {
        let located = self.locate(key)?;
        let person = located
            .shard
            .update_with::<Person, _>(located.person.id, |person| {
                actor.ensure_owner_or_admin(person.owner_id, "person")?;
                patch.clone().apply_to(person)
            })?
            .ok_or_else(|| AnoimaError::not_found(format!("person '{}'", key)))?;
        Ok(MappedPerson {
            person,
            map: located.map,
        })
    }

    /// Soft delete in the person's shard. The key-map entry is untouched.
    pub fn delete(&self, key: &str, actor: Actor) -> AnoimaResult<()> {
        let located = self.locate(key)?;
        actor.ensure_owner_or_admin(located.person.owner_id, "person")?;
        if located.shard.soft_delete::<Person>(located.person.id)?.is_none() {
            return Err(AnoimaError::not_found(format!("person '{}'", key)));
        }
        tracing::info!(
            target: "anoima::resolver",
            id = located.person.id,
            shard_no = located.map.shard_no,
            "person soft-deleted"
        );
        Ok(())
    }

    /// Person with its information rows (each with comments and vote tally) and its own comments.
    pub fn resolve_detail(&self, key: &str) -> AnoimaResult<PersonDetail> {
        let located = self.locate(key)?;
        let person_id = located.person.id;
        let shard = located.shard;

        let information: Vec<Information> =
            shard.find_where(|i: &Information| i.person_id == person_id, 0, usize::MAX)?;
        let comments: Vec<Comment> =
            shard.find_where(|c: &Comment| c.person_id == person_id, 0, usize::MAX)?;
        let info_ids: HashSet<u64> = information.iter().map(|i| i.id).collect();
        let votes: Vec<Vote> = if info_ids.is_empty() {
            Vec::new()
        } else {
            shard.find_where(|v: &Vote| info_ids.contains(&v.information_id), 0, usize::MAX)?
        };

        let mut person_comments = Vec::new();
        let mut info_comments: HashMap<u64, Vec<Comment>> = HashMap::new();
        for comment in comments {
            match comment.information_id {
                Some(info_id) => info_comments.entry(info_id).or_default().push(comment),
                None => person_comments.push(comment),
            }
        }
        let mut tallies: HashMap<u64, VoteTally> = HashMap::new();
        for vote in &votes {
            let tally = tallies.entry(vote.information_id).or_default();
            match vote.kind {
                VoteKind::Good => tally.good += 1,
                VoteKind::Bad => tally.bad += 1,
            }
        }

        let information = information
            .into_iter()
            .map(|info| InformationView {
                comments: info_comments.remove(&info.id).unwrap_or_default(),
                votes: tallies.get(&info.id).copied().unwrap_or_default(),
                information: info,
            })
            .collect();

        Ok(PersonDetail {
            person: located.into_mapped(),
            information,
            comments: person_comments,
        })
    }

    /// Page of persons in key issue order. Entries whose person is gone are skipped.
    pub fn list(&self, offset: usize, limit: usize) -> AnoimaResult<Vec<MappedPerson>> {
        let entries = self.key_map.list(offset, limit)?;
        self.attach_persons(entries)
    }

    /// Number of issued keys (the total behind [`PersonResolver::list`]).
    pub fn count(&self) -> AnoimaResult<usize> {
        self.key_map.count()
    }

    fn load_information(
        shard: &StorageHandle,
        person_id: u64,
        id: u64,
    ) -> AnoimaResult<Information> {
        shard
            .find_by_id::<Information>(id)?
            .filter(|i| i.person_id == person_id)
            .ok_or_else(|| AnoimaError::not_found(format!("information {}", id)))
    }

    pub fn information(&self, key: &str, id: u64) -> AnoimaResult<InformationView> {
        let located = self.locate(key)?;
        let information = Self::load_information(located.shard, located.person.id, id)?;
        let comments: Vec<Comment> = located.shard.find_where(
            |c: &Comment| c.information_id == Some(id) && c.person_id == located.person.id,
            0,
            usize::MAX,
        )?;
        let votes: Vec<Vote> =
            located.shard.find_where(|v: &Vote| v.information_id == id, 0, usize::MAX)?;
        let mut tally = VoteTally::default();
        for vote in &votes {
            match vote.kind {
                VoteKind::Good => tally.good += 1,
                VoteKind::Bad => tally.bad += 1,
            }
        }
        Ok(InformationView {
            information,
            comments,
            votes: tally,
        })
    }

    pub fn add_information(
        &self,
        key: &str,
        data: NewInformation,
        owner_id: u64,
    ) -> AnoimaResult<Information> {
        let located = self.locate(key)?;
        let row = data.into_information(located.person.id, owner_id)?;
        located.shard.insert_with_auto_id(row)
    }

    pub fn delete_information(&self, key: &str, id: u64, actor: Actor) -> AnoimaResult<()> {
        let located = self.locate(key)?;
        let information = Self::load_information(located.shard, located.person.id, id)?;
        actor.ensure_owner_or_admin(information.owner_id, "information")?;
        located.shard.soft_delete::<Information>(id)?;
        Ok(())
    }

    pub fn add_comment(&self, key: &str, data: NewComment, owner_id: u64) -> AnoimaResult<Comment> {
        let located = self.locate(key)?;
        let row = data.into_comment(located.person.id, None, owner_id)?;
        located.shard.insert_with_auto_id(row)
    }

    pub fn add_information_comment(
        &self,
        key: &str,
        information_id: u64,
        data: NewComment,
        owner_id: u64,
    ) -> AnoimaResult<Comment> {
        let located = self.locate(key)?;
        Self::load_information(located.shard, located.person.id, information_id)?;
        let row = data.into_comment(located.person.id, Some(information_id), owner_id)?;
        located.shard.insert_with_auto_id(row)
    }

    pub fn delete_comment(&self, key: &str, id: u64, actor: Actor) -> AnoimaResult<()> {
        let located = self.locate(key)?;
        let comment = located
            .shard
            .find_by_id::<Comment>(id)?
            .filter(|c| c.person_id == located.person.id)
            .ok_or_else(|| AnoimaError::not_found(format!("comment {}", id)))?;
        actor.ensure_owner_or_admin(comment.owner_id, "comment")?;
        located.shard.soft_delete::<Comment>(id)?;
        Ok(())
    }

    /// One live vote per (information, owner), guarded by a unique index so concurrent
    /// votes by the same owner collapse into one row. Voting again changes its type.
    pub fn cast_vote(
        &self,
        key: &str,
        information_id: u64,
        kind: VoteKind,
        owner_id: u64,
    ) -> AnoimaResult<Vote> {
        let located = self.locate(key)?;
        Self::load_information(located.shard, located.person.id, information_id)?;
        let value = Vote::unique_value(information_id, owner_id);
        let now = Utc::now();
        let vote = Vote {
            id: 0,
            information_id,
            owner_id,
            kind,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        match located.shard.insert_unique(vote, VOTE_OWNER_INDEX, &value) {
            Ok(created) => Ok(created),
            Err(e) if e.is_unique_violation() => {
                let existing: Vote = located
                    .shard
                    .find_by_unique(VOTE_OWNER_INDEX, &value)?
                    .ok_or(e)?;
                located
                    .shard
                    .update_with::<Vote, _>(existing.id, |vote| {
                        vote.kind = kind;
                        vote.updated_at = Utc::now();
                        Ok(())
                    })?
                    .ok_or_else(|| AnoimaError::not_found(format!("vote {}", existing.id)))
            }
            Err(e) => Err(e),
        }
    }

    /// Key-map entries older than `older_than` whose shard holds no person row at all.
    /// Soft-deleted persons still have a row and are not reported. Read-only.
    pub fn find_orphans(&self, older_than: Duration) -> AnoimaResult<Vec<KeyMapEntry>> {
        let cutoff = Utc::now() - older_than;
        let candidates: Vec<KeyMapEntry> = self
            .key_map
            .all()?
            .into_iter()
            .filter(|e| e.created_at <= cutoff)
            .collect();

        let mut by_shard: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
        for entry in &candidates {
            by_shard.entry(entry.shard_no).or_default().push(entry.id);
        }
        let mut present: HashMap<usize, HashSet<u64>> = HashMap::new();
        for (shard_no, ids) in by_shard {
            let existing = match self.shards.shard(shard_no) {
                Ok(shard) => shard.existing_ids::<Person>(&ids)?,
                Err(AnoimaError::OutOfRange { .. }) => HashSet::new(),
                Err(e) => return Err(e),
            };
            present.insert(shard_no, existing);
        }

        let orphans: Vec<KeyMapEntry> = candidates
            .into_iter()
            .filter(|e| !present.get(&e.shard_no).is_some_and(|ids| ids.contains(&e.id)))
            .collect();
        tracing::info!(
            target: "anoima::resolver",
            orphans = orphans.len(),
            "orphan audit finished"
        );
        Ok(orphans)
    }
}
