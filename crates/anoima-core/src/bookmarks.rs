//! Per-user bookmarks, stored in the global store next to the key-map.

use crate::error::{AnoimaError, AnoimaResult};
use crate::models::{Bookmark, BookmarkView};
use crate::resolver::PersonResolver;
use crate::storage::StorageHandle;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

const USER_PERSON_INDEX: &str = "user_person";

pub struct BookmarkStore {
    global: Arc<StorageHandle>,
    resolver: Arc<PersonResolver>,
}

impl BookmarkStore {
    pub fn new(global: Arc<StorageHandle>, resolver: Arc<PersonResolver>) -> Self {
        Self { global, resolver }
    }

    /// Bookmarks `key` for `user_id`. Adding the same person twice returns the first bookmark.
    pub fn add(&self, user_id: u64, key: &str) -> AnoimaResult<Bookmark> {
        let person = self.resolver.resolve(key)?;
        let value = Bookmark::unique_value(user_id, person.person.id);
        let bookmark = Bookmark {
            id: 0,
            user_id,
            person_id: person.person.id,
            created_at: Utc::now(),
        };
        match self.global.insert_unique(bookmark, USER_PERSON_INDEX, &value) {
            Ok(created) => Ok(created),
            Err(e) if e.is_unique_violation() => self
                .global
                .find_by_unique::<Bookmark>(USER_PERSON_INDEX, &value)?
                .ok_or(e),
            Err(e) => Err(e),
        }
    }

    /// Removes the bookmark. The key only needs to exist in the key-map, so bookmarks of
    /// deleted persons can still be cleared.
    pub fn remove(&self, user_id: u64, key: &str) -> AnoimaResult<()> {
        let entry = self.resolver.key_map().get(key)?;
        let value = Bookmark::unique_value(user_id, entry.id);
        let existing: Bookmark = self
            .global
            .find_by_unique(USER_PERSON_INDEX, &value)?
            .ok_or_else(|| AnoimaError::not_found(format!("bookmark for '{}'", key)))?;
        self.global
            .remove_unique::<Bookmark>(existing.id, USER_PERSON_INDEX, &value)?;
        Ok(())
    }

    /// The user's bookmarks in creation order, joined to their persons. Bookmarks whose
    /// person no longer resolves are left out.
    pub fn list(&self, user_id: u64) -> AnoimaResult<Vec<BookmarkView>> {
        let bookmarks: Vec<Bookmark> =
            self.global
                .find_where(|b: &Bookmark| b.user_id == user_id, 0, usize::MAX)?;
        let ids: Vec<u64> = bookmarks.iter().map(|b| b.person_id).collect();
        let entries = self.resolver.key_map().find_by_ids(&ids)?;
        let mut persons: HashMap<u64, _> = self
            .resolver
            .attach_persons(entries)?
            .into_iter()
            .map(|p| (p.person.id, p))
            .collect();

        Ok(bookmarks
            .into_iter()
            .filter_map(|bookmark| {
                persons
                    .remove(&bookmark.person_id)
                    .map(|person| BookmarkView { bookmark, person })
            })
            .collect())
    }
}
