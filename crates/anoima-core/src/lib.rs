//! anoima-core: sharded person directory.
//!
//! Persons are spread over N independent sled shards. A global key-map issues each person an
//! opaque 16-character key plus a globally unique id and records which shard holds it.
//! [`Anoima`] wires the components together once at startup; nothing here is a global.

mod bookmarks;
mod config;
mod error;
mod fanout;
mod key_map;
mod models;
mod resolver;
mod shards;
mod storage;

pub use bookmarks::BookmarkStore;
pub use config::{AnoimaConfig, ShardConfig};
pub use error::{AnoimaError, AnoimaResult};
pub use fanout::FanoutExecutor;
pub use key_map::{generate_key, is_valid_key, KeyMapStore, KEY_ALPHABET, KEY_LEN};
pub use models::{
    Actor, Bookmark, BookmarkView, Comment, Information, InformationView, KeyMapEntry,
    MappedPerson, NewComment, NewInformation, NewPerson, Person, PersonDetail, PersonPatch,
    Privacy, Vote, VoteKind, VoteTally,
};
pub use resolver::PersonResolver;
pub use shards::{ShardRegistry, ShardStatus};
pub use storage::{Record, SoftDelete, StorageHandle};

use std::sync::Arc;

/// The assembled core: one shard registry, one global store, and the services over them.
pub struct Anoima {
    pub config: AnoimaConfig,
    pub shards: Arc<ShardRegistry>,
    pub global: Arc<StorageHandle>,
    pub key_map: Arc<KeyMapStore>,
    pub resolver: Arc<PersonResolver>,
    pub fanout: Arc<FanoutExecutor>,
    pub bookmarks: Arc<BookmarkStore>,
}

impl Anoima {
    /// Opens the global store and every configured shard.
    pub fn open(config: AnoimaConfig) -> AnoimaResult<Self> {
        let global = StorageHandle::open_path(config.global_path(), "global")?;
        let shards = ShardRegistry::open(&config)?;
        Ok(Self::from_parts(config, shards, global))
    }

    /// Wires already opened stores.
    pub fn from_parts(config: AnoimaConfig, shards: ShardRegistry, global: StorageHandle) -> Self {
        let shards = Arc::new(shards);
        let global = Arc::new(global);
        let key_map = Arc::new(KeyMapStore::new(Arc::clone(&global)));
        let resolver = Arc::new(PersonResolver::new(Arc::clone(&shards), Arc::clone(&key_map)));
        let fanout = Arc::new(FanoutExecutor::new(Arc::clone(&shards), Arc::clone(&key_map)));
        let bookmarks = Arc::new(BookmarkStore::new(Arc::clone(&global), Arc::clone(&resolver)));
        tracing::info!(
            target: "anoima::core",
            shards = shards.shard_count(),
            "anoima core ready"
        );
        Self {
            config,
            shards,
            global,
            key_map,
            resolver,
            fanout,
            bookmarks,
        }
    }

    /// Flushes the global store and every shard.
    pub fn flush(&self) -> AnoimaResult<()> {
        self.global.flush()?;
        self.shards.flush()
    }
}
