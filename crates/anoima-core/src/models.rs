//! Record types for the global store (key-map, bookmarks) and the shards (persons and
//! their information, comments and votes), plus the request payloads that create them.
//!
//! Wire names are camelCase so the web client keeps reading `ownerId`, `shardNo`, etc.

use crate::error::{AnoimaError, AnoimaResult};
use crate::storage::{Record, SoftDelete};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// -----------------------------------------------------------------------------
// Global store
// -----------------------------------------------------------------------------

/// Global key-map row: opaque public key -> (person id, shard number).
/// `id` doubles as the primary key of the Person in shard `shard_no`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMapEntry {
    pub id: u64,
    pub key: String,
    pub shard_no: usize,
    pub created_at: DateTime<Utc>,
}

impl Record for KeyMapEntry {
    const TABLE: &'static str = "person_map";

    fn id(&self) -> u64 {
        self.id
    }

    fn assign_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// A user's bookmark of a person (global, hard-deleted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: u64,
    pub user_id: u64,
    pub person_id: u64,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    /// Value of the unique (user, person) index.
    pub fn unique_value(user_id: u64, person_id: u64) -> String {
        format!("{}:{}", user_id, person_id)
    }
}

impl Record for Bookmark {
    const TABLE: &'static str = "bookmark";

    fn id(&self) -> u64 {
        self.id
    }

    fn assign_id(&mut self, id: u64) {
        self.id = id;
    }
}

// -----------------------------------------------------------------------------
// Shard-local records
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    Public,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for Privacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Privacy {
    type Err = AnoimaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(AnoimaError::validation(format!(
                "privacy must be 'public' or 'private', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: u64,
    pub owner_id: u64,
    pub name: String,
    pub privacy: Privacy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Person {
    pub fn is_public(&self) -> bool {
        self.privacy == Privacy::Public
    }
}

impl Record for Person {
    const TABLE: &'static str = "person";

    fn id(&self) -> u64 {
        self.id
    }

    fn assign_id(&mut self, id: u64) {
        self.id = id;
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl SoftDelete for Person {
    fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
    }
}

/// Sighting information posted about a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Information {
    pub id: u64,
    pub person_id: u64,
    pub owner_id: u64,
    pub relationship: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Opaque attachment (image data URL etc.).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Record for Information {
    const TABLE: &'static str = "information";

    fn id(&self) -> u64 {
        self.id
    }

    fn assign_id(&mut self, id: u64) {
        self.id = id;
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl SoftDelete for Information {
    fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
    }
}

/// Comment on a person, or on one of the person's information rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: u64,
    pub person_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub information_id: Option<u64>,
    pub owner_id: u64,
    pub relationship: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Record for Comment {
    const TABLE: &'static str = "comment";

    fn id(&self) -> u64 {
        self.id
    }

    fn assign_id(&mut self, id: u64) {
        self.id = id;
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl SoftDelete for Comment {
    fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    Good,
    Bad,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: u64,
    pub information_id: u64,
    pub owner_id: u64,
    #[serde(rename = "type")]
    pub kind: VoteKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Vote {
    /// Value of the unique (information, owner) index.
    pub fn unique_value(information_id: u64, owner_id: u64) -> String {
        format!("{}:{}", information_id, owner_id)
    }
}

impl Record for Vote {
    const TABLE: &'static str = "vote";

    fn id(&self) -> u64 {
        self.id
    }

    fn assign_id(&mut self, id: u64) {
        self.id = id;
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl SoftDelete for Vote {
    fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
    }
}

// -----------------------------------------------------------------------------
// Joined views
// -----------------------------------------------------------------------------

/// A person together with its key-map entry (the public key lives in `map.key`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedPerson {
    #[serde(flatten)]
    pub person: Person,
    pub map: KeyMapEntry,
}

impl MappedPerson {
    pub fn key(&self) -> &str {
        &self.map.key
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub good: usize,
    pub bad: usize,
}

/// Information row with its comments and vote tally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationView {
    #[serde(flatten)]
    pub information: Information,
    pub comments: Vec<Comment>,
    pub votes: VoteTally,
}

/// Person with every information row and the comments attached directly to the person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonDetail {
    #[serde(flatten)]
    pub person: MappedPerson,
    pub information: Vec<InformationView>,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmarkView {
    #[serde(flatten)]
    pub bookmark: Bookmark,
    pub person: MappedPerson,
}

// -----------------------------------------------------------------------------
// Caller identity
// -----------------------------------------------------------------------------

/// Who is calling, as decided by the auth layer in front of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Anonymous,
    User(u64),
    /// Admin key holder; the user id is set only when a user header came with the key.
    Admin(Option<u64>),
}

impl Actor {
    pub fn user_id(&self) -> Option<u64> {
        match self {
            Self::Anonymous => None,
            Self::User(id) => Some(*id),
            Self::Admin(id) => *id,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin(_))
    }

    /// Owner or admin; everyone else is `Forbidden`.
    pub fn ensure_owner_or_admin(&self, owner_id: u64, what: &str) -> AnoimaResult<()> {
        match self {
            Self::Admin(_) => Ok(()),
            Self::User(id) if *id == owner_id => Ok(()),
            _ => Err(AnoimaError::Forbidden(format!("not the owner of this {}", what))),
        }
    }
}

// -----------------------------------------------------------------------------
// Request payloads
// -----------------------------------------------------------------------------

fn required(field: &str, value: Option<&str>) -> AnoimaResult<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AnoimaError::validation(format!("{} is required", field))),
    }
}

/// Fields accepted when registering a person. Validated before anything is written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPerson {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub privacy: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl NewPerson {
    pub fn new(name: impl Into<String>, privacy: Privacy) -> Self {
        Self {
            name: Some(name.into()),
            privacy: Some(privacy.as_str().to_string()),
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Builds the shard row for `id`. Name and privacy are required.
    pub fn into_person(self, id: u64, owner_id: u64) -> AnoimaResult<Person> {
        let name = required("name", self.name.as_deref())?;
        let privacy: Privacy = required("privacy", self.privacy.as_deref())?.parse()?;
        let now = Utc::now();
        Ok(Person {
            id,
            owner_id,
            name,
            privacy,
            text: self.text,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }
}

/// Partial update of a person. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub privacy: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl PersonPatch {
    pub fn apply_to(self, person: &mut Person) -> AnoimaResult<()> {
        if let Some(name) = self.name {
            person.name = required("name", Some(name.as_str()))?;
        }
        if let Some(privacy) = self.privacy {
            person.privacy = privacy.parse()?;
        }
        if self.text.is_some() {
            person.text = self.text;
        }
        person.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewInformation {
    #[serde(default, alias = "releationship")]
    pub relationship: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

impl NewInformation {
    pub fn into_information(self, person_id: u64, owner_id: u64) -> AnoimaResult<Information> {
        let relationship = required("relationship", self.relationship.as_deref())?;
        let now = Utc::now();
        Ok(Information {
            id: 0,
            person_id,
            owner_id,
            relationship,
            text: self.text,
            data: self.data,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewComment {
    #[serde(default, alias = "releationship")]
    pub relationship: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl NewComment {
    pub fn new(relationship: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            relationship: Some(relationship.into()),
            text: Some(text.into()),
        }
    }

    pub fn into_comment(
        self,
        person_id: u64,
        information_id: Option<u64>,
        owner_id: u64,
    ) -> AnoimaResult<Comment> {
        let relationship = required("relationship", self.relationship.as_deref())?;
        let text = required("text", self.text.as_deref())?;
        let now = Utc::now();
        Ok(Comment {
            id: 0,
            person_id,
            information_id,
            owner_id,
            relationship,
            text,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privacy_parses_only_the_two_values() {
        assert_eq!("public".parse::<Privacy>().unwrap(), Privacy::Public);
        assert_eq!(" private ".parse::<Privacy>().unwrap(), Privacy::Private);
        assert!(matches!(
            "friends".parse::<Privacy>(),
            Err(AnoimaError::Validation(_))
        ));
    }

    #[test]
    fn new_person_requires_name_and_privacy() {
        let missing_name = NewPerson {
            name: Some("  ".to_string()),
            privacy: Some("public".to_string()),
            text: None,
        };
        assert!(matches!(missing_name.into_person(1, 1), Err(AnoimaError::Validation(_))));

        let missing_privacy = NewPerson {
            name: Some("Taro".to_string()),
            privacy: None,
            text: None,
        };
        assert!(matches!(missing_privacy.into_person(1, 1), Err(AnoimaError::Validation(_))));

        let person = NewPerson::new("Taro", Privacy::Private)
            .with_text("met at the station")
            .into_person(5, 9)
            .unwrap();
        assert_eq!(person.id, 5);
        assert_eq!(person.owner_id, 9);
        assert_eq!(person.text.as_deref(), Some("met at the station"));
    }

    #[test]
    fn mapped_person_serializes_flat_with_map() {
        let now = Utc::now();
        let mapped = MappedPerson {
            person: Person {
                id: 3,
                owner_id: 999,
                name: "test3".to_string(),
                privacy: Privacy::Public,
                text: None,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
            map: KeyMapEntry {
                id: 3,
                key: "abcdefghijklmnop".to_string(),
                shard_no: 1,
                created_at: now,
            },
        };
        let json = serde_json::to_value(&mapped).unwrap();
        assert_eq!(json["name"], "test3");
        assert_eq!(json["ownerId"], 999);
        assert_eq!(json["privacy"], "public");
        assert_eq!(json["map"]["key"], "abcdefghijklmnop");
        assert_eq!(json["map"]["shardNo"], 1);
    }

    #[test]
    fn legacy_relationship_spelling_is_accepted() {
        let body = r#"{"releationship":"classmate","text":"seen in Osaka"}"#;
        let info: NewInformation = serde_json::from_str(body).unwrap();
        let row = info.into_information(1, 2).unwrap();
        assert_eq!(row.relationship, "classmate");
    }

    #[test]
    fn only_owner_or_admin_passes() {
        assert!(Actor::User(4).ensure_owner_or_admin(4, "person").is_ok());
        assert!(Actor::Admin(Some(1)).ensure_owner_or_admin(4, "person").is_ok());
        assert!(Actor::Admin(None).ensure_owner_or_admin(4, "person").is_ok());
        assert!(matches!(
            Actor::User(5).ensure_owner_or_admin(4, "person"),
            Err(AnoimaError::Forbidden(_))
        ));
        assert!(Actor::Anonymous.ensure_owner_or_admin(4, "person").is_err());
    }

    #[test]
    fn vote_kind_uses_type_on_the_wire() {
        let now = Utc::now();
        let vote = Vote {
            id: 1,
            information_id: 2,
            owner_id: 3,
            kind: VoteKind::Bad,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let json = serde_json::to_value(&vote).unwrap();
        assert_eq!(json["type"], "bad");
    }
}
