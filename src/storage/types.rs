//! Core identifier and record types shared by the engine and storage backends.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A validated entity name.
///
/// Entity names identify the relational table (or cache region) a record
/// belongs to.
///
/// Valid names:
/// - 1-64 characters
/// - Alphanumeric, underscores, hyphens only
/// - Must start with a letter or underscore
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityName(String);

impl EntityName {
    /// create a new EntityName, validating the input
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Validate an entity name.
    fn validate(name: &str) -> Result<(), InvalidNameError> {
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if name.len() > 64 {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        let first_char = name.chars().next().unwrap();

        if !first_char.is_ascii_alphabetic() && first_char != '_' {
            return Err(InvalidNameError::InvalidStart(first_char));
        }

        for (i, c) in name.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EntityName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated entity identifier.
///
/// Identifiers are opaque to the engine; numeric keys, UUIDs and ULIDs all
/// render into the same restricted string form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidNameError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Validate an identifier.
    fn validate(id: &str) -> Result<(), InvalidNameError> {
        if id.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if id.len() > 128 {
            return Err(InvalidNameError::TooLong(id.len()));
        }

        for (i, c) in id.chars().enumerate() {
            // alphanumeric, underscore, hyphen allowed
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }

    /// Generate a new ULID-based identifier.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Fully-qualified reference to one stored entity.
///
/// This is the unit of conflict reporting and cache eviction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    pub entity: EntityName,
    pub id: EntityId,
}

impl EntityKey {
    /// create a new EntityKey
    pub fn new(entity: EntityName, id: EntityId) -> Self {
        Self { entity, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.id)
    }
}

/// A versioned record - the wire format between engine-side code and a
/// storage backend.
///
/// `version` is the optimistic-locking token: a record read at version `v`
/// may only be written back while the stored row is still at `v`. Version 0
/// means the record has never been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: EntityId,
    version: u64,
    data: BTreeMap<String, Value>,
}

impl Record {
    /// Create a new, never-persisted record.
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            version: 0,
            data: BTreeMap::new(),
        }
    }

    /// Create a record from raw field data.
    pub fn from_data(id: EntityId, data: BTreeMap<String, Value>) -> Self {
        Self {
            id,
            version: 0,
            data,
        }
    }

    /// Set the version token.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Set a field, builder-style.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// true once the record has been written to storage at least once
    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }

    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// consume the record, keeping only its field data
    pub fn into_data(self) -> BTreeMap<String, Value> {
        self.data
    }

    /// read a single field
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// write a single field
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(name.into(), value.into());
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// error type for invalid names (entities, identifiers)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidStart(char),
    InvalidCharacter { char: char, position: usize },
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidStart(c) => write!(f, "name cannot start with '{}'", c),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char, position)
            }
        }
    }
}

impl std::error::Error for InvalidNameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_name_valid() {
        assert!(EntityName::new("players").is_ok());
        assert!(EntityName::new("game_accounts").is_ok());
        assert!(EntityName::new("Player123").is_ok());
        assert!(EntityName::new("_private").is_ok());
        assert!(EntityName::new("my-entity").is_ok());
    }

    #[test]
    fn test_entity_name_invalid() {
        assert!(EntityName::new("").is_err());
        assert!(EntityName::new("123players").is_err()); // starts with number
        assert!(EntityName::new("players/admin").is_err()); // contains slash
        assert!(EntityName::new("a".repeat(65)).is_err()); // too long
    }

    #[test]
    fn test_entity_id_valid() {
        assert!(EntityId::new("42").is_ok());
        assert!(EntityId::new("01ARZ3NDEKTSV4RRFFQ69G5FAV").is_ok()); // ULID
        assert!(EntityId::new("550e8400-e29b-41d4-a716-446655440000").is_ok()); // UUID
        assert!(EntityId::new("simple_key").is_ok());
        assert!(EntityId::new("").is_err());
        assert!(EntityId::new("no spaces").is_err());
    }

    #[test]
    fn test_entity_id_generate() {
        let id1 = EntityId::generate();
        let id2 = EntityId::generate();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 26); // ULID length
    }

    #[test]
    fn test_entity_id_from_integer() {
        assert_eq!(EntityId::from(42u64).as_str(), "42");
        assert_eq!(EntityId::from(7i64).as_str(), "7");
    }

    #[test]
    fn test_entity_key_display() {
        let key = EntityKey::new(
            EntityName::new("players").unwrap(),
            EntityId::new("42").unwrap(),
        );
        assert_eq!(key.to_string(), "players/42");
    }

    #[test]
    fn test_record_fields_and_version() {
        let mut record = Record::new(EntityId::new("p1").unwrap())
            .with_field("name", "Alice")
            .with_field("mana", 100);

        assert!(!record.is_persisted());
        assert_eq!(record.get("name"), Some(&Value::String("Alice".to_string())));

        record.set("mana", 90);
        assert_eq!(record.get("mana"), Some(&Value::from(90)));

        let record = record.with_version(3);
        assert!(record.is_persisted());
        assert_eq!(record.version(), 3);
    }
}
