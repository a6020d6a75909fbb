//! Shared value types: primary keys, entity records, and load status.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// PrimaryKey
// ============================================================================

/// The primary key of an entity. Backends use either integer or string keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Int(i64),
    Str(String),
}

impl PrimaryKey {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PrimaryKey {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for PrimaryKey {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<&str> for PrimaryKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

// ============================================================================
// Status
// ============================================================================

/// Load status of a cache entry, surfaced on every emitted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Entry exists but no fetch has been dispatched yet.
    Init,
    Loading,
    Loaded,
    Error,
}

// ============================================================================
// Entity
// ============================================================================

/// A typed backend entity: type name, primary key, and its property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "$type")]
    pub entity_type: String,
    #[serde(rename = "$primaryKey")]
    pub primary_key: PrimaryKey,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Entity {
    /// Build an entity from a JSON object of properties.
    ///
    /// Non-object `properties` produce an entity with no properties.
    pub fn new(
        entity_type: impl Into<String>,
        primary_key: impl Into<PrimaryKey>,
        properties: Value,
    ) -> Self {
        let properties = match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            entity_type: entity_type.into(),
            primary_key: primary_key.into(),
            properties,
        }
    }

    /// Read a top-level property.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.properties.get(field)
    }

    /// Shallow-merge `patch` over this entity's properties.
    pub fn with_patch(&self, patch: &Map<String, Value>) -> Entity {
        let mut merged = self.clone();
        for (k, v) in patch {
            merged.properties.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Keep only the named properties.
    pub fn project(&self, fields: &[String]) -> Entity {
        let properties = self
            .properties
            .iter()
            .filter(|(k, _)| fields.iter().any(|f| f == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Entity {
            entity_type: self.entity_type.clone(),
            primary_key: self.primary_key.clone(),
            properties,
        }
    }

    pub fn reference(&self) -> EntityRef {
        EntityRef {
            entity_type: self.entity_type.clone(),
            primary_key: self.primary_key.clone(),
        }
    }
}

/// Identifies an entity without carrying its data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub primary_key: PrimaryKey,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, primary_key: impl Into<PrimaryKey>) -> Self {
        Self {
            entity_type: entity_type.into(),
            primary_key: primary_key.into(),
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
