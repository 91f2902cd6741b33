//! Core data models for the manifest pipeline.
//!
//! Upstream shapes are decoded strictly only where the pipeline reads them
//! (the locale path map and each definition's `hash`); everything else in a
//! definition is carried through as an opaque JSON map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Bungie's `ErrorCode` for a successful platform call.
pub const PLATFORM_SUCCESS: i64 = 1;

/// Platform response envelope wrapping the manifest pointer.
///
/// `Response` is kept as raw JSON so that an error envelope (which may carry
/// an empty or missing `Response`) is reported by its error code rather than
/// as a decode failure.
#[derive(Debug, Clone, Deserialize)]
pub struct PointerEnvelope {
    #[serde(rename = "Response", default)]
    pub response: Option<Value>,
    #[serde(rename = "ErrorCode", default)]
    pub error_code: Option<i64>,
    #[serde(rename = "ErrorStatus", default)]
    pub error_status: Option<String>,
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
}

/// Version string plus per-locale paths to the world-content bundles.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ManifestPointer {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "mobileWorldContentPaths")]
    pub world_content_paths: BTreeMap<String, String>,
}

impl ManifestPointer {
    /// Relative content path for `locale`, if the manifest publishes one.
    pub fn content_path(&self, locale: &str) -> Option<&str> {
        self.world_content_paths.get(locale).map(String::as_str)
    }
}

/// A row of a raw content store definition table, keyed by its storage row id.
#[derive(Debug, Clone)]
pub struct RawItemRecord {
    pub id: i64,
    pub json: Vec<u8>,
}

/// A row of the lookup store, keyed by the definition's semantic hash.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupRecord {
    pub hash: String,
    pub json: Vec<u8>,
}

/// A manifest definition. Only `hash` is interpreted; the rest passes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub hash: u64,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Item {
    /// `displayProperties.name`, when the definition has one.
    pub fn display_name(&self) -> Option<&str> {
        self.rest
            .get("displayProperties")
            .and_then(|d| d.get("name"))
            .and_then(Value::as_str)
    }
}

/// The closed set of definition tables the lookup store can hold.
///
/// Table names reach SQL text only through [`DefinitionTable::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionTable {
    InventoryItem,
    SandboxPerk,
    Stat,
    InventoryBucket,
    DamageType,
}

impl DefinitionTable {
    pub const ALL: [DefinitionTable; 5] = [
        DefinitionTable::InventoryItem,
        DefinitionTable::SandboxPerk,
        DefinitionTable::Stat,
        DefinitionTable::InventoryBucket,
        DefinitionTable::DamageType,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DefinitionTable::InventoryItem => "DestinyInventoryItemDefinition",
            DefinitionTable::SandboxPerk => "DestinySandboxPerkDefinition",
            DefinitionTable::Stat => "DestinyStatDefinition",
            DefinitionTable::InventoryBucket => "DestinyInventoryBucketDefinition",
            DefinitionTable::DamageType => "DestinyDamageTypeDefinition",
        }
    }
}

impl fmt::Display for DefinitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown definition table: {0}")]
pub struct UnknownTable(pub String);

impl FromStr for DefinitionTable {
    type Err = UnknownTable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DefinitionTable::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTable(s.to_string()))
    }
}

impl Serialize for DefinitionTable {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// What to do when two source rows carry the same semantic hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// The later-iterated row replaces the earlier one.
    LastWins,
    /// The earlier-iterated row is kept.
    FirstWins,
    /// The refresh fails and the previous lookup contents stay in place.
    Reject,
}

impl DuplicatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::LastWins => "last-wins",
            DuplicatePolicy::FirstWins => "first-wins",
            DuplicatePolicy::Reject => "reject",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown duplicate policy: {0}")]
pub struct UnknownPolicy(pub String);

impl FromStr for DuplicatePolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last-wins" => Ok(DuplicatePolicy::LastWins),
            "first-wins" => Ok(DuplicatePolicy::FirstWins),
            "reject" => Ok(DuplicatePolicy::Reject),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}
