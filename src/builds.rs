//! Build assembly.
//!
//! Expands the curated loadouts in `builds.json` into full definitions by
//! looking up every referenced hash: subclasses, aspects, fragments and armour
//! pieces in the inventory item table, mods in the sandbox perk table.
//!
//! Lookups go through [`lookup::query`], so a missing or broken lookup store
//! yields `unavailable` entries instead of failing the whole response.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::lookup::{self, QueryOutcome};
use crate::models::DefinitionTable;
use crate::resources::{self, ResourceError};

/// A definition reference as written in `builds.json`: a string or a number.
/// Numbers may be the unsigned hash or its signed 32-bit row id form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HashRef {
    Number(u64),
    Signed(i64),
    Text(String),
}

impl fmt::Display for HashRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashRef::Number(n) => write!(f, "{}", n),
            HashRef::Signed(n) => write!(f, "{}", n),
            HashRef::Text(s) => f.write_str(s.trim()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubclassSlot {
    pub item: HashRef,
    #[serde(default)]
    pub aspects: Vec<HashRef>,
    #[serde(default)]
    pub fragments: Vec<HashRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArmorSlot {
    pub item: HashRef,
    #[serde(default, rename = "recomended_mods")]
    pub recommended_mods: Vec<HashRef>,
    #[serde(default)]
    pub optional_mods: Vec<HashRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildTemplate {
    pub name: String,
    #[serde(default)]
    pub preference: Vec<String>,
    pub subclass: SubclassSlot,
    pub helmet: ArmorSlot,
    pub gauntlets: ArmorSlot,
    pub chest_armor: ArmorSlot,
    pub leg_armor: ArmorSlot,
    /// Warlock bond, hunter cloak, or titan mark.
    #[serde(rename = "bond", alias = "cloak", alias = "mark")]
    pub class_item: ArmorSlot,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildsFile {
    #[serde(default)]
    pub warlock: Vec<BuildTemplate>,
    #[serde(default)]
    pub hunter: Vec<BuildTemplate>,
    #[serde(default)]
    pub titan: Vec<BuildTemplate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssembledSubclass {
    pub item: QueryOutcome,
    pub aspects: Vec<QueryOutcome>,
    pub fragments: Vec<QueryOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssembledArmor {
    pub item: QueryOutcome,
    pub recommended_mods: Vec<QueryOutcome>,
    pub optional_mods: Vec<QueryOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssembledBuild {
    pub name: String,
    pub preference: Vec<String>,
    pub subclass: AssembledSubclass,
    pub helmet: AssembledArmor,
    pub gauntlets: AssembledArmor,
    pub chest_armor: AssembledArmor,
    pub leg_armor: AssembledArmor,
    pub class_item: AssembledArmor,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssembledBuilds {
    pub warlock: Vec<AssembledBuild>,
    pub hunter: Vec<AssembledBuild>,
    pub titan: Vec<AssembledBuild>,
}

/// Loads `builds.json` from `resources_dir` and resolves it against the
/// lookup store at `lookup_db`.
pub async fn assemble_builds(
    resources_dir: &Path,
    lookup_db: &Path,
) -> Result<AssembledBuilds, ResourceError> {
    let file: BuildsFile = resources::load_json(resources_dir, resources::BUILDS_FILE).await?;
    Ok(resolve_builds(&file, lookup_db).await)
}

pub async fn resolve_builds(file: &BuildsFile, lookup_db: &Path) -> AssembledBuilds {
    AssembledBuilds {
        warlock: resolve_class(&file.warlock, lookup_db).await,
        hunter: resolve_class(&file.hunter, lookup_db).await,
        titan: resolve_class(&file.titan, lookup_db).await,
    }
}

async fn resolve_class(builds: &[BuildTemplate], lookup_db: &Path) -> Vec<AssembledBuild> {
    let mut out = Vec::with_capacity(builds.len());
    for build in builds {
        out.push(resolve_build(build, lookup_db).await);
    }
    out
}

async fn resolve_build(build: &BuildTemplate, lookup_db: &Path) -> AssembledBuild {
    AssembledBuild {
        name: build.name.clone(),
        preference: build.preference.clone(),
        subclass: AssembledSubclass {
            item: item(&build.subclass.item, lookup_db).await,
            aspects: items(&build.subclass.aspects, DefinitionTable::InventoryItem, lookup_db)
                .await,
            fragments: items(&build.subclass.fragments, DefinitionTable::InventoryItem, lookup_db)
                .await,
        },
        helmet: resolve_armor(&build.helmet, lookup_db).await,
        gauntlets: resolve_armor(&build.gauntlets, lookup_db).await,
        chest_armor: resolve_armor(&build.chest_armor, lookup_db).await,
        leg_armor: resolve_armor(&build.leg_armor, lookup_db).await,
        class_item: resolve_armor(&build.class_item, lookup_db).await,
    }
}

async fn resolve_armor(slot: &ArmorSlot, lookup_db: &Path) -> AssembledArmor {
    AssembledArmor {
        item: item(&slot.item, lookup_db).await,
        recommended_mods: items(&slot.recommended_mods, DefinitionTable::SandboxPerk, lookup_db)
            .await,
        optional_mods: items(&slot.optional_mods, DefinitionTable::SandboxPerk, lookup_db).await,
    }
}

async fn item(reference: &HashRef, lookup_db: &Path) -> QueryOutcome {
    lookup::query(
        lookup_db,
        &reference.to_string(),
        DefinitionTable::InventoryItem.as_str(),
    )
    .await
}

async fn items(refs: &[HashRef], table: DefinitionTable, lookup_db: &Path) -> Vec<QueryOutcome> {
    let mut out = Vec::with_capacity(refs.len());
    for reference in refs {
        out.push(lookup::query(lookup_db, &reference.to_string(), table.as_str()).await);
    }
    out
}
