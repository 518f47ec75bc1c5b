//! World schema: the registries every other component validates against.
//!
//! The schema is an externally-authored JSON document declaring entity kinds
//! (with subtypes, statuses, and numeric attributes), relationship kinds (with
//! endpoint constraints and symmetry), the tag registry (usage bounds, rarity
//! hints, conflict sets), and cultures. It is read-only during simulation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Rarity tier a tag is expected (or observed) to occupy, by usage count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RarityTier {
    Common,
    Uncommon,
    Rare,
    Unique,
}

/// A status an entity kind can carry, flagged terminal or not.
///
/// Terminal statuses end an entity's active participation (dead, razed,
/// disbanded); simulation rules skip entities in a terminal status unless the
/// rule targets them explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDef {
    pub name: String,
    #[serde(default)]
    pub terminal: bool,
}

/// Declaration of one entity kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityKindDef {
    pub name: String,
    /// Kind-scoped subtype vocabulary (e.g. `city`/`village` under `location`).
    #[serde(default)]
    pub subtypes: Vec<String>,
    /// Registered status set. The first entry is the default for new entities.
    pub statuses: Vec<StatusDef>,
    /// Names of kind-specific numeric attributes (population, territory, ...).
    #[serde(default)]
    pub attributes: Vec<String>,
}

impl EntityKindDef {
    /// Default status for newly created entities of this kind.
    pub fn default_status(&self) -> &str {
        &self.statuses[0].name
    }

    pub fn has_status(&self, status: &str) -> bool {
        self.statuses.iter().any(|s| s.name == status)
    }

    pub fn status_is_terminal(&self, status: &str) -> bool {
        self.statuses
            .iter()
            .any(|s| s.name == status && s.terminal)
    }

    pub fn has_subtype(&self, subtype: &str) -> bool {
        self.subtypes.iter().any(|s| s == subtype)
    }
}

/// Declaration of one relationship kind.
///
/// Empty endpoint lists mean "any entity kind". Symmetric kinds are queried
/// as undirected by the graph store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipKindDef {
    pub name: String,
    #[serde(default)]
    pub src_kinds: Vec<String>,
    #[serde(default)]
    pub dst_kinds: Vec<String>,
    #[serde(default)]
    pub symmetric: bool,
}

impl RelationshipKindDef {
    /// Check whether (src_kind, dst_kind) satisfies this kind's constraints.
    /// Symmetric kinds accept the pair in either orientation.
    pub fn allows(&self, src_kind: &str, dst_kind: &str) -> bool {
        let forward = self.end_allows(&self.src_kinds, src_kind)
            && self.end_allows(&self.dst_kinds, dst_kind);
        if forward {
            return true;
        }
        self.symmetric
            && self.end_allows(&self.src_kinds, dst_kind)
            && self.end_allows(&self.dst_kinds, src_kind)
    }

    fn end_allows(&self, allowed: &[String], kind: &str) -> bool {
        allowed.is_empty() || allowed.iter().any(|k| k == kind)
    }
}

/// Declaration of one tag in the taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagDef {
    pub name: String,
    /// Tags used fewer times than this are flagged as orphans.
    #[serde(default)]
    pub min_usage: Option<usize>,
    /// Tags used more times than this are flagged as overused.
    #[serde(default)]
    pub max_usage: Option<usize>,
    /// Tags that may never co-exist with this one on a single entity.
    #[serde(default)]
    pub conflicts_with: Vec<String>,
    /// Authoring hint; the taxonomy analyzer reports observed tiers alongside.
    #[serde(default)]
    pub expected_rarity: Option<RarityTier>,
}

/// The complete world schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSchema {
    pub entity_kinds: Vec<EntityKindDef>,
    pub relationship_kinds: Vec<RelationshipKindDef>,
    #[serde(default)]
    pub tags: Vec<TagDef>,
    #[serde(default)]
    pub cultures: Vec<String>,
}

impl WorldSchema {
    pub fn entity_kind(&self, name: &str) -> Option<&EntityKindDef> {
        self.entity_kinds.iter().find(|k| k.name == name)
    }

    pub fn relationship_kind(&self, name: &str) -> Option<&RelationshipKindDef> {
        self.relationship_kinds.iter().find(|k| k.name == name)
    }

    pub fn tag(&self, name: &str) -> Option<&TagDef> {
        self.tags.iter().find(|t| t.name == name)
    }

    pub fn has_culture(&self, name: &str) -> bool {
        self.cultures.iter().any(|c| c == name)
    }

    /// Check whether two tags are declared mutually exclusive (in either
    /// direction — conflict declarations are treated as symmetric).
    pub fn tags_conflict(&self, a: &str, b: &str) -> bool {
        let declared = |x: &str, y: &str| {
            self.tag(x)
                .map(|t| t.conflicts_with.iter().any(|c| c == y))
                .unwrap_or(false)
        };
        declared(a, b) || declared(b, a)
    }

    /// Map of tag name to its registry entry, for the taxonomy analyzer.
    pub fn tag_index(&self) -> HashMap<&str, &TagDef> {
        self.tags.iter().map(|t| (t.name.as_str(), t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn minimal_schema() -> WorldSchema {
        WorldSchema {
            entity_kinds: vec![
                EntityKindDef {
                    name: "npc".into(),
                    subtypes: vec!["warrior".into(), "scholar".into()],
                    statuses: vec![
                        StatusDef {
                            name: "alive".into(),
                            terminal: false,
                        },
                        StatusDef {
                            name: "dead".into(),
                            terminal: true,
                        },
                    ],
                    attributes: vec![],
                },
                EntityKindDef {
                    name: "faction".into(),
                    subtypes: vec![],
                    statuses: vec![StatusDef {
                        name: "active".into(),
                        terminal: false,
                    }],
                    attributes: vec!["population".into()],
                },
            ],
            relationship_kinds: vec![
                RelationshipKindDef {
                    name: "member_of".into(),
                    src_kinds: vec!["npc".into()],
                    dst_kinds: vec!["faction".into()],
                    symmetric: false,
                },
                RelationshipKindDef {
                    name: "ally_of".into(),
                    src_kinds: vec!["faction".into()],
                    dst_kinds: vec!["faction".into()],
                    symmetric: true,
                },
            ],
            tags: vec![
                TagDef {
                    name: "heretic".into(),
                    min_usage: None,
                    max_usage: Some(5),
                    conflicts_with: vec!["orthodox".into()],
                    expected_rarity: Some(RarityTier::Rare),
                },
                TagDef {
                    name: "orthodox".into(),
                    min_usage: Some(2),
                    max_usage: None,
                    conflicts_with: vec![],
                    expected_rarity: None,
                },
            ],
            cultures: vec!["riverfolk".into(), "highlanders".into()],
        }
    }

    #[test]
    fn endpoint_constraints() {
        let schema = minimal_schema();
        let member = schema.relationship_kind("member_of").unwrap();
        assert!(member.allows("npc", "faction"));
        assert!(!member.allows("faction", "npc"));
    }

    #[test]
    fn symmetric_kind_allows_either_orientation() {
        let schema = minimal_schema();
        let ally = schema.relationship_kind("ally_of").unwrap();
        assert!(ally.allows("faction", "faction"));
    }

    #[test]
    fn empty_endpoint_list_means_any() {
        let def = RelationshipKindDef {
            name: "near".into(),
            src_kinds: vec![],
            dst_kinds: vec![],
            symmetric: true,
        };
        assert!(def.allows("npc", "location"));
    }

    #[test]
    fn conflict_declarations_are_symmetric() {
        let schema = minimal_schema();
        assert!(schema.tags_conflict("heretic", "orthodox"));
        // declared only on "heretic", but checked both ways
        assert!(schema.tags_conflict("orthodox", "heretic"));
        assert!(!schema.tags_conflict("heretic", "heretic"));
    }

    #[test]
    fn default_status_is_first() {
        let schema = minimal_schema();
        let npc = schema.entity_kind("npc").unwrap();
        assert_eq!(npc.default_status(), "alive");
        assert!(npc.status_is_terminal("dead"));
        assert!(!npc.status_is_terminal("alive"));
    }

    #[test]
    fn schema_deserializes_from_json() {
        let json = r#"{
            "entity_kinds": [
                {"name": "npc", "statuses": [{"name": "alive"}]}
            ],
            "relationship_kinds": [
                {"name": "knows", "symmetric": true}
            ],
            "tags": [{"name": "cursed", "max_usage": 3}],
            "cultures": ["riverfolk"]
        }"#;
        let schema: WorldSchema = serde_json::from_str(json).unwrap();
        assert!(schema.entity_kind("npc").is_some());
        assert!(schema.relationship_kind("knows").unwrap().symmetric);
        assert_eq!(schema.tag("cursed").unwrap().max_usage, Some(3));
    }
}
