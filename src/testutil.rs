//! Shared fixtures for unit tests.

use serde_json::json;

use crate::schema::{EntityKindDef, RelationshipKindDef, StatusDef, TagDef, WorldSchema};

/// A small but representative schema used across unit tests: two npc
/// subtypes, a directed membership kind, a symmetric alliance kind, an
/// unconstrained proximity kind, and a conflicting tag pair.
pub(crate) fn sample_schema() -> WorldSchema {
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
                statuses: vec![
                    StatusDef {
                        name: "active".into(),
                        terminal: false,
                    },
                    StatusDef {
                        name: "disbanded".into(),
                        terminal: true,
                    },
                ],
                attributes: vec!["population".into()],
            },
            EntityKindDef {
                name: "location".into(),
                subtypes: vec!["city".into(), "ruin".into()],
                statuses: vec![StatusDef {
                    name: "standing".into(),
                    terminal: false,
                }],
                attributes: vec!["territory".into()],
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
            RelationshipKindDef {
                name: "knows".into(),
                src_kinds: vec!["npc".into()],
                dst_kinds: vec!["npc".into()],
                symmetric: true,
            },
            RelationshipKindDef {
                name: "near".into(),
                src_kinds: vec![],
                dst_kinds: vec![],
                symmetric: true,
            },
            RelationshipKindDef {
                name: "created_by".into(),
                src_kinds: vec![],
                dst_kinds: vec![],
                symmetric: false,
            },
        ],
        tags: vec![
            TagDef {
                name: "heretic".into(),
                min_usage: None,
                max_usage: Some(5),
                conflicts_with: vec!["orthodox".into()],
                expected_rarity: None,
            },
            TagDef {
                name: "orthodox".into(),
                min_usage: Some(2),
                max_usage: None,
                conflicts_with: vec![],
                expected_rarity: None,
            },
            TagDef {
                name: "cursed".into(),
                min_usage: None,
                max_usage: Some(3),
                conflicts_with: vec![],
                expected_rarity: None,
            },
        ],
        cultures: vec!["riverfolk".into(), "highlanders".into()],
    }
}

/// A complete runnable config as JSON: two eras, two pressures, a growth
/// rule per kind and a couple of simulation rules, with targets steering
/// toward a balanced npc/faction split.
pub(crate) fn sample_config_json() -> String {
    let config = json!({
        "schema": serde_json::to_value(sample_schema()).unwrap(),
        "eras": [
            {
                "id": "founding",
                "name": "The Founding",
                "transitions": [{"type": "entity_count", "at_least": 12}],
                "targets": {"entity_kinds": {"npc": 0.8}}
            },
            {
                "id": "consolidation",
                "name": "Consolidation",
                "rule_weights": {"found_faction": 0.5}
            }
        ],
        "pressures": [
            {"id": "unrest", "initial": 30.0, "decay": 0.05},
            {
                "id": "expansion",
                "initial": 50.0,
                "decay": 0.02,
                "growth": [
                    {
                        "metric": {"type": "entity_count", "kind": "npc"},
                        "weight": 0.5
                    }
                ]
            }
        ],
        "rules": [
            {
                "id": "spawn_npc",
                "name": "A figure emerges",
                "phase": "growth",
                "creations": [{"kind": "npc", "name_prefix": "Figure"}],
                "weight": 3.0
            },
            {
                "id": "found_faction",
                "name": "Found a faction",
                "phase": "growth",
                "selections": [
                    {
                        "name": "founder",
                        "select": {"strategy": "by_kind", "kind": "npc"}
                    }
                ],
                "creations": [
                    {
                        "bind": "faction",
                        "kind": "faction",
                        "name_prefix": "Banner",
                        "lineage": {"relationship_kind": "created_by", "from": "founder"}
                    }
                ],
                "contract": {
                    "enabled_by": [{"type": "entity_count", "kind": "npc", "at_least": 2}],
                    "saturation": [{"kind": "faction", "ceiling": 6}]
                },
                "pressure_updates": [{"pressure": "unrest", "delta": 2.0}]
            },
            {
                "id": "meet",
                "name": "Two figures meet",
                "phase": "simulation",
                "selections": [
                    {
                        "name": "a",
                        "select": {"strategy": "by_kind", "kind": "npc"}
                    },
                    {
                        "name": "b",
                        "select": {"strategy": "by_kind", "kind": "npc"},
                        "filters": [
                            {"type": "lacks_relationship", "kind": "knows", "with": "a"}
                        ]
                    }
                ],
                "mutations": [
                    {"type": "create_relationship", "kind": "knows", "src": "a", "dst": "b"}
                ]
            },
            {
                "id": "rise_to_renown",
                "name": "A figure rises",
                "phase": "simulation",
                "selections": [
                    {
                        "name": "riser",
                        "select": {"strategy": "by_kind", "kind": "npc"},
                        "filters": [{"type": "has_relationship", "kind": "knows"}]
                    }
                ],
                "condition": {"type": "random_chance", "probability": 0.4},
                "mutations": [
                    {"type": "adjust_prominence", "target": "riser", "steps": 1}
                ],
                "contract": {"affects": {"entities": 1}}
            }
        ],
        "targets": {
            "entity_kinds": {"npc": 0.6, "faction": 0.3}
        },
        "settings": {"seed": 7, "max_ticks": 50, "growth_firings": 2, "simulation_firings": 3}
    });
    serde_json::to_string_pretty(&config).unwrap()
}
