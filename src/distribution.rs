//! Distribution tracker: steers rule selection toward target ratios.
//!
//! The tracker never blocks a rule. It reweights: a rule whose effect moves a
//! ratio toward its target gets a boost proportional to the deviation, one
//! that moves it away gets damped, and the scheduler's weighted draw does the
//! rest. Convergence is an observation (`overall_deviation` under the
//! threshold), not a stopping condition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::GraphStore;
use crate::graph::analytics::{ClusteringConfig, ConnectivityMetrics, connectivity};
use crate::rules::{Mutation, RuleDoc};

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// Target ratios per category. Keys are schema names (entity kinds,
/// prominence level names, relationship kinds) or connectivity metric names
/// (`isolated_ratio`, `intra_cluster_density`, `inter_cluster_density`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistributionTargets {
    #[serde(default)]
    pub entity_kinds: BTreeMap<String, f64>,
    #[serde(default)]
    pub prominence: BTreeMap<String, f64>,
    #[serde(default)]
    pub relationship_kinds: BTreeMap<String, f64>,
    #[serde(default)]
    pub connectivity: BTreeMap<String, f64>,
}

impl DistributionTargets {
    /// Merge era overrides over these targets, key by key. An era that
    /// overrides one entity kind leaves the others at their global values.
    pub fn merged_with(&self, overrides: &DistributionTargets) -> DistributionTargets {
        fn merge(
            base: &BTreeMap<String, f64>,
            over: &BTreeMap<String, f64>,
        ) -> BTreeMap<String, f64> {
            let mut out = base.clone();
            for (k, v) in over {
                out.insert(k.clone(), *v);
            }
            out
        }
        DistributionTargets {
            entity_kinds: merge(&self.entity_kinds, &overrides.entity_kinds),
            prominence: merge(&self.prominence, &overrides.prominence),
            relationship_kinds: merge(&self.relationship_kinds, &overrides.relationship_kinds),
            connectivity: merge(&self.connectivity, &overrides.connectivity),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entity_kinds.is_empty()
            && self.prominence.is_empty()
            && self.relationship_kinds.is_empty()
            && self.connectivity.is_empty()
    }
}

/// Correction strengths and weight bounds for the reweighting formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_strength")]
    pub entity_kind_strength: f64,
    #[serde(default = "default_strength")]
    pub prominence_strength: f64,
    #[serde(default = "default_strength")]
    pub relationship_strength: f64,
    #[serde(default = "default_strength")]
    pub connectivity_strength: f64,
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,
    #[serde(default = "default_max_weight")]
    pub max_weight: f64,
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,
}

fn default_strength() -> f64 {
    1.0
}

fn default_min_weight() -> f64 {
    0.05
}

fn default_max_weight() -> f64 {
    10.0
}

fn default_convergence_threshold() -> f64 {
    0.08
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            entity_kind_strength: default_strength(),
            prominence_strength: default_strength(),
            relationship_strength: default_strength(),
            connectivity_strength: default_strength(),
            min_weight: default_min_weight(),
            max_weight: default_max_weight(),
            convergence_threshold: default_convergence_threshold(),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Current ratios and their deviations from the resolved targets, taken at a
/// point in time. Serialized as-is into the export's distribution metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionSnapshot {
    pub entity_kind_ratios: BTreeMap<String, f64>,
    pub prominence_ratios: BTreeMap<String, f64>,
    pub relationship_kind_ratios: BTreeMap<String, f64>,
    pub connectivity: ConnectivityMetrics,
    pub entity_kind_deviation: f64,
    pub prominence_deviation: f64,
    pub relationship_deviation: f64,
    pub connectivity_deviation: f64,
    /// Strength-weighted mean of the category deviations.
    pub overall_deviation: f64,
}

/// Mean absolute deviation over the keys the targets name. Categories with
/// no targets contribute 0 and are excluded from the overall weighting.
fn category_deviation(current: &BTreeMap<String, f64>, targets: &BTreeMap<String, f64>) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let sum: f64 = targets
        .iter()
        .map(|(k, t)| (current.get(k).copied().unwrap_or(0.0) - t).abs())
        .sum();
    sum / targets.len() as f64
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Computes snapshots and effective rule weights against resolved targets.
#[derive(Debug, Clone)]
pub struct DistributionTracker {
    config: TrackerConfig,
    global: DistributionTargets,
    clustering: ClusteringConfig,
}

impl DistributionTracker {
    pub fn new(config: TrackerConfig, global: DistributionTargets) -> Self {
        Self {
            config,
            global,
            clustering: ClusteringConfig::default(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Targets in force: global targets with an era's overrides merged in.
    pub fn resolved_targets(&self, era: Option<&DistributionTargets>) -> DistributionTargets {
        match era {
            Some(overrides) => self.global.merged_with(overrides),
            None => self.global.clone(),
        }
    }

    pub fn snapshot(
        &self,
        store: &GraphStore,
        targets: &DistributionTargets,
    ) -> DistributionSnapshot {
        let total_entities = store.entity_count() as f64;
        let mut entity_kind_ratios = BTreeMap::new();
        let mut prominence_ratios = BTreeMap::new();
        if total_entities > 0.0 {
            for entity in store.entities() {
                *entity_kind_ratios.entry(entity.kind.clone()).or_insert(0.0) +=
                    1.0 / total_entities;
                *prominence_ratios
                    .entry(entity.prominence.name().to_string())
                    .or_insert(0.0) += 1.0 / total_entities;
            }
        }

        let total_rels = store.relationship_count() as f64;
        let mut relationship_kind_ratios = BTreeMap::new();
        if total_rels > 0.0 {
            for rel in store.relationships().iter().filter(|r| !r.archived) {
                *relationship_kind_ratios.entry(rel.kind.clone()).or_insert(0.0) +=
                    1.0 / total_rels;
            }
        }

        let conn = connectivity(store, &self.clustering);
        let conn_current: BTreeMap<String, f64> = [
            ("cluster_count".to_string(), conn.cluster_count as f64),
            ("average_cluster_size".to_string(), conn.average_cluster_size),
            ("intra_cluster_density".to_string(), conn.intra_cluster_density),
            ("inter_cluster_density".to_string(), conn.inter_cluster_density),
            ("isolated_ratio".to_string(), conn.isolated_ratio),
        ]
        .into();

        let entity_kind_deviation =
            category_deviation(&entity_kind_ratios, &targets.entity_kinds);
        let prominence_deviation = category_deviation(&prominence_ratios, &targets.prominence);
        let relationship_deviation =
            category_deviation(&relationship_kind_ratios, &targets.relationship_kinds);
        let connectivity_deviation = category_deviation(&conn_current, &targets.connectivity);

        let weighted = [
            (
                entity_kind_deviation,
                self.config.entity_kind_strength,
                !targets.entity_kinds.is_empty(),
            ),
            (
                prominence_deviation,
                self.config.prominence_strength,
                !targets.prominence.is_empty(),
            ),
            (
                relationship_deviation,
                self.config.relationship_strength,
                !targets.relationship_kinds.is_empty(),
            ),
            (
                connectivity_deviation,
                self.config.connectivity_strength,
                !targets.connectivity.is_empty(),
            ),
        ];
        let strength_total: f64 = weighted
            .iter()
            .filter(|(_, _, active)| *active)
            .map(|(_, s, _)| s)
            .sum();
        let overall_deviation = if strength_total > 0.0 {
            weighted
                .iter()
                .filter(|(_, _, active)| *active)
                .map(|(d, s, _)| d * s)
                .sum::<f64>()
                / strength_total
        } else {
            0.0
        };

        DistributionSnapshot {
            entity_kind_ratios,
            prominence_ratios,
            relationship_kind_ratios,
            connectivity: conn,
            entity_kind_deviation,
            prominence_deviation,
            relationship_deviation,
            connectivity_deviation,
            overall_deviation,
        }
    }

    pub fn converged(&self, snapshot: &DistributionSnapshot) -> bool {
        snapshot.overall_deviation < self.config.convergence_threshold
    }

    /// Effective weight of a rule under the current snapshot:
    /// `base × (1 + strength × sign(target − current) × |target − current|)`
    /// over the first targeted key the rule's effects touch, clamped to the
    /// configured bounds. Rules whose effects touch no targeted key keep
    /// their base weight (still clamped).
    pub fn effective_weight(
        &self,
        rule: &RuleDoc,
        base: f64,
        snapshot: &DistributionSnapshot,
        targets: &DistributionTargets,
    ) -> f64 {
        let adjustment = self.correction_for(rule, snapshot, targets);
        (base * (1.0 + adjustment)).clamp(self.config.min_weight, self.config.max_weight)
    }

    fn correction_for(
        &self,
        rule: &RuleDoc,
        snapshot: &DistributionSnapshot,
        targets: &DistributionTargets,
    ) -> f64 {
        // Creation rules steer entity-kind ratios; their first creation spec
        // names the kind the rule grows.
        for creation in &rule.creations {
            if let Some(target) = targets.entity_kinds.get(&creation.kind) {
                let current = snapshot
                    .entity_kind_ratios
                    .get(&creation.kind)
                    .copied()
                    .unwrap_or(0.0);
                return self.config.entity_kind_strength * (target - current);
            }
        }
        // Relationship-forming rules steer relationship-kind ratios.
        let rel_kinds = rule
            .relationships
            .iter()
            .map(|r| r.kind.as_str())
            .chain(rule.mutations.iter().filter_map(|m| match m {
                Mutation::CreateRelationship { kind, .. } => Some(kind.as_str()),
                _ => None,
            }));
        for kind in rel_kinds {
            if let Some(target) = targets.relationship_kinds.get(kind) {
                let current = snapshot
                    .relationship_kind_ratios
                    .get(kind)
                    .copied()
                    .unwrap_or(0.0);
                return self.config.relationship_strength * (target - current);
            }
        }
        // Prominence-shifting rules steer the level distribution: a rule
        // raising prominence is boosted while the upper levels are under
        // target, damped once they overshoot.
        for mutation in &rule.mutations {
            if let Mutation::AdjustProminence { steps, jump, .. } = mutation {
                let rising = jump.is_some() || steps.map(|s| s > 0).unwrap_or(true);
                let signed: f64 = targets
                    .prominence
                    .iter()
                    .filter(|(name, _)| {
                        matches!(name.as_str(), "recognized" | "renowned" | "mythic")
                    })
                    .map(|(name, target)| {
                        target
                            - snapshot
                                .prominence_ratios
                                .get(name)
                                .copied()
                                .unwrap_or(0.0)
                    })
                    .sum();
                if signed != 0.0 {
                    let direction = if rising { 1.0 } else { -1.0 };
                    return self.config.prominence_strength * direction * signed;
                }
            }
        }
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewEntity;
    use crate::testutil::sample_schema;

    fn creation_rule(kind: &str) -> RuleDoc {
        serde_json::from_value(serde_json::json!({
            "id": format!("spawn_{kind}"),
            "name": format!("spawn {kind}"),
            "phase": "growth",
            "creations": [{"kind": kind, "name_prefix": "X"}]
        }))
        .unwrap()
    }

    fn populate(store: &mut GraphStore, kind: &str, n: usize) {
        for i in 0..n {
            store
                .create_entity(
                    NewEntity {
                        kind: kind.into(),
                        name: format!("{kind} {i}"),
                        ..Default::default()
                    },
                    0,
                )
                .unwrap();
        }
    }

    #[test]
    fn era_overrides_merge_per_key() {
        let mut global = DistributionTargets::default();
        global.entity_kinds.insert("npc".into(), 0.6);
        global.entity_kinds.insert("faction".into(), 0.2);
        let mut era = DistributionTargets::default();
        era.entity_kinds.insert("npc".into(), 0.3);

        let merged = global.merged_with(&era);
        assert_eq!(merged.entity_kinds["npc"], 0.3);
        assert_eq!(merged.entity_kinds["faction"], 0.2);
    }

    #[test]
    fn underrepresented_kind_boosts_its_creation_rule() {
        let mut store = GraphStore::new(sample_schema());
        populate(&mut store, "npc", 9);
        populate(&mut store, "faction", 1);

        let mut targets = DistributionTargets::default();
        targets.entity_kinds.insert("npc".into(), 0.5);
        targets.entity_kinds.insert("faction".into(), 0.5);

        let tracker = DistributionTracker::new(TrackerConfig::default(), targets.clone());
        let snapshot = tracker.snapshot(&store, &targets);

        let faction_w =
            tracker.effective_weight(&creation_rule("faction"), 1.0, &snapshot, &targets);
        let npc_w = tracker.effective_weight(&creation_rule("npc"), 1.0, &snapshot, &targets);
        assert!(faction_w > 1.0, "under target should boost: {faction_w}");
        assert!(npc_w < 1.0, "over target should damp: {npc_w}");
    }

    #[test]
    fn untargeted_rule_keeps_base_weight() {
        let store = GraphStore::new(sample_schema());
        let targets = DistributionTargets::default();
        let tracker = DistributionTracker::new(TrackerConfig::default(), targets.clone());
        let snapshot = tracker.snapshot(&store, &targets);
        let w = tracker.effective_weight(&creation_rule("location"), 2.0, &snapshot, &targets);
        assert_eq!(w, 2.0);
    }

    #[test]
    fn weight_clamped_to_bounds() {
        let mut store = GraphStore::new(sample_schema());
        populate(&mut store, "npc", 10);
        let mut targets = DistributionTargets::default();
        targets.entity_kinds.insert("faction".into(), 1.0);
        let config = TrackerConfig {
            entity_kind_strength: 100.0,
            ..Default::default()
        };
        let tracker = DistributionTracker::new(config.clone(), targets.clone());
        let snapshot = tracker.snapshot(&store, &targets);
        let w = tracker.effective_weight(&creation_rule("faction"), 1.0, &snapshot, &targets);
        assert_eq!(w, config.max_weight);
    }

    #[test]
    fn deviation_shrinks_as_ratios_approach_targets() {
        let mut targets = DistributionTargets::default();
        targets.entity_kinds.insert("npc".into(), 0.5);
        targets.entity_kinds.insert("faction".into(), 0.5);
        let tracker = DistributionTracker::new(TrackerConfig::default(), targets.clone());

        let mut skewed = GraphStore::new(sample_schema());
        populate(&mut skewed, "npc", 9);
        populate(&mut skewed, "faction", 1);
        let far = tracker.snapshot(&skewed, &targets);

        let mut balanced = GraphStore::new(sample_schema());
        populate(&mut balanced, "npc", 5);
        populate(&mut balanced, "faction", 5);
        let near = tracker.snapshot(&balanced, &targets);

        assert!(near.overall_deviation < far.overall_deviation);
        assert!(tracker.converged(&near));
        assert!(!tracker.converged(&far));
    }

    #[test]
    fn rule_without_creations_uses_relationship_targets() {
        let mut store = GraphStore::new(sample_schema());
        populate(&mut store, "faction", 4);
        let ids: Vec<_> = store.entities_of_kind("faction").to_vec();
        store
            .create_relationship("ally_of", ids[0], ids[1], 0.5, None, 0)
            .unwrap();

        let mut targets = DistributionTargets::default();
        targets.relationship_kinds.insert("ally_of".into(), 0.2);

        let tracker = DistributionTracker::new(TrackerConfig::default(), targets.clone());
        let snapshot = tracker.snapshot(&store, &targets);

        let rule: RuleDoc = serde_json::from_value(serde_json::json!({
            "id": "forge_alliance",
            "name": "forge alliance",
            "phase": "simulation",
            "relationships": [
                {"kind": "ally_of", "src": "a", "dst": "b"}
            ]
        }))
        .unwrap();
        // current ratio is 1.0, target 0.2 -> damped below base
        let w = tracker.effective_weight(&rule, 1.0, &snapshot, &targets);
        assert!(w < 1.0);
    }
}
