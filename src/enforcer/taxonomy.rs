//! Tag-taxonomy analyzer.
//!
//! Audits observed tag usage against the registry: usage bounds, rarity
//! tiers, conflicts that slipped through, and the Shannon entropy/evenness of
//! the usage histogram. Evenness is entropy normalized by `ln(k)`, so a
//! uniform histogram scores 1.0 and a heavily skewed one approaches 0.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::GraphStore;
use crate::schema::RarityTier;

/// Observed usage of one tag, with registry comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagUsage {
    pub tag: String,
    /// Entities carrying the tag with a truthy value.
    pub count: usize,
    pub observed_rarity: RarityTier,
    pub expected_rarity: Option<RarityTier>,
    /// Registered with `min_usage` and used less (or declared and never used).
    pub orphaned: bool,
    /// Registered with `max_usage` and used more.
    pub overused: bool,
    /// Used on at least one entity but absent from the registry.
    pub unregistered: bool,
}

/// Full taxonomy report for one run, serialized into the export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyReport {
    pub tags: Vec<TagUsage>,
    /// Shannon entropy of the usage histogram, in nats.
    pub entropy: f64,
    /// Entropy over `ln(k)`; 1.0 for a uniform histogram, 0 for a single tag.
    pub evenness: f64,
    /// Conflicting tag pairs observed co-existing on one entity. The store
    /// rejects these at mutation time, so anything here is a real defect.
    pub conflicts: Vec<(String, String)>,
}

/// Observed rarity tier by share of the entity population carrying the tag.
fn observed_tier(count: usize, total_entities: usize) -> RarityTier {
    if count <= 1 {
        return RarityTier::Unique;
    }
    if total_entities == 0 {
        return RarityTier::Rare;
    }
    let share = count as f64 / total_entities as f64;
    if share >= 0.25 {
        RarityTier::Common
    } else if share >= 0.08 {
        RarityTier::Uncommon
    } else {
        RarityTier::Rare
    }
}

/// Shannon entropy (nats) and evenness of a usage histogram.
pub fn entropy_evenness(counts: &[usize]) -> (f64, f64) {
    let used: Vec<f64> = counts.iter().filter(|c| **c > 0).map(|c| *c as f64).collect();
    let k = used.len();
    if k == 0 {
        return (0.0, 0.0);
    }
    let total: f64 = used.iter().sum();
    let entropy = -used
        .iter()
        .map(|c| {
            let p = c / total;
            p * p.ln()
        })
        .sum::<f64>();
    let evenness = if k > 1 { entropy / (k as f64).ln() } else { 0.0 };
    (entropy, evenness)
}

/// Analyze tag usage across the store against its schema's registry.
pub fn analyze_taxonomy(store: &GraphStore) -> TaxonomyReport {
    let schema = store.schema();
    let total_entities = store.entity_count();

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for def in &schema.tags {
        counts.insert(def.name.clone(), 0);
    }
    let mut conflicts: Vec<(String, String)> = Vec::new();
    for entity in store.entities() {
        let truthy: Vec<&String> = entity
            .tags
            .iter()
            .filter(|(_, v)| v.is_truthy())
            .map(|(k, _)| k)
            .collect();
        for tag in &truthy {
            *counts.entry((*tag).clone()).or_insert(0) += 1;
        }
        for (i, a) in truthy.iter().enumerate() {
            for b in truthy.iter().skip(i + 1) {
                if schema.tags_conflict(a, b) {
                    let pair = ((*a).clone(), (*b).clone());
                    if !conflicts.contains(&pair) {
                        conflicts.push(pair);
                    }
                }
            }
        }
    }

    let registry = schema.tag_index();
    let tags: Vec<TagUsage> = counts
        .iter()
        .map(|(tag, &count)| {
            let def = registry.get(tag.as_str());
            let orphaned = def.is_some_and(|d| {
                d.min_usage.is_some_and(|min| count < min) || (d.min_usage.is_none() && count == 0)
            });
            let overused = def.is_some_and(|d| d.max_usage.is_some_and(|max| count > max));
            TagUsage {
                tag: tag.clone(),
                count,
                observed_rarity: observed_tier(count, total_entities),
                expected_rarity: def.and_then(|d| d.expected_rarity),
                orphaned,
                overused,
                unregistered: def.is_none(),
            }
        })
        .collect();

    let histogram: Vec<usize> = counts.values().copied().collect();
    let (entropy, evenness) = entropy_evenness(&histogram);

    TaxonomyReport {
        tags,
        entropy,
        evenness,
        conflicts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NewEntity, TagValue};
    use crate::testutil::sample_schema;

    fn tagged_store(spread: &[(&str, usize)]) -> GraphStore {
        let mut g = GraphStore::new(sample_schema());
        let mut n = 0;
        for (tag, count) in spread {
            for _ in 0..*count {
                let id = g
                    .create_entity(
                        NewEntity {
                            kind: "npc".into(),
                            name: format!("npc {n}"),
                            ..Default::default()
                        },
                        0,
                    )
                    .unwrap();
                g.set_tag(id, tag, TagValue::Bool(true), 0).unwrap();
                n += 1;
            }
        }
        g
    }

    #[test]
    fn uniform_histogram_evenness_is_one() {
        let counts: Vec<usize> = vec![7; 10];
        let (_, evenness) = entropy_evenness(&counts);
        assert!((evenness - 1.0).abs() < 1e-6);
    }

    #[test]
    fn skewed_histogram_evenness_is_low() {
        // one dominant tag at 100x the rest
        let mut counts = vec![1; 9];
        counts.push(900);
        let (_, evenness) = entropy_evenness(&counts);
        assert!(evenness < 0.3, "evenness was {evenness}");
    }

    #[test]
    fn empty_and_single_tag_edge_cases() {
        assert_eq!(entropy_evenness(&[]), (0.0, 0.0));
        let (entropy, evenness) = entropy_evenness(&[42]);
        assert_eq!(entropy, 0.0);
        assert_eq!(evenness, 0.0);
    }

    #[test]
    fn usage_bounds_flagged() {
        // orthodox has min_usage 2, cursed max_usage 3
        let g = tagged_store(&[("orthodox", 1), ("cursed", 4)]);
        let report = analyze_taxonomy(&g);
        let by_name = |name: &str| report.tags.iter().find(|t| t.tag == name).unwrap();
        assert!(by_name("orthodox").orphaned);
        assert!(by_name("cursed").overused);
        assert!(!by_name("cursed").orphaned);
        // declared but unused tag is an orphan
        assert!(by_name("heretic").orphaned);
    }

    #[test]
    fn unregistered_tags_reported() {
        let mut g = tagged_store(&[("cursed", 1)]);
        let id = g.entities()[0].id;
        g.set_tag(id, "improvised", TagValue::Bool(true), 0).unwrap();
        let report = analyze_taxonomy(&g);
        let improvised = report.tags.iter().find(|t| t.tag == "improvised").unwrap();
        assert!(improvised.unregistered);
    }

    #[test]
    fn observed_rarity_tiers() {
        let g = tagged_store(&[("cursed", 1), ("orthodox", 3)]);
        let report = analyze_taxonomy(&g);
        let cursed = report.tags.iter().find(|t| t.tag == "cursed").unwrap();
        assert_eq!(cursed.observed_rarity, RarityTier::Unique);
        let orthodox = report.tags.iter().find(|t| t.tag == "orthodox").unwrap();
        // 3 of 4 entities
        assert_eq!(orthodox.observed_rarity, RarityTier::Common);
    }
}
