//! Spatial placement anchors and cluster-similarity criteria.
//!
//! Placement positions new entities relative to existing graph structure;
//! similarity scores feed both clustering analytics and contagion spread.

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::graph::GraphStore;
use crate::ident::EntityId;
use crate::rules::selection::SymbolTable;

/// Default world bounds for anchors that need a box to sample in.
pub const WORLD_BOUNDS: [f64; 3] = [1000.0, 1000.0, 0.0];

/// Where a newly created entity is placed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlacementAnchor {
    /// Near the first entity bound to `var`, offset by up to `jitter` on each
    /// axis. No placement if the anchor entity has none.
    Entity {
        var: String,
        #[serde(default = "default_jitter")]
        jitter: f64,
    },
    /// At the centroid of all placed entities sharing `culture`, jittered.
    /// Falls back to a uniform draw when no placed member exists.
    Culture {
        culture: String,
        #[serde(default = "default_jitter")]
        jitter: f64,
    },
    /// At the centroid of the entities bound to the listed variables,
    /// jittered. No placement if none of them are placed.
    RefsCentroid {
        vars: Vec<String>,
        #[serde(default = "default_jitter")]
        jitter: f64,
    },
    /// Uniform draw inside an axis-aligned box.
    Bounds { min: [f64; 3], max: [f64; 3] },
    /// The candidate (out of `attempts` uniform draws over the world bounds)
    /// farthest from its nearest placed entity.
    Sparse {
        #[serde(default = "default_attempts")]
        attempts: u32,
    },
}

fn default_jitter() -> f64 {
    25.0
}

fn default_attempts() -> u32 {
    8
}

impl PlacementAnchor {
    pub fn resolve(
        &self,
        store: &GraphStore,
        bindings: &SymbolTable,
        rng: &mut StdRng,
    ) -> Option<[f64; 3]> {
        match self {
            PlacementAnchor::Entity { var, jitter } => {
                let anchor = bindings
                    .first(var)
                    .and_then(|id| store.entity(id))
                    .and_then(|e| e.placement)?;
                Some(jittered(anchor, *jitter, rng))
            }
            PlacementAnchor::Culture { culture, jitter } => {
                let members: Vec<[f64; 3]> = store
                    .entities()
                    .iter()
                    .filter(|e| e.culture.as_deref() == Some(culture))
                    .filter_map(|e| e.placement)
                    .collect();
                match centroid(&members) {
                    Some(c) => Some(jittered(c, *jitter, rng)),
                    None => Some(uniform(WORLD_BOUNDS, rng)),
                }
            }
            PlacementAnchor::RefsCentroid { vars, jitter } => {
                let placed: Vec<[f64; 3]> = vars
                    .iter()
                    .filter_map(|v| bindings.first(v))
                    .filter_map(|id| store.entity(id))
                    .filter_map(|e| e.placement)
                    .collect();
                centroid(&placed).map(|c| jittered(c, *jitter, rng))
            }
            PlacementAnchor::Bounds { min, max } => {
                let mut p = [0.0; 3];
                for axis in 0..3 {
                    let (lo, hi) = (min[axis].min(max[axis]), min[axis].max(max[axis]));
                    p[axis] = if lo == hi { lo } else { rng.gen_range(lo..hi) };
                }
                Some(p)
            }
            PlacementAnchor::Sparse { attempts } => {
                let placed: Vec<[f64; 3]> =
                    store.entities().iter().filter_map(|e| e.placement).collect();
                let mut best = uniform(WORLD_BOUNDS, rng);
                if placed.is_empty() {
                    return Some(best);
                }
                let mut best_dist = nearest_distance(best, &placed);
                for _ in 1..*attempts {
                    let candidate = uniform(WORLD_BOUNDS, rng);
                    let d = nearest_distance(candidate, &placed);
                    if d > best_dist {
                        best = candidate;
                        best_dist = d;
                    }
                }
                Some(best)
            }
        }
    }
}

fn jittered(center: [f64; 3], jitter: f64, rng: &mut StdRng) -> [f64; 3] {
    if jitter <= 0.0 {
        return center;
    }
    let mut p = center;
    for axis in 0..3 {
        // the z axis stays flat for 2D worlds
        if axis == 2 && center[2] == 0.0 {
            continue;
        }
        p[axis] += rng.gen_range(-jitter..jitter);
    }
    p
}

fn uniform(bounds: [f64; 3], rng: &mut StdRng) -> [f64; 3] {
    let mut p = [0.0; 3];
    for axis in 0..3 {
        p[axis] = if bounds[axis] == 0.0 {
            0.0
        } else {
            rng.gen_range(0.0..bounds[axis])
        };
    }
    p
}

fn centroid(points: &[[f64; 3]]) -> Option<[f64; 3]> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let mut c = [0.0; 3];
    for p in points {
        for axis in 0..3 {
            c[axis] += p[axis] / n;
        }
    }
    Some(c)
}

fn nearest_distance(point: [f64; 3], placed: &[[f64; 3]]) -> f64 {
    placed
        .iter()
        .map(|p| distance(point, *p))
        .fold(f64::INFINITY, f64::min)
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

// ---------------------------------------------------------------------------
// Cluster similarity
// ---------------------------------------------------------------------------

/// One weighted component of a pairwise similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterCriterion {
    /// 1.0 when the pair shares at least one related entity.
    SharedRelationship {
        #[serde(default)]
        kind: Option<String>,
        #[serde(default = "default_criterion_weight")]
        weight: f64,
    },
    /// Jaccard index over the pair's truthy tag sets.
    SharedTags {
        #[serde(default = "default_criterion_weight")]
        weight: f64,
    },
    /// 1.0 when created in the same tick, falling linearly to 0 at `window`
    /// ticks apart.
    TemporalProximity {
        #[serde(default = "default_window")]
        window: u64,
        #[serde(default = "default_criterion_weight")]
        weight: f64,
    },
    /// 1.0 when both carry the same culture.
    SameCulture {
        #[serde(default = "default_criterion_weight")]
        weight: f64,
    },
}

fn default_criterion_weight() -> f64 {
    1.0
}

fn default_window() -> u64 {
    10
}

impl ClusterCriterion {
    fn weight(&self) -> f64 {
        match self {
            ClusterCriterion::SharedRelationship { weight, .. }
            | ClusterCriterion::SharedTags { weight }
            | ClusterCriterion::TemporalProximity { weight, .. }
            | ClusterCriterion::SameCulture { weight } => *weight,
        }
    }

    fn score(&self, a: EntityId, b: EntityId, store: &GraphStore) -> f64 {
        let (Some(ea), Some(eb)) = (store.entity(a), store.entity(b)) else {
            return 0.0;
        };
        match self {
            ClusterCriterion::SharedRelationship { kind, .. } => {
                let mine = store.related_entities(a, kind.as_deref());
                let theirs = store.related_entities(b, kind.as_deref());
                if mine.iter().any(|id| *id != b && theirs.contains(id)) {
                    1.0
                } else {
                    0.0
                }
            }
            ClusterCriterion::SharedTags { .. } => {
                let mine: Vec<&String> = ea
                    .tags
                    .iter()
                    .filter(|(_, v)| v.is_truthy())
                    .map(|(k, _)| k)
                    .collect();
                let theirs: Vec<&String> = eb
                    .tags
                    .iter()
                    .filter(|(_, v)| v.is_truthy())
                    .map(|(k, _)| k)
                    .collect();
                let shared = mine.iter().filter(|t| theirs.contains(t)).count();
                let union = mine.len() + theirs.len() - shared;
                if union == 0 {
                    0.0
                } else {
                    shared as f64 / union as f64
                }
            }
            ClusterCriterion::TemporalProximity { window, .. } => {
                if *window == 0 {
                    return 0.0;
                }
                let gap = ea.created_at_tick.abs_diff(eb.created_at_tick);
                (1.0 - gap as f64 / *window as f64).max(0.0)
            }
            ClusterCriterion::SameCulture { .. } => {
                if ea.culture.is_some() && ea.culture == eb.culture {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Weighted similarity of a pair in `[0, 1]`. Empty criteria score 1.0 so an
/// unadorned contagion spec spreads at its base chance.
pub fn similarity(
    a: EntityId,
    b: EntityId,
    criteria: &[ClusterCriterion],
    store: &GraphStore,
) -> f64 {
    let total: f64 = criteria.iter().map(ClusterCriterion::weight).sum();
    if criteria.is_empty() || total <= 0.0 {
        return 1.0;
    }
    criteria
        .iter()
        .map(|c| c.weight() * c.score(a, b, store))
        .sum::<f64>()
        / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    use crate::graph::{NewEntity, TagValue};
    use crate::testutil::sample_schema;

    fn npc(store: &mut GraphStore, name: &str, tick: u64) -> EntityId {
        store
            .create_entity(
                NewEntity {
                    kind: "npc".into(),
                    name: name.into(),
                    ..Default::default()
                },
                tick,
            )
            .unwrap()
    }

    #[test]
    fn entity_anchor_jitters_around_source() {
        let mut g = GraphStore::new(sample_schema());
        let a = npc(&mut g, "A", 0);
        g.set_placement(a, [100.0, 100.0, 0.0], 0).unwrap();
        let mut b = SymbolTable::new();
        b.bind("anchor", vec![a]);
        let mut rng = StdRng::seed_from_u64(7);

        let anchor = PlacementAnchor::Entity {
            var: "anchor".into(),
            jitter: 10.0,
        };
        let p = anchor.resolve(&g, &b, &mut rng).unwrap();
        assert!((p[0] - 100.0).abs() < 10.0);
        assert!((p[1] - 100.0).abs() < 10.0);
        assert_eq!(p[2], 0.0);

        // unplaced anchor yields no placement
        let c = npc(&mut g, "C", 0);
        b.bind("anchor", vec![c]);
        assert!(anchor.resolve(&g, &b, &mut rng).is_none());
    }

    #[test]
    fn refs_centroid_averages_placed_refs() {
        let mut g = GraphStore::new(sample_schema());
        let a = npc(&mut g, "A", 0);
        let b_id = npc(&mut g, "B", 0);
        g.set_placement(a, [0.0, 0.0, 0.0], 0).unwrap();
        g.set_placement(b_id, [10.0, 20.0, 0.0], 0).unwrap();
        let mut b = SymbolTable::new();
        b.bind("x", vec![a]);
        b.bind("y", vec![b_id]);
        let mut rng = StdRng::seed_from_u64(7);

        let anchor = PlacementAnchor::RefsCentroid {
            vars: vec!["x".into(), "y".into()],
            jitter: 0.0,
        };
        let p = anchor.resolve(&g, &b, &mut rng).unwrap();
        assert_eq!(p, [5.0, 10.0, 0.0]);
    }

    #[test]
    fn bounds_draw_stays_inside() {
        let g = GraphStore::new(sample_schema());
        let b = SymbolTable::new();
        let mut rng = StdRng::seed_from_u64(7);
        let anchor = PlacementAnchor::Bounds {
            min: [10.0, 10.0, 0.0],
            max: [20.0, 20.0, 0.0],
        };
        for _ in 0..20 {
            let p = anchor.resolve(&g, &b, &mut rng).unwrap();
            assert!((10.0..20.0).contains(&p[0]));
            assert!((10.0..20.0).contains(&p[1]));
            assert_eq!(p[2], 0.0);
        }
    }

    #[test]
    fn sparse_prefers_empty_space() {
        let mut g = GraphStore::new(sample_schema());
        let a = npc(&mut g, "A", 0);
        g.set_placement(a, [500.0, 500.0, 0.0], 0).unwrap();
        let b = SymbolTable::new();
        let mut rng = StdRng::seed_from_u64(7);
        let anchor = PlacementAnchor::Sparse { attempts: 16 };
        let p = anchor.resolve(&g, &b, &mut rng).unwrap();
        // far enough from the single occupied point that one uniform draw
        // would rarely be this distant by chance under this seed
        assert!(distance(p, [500.0, 500.0, 0.0]) > 100.0);
    }

    #[test]
    fn similarity_weighted_components() {
        let mut g = GraphStore::new(sample_schema());
        let a = npc(&mut g, "A", 0);
        let b = npc(&mut g, "B", 0);
        g.set_tag(a, "cursed", TagValue::Bool(true), 0).unwrap();
        g.set_tag(b, "cursed", TagValue::Bool(true), 0).unwrap();

        let criteria = vec![
            ClusterCriterion::SharedTags { weight: 1.0 },
            ClusterCriterion::SameCulture { weight: 1.0 },
        ];
        // identical tag sets (1.0), no culture (0.0) -> 0.5
        assert!((similarity(a, b, &criteria, &g) - 0.5).abs() < 1e-9);

        // empty criteria default to full similarity
        assert_eq!(similarity(a, b, &[], &g), 1.0);
    }

    #[test]
    fn temporal_proximity_window() {
        let mut g = GraphStore::new(sample_schema());
        let a = npc(&mut g, "A", 0);
        let b = npc(&mut g, "B", 5);
        let c = ClusterCriterion::TemporalProximity {
            window: 10,
            weight: 1.0,
        };
        assert!((similarity(a, b, &[c.clone()], &g) - 0.5).abs() < 1e-9);
        let far = npc(&mut g, "C", 30);
        assert_eq!(similarity(a, far, &[c], &g), 0.0);
    }
}
