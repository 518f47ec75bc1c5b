//! World pressures: named scalar drives clamped to `0..=100`.
//!
//! Each tick a pressure decays by its rate, then grows by its weighted
//! metric factors; rule firings add explicit deltas on top. The scheduler
//! snapshots the values before evaluating rules so conditions and metrics
//! within one tick all read the same state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rules::metric::{Metric, MetricCtx};

pub const PRESSURE_MIN: f64 = 0.0;
pub const PRESSURE_MAX: f64 = 100.0;

/// A metric expression contributing to a pressure each tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowthFactor {
    pub metric: Metric,
    #[serde(default = "default_factor_weight")]
    pub weight: f64,
}

fn default_factor_weight() -> f64 {
    1.0
}

/// Declaration of one pressure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressureDef {
    pub id: String,
    #[serde(default)]
    pub initial: f64,
    /// Fraction of the current value lost per tick, before growth.
    #[serde(default)]
    pub decay: f64,
    #[serde(default)]
    pub growth: Vec<GrowthFactor>,
}

/// The live pressure values of a run.
#[derive(Debug, Clone)]
pub struct PressureSet {
    defs: Vec<PressureDef>,
    values: BTreeMap<String, f64>,
}

impl PressureSet {
    pub fn new(defs: Vec<PressureDef>) -> Self {
        let values = defs
            .iter()
            .map(|d| (d.id.clone(), d.initial.clamp(PRESSURE_MIN, PRESSURE_MAX)))
            .collect();
        Self { defs, values }
    }

    pub fn value(&self, id: &str) -> f64 {
        self.values.get(id).copied().unwrap_or(0.0)
    }

    /// Snapshot for metric/condition contexts.
    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn is_defined(&self, id: &str) -> bool {
        self.values.contains_key(id)
    }

    /// Add a rule-firing delta. Unknown ids are ignored; validation refuses
    /// them before the run, so a miss here cannot happen on a validated
    /// config.
    pub fn apply_delta(&mut self, id: &str, delta: f64) {
        if let Some(v) = self.values.get_mut(id) {
            *v = (*v + delta).clamp(PRESSURE_MIN, PRESSURE_MAX);
        }
    }

    /// Advance all pressures one tick: decay, then weighted metric growth.
    pub fn step(&mut self, ctx: &MetricCtx<'_>) {
        let mut next = self.values.clone();
        for def in &self.defs {
            let current = self.values.get(&def.id).copied().unwrap_or(0.0);
            let mut v = current * (1.0 - def.decay);
            for factor in &def.growth {
                v += factor.weight * factor.metric.eval(ctx);
            }
            next.insert(def.id.clone(), v.clamp(PRESSURE_MIN, PRESSURE_MAX));
        }
        self.values = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphStore, NewEntity};
    use crate::rules::selection::SymbolTable;
    use crate::testutil::sample_schema;

    fn defs() -> Vec<PressureDef> {
        vec![
            PressureDef {
                id: "conflict".into(),
                initial: 50.0,
                decay: 0.1,
                growth: vec![GrowthFactor {
                    metric: Metric::EntityCount {
                        kind: Some("npc".into()),
                        subtype: None,
                        tag: None,
                    },
                    weight: 2.0,
                }],
            },
            PressureDef {
                id: "expansion".into(),
                initial: 120.0,
                decay: 0.0,
                growth: vec![],
            },
        ]
    }

    #[test]
    fn initial_values_clamped() {
        let p = PressureSet::new(defs());
        assert_eq!(p.value("conflict"), 50.0);
        assert_eq!(p.value("expansion"), 100.0);
        assert_eq!(p.value("unknown"), 0.0);
    }

    #[test]
    fn step_decays_then_grows() {
        let mut g = GraphStore::new(sample_schema());
        g.create_entity(
            NewEntity {
                kind: "npc".into(),
                name: "A".into(),
                ..Default::default()
            },
            0,
        )
        .unwrap();
        let mut p = PressureSet::new(defs());
        let bindings = SymbolTable::new();
        let snapshot = p.values().clone();
        let ctx = MetricCtx {
            store: &g,
            pressures: &snapshot,
            bindings: &bindings,
            tick: 1,
        };
        p.step(&ctx);
        // 50 * 0.9 + 2.0 * 1 npc = 47
        assert!((p.value("conflict") - 47.0).abs() < 1e-9);
        assert_eq!(p.value("expansion"), 100.0);
    }

    #[test]
    fn deltas_clamp_at_bounds() {
        let mut p = PressureSet::new(defs());
        p.apply_delta("conflict", 500.0);
        assert_eq!(p.value("conflict"), 100.0);
        p.apply_delta("conflict", -500.0);
        assert_eq!(p.value("conflict"), 0.0);
        // unknown ids are a no-op
        p.apply_delta("ghost", 10.0);
        assert_eq!(p.value("ghost"), 0.0);
    }
}
