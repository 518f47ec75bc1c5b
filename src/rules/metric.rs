//! Metric evaluator: numeric functions over the graph and pressures.
//!
//! Metrics are pure reads — they never mutate the graph. They appear inside
//! conditions (compared against a threshold) and inside pressure growth
//! factors (weighted and summed each tick).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::GraphStore;
use crate::rules::selection::SymbolTable;

/// Read-only context a metric is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct MetricCtx<'a> {
    pub store: &'a GraphStore,
    /// Pressure values snapshotted at the start of the evaluation.
    pub pressures: &'a BTreeMap<String, f64>,
    pub bindings: &'a SymbolTable,
    pub tick: u64,
}

/// A numeric function over the current graph state.
///
/// Missing references (an unbound variable, an unknown pressure) evaluate to
/// 0.0 — the validation pass rejects them up front, so a miss here can only
/// come from an optional binding that did not resolve this firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Metric {
    /// Number of entities, optionally restricted by kind, subtype, and tag.
    EntityCount {
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        tag: Option<String>,
    },
    /// Number of non-archived relationships, optionally restricted by kind.
    RelationshipCount {
        #[serde(default)]
        kind: Option<String>,
    },
    /// Entities of `kind` over all entities (0 when the graph is empty).
    EntityRatio { kind: String },
    /// Non-archived relationships of `kind` over all non-archived ones.
    RelationshipRatio { kind: String },
    /// Generic quotient of two metrics; 0 when the denominator is 0.
    Ratio {
        numerator: Box<Metric>,
        denominator: Box<Metric>,
    },
    /// `scale^level` for the prominence level of a bound entity
    /// (forgotten = scale^0 = 1, mythic = scale^4).
    ProminenceMultiplier {
        of: String,
        #[serde(default = "default_scale")]
        scale: f64,
    },
    /// Current value of a pressure.
    PressureValue { pressure: String },
    /// `initial * (1 - rate)^tick`: exponential decay over world age.
    DecayRate { initial: f64, rate: f64 },
    /// Linear spatial falloff between two bound, placed entities:
    /// `initial * max(0, 1 - distance/radius)`. 0 if either lacks placement.
    Falloff {
        initial: f64,
        radius: f64,
        from: String,
        to: String,
    },
    /// A literal.
    Constant { value: f64 },
}

fn default_scale() -> f64 {
    1.5
}

impl Metric {
    pub fn eval(&self, ctx: &MetricCtx<'_>) -> f64 {
        match self {
            Metric::EntityCount { kind, subtype, tag } => {
                let matches = |e: &crate::graph::Entity| {
                    kind.as_deref().is_none_or(|k| e.kind == k)
                        && subtype.as_deref().is_none_or(|s| e.subtype.as_deref() == Some(s))
                        && tag
                            .as_deref()
                            .is_none_or(|t| e.tags.get(t).is_some_and(|v| v.is_truthy()))
                };
                ctx.store.entities().iter().filter(|e| matches(e)).count() as f64
            }
            Metric::RelationshipCount { kind } => ctx
                .store
                .relationships()
                .iter()
                .filter(|r| !r.archived && kind.as_deref().is_none_or(|k| r.kind == k))
                .count() as f64,
            Metric::EntityRatio { kind } => {
                let total = ctx.store.entity_count();
                if total == 0 {
                    return 0.0;
                }
                ctx.store.entities_of_kind(kind).len() as f64 / total as f64
            }
            Metric::RelationshipRatio { kind } => {
                let total = ctx.store.relationship_count();
                if total == 0 {
                    return 0.0;
                }
                let of_kind = ctx
                    .store
                    .relationships()
                    .iter()
                    .filter(|r| !r.archived && r.kind == *kind)
                    .count();
                of_kind as f64 / total as f64
            }
            Metric::Ratio {
                numerator,
                denominator,
            } => {
                let d = denominator.eval(ctx);
                if d == 0.0 { 0.0 } else { numerator.eval(ctx) / d }
            }
            Metric::ProminenceMultiplier { of, scale } => {
                let Some(id) = ctx.bindings.first(of) else {
                    return 0.0;
                };
                let Some(entity) = ctx.store.entity(id) else {
                    return 0.0;
                };
                scale.powi(entity.prominence.index() as i32)
            }
            Metric::PressureValue { pressure } => {
                ctx.pressures.get(pressure).copied().unwrap_or(0.0)
            }
            Metric::DecayRate { initial, rate } => {
                initial * (1.0 - rate).powi(ctx.tick.min(i32::MAX as u64) as i32)
            }
            Metric::Falloff {
                initial,
                radius,
                from,
                to,
            } => {
                let place = |var: &str| {
                    ctx.bindings
                        .first(var)
                        .and_then(|id| ctx.store.entity(id))
                        .and_then(|e| e.placement)
                };
                let (Some(a), Some(b)) = (place(from), place(to)) else {
                    return 0.0;
                };
                if *radius <= 0.0 {
                    return 0.0;
                }
                let d = ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2))
                    .sqrt();
                initial * (1.0 - d / radius).max(0.0)
            }
            Metric::Constant { value } => *value,
        }
    }
}
