//! Declarative rule documents and the evaluators that execute them.
//!
//! A rule document is data: selection bindings, filters, a condition, creation
//! and relationship specs, pressure updates, an optional contagion spec, and a
//! contract block. Documents are immutable once loaded; only their effective
//! weight and block status change at runtime.
//!
//! Every fragment with a `type`/`strategy` discriminant is a closed
//! serde-tagged enum, so an unknown discriminant is a parse error before the
//! run starts — there is no runtime "unknown case" default anywhere in the
//! interpreter.

pub mod condition;
pub mod filter;
pub mod metric;
pub mod mutation;
pub mod placement;
pub mod selection;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::{Prominence, TagValue};

pub use condition::{CmpOp, Condition};
pub use filter::{FilterOutcome, FilterPredicate};
pub use metric::Metric;
pub use mutation::{Mutation, MutationTally};
pub use placement::{ClusterCriterion, PlacementAnchor};
pub use selection::{PickStrategy, Selection, SelectionBinding, SymbolTable};

// ---------------------------------------------------------------------------
// Rule document
// ---------------------------------------------------------------------------

/// Which phase of a tick a rule fires in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Creation rules: instantiate entities, grow the graph.
    #[default]
    Growth,
    /// Mutation rules: relationship formation, aging, status change, contagion.
    Simulation,
}

/// An entity to instantiate when the rule fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreationSpec {
    /// Binding name for the new entity, so later specs can reference it
    /// (`$settlement` and so on). Multiple-count creations bind all instances.
    #[serde(default)]
    pub bind: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    /// New entities are named `"{name_prefix} {id}"`.
    pub name_prefix: String,
    #[serde(default)]
    pub prominence: Prominence,
    #[serde(default)]
    pub culture: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, TagValue>,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub placement: Option<PlacementAnchor>,
    /// Inline lineage declaration; takes precedence over the contract's.
    #[serde(default)]
    pub lineage: Option<LineageDecl>,
}

fn default_count() -> u32 {
    1
}

/// Declares the relationship recording which entity caused a creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageDecl {
    pub relationship_kind: String,
    /// Variable naming the creating/seed entity.
    pub from: String,
}

/// A relationship to create between two bound entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipSpec {
    pub kind: String,
    pub src: String,
    pub dst: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_strength() -> f64 {
    0.5
}

/// A pressure delta applied when the rule fires (a state-update spec).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressureDelta {
    pub pressure: String,
    pub delta: f64,
}

/// Contagion: spread a tag or status from a bound entity along its
/// relationships, gated by chance scaled with cluster similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContagionSpec {
    /// Variable naming the source of the spread.
    pub from: String,
    #[serde(default)]
    pub relationship_kind: Option<String>,
    /// Tag applied to infected neighbors.
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub tag_value: Option<TagValue>,
    /// Status applied to infected neighbors.
    #[serde(default)]
    pub status: Option<String>,
    /// Base spread probability, scaled by the similarity score.
    pub chance: f64,
    #[serde(default)]
    pub criteria: Vec<ClusterCriterion>,
    #[serde(default = "default_max_spread")]
    pub max_spread: usize,
}

fn default_max_spread() -> usize {
    8
}

// ---------------------------------------------------------------------------
// Contract block
// ---------------------------------------------------------------------------

/// A prerequisite gating rule eligibility (`enabled_by`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Prerequisite {
    EntityCount {
        kind: String,
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        at_least: Option<usize>,
        #[serde(default)]
        at_most: Option<usize>,
    },
    RelationshipExists {
        kind: String,
    },
    Pressure {
        pressure: String,
        op: CmpOp,
        value: f64,
    },
}

/// A per-rule saturation ceiling, checked in addition to the enforcer's
/// kind/subtype registries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaturationLimit {
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    pub ceiling: usize,
    #[serde(default)]
    pub tolerance: f64,
}

/// Declared expected effects, validated (not enforced) after each firing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Affects {
    #[serde(default)]
    pub tags: Option<usize>,
    #[serde(default)]
    pub entities: Option<usize>,
    #[serde(default)]
    pub relationships: Option<usize>,
}

/// A rule document's contract: prerequisites, saturation limits, lineage
/// rule, declared affects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub enabled_by: Vec<Prerequisite>,
    #[serde(default)]
    pub saturation: Vec<SaturationLimit>,
    /// Rule-level lineage, applied to creations without an inline declaration.
    #[serde(default)]
    pub lineage: Option<LineageDecl>,
    #[serde(default)]
    pub affects: Option<Affects>,
}

/// A complete rule document (template or system rule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDoc {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub selections: Vec<SelectionBinding>,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub creations: Vec<CreationSpec>,
    #[serde(default)]
    pub relationships: Vec<RelationshipSpec>,
    #[serde(default)]
    pub mutations: Vec<Mutation>,
    #[serde(default)]
    pub pressure_updates: Vec<PressureDelta>,
    #[serde(default)]
    pub contagion: Option<ContagionSpec>,
    #[serde(default)]
    pub contract: Contract,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Per-era weight overrides, keyed by era id.
    #[serde(default)]
    pub era_weights: BTreeMap<String, f64>,
}

fn default_weight() -> f64 {
    1.0
}

impl RuleDoc {
    /// Base weight for an era: the era override when present, else the
    /// document weight.
    pub fn base_weight(&self, era_id: &str) -> f64 {
        self.era_weights.get(era_id).copied().unwrap_or(self.weight)
    }

    /// The lineage declaration effective for a creation spec: inline wins,
    /// the contract's rule-level declaration is the fallback.
    pub fn lineage_for<'a>(&'a self, creation: &'a CreationSpec) -> Option<&'a LineageDecl> {
        creation.lineage.as_ref().or(self.contract.lineage.as_ref())
    }
}
