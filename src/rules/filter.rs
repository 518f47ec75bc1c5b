//! Filter evaluator: predicate lists narrowing a candidate set.
//!
//! Hard filters are AND-combined — every predicate must pass for a candidate
//! to survive. Prefer filters are soft: when they would eliminate every
//! candidate, selection falls back to the hard-filtered set, and the outcome
//! records which path was taken so tests (and the warning report) can see the
//! fallback rather than inferring it.

use serde::{Deserialize, Serialize};

use crate::graph::{GraphStore, Prominence, TagValue};
use crate::ident::EntityId;
use crate::rules::selection::SymbolTable;

/// A single predicate over one candidate entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterPredicate {
    /// Tag present and truthy; with `value`, tag must equal it exactly.
    HasTag {
        tag: String,
        #[serde(default)]
        value: Option<TagValue>,
    },
    /// Tag absent or falsy.
    LacksTag { tag: String },
    /// A non-archived relationship exists (optionally of `kind`, optionally
    /// with the entity bound under `with`).
    HasRelationship {
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        with: Option<String>,
    },
    /// Negation of `has_relationship`.
    LacksRelationship {
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        with: Option<String>,
    },
    /// Prominence within the given bounds (either side optional).
    HasProminence {
        #[serde(default)]
        at_least: Option<Prominence>,
        #[serde(default)]
        at_most: Option<Prominence>,
    },
    HasStatus { status: String },
    /// Candidate's culture equals the bound entity's culture.
    SameCulture { as_var: String },
    /// Candidate and the bound entity share at least one related entity.
    SharesRelated {
        with: String,
        #[serde(default)]
        kind: Option<String>,
    },
    /// A path of at most `max_hops` relationship hops exists from the
    /// candidate to the entity bound under `to`.
    GraphPath {
        to: String,
        #[serde(default)]
        kind: Option<String>,
        #[serde(default = "default_max_hops")]
        max_hops: usize,
    },
}

fn default_max_hops() -> usize {
    3
}

impl FilterPredicate {
    /// Evaluate this predicate for one candidate. Predicates referencing an
    /// unbound variable fail the candidate (fail-open at the selection level:
    /// the firing skips, nothing raises).
    pub fn passes(&self, candidate: EntityId, store: &GraphStore, bindings: &SymbolTable) -> bool {
        let Some(entity) = store.entity(candidate) else {
            return false;
        };
        match self {
            FilterPredicate::HasTag { tag, value } => match entity.tags.get(tag) {
                None => false,
                Some(v) => match value {
                    Some(expected) => v == expected,
                    None => v.is_truthy(),
                },
            },
            FilterPredicate::LacksTag { tag } => {
                !entity.tags.get(tag).is_some_and(|v| v.is_truthy())
            }
            FilterPredicate::HasRelationship { kind, with } => {
                has_relationship(candidate, kind.as_deref(), with.as_deref(), store, bindings)
            }
            FilterPredicate::LacksRelationship { kind, with } => {
                !has_relationship(candidate, kind.as_deref(), with.as_deref(), store, bindings)
            }
            FilterPredicate::HasProminence { at_least, at_most } => {
                at_least.is_none_or(|min| entity.prominence >= min)
                    && at_most.is_none_or(|max| entity.prominence <= max)
            }
            FilterPredicate::HasStatus { status } => entity.status == *status,
            FilterPredicate::SameCulture { as_var } => {
                let Some(other) = bindings.first(as_var).and_then(|id| store.entity(id)) else {
                    return false;
                };
                entity.culture.is_some() && entity.culture == other.culture
            }
            FilterPredicate::SharesRelated { with, kind } => {
                let Some(other) = bindings.first(with) else {
                    return false;
                };
                let mine = store.related_entities(candidate, kind.as_deref());
                let theirs = store.related_entities(other, kind.as_deref());
                mine.iter().any(|id| theirs.contains(id))
            }
            FilterPredicate::GraphPath { to, kind, max_hops } => {
                let Some(target) = bindings.first(to) else {
                    return false;
                };
                store
                    .reachable_within(candidate, *max_hops, kind.as_deref())
                    .contains(&target)
            }
        }
    }
}

fn has_relationship(
    candidate: EntityId,
    kind: Option<&str>,
    with: Option<&str>,
    store: &GraphStore,
    bindings: &SymbolTable,
) -> bool {
    match with {
        Some(var) => match bindings.first(var) {
            Some(other) => store.are_related(candidate, other, kind),
            None => false,
        },
        None => store
            .relationships_of(candidate)
            .iter()
            .any(|r| kind.is_none_or(|k| r.kind == k)),
    }
}

/// Which path the prefer-filter step took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Prefer filters kept at least one candidate (or there were none).
    Strict,
    /// Prefer filters eliminated everything; fell back to the hard-filtered set.
    Relaxed,
}

/// Apply hard filters (AND), then prefer filters with fallback.
pub fn apply(
    candidates: Vec<EntityId>,
    hard: &[FilterPredicate],
    prefer: &[FilterPredicate],
    store: &GraphStore,
    bindings: &SymbolTable,
) -> (Vec<EntityId>, FilterOutcome) {
    let surviving: Vec<EntityId> = candidates
        .into_iter()
        .filter(|id| hard.iter().all(|p| p.passes(*id, store, bindings)))
        .collect();

    if prefer.is_empty() || surviving.is_empty() {
        return (surviving, FilterOutcome::Strict);
    }

    let preferred: Vec<EntityId> = surviving
        .iter()
        .copied()
        .filter(|id| prefer.iter().all(|p| p.passes(*id, store, bindings)))
        .collect();

    if preferred.is_empty() {
        (surviving, FilterOutcome::Relaxed)
    } else {
        (preferred, FilterOutcome::Strict)
    }
}
