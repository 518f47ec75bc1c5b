//! Selection resolver: turns a selection spec into bound entities.
//!
//! Each rule firing gets a fresh [`SymbolTable`]; selection bindings resolve
//! in document order, so later bindings can reference earlier ones
//! (`by_relationship` from `$actor`, proximity to `$origin`, and so on).
//! Entities in a terminal status are excluded from every strategy unless the
//! spec opts in — dead npcs do not found settlements.

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::graph::{GraphStore, Prominence};
use crate::ident::EntityId;
use crate::rules::filter::FilterPredicate;

// ---------------------------------------------------------------------------
// Symbol table
// ---------------------------------------------------------------------------

/// Per-firing variable bindings (`$actor`, `$target`, ...).
///
/// A binding holds one or more entities: `pick: all` binds the whole
/// candidate set, everything else binds `count` entities.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    bindings: std::collections::BTreeMap<String, Vec<EntityId>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, ids: Vec<EntityId>) {
        self.bindings.insert(name.into(), ids);
    }

    pub fn get(&self, name: &str) -> Option<&[EntityId]> {
        self.bindings.get(name).map(Vec::as_slice)
    }

    /// First entity bound under `name`, if any.
    pub fn first(&self, name: &str) -> Option<EntityId> {
        self.bindings.get(name).and_then(|v| v.first().copied())
    }

    /// First entity bound under `name`, or an unbound-variable error.
    pub fn require_first(&self, name: &str) -> Result<EntityId, RuleError> {
        self.first(name).ok_or_else(|| RuleError::UnboundVariable {
            var: name.to_string(),
        })
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
}

// ---------------------------------------------------------------------------
// Selection strategies
// ---------------------------------------------------------------------------

/// How a candidate set is resolved from the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Selection {
    /// All entities of a kind (optionally one subtype).
    ByKind {
        kind: String,
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        include_terminal: bool,
    },
    /// First kind in the list that yields any candidates.
    ByPreferenceOrder { kinds: Vec<String> },
    /// Entities related to an already-bound variable.
    ByRelationship {
        from: String,
        #[serde(default)]
        kind: Option<String>,
    },
    /// Placed entities within `radius` of an already-bound, placed variable.
    ByProximity { to: String, radius: f64 },
    /// Entities at or above a prominence level, optionally one kind.
    ByProminence {
        #[serde(default)]
        kind: Option<String>,
        at_least: Prominence,
    },
}

/// How the filtered candidate set is reduced to the bound entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PickStrategy {
    /// Uniform without replacement.
    #[default]
    Random,
    /// Deterministic head of the candidate list (creation order).
    First,
    /// Bind the entire candidate set, ignoring `count`.
    All,
    /// Without replacement, weighted by prominence (level + 1).
    Weighted,
}

/// One named selection in a rule document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionBinding {
    pub name: String,
    pub select: Selection,
    #[serde(default)]
    pub filters: Vec<FilterPredicate>,
    /// Soft filters: if they eliminate everything, selection falls back to
    /// the hard-filtered set instead of failing.
    #[serde(default)]
    pub prefer: Vec<FilterPredicate>,
    #[serde(default = "default_bind_count")]
    pub count: usize,
    #[serde(default)]
    pub pick: PickStrategy,
    /// Optional bindings leave the variable unbound instead of aborting the
    /// firing when no candidate survives.
    #[serde(default)]
    pub optional: bool,
}

fn default_bind_count() -> usize {
    1
}

impl Selection {
    /// Resolve the raw candidate set, before filters.
    pub fn candidates(&self, store: &GraphStore, bindings: &SymbolTable) -> Vec<EntityId> {
        match self {
            Selection::ByKind {
                kind,
                subtype,
                include_terminal,
            } => store
                .entities_of_kind(kind)
                .iter()
                .copied()
                .filter(|id| {
                    let Some(e) = store.entity(*id) else {
                        return false;
                    };
                    let sub_ok = subtype.as_deref().is_none_or(|s| e.subtype.as_deref() == Some(s));
                    sub_ok && (*include_terminal || is_active(store, *id))
                })
                .collect(),
            Selection::ByPreferenceOrder { kinds } => {
                for kind in kinds {
                    let found: Vec<EntityId> = store
                        .entities_of_kind(kind)
                        .iter()
                        .copied()
                        .filter(|id| is_active(store, *id))
                        .collect();
                    if !found.is_empty() {
                        return found;
                    }
                }
                Vec::new()
            }
            Selection::ByRelationship { from, kind } => {
                let Some(anchor) = bindings.first(from) else {
                    return Vec::new();
                };
                store
                    .related_entities(anchor, kind.as_deref())
                    .into_iter()
                    .filter(|id| is_active(store, *id))
                    .collect()
            }
            Selection::ByProximity { to, radius } => {
                let anchor_place = bindings
                    .first(to)
                    .and_then(|id| store.entity(id))
                    .and_then(|e| e.placement);
                let Some(origin) = anchor_place else {
                    return Vec::new();
                };
                let anchor = bindings.first(to);
                store
                    .entities()
                    .iter()
                    .filter(|e| Some(e.id) != anchor && is_active(store, e.id))
                    .filter(|e| {
                        e.placement.is_some_and(|p| distance(p, origin) <= *radius)
                    })
                    .map(|e| e.id)
                    .collect()
            }
            Selection::ByProminence { kind, at_least } => store
                .entities()
                .iter()
                .filter(|e| {
                    kind.as_deref().is_none_or(|k| e.kind == k)
                        && e.prominence >= *at_least
                        && is_active(store, e.id)
                })
                .map(|e| e.id)
                .collect(),
        }
    }
}

fn is_active(store: &GraphStore, id: EntityId) -> bool {
    let Some(e) = store.entity(id) else {
        return false;
    };
    !store
        .schema()
        .entity_kind(&e.kind)
        .is_some_and(|def| def.status_is_terminal(&e.status))
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

/// Reduce a candidate set to the bound entities.
pub fn pick(
    candidates: Vec<EntityId>,
    count: usize,
    strategy: PickStrategy,
    store: &GraphStore,
    rng: &mut StdRng,
) -> Vec<EntityId> {
    match strategy {
        PickStrategy::All => candidates,
        PickStrategy::First => candidates.into_iter().take(count).collect(),
        PickStrategy::Random => {
            let mut pool = candidates;
            let mut out = Vec::new();
            while out.len() < count && !pool.is_empty() {
                let idx = rng.gen_range(0..pool.len());
                out.push(pool.swap_remove(idx));
            }
            out
        }
        PickStrategy::Weighted => {
            let mut pool: Vec<(EntityId, f64)> = candidates
                .into_iter()
                .map(|id| {
                    let w = store
                        .entity(id)
                        .map(|e| (e.prominence.index() + 1) as f64)
                        .unwrap_or(1.0);
                    (id, w)
                })
                .collect();
            let mut out = Vec::new();
            while out.len() < count && !pool.is_empty() {
                let total: f64 = pool.iter().map(|(_, w)| w).sum();
                let mut roll = rng.gen_range(0.0..total);
                let mut chosen = pool.len() - 1;
                for (i, (_, w)) in pool.iter().enumerate() {
                    if roll < *w {
                        chosen = i;
                        break;
                    }
                    roll -= w;
                }
                out.push(pool.swap_remove(chosen).0);
            }
            out
        }
    }
}
