//! Mutation specs: the state changes a rule applies when it fires.
//!
//! Mutations run sequentially within one firing and there is no per-step
//! rollback — a firing either starts (all pre-checks green) or does not.
//! Failures inside a step are recoverable-tier: logged and skipped, the
//! firing continues. Pressure and rate-limit changes are not applied to the
//! graph at all; they accumulate in the context and the scheduler commits
//! them after the firing.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::graph::{GraphStore, Prominence, TagValue};
use crate::ident::EntityId;
use crate::rules::selection::SymbolTable;

/// A single state change, targeting entities through binding variables.
/// A variable bound to several entities applies the mutation to each.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    SetTag {
        target: String,
        tag: String,
        #[serde(default = "default_tag_value")]
        value: TagValue,
    },
    RemoveTag {
        target: String,
        tag: String,
    },
    /// Relationship between the first entity bound to `src` and each entity
    /// bound to `dst`.
    CreateRelationship {
        kind: String,
        src: String,
        dst: String,
        #[serde(default = "default_strength")]
        strength: f64,
        #[serde(default)]
        category: Option<String>,
    },
    /// Archive the non-archived relationship of `kind` between the bound
    /// endpoints, if one exists.
    ArchiveRelationship {
        kind: String,
        src: String,
        dst: String,
    },
    AdjustRelationshipStrength {
        kind: String,
        src: String,
        dst: String,
        delta: f64,
    },
    ChangeStatus {
        target: String,
        status: String,
    },
    /// Ordinary transitions step one level; `jump` replaces the level
    /// outright for rules that explicitly bypass the one-step rule.
    AdjustProminence {
        target: String,
        #[serde(default)]
        steps: Option<i32>,
        #[serde(default)]
        jump: Option<Prominence>,
    },
    /// Accumulated and committed by the scheduler after the firing.
    ModifyPressure {
        pressure: String,
        delta: f64,
    },
    /// Change a rule's cooldown for the rest of the run. `rule` defaults to
    /// the firing rule itself.
    UpdateRateLimit {
        #[serde(default)]
        rule: Option<String>,
        ticks: u64,
    },
}

fn default_tag_value() -> TagValue {
    TagValue::Bool(true)
}

fn default_strength() -> f64 {
    0.5
}

/// Counts of actual effects within one firing, compared against the rule's
/// declared `affects` block afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationTally {
    pub tags: usize,
    pub entities: usize,
    pub relationships: usize,
}

/// Mutable context one firing's mutations run against.
pub struct MutationCtx<'a> {
    pub store: &'a mut GraphStore,
    pub bindings: &'a SymbolTable,
    pub rule_id: &'a str,
    pub tick: u64,
    pub tally: MutationTally,
    /// Pressure deltas to commit after the firing.
    pub pressure_changes: Vec<(String, f64)>,
    /// (rule id, cooldown ticks) updates to commit after the firing.
    pub rate_limit_changes: Vec<(String, u64)>,
}

impl<'a> MutationCtx<'a> {
    pub fn new(store: &'a mut GraphStore, bindings: &'a SymbolTable, rule_id: &'a str, tick: u64) -> Self {
        Self {
            store,
            bindings,
            rule_id,
            tick,
            tally: MutationTally::default(),
            pressure_changes: Vec::new(),
            rate_limit_changes: Vec::new(),
        }
    }

    fn bound(&self, var: &str) -> Vec<EntityId> {
        match self.bindings.get(var) {
            Some(ids) => ids.to_vec(),
            None => {
                debug!(rule = self.rule_id, var, "mutation target unbound, skipping");
                Vec::new()
            }
        }
    }
}

impl Mutation {
    pub fn apply(&self, ctx: &mut MutationCtx<'_>) {
        match self {
            Mutation::SetTag { target, tag, value } => {
                for id in ctx.bound(target) {
                    match ctx.store.set_tag(id, tag, value.clone(), ctx.tick) {
                        Ok(()) => ctx.tally.tags += 1,
                        Err(e) => {
                            warn!(rule = ctx.rule_id, %id, tag, error = %e, "set_tag skipped")
                        }
                    }
                }
            }
            Mutation::RemoveTag { target, tag } => {
                for id in ctx.bound(target) {
                    match ctx.store.remove_tag(id, tag, ctx.tick) {
                        Ok(()) => ctx.tally.tags += 1,
                        Err(e) => {
                            warn!(rule = ctx.rule_id, %id, tag, error = %e, "remove_tag skipped")
                        }
                    }
                }
            }
            Mutation::CreateRelationship {
                kind,
                src,
                dst,
                strength,
                category,
            } => {
                let Some(src_id) = ctx.bindings.first(src) else {
                    debug!(rule = ctx.rule_id, var = src, "mutation src unbound, skipping");
                    return;
                };
                for dst_id in ctx.bound(dst) {
                    if dst_id == src_id || ctx.store.are_related(src_id, dst_id, Some(kind)) {
                        continue;
                    }
                    match ctx.store.create_relationship(
                        kind,
                        src_id,
                        dst_id,
                        *strength,
                        category.clone(),
                        ctx.tick,
                    ) {
                        Ok(_) => ctx.tally.relationships += 1,
                        Err(e) => warn!(
                            rule = ctx.rule_id, kind, error = %e,
                            "create_relationship skipped"
                        ),
                    }
                }
            }
            Mutation::ArchiveRelationship { kind, src, dst } => {
                let (Some(src_id), Some(dst_id)) =
                    (ctx.bindings.first(src), ctx.bindings.first(dst))
                else {
                    debug!(rule = ctx.rule_id, "archive endpoints unbound, skipping");
                    return;
                };
                if let Some(rel_id) = find_relationship(ctx.store, kind, src_id, dst_id) {
                    match ctx.store.archive_relationship(rel_id) {
                        Ok(()) => ctx.tally.relationships += 1,
                        Err(e) => {
                            warn!(rule = ctx.rule_id, kind, error = %e, "archive skipped")
                        }
                    }
                }
            }
            Mutation::AdjustRelationshipStrength { kind, src, dst, delta } => {
                let (Some(src_id), Some(dst_id)) =
                    (ctx.bindings.first(src), ctx.bindings.first(dst))
                else {
                    debug!(rule = ctx.rule_id, "strength endpoints unbound, skipping");
                    return;
                };
                if let Some(rel_id) = find_relationship(ctx.store, kind, src_id, dst_id) {
                    match ctx.store.adjust_relationship_strength(rel_id, *delta) {
                        Ok(_) => ctx.tally.relationships += 1,
                        Err(e) => {
                            warn!(rule = ctx.rule_id, kind, error = %e, "strength skipped")
                        }
                    }
                }
            }
            Mutation::ChangeStatus { target, status } => {
                for id in ctx.bound(target) {
                    match ctx.store.set_status(id, status, ctx.tick) {
                        Ok(()) => ctx.tally.entities += 1,
                        Err(e) => {
                            warn!(rule = ctx.rule_id, %id, status, error = %e, "change_status skipped")
                        }
                    }
                }
            }
            Mutation::AdjustProminence { target, steps, jump } => {
                for id in ctx.bound(target) {
                    let result = match (jump, steps) {
                        (Some(level), _) => ctx.store.set_prominence(id, *level, ctx.tick),
                        (None, Some(steps)) => {
                            ctx.store.adjust_prominence(id, *steps, ctx.tick).map(|_| ())
                        }
                        (None, None) => ctx.store.adjust_prominence(id, 1, ctx.tick).map(|_| ()),
                    };
                    match result {
                        Ok(()) => ctx.tally.entities += 1,
                        Err(e) => {
                            warn!(rule = ctx.rule_id, %id, error = %e, "prominence skipped")
                        }
                    }
                }
            }
            Mutation::ModifyPressure { pressure, delta } => {
                ctx.pressure_changes.push((pressure.clone(), *delta));
            }
            Mutation::UpdateRateLimit { rule, ticks } => {
                let target = rule.clone().unwrap_or_else(|| ctx.rule_id.to_string());
                ctx.rate_limit_changes.push((target, *ticks));
            }
        }
    }
}

/// The non-archived relationship of `kind` between two entities, in either
/// direction, if any.
fn find_relationship(
    store: &GraphStore,
    kind: &str,
    src: EntityId,
    dst: EntityId,
) -> Option<crate::ident::RelationshipId> {
    store
        .relationships_of(src)
        .iter()
        .find(|r| {
            r.kind == kind && ((r.src == src && r.dst == dst) || (r.src == dst && r.dst == src))
        })
        .map(|r| r.id)
}
