//! A single rule firing: the pipeline from selection to affects validation.
//!
//! A firing either starts — every pre-check green — or skips silently; once
//! mutations begin there is no rollback. Per-step failures inside a started
//! firing are logged and skipped (recoverable tier).

use rand::Rng;
use rand::rngs::StdRng;

use tracing::{debug, warn};

use crate::enforcer::{
    self, ContractWarning, EnforcerConfig, SaturationRegistry, WarningReport,
};
use crate::graph::{GraphStore, NewEntity};
use crate::ident::EntityId;
use crate::pressure::PressureSet;
use crate::rules::mutation::MutationCtx;
use crate::rules::condition::ConditionCtx;
use crate::rules::metric::MetricCtx;
use crate::rules::placement::similarity;
use crate::rules::{
    ContagionSpec, CreationSpec, FilterOutcome, MutationTally, RuleDoc, SymbolTable, filter,
    selection,
};

/// What one firing attempt did.
#[derive(Debug, Default)]
pub struct FiringOutcome {
    /// False when a pre-check (selection, condition, prerequisites) skipped
    /// the firing entirely.
    pub fired: bool,
    pub tally: MutationTally,
    pub created: Vec<EntityId>,
    /// Cooldown updates for the scheduler to commit (rule id, ticks).
    pub rate_limit_changes: Vec<(String, u64)>,
}

/// Borrowed run state a firing executes against.
pub struct FiringCtx<'a> {
    pub store: &'a mut GraphStore,
    pub pressures: &'a mut PressureSet,
    pub rng: &'a mut StdRng,
    pub enforcer: EnforcerConfig,
    pub saturation: &'a SaturationRegistry,
    pub report: &'a mut WarningReport,
    pub tick: u64,
    pub last_fired: Option<u64>,
}

/// Run one rule through the firing pipeline. Prerequisites are assumed
/// already checked by the scheduler (they gate eligibility, not execution).
pub fn fire(rule: &RuleDoc, ctx: &mut FiringCtx<'_>) -> FiringOutcome {
    let mut outcome = FiringOutcome::default();
    let mut bindings = SymbolTable::new();

    // ---- selections ----
    for binding in &rule.selections {
        let candidates = binding.select.candidates(ctx.store, &bindings);
        let (filtered, filter_outcome) = filter::apply(
            candidates,
            &binding.filters,
            &binding.prefer,
            ctx.store,
            &bindings,
        );
        if filter_outcome == FilterOutcome::Relaxed {
            debug!(rule = %rule.id, binding = %binding.name, "prefer filters relaxed");
            ctx.report.push(ContractWarning::PreferFilterRelaxed {
                rule: rule.id.clone(),
                binding: binding.name.clone(),
                tick: ctx.tick,
            });
        }
        let picked = selection::pick(filtered, binding.count, binding.pick, ctx.store, ctx.rng);
        if picked.is_empty() {
            if binding.optional {
                continue;
            }
            debug!(rule = %rule.id, binding = %binding.name, "empty selection, skipping firing");
            return outcome;
        }
        bindings.bind(binding.name.clone(), picked);
    }

    // ---- condition ----
    if let Some(condition) = &rule.condition {
        let snapshot = ctx.pressures.values().clone();
        let mut cond_ctx = ConditionCtx {
            metrics: MetricCtx {
                store: ctx.store,
                pressures: &snapshot,
                bindings: &bindings,
                tick: ctx.tick,
            },
            rng: ctx.rng,
            last_fired: ctx.last_fired,
        };
        let verdict = condition.eval(&mut cond_ctx);
        if !verdict.passed {
            debug!(rule = %rule.id, trace = %verdict.trace, "condition failed, skipping firing");
            return outcome;
        }
    }

    outcome.fired = true;

    // ---- creations ----
    for creation in &rule.creations {
        apply_creation(rule, creation, &mut bindings, &mut outcome, ctx);
    }

    // ---- relationship specs ----
    for spec in &rule.relationships {
        let (Some(src), Some(dst)) = (bindings.first(&spec.src), bindings.first(&spec.dst))
        else {
            debug!(rule = %rule.id, kind = %spec.kind, "relationship endpoints unbound, skipping");
            continue;
        };
        if src == dst || ctx.store.are_related(src, dst, Some(&spec.kind)) {
            continue;
        }
        match ctx.store.create_relationship(
            &spec.kind,
            src,
            dst,
            spec.strength,
            spec.category.clone(),
            ctx.tick,
        ) {
            Ok(_) => outcome.tally.relationships += 1,
            Err(e) => warn!(rule = %rule.id, kind = %spec.kind, error = %e, "relationship skipped"),
        }
    }

    // ---- mutations ----
    let mut mctx = MutationCtx::new(ctx.store, &bindings, &rule.id, ctx.tick);
    for mutation in &rule.mutations {
        mutation.apply(&mut mctx);
    }
    outcome.tally.tags += mctx.tally.tags;
    outcome.tally.entities += mctx.tally.entities;
    outcome.tally.relationships += mctx.tally.relationships;
    let pressure_changes = mctx.pressure_changes;
    outcome.rate_limit_changes = mctx.rate_limit_changes;
    for (pressure, delta) in pressure_changes {
        ctx.pressures.apply_delta(&pressure, delta);
    }

    // ---- explicit pressure deltas ----
    for delta in &rule.pressure_updates {
        ctx.pressures.apply_delta(&delta.pressure, delta.delta);
    }

    // ---- contagion ----
    if let Some(contagion) = &rule.contagion {
        apply_contagion(rule, contagion, &bindings, &mut outcome, ctx);
    }

    // ---- affects validation ----
    if ctx.enforcer.affects {
        if let Some(declared) = &rule.contract.affects {
            enforcer::check_affects(&rule.id, declared, outcome.tally, ctx.tick, ctx.report);
        }
    }

    outcome
}

fn apply_creation(
    rule: &RuleDoc,
    creation: &CreationSpec,
    bindings: &mut SymbolTable,
    outcome: &mut FiringOutcome,
    ctx: &mut FiringCtx<'_>,
) {
    let mut created: Vec<EntityId> = Vec::new();
    for _ in 0..creation.count {
        if ctx.enforcer.saturation {
            let decision = ctx.saturation.check(
                ctx.store,
                &creation.kind,
                creation.subtype.as_deref(),
                1,
            );
            let rule_hit = SaturationRegistry::check_rule_limits(
                ctx.store,
                &rule.contract.saturation,
                &creation.kind,
                creation.subtype.as_deref(),
                1,
            );
            if decision.blocked || rule_hit.is_some() {
                let ceiling = decision
                    .ceiling
                    .or(rule_hit.map(|l| l.ceiling))
                    .unwrap_or(0);
                warn!(
                    rule = %rule.id,
                    kind = %creation.kind,
                    current = decision.current,
                    ceiling,
                    "creation blocked by saturation ceiling"
                );
                ctx.report.push(ContractWarning::SaturationExceeded {
                    rule: rule.id.clone(),
                    kind: creation.kind.clone(),
                    subtype: creation.subtype.clone(),
                    count: decision.current,
                    ceiling,
                    tick: ctx.tick,
                });
                break;
            }
        }

        let placement = creation
            .placement
            .as_ref()
            .and_then(|anchor| anchor.resolve(ctx.store, bindings, ctx.rng));
        // ids are dense and sequential, so the next entity's id is count + 1
        let name = format!("{} {}", creation.name_prefix, ctx.store.entity_count() + 1);
        let spec = NewEntity {
            kind: creation.kind.clone(),
            subtype: creation.subtype.clone(),
            name,
            status: None,
            prominence: creation.prominence,
            culture: creation.culture.clone(),
            tags: creation.tags.clone(),
            attributes: Default::default(),
            placement,
        };
        match ctx.store.create_entity(spec, ctx.tick) {
            Ok(id) => {
                created.push(id);
                outcome.created.push(id);
                outcome.tally.entities += 1;
            }
            Err(e) => {
                warn!(rule = %rule.id, kind = %creation.kind, error = %e, "creation skipped");
                break;
            }
        }
    }

    if created.is_empty() {
        return;
    }

    // lineage runs in the same tick as the creation it records
    if ctx.enforcer.lineage {
        match rule.lineage_for(creation) {
            Some(lineage) => {
                if let Some(seed) = bindings.first(&lineage.from) {
                    for id in &created {
                        if let Err(e) = ctx.store.create_relationship(
                            &lineage.relationship_kind,
                            *id,
                            seed,
                            1.0,
                            None,
                            ctx.tick,
                        ) {
                            warn!(rule = %rule.id, error = %e, "lineage relationship skipped");
                        }
                    }
                }
            }
            None => {
                warn!(rule = %rule.id, kind = %creation.kind, "creation without lineage declaration");
                ctx.report.push(ContractWarning::MissingLineage {
                    rule: rule.id.clone(),
                    kind: creation.kind.clone(),
                    tick: ctx.tick,
                });
            }
        }
    }

    if let Some(bind) = &creation.bind {
        bindings.bind(bind.clone(), created);
    }
}

fn apply_contagion(
    rule: &RuleDoc,
    contagion: &ContagionSpec,
    bindings: &SymbolTable,
    outcome: &mut FiringOutcome,
    ctx: &mut FiringCtx<'_>,
) {
    let Some(source) = bindings.first(&contagion.from) else {
        debug!(rule = %rule.id, var = %contagion.from, "contagion source unbound, skipping");
        return;
    };
    let neighbors = ctx
        .store
        .related_entities(source, contagion.relationship_kind.as_deref());
    let mut spread = 0usize;
    for neighbor in neighbors {
        if spread >= contagion.max_spread {
            break;
        }
        let score = similarity(source, neighbor, &contagion.criteria, ctx.store);
        let roll: f64 = ctx.rng.r#gen();
        if roll >= contagion.chance * score {
            continue;
        }
        if let Some(tag) = &contagion.tag {
            let value = contagion
                .tag_value
                .clone()
                .unwrap_or(crate::graph::TagValue::Bool(true));
            match ctx.store.set_tag(neighbor, tag, value, ctx.tick) {
                Ok(()) => {
                    outcome.tally.tags += 1;
                    spread += 1;
                }
                Err(e) => warn!(rule = %rule.id, %neighbor, error = %e, "contagion tag skipped"),
            }
        }
        if let Some(status) = &contagion.status {
            match ctx.store.set_status(neighbor, status, ctx.tick) {
                Ok(()) => {
                    outcome.tally.entities += 1;
                    spread += 1;
                }
                Err(e) => {
                    warn!(rule = %rule.id, %neighbor, error = %e, "contagion status skipped")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    use crate::graph::TagValue;
    use crate::pressure::PressureDef;
    use crate::testutil::sample_schema;

    fn ctx_parts() -> (GraphStore, PressureSet, StdRng, WarningReport) {
        (
            GraphStore::new(sample_schema()),
            PressureSet::new(vec![PressureDef {
                id: "unrest".into(),
                initial: 50.0,
                decay: 0.0,
                growth: vec![],
            }]),
            StdRng::seed_from_u64(11),
            WarningReport::default(),
        )
    }

    fn fire_once(
        rule: &RuleDoc,
        store: &mut GraphStore,
        pressures: &mut PressureSet,
        rng: &mut StdRng,
        report: &mut WarningReport,
        registry: &SaturationRegistry,
        tick: u64,
    ) -> FiringOutcome {
        let mut ctx = FiringCtx {
            store,
            pressures,
            rng,
            enforcer: EnforcerConfig::default(),
            saturation: registry,
            report,
            tick,
            last_fired: None,
        };
        fire(rule, &mut ctx)
    }

    fn rule(json: serde_json::Value) -> RuleDoc {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn creation_names_carry_sequential_ids() {
        let (mut store, mut pressures, mut rng, mut report) = ctx_parts();
        let registry = SaturationRegistry::default();
        let r = rule(serde_json::json!({
            "id": "spawn", "name": "spawn",
            "creations": [{"kind": "npc", "name_prefix": "Figure", "count": 2}],
            "contract": {"lineage": null}
        }));
        let outcome = fire_once(
            &r, &mut store, &mut pressures, &mut rng, &mut report, &registry, 3,
        );
        assert!(outcome.fired);
        assert_eq!(outcome.created.len(), 2);
        assert_eq!(store.entity(outcome.created[0]).unwrap().name, "Figure 1");
        assert_eq!(store.entity(outcome.created[1]).unwrap().name, "Figure 2");
        assert_eq!(store.entity(outcome.created[0]).unwrap().created_at_tick, 3);
        // no lineage declaration -> recorded warning
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ContractWarning::MissingLineage { .. })));
    }

    #[test]
    fn lineage_lands_in_creation_tick() {
        let (mut store, mut pressures, mut rng, mut report) = ctx_parts();
        store
            .create_entity(
                NewEntity {
                    kind: "npc".into(),
                    name: "Founder".into(),
                    ..Default::default()
                },
                0,
            )
            .unwrap();
        let registry = SaturationRegistry::default();
        let r = rule(serde_json::json!({
            "id": "found", "name": "found",
            "selections": [
                {"name": "founder", "select": {"strategy": "by_kind", "kind": "npc"}}
            ],
            "creations": [
                {
                    "kind": "faction", "name_prefix": "Banner",
                    "lineage": {"relationship_kind": "created_by", "from": "founder"}
                }
            ]
        }));
        let outcome = fire_once(
            &r, &mut store, &mut pressures, &mut rng, &mut report, &registry, 7,
        );
        assert!(outcome.fired);
        let new_id = outcome.created[0];
        let rels = store.relationships_of(new_id);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].kind, "created_by");
        assert_eq!(rels[0].created_at_tick, 7);
        assert!(report.is_empty());
    }

    #[test]
    fn saturation_blocks_creation_and_records_warning() {
        let (mut store, mut pressures, mut rng, mut report) = ctx_parts();
        let registry = SaturationRegistry::new(vec![crate::rules::SaturationLimit {
            kind: "npc".into(),
            subtype: None,
            ceiling: 1,
            tolerance: 0.0,
        }]);
        let r = rule(serde_json::json!({
            "id": "spawn", "name": "spawn",
            "creations": [{"kind": "npc", "name_prefix": "Figure", "count": 3}],
            "contract": {}
        }));
        let outcome = fire_once(
            &r, &mut store, &mut pressures, &mut rng, &mut report, &registry, 0,
        );
        // first creation fits under the ceiling, the rest are blocked
        assert_eq!(outcome.created.len(), 1);
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ContractWarning::SaturationExceeded { ceiling: 1, .. })));
    }

    #[test]
    fn empty_required_selection_skips_silently() {
        let (mut store, mut pressures, mut rng, mut report) = ctx_parts();
        let registry = SaturationRegistry::default();
        let r = rule(serde_json::json!({
            "id": "needs_npc", "name": "needs npc",
            "selections": [
                {"name": "actor", "select": {"strategy": "by_kind", "kind": "npc"}}
            ],
            "creations": [{"kind": "faction", "name_prefix": "Banner"}]
        }));
        let outcome = fire_once(
            &r, &mut store, &mut pressures, &mut rng, &mut report, &registry, 0,
        );
        assert!(!outcome.fired);
        assert_eq!(store.entity_count(), 0);
    }

    #[test]
    fn pressure_updates_applied_after_firing() {
        let (mut store, mut pressures, mut rng, mut report) = ctx_parts();
        let registry = SaturationRegistry::default();
        let r = rule(serde_json::json!({
            "id": "agitate", "name": "agitate",
            "pressure_updates": [{"pressure": "unrest", "delta": 10.0}]
        }));
        let outcome = fire_once(
            &r, &mut store, &mut pressures, &mut rng, &mut report, &registry, 0,
        );
        assert!(outcome.fired);
        assert_eq!(pressures.value("unrest"), 60.0);
    }

    #[test]
    fn contagion_spreads_tag_to_neighbors() {
        let (mut store, mut pressures, mut rng, mut report) = ctx_parts();
        let a = store
            .create_entity(
                NewEntity {
                    kind: "npc".into(),
                    name: "Patient Zero".into(),
                    ..Default::default()
                },
                0,
            )
            .unwrap();
        for i in 0..3 {
            let n = store
                .create_entity(
                    NewEntity {
                        kind: "npc".into(),
                        name: format!("n{i}"),
                        ..Default::default()
                    },
                    0,
                )
                .unwrap();
            store.create_relationship("knows", a, n, 0.9, None, 0).unwrap();
        }
        let registry = SaturationRegistry::default();
        let r = rule(serde_json::json!({
            "id": "curse_spreads", "name": "curse spreads",
            "selections": [
                {
                    "name": "carrier",
                    "select": {"strategy": "by_kind", "kind": "npc"},
                    "filters": [{"type": "has_tag", "tag": "cursed"}]
                }
            ],
            "contagion": {
                "from": "carrier",
                "relationship_kind": "knows",
                "tag": "cursed",
                "chance": 1.0
            }
        }));
        store.set_tag(a, "cursed", TagValue::Bool(true), 0).unwrap();
        let outcome = fire_once(
            &r, &mut store, &mut pressures, &mut rng, &mut report, &registry, 1,
        );
        assert!(outcome.fired);
        // chance 1.0 with default similarity 1.0 infects every neighbor
        assert_eq!(outcome.tally.tags, 3);
        let cursed = store
            .entities()
            .iter()
            .filter(|e| e.tags.get("cursed").is_some_and(|v| v.is_truthy()))
            .count();
        assert_eq!(cursed, 4);
    }

    #[test]
    fn affects_mismatch_recorded() {
        let (mut store, mut pressures, mut rng, mut report) = ctx_parts();
        let registry = SaturationRegistry::default();
        let r = rule(serde_json::json!({
            "id": "spawn", "name": "spawn",
            "creations": [{"kind": "npc", "name_prefix": "Figure"}],
            "contract": {
                "lineage": null,
                "affects": {"entities": 2}
            }
        }));
        fire_once(
            &r, &mut store, &mut pressures, &mut rng, &mut report, &registry, 0,
        );
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ContractWarning::AffectsMismatch { declared: 2, actual: 1, .. })));
    }
}
