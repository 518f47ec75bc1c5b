//! Pre-run validation: the fatal tier.
//!
//! Every rule document, era, pressure and target is checked against the
//! schema before the first tick. References to undefined kinds, subtypes,
//! statuses, pressures, cultures, relationship kinds or tag names are
//! refused here; variable references must name a binding declared earlier in
//! the same rule. Unknown fragment discriminants never reach this pass —
//! the closed enums reject them at deserialize time.

use std::collections::BTreeSet;

use crate::config::{EraTrigger, WorldConfig};
use crate::error::SchemaError;
use crate::graph::Prominence;
use crate::rules::{
    Condition, FilterPredicate, Metric, Mutation, PlacementAnchor, Prerequisite, RuleDoc,
    Selection,
};
use crate::schema::WorldSchema;

/// Validate a full configuration, returning the first failure.
pub fn validate(config: &WorldConfig) -> Result<(), SchemaError> {
    match validate_all(config).into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Validate a full configuration, collecting every failure.
pub fn validate_all(config: &WorldConfig) -> Vec<SchemaError> {
    let mut v = Validator {
        schema: &config.schema,
        pressures: config.pressures.iter().map(|p| p.id.clone()).collect(),
        errors: Vec::new(),
    };

    if config.eras.is_empty() {
        v.errors.push(SchemaError::InvalidConfig {
            message: "at least one era is required".into(),
        });
    }

    // the first declared status doubles as the kind's default
    for kind in &config.schema.entity_kinds {
        if kind.statuses.is_empty() {
            v.errors.push(SchemaError::InvalidConfig {
                message: format!("entity kind '{}' declares no statuses", kind.name),
            });
        }
    }
    let rule_ids: BTreeSet<&str> = config.rules.iter().map(|r| r.id.as_str()).collect();

    for era in &config.eras {
        let referrer = format!("era '{}'", era.id);
        for trigger in &era.transitions {
            match trigger {
                EraTrigger::Time { .. } => {}
                EraTrigger::Pressure { pressure, .. } => v.pressure(pressure, &referrer),
                EraTrigger::EntityCount { kind, .. } => {
                    if let Some(kind) = kind {
                        v.entity_kind(kind, &referrer);
                    }
                }
            }
        }
        for rule_id in era.rule_weights.keys() {
            if !rule_ids.contains(rule_id.as_str()) {
                v.errors.push(SchemaError::InvalidConfig {
                    message: format!("{referrer} overrides unknown rule '{rule_id}'"),
                });
            }
        }
        if let Some(targets) = &era.targets {
            v.targets(targets, &referrer);
        }
    }

    for def in &config.pressures {
        let referrer = format!("pressure '{}'", def.id);
        for factor in &def.growth {
            v.metric(&factor.metric, &BTreeSet::new(), &referrer);
        }
    }

    v.targets(&config.targets, "global targets");

    for limit in &config.saturation {
        let referrer = format!("saturation limit for '{}'", limit.kind);
        v.kind_subtype(&limit.kind, limit.subtype.as_deref(), &referrer);
    }

    for rule in &config.rules {
        v.rule(rule);
    }

    let threshold = &config.settings.enrichment_threshold;
    if !Prominence::ALL.iter().any(|p| p.name() == threshold) {
        v.errors.push(SchemaError::InvalidConfig {
            message: format!("settings name unknown prominence level '{threshold}'"),
        });
    }

    v.errors
}

struct Validator<'a> {
    schema: &'a WorldSchema,
    pressures: BTreeSet<String>,
    errors: Vec<SchemaError>,
}

impl Validator<'_> {
    fn entity_kind(&mut self, kind: &str, referrer: &str) {
        if self.schema.entity_kind(kind).is_none() {
            self.errors.push(SchemaError::UnknownEntityKind {
                kind: kind.to_string(),
                referrer: referrer.to_string(),
            });
        }
    }

    fn kind_subtype(&mut self, kind: &str, subtype: Option<&str>, referrer: &str) {
        let Some(def) = self.schema.entity_kind(kind) else {
            self.errors.push(SchemaError::UnknownEntityKind {
                kind: kind.to_string(),
                referrer: referrer.to_string(),
            });
            return;
        };
        if let Some(sub) = subtype {
            if !def.has_subtype(sub) {
                self.errors.push(SchemaError::UnknownSubtype {
                    kind: kind.to_string(),
                    subtype: sub.to_string(),
                    referrer: referrer.to_string(),
                });
            }
        }
    }

    fn relationship_kind(&mut self, kind: &str, referrer: &str) {
        if self.schema.relationship_kind(kind).is_none() {
            self.errors.push(SchemaError::UnknownRelationshipKind {
                kind: kind.to_string(),
                referrer: referrer.to_string(),
            });
        }
    }

    fn pressure(&mut self, pressure: &str, referrer: &str) {
        if !self.pressures.contains(pressure) {
            self.errors.push(SchemaError::UnknownPressure {
                pressure: pressure.to_string(),
                referrer: referrer.to_string(),
            });
        }
    }

    fn tag(&mut self, tag: &str, referrer: &str) {
        if self.schema.tag(tag).is_none() {
            self.errors.push(SchemaError::UnknownTag {
                tag: tag.to_string(),
                referrer: referrer.to_string(),
            });
        }
    }

    fn culture(&mut self, culture: &str, referrer: &str) {
        if !self.schema.has_culture(culture) {
            self.errors.push(SchemaError::UnknownCulture {
                culture: culture.to_string(),
                referrer: referrer.to_string(),
            });
        }
    }

    /// A status is acceptable when some entity kind registers it; exact
    /// membership is enforced per entity at mutation time.
    fn status(&mut self, status: &str, referrer: &str) {
        let known = self
            .schema
            .entity_kinds
            .iter()
            .any(|k| k.has_status(status));
        if !known {
            self.errors.push(SchemaError::UnknownStatus {
                kind: "*".to_string(),
                status: status.to_string(),
                referrer: referrer.to_string(),
            });
        }
    }

    fn var(&mut self, var: &str, bound: &BTreeSet<String>, rule: &str) {
        if !bound.contains(var) {
            self.errors.push(SchemaError::UnboundVariable {
                var: var.to_string(),
                rule: rule.to_string(),
            });
        }
    }

    fn targets(&mut self, targets: &crate::distribution::DistributionTargets, referrer: &str) {
        for kind in targets.entity_kinds.keys() {
            self.entity_kind(kind, referrer);
        }
        for kind in targets.relationship_kinds.keys() {
            self.relationship_kind(kind, referrer);
        }
        for level in targets.prominence.keys() {
            if !Prominence::ALL.iter().any(|p| p.name() == level) {
                self.errors.push(SchemaError::InvalidConfig {
                    message: format!("{referrer} names unknown prominence level '{level}'"),
                });
            }
        }
        const CONNECTIVITY_KEYS: [&str; 5] = [
            "cluster_count",
            "average_cluster_size",
            "intra_cluster_density",
            "inter_cluster_density",
            "isolated_ratio",
        ];
        for key in targets.connectivity.keys() {
            if !CONNECTIVITY_KEYS.contains(&key.as_str()) {
                self.errors.push(SchemaError::InvalidConfig {
                    message: format!("{referrer} names unknown connectivity metric '{key}'"),
                });
            }
        }
    }

    fn metric(&mut self, metric: &Metric, bound: &BTreeSet<String>, referrer: &str) {
        match metric {
            Metric::EntityCount { kind, subtype, tag } => {
                if let Some(kind) = kind {
                    self.kind_subtype(kind, subtype.as_deref(), referrer);
                } else if let Some(sub) = subtype {
                    self.errors.push(SchemaError::InvalidConfig {
                        message: format!("{referrer} restricts subtype '{sub}' without a kind"),
                    });
                }
                if let Some(tag) = tag {
                    self.tag(tag, referrer);
                }
            }
            Metric::RelationshipCount { kind } => {
                if let Some(kind) = kind {
                    self.relationship_kind(kind, referrer);
                }
            }
            Metric::EntityRatio { kind } => self.entity_kind(kind, referrer),
            Metric::RelationshipRatio { kind } => self.relationship_kind(kind, referrer),
            Metric::Ratio {
                numerator,
                denominator,
            } => {
                self.metric(numerator, bound, referrer);
                self.metric(denominator, bound, referrer);
            }
            Metric::ProminenceMultiplier { of, .. } => {
                // pressure growth factors have no bindings at all
                if !bound.contains(of) {
                    self.errors.push(SchemaError::InvalidConfig {
                        message: format!("{referrer} references unbound variable '${of}'"),
                    });
                }
            }
            Metric::PressureValue { pressure } => self.pressure(pressure, referrer),
            Metric::Falloff { from, to, .. } => {
                for var in [from, to] {
                    if !bound.contains(var) {
                        self.errors.push(SchemaError::InvalidConfig {
                            message: format!("{referrer} references unbound variable '${var}'"),
                        });
                    }
                }
            }
            Metric::DecayRate { .. } | Metric::Constant { .. } => {}
        }
    }

    fn condition(&mut self, condition: &Condition, bound: &BTreeSet<String>, rule: &RuleDoc) {
        let referrer = format!("rule '{}'", rule.id);
        match condition {
            Condition::Pressure { pressure, .. } => self.pressure(pressure, &referrer),
            Condition::EntityCount { kind, subtype, .. } => {
                if let Some(kind) = kind {
                    self.kind_subtype(kind, subtype.as_deref(), &referrer);
                }
            }
            Condition::RelationshipCount { kind, .. } => {
                if let Some(kind) = kind {
                    self.relationship_kind(kind, &referrer);
                }
            }
            Condition::Metric { metric, .. } => self.metric(metric, bound, &referrer),
            Condition::GraphPath { from, kind, .. } => {
                self.var(from, bound, &rule.id);
                if let Some(kind) = kind {
                    self.relationship_kind(kind, &referrer);
                }
            }
            Condition::And { all } => {
                for c in all {
                    self.condition(c, bound, rule);
                }
            }
            Condition::Or { any } => {
                for c in any {
                    self.condition(c, bound, rule);
                }
            }
            Condition::Not { condition } => self.condition(condition, bound, rule),
            Condition::Elapsed { .. }
            | Condition::Cooldown { .. }
            | Condition::RandomChance { .. }
            | Condition::Always => {}
        }
    }

    fn filter(&mut self, f: &FilterPredicate, bound: &BTreeSet<String>, rule: &RuleDoc) {
        let referrer = format!("rule '{}'", rule.id);
        match f {
            FilterPredicate::HasTag { tag, .. } | FilterPredicate::LacksTag { tag } => {
                self.tag(tag, &referrer)
            }
            FilterPredicate::HasRelationship { kind, with }
            | FilterPredicate::LacksRelationship { kind, with } => {
                if let Some(kind) = kind {
                    self.relationship_kind(kind, &referrer);
                }
                if let Some(with) = with {
                    self.var(with, bound, &rule.id);
                }
            }
            FilterPredicate::HasStatus { status } => self.status(status, &referrer),
            FilterPredicate::SameCulture { as_var } => self.var(as_var, bound, &rule.id),
            FilterPredicate::SharesRelated { with, kind } => {
                self.var(with, bound, &rule.id);
                if let Some(kind) = kind {
                    self.relationship_kind(kind, &referrer);
                }
            }
            FilterPredicate::GraphPath { to, kind, .. } => {
                self.var(to, bound, &rule.id);
                if let Some(kind) = kind {
                    self.relationship_kind(kind, &referrer);
                }
            }
            FilterPredicate::HasProminence { .. } => {}
        }
    }

    fn placement(&mut self, anchor: &PlacementAnchor, bound: &BTreeSet<String>, rule: &RuleDoc) {
        let referrer = format!("rule '{}'", rule.id);
        match anchor {
            PlacementAnchor::Entity { var, .. } => self.var(var, bound, &rule.id),
            PlacementAnchor::Culture { culture, .. } => self.culture(culture, &referrer),
            PlacementAnchor::RefsCentroid { vars, .. } => {
                for var in vars {
                    self.var(var, bound, &rule.id);
                }
            }
            PlacementAnchor::Bounds { .. } | PlacementAnchor::Sparse { .. } => {}
        }
    }

    fn rule(&mut self, rule: &RuleDoc) {
        let referrer = format!("rule '{}'", rule.id);
        let mut bound: BTreeSet<String> = BTreeSet::new();

        for binding in &rule.selections {
            match &binding.select {
                Selection::ByKind { kind, subtype, .. } => {
                    self.kind_subtype(kind, subtype.as_deref(), &referrer)
                }
                Selection::ByPreferenceOrder { kinds } => {
                    for kind in kinds {
                        self.entity_kind(kind, &referrer);
                    }
                }
                Selection::ByRelationship { from, kind } => {
                    self.var(from, &bound, &rule.id);
                    // a missing kind selects along any relationship
                    if let Some(kind) = kind {
                        self.relationship_kind(kind, &referrer);
                    }
                }
                Selection::ByProximity { to, .. } => self.var(to, &bound, &rule.id),
                Selection::ByProminence { kind, .. } => {
                    if let Some(kind) = kind {
                        self.entity_kind(kind, &referrer);
                    }
                }
            }
            for f in binding.filters.iter().chain(binding.prefer.iter()) {
                self.filter(f, &bound, rule);
            }
            bound.insert(binding.name.clone());
        }

        // creations bind before relationships/mutations/contagion run
        for creation in &rule.creations {
            self.kind_subtype(&creation.kind, creation.subtype.as_deref(), &referrer);
            if let Some(culture) = &creation.culture {
                self.culture(culture, &referrer);
            }
            for tag in creation.tags.keys() {
                self.tag(tag, &referrer);
            }
            if let Some(anchor) = &creation.placement {
                self.placement(anchor, &bound, rule);
            }
            if let Some(lineage) = rule.lineage_for(creation) {
                self.relationship_kind(&lineage.relationship_kind, &referrer);
                self.var(&lineage.from, &bound, &rule.id);
            }
            if let Some(bind) = &creation.bind {
                bound.insert(bind.clone());
            }
        }

        if let Some(condition) = &rule.condition {
            self.condition(condition, &bound, rule);
        }

        for spec in &rule.relationships {
            self.relationship_kind(&spec.kind, &referrer);
            self.var(&spec.src, &bound, &rule.id);
            self.var(&spec.dst, &bound, &rule.id);
        }

        for mutation in &rule.mutations {
            match mutation {
                Mutation::SetTag { target, tag, .. } | Mutation::RemoveTag { target, tag } => {
                    self.var(target, &bound, &rule.id);
                    self.tag(tag, &referrer);
                }
                Mutation::CreateRelationship { kind, src, dst, .. }
                | Mutation::ArchiveRelationship { kind, src, dst }
                | Mutation::AdjustRelationshipStrength { kind, src, dst, .. } => {
                    self.relationship_kind(kind, &referrer);
                    self.var(src, &bound, &rule.id);
                    self.var(dst, &bound, &rule.id);
                }
                Mutation::ChangeStatus { target, status } => {
                    self.var(target, &bound, &rule.id);
                    self.status(status, &referrer);
                }
                Mutation::AdjustProminence { target, .. } => self.var(target, &bound, &rule.id),
                Mutation::ModifyPressure { pressure, .. } => self.pressure(pressure, &referrer),
                Mutation::UpdateRateLimit { .. } => {}
            }
        }

        for delta in &rule.pressure_updates {
            self.pressure(&delta.pressure, &referrer);
        }

        if let Some(contagion) = &rule.contagion {
            self.var(&contagion.from, &bound, &rule.id);
            if let Some(kind) = &contagion.relationship_kind {
                self.relationship_kind(kind, &referrer);
            }
            if let Some(tag) = &contagion.tag {
                self.tag(tag, &referrer);
            }
            if let Some(status) = &contagion.status {
                self.status(status, &referrer);
            }
            if contagion.tag.is_none() && contagion.status.is_none() {
                self.errors.push(SchemaError::InvalidConfig {
                    message: format!("{referrer} contagion spreads neither a tag nor a status"),
                });
            }
        }

        for prerequisite in &rule.contract.enabled_by {
            match prerequisite {
                Prerequisite::EntityCount { kind, subtype, .. } => {
                    self.kind_subtype(kind, subtype.as_deref(), &referrer)
                }
                Prerequisite::RelationshipExists { kind } => {
                    self.relationship_kind(kind, &referrer)
                }
                Prerequisite::Pressure { pressure, .. } => self.pressure(pressure, &referrer),
            }
        }
        for limit in &rule.contract.saturation {
            self.kind_subtype(&limit.kind, limit.subtype.as_deref(), &referrer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sample_config_json;

    fn config() -> WorldConfig {
        WorldConfig::from_json(&sample_config_json()).unwrap()
    }

    #[test]
    fn sample_config_is_valid() {
        let errors = validate_all(&config());
        assert!(errors.is_empty(), "unexpected: {errors:?}");
    }

    #[test]
    fn kind_without_statuses_refused() {
        let mut c = config();
        // a status-less kind has no default status to assign on creation
        c.schema.entity_kinds[0].statuses.clear();
        let errors = validate_all(&c);
        assert!(
            errors.iter().any(|e| matches!(
                e,
                SchemaError::InvalidConfig { message } if message.contains("declares no statuses")
            )),
            "unexpected: {errors:?}"
        );
    }

    #[test]
    fn unknown_kind_in_creation_refused() {
        let mut c = config();
        c.rules[0].creations[0].kind = "dragon".into();
        let err = validate(&c).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownEntityKind { .. }));
    }

    #[test]
    fn unknown_pressure_in_delta_refused() {
        let mut c = config();
        c.rules[1].pressure_updates[0].pressure = "gloom".into();
        let err = validate(&c).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownPressure { .. }));
    }

    #[test]
    fn forward_variable_reference_refused() {
        let mut c = config();
        // "meet" binds a then b; make a's selection reference b
        c.rules[2].selections[0].select = Selection::ByRelationship {
            from: "b".into(),
            kind: Some("knows".into()),
        };
        let errors = validate_all(&c);
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, SchemaError::UnboundVariable { var, .. } if var == "b"))
        );
    }

    #[test]
    fn creation_binding_is_visible_to_later_specs() {
        let mut c = config();
        // reference the creation's own binding in a mutation
        c.rules[1].mutations.push(Mutation::AdjustProminence {
            target: "faction".into(),
            steps: Some(1),
            jump: None,
        });
        assert!(validate(&c).is_ok());
    }

    #[test]
    fn era_override_of_unknown_rule_refused() {
        let mut c = config();
        c.eras[1].rule_weights.insert("no_such_rule".into(), 2.0);
        let errors = validate_all(&c);
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, SchemaError::InvalidConfig { message } if message.contains("no_such_rule")))
        );
    }

    #[test]
    fn bad_prominence_target_key_refused() {
        let mut c = config();
        c.targets.prominence.insert("legendary".into(), 0.1);
        let errors = validate_all(&c);
        assert!(!errors.is_empty());
    }

    #[test]
    fn empty_eras_refused() {
        let mut c = config();
        c.eras.clear();
        assert!(validate(&c).is_err());
    }

    #[test]
    fn unknown_tag_in_mutation_refused() {
        let mut c = config();
        c.rules[3].mutations.push(Mutation::SetTag {
            target: "riser".into(),
            tag: "blessed".into(),
            value: crate::graph::TagValue::Bool(true),
        });
        let err = validate(&c).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownTag { .. }));
    }
}
