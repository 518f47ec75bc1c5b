//! Contract enforcer: prerequisite gating, saturation ceilings, lineage
//! recording, and affects validation.
//!
//! Each check can be toggled independently. Violations of the recoverable
//! tier are logged and accumulated into a [`WarningReport`] that travels with
//! the export, separate from the primary output — a run never aborts on a
//! contract violation.

pub mod saturation;
pub mod taxonomy;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::graph::GraphStore;
use crate::pressure::PressureSet;
use crate::rules::{Affects, MutationTally, Prerequisite, RuleDoc};

pub use saturation::{SaturationLookup, SaturationRegistry};
pub use taxonomy::{TagUsage, TaxonomyReport, analyze_taxonomy};

/// Which contract checks run. All on by default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnforcerConfig {
    #[serde(default = "enabled")]
    pub prerequisites: bool,
    #[serde(default = "enabled")]
    pub saturation: bool,
    #[serde(default = "enabled")]
    pub lineage: bool,
    #[serde(default = "enabled")]
    pub affects: bool,
}

fn enabled() -> bool {
    true
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            prerequisites: true,
            saturation: true,
            lineage: true,
            affects: true,
        }
    }
}

/// One recoverable contract violation, recorded for the export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContractWarning {
    SaturationExceeded {
        rule: String,
        kind: String,
        subtype: Option<String>,
        count: usize,
        ceiling: usize,
        tick: u64,
    },
    MissingLineage {
        rule: String,
        kind: String,
        tick: u64,
    },
    AffectsMismatch {
        rule: String,
        field: String,
        declared: usize,
        actual: usize,
        tick: u64,
    },
    PreferFilterRelaxed {
        rule: String,
        binding: String,
        tick: u64,
    },
}

/// Accumulated warnings for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarningReport {
    pub warnings: Vec<ContractWarning>,
}

impl WarningReport {
    pub fn push(&mut self, warning: ContractWarning) {
        self.warnings.push(warning);
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Check a rule's `enabled_by` prerequisites. Failures are deliberate silent
/// no-ops: the rule simply does not fire this tick, nothing is logged or
/// recorded.
pub fn prerequisites_met(rule: &RuleDoc, store: &GraphStore, pressures: &PressureSet) -> bool {
    rule.contract.enabled_by.iter().all(|p| match p {
        Prerequisite::EntityCount {
            kind,
            subtype,
            at_least,
            at_most,
        } => {
            let count = store.count_kind_subtype(kind, subtype.as_deref());
            at_least.is_none_or(|min| count >= min) && at_most.is_none_or(|max| count <= max)
        }
        Prerequisite::RelationshipExists { kind } => store
            .relationships()
            .iter()
            .any(|r| !r.archived && r.kind == *kind),
        Prerequisite::Pressure {
            pressure,
            op,
            value,
        } => op.apply(pressures.value(pressure), *value),
    })
}

/// Compare a rule's declared affects against the firing's actual tally.
/// Mismatches are logged and recorded, never enforced.
pub fn check_affects(
    rule_id: &str,
    declared: &Affects,
    actual: MutationTally,
    tick: u64,
    report: &mut WarningReport,
) {
    let checks = [
        ("tags", declared.tags, actual.tags),
        ("entities", declared.entities, actual.entities),
        ("relationships", declared.relationships, actual.relationships),
    ];
    for (field, expected, got) in checks {
        let Some(expected) = expected else { continue };
        if expected != got {
            warn!(
                rule = rule_id,
                field,
                declared = expected,
                actual = got,
                "declared affects do not match firing"
            );
            report.push(ContractWarning::AffectsMismatch {
                rule: rule_id.to_string(),
                field: field.to_string(),
                declared: expected,
                actual: got,
                tick,
            });
        }
    }
}
