//! Final export: everything a completed run produced, as one JSON document.
//!
//! The export always exists for a completed run — warnings and contract
//! violations travel alongside the world, never in place of it. Enrichment
//! triggers are emitted unconditionally so downstream tooling can pick them
//! up whether or not any enrichment pass is configured.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::distribution::{DistributionSnapshot, DistributionTargets};
use crate::enforcer::{TaxonomyReport, WarningReport, analyze_taxonomy};
use crate::error::SchemaError;
use crate::graph::{Entity, Prominence, Relationship};
use crate::sim::{RunSummary, Simulation};

/// Distribution section of the export: the final snapshot plus the targets
/// it was measured against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionMetrics {
    #[serde(flatten)]
    pub snapshot: DistributionSnapshot,
    pub targets: DistributionTargets,
    pub converged: bool,
}

/// Counts of entities at or above the enrichment prominence threshold,
/// bucketed by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentTriggers {
    pub threshold: String,
    pub by_kind: BTreeMap<String, usize>,
}

/// The complete output of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldExport {
    pub run: RunSummary,
    pub entities: Vec<Entity>,
    /// All relationships, archived ones flagged rather than dropped.
    pub relationships: Vec<Relationship>,
    pub pressures: BTreeMap<String, f64>,
    pub distribution_metrics: DistributionMetrics,
    pub taxonomy: TaxonomyReport,
    pub warnings: WarningReport,
    pub enrichment_triggers: EnrichmentTriggers,
}

impl WorldExport {
    /// Assemble the export from a finished simulation.
    pub fn from_run(sim: &Simulation, summary: &RunSummary) -> Self {
        let store = sim.store();
        let targets = sim.resolved_targets();
        let snapshot = sim.distribution_snapshot();
        let converged = snapshot.overall_deviation
            < sim.config().tracker.convergence_threshold;

        let threshold_name = sim.config().settings.enrichment_threshold.clone();
        let threshold = Prominence::ALL
            .iter()
            .copied()
            .find(|p| p.name() == threshold_name)
            .unwrap_or(Prominence::Renowned);
        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for entity in store.entities() {
            if entity.prominence >= threshold {
                *by_kind.entry(entity.kind.clone()).or_insert(0) += 1;
            }
        }

        WorldExport {
            run: summary.clone(),
            entities: store.entities().to_vec(),
            relationships: store.relationships().to_vec(),
            pressures: sim.pressures().values().clone(),
            distribution_metrics: DistributionMetrics {
                snapshot,
                targets,
                converged,
            },
            taxonomy: analyze_taxonomy(store),
            warnings: sim.warnings().clone(),
            enrichment_triggers: EnrichmentTriggers {
                threshold: threshold_name,
                by_kind,
            },
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, SchemaError> {
        serde_json::to_string_pretty(self).map_err(|e| SchemaError::Parse {
            message: e.to_string(),
        })
    }

    pub fn write_to(&self, path: &Path) -> Result<(), SchemaError> {
        let json = self.to_json_pretty()?;
        fs::write(path, json).map_err(|e| SchemaError::Parse {
            message: format!("{}: {e}", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;
    use crate::testutil::sample_config_json;

    fn finished_run() -> (Simulation, RunSummary) {
        let config = WorldConfig::from_json(&sample_config_json()).unwrap();
        let mut sim = Simulation::new(config).unwrap();
        let summary = sim.run().unwrap();
        (sim, summary)
    }

    #[test]
    fn export_carries_full_world() {
        let (sim, summary) = finished_run();
        let export = WorldExport::from_run(&sim, &summary);
        assert_eq!(export.entities.len(), sim.store().entity_count());
        assert_eq!(export.relationships.len(), sim.store().relationships().len());
        assert_eq!(export.run.seed, 7);
        assert!(!export.run.eras.is_empty());
    }

    #[test]
    fn export_round_trips_through_json() {
        let (sim, summary) = finished_run();
        let export = WorldExport::from_run(&sim, &summary);
        let json = export.to_json_pretty().unwrap();
        let back: WorldExport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.entities.len(), export.entities.len());
        assert_eq!(
            back.distribution_metrics.snapshot.overall_deviation,
            export.distribution_metrics.snapshot.overall_deviation
        );
    }

    #[test]
    fn enrichment_triggers_emitted_even_when_empty() {
        let (sim, summary) = finished_run();
        let export = WorldExport::from_run(&sim, &summary);
        assert_eq!(export.enrichment_triggers.threshold, "renowned");
        // the section exists regardless of whether anything crossed it
        let total: usize = export.enrichment_triggers.by_kind.values().sum();
        let renowned = sim
            .store()
            .entities()
            .iter()
            .filter(|e| e.prominence >= Prominence::Renowned)
            .count();
        assert_eq!(total, renowned);
    }

    #[test]
    fn write_to_produces_readable_file() {
        let (sim, summary) = finished_run();
        let export = WorldExport::from_run(&sim, &summary);
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("export.json");
        export.write_to(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"entities\""));
    }
}
