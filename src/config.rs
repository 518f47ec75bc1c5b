//! Run configuration: the external documents a world is generated from.
//!
//! A config is one JSON document (or a directory of the per-section files
//! `schema.json`, `eras.json`, `pressures.json`, `rules.json`, `targets.json`,
//! `settings.json`) deserialized into [`WorldConfig`]. Everything here is
//! data; validation against the schema happens in a separate pre-run pass.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::distribution::{DistributionTargets, TrackerConfig};
use crate::enforcer::EnforcerConfig;
use crate::error::SchemaError;
use crate::graph::analytics::ClusteringConfig;
use crate::pressure::PressureDef;
use crate::rules::{CmpOp, RuleDoc, SaturationLimit};
use crate::schema::WorldSchema;

/// A trigger moving the run into an era's successor. An era with several
/// triggers transitions when any one of them holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EraTrigger {
    /// After the era has run this many ticks.
    Time { ticks: u64 },
    /// When a pressure crosses a threshold.
    Pressure {
        pressure: String,
        op: CmpOp,
        value: f64,
    },
    /// When the entity population (optionally one kind) reaches a size.
    EntityCount {
        #[serde(default)]
        kind: Option<String>,
        at_least: usize,
    },
}

/// One era in the run's progression. Eras run in declaration order; the last
/// era has no successor and its triggers are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EraDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub transitions: Vec<EraTrigger>,
    /// Era-level rule weight overrides, keyed by rule id. These outrank the
    /// rule documents' own `era_weights`.
    #[serde(default)]
    pub rule_weights: BTreeMap<String, f64>,
    /// Distribution target overrides merged per key over the global targets.
    #[serde(default)]
    pub targets: Option<DistributionTargets>,
}

/// Scheduler settings with config-file defaults; the CLI can override seed
/// and tick count per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,
    /// Creation-rule firings attempted per Growth phase.
    #[serde(default = "default_growth_firings")]
    pub growth_firings: usize,
    /// Mutation-rule firings attempted per Simulation phase.
    #[serde(default = "default_simulation_firings")]
    pub simulation_firings: usize,
    /// Prominence level (by name) from which an entity counts as an
    /// enrichment trigger in the export.
    #[serde(default = "default_enrichment_threshold")]
    pub enrichment_threshold: String,
    #[serde(default)]
    pub clustering: ClusteringConfig,
}

fn default_seed() -> u64 {
    0
}

fn default_max_ticks() -> u64 {
    200
}

fn default_growth_firings() -> usize {
    3
}

fn default_simulation_firings() -> usize {
    5
}

fn default_enrichment_threshold() -> String {
    "renowned".to_string()
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            max_ticks: default_max_ticks(),
            growth_firings: default_growth_firings(),
            simulation_firings: default_simulation_firings(),
            enrichment_threshold: default_enrichment_threshold(),
            clustering: ClusteringConfig::default(),
        }
    }
}

/// The complete configuration for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    pub schema: WorldSchema,
    pub eras: Vec<EraDef>,
    #[serde(default)]
    pub pressures: Vec<PressureDef>,
    pub rules: Vec<RuleDoc>,
    #[serde(default)]
    pub targets: DistributionTargets,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub enforcer: EnforcerConfig,
    #[serde(default)]
    pub saturation: Vec<SaturationLimit>,
    #[serde(default)]
    pub settings: RunSettings,
}

impl WorldConfig {
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(json).map_err(|e| SchemaError::Parse {
            message: e.to_string(),
        })
    }

    /// Load from a single JSON file or a directory of per-section files.
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        if path.is_dir() {
            Self::load_dir(path)
        } else {
            let text = fs::read_to_string(path).map_err(|e| SchemaError::Parse {
                message: format!("{}: {e}", path.display()),
            })?;
            Self::from_json(&text)
        }
    }

    fn load_dir(dir: &Path) -> Result<Self, SchemaError> {
        fn read<T: serde::de::DeserializeOwned>(dir: &Path, name: &str) -> Result<T, SchemaError> {
            let path = dir.join(name);
            let text = fs::read_to_string(&path).map_err(|e| SchemaError::Parse {
                message: format!("{}: {e}", path.display()),
            })?;
            serde_json::from_str(&text).map_err(|e| SchemaError::Parse {
                message: format!("{}: {e}", path.display()),
            })
        }
        fn read_or_default<T: serde::de::DeserializeOwned + Default>(
            dir: &Path,
            name: &str,
        ) -> Result<T, SchemaError> {
            if dir.join(name).exists() {
                read(dir, name)
            } else {
                Ok(T::default())
            }
        }

        Ok(Self {
            schema: read(dir, "schema.json")?,
            eras: read(dir, "eras.json")?,
            pressures: read_or_default(dir, "pressures.json")?,
            rules: read(dir, "rules.json")?,
            targets: read_or_default(dir, "targets.json")?,
            tracker: read_or_default(dir, "tracker.json")?,
            enforcer: read_or_default(dir, "enforcer.json")?,
            saturation: read_or_default(dir, "saturation.json")?,
            settings: read_or_default(dir, "settings.json")?,
        })
    }
}
