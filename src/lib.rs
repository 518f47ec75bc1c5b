//! # khnum
//!
//! A procedural world generator that grows a knowledge graph of entities and
//! relationships by interpreting declarative rules over a seeded, fully
//! deterministic tick loop.
//!
//! ## Architecture
//!
//! - **Graph store** (`graph`): arena-backed entities and relationships with
//!   connectivity analytics via `petgraph`
//! - **Rule interpreter** (`rules`): selection strategies, filters,
//!   conditions, metrics, mutations, placement, and contagion
//! - **Scheduler** (`sim`): era-driven Growth/Simulation phases with
//!   weighted rule draws and terminal detection
//! - **Distribution tracker** (`distribution`): reweights rule selection
//!   toward target entity/relationship/prominence ratios
//! - **Contract enforcer** (`enforcer`): prerequisites, saturation ceilings,
//!   lineage, affects declarations, and tag taxonomy health
//! - **Export** (`export`): the complete world plus metrics and warnings as
//!   one JSON document
//!
//! ## Library usage
//!
//! ```no_run
//! use khnum::config::WorldConfig;
//! use khnum::export::WorldExport;
//! use khnum::sim::Simulation;
//!
//! let config = WorldConfig::load(std::path::Path::new("world")).unwrap();
//! let mut sim = Simulation::new(config).unwrap();
//! let summary = sim.run().unwrap();
//! let export = WorldExport::from_run(&sim, &summary);
//! println!("{}", export.to_json_pretty().unwrap());
//! ```

pub mod config;
pub mod distribution;
pub mod enforcer;
pub mod error;
pub mod export;
pub mod graph;
pub mod ident;
pub mod pressure;
pub mod rules;
pub mod schema;
pub mod sim;
pub mod validate;

#[cfg(test)]
pub(crate) mod testutil;
