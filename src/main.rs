//! khnum CLI: procedural knowledge-graph world generator.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;

use khnum::config::WorldConfig;
use khnum::export::WorldExport;
use khnum::sim::Simulation;
use khnum::validate;

#[derive(Parser)]
#[command(name = "khnum", version, about = "Procedural knowledge-graph world generator")]
struct Cli {
    /// Config document: a single JSON file or a directory of documents.
    #[arg(long, global = true, default_value = "world")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full generation and write the world export.
    Generate {
        /// Override the configured seed.
        #[arg(long)]
        seed: Option<u64>,

        /// Override the configured tick ceiling.
        #[arg(long)]
        ticks: Option<u64>,

        /// Output path for the JSON export.
        #[arg(long, default_value = "export.json")]
        out: PathBuf,
    },

    /// Check the config for schema and reference errors without running.
    Validate,

    /// Show a summary of the loaded config.
    Info,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = WorldConfig::load(&cli.config)?;

    match cli.command {
        Commands::Generate { seed, ticks, out } => {
            if let Some(seed) = seed {
                config.settings.seed = seed;
            }
            if let Some(ticks) = ticks {
                config.settings.max_ticks = ticks;
            }

            let mut sim = Simulation::new(config)?;
            let summary = sim.run()?;
            let export = WorldExport::from_run(&sim, &summary);
            export.write_to(&out)?;

            println!(
                "run finished: seed {} / {} ticks / {:?} / {} entities / {} relationships",
                summary.seed,
                summary.ticks,
                summary.terminal,
                export.entities.len(),
                export.relationships.len(),
            );
            if !export.warnings.is_empty() {
                println!("{} contract warnings recorded in export", export.warnings.len());
            }
            println!("world written to {}", out.display());
        }
        Commands::Validate => {
            let errors = validate::validate_all(&config);
            if errors.is_empty() {
                println!("config is valid");
            } else {
                let count = errors.len();
                for error in errors {
                    eprintln!("{:?}", miette::Report::new(error));
                }
                return Err(miette::miette!("{count} validation errors"));
            }
        }
        Commands::Info => {
            println!("schema:");
            println!("  {} entity kinds", config.schema.entity_kinds.len());
            println!("  {} relationship kinds", config.schema.relationship_kinds.len());
            println!("  {} tags", config.schema.tags.len());
            println!("  {} cultures", config.schema.cultures.len());
            println!("eras:");
            for era in &config.eras {
                println!("  {} ({})", era.id, era.name);
            }
            println!("{} pressures, {} rules", config.pressures.len(), config.rules.len());
            println!(
                "settings: seed {} / max {} ticks / {}+{} firings per tick",
                config.settings.seed,
                config.settings.max_ticks,
                config.settings.growth_firings,
                config.settings.simulation_firings,
            );
        }
    }

    Ok(())
}
