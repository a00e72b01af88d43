//! dockprep — Protein preparation and docking grid boxes.
//! Entry point for the command-line binary.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, ArgGroup, Parser, Subcommand};
use dockprep_common::{PrepConfig, SelectionMode};
use dockprep_molecules::ligand::LigandLookup;
use dockprep_molecules::pdb::{StructureFetcher, StructureTarget};
use dockprep_molecules::pipeline::{BatchOperation, BatchReport, PrepPipeline, PreparedStructure};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dockprep", version)]
#[command(about = "Prepare protein structures and docking search boxes", long_about = None)]
struct Cli {
    /// Config file (TOML, YAML or JSON); defaults to DOCKPREP_CONFIG or ./dockprep.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a structure by PDB id or UniProt accession
    Fetch {
        target: String,
    },

    /// Prepare every holo structure in a directory around its bound ligand
    Crystal {
        input_dir: PathBuf,

        /// Ligand residue name (default: RCSB annotation, then any organic group)
        #[arg(long)]
        ligand: Option<String>,

        /// Skip the RCSB ligand lookup
        #[arg(long, action = ArgAction::SetTrue)]
        no_lookup: bool,

        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Prepare a structure around predicted binding residues
    Predicted {
        /// Structure file, PDB id or UniProt accession
        structure: String,

        /// Binding-site prediction table
        table: PathBuf,

        #[arg(long)]
        cutoff: Option<f64>,

        /// Use the N most probable residues instead of a cutoff (N defaults to selection.top_n)
        #[arg(long, value_name = "N", num_args = 0..=1, conflicts_with = "cutoff")]
        top_n: Option<Option<usize>>,

        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Remove every non-protein atom
    Strip {
        input_dir: PathBuf,

        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Add hydrogens with Open Babel
    Protonate {
        input_dir: PathBuf,

        #[arg(long)]
        ph: Option<f64>,

        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Energy-minimize with Open Babel
    Minimize {
        input_dir: PathBuf,

        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Write only the docking config for one structure
    #[command(group(ArgGroup::new("site").required(true).args(["ligand", "csv"])))]
    Grid {
        /// Structure file, PDB id or UniProt accession
        structure: String,

        /// Box the ligand with this residue name
        #[arg(long)]
        ligand: Option<String>,

        /// Box the residues predicted in this table
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Probability cutoff for the table residues
        #[arg(long, requires = "csv", conflicts_with = "ligand")]
        cutoff: Option<f64>,

        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "dockprep=info,warn",
        1 => "dockprep=debug,info",
        _ => "dockprep=trace,info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PrepConfig> {
    let config = match path {
        Some(p) => PrepConfig::from_path(p).with_context(|| format!("loading config {}", p.display()))?,
        None => PrepConfig::load().context("loading config")?,
    };
    Ok(config)
}

fn fetcher(config: &PrepConfig) -> anyhow::Result<StructureFetcher> {
    Ok(StructureFetcher::with_timeout(
        &config.fetch.cache_dir,
        Duration::from_secs(config.fetch.timeout_secs),
    )?)
}

fn print_prepared(prepared: &PreparedStructure) {
    match &prepared.grid {
        Some(grid) => {
            let c = grid.center();
            println!(
                "{}\tcenter=({:.3}, {:.3}, {:.3})\tsize={}\t{}",
                prepared.structure_id,
                c.x,
                c.y,
                c.z,
                grid.size(),
                prepared.output.display()
            );
        }
        None => println!("{}\t{}", prepared.structure_id, prepared.output.display()),
    }
}

fn finish_batch(report: &BatchReport) -> ExitCode {
    for prepared in &report.succeeded {
        print_prepared(prepared);
    }
    for (path, e) in &report.failed {
        eprintln!("{}\tFAILED\t{}", path.display(), e);
    }
    info!(
        "{} of {} structures prepared",
        report.succeeded.len(),
        report.total()
    );
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;
    info!("dockprep {} (ph {}, cutoff {})", env!("CARGO_PKG_VERSION"), config.preparation.ph, config.selection.cutoff);

    match cli.command {
        Commands::Fetch { target } => {
            let path = fetcher(&config)?.resolve(&target).await?;
            if let StructureTarget::Pdb(id) = StructureTarget::classify(&target)? {
                match LigandLookup::new()?.binding_ligand(&id).await {
                    Ok(Some(ligand)) => info!("{} binding ligand: {}", id, ligand),
                    Ok(None) => info!("{} has no binding-affinity annotation", id),
                    Err(e) => warn!("Ligand lookup for {} failed: {}", id, e),
                }
            }
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Crystal { input_dir, ligand, no_lookup, out } => {
            let mut pipeline = PrepPipeline::new(config);
            if let Some(dir) = out {
                pipeline = pipeline.with_output_dir(dir);
            }
            match ligand {
                Some(resn) => pipeline = pipeline.with_ligand(&resn),
                None if !no_lookup => pipeline = pipeline.with_ligand_lookup(LigandLookup::new()?),
                None => {}
            }
            let report = pipeline.run_batch(&input_dir, BatchOperation::Crystal).await?;
            Ok(finish_batch(&report))
        }

        Commands::Predicted { structure, table, cutoff, top_n, out } => {
            apply_selection_flags(&mut config, cutoff, top_n);
            config.validate()?;
            let pdb_path = fetcher(&config)?.resolve(&structure).await?;

            let mut pipeline = PrepPipeline::new(config);
            if let Some(dir) = out {
                pipeline = pipeline.with_output_dir(dir);
            }
            let prepared = pipeline.prepare_predicted_site(&pdb_path, &table).await?;
            print_prepared(&prepared);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Strip { input_dir, out } => {
            run_simple_batch(config, &input_dir, out, BatchOperation::Strip).await
        }

        Commands::Protonate { input_dir, ph, out } => {
            if let Some(ph) = ph {
                config.preparation.ph = ph;
            }
            config.validate()?;
            run_simple_batch(config, &input_dir, out, BatchOperation::Protonate).await
        }

        Commands::Minimize { input_dir, out } => {
            run_simple_batch(config, &input_dir, out, BatchOperation::Minimize).await
        }

        Commands::Grid { structure, ligand, csv, cutoff, out } => {
            apply_selection_flags(&mut config, cutoff, None);
            config.validate()?;
            let pdb_path = fetcher(&config)?.resolve(&structure).await?;

            let mut pipeline = PrepPipeline::new(config);
            if let Some(dir) = out {
                pipeline = pipeline.with_output_dir(dir);
            }
            let prepared = match (ligand, csv) {
                (_, Some(table)) => pipeline.predicted_site_grid(&pdb_path, &table).await?,
                (Some(resn), None) => pipeline.with_ligand(&resn).crystal_grid(&pdb_path).await?,
                (None, None) => anyhow::bail!("either --ligand or --csv is required"),
            };
            print_prepared(&prepared);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Command-line residue selection overrides the config file.
fn apply_selection_flags(config: &mut PrepConfig, cutoff: Option<f64>, top_n: Option<Option<usize>>) {
    if let Some(cutoff) = cutoff {
        config.selection.cutoff = cutoff;
        config.selection.mode = SelectionMode::Cutoff;
    }
    if let Some(n) = top_n {
        if let Some(n) = n {
            config.selection.top_n = n;
        }
        config.selection.mode = SelectionMode::TopN;
    }
}

async fn run_simple_batch(
    config: PrepConfig,
    input_dir: &Path,
    out: Option<PathBuf>,
    operation: BatchOperation,
) -> anyhow::Result<ExitCode> {
    let mut pipeline = PrepPipeline::new(config);
    if let Some(dir) = out {
        pipeline = pipeline.with_output_dir(dir);
    }
    let report = pipeline.run_batch(input_dir, operation).await?;
    Ok(finish_batch(&report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_grid_needs_a_site() {
        assert!(Cli::try_parse_from(["dockprep", "grid", "1abc.pdb"]).is_err());
        assert!(Cli::try_parse_from(["dockprep", "grid", "1abc.pdb", "--ligand", "LBM"]).is_ok());
        assert!(Cli::try_parse_from(["dockprep", "grid", "1abc.pdb", "--ligand", "LBM", "--cutoff", "0.5"]).is_err());
    }

    #[test]
    fn test_grid_cutoff_with_table() {
        let cli = Cli::try_parse_from(["dockprep", "grid", "1abc.pdb", "--csv", "p.csv", "--cutoff", "0.5"]).unwrap();
        match cli.command {
            Commands::Grid { csv, cutoff, ligand, .. } => {
                assert_eq!(csv, Some(PathBuf::from("p.csv")));
                assert_eq!(cutoff, Some(0.5));
                assert_eq!(ligand, None);
            }
            _ => panic!("expected grid"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["dockprep", "strip", "in", "-vv", "--config", "x.toml"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn test_top_n_value_is_optional() {
        let cli = Cli::try_parse_from(["dockprep", "predicted", "Q16611", "p.csv", "--top-n"]).unwrap();
        let Commands::Predicted { top_n, cutoff, .. } = cli.command else {
            panic!("expected predicted");
        };
        let mut config = PrepConfig::default();
        config.selection.top_n = 12;
        apply_selection_flags(&mut config, cutoff, top_n);
        assert_eq!(config.selection.mode, SelectionMode::TopN);
        assert_eq!(config.selection.top_n, 12);

        apply_selection_flags(&mut config, None, Some(Some(5)));
        assert_eq!(config.selection.top_n, 5);
        apply_selection_flags(&mut config, Some(0.6), None);
        assert_eq!(config.selection.mode, SelectionMode::Cutoff);
    }

    #[test]
    fn test_top_n_conflicts_with_cutoff() {
        let args = ["dockprep", "predicted", "Q16611", "p.csv", "--cutoff", "0.5", "--top-n", "10"];
        assert!(Cli::try_parse_from(args).is_err());
    }
}
