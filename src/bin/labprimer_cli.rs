use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use labprimer::{
    about,
    config::{DEFAULT_CONFIG_PATH, PipelineConfig, ValidationMode},
    export,
    fasta_input,
    http::ReqwestTransport,
    ncbi::{GeneTarget, GenomeVersion, SequenceWindow},
    orchestrator::{BatchEvent, BatchReport, DesignTarget, PrimerDesignOrchestrator},
    primer3_oracle::Primer3Oracle,
    species::SpeciesTable,
};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// LabPrimer CLI
#[derive(Parser)]
#[command(name = "labprimer_cli")]
#[command(version)]
#[command(about = "Exon-junction PCR primer design with in-silico PCR validation", long_about = None)]
struct Cli {
    /// JSON configuration file (defaults to ./labprimer.json when present)
    #[arg(long, global = true)]
    config: Option<String>,
    /// Output format for primer rows
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
    /// Write rows to this file instead of stdout
    #[arg(long, global = true)]
    output: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
enum WindowKind {
    Transcript,
    Promoter,
    Terminator,
}

#[derive(clap::Args)]
struct DesignOptions {
    /// Number of primer pairs per transcript
    #[arg(long)]
    count: Option<usize>,
    /// Run in-silico PCR on every candidate
    #[arg(long)]
    validate: bool,
    /// Keep only candidates passing in-silico PCR (off, qpcr, genome, both)
    #[arg(long)]
    only_validated: Option<ValidationMode>,
    /// Search exon pairs starting from the 3' end
    #[arg(long)]
    reverse_exon_order: bool,
    /// Process targets in parallel
    #[arg(long)]
    parallel: bool,
    /// Give up the primer search of a target after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Design primers for genes (Entrez ID, RefSeq accession or symbol)
    Design {
        /// Gene identifiers
        #[arg(long = "gene", required = true)]
        genes: Vec<String>,
        /// Species used to resolve gene symbols (common or scientific name)
        #[arg(long, default_value = "human")]
        species: String,
        /// Design primers for every transcript variant
        #[arg(long)]
        all_variants: bool,
        /// Use the previous genome assembly
        #[arg(long)]
        previous_genome: bool,
        /// Region fetched around each transcript
        #[arg(long, value_enum, default_value_t = WindowKind::Transcript)]
        window: WindowKind,
        /// Bases upstream of the promoter/terminator anchor
        #[arg(long, default_value_t = 2000)]
        upstream: i64,
        /// Bases downstream of the promoter/terminator anchor
        #[arg(long, default_value_t = 2000)]
        downstream: i64,
        #[command(flatten)]
        options: DesignOptions,
    },

    /// Design primers for the records of a FASTA file
    DesignFasta {
        /// FASTA input
        file: String,
        /// Species used for in-silico PCR (scientific or UCSC common name)
        #[arg(long)]
        species: String,
        #[command(flatten)]
        options: DesignOptions,
    },

    /// List species with an in-silico PCR database
    Species,

    /// Print version and build details
    Version,
}

fn load_config(path: Option<&str>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Could not load configuration '{path}'")),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            PipelineConfig::from_json_file(DEFAULT_CONFIG_PATH)
                .with_context(|| format!("Could not load configuration '{DEFAULT_CONFIG_PATH}'"))
        }
        None => Ok(PipelineConfig::default()),
    }
}

fn apply_options(config: &mut PipelineConfig, options: &DesignOptions) {
    let constraints = &mut config.constraints;
    if let Some(count) = options.count {
        constraints.num_return = count;
    }
    if options.validate {
        constraints.validate_in_silico = true;
    }
    if let Some(mode) = options.only_validated {
        constraints.only_validated = mode;
    }
    if options.reverse_exon_order {
        constraints.reverse_exon_order = true;
    }
}

fn write_rows(report: &BatchReport, format: OutputFormat, output: Option<&str>) -> Result<()> {
    let rows = report.rows();
    match (format, output) {
        (OutputFormat::Csv, Some(path)) => export::write_csv_file(path, &rows)?,
        (OutputFormat::Csv, None) => export::write_csv(std::io::stdout().lock(), &rows)?,
        (OutputFormat::Json, Some(path)) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Could not create output file '{path}'"))?;
            export::write_json(file, &rows)?
        }
        (OutputFormat::Json, None) => {
            export::write_json(std::io::stdout().lock(), &rows)?;
            println!();
        }
    }
    Ok(())
}

fn run_design(
    config: &PipelineConfig,
    options: &DesignOptions,
    targets: &[DesignTarget],
) -> Result<BatchReport> {
    let transport = Arc::new(ReqwestTransport::new(&config.endpoints.user_agent)?);
    let oracle = Arc::new(Primer3Oracle::new(&config.primer3));
    let mut orchestrator = PrimerDesignOrchestrator::from_config(config, transport, oracle)?;
    if let Some(secs) = options.timeout_secs {
        orchestrator = orchestrator.with_target_timeout(Duration::from_secs(secs));
    }

    let report = if options.parallel {
        orchestrator.run_batch_parallel(targets)
    } else {
        orchestrator.run_batch(targets, &mut |event| {
            match event {
                BatchEvent::TargetStarted { index, name } => {
                    info!("[{}/{}] designing primers for {name}", index + 1, targets.len())
                }
                BatchEvent::PairFound {
                    label,
                    found,
                    requested,
                    ..
                } => info!("{label}: {found}/{requested}"),
                _ => {}
            }
            ControlFlow::Continue(())
        })
    };
    for failure in report.failures() {
        warn!("no primers for {}: {:?}", failure.target, failure.status);
    }
    Ok(report)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Design {
            genes,
            species,
            all_variants,
            previous_genome,
            window,
            upstream,
            downstream,
            options,
        } => {
            apply_options(&mut config, &options);
            let window = match window {
                WindowKind::Transcript => SequenceWindow::Transcript,
                WindowKind::Promoter => SequenceWindow::Promoter {
                    upstream,
                    downstream,
                },
                WindowKind::Terminator => SequenceWindow::Terminator {
                    upstream,
                    downstream,
                },
            };
            let targets: Vec<DesignTarget> = genes
                .iter()
                .map(|gene| {
                    DesignTarget::Gene(GeneTarget {
                        all_variants,
                        genome_version: if previous_genome {
                            GenomeVersion::Previous
                        } else {
                            GenomeVersion::Current
                        },
                        window,
                        ..GeneTarget::new(gene).with_species(&species)
                    })
                })
                .collect();
            let report = run_design(&config, &options, &targets)?;
            write_rows(&report, cli.format, cli.output.as_deref())?;
        }
        Commands::DesignFasta {
            file,
            species,
            options,
        } => {
            apply_options(&mut config, &options);
            let records = fasta_input::from_fasta_file(&file, &species)?;
            if records.is_empty() {
                bail!("No sequence found in '{file}'");
            }
            let targets: Vec<DesignTarget> =
                records.into_iter().map(DesignTarget::Sequence).collect();
            let report = run_design(&config, &options, &targets)?;
            write_rows(&report, cli.format, cli.output.as_deref())?;
        }
        Commands::Species => {
            let table = SpeciesTable::load(config.species_table.as_deref())?;
            for name in table.list_species() {
                if let Some(entry) = table.lookup(&name) {
                    println!("{name}\t{}\t{}\t{}", entry.org, entry.db, entry.targets.join(","));
                }
            }
        }
        Commands::Version => println!("{}", about::version_cli_text()),
    }
    Ok(())
}
