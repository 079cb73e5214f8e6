use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use mixmatch::catalog::SqliteCatalog;
use mixmatch::config::MatchConfig;
use mixmatch::models::{TrackInput, TrackOutcome};
use mixmatch::processor::Processor;
use mixmatch::progress::{create_spinner, format_duration, set_log_only, TrackProgress};
use mixmatch::queries::QueryGenerator;
use mixmatch::similarity::TokenSetRatio;
use mixmatch::source::CandidateSource;

#[derive(Parser)]
#[command(name = "mixmatch")]
#[command(about = "Match DJ playlist tracks against a music catalog")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Hide progress bars and log progress lines instead
    #[arg(long, global = true)]
    log_only: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Match a JSON playlist against a catalog
    Match(MatchArgs),
    /// Print the search queries generated for one track
    Queries(QueriesArgs),
    /// Import catalog entries from a JSON array
    Import(ImportArgs),
    /// Run one raw search against a catalog
    Search(SearchArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// Flat JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override one setting, e.g. --set max_queries=20 (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

impl ConfigArgs {
    fn load(&self) -> Result<MatchConfig> {
        let base = match &self.config {
            Some(path) => MatchConfig::from_file(path)?,
            None => MatchConfig::default(),
        };
        if self.overrides.is_empty() {
            return Ok(base);
        }
        Ok(base.with_overrides(&self.overrides)?)
    }
}

#[derive(Args)]
struct MatchArgs {
    /// Catalog database
    catalog: PathBuf,

    /// JSON array of {"title", "artist", "year"?, "key"?} objects
    input: PathBuf,

    /// Write outcomes as JSON here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write per-track candidate logs and query audits (JSON lines)
    #[arg(long)]
    audit: Option<PathBuf>,

    /// Write aggregate statistics as JSON
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Concurrent tracks (0 = from configuration)
    #[arg(long, default_value = "0")]
    workers: usize,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args)]
struct QueriesArgs {
    title: String,

    #[arg(default_value = "")]
    artist: String,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args)]
struct ImportArgs {
    catalog: PathBuf,

    json: PathBuf,
}

#[derive(Args)]
struct SearchArgs {
    catalog: PathBuf,

    query: String,

    #[arg(long, default_value = "10")]
    limit: usize,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mixmatch=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn read_tracks(path: &Path) -> Result<Vec<TrackInput>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse track list {:?}", path))
}

fn run_match(args: MatchArgs) -> Result<()> {
    let mut config = args.config.load()?;
    if args.workers > 0 {
        config = config.with_overrides(&[format!("track_workers={}", args.workers)])?;
    }

    let tracks = read_tracks(&args.input)?;
    let catalog = SqliteCatalog::open(&args.catalog)?;
    tracing::info!(
        "Matching {} tracks against {:?} ({} entries)",
        tracks.len(),
        args.catalog,
        catalog.len()?
    );

    let processor = Processor::new(config, Arc::new(catalog), Arc::new(TokenSetRatio))?;

    let start = Instant::now();
    let progress = TrackProgress::new(tracks.len() as u64, 25);
    let (reports, stats) = processor.process_all(&tracks, |report| {
        progress.record(report.outcome.is_match());
    });
    progress.finish();

    let outcomes: Vec<&TrackOutcome> = reports.iter().map(|r| &r.outcome).collect();
    let json = serde_json::to_string_pretty(&outcomes)?;
    match &args.output {
        Some(path) => std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?,
        None => println!("{}", json),
    }

    if let Some(path) = &args.audit {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let mut writer = BufWriter::new(file);
        for report in &reports {
            serde_json::to_writer(&mut writer, report)?;
            writeln!(writer)?;
        }
        writer.flush()?;
    }

    stats.log_phase("match");
    if let Some(path) = &args.stats {
        stats.write_to_file(path)?;
    }
    tracing::info!(
        "Match rate {:.1}% in {}",
        stats.match_rate(),
        format_duration(start.elapsed())
    );
    Ok(())
}

fn run_queries(args: QueriesArgs) -> Result<()> {
    let config = args.config.load()?;
    let queries = QueryGenerator::new(&config).generate(&args.title, &args.artist, &args.title);
    for q in &queries {
        println!("{:>3}  {:<16} {}", q.rank + 1, format!("{:?}", q.kind), q.text);
    }
    Ok(())
}

fn run_import(args: ImportArgs) -> Result<()> {
    let catalog = SqliteCatalog::open(&args.catalog)?;
    let spinner = create_spinner("Importing catalog");
    let inserted = catalog.import_json(&args.json)?;
    spinner.finish_with_message(format!("Imported {} entries ({} total)", inserted, catalog.len()?));
    Ok(())
}

fn run_search(args: SearchArgs) -> Result<()> {
    let catalog = SqliteCatalog::open(&args.catalog)?;
    let urls = catalog.try_search(&args.query, args.limit)?;
    if urls.is_empty() {
        println!("No results found.");
    }
    for url in urls {
        match catalog.fetch_metadata(&url) {
            Some(meta) => println!("{}  {} - {}", url, meta.artists.join(", "), meta.title),
            None => println!("{}  (no metadata)", url),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    set_log_only(cli.log_only);

    match cli.command {
        Command::Match(args) => run_match(args),
        Command::Queries(args) => run_queries(args),
        Command::Import(args) => run_import(args),
        Command::Search(args) => run_search(args),
    }
}
