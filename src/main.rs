use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;

use unified_plays::config::EngineConfig;
use unified_plays::logging::init_logging;
use unified_plays::pipeline::{run_rebuild, RebuildOptions, RebuildOutcome};
use unified_plays::progress::set_log_only;
use unified_plays::report::{self, ReportRow, DEFAULT_LIMIT};
use unified_plays::schema::SOURCE_SCHEMA;

#[derive(Parser)]
#[command(name = "unified-plays")]
#[command(about = "Rebuild the unified per-track play statistics dataset")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one full pass and publish the result
    Rebuild(RebuildArgs),

    /// Read-only selectors over a published dataset
    Report {
        #[command(subcommand)]
        kind: ReportKind,
    },

    /// Create the expected source tables (existing tables are left alone)
    InitSource { db: PathBuf },
}

#[derive(clap::Args)]
struct RebuildArgs {
    /// Source SQLite database
    #[arg(long, env = "UNIFIED_PLAYS_SOURCE")]
    source: PathBuf,

    /// Published dataset; the file name must contain "unified"
    #[arg(long, env = "UNIFIED_PLAYS_OUTPUT")]
    output: PathBuf,

    /// TOML engine config; flags below override its values
    #[arg(long, env = "UNIFIED_PLAYS_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    duration_tolerance_ms: Option<i64>,

    #[arg(long)]
    skip_ratio: Option<f64>,

    /// Also write pass statistics to this JSON file
    #[arg(long)]
    stats_json: Option<PathBuf>,

    /// Hide progress bars (for cron / tail -f)
    #[arg(long)]
    log_only: bool,
}

#[derive(Subcommand)]
enum ReportKind {
    MostPlayed {
        #[arg(long, env = "UNIFIED_PLAYS_OUTPUT")]
        db: PathBuf,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
    NeverPlayed {
        #[arg(long, env = "UNIFIED_PLAYS_OUTPUT")]
        db: PathBuf,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
}

fn engine_config(args: &RebuildArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("Failed to load config {:?}", path))?,
        None => EngineConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(tolerance) = args.duration_tolerance_ms {
        config.duration_tolerance_ms = tolerance;
    }
    if let Some(ratio) = args.skip_ratio {
        config.skip_ratio = ratio;
    }
    config.validate()?;
    Ok(config)
}

fn rebuild(args: RebuildArgs) -> Result<()> {
    set_log_only(args.log_only);
    let config = engine_config(&args)?;

    if config.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    let options = RebuildOptions {
        source_db: args.source,
        output_db: args.output,
        config,
        stats_path: args.stats_json,
    };

    match run_rebuild(&options)? {
        RebuildOutcome::Skipped => {
            println!("Rebuild already in progress for {:?}; nothing to do.", options.output_db);
        }
        RebuildOutcome::Published { rows, stats } => {
            let file_size = std::fs::metadata(&options.output_db)?.len();

            println!("\n{:=<60}", "");
            println!("Rebuild complete!");
            println!("  Rows: {}", rows);
            println!(
                "  Events: {} ({:.1}% attributed to catalog)",
                stats.total_events,
                stats.attribution_rate()
            );
            println!(
                "  Exact: {}  Fuzzy: {}  Non-library: {}",
                stats.exact_events, stats.fuzzy_matched_events, stats.non_library_events
            );
            println!("  Resumes: {}  Skips: {}", stats.resume_events, stats.skip_events);
            println!("  Output size: {:.2} MB", file_size as f64 / 1_048_576.0);
            println!("  Elapsed: {:.2}s", stats.elapsed_seconds);
            println!("{:=<60}", "");
        }
    }
    Ok(())
}

fn print_report(title: &str, rows: &[ReportRow]) {
    println!("{}", title);
    for row in rows {
        println!(
            "[{}] {} - {} plays={} last={}",
            row.track_id,
            row.artist.as_deref().unwrap_or("Unknown"),
            row.name.as_deref().unwrap_or("Unknown"),
            row.play_count,
            row.last_played_at.as_deref().unwrap_or("never"),
        );
    }
    if rows.is_empty() {
        println!("No results found.");
    }
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Rebuild(args) => rebuild(args),
        Command::Report { kind } => match kind {
            ReportKind::MostPlayed { db, limit } => {
                let conn = report::open_unified(&db)?;
                print_report("Most played", &report::most_played(&conn, limit)?);
                Ok(())
            }
            ReportKind::NeverPlayed { db, limit } => {
                let conn = report::open_unified(&db)?;
                print_report("Never played", &report::never_played(&conn, limit)?);
                Ok(())
            }
        },
        Command::InitSource { db } => {
            let conn = Connection::open(&db).with_context(|| format!("Failed to open {:?}", db))?;
            conn.execute_batch(SOURCE_SCHEMA)
                .context("Failed to create source tables")?;
            println!("Source tables ready in {:?}", db);
            Ok(())
        }
    }
}
