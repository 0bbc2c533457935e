//! histvault CLI: fetch, plan, symbols and cache commands.
//!
//! Commands:
//! - `fetch`: download (or load from cache) a window of archives as one table
//! - `plan`: show which monthly and daily archives a window needs
//! - `symbols`: list tradable symbols for a segment
//! - `cache status`: report cached file count and size

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use histvault_core::data::{
    parse_datetime, FetchRequest, HistoryClient, ParquetCache, StderrProgress, SymbolProvider,
    TardisProvider,
};
use histvault_core::domain::{DataKind, Interval, Segment};
use histvault_core::VaultConfig;
use log::LevelFilter;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "histvault",
    version,
    about = "histvault: historical market-data archives as tables"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory (overrides the config file).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Log debug output (probes, cache hits, retries).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a window of data and print it or write it as Parquet.
    Fetch {
        #[command(flatten)]
        window: WindowArgs,

        /// Download archives in parallel.
        #[arg(long, default_value_t = false)]
        concurrent: bool,

        /// Requests per second in concurrent mode.
        #[arg(long, default_value_t = 3.0)]
        rate_limit: f64,

        /// Disable rate limiting in concurrent mode.
        #[arg(long, default_value_t = false)]
        unlimited: bool,

        /// Store fetched archives in the cache.
        #[arg(long, default_value_t = false)]
        cache_write: bool,

        /// Write the table to this Parquet file instead of printing it.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Print per-archive progress to stderr.
        #[arg(long, default_value_t = false)]
        progress: bool,
    },
    /// Show which archives a window resolves to.
    Plan {
        #[command(flatten)]
        window: WindowArgs,
    },
    /// List tradable symbols for a segment.
    Symbols {
        /// spot, um (futures/um) or cm (futures/cm).
        #[arg(long, default_value = "spot")]
        segment: String,

        /// Only show ids containing this text.
        #[arg(long)]
        filter: Option<String>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached file count and total size.
    Status,
}

#[derive(Args)]
struct WindowArgs {
    /// Symbol, e.g. BTCUSDT or btc/usdt.
    symbol: String,

    /// klines, trades, aggTrades, bookTicker, fundingRate or metrics.
    #[arg(long, default_value = "klines")]
    kind: String,

    /// spot, um (futures/um) or cm (futures/cm).
    #[arg(long, default_value = "spot")]
    segment: String,

    /// Candle interval, e.g. 1m, 1h, 1d. Candles only.
    #[arg(long)]
    interval: Option<String>,

    /// Window start, e.g. 2024-01-01 or "2024-01-01 08:00".
    #[arg(long)]
    start: String,

    /// Window end (exclusive).
    #[arg(long)]
    end: String,

    /// IANA timezone of start/end and of the output timestamps.
    #[arg(long, default_value = "UTC")]
    tz: String,
}

impl WindowArgs {
    fn to_request(&self) -> Result<FetchRequest> {
        let kind: DataKind = self.kind.parse()?;
        let segment: Segment = self.segment.parse()?;
        let start = parse_datetime(&self.start)?;
        let end = parse_datetime(&self.end)?;

        let mut req = FetchRequest::new(&self.symbol, segment, kind, start, end).with_timezone(&self.tz);
        match (&self.interval, kind) {
            (Some(interval), DataKind::Klines) => {
                req = req.with_interval(interval.parse::<Interval>()?);
            }
            (None, DataKind::Klines) => req = req.with_interval(Interval::M1),
            (Some(_), _) => bail!("--interval only applies to klines"),
            (None, _) => {}
        }
        Ok(req)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    simple_logger::SimpleLogger::new()
        .with_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .with_utc_timestamps()
        .init()?;

    let config = load_config(cli.config.as_deref(), cli.cache_dir)?;

    match cli.command {
        Commands::Fetch {
            window,
            concurrent,
            rate_limit,
            unlimited,
            cache_write,
            output,
            progress,
        } => {
            let req = window
                .to_request()?
                .concurrent(concurrent)
                .cache_write(cache_write)
                .rate_limit(if unlimited { None } else { Some(rate_limit) });
            run_fetch(config, &req, output.as_deref(), progress)
        }
        Commands::Plan { window } => run_plan(config, &window.to_request()?),
        Commands::Symbols { segment, filter } => run_symbols(&config, &segment, filter.as_deref()),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&config),
        },
    }
}

fn load_config(path: Option<&Path>, cache_dir: Option<PathBuf>) -> Result<VaultConfig> {
    let mut config = match path {
        Some(path) => VaultConfig::from_file(path)?,
        None => VaultConfig::default(),
    };
    if let Some(dir) = cache_dir {
        config.cache_dir = dir;
    }
    Ok(config)
}

fn run_fetch(
    config: VaultConfig,
    req: &FetchRequest,
    output: Option<&Path>,
    progress: bool,
) -> Result<()> {
    let mut client = HistoryClient::new(config)?;
    if progress {
        client = client.with_progress(Arc::new(StderrProgress));
    }
    if req.cache_write {
        client.cache().ensure_root()?;
    }

    let mut df = client.fetch_data(req)?;

    match output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("create {}", path.display()))?;
            ParquetWriter::new(file)
                .finish(&mut df)
                .with_context(|| format!("write {}", path.display()))?;
            println!("Wrote {} rows to {}", df.height(), path.display());
        }
        None => println!("{df}"),
    }
    Ok(())
}

fn run_plan(config: VaultConfig, req: &FetchRequest) -> Result<()> {
    let base_url = config.base_url.clone();
    let client = HistoryClient::new(config)?;
    let plan = client.plan(req)?;

    println!("Symbol:  {}", req.normalized_symbol());
    println!("Kind:    {} ({})", req.kind, req.segment);
    println!("Source:  {base_url}");
    if let Some(gap) = &plan.gap {
        println!("Gap:     {}", gap.describe());
    }
    println!();
    println!("Monthly archives: {}", plan.months.len());
    for month in &plan.months {
        println!("  {month}");
    }
    if req.kind.has_daily_archives() {
        println!("Daily archives:   {}", plan.days.len());
        if let (Some(first), Some(last)) = (plan.days.first(), plan.days.last()) {
            println!("  {first} .. {last}");
        }
    }
    Ok(())
}

fn run_symbols(config: &VaultConfig, segment: &str, filter: Option<&str>) -> Result<()> {
    let segment: Segment = segment.parse()?;
    let provider = TardisProvider::new(config.timeout(), &config.user_agent)?;
    let symbols = provider.symbols(segment)?;

    let filter = filter.map(|f| f.to_ascii_uppercase());
    let mut shown = 0;
    println!("{:<20} {:<10} {:<12} {:<12}", "Symbol", "Type", "Since", "Until");
    println!("{}", "-".repeat(56));
    for symbol in symbols.values() {
        if let Some(f) = &filter {
            if !symbol.id.contains(f.as_str()) {
                continue;
            }
        }
        let until = symbol
            .available_to
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<20} {:<10} {:<12} {:<12}",
            symbol.id,
            format!("{:?}", symbol.symbol_type).to_lowercase(),
            symbol.available_since.format("%Y-%m-%d"),
            until
        );
        shown += 1;
    }
    println!();
    println!("{shown} symbol(s)");
    Ok(())
}

fn run_cache_status(config: &VaultConfig) -> Result<()> {
    let cache = ParquetCache::new(&config.cache_dir);
    if !cache.root().exists() {
        println!("Cache directory does not exist: {}", cache.root().display());
        return Ok(());
    }

    let status = cache.status()?;
    if status.files == 0 && status.quarantined == 0 {
        println!("Cache is empty: {}", cache.root().display());
        return Ok(());
    }

    println!("Cache:       {}", cache.root().display());
    println!("Archives:    {}", status.files);
    println!("Total size:  {}", format_size(status.bytes));
    if status.quarantined > 0 {
        println!("Quarantined: {}", status.quarantined);
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
