//! CLI command definitions, routing, and tracing setup.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use wikidict_artifacts::{CompileOptions, Dictionary, Variant, compile, write_artifact};
use wikidict_catalog::MediaWikiCatalog;
use wikidict_core::{
    ProgressReporter, RunLog, UpdateEngine, parse_title_arg,
};
use wikidict_normalize::Normalizer;
use wikidict_shared::{
    AppConfig, init_config, load_config, load_config_from, parse_cursor,
};
use wikidict_storage::{EntryStore, write_batch};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// wikidict: sync a wiki corpus and compile offline dictionaries.
#[derive(Parser)]
#[command(
    name = "wikidict",
    version,
    about = "Keep a local copy of a wiki corpus up to date and compile it into offline dictionaries.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.wikidict/wikidict.toml).
    #[arg(long, global = true, env = "WIKIDICT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Print every article title the catalog knows, one per line.
    List {
        /// Write the list to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Pull every change since the corpus cursor (delta sync).
    Update {
        /// Corpus to update.
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the updated corpus (may equal the input).
        #[arg(short, long)]
        output: PathBuf,

        /// Sync from this instant instead of the stored cursor
        /// (RFC 3339 or YYYYMMDD[hhmmss]).
        #[arg(short = 'T', long)]
        timestamp: Option<String>,

        /// Only process entries from this position (in title order).
        #[arg(short, long, default_value_t = 0)]
        start: usize,

        /// Process at most this many entries; the rest are left out of the output.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Normalize fetched content.
        #[arg(long)]
        normalize: bool,

        /// Write the run log to a file instead of stdout.
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Fetch titles into an additive batch (not merged into any corpus).
    Fetch {
        /// Titles as `@file` (one per line) or `A|B|C`.
        #[arg(short, long)]
        titles: String,

        /// Only fetch titles missing from --input (backfill).
        #[arg(short, long, requires = "input")]
        missing: bool,

        /// Corpus checked by --missing.
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Where to write the batch.
        #[arg(short, long)]
        output: PathBuf,

        /// Normalize fetched content.
        #[arg(long)]
        normalize: bool,

        /// Write the run log to a file instead of stdout.
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Compile a corpus into a dictionary artifact.
    Compile {
        /// Corpus to compile.
        #[arg(short, long)]
        input: PathBuf,

        /// Artifact to write.
        #[arg(short, long)]
        output: PathBuf,

        /// Artifact variant: default or compat.
        #[arg(long, default_value = "default")]
        variant: String,

        /// Overwrite an existing artifact.
        #[arg(long)]
        force: bool,
    },

    /// Apply link and markup normalization to every entry of a corpus.
    Normalize {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show artifact metadata, or one article.
    Inspect {
        /// Artifact to read.
        file: PathBuf,

        /// Print the article stored under this key.
        #[arg(long)]
        key: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "wikidict=info",
        1 => "wikidict=debug",
        _ => "wikidict=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::List { output } => cmd_list(config_path, output.as_deref()).await,
        Command::Update {
            input,
            output,
            timestamp,
            start,
            limit,
            normalize,
            log,
        } => {
            cmd_update(
                config_path,
                &input,
                &output,
                timestamp.as_deref(),
                (start, limit),
                normalize,
                log.as_deref(),
            )
            .await
        }
        Command::Fetch {
            titles,
            missing,
            input,
            output,
            normalize,
            log,
        } => {
            let backfill_against = if missing { input.as_deref() } else { None };
            cmd_fetch(
                config_path,
                &titles,
                backfill_against,
                &output,
                normalize,
                log.as_deref(),
            )
            .await
        }
        Command::Compile {
            input,
            output,
            variant,
            force,
        } => cmd_compile(config_path, &input, &output, &variant, force),
        Command::Normalize { input, output } => cmd_normalize(config_path, &input, &output),
        Command::Inspect { file, key } => cmd_inspect(&file, key.as_deref()),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

fn engine(config: &AppConfig) -> Result<UpdateEngine<MediaWikiCatalog>> {
    let catalog = Arc::new(MediaWikiCatalog::new(&config.catalog)?);
    Ok(UpdateEngine::from_config(catalog, config)?)
}

/// Write the run log to `path`, or to stdout.
fn emit_log(log: &RunLog, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, log.to_string())
                .wrap_err_with(|| format!("failed to write log to {}", path.display()))?;
            info!(path = %path.display(), "run log written");
        }
        None => {
            let stdout = std::io::stdout();
            log.write_to(stdout.lock())?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn title_fetched(&self, title: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Fetching [{current}/{total}] {title}"));
    }

    fn done(&self, _log: &RunLog) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_list(config_path: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let titles = engine(&config)?.list_titles().await?;
    info!(count = titles.len(), "titles listed");

    let mut text = titles.join("\n");
    text.push('\n');
    match output {
        Some(path) => std::fs::write(path, text)
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => std::io::stdout().lock().write_all(text.as_bytes())?,
    }
    Ok(())
}

async fn cmd_update(
    config_path: Option<&Path>,
    input: &Path,
    output: &Path,
    timestamp: Option<&str>,
    (start, limit): (usize, Option<usize>),
    normalize: bool,
    log_path: Option<&Path>,
) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    config.fetch.normalize |= normalize;
    let since = timestamp.map(parse_cursor).transpose()?;

    let mut store = EntryStore::load_path(input)?;
    store.window(start, limit);

    let reporter = CliProgress::new();
    let outcome = engine(&config)?
        .delta_sync(&mut store, since, &reporter)
        .await?;

    store.save(output)?;
    emit_log(&outcome.log, log_path)
}

async fn cmd_fetch(
    config_path: Option<&Path>,
    titles: &str,
    backfill_against: Option<&Path>,
    output: &Path,
    normalize: bool,
    log_path: Option<&Path>,
) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    config.fetch.normalize |= normalize;
    let titles = parse_title_arg(titles)?;
    let engine = engine(&config)?;
    let reporter = CliProgress::new();

    let batch = match backfill_against {
        Some(input) => {
            let store = EntryStore::load_path(input)?;
            engine.backfill(&titles, &store, &reporter).await?
        }
        None => engine.fetch_titles(&titles, &reporter).await?,
    };

    write_batch(output, &batch.entries)?;
    emit_log(&batch.log, log_path)
}

fn cmd_compile(
    config_path: Option<&Path>,
    input: &Path,
    output: &Path,
    variant: &str,
    force: bool,
) -> Result<()> {
    let variant: Variant = variant.parse()?;
    if output.exists() && !force {
        return Err(eyre!(
            "output file {} already exists (use --force to overwrite)",
            output.display()
        ));
    }

    let config = resolve_config(config_path)?;
    let store = EntryStore::load_path(input)?;
    let opts = CompileOptions::from_config(&config, variant);
    let compiled = compile(&store, &opts)?;

    for (key, reason) in &compiled.report.excluded {
        warn!(key = %key, reason = %reason, "excluded from dictionary");
    }
    write_artifact(output, &compiled.bytes, force)?;

    let report = &compiled.report;
    println!();
    println!("  Dictionary compiled ({variant})");
    println!("  UUID:      {}", report.uuid);
    println!("  Total:     {}", report.total);
    println!("  Articles:  {}", report.articles);
    println!("  Ignored:   {}", report.ignored.len());
    println!("  Duplicate: {}", report.duplicates);
    println!("  Resources: {}", report.resources);
    println!("  Excluded:  {}", report.excluded.len());
    println!("  Blocks:    {}", report.blocks);
    println!("  Path:      {}", output.display());
    println!();
    Ok(())
}

fn cmd_normalize(config_path: Option<&Path>, input: &Path, output: &Path) -> Result<()> {
    let config = resolve_config(config_path)?;
    let normalizer = Normalizer::new(&config.catalog)?;
    let store = EntryStore::load_path(input)?;

    let mut normalized = store.clone();
    for entry in store.entries() {
        let mut entry = entry.clone();
        normalizer.normalize_entry(&mut entry);
        normalized.upsert(entry);
    }

    normalized.save(output)?;
    info!(entries = normalized.len(), output = %output.display(), "corpus normalized");
    Ok(())
}

fn cmd_inspect(file: &Path, key: Option<&str>) -> Result<()> {
    let dict = Dictionary::open(file)?;

    if let Some(key) = key {
        let article = dict
            .get(key)?
            .ok_or_else(|| eyre!("no entry '{key}' in {}", file.display()))?;
        println!("{}", article.text());
        return Ok(());
    }

    println!();
    println!("  UUID:     {}", dict.uuid());
    println!("  Variant:  {}", dict.variant());
    println!("  Entries:  {}", dict.len());
    println!("  Blocks:   {}", dict.block_count());
    println!("  Types:    {}", dict.content_types().join(", "));
    for (key, value) in dict.tags() {
        println!("  {key}: {value}");
    }
    println!();
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn missing_requires_input() {
        let err = Cli::try_parse_from(["wikidict", "fetch", "-t", "A|B", "-m", "-o", "out.jsonl"]);
        assert!(err.is_err());

        let ok = Cli::try_parse_from([
            "wikidict", "fetch", "-t", "A|B", "-m", "-i", "in.jsonl", "-o", "out.jsonl",
        ]);
        assert!(ok.is_ok());
    }

    #[test]
    fn update_accepts_timestamp() {
        let cli = Cli::try_parse_from([
            "wikidict", "update", "-i", "a.jsonl", "-o", "b.jsonl", "-T", "20240501",
        ])
        .unwrap();
        match cli.command {
            Command::Update { timestamp, .. } => assert_eq!(timestamp.as_deref(), Some("20240501")),
            _ => panic!("expected update"),
        }
    }

    #[test]
    fn update_window_defaults_to_whole_corpus() {
        let cli = Cli::try_parse_from(["wikidict", "update", "-i", "a.jsonl", "-o", "b.jsonl"]).unwrap();
        match cli.command {
            Command::Update { start, limit, .. } => {
                assert_eq!(start, 0);
                assert_eq!(limit, None);
            }
            _ => panic!("expected update"),
        }

        let cli = Cli::try_parse_from([
            "wikidict", "update", "-i", "a.jsonl", "-o", "b.jsonl", "-s", "100", "-l", "50",
        ])
        .unwrap();
        match cli.command {
            Command::Update { start, limit, .. } => {
                assert_eq!(start, 100);
                assert_eq!(limit, Some(50));
            }
            _ => panic!("expected update"),
        }
    }
}
