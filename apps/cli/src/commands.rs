//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use feedlinks_core::pipeline::{
    DocumentOutcome, DocumentStatus, ProgressReporter, RunOptions, RunSummary, persist_history,
};
use feedlinks_core::source::{ConfigSource, load_feed_config};
use feedlinks_fetch::{FetchConfig, ProxyOverrides, ProxyRules, resolve_sources};
use feedlinks_shared::{AppConfig, RegexCaching, init_config, load_config, load_config_from};
use feedlinks_storage::{FileDocumentStore, LinkHistory};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// feedlinks: add matching feed entries to documents' "External links".
#[derive(Parser)]
#[command(
    name = "feedlinks",
    version,
    about = "Match feed entries against keyword/regex queries and merge them into documents' External links sections.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Use this TOML settings file instead of ~/.feedlinks/feedlinks.toml.
    #[arg(long, global = true, env = "FEEDLINKS_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Defaults to `run`.
    #[command(subcommand)]
    pub command: Option<Command>,
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
    /// Fetch feeds and merge matching entries into the target documents.
    Run(RunArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Where the feed config is read from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum ConfigType {
    /// A local JSON file (`--config-path`).
    #[default]
    File,
    /// A document in the document store (`--config-document`), falling back
    /// to the local file.
    Document,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum RegexCachingArg {
    Cached,
    PerEvaluation,
}

impl From<RegexCachingArg> for RegexCaching {
    fn from(arg: RegexCachingArg) -> Self {
        match arg {
            RegexCachingArg::Cached => RegexCaching::Cached,
            RegexCachingArg::PerEvaluation => RegexCaching::PerEvaluation,
        }
    }
}

/// Options of the `run` command. Unset options fall back to the settings
/// file, then to built-in defaults.
#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Feed config source.
    #[arg(long, value_enum, default_value_t = ConfigType::File)]
    pub config_type: ConfigType,

    /// Local feed config file.
    #[arg(long)]
    pub config_path: Option<String>,

    /// Document holding the feed config (with `--config-type document`).
    #[arg(long)]
    pub config_document: Option<String>,

    /// Directory of the file-backed document store.
    #[arg(long)]
    pub documents_dir: Option<String>,

    /// How many documents to preload at once.
    #[arg(long)]
    pub group: Option<usize>,

    /// Same proxy for HTTP and HTTPS on every source.
    #[arg(long)]
    pub proxy: Option<String>,

    /// HTTP proxy for every source.
    #[arg(long)]
    pub http_proxy: Option<String>,

    /// HTTPS proxy for every source.
    #[arg(long)]
    pub https_proxy: Option<String>,

    /// JSON file of `regex -> proxy` routing rules.
    #[arg(long)]
    pub proxies_path: Option<String>,

    /// Link history file.
    #[arg(long)]
    pub history_path: Option<String>,

    /// How many times a link may be added to the same document across runs.
    #[arg(long)]
    pub max_add: Option<u32>,

    /// Width of the feed fetch pool.
    #[arg(long)]
    pub workers: Option<usize>,

    /// HTTP timeout per feed, in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Regex compilation strategy.
    #[arg(long, value_enum)]
    pub regex_caching: Option<RegexCachingArg>,

    /// Print revised text instead of saving; history is not written.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip target documents that do not exist instead of creating them.
    #[arg(long)]
    pub skip_missing: bool,
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
        0 => "feedlinks=info",
        1 => "feedlinks=debug",
        _ => "feedlinks=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let settings = cli.settings;
    match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Run(args) => cmd_run(args, settings.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(settings.as_deref()).await,
        },
    }
}

fn app_config(settings: Option<&Path>) -> Result<AppConfig> {
    Ok(match settings {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(args: RunArgs, settings: Option<&Path>) -> Result<()> {
    let config = app_config(settings)?;

    let documents_dir = args
        .documents_dir
        .unwrap_or(config.paths.documents_dir);
    let store = FileDocumentStore::new(&documents_dir);

    let config_path = PathBuf::from(args.config_path.unwrap_or(config.paths.config_path));
    let source = match args.config_type {
        ConfigType::File => ConfigSource::File(config_path),
        ConfigType::Document => ConfigSource::Document {
            name: args
                .config_document
                .unwrap_or(config.paths.config_document),
            fallback: config_path,
        },
    };
    let feed_config = load_feed_config(&source, &store).await?;
    if feed_config.sources.is_empty() {
        warn!("feed config lists no sources");
    }

    let overrides = ProxyOverrides {
        proxy: args.proxy.or(config.proxy.proxy),
        http_proxy: args.http_proxy.or(config.proxy.http_proxy),
        https_proxy: args.https_proxy.or(config.proxy.https_proxy),
    };
    let rules = match args.proxies_path.or(config.paths.proxies_path) {
        Some(path) => ProxyRules::load(Path::new(&path))?,
        None => ProxyRules::default(),
    };
    let sources = resolve_sources(&overrides, &rules, &feed_config.unique_sources());

    let history_path = args
        .history_path
        .or(config.paths.history_path)
        .map(PathBuf::from);
    let mut history = match &history_path {
        Some(path) => LinkHistory::load(path).await?,
        None => LinkHistory::new(),
    };

    let group = args.group.unwrap_or(config.defaults.group);
    if group == 0 {
        return Err(eyre!("--group must be at least 1"));
    }
    let workers = args.workers.unwrap_or(config.defaults.fetch_workers);
    if workers == 0 {
        return Err(eyre!("--workers must be at least 1"));
    }

    let options = RunOptions {
        max_add: args.max_add.unwrap_or(config.defaults.max_add),
        group,
        dry_run: args.dry_run,
        skip_missing: args.skip_missing || config.defaults.skip_missing,
        regex_caching: args
            .regex_caching
            .map(RegexCaching::from)
            .unwrap_or(config.defaults.regex_caching),
        fetch: FetchConfig {
            workers,
            timeout: Duration::from_secs(args.timeout.unwrap_or(config.defaults.fetch_timeout_secs)),
        },
    };

    info!(
        sources = sources.len(),
        queries = feed_config.queries.len(),
        documents_dir = %documents_dir,
        max_add = options.max_add,
        dry_run = options.dry_run,
        regex_caching = ?options.regex_caching,
        "running feed merge"
    );

    let reporter = CliProgress::new(options.dry_run);
    let summary = feedlinks_core::pipeline::run(
        &feed_config,
        &sources,
        &store,
        &mut history,
        &options,
        &reporter,
    )
    .await?;

    persist_history(&history, history_path.as_deref(), options.dry_run).await?;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    if summary.dry_run {
        println!("  Dry run complete (nothing saved).");
    } else {
        println!("  Run complete!");
    }
    println!("  Run ID:     {}", summary.run_id);
    println!(
        "  Documents:  {} processed, {} updated",
        summary.documents_processed, summary.documents_updated
    );
    println!("  Links:      {} added", summary.entries_added);
    println!(
        "  Feeds:      {} fetched, {} failed",
        summary.feeds_fetched, summary.feeds_failed
    );
    println!("  Warnings:   {}", summary.warnings);
    println!("  Errors:     {}", summary.errors);
    println!("  Time:       {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

const SEPARATOR_WIDTH: usize = 80;

/// CLI progress reporter using an indicatif spinner. In dry runs the revised
/// text of each updated document is printed between separators.
struct CliProgress {
    spinner: ProgressBar,
    dry_run: bool,
}

impl CliProgress {
    fn new(dry_run: bool) -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .map(|style| {
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            })
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner, dry_run }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn feed_fetched(&self, source: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Fetching [{current}/{total}] {source}"));
    }

    fn document_done(&self, outcome: &DocumentOutcome, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Updating [{current}/{total}] {}", outcome.document));

        if !self.dry_run {
            return;
        }
        if let (DocumentStatus::Updated { added }, Some(text)) =
            (&outcome.status, &outcome.revised_text)
        {
            self.spinner.suspend(|| {
                print!(
                    "{}",
                    separator(&format!("Document \"{}\"", outcome.document), '=', SEPARATOR_WIDTH)
                );
                print!(
                    "{}",
                    separator(&format!("Revised text (+{added})"), '-', SEPARATOR_WIDTH)
                );
                println!("{text}");
                println!();
            });
        }
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

/// A full-width separator line with `title` centred in it, newline
/// terminated. Titles too long to centre go on their own line below.
fn separator(title: &str, ch: char, width: usize) -> String {
    let len = title.chars().count();
    let inner = width.saturating_sub(2);

    if len == 0 {
        return format!("{}\n", ch.to_string().repeat(width));
    }
    if len < inner {
        let left = (inner - len) / 2;
        let right = inner - len - left;
        return format!(
            "{} {title} {}\n",
            ch.to_string().repeat(left),
            ch.to_string().repeat(right)
        );
    }
    format!("{}\n\n{title}:\n", ch.to_string().repeat(width))
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(settings: Option<&Path>) -> Result<()> {
    let config = app_config(settings)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_centres_short_titles() {
        let line = separator("Revised text", '-', 20);
        assert_eq!(line, "--- Revised text ---\n");
        assert_eq!(line.trim_end().chars().count(), 20);

        let odd = separator("abc", '=', 10);
        assert_eq!(odd, "== abc ===\n");
    }

    #[test]
    fn separator_moves_long_titles_below() {
        assert_eq!(separator("a long title", '-', 10), "----------\n\na long title:\n");
        assert_eq!(separator("", '=', 4), "====\n");
    }

    #[test]
    fn cli_defaults_to_run() {
        let cli = Cli::try_parse_from(["feedlinks"]).expect("parse");
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from([
            "feedlinks",
            "run",
            "--config-type",
            "document",
            "--max-add",
            "2",
            "--regex-caching",
            "per-evaluation",
            "--dry-run",
        ])
        .expect("parse run");
        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config_type, ConfigType::Document);
        assert_eq!(args.max_add, Some(2));
        assert!(matches!(args.regex_caching, Some(RegexCachingArg::PerEvaluation)));
        assert!(args.dry_run);
    }
}
