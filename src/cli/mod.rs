//! Command-line interface for feedgen.
//!
//! # Commands
//!
//! - `generate` - run one generator and print the converted feed
//! - `serve` - expose every generator's endpoint over HTTP
//!
//! # Global flags
//!
//! | Flag | Environment | Default | Purpose |
//! |------|-------------|---------|---------|
//! | `-c, --config` | `FEEDGEN_CONFIG` | `config.yml` | generator configuration |
//! | `-n, --no-cache` | | off | keep records in memory only |
//! | `--data-dir` | `FEEDGEN_DATA_DIR` | `data` | persistent repository directory |
//! | `--retention-days` | | 30 | age after which stored records expire |
//! | `--webdriver-url` | `FEEDGEN_WEBDRIVER_URL` | `http://localhost:9515` | browser strategy driver |
//! | `--no-sandbox` | | off | start the browser without its sandbox |
//! | `-v, --verbose` / `--quiet` | `RUST_LOG` wins | info | log level |
//!
//! # Examples
//!
//! ```bash
//! feedgen generate releases -f atom -p project=tokio
//! feedgen --no-cache generate search -q term=rust
//! feedgen -c feeds.yml serve --port 9000 --watch
//! ```
//!
//! Logs go to stderr so `generate` output can be piped.

mod generate;
mod serve;

pub use generate::{GenerateCommand, parse_key_value};
pub use serve::{ServeCommand, router};

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::fetch::HttpFetcher;
use crate::generator::FeedGenerators;
use crate::generator::browser::{DEFAULT_WEBDRIVER_URL, WebDriverBrowser};
use crate::repository::{DEFAULT_RETENTION_DAYS, Repository};

/// Default directory of the persistent repository.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Main CLI application structure for feedgen.
#[derive(Parser, Debug)]
#[command(
    name = "feedgen",
    about = "Generate RSS/Atom feeds from web pages",
    version,
    long_about = "feedgen turns web pages into RSS, Atom or HTML feeds using declarative \
                  scraping rules, templates or browser scripts."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    ///
    /// Ignored when `RUST_LOG` is set.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors.
    #[arg(long, global = true)]
    quiet: bool,

    /// Generator configuration file.
    #[arg(short, long, global = true, env = "FEEDGEN_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Keep generated records in memory instead of the data directory.
    ///
    /// Every run then starts with an empty repository, so created timestamps are not
    /// stable across runs.
    #[arg(short = 'n', long, global = true)]
    no_cache: bool,

    /// Directory of the persistent repository.
    #[arg(long, global = true, env = "FEEDGEN_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Days after which stored records expire.
    #[arg(long, global = true, default_value_t = DEFAULT_RETENTION_DAYS)]
    retention_days: i64,

    /// WebDriver server used by `browser` generators.
    #[arg(long, global = true, env = "FEEDGEN_WEBDRIVER_URL", default_value = DEFAULT_WEBDRIVER_URL)]
    webdriver_url: String,

    /// Start the browser with `--no-sandbox` (needed in most containers).
    #[arg(long, global = true)]
    no_sandbox: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one generator and print the converted feed
    Generate(GenerateCommand),

    /// Serve every generator over HTTP
    #[command(alias = "start-server")]
    Serve(ServeCommand),
}

/// Everything a command needs once the configuration is loaded.
#[derive(Debug)]
pub struct AppContext {
    pub config_path: PathBuf,
    pub generators: Arc<FeedGenerators>,
    pub repository: Repository,
}

impl AppContext {
    /// Re-read the configuration file and swap in its generator table.
    ///
    /// The running table is kept when the new configuration fails to load.
    pub fn reload(&self) -> Result<()> {
        let config = Config::load(&self.config_path)?;
        self.generators.load_config(&config)?;
        tracing::info!("Reloaded {} generator(s)", self.generators.names().len());
        Ok(())
    }
}

impl Cli {
    /// Run the selected command.
    ///
    /// The repository is opened before the command and closed exactly once after it,
    /// whether the command succeeded or not.
    pub async fn execute(self) -> Result<()> {
        self.init_logging();
        let context = self.build_context()?;

        let result = match self.command {
            Commands::Generate(cmd) => cmd.execute(&context).await,
            Commands::Serve(cmd) => cmd.execute(&context).await,
        };

        let closed = context.repository.close().context("Failed to close the repository");
        result?;
        closed
    }

    fn log_filter(&self) -> EnvFilter {
        if std::env::var("RUST_LOG").is_ok() {
            return EnvFilter::from_default_env();
        }
        let level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        };
        EnvFilter::new(format!("feedgen={level},warn"))
    }

    fn init_logging(&self) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(self.log_filter())
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    fn open_repository(&self) -> Result<Repository> {
        if self.no_cache {
            tracing::debug!("Using the in-memory repository");
            return Ok(Repository::memory());
        }
        Repository::open_disk(&self.data_dir, self.retention_days).with_context(|| {
            format!("Failed to open the repository in {}", self.data_dir.display())
        })
    }

    fn load_generators(&self, repository: Repository) -> Result<Arc<FeedGenerators>> {
        let fetcher = Arc::new(HttpFetcher::from_current_runtime()?);
        let browser = Arc::new(WebDriverBrowser::from_current_runtime(&self.webdriver_url)?);
        let generators =
            FeedGenerators::with_default_strategies(repository, fetcher, browser, self.no_sandbox)?;

        let config = Config::load(&self.config)?;
        generators.load_config(&config)?;
        tracing::debug!(
            "Loaded {} generator(s) from {}",
            generators.names().len(),
            self.config.display()
        );
        Ok(Arc::new(generators))
    }

    fn build_context(&self) -> Result<AppContext> {
        let repository = self.open_repository()?;
        match self.load_generators(repository.clone()) {
            Ok(generators) => Ok(AppContext {
                config_path: self.config.clone(),
                generators,
                repository,
            }),
            Err(e) => {
                if let Err(close_error) = repository.close() {
                    tracing::warn!("Failed to close the repository: {}", close_error);
                }
                Err(e)
            }
        }
    }
}
