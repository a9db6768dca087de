//! Cloak - command-line masking and unmasking
//!
//! Reads text from a file or stdin and writes the result to stdout. Token
//! mappings live in a JSON store file so a later `cloak unmask` can restore
//! the values a `cloak mask` replaced.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use cloak::config::{CustomPattern, StoreConfig};
use cloak::{Cloak, CloakConfig};

/// Cloak - reversible PII masking for free text
#[derive(Parser, Debug)]
#[command(name = "cloak")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Token store file
    #[arg(short = 's', long = "store", env = "CLOAK_STORE", global = true)]
    store: Option<PathBuf>,

    /// Token lifetime in seconds
    #[arg(long = "ttl", global = true)]
    ttl: Option<u64>,

    /// Environment variable holding the hex encoded encryption key
    #[arg(long = "key-env", global = true)]
    key_env: Option<String>,

    /// Timeout for each store call in milliseconds
    #[arg(long = "store-timeout-ms", global = true)]
    store_timeout_ms: Option<u64>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long = "json-logs", global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replace sensitive values with tokens
    Mask {
        #[command(flatten)]
        io: IoArgs,

        /// Built-in detector to run (repeatable, default: all; `none` runs
        /// only custom patterns)
        #[arg(short = 'd', long = "detector", value_enum)]
        detectors: Vec<BuiltinKind>,

        /// Custom detector given as TYPE=REGEX (repeatable)
        #[arg(short = 'p', long = "pattern", value_parser = parse_pattern)]
        patterns: Vec<CustomPattern>,

        /// Phone numbering region, e.g. US, GB, NL, DE, INTL (repeatable)
        #[arg(short = 'r', long = "region")]
        regions: Vec<String>,

        /// Print a JSON report instead of the bare masked text
        #[arg(long = "report")]
        report: bool,
    },
    /// Restore tokens from the store
    Unmask {
        #[command(flatten)]
        io: IoArgs,

        /// Fail when any token could not be restored
        #[arg(long = "strict")]
        strict: bool,
    },
}

#[derive(Args, Debug)]
struct IoArgs {
    /// Read input from this file instead of stdin
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BuiltinKind {
    Email,
    Phone,
    NationalId,
    CreditCard,
    /// Disable every built-in detector.
    #[value(name = "none")]
    NoBuiltins,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run(cli))
}

/// Install the tracing subscriber. Logs go to stderr so stdout carries only
/// the processed text.
fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = CloakConfig::default();
    apply_common_flags(&mut config, &cli);

    match cli.command {
        Commands::Mask {
            io,
            detectors,
            patterns,
            regions,
            report,
        } => {
            apply_detector_flags(&mut config, &detectors, patterns, regions);
            if matches!(config.store, StoreConfig::Memory { .. }) {
                warn!("No store file configured; tokens cannot be restored after exit");
            }

            let cloak = Cloak::from_config(&config).context("Failed to build masking engine")?;
            let input = read_input(io.input.as_deref()).await?;
            let masked = cloak
                .mask_report(&input, None)
                .await
                .context("Failed to mask input")?;

            info!(
                session_id = %masked.session_id,
                tokens = masked.tokens.len(),
                "Masked input"
            );

            if report {
                let json =
                    serde_json::to_string_pretty(&masked).context("Failed to encode report")?;
                write_output(&json).await?;
                write_output("\n").await
            } else {
                write_output(&masked.text).await
            }
        }
        Commands::Unmask { io, strict } => {
            if matches!(config.store, StoreConfig::Memory { .. }) {
                bail!("unmask needs a store file (--store or CLOAK_STORE)");
            }

            let cloak = Cloak::from_config(&config).context("Failed to build masking engine")?;
            let input = read_input(io.input.as_deref()).await?;
            let result = cloak.unmask(&input).await.context("Failed to unmask input")?;

            info!(
                restored = result.restored,
                unresolved = result.unresolved.len(),
                "Unmasked input"
            );
            for token in &result.unresolved {
                warn!(token = %token, "Token could not be restored");
            }

            write_output(&result.text).await?;

            if strict && !result.is_complete() {
                bail!("{} token(s) could not be restored", result.unresolved.len());
            }
            Ok(())
        }
    }
}

/// Flags shared by both subcommands.
fn apply_common_flags(config: &mut CloakConfig, cli: &Cli) {
    if let Some(path) = &cli.store {
        config.store = StoreConfig::File {
            path: path.clone(),
            ttl_seconds: cli.ttl,
        };
    } else if let Some(ttl) = cli.ttl {
        if let StoreConfig::Memory { ttl_seconds, .. } = &mut config.store {
            *ttl_seconds = Some(ttl);
        }
    }

    if let Some(key_env) = &cli.key_env {
        config.encryption.key_env = key_env.clone();
    }
    if let Some(timeout) = cli.store_timeout_ms {
        config.store_timeout_ms = Some(timeout);
    }
}

/// An explicit `--detector` list replaces the built-in set (`none` leaves it
/// empty); custom patterns are added on top.
fn apply_detector_flags(
    config: &mut CloakConfig,
    detectors: &[BuiltinKind],
    patterns: Vec<CustomPattern>,
    regions: Vec<String>,
) {
    if !detectors.is_empty() {
        let builtins = &mut config.detectors.builtins;
        builtins.email = detectors.contains(&BuiltinKind::Email);
        builtins.phone = detectors.contains(&BuiltinKind::Phone);
        builtins.national_id = detectors.contains(&BuiltinKind::NationalId);
        builtins.credit_card = detectors.contains(&BuiltinKind::CreditCard);
    }
    if !regions.is_empty() {
        config.detectors.phone_regions = regions;
    }
    config.detectors.custom.extend(patterns);
}

fn parse_pattern(raw: &str) -> Result<CustomPattern, String> {
    let (type_tag, regex) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TYPE=REGEX, got '{raw}'"))?;
    if type_tag.is_empty() || regex.is_empty() {
        return Err(format!("expected TYPE=REGEX, got '{raw}'"));
    }

    Ok(CustomPattern {
        name: type_tag.to_lowercase(),
        type_tag: type_tag.to_string(),
        regex: regex.to_string(),
    })
}

async fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read input file {}", path.display())),
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

async fn write_output(text: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(text.as_bytes())
        .await
        .context("Failed to write output")?;
    stdout.flush().await.context("Failed to write output")
}
