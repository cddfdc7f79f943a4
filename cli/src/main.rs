//! vaultindex CLI — run the vault event indexer and inspect its state.
//!
//! # Commands
//! ```text
//! vaultindex run     --vault-address <felt> --database-url <url> [--start-block N]
//! vaultindex status  --database-url <url> [--json]
//! ```
//!
//! Every flag also reads an environment variable (see `--help`), so a
//! container can be configured entirely through its environment.

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::error;
use vaultindex_core::config::DEFAULT_STREAM_URL;
use vaultindex_core::{BackoffConfig, DecodeFailurePolicy, IndexerConfig};

mod cmd_run;
mod cmd_status;
mod logging;

use logging::LogConfig;

#[derive(Parser, Debug)]
#[command(
    name = "vaultindex",
    about = "Vault event indexer — streams RedeemRequested, RedeemClaimed and Report events into a database",
    version
)]
struct Cli {
    /// Global log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Per-crate overrides, e.g. `vaultindex_stream=debug,sqlx=warn`
    #[arg(long, env = "LOG_COMPONENTS", value_delimiter = ',', global = true)]
    log_component: Vec<String>,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream vault events into the database until stopped
    Run(RunArgs),

    /// Show persisted watermarks and the block a run would resume from
    Status(StatusArgs),
}

/// Options shared by every command that resolves a resume point.
#[derive(Args, Debug, Clone)]
struct ResumeArgs {
    /// `sqlite:<path>`, `postgres://...` or `memory`
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Lowest block to stream from
    #[arg(long, env = "START_BLOCK", default_value_t = 0)]
    start_block: u64,

    /// Stream from --start-block even if later blocks are already stored
    #[arg(long, env = "FORCE_START_BLOCK")]
    force_start_block: bool,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    resume: ResumeArgs,

    /// Vault contract address
    #[arg(long, env = "VAULT_ADDRESS")]
    vault_address: String,

    /// Event stream endpoint
    #[arg(long, env = "STREAM_URL", default_value = DEFAULT_STREAM_URL)]
    stream_url: String,

    /// Bearer token for the stream endpoint
    #[arg(long, env = "APIBARA_TOKEN", hide_env_values = true)]
    stream_token: Option<String>,

    /// Records per event type buffered before an early flush
    #[arg(long, env = "BATCH_SIZE", default_value_t = 100)]
    batch_size: usize,

    #[arg(long, env = "BACKOFF_BASE_MS", default_value_t = 1_000)]
    backoff_base_ms: u64,

    #[arg(long, env = "BACKOFF_MAX_DELAY_MS", default_value_t = 60_000)]
    backoff_max_delay_ms: u64,

    #[arg(long, env = "BACKOFF_CAP_EXPONENT", default_value_t = 6)]
    backoff_cap_exponent: u32,

    #[arg(long, env = "BACKOFF_MAX_JITTER_MS", default_value_t = 500)]
    backoff_max_jitter_ms: u64,

    /// Transient stream failures tolerated before giving up
    #[arg(long, env = "MAX_RECONNECT_ATTEMPTS", default_value_t = 10)]
    max_reconnect_attempts: u32,

    /// `skip` (log and count) or `abort`
    #[arg(long, env = "DECODE_FAILURE_POLICY", default_value = "skip")]
    decode_failure_policy: DecodeFailurePolicy,
}

impl RunArgs {
    fn to_config(&self) -> IndexerConfig {
        IndexerConfig {
            vault_address: self.vault_address.clone(),
            stream_url: self.stream_url.clone(),
            auth_token: self.stream_token.clone(),
            start_block: self.resume.start_block,
            force_start_block: self.resume.force_start_block,
            batch_size: self.batch_size,
            backoff: BackoffConfig {
                base_delay_ms: self.backoff_base_ms,
                max_delay_ms: self.backoff_max_delay_ms,
                cap_exponent: self.backoff_cap_exponent,
                max_jitter_ms: self.backoff_max_jitter_ms,
                max_retries: self.max_reconnect_attempts,
            },
            decode_failure_policy: self.decode_failure_policy,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct StatusArgs {
    #[command(flatten)]
    resume: ResumeArgs,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log = LogConfig {
        level: cli.log_level.clone(),
        json: cli.log_json,
        ..LogConfig::default()
    }
    .with_components(cli.log_component.iter().map(String::as_str));
    logging::init_tracing(&log);

    let result = match cli.command {
        Commands::Run(args) => cmd_run::run(args).await,
        Commands::Status(args) => cmd_status::run(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "vaultindex failed");
            ExitCode::FAILURE
        }
    }
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
    fn run_flags_build_the_config() {
        let cli = Cli::try_parse_from([
            "vaultindex",
            "run",
            "--database-url",
            "sqlite:./vault.db",
            "--vault-address",
            "0x0123",
            "--start-block",
            "640000",
            "--force-start-block",
            "--batch-size",
            "25",
            "--max-reconnect-attempts",
            "4",
            "--decode-failure-policy",
            "abort",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = args.to_config();
        assert_eq!(config.vault_address, "0x0123");
        assert_eq!(config.start_block, 640_000);
        assert!(config.force_start_block);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.backoff.max_retries, 4);
        assert_eq!(config.decode_failure_policy, DecodeFailurePolicy::Abort);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_decode_policy_is_rejected() {
        let parsed = Cli::try_parse_from([
            "vaultindex",
            "run",
            "--database-url",
            "memory",
            "--vault-address",
            "0x1",
            "--decode-failure-policy",
            "retry",
        ]);
        assert!(parsed.is_err());
    }
}
