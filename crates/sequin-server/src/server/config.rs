use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use sequin::{
    BusinessTypeConfig, BusinessTypeRegistry, LedgerConfig, RegistryConfig, StrategyKind,
    VolatileConfig,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    path::{Path, PathBuf},
};

/// Output format of the log subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Multi-line, human-readable output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Runtime configuration for the `sequin-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults matching the library's
/// [`RegistryConfig::default`].
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sequin-server",
    version,
    about = "An HTTP service for segment-based ID allocation"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Strategy for business types without an explicit entry. Accepts
    /// `volatile`/`redis` and `ledger`/`postgresql`/`postgres`.
    ///
    /// Environment variable: `DEFAULT_STRATEGY`
    #[arg(long, env = "DEFAULT_STRATEGY", default_value_t = String::from("volatile"))]
    pub default_strategy: String,

    /// JSON file mapping business types to `{ strategy, batchSize,
    /// startValue }`.
    ///
    /// Environment variable: `BUSINESS_TYPES_FILE`
    #[arg(long = "business-types", env = "BUSINESS_TYPES_FILE")]
    pub business_types: Option<PathBuf>,

    /// Prefix for every key the volatile strategy writes.
    ///
    /// Environment variable: `VOLATILE_NAMESPACE`
    #[arg(long, env = "VOLATILE_NAMESPACE", default_value_t = String::from("sequin:id:"))]
    pub volatile_namespace: String,

    /// Expiry of volatile counters in seconds, refreshed on every claim. An
    /// expired counter restarts from its start value, so leave this unset
    /// unless IDs only need to be unique within the window.
    ///
    /// Environment variable: `VOLATILE_TTL_SECS`
    #[arg(long, env = "VOLATILE_TTL_SECS")]
    pub volatile_ttl_secs: Option<u64>,

    /// Default batch size for volatile business types.
    ///
    /// Environment variable: `VOLATILE_BATCH_SIZE`
    #[arg(long, env = "VOLATILE_BATCH_SIZE", default_value_t = 100)]
    pub volatile_batch_size: u32,

    /// Table holding the ledger counter rows.
    ///
    /// Environment variable: `LEDGER_TABLE`
    #[arg(long, env = "LEDGER_TABLE", default_value_t = String::from("id_generator"))]
    pub ledger_table: String,

    /// Default batch size for ledger business types.
    ///
    /// Environment variable: `LEDGER_BATCH_SIZE`
    #[arg(long, env = "LEDGER_BATCH_SIZE", default_value_t = 1000)]
    pub ledger_batch_size: u32,

    /// Compare-and-swap attempts per ledger claim before giving up.
    ///
    /// Environment variable: `LEDGER_MAX_ATTEMPTS`
    #[arg(long, env = "LEDGER_MAX_ATTEMPTS", default_value_t = 32)]
    pub ledger_max_attempts: u32,

    /// First backoff delay after a lost compare-and-swap, in milliseconds.
    ///
    /// Environment variable: `LEDGER_BACKOFF_BASE_MS`
    #[arg(long, env = "LEDGER_BACKOFF_BASE_MS", default_value_t = 1)]
    pub ledger_backoff_base_ms: u64,

    /// Ceiling of the exponential backoff, in milliseconds.
    ///
    /// Environment variable: `LEDGER_BACKOFF_MAX_MS`
    #[arg(long, env = "LEDGER_BACKOFF_MAX_MS", default_value_t = 50)]
    pub ledger_backoff_max_ms: u64,

    /// Log output format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub registry: RegistryConfig,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let server_addr: SocketAddr = args
            .server_addr
            .parse()
            .with_context(|| format!("SERVER_ADDR is not a socket address: {}", args.server_addr))?;

        let default_strategy: StrategyKind = args.default_strategy.parse()?;

        if args.volatile_namespace.is_empty() {
            bail!("VOLATILE_NAMESPACE must not be empty");
        }
        if args.volatile_ttl_secs == Some(0) {
            bail!("VOLATILE_TTL_SECS must be greater than 0 when set");
        }
        if args.ledger_table.is_empty() {
            bail!("LEDGER_TABLE must not be empty");
        }
        if args.ledger_max_attempts == 0 {
            bail!("LEDGER_MAX_ATTEMPTS must be greater than 0");
        }
        if args.ledger_backoff_base_ms > args.ledger_backoff_max_ms {
            bail!(
                "LEDGER_BACKOFF_BASE_MS ({}) exceeds LEDGER_BACKOFF_MAX_MS ({})",
                args.ledger_backoff_base_ms,
                args.ledger_backoff_max_ms
            );
        }

        let business_types = match &args.business_types {
            Some(path) => load_business_types(path)?,
            None => HashMap::new(),
        };

        let registry = RegistryConfig {
            default_strategy,
            volatile: VolatileConfig {
                namespace: args.volatile_namespace,
                ttl_secs: args.volatile_ttl_secs,
                batch_size: args.volatile_batch_size,
            },
            ledger: LedgerConfig {
                table: args.ledger_table,
                batch_size: args.ledger_batch_size,
                max_attempts: args.ledger_max_attempts,
                backoff_base_ms: args.ledger_backoff_base_ms,
                backoff_max_ms: args.ledger_backoff_max_ms,
            },
            business_types,
        };

        // Catches zero batch sizes and bad entries before the listener binds.
        BusinessTypeRegistry::from_config(&registry)?;

        Ok(Self {
            server_addr,
            registry,
            log_format: args.log_format,
        })
    }
}

fn load_business_types(path: &Path) -> anyhow::Result<HashMap<String, BusinessTypeConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read business types from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse business types in {}", path.display()))
}
