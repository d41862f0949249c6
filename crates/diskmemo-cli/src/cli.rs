use crate::commands::{Command, OutputFormat};
use clap::{Parser, Subcommand};
use diskmemo::CacheConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "diskmemo")]
#[command(about = "Inspect and maintain diskmemo cache roots")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'r',
        long,
        global = true,
        env = "DISKMEMO_CACHE_DIR",
        help = "Cache root directory"
    )]
    pub root: Option<PathBuf>,

    #[arg(
        short = 'c',
        long,
        global = true,
        help = "Path to a TOML cache configuration"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Cache name used to locate the default root",
        default_value = diskmemo::DEFAULT_CACHE_NAME
    )]
    pub name: String,

    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: crate::tracing::LogLevel,

    #[arg(
        long,
        global = true,
        help = "Command output format",
        default_value = "text",
        value_enum
    )]
    pub format: OutputFormat,

    #[arg(long, global = true, help = "Output logs in JSON format")]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Show instance count and total size of the cache root")]
    Stats,
    #[command(about = "List cache instances")]
    List,
    #[command(about = "Delete every cache instance")]
    Clear,
    #[command(about = "Delete uncommitted instances left behind by interrupted runs")]
    Sweep {
        #[arg(
            long,
            help = "Only remove instances older than this many seconds",
            default_value_t = 3600
        )]
        older_than_secs: u64,
    },
    #[command(about = "Evict least recently used instances until the root fits the limits")]
    Evict {
        #[arg(long, help = "Maximum total size in MiB")]
        max_size_mb: Option<f64>,
        #[arg(long, help = "Maximum number of instances")]
        max_instances: Option<usize>,
    },
}

impl From<Commands> for Command {
    fn from(cmd: Commands) -> Self {
        match cmd {
            Commands::Stats => Self::Stats,
            Commands::List => Self::List,
            Commands::Clear => Self::Clear,
            Commands::Sweep { older_than_secs } => Self::Sweep { older_than_secs },
            Commands::Evict {
                max_size_mb,
                max_instances,
            } => Self::Evict {
                max_size_mb,
                max_instances,
            },
        }
    }
}

impl Cli {
    /// Cache configuration from `--config`, with `--root` taking precedence.
    pub fn cache_config(&self) -> miette::Result<CacheConfig> {
        let config = match &self.config {
            Some(path) => CacheConfig::from_file(path)?,
            None => CacheConfig::default(),
        };
        Ok(match &self.root {
            Some(root) => config.root(root),
            None => config,
        })
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
