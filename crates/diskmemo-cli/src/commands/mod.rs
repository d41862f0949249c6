//! Subcommand execution
//!
//! Every command opens the cache from a [`CacheConfig`] and returns its
//! rendered output; printing is left to `main`.

mod inspect;
mod maintain;

use diskmemo::{CacheConfig, DiskCache};

/// Command output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

/// A parsed subcommand
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Stats,
    List,
    Clear,
    Sweep {
        older_than_secs: u64,
    },
    Evict {
        max_size_mb: Option<f64>,
        max_instances: Option<usize>,
    },
}

impl Command {
    /// Name used in log spans
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Stats => "stats",
            Self::List => "list",
            Self::Clear => "clear",
            Self::Sweep { .. } => "sweep",
            Self::Evict { .. } => "evict",
        }
    }
}

/// Run `command` against the cache described by `config`.
pub fn execute(
    command: &Command,
    name: &str,
    config: &CacheConfig,
    format: OutputFormat,
) -> miette::Result<String> {
    let span = tracing::info_span!("command", command = command.name());
    let _guard = span.enter();

    match command {
        Command::Stats => inspect::stats(&open(name, config)?, format),
        Command::List => inspect::list(&open(name, config)?, format),
        Command::Clear => maintain::clear(&open(name, config)?, format),
        Command::Sweep { older_than_secs } => {
            maintain::sweep(&open(name, config)?, *older_than_secs, format)
        }
        Command::Evict {
            max_size_mb,
            max_instances,
        } => {
            let mut config = config.clone();
            if let Some(mb) = max_size_mb {
                config = config.max_total_size_mb(*mb);
            }
            if let Some(count) = max_instances {
                config = config.max_instance_count(*count);
            }
            if config.max_total_size_bytes.is_none() && config.max_instance_count.is_none() {
                return Err(miette::miette!(
                    help = "pass --max-size-mb and/or --max-instances, or set them in the config file",
                    "No eviction limits configured"
                ));
            }
            maintain::evict(&open(name, &config)?, format)
        }
    }
}

fn open(name: &str, config: &CacheConfig) -> miette::Result<DiskCache> {
    let cache = DiskCache::open_named(name, config)?;
    tracing::debug!(root = %cache.root().path().display(), "Opened cache root");
    Ok(cache)
}

fn to_json<T: serde::Serialize>(value: &T) -> miette::Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| miette::miette!("Failed to render JSON output: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use diskmemo::{BoxError, Computed, Descriptor};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Job {
        n: u32,
    }

    impl Descriptor for Job {}

    /// Root with `count` committed instances of 1 KiB each.
    pub(super) fn populated_root(count: u32) -> (TempDir, CacheConfig) {
        let tmp = TempDir::new().unwrap();
        let config = CacheConfig::new().root(tmp.path());
        let cache = DiskCache::open(&config).unwrap();
        for n in 0..count {
            cache
                .get_or_compute(&Job { n }, || {
                    Ok::<_, BoxError>(Computed::single(vec![0_u8; 1024]))
                })
                .unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        (tmp, config)
    }

    #[test]
    fn test_stats_json() {
        let (_tmp, config) = populated_root(2);
        let out = execute(&Command::Stats, "default", &config, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["instance_count"], 2);
        assert!(value["total_size_bytes"].as_u64().unwrap() > 2048);
    }

    #[test]
    fn test_list_text_shows_every_instance() {
        let (_tmp, config) = populated_root(3);
        let out = execute(&Command::List, "default", &config, OutputFormat::Text).unwrap();
        assert_eq!(out.lines().filter(|l| l.contains("__cache")).count(), 3);
        assert!(out.contains("committed"));
    }

    #[test]
    fn test_evict_requires_a_limit() {
        let (_tmp, config) = populated_root(1);
        let command = Command::Evict {
            max_size_mb: None,
            max_instances: None,
        };
        assert!(execute(&command, "default", &config, OutputFormat::Text).is_err());
    }

    #[test]
    fn test_evict_down_to_limit() {
        let (_tmp, config) = populated_root(4);
        let command = Command::Evict {
            max_size_mb: None,
            max_instances: Some(1),
        };
        let out = execute(&command, "default", &config, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["evicted"].as_array().unwrap().len(), 3);
        assert_eq!(value["stats"]["instance_count"], 1);
        assert_eq!(value["shortfall"], false);
    }

    #[test]
    fn test_clear_then_stats() {
        let (_tmp, config) = populated_root(2);
        let out = execute(&Command::Clear, "default", &config, OutputFormat::Text).unwrap();
        assert_eq!(out, "Removed 2 cache instances");
        let out = execute(&Command::Stats, "default", &config, OutputFormat::Text).unwrap();
        assert!(out.starts_with("Instances: 0"));
    }
}
