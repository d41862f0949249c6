//! Mutating commands: `clear`, `sweep` and `evict`

use super::{OutputFormat, to_json};
use diskmemo::DiskCache;
use std::time::Duration;

pub fn clear(cache: &DiskCache, format: OutputFormat) -> miette::Result<String> {
    let removed = cache.clear_root()?;
    tracing::info!(removed, "Cleared cache root");
    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "removed": removed })),
        OutputFormat::Text => Ok(format!("Removed {removed} cache instances")),
    }
}

pub fn sweep(cache: &DiskCache, older_than_secs: u64, format: OutputFormat) -> miette::Result<String> {
    let swept = cache.sweep_orphans(Duration::from_secs(older_than_secs))?;
    match format {
        OutputFormat::Json => to_json(&serde_json::json!({ "swept": swept })),
        OutputFormat::Text => Ok(format!("Removed {swept} uncommitted instances")),
    }
}

pub fn evict(cache: &DiskCache, format: OutputFormat) -> miette::Result<String> {
    let report = cache.enforce_limits()?;
    match format {
        OutputFormat::Json => to_json(&report),
        OutputFormat::Text => {
            let mut out = format!(
                "Evicted {} instances; {} left ({} bytes)",
                report.evicted.len(),
                report.stats.instance_count,
                report.stats.total_size_bytes
            );
            if report.shortfall {
                out.push_str("\nwarning: limits still exceeded");
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::populated_root;
    use super::*;

    #[test]
    fn test_sweep_keeps_committed_instances() {
        let (tmp, config) = populated_root(2);
        std::fs::create_dir(tmp.path().join("half-written__cache")).unwrap();
        let cache = DiskCache::open(&config).unwrap();

        let out = sweep(&cache, 0, OutputFormat::Text).unwrap();
        assert_eq!(out, "Removed 1 uncommitted instances");
        assert_eq!(cache.root_stats().unwrap().instance_count, 2);
    }

    #[test]
    fn test_evict_text_reports_shortfall() {
        let (_tmp, config) = populated_root(2);
        let cache = DiskCache::open(&config.max_total_size_bytes(10)).unwrap();
        let out = evict(&cache, OutputFormat::Text).unwrap();
        assert!(out.starts_with("Evicted 1 instances; 1 left"));
        assert!(out.ends_with("warning: limits still exceeded"));
    }
}
