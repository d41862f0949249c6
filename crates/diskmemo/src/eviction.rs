//! Least-recently-used eviction under size and count ceilings
//!
//! Runs after every successful commit. Instances are ranked by their
//! last-usage marker (falling back to the directory modification time) and
//! removed oldest first until the root fits the configured limits. The
//! freshly committed instance is exempt, and the root is never emptied.

use crate::diagnostics::{CacheEvent, Diagnostics};
use crate::instance::CacheInstance;
use crate::root::{CacheRoot, RootStats};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Size and count ceilings for a cache root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionPolicy {
    /// Maximum total size of the root in bytes
    pub max_total_size_bytes: Option<u64>,
    /// Maximum number of instances in the root
    pub max_instance_count: Option<usize>,
}

/// Outcome of one eviction pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    /// Ids of removed instances, in removal order
    pub evicted: Vec<String>,
    /// Root statistics after the pass
    pub stats: RootStats,
    /// Whether limits are still exceeded
    pub shortfall: bool,
}

impl EvictionPolicy {
    /// No limits
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_total_size_bytes: None,
            max_instance_count: None,
        }
    }

    /// Whether any configured limit is set
    #[must_use]
    pub const fn is_limited(&self) -> bool {
        self.max_total_size_bytes.is_some() || self.max_instance_count.is_some()
    }

    /// Whether `stats` violate any configured limit
    #[must_use]
    pub fn is_exceeded(&self, stats: &RootStats) -> bool {
        self.max_total_size_bytes
            .is_some_and(|max| stats.total_size_bytes > max)
            || self
                .max_instance_count
                .is_some_and(|max| stats.instance_count > max)
    }

    /// Reject zero limits
    pub fn validate(&self) -> Result<()> {
        if self.max_total_size_bytes == Some(0) {
            return Err(Error::configuration(
                "max_total_size_bytes must be greater than zero",
            ));
        }
        if self.max_instance_count == Some(0) {
            return Err(Error::configuration(
                "max_instance_count must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Remove least recently used instances other than `exempt` until the
    /// root satisfies this policy or only one instance remains.
    pub fn enforce(
        &self,
        root: &CacheRoot,
        exempt: &str,
        diagnostics: &dyn Diagnostics,
    ) -> Result<EvictionReport> {
        let mut stats = root.stats()?;
        let mut report = EvictionReport {
            stats,
            ..EvictionReport::default()
        };
        if !self.is_exceeded(&stats) {
            return Ok(report);
        }

        tracing::info!(
            instance_count = stats.instance_count,
            total_size_bytes = stats.total_size_bytes,
            max_total_size_bytes = ?self.max_total_size_bytes,
            max_instance_count = ?self.max_instance_count,
            "Cache root exceeds its limits, evicting least recently used instances"
        );

        let candidates = rank_candidates(root, exempt, diagnostics)?;
        for candidate in candidates {
            if !self.is_exceeded(&stats) || stats.instance_count <= 1 {
                break;
            }
            match candidate.remove() {
                Ok(()) => {
                    diagnostics.emit(CacheEvent::Evicted {
                        instance: candidate.id().to_string(),
                    });
                    report.evicted.push(candidate.id().to_string());
                }
                Err(e) => diagnostics.emit(CacheEvent::EvictionFailed {
                    instance: candidate.id().to_string(),
                    reason: e.to_string(),
                }),
            }
            stats = root.stats()?;
        }

        report.stats = stats;
        if self.is_exceeded(&stats) {
            report.shortfall = true;
            diagnostics.emit(CacheEvent::EvictionShortfall {
                instance_count: stats.instance_count,
                total_size_bytes: stats.total_size_bytes,
                max_total_size_bytes: self.max_total_size_bytes,
                max_instance_count: self.max_instance_count,
            });
        }
        Ok(report)
    }
}

/// Every instance except `exempt`, least recently used first.
fn rank_candidates(
    root: &CacheRoot,
    exempt: &str,
    diagnostics: &dyn Diagnostics,
) -> Result<Vec<CacheInstance>> {
    let mut ranked: Vec<(SystemTime, CacheInstance)> = root
        .instances()?
        .into_iter()
        .filter(|instance| instance.id() != exempt)
        .map(|instance| (ranking_time(&instance, diagnostics), instance))
        .collect();
    ranked.sort_by(|(ta, a), (tb, b)| ta.cmp(tb).then_with(|| a.id().cmp(b.id())));
    Ok(ranked.into_iter().map(|(_, instance)| instance).collect())
}

fn ranking_time(instance: &CacheInstance, diagnostics: &dyn Diagnostics) -> SystemTime {
    match instance.usage_marker() {
        Ok(Some(at)) => return at,
        Ok(None) => {}
        Err(e) => diagnostics.emit(CacheEvent::UsageMarkerUnreadable {
            instance: instance.id().to_string(),
            reason: e.to_string(),
        }),
    }
    instance.modified_at().unwrap_or(UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectedDiagnostics;
    use crate::instance::{DESCRIPTOR_FILENAME, LAST_USAGE_FILENAME, SINGLE_PAYLOAD_FILENAME};
    use std::fs;
    use tempfile::TempDir;

    fn make_instance(root: &CacheRoot, id: &str, used_at_nanos: u64, size: usize) {
        let dir = root.path().join(id);
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join(SINGLE_PAYLOAD_FILENAME), vec![0_u8; size]).unwrap();
        fs::write(dir.join(DESCRIPTOR_FILENAME), "").unwrap();
        fs::write(dir.join(LAST_USAGE_FILENAME), used_at_nanos.to_string()).unwrap();
    }

    fn remaining(root: &CacheRoot) -> Vec<String> {
        root.instances()
            .unwrap()
            .iter()
            .map(|i| i.id().to_string())
            .collect()
    }

    #[test]
    fn test_within_limits_is_noop() {
        let tmp = TempDir::new().unwrap();
        let root = CacheRoot::open(tmp.path()).unwrap();
        make_instance(&root, "a", 1, 10);
        let policy = EvictionPolicy {
            max_instance_count: Some(1),
            ..EvictionPolicy::default()
        };
        let report = policy
            .enforce(&root, "a", &CollectedDiagnostics::new())
            .unwrap();
        assert!(report.evicted.is_empty());
        assert!(!report.shortfall);
    }

    #[test]
    fn test_count_limit_evicts_least_recently_used() {
        let tmp = TempDir::new().unwrap();
        let root = CacheRoot::open(tmp.path()).unwrap();
        make_instance(&root, "a", 300, 1);
        make_instance(&root, "b", 100, 1);
        make_instance(&root, "c", 200, 1);
        make_instance(&root, "new", 50, 1);

        let policy = EvictionPolicy {
            max_instance_count: Some(2),
            ..EvictionPolicy::default()
        };
        let sink = CollectedDiagnostics::new();
        let report = policy.enforce(&root, "new", &sink).unwrap();
        assert_eq!(report.evicted, ["b", "c"]);
        assert_eq!(remaining(&root), ["a", "new"]);
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn test_size_limit_never_removes_exempt_instance() {
        let tmp = TempDir::new().unwrap();
        let root = CacheRoot::open(tmp.path()).unwrap();
        make_instance(&root, "old", 1, 100);
        make_instance(&root, "new", 2, 1000);

        let policy = EvictionPolicy {
            max_total_size_bytes: Some(500),
            ..EvictionPolicy::default()
        };
        let sink = CollectedDiagnostics::new();
        let report = policy.enforce(&root, "new", &sink).unwrap();
        assert_eq!(report.evicted, ["old"]);
        assert!(report.shortfall);
        assert_eq!(remaining(&root), ["new"]);
        assert!(matches!(
            sink.warnings().as_slice(),
            [CacheEvent::EvictionShortfall { instance_count: 1, .. }]
        ));
    }

    #[test]
    fn test_unreadable_marker_is_reported_and_ranked_by_mtime() {
        let tmp = TempDir::new().unwrap();
        let root = CacheRoot::open(tmp.path()).unwrap();
        make_instance(&root, "a", 1, 1);
        make_instance(&root, "b", 2, 1);
        fs::write(root.path().join("b").join(LAST_USAGE_FILENAME), "soon").unwrap();

        let sink = CollectedDiagnostics::new();
        let ranked = rank_candidates(&root, "none", &sink).unwrap();
        // "a" claims a last use in 1970, "b" falls back to a recent mtime
        assert_eq!(ranked[0].id(), "a");
        assert_eq!(ranked[1].id(), "b");
        assert!(matches!(
            sink.warnings().as_slice(),
            [CacheEvent::UsageMarkerUnreadable { instance, .. }] if instance == "b"
        ));
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        let policy = EvictionPolicy {
            max_instance_count: Some(0),
            ..EvictionPolicy::default()
        };
        assert!(policy.validate().is_err());
        assert!(EvictionPolicy::unlimited().validate().is_ok());
        assert!(!EvictionPolicy::unlimited().is_limited());
    }
}
