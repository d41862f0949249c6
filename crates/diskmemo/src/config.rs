//! Cache configuration: limits, loading strategy, tag and root location

use crate::eviction::EvictionPolicy;
use crate::lazy::LoadingStrategy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root location
pub const CACHE_DIR_ENV: &str = "DISKMEMO_CACHE_DIR";

const FORBIDDEN_TAG_CHARS: [char; 6] = [' ', '/', '\n', '\\', ',', '.'];

/// Settings for a [`crate::DiskCache`].
///
/// Can be built in code or loaded from TOML:
///
/// ```
/// use diskmemo::{CacheConfig, LoadingStrategy};
///
/// let config = CacheConfig::from_toml_str(
///     r#"
///     max_instance_count = 8
///     loading_strategy = "lazy-load-discard"
///     tag_suffix = "render"
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.loading_strategy, LoadingStrategy::LazyDiscard);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache root; resolved from the environment when unset
    pub root: Option<PathBuf>,
    /// Maximum total size of the root in bytes
    pub max_total_size_bytes: Option<u64>,
    /// Maximum number of instances in the root
    pub max_instance_count: Option<usize>,
    /// How sequence payloads are read back
    pub loading_strategy: LoadingStrategy,
    /// Appended to instance ids
    pub tag_suffix: Option<String>,
}

impl CacheConfig {
    /// Default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache root
    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Set the size limit in bytes
    #[must_use]
    pub const fn max_total_size_bytes(mut self, bytes: u64) -> Self {
        self.max_total_size_bytes = Some(bytes);
        self
    }

    /// Set the size limit in MiB, rounded up to whole bytes
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "negative and oversized inputs saturate, zero is rejected by validate"
    )]
    pub fn max_total_size_mb(mut self, mb: f64) -> Self {
        self.max_total_size_bytes = Some((mb * 1024.0 * 1024.0).ceil() as u64);
        self
    }

    /// Set the instance count limit
    #[must_use]
    pub const fn max_instance_count(mut self, count: usize) -> Self {
        self.max_instance_count = Some(count);
        self
    }

    /// Set the loading strategy
    #[must_use]
    pub const fn loading_strategy(mut self, strategy: LoadingStrategy) -> Self {
        self.loading_strategy = strategy;
        self
    }

    /// Set the tag suffix
    #[must_use]
    pub fn tag_suffix(mut self, tag: impl Into<String>) -> Self {
        self.tag_suffix = Some(tag.into());
        self
    }

    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| Error::configuration(format!("Invalid cache configuration: {e}")))
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        Self::from_toml_str(&text)
    }

    /// Check limits and tag suffix.
    pub fn validate(&self) -> Result<()> {
        self.eviction_policy().validate()?;
        if let Some(tag) = &self.tag_suffix {
            normalize_tag_suffix(tag)?;
        }
        Ok(())
    }

    /// Limits as an eviction policy
    #[must_use]
    pub const fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_total_size_bytes: self.max_total_size_bytes,
            max_instance_count: self.max_instance_count,
        }
    }

    /// Validated tag suffix, `None` when unset or empty after trimming.
    pub fn normalized_tag(&self) -> Result<Option<String>> {
        self.tag_suffix
            .as_deref()
            .map_or(Ok(None), normalize_tag_suffix)
    }
}

/// Validate a tag suffix and trim `_`, `-` and spaces from both ends.
///
/// ```
/// use diskmemo::config::normalize_tag_suffix;
///
/// assert_eq!(normalize_tag_suffix("__render-").unwrap().as_deref(), Some("render"));
/// assert_eq!(normalize_tag_suffix("--").unwrap(), None);
/// assert!(normalize_tag_suffix("v1.2").is_err());
/// ```
pub fn normalize_tag_suffix(raw: &str) -> Result<Option<String>> {
    if let Some(bad) = raw.chars().find(|c| FORBIDDEN_TAG_CHARS.contains(c)) {
        return Err(Error::configuration(format!(
            "Tag suffix '{}' contains forbidden character {bad:?}",
            raw.escape_default()
        )));
    }
    let trimmed = raw.trim_matches(|c| matches!(c, '_' | '-' | ' '));
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// Inputs for determining the default cache root
#[derive(Debug, Clone)]
struct RootInputs {
    env_override: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    current_dir: Option<PathBuf>,
}

/// Default root for a cache called `name`.
///
/// Resolution order (first writable wins):
/// 1. `DISKMEMO_CACHE_DIR`
/// 2. `<os cache dir>/diskmemo/<name>`
/// 3. `<cwd>/<name>_cache_root`
pub fn resolve_root(name: &str) -> Result<PathBuf> {
    let inputs = RootInputs {
        env_override: std::env::var(CACHE_DIR_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        os_cache_dir: dirs::cache_dir(),
        current_dir: std::env::current_dir().ok(),
    };
    root_from_inputs(name, inputs)
}

fn root_from_inputs(name: &str, inputs: RootInputs) -> Result<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = inputs.env_override {
        candidates.push(dir);
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("diskmemo").join(name));
    }
    if let Some(cwd) = inputs.current_dir {
        candidates.push(cwd.join(format!("{name}_cache_root")));
    }

    for path in candidates {
        if is_writable_dir(&path) {
            return Ok(path);
        }
        if !path.exists() && std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
        tracing::debug!(candidate = %path.display(), "Cache root candidate not writable");
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

fn is_writable_dir(path: &Path) -> bool {
    if !path.is_dir() {
        return false;
    }
    let probe = path.join(".write_probe");
    let writable = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&probe)
        .is_ok();
    if writable {
        let _ = std::fs::remove_file(&probe);
    }
    writable
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_sets_fields() {
        let config = CacheConfig::new()
            .root("/tmp/memo")
            .max_instance_count(3)
            .max_total_size_mb(1.5)
            .loading_strategy(LoadingStrategy::Eager)
            .tag_suffix("tag");
        assert_eq!(config.root, Some(PathBuf::from("/tmp/memo")));
        assert_eq!(config.max_total_size_bytes, Some(1_572_864));
        assert_eq!(config.eviction_policy().max_instance_count, Some(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_uses_kebab_strategy_names() {
        let config = CacheConfig::from_toml_str(
            r#"
            root = "/var/cache/memo"
            max_total_size_bytes = 1024
            loading_strategy = "completely-load-to-memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.loading_strategy, LoadingStrategy::Eager);
        assert_eq!(config.max_total_size_bytes, Some(1024));
        assert_eq!(config.max_instance_count, None);
    }

    #[test]
    fn test_toml_defaults_to_keep() {
        let config = CacheConfig::from_toml_str("").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.loading_strategy, LoadingStrategy::LazyKeep);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        let err = CacheConfig::from_toml_str("max_size = 3").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_from_file_reads_toml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("diskmemo.toml");
        std::fs::write(&path, "max_instance_count = 2\n").unwrap();
        let config = CacheConfig::from_file(&path).unwrap();
        assert_eq!(config.max_instance_count, Some(2));
        assert!(CacheConfig::from_file(tmp.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_zero_limits_fail_validation() {
        assert!(CacheConfig::new().max_instance_count(0).validate().is_err());
        assert!(CacheConfig::new().max_total_size_bytes(0).validate().is_err());
    }

    #[test]
    fn test_tag_suffix_rules() {
        for bad in ["a b", "a/b", "a\nb", "a\\b", "a,b", "a.b"] {
            assert!(normalize_tag_suffix(bad).is_err(), "{bad:?} should be rejected");
        }
        assert_eq!(
            normalize_tag_suffix("_-model_v2-_").unwrap().as_deref(),
            Some("model_v2")
        );
        assert_eq!(normalize_tag_suffix("___").unwrap(), None);
        assert!(CacheConfig::new().tag_suffix("x.y").validate().is_err());
        assert_eq!(CacheConfig::new().tag_suffix("-").normalized_tag().unwrap(), None);
    }

    #[test]
    fn test_root_prefers_env_override() {
        let tmp = TempDir::new().unwrap();
        let override_dir = tmp.path().join("override");
        let inputs = RootInputs {
            env_override: Some(override_dir.clone()),
            os_cache_dir: Some(tmp.path().join("os")),
            current_dir: Some(tmp.path().to_path_buf()),
        };
        assert_eq!(root_from_inputs("jobs", inputs).unwrap(), override_dir);
        assert!(override_dir.is_dir());
    }

    #[test]
    fn test_root_uses_os_cache_dir_with_name() {
        let tmp = TempDir::new().unwrap();
        let inputs = RootInputs {
            env_override: None,
            os_cache_dir: Some(tmp.path().join("os")),
            current_dir: None,
        };
        assert_eq!(
            root_from_inputs("jobs", inputs).unwrap(),
            tmp.path().join("os").join("diskmemo").join("jobs")
        );
    }

    #[test]
    fn test_root_skips_unusable_candidates() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();
        let inputs = RootInputs {
            env_override: Some(blocker.join("nested")),
            os_cache_dir: None,
            current_dir: Some(tmp.path().to_path_buf()),
        };
        assert_eq!(
            root_from_inputs("jobs", inputs).unwrap(),
            tmp.path().join("jobs_cache_root")
        );
    }

    #[test]
    fn test_resolve_root_reads_environment() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("from-env");
        temp_env::with_var(CACHE_DIR_ENV, Some(&dir), || {
            assert_eq!(resolve_root("jobs").unwrap(), dir);
        });
    }
}
