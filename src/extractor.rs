//! APK feature extraction on top of the executor.
//!
//! [`FeatureExtractor`] is the caller side: it validates the timeout and
//! hands every APK to [`killer_pmap`] as a [`TaskKind::Extract`] task.
//! [`extract_apk`] is what runs inside each subordinate.
//!
//! The analyzer is any command that takes an APK path as its last argument
//! and prints a JSON object mapping feature categories to lists of values:
//!
//! ```text
//! {"req_permissions": ["android.permission.INTERNET"], "activities": [".Main"]}
//! ```
//!
//! The extracted set is reported flattened as `category::value` strings.

use crate::error::{ApkxError, Result};
use crate::executor::{PoolConfig, killer_pmap};
use crate::paths::feature_cache_path;
use crate::tasks::TaskKind;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Shortest per-APK timeout accepted for extraction, in seconds.
pub const MIN_EXTRACTION_TIMEOUT_SECS: u64 = 10;

/// Per-APK timeout used when none is given, in seconds.
pub const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 600;

/// Feature category to values, as printed by the analyzer. Categories keep
/// the analyzer's order.
pub type FeatureSet = Map<String, Value>;

/// Runs an analyzer over many APKs with a per-APK deadline.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    analyzer: Vec<String>,
    out_dir: Option<PathBuf>,
}

impl FeatureExtractor {
    /// `analyzer` is the command and its leading arguments.
    pub fn new(analyzer: Vec<String>) -> Self {
        Self {
            analyzer,
            out_dir: None,
        }
    }

    /// Cache extracted features as `<out_dir>/<apk stem>.json`.
    pub fn with_out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(dir.into());
        self
    }

    pub fn out_dir(&self) -> Option<&Path> {
        self.out_dir.as_deref()
    }

    /// The task each subordinate runs.
    pub fn task(&self) -> TaskKind {
        TaskKind::extract(self.analyzer.clone(), self.out_dir.clone())
    }

    /// Extract features from every APK, in order.
    ///
    /// Entries are `None` for APKs that are missing, empty, failed to
    /// analyze, or ran past `timeout_secs` (the latter are also appended to
    /// the skip log). Timeouts under [`MIN_EXTRACTION_TIMEOUT_SECS`] are
    /// rejected before anything runs.
    pub fn extract_features(
        &self,
        apks: &[PathBuf],
        timeout_secs: u64,
        config: &PoolConfig,
    ) -> Result<Vec<Option<Vec<String>>>> {
        if timeout_secs < MIN_EXTRACTION_TIMEOUT_SECS {
            return Err(ApkxError::TimeoutTooShort {
                timeout: timeout_secs,
                minimum: MIN_EXTRACTION_TIMEOUT_SECS,
            });
        }
        if self.analyzer.is_empty() {
            return Err(ApkxError::Analyzer("No analyzer command given".into()));
        }

        let mut config = config.clone();
        config.timeout_secs = timeout_secs;
        config.min_timeout_secs = config.min_timeout_secs.max(MIN_EXTRACTION_TIMEOUT_SECS);
        // Validate the pool before touching the filesystem.
        config.resolve_workers()?;

        if let Some(dir) = &self.out_dir {
            fs::create_dir_all(dir)?;
        }

        let inputs: Vec<String> = apks
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        killer_pmap(&self.task(), inputs, &config)
    }
}

/// Extract one APK's features. Runs inside a subordinate.
///
/// A readable cache file short-circuits the analyzer and its features are
/// returned as if freshly extracted, so a cache hit is not reported as
/// `None`. Callers that need to tell hits apart can check
/// [`feature_cache_path`] before submitting.
pub fn extract_apk(analyzer: &[String], out_dir: Option<&Path>, apk: &Path) -> Option<Vec<String>> {
    let cache = out_dir.map(|dir| feature_cache_path(dir, apk));

    if let Some(cache) = &cache
        && cache.exists()
    {
        match load_features(cache) {
            Ok(features) => {
                info!(apk = %apk.display(), "Features were already extracted");
                return Some(flatten(&features));
            }
            Err(e) => {
                warn!(cache = %cache.display(), error = %e, "Ignoring unreadable feature cache");
            }
        }
    }

    if !is_nonempty_file(apk) {
        error!(apk = %apk.display(), "APK does not exist or is an empty file");
        return None;
    }

    let started = Instant::now();
    debug!(apk = %apk.display(), "Starting analysis");

    let features = match run_analyzer(analyzer, apk) {
        Ok(features) => features,
        Err(e) => {
            warn!(
                apk = %apk.display(),
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Analysis failed"
            );
            return None;
        }
    };

    if let Some(cache) = &cache
        && let Err(e) = save_features(cache, &features)
    {
        warn!(cache = %cache.display(), error = %e, "Could not write feature cache");
    }

    info!(
        apk = %apk.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Features extracted"
    );
    Some(flatten(&features))
}

/// `category::value` for every value, categories in the analyzer's order.
///
/// A category holding a single value instead of a list counts as a list of
/// one; `null` counts as empty.
pub fn flatten(features: &FeatureSet) -> Vec<String> {
    let mut flat = Vec::new();
    for (category, values) in features {
        let values: &[Value] = match values {
            Value::Array(items) => items.as_slice(),
            Value::Null => &[],
            single => std::slice::from_ref(single),
        };
        for value in values {
            match value {
                Value::String(v) => flat.push(format!("{}::{}", category, v)),
                other => flat.push(format!("{}::{}", category, other)),
            }
        }
    }
    flat
}

fn run_analyzer(analyzer: &[String], apk: &Path) -> Result<FeatureSet> {
    let (program, args) = analyzer
        .split_first()
        .ok_or_else(|| ApkxError::Analyzer("No analyzer command given".into()))?;

    let output = Command::new(program)
        .args(args)
        .arg(apk)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|e| ApkxError::Analyzer(format!("Failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        return Err(ApkxError::Analyzer(format!(
            "{} {}",
            program, output.status
        )));
    }

    Ok(serde_json::from_slice(&output.stdout)?)
}

fn load_features(path: &Path) -> Result<FeatureSet> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Write through a temporary file so a subordinate killed mid-write never
/// leaves a truncated cache behind.
fn save_features(path: &Path, features: &FeatureSet) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(features)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn is_nonempty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
