//! Path utilities for feature caches and user-supplied paths.

use std::path::{Path, PathBuf};

/// Extension of cached feature files.
pub const FEATURE_CACHE_EXT: &str = "json";

/// Derives the cached feature path for an APK.
///
/// The cache file lives in `out_dir` and is named after the APK's file stem,
/// so `/data/apps/com.example.apk` with `out_dir` `/features` maps to
/// `/features/com.example.json`.
///
/// # Examples
///
/// ```
/// use std::path::{Path, PathBuf};
/// use apkx::paths::feature_cache_path;
///
/// let cache = feature_cache_path(Path::new("/features"), Path::new("/data/app.apk"));
/// assert_eq!(cache, PathBuf::from("/features/app.json"));
/// ```
pub fn feature_cache_path<P: AsRef<Path>, Q: AsRef<Path>>(out_dir: P, apk: Q) -> PathBuf {
    let stem = apk
        .as_ref()
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    let mut name = stem;
    name.push(".");
    name.push(FEATURE_CACHE_EXT);
    out_dir.as_ref().join(name)
}

/// Expands a leading `~` in a path to the user's home directory.
///
/// This handles the common case where shell tilde expansion doesn't occur,
/// such as when using `--out-dir=~/features` instead of `--out-dir ~/features`.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use apkx::paths::expand_tilde;
///
/// let path = PathBuf::from("/tmp/foo");
/// assert_eq!(expand_tilde(&path), path);
/// ```
pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if let Ok(stripped) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    path.to_path_buf()
}
