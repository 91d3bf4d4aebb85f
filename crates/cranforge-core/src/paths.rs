use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Returns the primary working directory, or None if the user's home cannot
/// be resolved.
pub fn try_cranforge_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("CRANFORGE_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".cranforge"))
}

/// Returns the canonical cranforge home directory (`~/.cranforge`).
///
/// # Panics
///
/// Panics if neither `CRANFORGE_HOME` is set nor the user's home directory
/// can be resolved.
pub fn cranforge_home() -> PathBuf {
    try_cranforge_home()
        .expect("Could not determine home directory. Set CRANFORGE_HOME to override.")
}

/// Artifact staging store: `<home>/staging`
pub fn staging_path(home: &Path) -> PathBuf {
    home.join("staging")
}

/// Scratch workspace for downloads and builds: `<home>/work`
pub fn work_path(home: &Path) -> PathBuf {
    home.join("work")
}
