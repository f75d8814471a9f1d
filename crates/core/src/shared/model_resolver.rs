use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("model file {path} does not exist")]
    Missing { path: PathBuf },
    #[error("model {name} not found; searched: {}", display_paths(.searched))]
    NotFound { name: String, searched: Vec<PathBuf> },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolve a model file, checking known locations in order.
///
/// Resolution order:
/// 1. Explicit path (must exist; no further search if given)
/// 2. User model directory (platform-specific)
/// 3. Bundled directory (for development / pre-packaged installs)
///
/// Models are exported and placed manually; nothing is downloaded.
pub fn resolve(
    name: &str,
    explicit: Option<&Path>,
    bundled_dir: Option<&Path>,
) -> Result<PathBuf, ModelResolveError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(ModelResolveError::Missing {
            path: path.to_path_buf(),
        });
    }

    let candidates: Vec<PathBuf> = model_dir()
        .into_iter()
        .chain(bundled_dir.map(Path::to_path_buf))
        .map(|dir| dir.join(name))
        .collect();

    let found = candidates.iter().find(|p| p.is_file()).cloned();
    found.ok_or_else(|| ModelResolveError::NotFound {
        name: name.to_string(),
        searched: candidates,
    })
}

/// Platform-specific model directory.
///
/// - macOS: `~/Library/Application Support/live-detect/models/`
/// - Linux: `$XDG_DATA_HOME/live-detect/models/` or `~/.local/share/live-detect/models/`
/// - Windows: `%APPDATA%/live-detect/models/`
pub fn model_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("live-detect").join("models"))
}
