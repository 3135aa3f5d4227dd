//! Manifest discovery and parsing.
//!
//! A manifest directory holds either manifest files directly
//! (`echo.yaml`, `quotes.json`, ...) or one subdirectory per plugin with a
//! `manifest.<ext>` inside. Files are visited in file name order so the result
//! is stable across platforms.
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::config::{ConfigError, ConfigFormat};
use crate::kernel::constants::MANIFEST_EXTENSIONS;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::manifest::PluginManifest;

/// A manifest file that could not be loaded
#[derive(Debug)]
pub struct ManifestFailure {
    pub path: PathBuf,
    pub error: PluginSystemError,
}

/// Result of scanning a directory: every manifest that parsed, and every file
/// that did not.
#[derive(Debug, Default)]
pub struct ManifestScan {
    pub manifests: Vec<PluginManifest>,
    pub failures: Vec<ManifestFailure>,
}

impl ManifestScan {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManifestLoader {
    dirs: Vec<PathBuf>,
}

impl ManifestLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory to [`scan`](Self::scan)
    pub fn add_dir<P: AsRef<Path>>(&mut self, dir: P) {
        self.dirs.push(dir.as_ref().to_path_buf());
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Load every manifest of every registered directory.
    pub async fn scan(&self) -> Result<ManifestScan, PluginSystemError> {
        let mut combined = ManifestScan::default();
        for dir in &self.dirs {
            let scan = Self::load_dir(dir).await?;
            combined.manifests.extend(scan.manifests);
            combined.failures.extend(scan.failures);
        }
        Ok(combined)
    }

    /// Load and validate one manifest file.
    pub async fn load_file(path: &Path) -> Result<PluginManifest, PluginSystemError> {
        let wrap = |source: ConfigError| PluginSystemError::ManifestFile {
            path: path.to_path_buf(),
            source,
        };
        let format = ConfigFormat::require(path).map_err(wrap)?;
        let data = fs::read_to_string(path).await.map_err(|source| {
            wrap(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        })?;
        let mut manifest: PluginManifest = format.decode(&data, path).map_err(wrap)?;
        manifest.source = Some(path.to_path_buf());
        log::debug!("Loaded manifest '{}' {} from {}", manifest.name, manifest.version, path.display());
        Ok(manifest)
    }

    /// Load every manifest in `dir`. Unreadable or invalid files are
    /// collected as failures; only an unreadable directory is an error.
    pub async fn load_dir(dir: &Path) -> Result<ManifestScan, PluginSystemError> {
        let mut scan = ManifestScan::default();
        for path in Self::discover(dir).await? {
            match Self::load_file(&path).await {
                Ok(manifest) => scan.manifests.push(manifest),
                Err(error) => {
                    log::warn!("Skipping manifest {}: {}", path.display(), error);
                    scan.failures.push(ManifestFailure { path, error });
                }
            }
        }
        log::info!(
            "Found {} manifest(s) in {} ({} failed)",
            scan.manifests.len(),
            dir.display(),
            scan.failures.len()
        );
        Ok(scan)
    }

    /// Manifest file paths in `dir`, sorted by file name.
    pub async fn discover(dir: &Path) -> Result<Vec<PathBuf>, PluginSystemError> {
        let read_error = |source: std::io::Error| PluginSystemError::ManifestFile {
            path: dir.to_path_buf(),
            source: ConfigError::Read {
                path: dir.to_path_buf(),
                source,
            },
        };

        let mut entries = fs::read_dir(dir).await.map_err(read_error)?;
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
            let path = entry.path();
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    log::warn!("Failed to read metadata of {}: {}", path.display(), e);
                    continue;
                }
            };
            if metadata.is_file() && has_manifest_extension(&path) {
                found.push(path);
            } else if metadata.is_dir() {
                if let Some(nested) = nested_manifest(&path).await {
                    found.push(nested);
                }
            }
        }
        found.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        Ok(found)
    }
}

fn has_manifest_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        && ConfigFormat::from_path(path).is_some()
}

/// `<dir>/manifest.<ext>`, first extension wins
async fn nested_manifest(dir: &Path) -> Option<PathBuf> {
    for extension in MANIFEST_EXTENSIONS {
        let candidate = dir.join(format!("manifest.{}", extension));
        if ConfigFormat::from_path(&candidate).is_none() {
            continue;
        }
        if fs::metadata(&candidate).await.is_ok_and(|metadata| metadata.is_file()) {
            return Some(candidate);
        }
    }
    None
}

/// Nested manifests sort by their directory name
fn sort_key(path: &Path) -> PathBuf {
    match path.file_stem().and_then(|stem| stem.to_str()) {
        Some("manifest") => path.parent().map(Path::to_path_buf).unwrap_or_default(),
        _ => path.to_path_buf(),
    }
}
