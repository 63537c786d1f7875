//! Run configuration.
//!
//! One immutable [`Config`] value is constructed from the parsed CLI options
//! and passed by reference into everything else. It derives every host path
//! (build tree, flatpak tree, cache, generated manifest), the sandbox mount
//! points, and the default command executed inside the sandbox.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::consts;

/// Build configuration variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildType {
  Release,
  Debug,
}

impl BuildType {
  pub fn as_str(&self) -> &'static str {
    match self {
      BuildType::Release => "Release",
      BuildType::Debug => "Debug",
    }
  }

  /// The flag understood by the in-sandbox build and run scripts.
  pub fn flag(&self) -> &'static str {
    match self {
      BuildType::Release => "--release",
      BuildType::Debug => "--debug",
    }
  }

  pub fn is_debug(&self) -> bool {
    matches!(self, BuildType::Debug)
  }
}

impl fmt::Display for BuildType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Errors that can occur while resolving the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("cannot resolve source root {path}: {source}")]
  SourceRoot {
    path: PathBuf,
    source: std::io::Error,
  },

  #[error("cannot create build directory {path}: {source}")]
  BuildDir {
    path: PathBuf,
    source: std::io::Error,
  },
}

/// Immutable run configuration.
#[derive(Debug, Clone)]
pub struct Config {
  /// Platform variant, upper-cased (e.g. `GTK`).
  pub platform: String,
  pub build_type: BuildType,
  /// Host path of the source tree.
  pub source_root: PathBuf,
  /// Where the source tree is mounted inside the sandbox.
  pub sandbox_source_root: PathBuf,
  /// Application id of the target module (e.g. `org.flatkit.GTK`).
  pub app_id: String,
  /// Stem of the generated manifest file name.
  pub build_name: String,
  /// Path of the template manifest.
  pub manifest_path: PathBuf,
  /// Host build directory for this platform and build type.
  pub build_path: PathBuf,
  /// Target directory populated by flatpak-builder.
  pub flatpak_build_path: PathBuf,
  /// State/cache directory shared with flatpak-builder.
  pub cache_path: PathBuf,
  /// Where the expanded manifest is written.
  pub generated_manifest_path: PathBuf,
  /// Default command run in the sandbox when none is given.
  pub command: String,
  /// Suppress progress messages.
  pub quiet: bool,
}

impl Config {
  /// Resolve the configuration from CLI options.
  ///
  /// The build directory for the selected platform and build type is created
  /// eagerly so later bind-mounts always have an existing host side.
  pub fn new(
    platform: &str,
    debug: bool,
    source_root: Option<PathBuf>,
    manifest: Option<PathBuf>,
    quiet: bool,
  ) -> Result<Self, ConfigError> {
    let source_root = match source_root {
      Some(path) => path
        .canonicalize()
        .map_err(|source| ConfigError::SourceRoot { path, source })?,
      None => {
        let cwd = std::env::current_dir().map_err(|source| ConfigError::SourceRoot {
          path: PathBuf::from("."),
          source,
        })?;
        cwd
          .canonicalize()
          .map_err(|source| ConfigError::SourceRoot { path: cwd, source })?
      }
    };

    let platform = platform.to_uppercase();
    let build_type = if debug { BuildType::Debug } else { BuildType::Release };
    let app_id = format!("{}.{}", consts::APP_ID_PREFIX, platform);
    let build_name = format!("{app_id}-generated");

    let build_root = source_root.join("Build");
    let build_path = build_root.join(&platform).join(build_type.as_str());
    fs::create_dir_all(&build_path).map_err(|source| ConfigError::BuildDir {
      path: build_path.clone(),
      source,
    })?;

    let flatpak_build_path = build_root.join(&platform).join(format!("FlatpakTree{build_type}"));
    let cache_path = build_root.join("FlatpakCache");
    let generated_manifest_path = cache_path.join(format!("{build_name}.json"));

    let manifest_path = manifest.unwrap_or_else(|| {
      source_root
        .join("flatpak")
        .join(format!("{}.yaml", consts::APP_ID_PREFIX))
    });

    let sandbox_source_root = PathBuf::from(consts::SANDBOX_SOURCE_ROOT);
    let command = format!(
      "{}/Tools/Scripts/run-app --{} {}",
      consts::SANDBOX_SOURCE_ROOT,
      platform.to_lowercase(),
      build_type.flag()
    );

    Ok(Config {
      platform,
      build_type,
      source_root,
      sandbox_source_root,
      app_id,
      build_name,
      manifest_path,
      build_path,
      flatpak_build_path,
      cache_path,
      generated_manifest_path,
      command,
      quiet,
    })
  }

  /// The build directory as seen from inside the sandbox.
  ///
  /// `Build/<PLATFORM>/<BuildType>` on the host mounts at
  /// `Build/<BuildType>` in the sandbox, so several platform variants can
  /// share one source tree.
  pub fn sandbox_build_path(&self) -> PathBuf {
    self
      .sandbox_source_root
      .join("Build")
      .join(self.build_type.as_str())
  }

  /// Translate a host path under the source root into its sandbox
  /// counterpart. Paths outside the source root pass through unchanged.
  pub fn to_sandbox_path(&self, path: &Path) -> PathBuf {
    match path.strip_prefix(&self.source_root) {
      Ok(rel) => self.sandbox_source_root.join(rel),
      Err(_) => path.to_path_buf(),
    }
  }

  /// Whether the flatpak tree for this configuration exists.
  pub fn has_environment(&self) -> bool {
    self.flatpak_build_path.exists()
  }
}
