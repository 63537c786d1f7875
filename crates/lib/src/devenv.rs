//! Development environment orchestration.
//!
//! [`DevEnv`] ties the pieces together: it loads the template manifest once,
//! keeps the runtime/SDK package set derived from it, and exposes the
//! high-level operations the CLI maps onto (update, build, run, test, gdb,
//! clean).

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::consts;
use crate::manifest::{
  expand_manifest, load_manifest, ExpandRequest, Manifest, ManifestError, Substitutions,
};
use crate::packages::{check_tool_versions, Flatpak, FlatpakError, Package, Remotes};
use crate::sandbox::{remove_extension_points, run_in_sandbox, RunOptions, SandboxError};

/// Errors from environment operations.
#[derive(Debug, Error)]
pub enum EnvError {
  #[error(transparent)]
  Manifest(#[from] ManifestError),

  #[error(transparent)]
  Flatpak(#[from] FlatpakError),

  #[error(transparent)]
  Sandbox(#[from] SandboxError),

  #[error("flatpak-builder exited with code {code:?}")]
  BuilderFailed { code: Option<i32> },

  #[error("no development environment for {platform} {build_type}; run 'flatkit build' first")]
  NoEnvironment { platform: String, build_type: String },

  #[error("'coredumpctl' not found; it is required for debugging crashes")]
  CoredumpctlMissing,

  #[error("'coredumpctl dump' exited with code {code:?}")]
  CoredumpFailed { code: Option<i32> },

  #[error("cannot find the crashing executable in coredumpctl output")]
  NoExecutable,

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// The runtime/SDK packages a build of this manifest needs.
fn runtime_packages(manifest: &Manifest, branch: &str, debug_build: bool) -> Vec<Package> {
  let mut packages = vec![
    Package::new("org.gnome.Platform", branch, manifest.runtime_hash.clone()),
    Package::new("org.gnome.Platform.Locale", branch, manifest.runtime_hash.clone()),
    Package::new("org.gnome.Sdk", branch, manifest.sdk_hash.clone()),
  ];
  if debug_build {
    packages.push(Package::new("org.gnome.Sdk.Debug", branch, manifest.sdk_hash.clone()));
  }
  packages
}

/// Extract the crashing executable's path from coredumpctl's crash report.
fn parse_executable(info: &str) -> Option<&str> {
  info
    .lines()
    .find_map(|line| line.trim_start().strip_prefix("Executable:"))
    .map(str::trim)
}

/// A resolved development environment.
#[derive(Debug)]
pub struct DevEnv {
  pub config: Config,
  flatpak: Flatpak,
  /// Branch of the GNOME runtime and SDK, from the template manifest.
  sdk_branch: String,
  /// The template's finish-args with extension points removed.
  finish_args: Vec<String>,
  packages: Vec<Package>,
}

impl DevEnv {
  /// Load the template manifest and derive the package set.
  pub fn new(config: Config) -> Result<Self, EnvError> {
    let subst = Substitutions {
      port_name: &config.app_id,
      command: &config.command,
    };
    let manifest = load_manifest(&config.manifest_path, Some(&subst))?;
    let sdk_branch = manifest
      .runtime_version
      .clone()
      .ok_or_else(|| ManifestError::MissingKey {
        path: config.manifest_path.clone(),
        key: "runtime-version",
      })?;

    let finish_args = remove_extension_points(&manifest.finish_args);
    let packages = runtime_packages(&manifest, &sdk_branch, config.build_type.is_debug());

    Ok(DevEnv {
      config,
      flatpak: Flatpak::new(true),
      sdk_branch,
      finish_args,
      packages,
    })
  }

  pub fn sdk_branch(&self) -> &str {
    &self.sdk_branch
  }

  pub fn has_environment(&self) -> bool {
    self.config.has_environment()
  }

  fn require_environment(&self) -> Result<(), EnvError> {
    if self.has_environment() {
      return Ok(());
    }
    Err(EnvError::NoEnvironment {
      platform: self.config.platform.clone(),
      build_type: self.config.build_type.to_string(),
    })
  }

  /// Update the runtime and SDK packages, installing them when missing.
  pub fn update(&self) -> Result<(), EnvError> {
    check_tool_versions()?;
    let remote = self.ensure_remote()?;
    for package in &self.packages {
      package.update(&self.flatpak, &remote)?;
    }
    Ok(())
  }

  fn ensure_remote(&self) -> Result<String, EnvError> {
    let mut remotes = Remotes::detect(self.flatpak)?;
    let name = remotes.ensure(
      consts::SDK_REMOTE_NAME,
      consts::SDK_REMOTE_URL,
      consts::SDK_REMOTE_FILE,
    )?;
    Ok(name)
  }

  fn install_missing(&self) -> Result<(), EnvError> {
    let mut remote: Option<String> = None;
    for package in &self.packages {
      if package.is_installed(&self.flatpak)? {
        continue;
      }
      if remote.is_none() {
        remote = Some(self.ensure_remote()?);
      }
      if let Some(name) = &remote {
        package.install(&self.flatpak, name)?;
      }
    }
    Ok(())
  }

  /// Regenerate the expanded manifest in the cache directory.
  pub fn expand(&self) -> Result<(), EnvError> {
    fs::create_dir_all(&self.config.cache_path)?;
    let request = ExpandRequest {
      manifest_path: &self.config.manifest_path,
      outfile: &self.config.generated_manifest_path,
      port_name: &self.config.app_id,
      source_root: &self.config.sandbox_source_root,
      command: &self.config.command,
    };
    expand_manifest(&request)?;
    Ok(())
  }

  /// Build every dependency module into the flatpak tree.
  ///
  /// Runs `flatpak-builder` in build-only mode, stopping at the target
  /// module, which is built separately inside the sandbox.
  pub fn build_dependencies(&self) -> Result<(), EnvError> {
    check_tool_versions()?;
    self.install_missing()?;
    self.expand()?;

    let mut builder = Command::new("flatpak-builder");
    builder
      .arg("--disable-rofiles-fuse")
      .arg(format!("--state-dir={}", self.config.cache_path.display()))
      .arg("--ccache")
      .arg(&self.config.flatpak_build_path)
      .arg("--force-clean")
      .arg(&self.config.generated_manifest_path)
      .arg("--build-only")
      .arg(format!("--stop-at={}", self.config.app_id));

    info!(manifest = %self.config.generated_manifest_path.display(), "building dependencies");
    let status = builder.status()?;
    if !status.success() {
      return Err(EnvError::BuilderFailed {
        code: status.code(),
      });
    }
    Ok(())
  }

  /// Build the target module inside the sandbox.
  ///
  /// The build command comes from the target module of the generated
  /// manifest; `extra_args` are appended to it.
  pub fn build_app(&self, extra_args: &[String]) -> Result<(), EnvError> {
    self.build_dependencies()?;

    let generated = load_manifest(&self.config.generated_manifest_path, None)?;
    let module = generated
      .module(&self.config.app_id)
      .ok_or_else(|| ManifestError::ModuleNotFound {
        name: self.config.app_id.clone(),
        path: self.config.generated_manifest_path.clone(),
      })?;

    let mut tokens: Vec<String> = module
      .build_command()?
      .split_whitespace()
      .map(str::to_string)
      .collect();
    tokens.push(self.config.build_type.flag().to_string());
    tokens.extend_from_slice(extra_args);

    let cwd = Path::new(module.local_source_path()?).to_path_buf();
    let options = RunOptions {
      cwd: Some(&cwd),
      ..Default::default()
    };
    run_in_sandbox(&self.config, &self.finish_args, &tokens, &options)?;
    Ok(())
  }

  /// Run a command (or the default command) inside the sandbox.
  pub fn run(&self, args: &[String], extra_args: &[String]) -> Result<(), EnvError> {
    self.require_environment()?;
    let options = RunOptions {
      extra_args,
      ..Default::default()
    };
    run_in_sandbox(&self.config, &self.finish_args, args, &options)?;
    Ok(())
  }

  /// Run the layout test runner inside the sandbox.
  ///
  /// Device access is dropped so the tests see the same environment on a
  /// developer machine and in CI.
  pub fn test(&self, args: &[String]) -> Result<(), EnvError> {
    self.require_environment()?;
    let mut tokens = vec![
      format!("{}/Tools/Scripts/run-tests", consts::SANDBOX_SOURCE_ROOT),
      self.config.build_type.flag().to_string(),
      format!("--{}", self.config.platform.to_lowercase()),
    ];
    tokens.extend_from_slice(args);

    let options = RunOptions {
      remove_devices: true,
      ..Default::default()
    };
    run_in_sandbox(&self.config, &self.finish_args, &tokens, &options)?;
    Ok(())
  }

  /// Attach gdb to a coredump collected by systemd-coredump.
  ///
  /// The dump is extracted to a temporary file; `coredumpctl dump` reports
  /// the crash metadata on stderr, which names the crashing executable.
  /// Both are handed to gdb inside the sandbox, where the runtime's debug
  /// symbols are visible.
  pub fn debug_core(&self, matches: &[String], gdb_args: &[String]) -> Result<(), EnvError> {
    self.require_environment()?;
    Command::new("coredumpctl")
      .arg("--version")
      .output()
      .map_err(|_| EnvError::CoredumpctlMissing)?;

    let dump = NamedTempFile::new()?;
    let output = Command::new("coredumpctl")
      .arg("dump")
      .args(matches)
      .arg(format!("--output={}", dump.path().display()))
      .output()?;
    if !output.status.success() {
      return Err(EnvError::CoredumpFailed {
        code: output.status.code(),
      });
    }

    let info = String::from_utf8_lossy(&output.stderr);
    let executable = parse_executable(&info).ok_or(EnvError::NoExecutable)?;

    // systemd reports in-sandbox paths under /newroot.
    let executable = match executable.strip_prefix("/newroot") {
      Some(stripped) => stripped,
      None => {
        warn!(executable, "executable path is not sandbox-relative");
        executable
      }
    };

    let mut tokens = vec![
      "gdb".to_string(),
      executable.to_string(),
      dump.path().to_string_lossy().into_owned(),
    ];
    tokens.extend_from_slice(gdb_args);

    debug!(executable, dump = %dump.path().display(), "starting gdb");
    run_in_sandbox(&self.config, &self.finish_args, &tokens, &RunOptions::default())?;
    Ok(())
  }

  /// Remove the flatpak tree, the build directory, and the generated
  /// manifest. The shared ccache is kept.
  pub fn clean(&self) -> Result<(), EnvError> {
    for path in [&self.config.flatpak_build_path, &self.config.build_path] {
      match fs::remove_dir_all(path) {
        Ok(()) => info!(path = %path.display(), "removed"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
      }
    }
    match fs::remove_file(&self.config.generated_manifest_path) {
      Ok(()) => info!(path = %self.config.generated_manifest_path.display(), "removed"),
      Err(err) if err.kind() == ErrorKind::NotFound => {}
      Err(err) => return Err(err.into()),
    }
    Ok(())
  }
}
