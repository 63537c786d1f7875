//! Running commands inside the flatpak sandbox.
//!
//! A sandbox invocation is a `flatpak build` command line: bind-mounts for
//! the temp directory, the source tree, and the build tree, one `--env=` per
//! forwarded host variable, the manifest's finish-args, and finally a shell
//! script holding the quote-joined user command.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::consts;

/// Variable-name prefixes (first `_`-delimited segment) forwarded into the
/// sandbox, covering the GLib/GTK/GStreamer stacks of the GNOME runtime.
const FORWARDED_PREFIXES: &[&str] = &["GST", "GTK", "G"];

/// Display and locale variables forwarded verbatim.
const FORWARDED_NAMES: &[&str] = &["WAYLAND_DISPLAY", "DISPLAY", "LANG"];

/// Errors that can occur while running a sandboxed command.
#[derive(Debug, Error)]
pub enum SandboxError {
  #[error("sandbox command exited with code {code}")]
  ExecutionFailed { code: i32 },

  #[error("sandbox command terminated by a signal")]
  Terminated,

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Per-invocation options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions<'a> {
  /// Working directory inside the sandbox.
  pub cwd: Option<&'a Path>,
  /// Drop `--device=all` from the finish-args (used by the test runner).
  pub remove_devices: bool,
  /// Appended to the default command when no command tokens are given.
  pub extra_args: &'a [String],
}

/// Whether this process already runs inside a flatpak sandbox.
pub fn is_sandboxed() -> bool {
  Path::new(consts::SANDBOX_MANIFEST_FILE).exists()
}

/// Drop `--extension` finish-args; extension points are install-time
/// concerns and are rejected by `flatpak build`.
pub fn remove_extension_points(args: &[String]) -> Vec<String> {
  args
    .iter()
    .filter(|arg| !arg.starts_with("--extension"))
    .cloned()
    .collect()
}

/// Run a command inside the sandbox, blocking until it exits.
///
/// With empty `args` the configured default command (plus
/// `options.extra_args`) runs instead. When the current process already
/// runs inside a sandbox the command executes directly; sandboxes do not
/// nest. A non-zero child exit is propagated as
/// [`SandboxError::ExecutionFailed`] carrying the child's exit code.
pub fn run_in_sandbox(
  config: &Config,
  finish_args: &[String],
  args: &[String],
  options: &RunOptions<'_>,
) -> Result<(), SandboxError> {
  let args = rewrite_first_token(config, args)?;
  let host_vars: Vec<(String, String)> = std::env::vars().collect();
  let mut command = command_prefix(
    config,
    finish_args,
    &host_vars,
    options.remove_devices,
    is_sandboxed(),
  );
  let shell_string = compose_shell_string(&config.command, &args, options);

  let mut script = NamedTempFile::new()?;
  script.write_all(shell_string.as_bytes())?;
  script.flush()?;

  command.push("sh".to_string());
  command.push(script.path().to_string_lossy().into_owned());

  if !config.quiet {
    println!("Running in sandbox: {} {}", quote_join(&command), shell_string);
  }
  debug!(script = %script.path().display(), "spawning sandbox command");

  execute(&command)
}

/// Run the assembled command line, inheriting stdio, and translate a
/// non-zero exit into an error carrying the child's exact code.
fn execute(command: &[String]) -> Result<(), SandboxError> {
  let status = Command::new(&command[0]).args(&command[1..]).status()?;
  if status.success() {
    return Ok(());
  }
  match status.code() {
    Some(code) => Err(SandboxError::ExecutionFailed { code }),
    None => Err(SandboxError::Terminated),
  }
}

/// Absolutize the first token and translate its source-root prefix, so a
/// host-built path resolves once the source tree is remounted inside the
/// sandbox.
fn rewrite_first_token(config: &Config, args: &[String]) -> Result<Vec<String>, SandboxError> {
  let mut args = args.to_vec();
  if let Some(first) = args.first_mut() {
    let absolute = std::path::absolute(Path::new(first.as_str()))?;
    *first = config.to_sandbox_path(&absolute).to_string_lossy().into_owned();
  }
  Ok(args)
}

/// The command tokens in front of the script: the full `flatpak build`
/// invocation, or nothing when already inside a sandbox.
fn command_prefix(
  config: &Config,
  finish_args: &[String],
  host_vars: &[(String, String)],
  remove_devices: bool,
  sandboxed: bool,
) -> Vec<String> {
  if sandboxed {
    return Vec::new();
  }
  build_command_line(config, finish_args, host_vars, remove_devices)
}

/// Assemble the `flatpak build` command line, without the trailing script.
fn build_command_line(
  config: &Config,
  finish_args: &[String],
  host_vars: &[(String, String)],
  remove_devices: bool,
) -> Vec<String> {
  let tmpdir = std::env::temp_dir();
  let mut command = vec![
    "flatpak".to_string(),
    "build".to_string(),
    "--die-with-parent".to_string(),
    bind_mount(&tmpdir, &tmpdir),
    bind_mount(&config.sandbox_source_root, &config.source_root),
    bind_mount(&config.sandbox_build_path(), &config.build_path),
  ];

  for (key, value) in forwarded_env(host_vars) {
    command.push(format!("--env={key}={value}"));
  }

  for arg in finish_args {
    if remove_devices && arg == "--device=all" {
      continue;
    }
    command.push(arg.clone());
  }

  command.push(config.flatpak_build_path.to_string_lossy().into_owned());
  command
}

fn bind_mount(target: &Path, source: &Path) -> String {
  format!("--bind-mount={}={}", target.display(), source.display())
}

/// Select the host variables forwarded into the sandbox.
///
/// Forwarded: variables whose first `_`-delimited name segment is in the
/// prefix allow-list, the display/locale names, and two always-injected
/// flatkit variables.
fn forwarded_env(host_vars: &[(String, String)]) -> Vec<(String, String)> {
  let mut forwarded = vec![
    ("FLATKIT_TOP_LEVEL".to_string(), "/app/".to_string()),
    ("FLATKIT_SANDBOX".to_string(), "1".to_string()),
  ];
  for (key, value) in host_vars {
    let prefix = key.split('_').next().unwrap_or("");
    if FORWARDED_PREFIXES.contains(&prefix) || FORWARDED_NAMES.contains(&key.as_str()) {
      forwarded.push((key.clone(), value.clone()));
    }
  }
  forwarded
}

/// Join tokens as a shell string, each token double-quoted.
fn quote_join(parts: &[String]) -> String {
  let quoted: Vec<String> = parts.iter().map(|part| format!("\"{part}\"")).collect();
  quoted.join(" ")
}

/// The shell line executed inside the sandbox.
fn compose_shell_string(default_command: &str, args: &[String], options: &RunOptions<'_>) -> String {
  if args.is_empty() {
    let mut line = default_command.to_string();
    if !options.extra_args.is_empty() {
      line.push(' ');
      line.push_str(&quote_join(options.extra_args));
    }
    return line;
  }

  match options.cwd {
    Some(cwd) => format!("cd \"{}\" && {}", cwd.display(), quote_join(args)),
    None => quote_join(args),
  }
}
