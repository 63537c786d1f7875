use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use flatkit_lib::devenv::EnvError;
use flatkit_lib::sandbox::SandboxError;
use tracing_subscriber::EnvFilter;

mod cmd;

/// flatkit - flatpak-based development environments
#[derive(Parser)]
#[command(name = "flatkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Platform variant to target
  #[arg(short, long, global = true, default_value = "gtk")]
  platform: String,

  /// Use the Debug build configuration
  #[arg(long, global = true)]
  debug: bool,

  /// Root of the source tree (default: current directory)
  #[arg(long, global = true, value_name = "DIR")]
  source_root: Option<PathBuf>,

  /// Template manifest (default: <source-root>/flatpak/org.flatkit.yaml)
  #[arg(long, global = true, value_name = "FILE")]
  manifest: Option<PathBuf>,

  /// Suppress progress messages
  #[arg(short, long, global = true)]
  quiet: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Install or update the runtime and SDK
  Update,

  /// Build the dependencies and the application
  Build {
    /// Extra arguments appended to the application's build command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
  },

  /// Run a command (default: the application) inside the sandbox
  Run {
    /// Command to run; flag-only arguments go to the default application
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
  },

  /// Run the test suite inside the sandbox
  Test {
    /// Extra arguments passed to the test runner
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
  },

  /// Debug a coredump with gdb inside the sandbox
  Gdb {
    /// coredumpctl match expressions selecting the dump
    #[arg(long = "matches", value_name = "MATCH")]
    matches: Vec<String>,

    /// Extra arguments passed to gdb
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
  },

  /// Remove the flatpak tree and the generated manifest
  Clean,

  /// Show the resolved configuration
  Status,
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .without_time()
    .init();

  let cli = Cli::parse();
  if let Err(err) = dispatch(cli) {
    eprintln!("flatkit: {err:#}");
    std::process::exit(exit_code(&err));
  }
}

fn dispatch(cli: Cli) -> Result<()> {
  let config = flatkit_lib::Config::new(
    &cli.platform,
    cli.debug,
    cli.source_root,
    cli.manifest,
    cli.quiet,
  )?;
  tracing::debug!(platform = %config.platform, build_type = %config.build_type, "resolved configuration");

  match cli.command {
    Commands::Update => cmd::cmd_update(config),
    Commands::Build { args } => cmd::cmd_build(config, &args),
    Commands::Run { args } => cmd::cmd_run(config, &args),
    Commands::Test { args } => cmd::cmd_test(config, &args),
    Commands::Gdb { matches, args } => cmd::cmd_gdb(config, &matches, &args),
    Commands::Clean => cmd::cmd_clean(config),
    Commands::Status => cmd::cmd_status(&config),
  }
}

/// A sandboxed child's exit code becomes our own; everything else is 1.
///
/// `EnvError::Sandbox` is a transparent wrapper, so the inner `SandboxError`
/// does not show up as a separate element of the error chain; it has to be
/// matched through the wrapper.
fn exit_code(err: &anyhow::Error) -> i32 {
  for cause in err.chain() {
    if let Some(EnvError::Sandbox(SandboxError::ExecutionFailed { code })) =
      cause.downcast_ref::<EnvError>()
    {
      return *code;
    }
    if let Some(SandboxError::ExecutionFailed { code }) = cause.downcast_ref::<SandboxError>() {
      return *code;
    }
  }
  1
}

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::Context;

  #[test]
  fn sandbox_child_exit_code_becomes_process_exit_code() {
    let err = anyhow::Error::from(EnvError::Sandbox(SandboxError::ExecutionFailed { code: 42 }));
    assert_eq!(exit_code(&err), 42);
  }

  #[test]
  fn context_wrapping_preserves_the_code() {
    let err = Err::<(), _>(EnvError::Sandbox(SandboxError::ExecutionFailed { code: 3 }))
      .context("running tests")
      .unwrap_err();
    assert_eq!(exit_code(&err), 3);
  }

  #[test]
  fn bare_sandbox_error_is_mapped_too() {
    let err = anyhow::Error::from(SandboxError::ExecutionFailed { code: 7 });
    assert_eq!(exit_code(&err), 7);
  }

  #[test]
  fn other_errors_exit_one() {
    assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    let err = anyhow::Error::from(EnvError::Sandbox(SandboxError::Terminated));
    assert_eq!(exit_code(&err), 1);
  }
}
