//! Build command implementation.
//!
//! Dependencies are built by flatpak-builder into the flatpak tree; the
//! application itself is then built inside the sandbox so incremental
//! rebuilds reuse the host build directory.

use anyhow::{Context, Result};
use flatkit_lib::{Config, DevEnv};

pub fn cmd_build(config: Config, args: &[String]) -> Result<()> {
  let quiet = config.quiet;
  let env = DevEnv::new(config).context("loading the template manifest")?;

  env.build_app(args)?;
  if !quiet {
    println!(
      "Built {} ({}) into {}",
      env.config.app_id,
      env.config.build_type,
      env.config.build_path.display()
    );
  }
  Ok(())
}
