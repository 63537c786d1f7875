//! Clean command implementation.

use anyhow::{Context, Result};
use flatkit_lib::{Config, DevEnv};

pub fn cmd_clean(config: Config) -> Result<()> {
  let quiet = config.quiet;
  let env = DevEnv::new(config).context("loading the template manifest")?;

  env.clean()?;
  if !quiet {
    println!(
      "Removed the {} {} environment.",
      env.config.platform, env.config.build_type
    );
  }
  Ok(())
}
