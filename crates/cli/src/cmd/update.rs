//! Update command implementation.

use anyhow::{Context, Result};
use flatkit_lib::{Config, DevEnv};

pub fn cmd_update(config: Config) -> Result<()> {
  let quiet = config.quiet;
  let env = DevEnv::new(config).context("loading the template manifest")?;

  env.update().context("updating the runtime and SDK")?;
  if !quiet {
    println!("Runtime and SDK are up to date (branch {}).", env.sdk_branch());
  }
  Ok(())
}
