//! Gdb command implementation.

use anyhow::{Context, Result};
use flatkit_lib::{Config, DevEnv};

pub fn cmd_gdb(config: Config, matches: &[String], args: &[String]) -> Result<()> {
  let env = DevEnv::new(config).context("loading the template manifest")?;
  env.debug_core(matches, args)?;
  Ok(())
}
