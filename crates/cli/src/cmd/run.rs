//! Run command implementation.
//!
//! `flatkit run some-tool --x` runs that command in the sandbox. When every
//! argument is a flag (or none are given) the default application runs
//! instead, with the flags appended to it.

use anyhow::{Context, Result};
use flatkit_lib::{Config, DevEnv};

pub fn cmd_run(config: Config, args: &[String]) -> Result<()> {
  let env = DevEnv::new(config).context("loading the template manifest")?;

  if args.iter().all(|arg| arg.starts_with('-')) {
    env.run(&[], args)?;
  } else {
    env.run(args, &[])?;
  }
  Ok(())
}
