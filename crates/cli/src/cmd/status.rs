//! Status command implementation.
//!
//! Prints the resolved configuration. Works without a template manifest so
//! it can be used to check path derivation before anything is set up.

use anyhow::Result;
use flatkit_lib::{Config, DevEnv};

pub fn cmd_status(config: &Config) -> Result<()> {
  println!("Platform:        {}", config.platform);
  println!("Build type:      {}", config.build_type);
  println!("Application id:  {}", config.app_id);
  println!("Source root:     {}", config.source_root.display());
  println!("Manifest:        {}", config.manifest_path.display());
  println!("Build directory: {}", config.build_path.display());
  println!("Flatpak tree:    {}", config.flatpak_build_path.display());
  println!(
    "Environment:     {}",
    if config.has_environment() { "ready" } else { "not built" }
  );

  match DevEnv::new(config.clone()) {
    Ok(env) => println!("SDK branch:      {}", env.sdk_branch()),
    Err(err) => println!("SDK branch:      unknown ({err})"),
  }
  Ok(())
}
