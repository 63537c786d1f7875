//! flatkit-lib: Core logic for the flatkit environment bootstrapper
//!
//! This crate provides the pieces behind the `flatkit` binary:
//! - `Config`: immutable run configuration derived once from CLI options
//! - `manifest`: template manifest loading and expansion
//! - `sandbox`: running commands inside the flatpak sandbox
//! - `packages`: flatpak runtime/SDK and remote bookkeeping
//! - `devenv`: orchestration of install/build/run/test/debug steps

pub mod config;
pub mod consts;
pub mod devenv;
pub mod manifest;
pub mod packages;
pub mod sandbox;

pub use config::{BuildType, Config};
pub use devenv::DevEnv;
