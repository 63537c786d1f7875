//! Template manifest model, loading, and expansion.
//!
//! A manifest declares the modules to build in JSON-with-comments or YAML.
//! Expansion turns a template manifest into the generated manifest consumed
//! by flatpak-builder.

mod expand;
mod load;
mod types;

use std::path::PathBuf;

use thiserror::Error;

pub use expand::{expand_manifest, expand_with_overrides, ExpandRequest, OverrideSet};
pub use load::{load_manifest, load_modules, strip_comments, Substitutions};
pub use types::{Manifest, Module, ModuleEntry, Source};

/// Errors that can occur while loading or expanding a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("cannot read manifest {path}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },

  #[error("cannot parse manifest {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("manifest {path} is empty")]
  Empty { path: PathBuf },

  #[error("manifest {path} has no '{key}' key")]
  MissingKey { path: PathBuf, key: &'static str },

  #[error("module '{name}' not found in {path}")]
  ModuleNotFound { name: String, path: PathBuf },

  #[error("module '{name}' must have exactly one build command, found {count}")]
  BuildCommands { name: String, count: usize },

  #[error("module '{name}' has no local source url")]
  NoLocalSource { name: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}
