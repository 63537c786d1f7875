//! Typed manifest structures.
//!
//! Only the keys the expander acts on are modelled as fields; everything
//! else (`buildsystem`, `config-opts`, `make-args`, …) is preserved verbatim
//! through flattened maps so the generated manifest round-trips exactly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ManifestError;

/// One source of a module.
///
/// `git` sources carry a `url`, `patch` and `file` sources a `path` that is
/// rewritten to an absolute path during expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
  #[serde(rename = "type")]
  pub kind: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,

  #[serde(flatten)]
  pub rest: Map<String, Value>,
}

/// One buildable unit within a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
  /// Unique within the flattened module list; join key for overrides.
  pub name: String,

  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub sources: Vec<Source>,

  #[serde(flatten)]
  pub rest: Map<String, Value>,
}

impl Module {
  /// Type of the first source, if any.
  pub fn first_source_kind(&self) -> Option<&str> {
    self.sources.first().map(|source| source.kind.as_str())
  }

  /// The module's single `build-commands` entry.
  ///
  /// The target application module drives its build through exactly one
  /// command; more or fewer is a configuration error.
  pub fn build_command(&self) -> Result<&str, ManifestError> {
    let commands = self
      .rest
      .get("build-commands")
      .and_then(Value::as_array)
      .map(Vec::as_slice)
      .unwrap_or_default();
    match commands {
      [Value::String(command)] => Ok(command),
      _ => Err(ManifestError::BuildCommands {
        name: self.name.clone(),
        count: commands.len(),
      }),
    }
  }

  /// Host path of the module's `file://` source url.
  pub fn local_source_path(&self) -> Result<&str, ManifestError> {
    self
      .sources
      .first()
      .and_then(|source| source.url.as_deref())
      .and_then(|url| url.strip_prefix("file://"))
      .ok_or_else(|| ManifestError::NoLocalSource {
        name: self.name.clone(),
      })
  }
}

/// A `modules` entry: an inline module or a relative path to a sub-manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModuleEntry {
  Path(String),
  Module(Module),
}

/// A template or generated manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
  pub modules: Vec<ModuleEntry>,

  #[serde(rename = "runtime-version", default, skip_serializing_if = "Option::is_none")]
  pub runtime_version: Option<String>,

  #[serde(rename = "finish-args", default, skip_serializing_if = "Vec::is_empty")]
  pub finish_args: Vec<String>,

  /// SDK-selection hint, stripped on expansion.
  #[serde(rename = "sdk-hash", default, skip_serializing_if = "Option::is_none")]
  pub sdk_hash: Option<String>,

  /// Runtime-selection hint, stripped on expansion.
  #[serde(rename = "runtime-hash", default, skip_serializing_if = "Option::is_none")]
  pub runtime_hash: Option<String>,

  #[serde(flatten)]
  pub rest: Map<String, Value>,
}

impl Manifest {
  /// Find a module by name among the inline entries.
  pub fn module(&self, name: &str) -> Option<&Module> {
    self.modules.iter().find_map(|entry| match entry {
      ModuleEntry::Module(module) if module.name == name => Some(module),
      _ => None,
    })
  }
}
