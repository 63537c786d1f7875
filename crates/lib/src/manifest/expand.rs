//! Manifest expansion.
//!
//! Expansion turns a template manifest into the generated manifest handed to
//! flatpak-builder: sub-manifest references are flattened into one ordered
//! module list, override modules are spliced in, relative `patch`/`file`
//! source paths become absolute, and the target module's git source is
//! repointed at the local checkout.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{load_manifest, load_modules, Manifest, ManifestError, Module, ModuleEntry, Substitutions};
use crate::consts;

/// Inputs of one expansion run.
#[derive(Debug, Clone, Copy)]
pub struct ExpandRequest<'a> {
  /// Template manifest to expand.
  pub manifest_path: &'a Path,
  /// Where the generated manifest is written.
  pub outfile: &'a Path,
  /// Name of the target module (its git source becomes a local checkout).
  pub port_name: &'a str,
  /// Checkout path the target module's git url is rewritten to.
  pub source_root: &'a Path,
  /// Value substituted for `%(COMMAND)s` in the template.
  pub command: &'a str,
}

/// Caller-supplied replacement modules.
///
/// Matching is first-match-wins and consuming: once an override has replaced
/// a module, a later module with the same name is left alone. Overrides that
/// never match are inserted just before the last module of the final list.
#[derive(Debug, Default)]
pub struct OverrideSet {
  dir: PathBuf,
  entries: Vec<Module>,
  consumed: Vec<bool>,
}

impl OverrideSet {
  pub fn empty() -> Self {
    Self::default()
  }

  /// Load overrides from a manifest file; a load failure yields an empty set.
  pub fn load(path: &Path) -> Self {
    match load_modules(path, None) {
      Ok(entries) => {
        let consumed = vec![false; entries.len()];
        OverrideSet {
          dir: path.parent().unwrap_or_else(|| Path::new("")).to_path_buf(),
          entries,
          consumed,
        }
      }
      Err(err) => {
        warn!(path = %path.display(), error = %err, "ignoring unloadable override manifest");
        OverrideSet::empty()
      }
    }
  }

  /// Load overrides from the file named by `FLATKIT_EXTRA_MODULES`, if set.
  pub fn from_env() -> Self {
    match std::env::var_os(consts::EXTRA_MODULES_ENV) {
      Some(path) => OverrideSet::load(Path::new(&path)),
      None => OverrideSet::empty(),
    }
  }

  /// Directory of the override manifest, for source path rewriting.
  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Take the first unconsumed override with the given name.
  fn take(&mut self, name: &str) -> Option<Module> {
    for (index, module) in self.entries.iter().enumerate() {
      if !self.consumed[index] && module.name == name {
        self.consumed[index] = true;
        return Some(module.clone());
      }
    }
    None
  }

  /// Unconsumed overrides, in their original file order.
  fn remaining(self) -> Vec<Module> {
    self
      .entries
      .into_iter()
      .zip(self.consumed)
      .filter_map(|(module, consumed)| (!consumed).then_some(module))
      .collect()
  }
}

/// Expand a template manifest, reading overrides from the environment.
pub fn expand_manifest(request: &ExpandRequest<'_>) -> Result<(), ManifestError> {
  expand_with_overrides(request, OverrideSet::from_env())
}

/// Expand a template manifest with an explicit override set.
pub fn expand_with_overrides(
  request: &ExpandRequest<'_>,
  mut overrides: OverrideSet,
) -> Result<(), ManifestError> {
  match fs::remove_file(request.outfile) {
    Ok(()) => {}
    Err(err) if err.kind() == ErrorKind::NotFound => {}
    Err(err) => return Err(err.into()),
  }

  let subst = Substitutions {
    port_name: request.port_name,
    command: request.command,
  };
  let mut manifest = load_manifest(request.manifest_path, Some(&subst))?;

  // SDK-selection hints, not build content.
  manifest.sdk_hash = None;
  manifest.runtime_hash = None;

  let manifest_dir = request
    .manifest_path
    .parent()
    .unwrap_or_else(|| Path::new(""))
    .to_path_buf();

  // Flatten sub-manifests into one ordered list, splicing in overrides.
  // Each module keeps the directory of the manifest that defined it so
  // relative source paths can be rewritten against the right base.
  let mut flattened: Vec<(Module, PathBuf)> = Vec::new();
  for entry in std::mem::take(&mut manifest.modules) {
    let (modules, dir) = match entry {
      ModuleEntry::Path(relative) => {
        let sub_path = manifest_dir.join(&relative);
        let dir = sub_path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        (load_modules(&sub_path, Some(&subst))?, dir)
      }
      ModuleEntry::Module(module) => (vec![module], manifest_dir.clone()),
    };

    for module in modules {
      match overrides.take(&module.name) {
        Some(replacement) => {
          debug!(name = %module.name, "module replaced by override");
          flattened.push((replacement, overrides.dir().to_path_buf()));
        }
        None => flattened.push((module, dir.clone())),
      }
    }
  }

  // Unmatched overrides land just before the last module, which by
  // convention is the target module.
  let override_dir = overrides.dir().to_path_buf();
  let insert_at = flattened.len().saturating_sub(1);
  for (offset, module) in overrides.remaining().into_iter().enumerate() {
    debug!(name = %module.name, "inserting unmatched override");
    flattened.insert(insert_at + offset, (module, override_dir.clone()));
  }

  for (module, dir) in &mut flattened {
    rewrite_sources(module, dir, request);
  }

  manifest.modules = flattened
    .into_iter()
    .map(|(module, _)| ModuleEntry::Module(module))
    .collect();

  let rendered = serde_json::to_string_pretty(&manifest).map_err(|err| ManifestError::Parse {
    path: request.outfile.to_path_buf(),
    message: err.to_string(),
  })?;
  fs::write(request.outfile, rendered)?;

  info!(
    template = %request.manifest_path.display(),
    outfile = %request.outfile.display(),
    "expanded manifest"
  );
  Ok(())
}

/// Rewrite one module's sources in place.
///
/// The target module's git source is repointed at the local checkout; every
/// `patch`/`file` source path is made absolute against the directory of the
/// manifest that defined the module.
fn rewrite_sources(module: &mut Module, dir: &Path, request: &ExpandRequest<'_>) {
  if module.name == request.port_name && module.first_source_kind() == Some("git") {
    let url = format!("file://{}", request.source_root.display());
    module.sources[0].url = Some(url);
  }

  for source in &mut module.sources {
    if source.kind == "patch" || source.kind == "file" {
      if let Some(path) = source.path.take() {
        source.path = Some(dir.join(path).to_string_lossy().into_owned());
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tempfile::TempDir;

  fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
  }

  fn expand_in(temp: &TempDir, template: &str) -> Manifest {
    expand_in_with(temp, template, OverrideSet::empty())
  }

  fn expand_in_with(temp: &TempDir, template: &str, overrides: OverrideSet) -> Manifest {
    let manifest_path = write(temp.path(), "template.json", template);
    let outfile = temp.path().join("generated.json");
    let request = ExpandRequest {
      manifest_path: &manifest_path,
      outfile: &outfile,
      port_name: "app",
      source_root: Path::new("/app/project"),
      command: "run-app --gtk",
    };
    expand_with_overrides(&request, overrides).unwrap();
    serde_json::from_str(&fs::read_to_string(&outfile).unwrap()).unwrap()
  }

  fn module_names(manifest: &Manifest) -> Vec<&str> {
    manifest
      .modules
      .iter()
      .map(|entry| match entry {
        ModuleEntry::Module(module) => module.name.as_str(),
        ModuleEntry::Path(path) => path.as_str(),
      })
      .collect()
  }

  // ==========================================================================
  // Flattening
  // ==========================================================================

  #[test]
  fn flattening_preserves_order() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "sub.json", r#"[{"name": "a"}]"#);

    let manifest = expand_in(&temp, r#"{"modules": ["sub.json", {"name": "b"}]}"#);
    assert_eq!(module_names(&manifest), ["a", "b"]);
  }

  #[test]
  fn single_module_submanifest_is_wrapped() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "solo.json", r#"{"name": "solo"}"#);

    let manifest = expand_in(&temp, r#"{"modules": ["solo.json", {"name": "app"}]}"#);
    assert_eq!(module_names(&manifest), ["solo", "app"]);
  }

  #[test]
  fn submanifest_resolves_relative_to_template() {
    let temp = TempDir::new().unwrap();
    fs::create_dir(temp.path().join("deps")).unwrap();
    write(temp.path().join("deps").as_path(), "sub.json", r#"[{"name": "dep"}]"#);

    let manifest = expand_in(&temp, r#"{"modules": ["deps/sub.json", {"name": "app"}]}"#);
    assert_eq!(module_names(&manifest), ["dep", "app"]);
  }

  #[test]
  fn hash_hints_are_stripped() {
    let temp = TempDir::new().unwrap();
    let manifest = expand_in(
      &temp,
      r#"{"sdk-hash": "a", "runtime-hash": "b", "modules": [{"name": "app"}]}"#,
    );
    assert_eq!(manifest.sdk_hash, None);
    assert_eq!(manifest.runtime_hash, None);
  }

  #[test]
  fn placeholders_substituted_in_template_and_submanifest() {
    let temp = TempDir::new().unwrap();
    write(
      temp.path(),
      "sub.json",
      r#"[{"name": "dep", "x-port": "%(PORTNAME)s"}]"#,
    );

    let manifest = expand_in(
      &temp,
      r#"{"modules": ["sub.json", {"name": "%(PORTNAME)s", "x-run": "%(COMMAND)s"}]}"#,
    );
    assert_eq!(module_names(&manifest), ["dep", "app"]);
    let ModuleEntry::Module(dep) = &manifest.modules[0] else {
      panic!("expected module");
    };
    assert_eq!(dep.rest["x-port"], "app");
    let ModuleEntry::Module(app) = &manifest.modules[1] else {
      panic!("expected module");
    };
    assert_eq!(app.rest["x-run"], "run-app --gtk");
  }

  // ==========================================================================
  // Overrides
  // ==========================================================================

  fn override_set(temp: &TempDir, content: &str) -> OverrideSet {
    let path = write(temp.path(), "overrides.json", content);
    OverrideSet::load(&path)
  }

  #[test]
  fn override_replaces_matching_module() {
    let temp = TempDir::new().unwrap();
    let overrides = override_set(&temp, r#"[{"name": "a", "x-v": 2}]"#);

    let manifest = expand_in_with(
      &temp,
      r#"{"modules": [{"name": "a", "x-v": 1}, {"name": "app"}]}"#,
      overrides,
    );
    let ModuleEntry::Module(module) = &manifest.modules[0] else {
      panic!("expected module");
    };
    assert_eq!(module.rest["x-v"], json!(2));
  }

  #[test]
  fn unmatched_override_inserted_before_last_module() {
    let temp = TempDir::new().unwrap();
    let overrides = override_set(&temp, r#"[{"name": "c"}]"#);

    let manifest = expand_in_with(
      &temp,
      r#"{"modules": [{"name": "a"}, {"name": "app"}]}"#,
      overrides,
    );
    assert_eq!(module_names(&manifest), ["a", "c", "app"]);
  }

  #[test]
  fn multiple_unmatched_overrides_keep_their_order() {
    let temp = TempDir::new().unwrap();
    let overrides = override_set(&temp, r#"[{"name": "x"}, {"name": "y"}]"#);

    let manifest = expand_in_with(&temp, r#"{"modules": [{"name": "app"}]}"#, overrides);
    assert_eq!(module_names(&manifest), ["x", "y", "app"]);
  }

  #[test]
  fn override_consumed_only_once() {
    // The first matching module consumes the override; a later module with
    // the same name is left as defined.
    let temp = TempDir::new().unwrap();
    let overrides = override_set(&temp, r#"[{"name": "dup", "x-v": 9}]"#);

    let manifest = expand_in_with(
      &temp,
      r#"{"modules": [{"name": "dup", "x-v": 1}, {"name": "dup", "x-v": 2}, {"name": "app"}]}"#,
      overrides,
    );
    let values: Vec<_> = manifest
      .modules
      .iter()
      .take(2)
      .map(|entry| match entry {
        ModuleEntry::Module(module) => module.rest["x-v"].clone(),
        ModuleEntry::Path(_) => panic!("expected module"),
      })
      .collect();
    assert_eq!(values, [json!(9), json!(2)]);
  }

  #[test]
  fn unloadable_override_file_yields_empty_set() {
    let temp = TempDir::new().unwrap();
    let overrides = OverrideSet::load(&temp.path().join("absent.json"));
    assert!(overrides.is_empty());
  }

  // ==========================================================================
  // Path rewriting
  // ==========================================================================

  #[test]
  fn patch_paths_rewritten_against_defining_submanifest() {
    let temp = TempDir::new().unwrap();
    fs::create_dir(temp.path().join("dir")).unwrap();
    write(
      temp.path().join("dir").as_path(),
      "sub.json",
      r#"[{"name": "dep", "sources": [
        {"type": "git", "url": "https://example.org/dep.git"},
        {"type": "patch", "path": "fix.patch"}
      ]}]"#,
    );

    let manifest = expand_in(&temp, r#"{"modules": ["dir/sub.json", {"name": "app"}]}"#);
    let ModuleEntry::Module(dep) = &manifest.modules[0] else {
      panic!("expected module");
    };
    assert_eq!(
      dep.sources[1].path.as_deref().unwrap(),
      temp.path().join("dir/fix.patch").to_str().unwrap()
    );
  }

  #[test]
  fn file_paths_rewritten_against_template_dir() {
    let temp = TempDir::new().unwrap();
    let manifest = expand_in(
      &temp,
      r#"{"modules": [{"name": "app", "sources": [{"type": "file", "path": "data.bin"}]}]}"#,
    );
    let ModuleEntry::Module(app) = &manifest.modules[0] else {
      panic!("expected module");
    };
    assert_eq!(
      app.sources[0].path.as_deref().unwrap(),
      temp.path().join("data.bin").to_str().unwrap()
    );
  }

  #[test]
  fn target_module_git_source_becomes_local() {
    let temp = TempDir::new().unwrap();
    let manifest = expand_in(
      &temp,
      r#"{"modules": [
        {"name": "dep", "sources": [{"type": "git", "url": "https://example.org/dep.git"}]},
        {"name": "app", "sources": [{"type": "git", "url": "https://example.org/app.git"}]}
      ]}"#,
    );

    let ModuleEntry::Module(dep) = &manifest.modules[0] else {
      panic!("expected module");
    };
    assert_eq!(dep.sources[0].url.as_deref(), Some("https://example.org/dep.git"));

    let ModuleEntry::Module(app) = &manifest.modules[1] else {
      panic!("expected module");
    };
    assert_eq!(app.sources[0].url.as_deref(), Some("file:///app/project"));
  }

  #[test]
  fn module_without_sources_passes_through() {
    let temp = TempDir::new().unwrap();
    let manifest = expand_in(
      &temp,
      r#"{"modules": [{"name": "cleanup", "buildsystem": "simple"}, {"name": "app"}]}"#,
    );
    assert_eq!(module_names(&manifest), ["cleanup", "app"]);
  }

  // ==========================================================================
  // Output file
  // ==========================================================================

  #[test]
  fn expansion_is_idempotent() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "sub.json", r#"[{"name": "a"}]"#);
    let manifest_path = write(
      temp.path(),
      "template.json",
      r#"{"runtime-version": "3.38", "modules": ["sub.json", {"name": "app"}]}"#,
    );
    let outfile = temp.path().join("generated.json");
    let request = ExpandRequest {
      manifest_path: &manifest_path,
      outfile: &outfile,
      port_name: "app",
      source_root: Path::new("/app/project"),
      command: "run-app --gtk",
    };

    expand_with_overrides(&request, OverrideSet::empty()).unwrap();
    let first = fs::read_to_string(&outfile).unwrap();
    expand_with_overrides(&request, OverrideSet::empty()).unwrap();
    let second = fs::read_to_string(&outfile).unwrap();

    assert_eq!(first, second);
  }

  #[test]
  fn stale_output_is_replaced() {
    let temp = TempDir::new().unwrap();
    let manifest_path = write(temp.path(), "template.json", r#"{"modules": [{"name": "app"}]}"#);
    let outfile = write(temp.path(), "generated.json", "stale");
    let request = ExpandRequest {
      manifest_path: &manifest_path,
      outfile: &outfile,
      port_name: "app",
      source_root: Path::new("/app/project"),
      command: "run",
    };

    expand_with_overrides(&request, OverrideSet::empty()).unwrap();
    let content = fs::read_to_string(&outfile).unwrap();
    assert!(content.contains("\"app\""));
  }

  #[test]
  fn unparsable_template_fails_without_output() {
    let temp = TempDir::new().unwrap();
    let manifest_path = write(temp.path(), "template.json", "not json");
    let outfile = temp.path().join("generated.json");
    let request = ExpandRequest {
      manifest_path: &manifest_path,
      outfile: &outfile,
      port_name: "app",
      source_root: Path::new("/app/project"),
      command: "run",
    };

    let result = expand_with_overrides(&request, OverrideSet::empty());
    assert!(matches!(result, Err(ManifestError::Parse { .. })));
    assert!(!outfile.exists());
  }
}
