//! Manifest file loading.
//!
//! Templates are YAML (by `.yaml` extension) or JSON with `//` and `/* */`
//! comments (any other extension). `%(COMMAND)s` and `%(PORTNAME)s`
//! placeholders are substituted textually before parsing.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{Manifest, ManifestError, Module};

/// Placeholder values substituted into template text.
#[derive(Debug, Clone, Copy)]
pub struct Substitutions<'a> {
  /// Replaces `%(PORTNAME)s`.
  pub port_name: &'a str,
  /// Replaces `%(COMMAND)s`.
  pub command: &'a str,
}

impl Substitutions<'_> {
  fn apply(&self, text: &str) -> String {
    text
      .replace("%(PORTNAME)s", self.port_name)
      .replace("%(COMMAND)s", self.command)
  }
}

/// Remove `//` and `/* */` comments from JSON text.
///
/// Comment markers inside single- or double-quoted strings are not comments
/// and are preserved verbatim, so the stripper tracks quote state instead of
/// pattern-matching blindly.
pub fn strip_comments(input: &str) -> String {
  let mut out = String::with_capacity(input.len());
  let mut chars = input.chars().peekable();

  while let Some(ch) = chars.next() {
    match ch {
      '"' | '\'' => {
        out.push(ch);
        let mut escaped = false;
        for inner in chars.by_ref() {
          out.push(inner);
          if escaped {
            escaped = false;
          } else if inner == '\\' {
            escaped = true;
          } else if inner == ch {
            break;
          }
        }
      }
      '/' => match chars.peek() {
        Some('/') => {
          // Line comment: drop everything up to (not including) the newline.
          chars.next();
          while let Some(&next) = chars.peek() {
            if next == '\n' {
              break;
            }
            chars.next();
          }
        }
        Some('*') => {
          chars.next();
          let mut star = false;
          for inner in chars.by_ref() {
            if star && inner == '/' {
              break;
            }
            star = inner == '*';
          }
        }
        _ => out.push('/'),
      },
      _ => out.push(ch),
    }
  }

  out
}

fn load_value(path: &Path, subst: Option<&Substitutions<'_>>) -> Result<Value, ManifestError> {
  let text = fs::read_to_string(path).map_err(|source| ManifestError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let text = match subst {
    Some(subst) => subst.apply(&text),
    None => text,
  };

  let is_yaml = path.extension().is_some_and(|ext| ext == "yaml");
  let value: Value = if is_yaml {
    serde_yaml::from_str(&text).map_err(|err| ManifestError::Parse {
      path: path.to_path_buf(),
      message: err.to_string(),
    })?
  } else {
    serde_json::from_str(&strip_comments(&text)).map_err(|err| ManifestError::Parse {
      path: path.to_path_buf(),
      message: err.to_string(),
    })?
  };

  if value.is_null() {
    return Err(ManifestError::Empty {
      path: path.to_path_buf(),
    });
  }

  debug!(path = %path.display(), yaml = is_yaml, "loaded manifest");
  Ok(value)
}

fn from_value<T: DeserializeOwned>(path: &Path, value: Value) -> Result<T, ManifestError> {
  serde_json::from_value(value).map_err(|err| ManifestError::Parse {
    path: path.to_path_buf(),
    message: err.to_string(),
  })
}

/// Load a manifest file, substituting placeholders when given.
pub fn load_manifest(path: &Path, subst: Option<&Substitutions<'_>>) -> Result<Manifest, ManifestError> {
  let value = load_value(path, subst)?;
  from_value(path, value)
}

/// Load a sub-manifest or override file as a list of modules.
///
/// A file holding a single module is wrapped into a one-element list.
pub fn load_modules(path: &Path, subst: Option<&Substitutions<'_>>) -> Result<Vec<Module>, ManifestError> {
  let value = load_value(path, subst)?;
  match value {
    Value::Array(_) => from_value(path, value),
    _ => Ok(vec![from_value(path, value)?]),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
  }

  // ==========================================================================
  // Comment stripping
  // ==========================================================================

  #[test]
  fn strips_line_comment() {
    assert_eq!(strip_comments("{\"a\": 1} // note"), "{\"a\": 1} ");
  }

  #[test]
  fn strips_block_comment() {
    assert_eq!(strip_comments("{/* gone */\"a\": 1}"), "{\"a\": 1}");
  }

  #[test]
  fn strips_multiline_block_comment() {
    assert_eq!(strip_comments("[1,\n/* a\nb\nc */\n2]"), "[1,\n\n2]");
  }

  #[test]
  fn preserves_markers_inside_double_quotes() {
    assert_eq!(
      strip_comments("{\"url\": \"http://x\"} // note"),
      "{\"url\": \"http://x\"} "
    );
  }

  #[test]
  fn preserves_markers_inside_single_quotes() {
    assert_eq!(strip_comments("'/* not a comment */'"), "'/* not a comment */'");
  }

  #[test]
  fn handles_escaped_quote_in_string() {
    assert_eq!(
      strip_comments(r#"{"a": "x\"y//z"} // gone"#),
      r#"{"a": "x\"y//z"} "#
    );
  }

  #[test]
  fn keeps_newline_after_line_comment() {
    assert_eq!(strip_comments("1 // gone\n2"), "1 \n2");
  }

  #[test]
  fn lone_slash_preserved() {
    assert_eq!(strip_comments("a / b"), "a / b");
  }

  // ==========================================================================
  // Placeholder substitution
  // ==========================================================================

  #[test]
  fn substitutes_placeholders_exactly() {
    let subst = Substitutions {
      port_name: "gtk",
      command: "run",
    };
    assert_eq!(
      subst.apply("name %(PORTNAME)s runs %(COMMAND)s, 100%(PORTNAME)s"),
      "name gtk runs run, 100gtk"
    );
  }

  #[test]
  fn substitution_leaves_other_text_alone() {
    let subst = Substitutions {
      port_name: "gtk",
      command: "run",
    };
    assert_eq!(subst.apply("no placeholders %s here"), "no placeholders %s here");
  }

  // ==========================================================================
  // Loading
  // ==========================================================================

  #[test]
  fn loads_json_with_comments() {
    let temp = TempDir::new().unwrap();
    let path = write(
      &temp,
      "m.json",
      r#"{
        // the modules
        "modules": [{"name": "a" /* inline */}]
      }"#,
    );

    let manifest = load_manifest(&path, None).unwrap();
    assert_eq!(manifest.modules.len(), 1);
  }

  #[test]
  fn loads_yaml_by_extension() {
    let temp = TempDir::new().unwrap();
    let path = write(
      &temp,
      "m.yaml",
      "runtime-version: '3.38'\nmodules:\n  - name: a\n",
    );

    let manifest = load_manifest(&path, None).unwrap();
    assert_eq!(manifest.runtime_version.as_deref(), Some("3.38"));
  }

  #[test]
  fn substitutes_before_parsing() {
    let temp = TempDir::new().unwrap();
    let path = write(
      &temp,
      "m.json",
      r#"{"modules": [{"name": "%(PORTNAME)s", "x-run": "%(COMMAND)s"}]}"#,
    );
    let subst = Substitutions {
      port_name: "org.flatkit.GTK",
      command: "run-app --gtk",
    };

    let manifest = load_manifest(&path, Some(&subst)).unwrap();
    let crate::manifest::ModuleEntry::Module(module) = &manifest.modules[0] else {
      panic!("expected inline module");
    };
    assert_eq!(module.name, "org.flatkit.GTK");
    assert_eq!(module.rest["x-run"], "run-app --gtk");
  }

  #[test]
  fn empty_yaml_fails() {
    let temp = TempDir::new().unwrap();
    let path = write(&temp, "m.yaml", "");
    assert!(matches!(load_manifest(&path, None), Err(ManifestError::Empty { .. })));
  }

  #[test]
  fn missing_file_fails() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("absent.json");
    assert!(matches!(load_manifest(&path, None), Err(ManifestError::Read { .. })));
  }

  #[test]
  fn manifest_without_modules_fails() {
    let temp = TempDir::new().unwrap();
    let path = write(&temp, "m.json", r#"{"runtime-version": "3.38"}"#);
    assert!(matches!(load_manifest(&path, None), Err(ManifestError::Parse { .. })));
  }

  #[test]
  fn single_module_file_wraps_to_list() {
    let temp = TempDir::new().unwrap();
    let path = write(&temp, "sub.json", r#"{"name": "solo"}"#);

    let modules = load_modules(&path, None).unwrap();
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].name, "solo");
  }

  #[test]
  fn module_list_file_keeps_order() {
    let temp = TempDir::new().unwrap();
    let path = write(&temp, "sub.json", r#"[{"name": "a"}, {"name": "b"}]"#);

    let modules = load_modules(&path, None).unwrap();
    let names: Vec<_> = modules.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
  }
}
