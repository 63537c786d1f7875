//! Flatpak runtime/SDK and remote bookkeeping.
//!
//! Thin wrapper over the `flatpak` CLI: version preflight, remote
//! management, installed-package detection, and install/update of the
//! runtime and SDK packages named by the template manifest.

use std::process::Command;

use semver::Version;
use thiserror::Error;
use tracing::{debug, info};

use crate::consts;

/// Errors from the flatpak collaborators.
#[derive(Debug, Error)]
pub enum FlatpakError {
  #[error("'{tool}' not found; install it from http://flatpak.org/ and retry")]
  ToolMissing { tool: String },

  #[error("{tool} {found} found but {required} or newer is required")]
  ToolTooOld {
    tool: String,
    found: String,
    required: String,
  },

  #[error("cannot parse version '{raw}' reported by {tool}")]
  BadVersion { tool: String, raw: String },

  #[error("'{command}' exited with code {code:?}")]
  CommandFailed { command: String, code: Option<i32> },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Check that `flatpak` and `flatpak-builder` are present and recent enough.
pub fn check_tool_versions() -> Result<(), FlatpakError> {
  for tool in ["flatpak", "flatpak-builder"] {
    let output = Command::new(tool)
      .arg("--version")
      .output()
      .map_err(|_| FlatpakError::ToolMissing { tool: tool.to_string() })?;
    let raw = String::from_utf8_lossy(&output.stdout);
    let version = parse_tool_version(&raw).ok_or_else(|| FlatpakError::BadVersion {
      tool: tool.to_string(),
      raw: raw.trim().to_string(),
    })?;
    let required = parse_version(consts::FLATPAK_MIN_VERSION).ok_or_else(|| FlatpakError::BadVersion {
      tool: tool.to_string(),
      raw: consts::FLATPAK_MIN_VERSION.to_string(),
    })?;
    if version < required {
      return Err(FlatpakError::ToolTooOld {
        tool: tool.to_string(),
        found: version.to_string(),
        required: required.to_string(),
      });
    }
    debug!(tool, version = %version, "tool version ok");
  }
  Ok(())
}

/// Parse the version out of `Flatpak 1.14.4`-style output.
fn parse_tool_version(output: &str) -> Option<Version> {
  parse_version(output.split_whitespace().last()?)
}

/// Parse a version string, padding short forms (`1.2` becomes `1.2.0`).
fn parse_version(raw: &str) -> Option<Version> {
  let raw = raw.trim();
  let padded = match raw.matches('.').count() {
    0 => format!("{raw}.0.0"),
    1 => format!("{raw}.0"),
    _ => raw.to_string(),
  };
  Version::parse(&padded).ok()
}

/// Handle on the `flatpak` CLI.
#[derive(Debug, Clone, Copy)]
pub struct Flatpak {
  /// Operate on the per-user installation where supported.
  pub user: bool,
}

impl Flatpak {
  pub fn new(user: bool) -> Self {
    Flatpak { user }
  }

  fn command(&self, subcommand: &str, args: &[&str]) -> Result<Command, FlatpakError> {
    let mut command = Command::new("flatpak");
    command.arg(subcommand);
    if self.user && self.supports_user(subcommand)? {
      command.arg("--user");
    }
    command.args(args);
    Ok(command)
  }

  /// Not every flatpak subcommand accepts `--user`; ask its help text.
  fn supports_user(&self, subcommand: &str) -> Result<bool, FlatpakError> {
    let output = Command::new("flatpak")
      .arg(subcommand)
      .arg("--help")
      .output()
      .map_err(|_| FlatpakError::ToolMissing {
        tool: "flatpak".to_string(),
      })?;
    Ok(String::from_utf8_lossy(&output.stdout).contains("--user"))
  }

  /// Run a subcommand and capture its stdout.
  pub fn output(&self, subcommand: &str, args: &[&str]) -> Result<String, FlatpakError> {
    let mut command = self.command(subcommand, args)?;
    let output = command.output()?;
    if !output.status.success() {
      return Err(FlatpakError::CommandFailed {
        command: format!("flatpak {subcommand}"),
        code: output.status.code(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }

  /// Run a subcommand with inherited stdio (for user-visible progress).
  pub fn run(&self, subcommand: &str, args: &[&str]) -> Result<(), FlatpakError> {
    let mut command = self.command(subcommand, args)?;
    let status = command.status()?;
    if !status.success() {
      return Err(FlatpakError::CommandFailed {
        command: format!("flatpak {subcommand}"),
        code: status.code(),
      });
    }
    Ok(())
  }
}

/// One configured flatpak remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
  pub name: String,
  pub url: String,
  pub description: String,
}

/// The set of configured remotes.
#[derive(Debug)]
pub struct Remotes {
  flatpak: Flatpak,
  pub remotes: Vec<Remote>,
}

impl Remotes {
  /// Read the configured remotes from `flatpak remote-list -d`.
  pub fn detect(flatpak: Flatpak) -> Result<Self, FlatpakError> {
    let listing = flatpak.output("remote-list", &["-d"])?;
    Ok(Remotes {
      flatpak,
      remotes: parse_remote_list(&listing),
    })
  }

  /// Make sure a remote with this url exists.
  ///
  /// An existing remote with the same url wins regardless of its name; a
  /// name collision with a different url is repointed via `remote-modify`;
  /// otherwise the remote is added from its `.flatpakrepo` file.
  pub fn ensure(&mut self, name: &str, url: &str, repo_file: &str) -> Result<String, FlatpakError> {
    if let Some(existing) = self.remotes.iter().find(|remote| remote.url == url) {
      debug!(name = %existing.name, url, "remote already configured");
      return Ok(existing.name.clone());
    }

    if let Some(position) = self.remotes.iter().position(|remote| remote.name == name) {
      info!(name, url, "repointing remote");
      self
        .flatpak
        .run("remote-modify", &[name, &format!("--url={url}")])?;
      self.remotes[position].url = url.to_string();
      return Ok(name.to_string());
    }

    info!(name, url, "adding remote");
    self
      .flatpak
      .run("remote-add", &[name, "--from", repo_file, "--if-not-exists"])?;
    self.remotes.push(Remote {
      name: name.to_string(),
      url: url.to_string(),
      description: String::new(),
    });
    Ok(name.to_string())
  }
}

/// Parse `flatpak remote-list -d` rows into remotes.
///
/// Columns are whitespace-separated and the description may contain spaces;
/// the url is the first token carrying a scheme.
fn parse_remote_list(listing: &str) -> Vec<Remote> {
  let mut remotes = Vec::new();
  for row in listing.lines() {
    let mut tokens = row.split_whitespace();
    let Some(name) = tokens.next() else {
      continue;
    };

    let mut description = Vec::new();
    let mut url = None;
    for token in tokens {
      if token.contains("://") {
        url = Some(token.to_string());
        break;
      }
      description.push(token);
    }

    let Some(url) = url else {
      debug!(row, "no valid url in remote-list row");
      continue;
    };
    remotes.push(Remote {
      name: name.to_string(),
      url,
      description: description.join(" "),
    });
  }
  remotes
}

/// An installed (or installable) runtime/SDK reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRef {
  pub name: String,
  pub arch: String,
  pub branch: String,
}

/// Parse `flatpak list -d --all` rows into `name/arch/branch` references.
fn parse_installed_list(listing: &str) -> Vec<InstalledRef> {
  let mut refs = Vec::new();
  for row in listing.lines() {
    let Some(triple) = row.split_whitespace().next() else {
      continue;
    };
    let mut parts = triple.split('/');
    let (Some(name), Some(arch), Some(branch)) = (parts.next(), parts.next(), parts.next()) else {
      debug!(row, "unparsable list row");
      continue;
    };
    refs.push(InstalledRef {
      name: name.to_string(),
      arch: arch.to_string(),
      branch: branch.to_string(),
    });
  }
  refs
}

/// One runtime or SDK package to keep installed.
#[derive(Debug, Clone)]
pub struct Package {
  pub name: String,
  pub branch: String,
  pub arch: String,
  /// Pin updates to this commit when set (from the manifest's hash hints).
  pub commit: Option<String>,
}

impl Package {
  pub fn new(name: &str, branch: &str, commit: Option<String>) -> Self {
    Package {
      name: name.to_string(),
      branch: branch.to_string(),
      arch: consts::DEFAULT_ARCH.to_string(),
      commit,
    }
  }

  pub fn reference(&self) -> String {
    format!("{}/{}/{}", self.name, self.arch, self.branch)
  }

  pub fn is_installed(&self, flatpak: &Flatpak) -> Result<bool, FlatpakError> {
    let listing = flatpak.output("list", &["-d", "--all"])?;
    let installed = parse_installed_list(&listing);
    Ok(installed.iter().any(|entry| {
      entry.name == self.name && entry.branch == self.branch && entry.arch == self.arch
    }))
  }

  pub fn install(&self, flatpak: &Flatpak, remote: &str) -> Result<(), FlatpakError> {
    info!(package = %self.reference(), remote, "installing");
    flatpak.run("install", &[remote, &self.name, "--reinstall", &self.branch])
  }

  /// Update the package, installing it first when missing. Updates are
  /// pinned to the package's commit when one is set.
  pub fn update(&self, flatpak: &Flatpak, remote: &str) -> Result<(), FlatpakError> {
    if !self.is_installed(flatpak)? {
      return self.install(flatpak, remote);
    }

    info!(package = %self.reference(), commit = ?self.commit, "updating");
    let mut args: Vec<&str> = vec![&self.name, &self.branch];
    if let Some(commit) = &self.commit {
      args.push("--commit");
      args.push(commit);
    }
    flatpak.run("update", &args)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // ==========================================================================
  // Version parsing
  // ==========================================================================

  #[test]
  fn parses_tool_version_banner() {
    assert_eq!(parse_tool_version("Flatpak 1.14.4\n").unwrap(), Version::new(1, 14, 4));
    assert_eq!(
      parse_tool_version("flatpak-builder 1.2\n").unwrap(),
      Version::new(1, 2, 0)
    );
  }

  #[test]
  fn pads_short_versions() {
    assert_eq!(parse_version("1").unwrap(), Version::new(1, 0, 0));
    assert_eq!(parse_version("0.10").unwrap(), Version::new(0, 10, 0));
    assert_eq!(parse_version("0.10.1").unwrap(), Version::new(0, 10, 1));
  }

  #[test]
  fn minimum_version_comparison() {
    let minimum = parse_version(consts::FLATPAK_MIN_VERSION).unwrap();
    assert!(parse_version("0.9.9").unwrap() < minimum);
    assert!(parse_version("0.10.0").unwrap() >= minimum);
    assert!(parse_version("1.14.4").unwrap() >= minimum);
  }

  #[test]
  fn garbage_version_is_rejected() {
    assert!(parse_tool_version("").is_none());
    assert!(parse_version("not-a-version").is_none());
  }

  // ==========================================================================
  // remote-list parsing
  // ==========================================================================

  #[test]
  fn parses_remote_list_rows() {
    let listing = "flathub\tFlathub\thttps://dl.flathub.org/repo/\n\
                   local\tLocal test repo\thttp://127.0.0.1/repo/\n";
    let remotes = parse_remote_list(listing);

    assert_eq!(remotes.len(), 2);
    assert_eq!(remotes[0].name, "flathub");
    assert_eq!(remotes[0].url, "https://dl.flathub.org/repo/");
    assert_eq!(remotes[0].description, "Flathub");
    assert_eq!(remotes[1].description, "Local test repo");
  }

  #[test]
  fn remote_row_without_url_is_skipped() {
    let remotes = parse_remote_list("broken no url here\n");
    assert!(remotes.is_empty());
  }

  #[test]
  fn empty_remote_listing() {
    assert!(parse_remote_list("").is_empty());
  }

  // ==========================================================================
  // list parsing
  // ==========================================================================

  #[test]
  fn parses_installed_refs() {
    let listing = "org.gnome.Platform/x86_64/3.38 flathub 4e93789 522.4\u{a0}MB\n\
                   org.gnome.Sdk/x86_64/3.38 flathub a14f821 1.2\u{a0}GB\n";
    let refs = parse_installed_list(listing);

    assert_eq!(refs.len(), 2);
    assert_eq!(
      refs[0],
      InstalledRef {
        name: "org.gnome.Platform".to_string(),
        arch: "x86_64".to_string(),
        branch: "3.38".to_string(),
      }
    );
  }

  #[test]
  fn blank_list_rows_are_skipped() {
    let refs = parse_installed_list("\n\norg.gnome.Sdk/x86_64/3.38 flathub\n");
    assert_eq!(refs.len(), 1);
  }

  #[test]
  fn package_reference_format() {
    let package = Package::new("org.gnome.Sdk", "3.38", None);
    assert_eq!(package.reference(), "org.gnome.Sdk/x86_64/3.38");
  }
}
