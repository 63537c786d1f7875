//! Fixed names and paths shared across the crate.

/// Where the source tree is bind-mounted inside the sandbox.
pub const SANDBOX_SOURCE_ROOT: &str = "/app/project";

/// Application id prefix; the platform variant is appended upper-cased.
pub const APP_ID_PREFIX: &str = "org.flatkit";

/// Environment variable naming an override-module manifest file.
pub const EXTRA_MODULES_ENV: &str = "FLATKIT_EXTRA_MODULES";

/// Remote providing the GNOME runtime and SDK.
pub const SDK_REMOTE_NAME: &str = "flathub";
pub const SDK_REMOTE_URL: &str = "https://dl.flathub.org/repo/";
pub const SDK_REMOTE_FILE: &str = "https://dl.flathub.org/repo/flathub.flatpakrepo";

/// Minimum supported version of `flatpak` and `flatpak-builder`.
pub const FLATPAK_MIN_VERSION: &str = "0.10.0";

/// Architecture the runtime and SDK are installed for.
pub const DEFAULT_ARCH: &str = "x86_64";

/// Present only inside a flatpak sandbox.
pub const SANDBOX_MANIFEST_FILE: &str = "/usr/manifest.json";
