//! Project configuration read from `package.json`.
//!
//! Package metadata (`name`, `version`, `license`) comes from the manifest
//! itself. The rest lives in a `"tsumiki"` object of the same file. Only the
//! two global aliases are required, everything else has a default:
//!
//! ```json
//! {
//!   "name": "sweetalert2",
//!   "version": "7.0.0",
//!   "license": "MIT",
//!   "tsumiki": {
//!     "entry": "src/sweetalert2.js",
//!     "style": "src/sweetalert2.scss",
//!     "outDir": "dist",
//!     "aliases": ["sweetAlert", "swal"],
//!     "watch": { "js": ["src/**/*.js"], "style": ["src/**/*.scss"] },
//!     "lint": { "types": ["sweetalert2.d.ts"], "typesCommand": ["tslint"] }
//!   }
//! }
//! ```

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    tsumiki: Overrides,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Overrides {
    entry: Option<Utf8PathBuf>,
    style: Option<Utf8PathBuf>,
    out_dir: Option<Utf8PathBuf>,
    global_name: Option<String>,
    aliases: Option<[String; 2]>,
    watch: Option<WatchGlobs>,
    lint: Option<LintSettings>,
}

/// Globs of the source files each kind of task reads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchGlobs {
    pub js: Vec<String>,
    pub style: Vec<String>,
    /// Type declarations. These are only linted, never built.
    pub types: Vec<String>,
}

impl Default for WatchGlobs {
    fn default() -> Self {
        Self {
            js: vec![String::from("src/**/*.js")],
            style: vec![String::from("src/**/*.scss")],
            types: vec![String::from("*.d.ts")],
        }
    }
}

/// Which files get linted, and with what.
///
/// A command is the program followed by its arguments. An empty command
/// disables linting for that language.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LintSettings {
    pub js: Vec<String>,
    pub style: Vec<String>,
    pub types: Vec<String>,
    pub js_command: Vec<String>,
    pub style_command: Vec<String>,
    pub types_command: Vec<String>,
}

impl Default for LintSettings {
    fn default() -> Self {
        Self {
            js: vec![String::from("src/**/*.js")],
            style: vec![String::from("src/**/*.scss")],
            types: vec![String::from("*.d.ts")],
            js_command: vec![String::from("standard")],
            style_command: vec![String::from("stylelint")],
            types_command: vec![String::from("tslint")],
        }
    }
}

/// Resolved project description. Every path is absolute, anchored at the
/// directory holding `package.json`.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: Utf8PathBuf,
    pub name: String,
    pub version: String,
    pub license: Option<String>,
    pub entry: Utf8PathBuf,
    pub style: Utf8PathBuf,
    pub out_dir: Utf8PathBuf,
    /// Name the module bundle binds its exports to.
    pub global_name: String,
    /// The two additional global names installed by the bundle footer.
    pub aliases: [String; 2],
    pub watch: WatchGlobs,
    pub lint: LintSettings,
}

impl Project {
    /// Reads `package.json` from the given directory.
    pub fn load(root: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        let path = root.join("package.json");
        let text = std::fs::read_to_string(&path).map_err(|err| ConfigError::Read(path, err))?;

        Self::from_manifest(root, &text)
    }

    /// Builds a project from the text of a manifest.
    pub fn from_manifest(root: impl AsRef<Utf8Path>, manifest: &str) -> Result<Self, ConfigError> {
        let root = root.as_ref().to_path_buf();
        let Manifest {
            name,
            version,
            license,
            tsumiki,
        } = serde_json::from_str(manifest)?;

        let base = base_name(&name);
        let global_name = match tsumiki.global_name {
            Some(global) => global,
            None => classify(base).ok_or_else(|| ConfigError::InvalidName(name.clone()))?,
        };

        let aliases = tsumiki.aliases.ok_or(ConfigError::MissingAliases)?;
        let anchor = |path: Utf8PathBuf| root.join(path);

        Ok(Self {
            entry: anchor(tsumiki.entry.unwrap_or_else(|| format!("src/{base}.js").into())),
            style: anchor(tsumiki.style.unwrap_or_else(|| format!("src/{base}.scss").into())),
            out_dir: anchor(tsumiki.out_dir.unwrap_or_else(|| "dist".into())),
            global_name,
            aliases,
            watch: tsumiki.watch.unwrap_or_default(),
            lint: tsumiki.lint.unwrap_or_default(),
            root,
            name,
            version,
            license,
        })
    }

    /// File stem shared by every output file: the package name without its
    /// npm scope.
    pub fn base_name(&self) -> &str {
        base_name(&self.name)
    }

    /// Anchors a project-relative glob at the project root.
    pub fn glob(&self, pattern: &str) -> String {
        if Utf8Path::new(pattern).is_absolute() {
            pattern.to_string()
        } else {
            format!("{}/{pattern}", self.root)
        }
    }
}

fn base_name(name: &str) -> &str {
    match name.strip_prefix('@') {
        Some(scoped) => scoped.split_once('/').map_or(scoped, |(_, name)| name),
        None => name,
    }
}

/// Turns a package name into an identifier usable as a global name:
/// separators are dropped and the letter after each one is capitalized, as
/// is the very first letter.
///
/// `sweetalert2` becomes `Sweetalert2`, `sweet-alert_two` becomes
/// `SweetAlertTwo`. Returns `None` when nothing usable is left, or when the
/// result would start with a digit.
pub fn classify(name: &str) -> Option<String> {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '$' {
            if upper {
                out.extend(ch.to_uppercase());
            } else {
                out.push(ch);
            }
            upper = false;
        } else {
            upper = true;
        }
    }

    match out.chars().next() {
        Some(first) if !first.is_ascii_digit() => Some(out),
        _ => None,
    }
}

/// Knobs of a single orchestrator invocation, fixed for its whole lifetime.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Produce the minified variant of every artifact.
    pub minify: bool,
    /// Produce the standalone bundles.
    pub standalone: bool,
    /// Report lint violations without failing the lint tasks.
    pub continue_on_lint_error: bool,
    /// Stop starting new waves once a cycle has run this long.
    pub timeout: Option<Duration>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            minify: true,
            standalone: true,
            continue_on_lint_error: false,
            timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("sweetalert2").as_deref(), Some("Sweetalert2"));
        assert_eq!(classify("sweet-alert_two").as_deref(), Some("SweetAlertTwo"));
        assert_eq!(classify("my.lib").as_deref(), Some("MyLib"));
        assert_eq!(classify("2fa"), None);
        assert_eq!(classify("---"), None);
    }

    #[test]
    fn test_defaults() {
        let project = Project::from_manifest(
            "/work",
            r#"{ "name": "sweetalert2", "version": "7.0.0", "license": "MIT",
                 "tsumiki": { "aliases": ["sweetAlert", "swal"] } }"#,
        )
        .unwrap();

        assert_eq!(project.global_name, "Sweetalert2");
        assert_eq!(project.entry, "/work/src/sweetalert2.js");
        assert_eq!(project.style, "/work/src/sweetalert2.scss");
        assert_eq!(project.out_dir, "/work/dist");
        assert_eq!(project.license.as_deref(), Some("MIT"));
        assert_eq!(project.aliases, ["sweetAlert", "swal"]);
        assert_eq!(project.watch, WatchGlobs::default());
        assert_eq!(project.lint.js_command, vec!["standard"]);
        assert_eq!(project.lint.types, vec!["*.d.ts"]);
        assert_eq!(project.lint.types_command, vec!["tslint"]);
    }

    #[test]
    fn test_overrides() {
        let project = Project::from_manifest(
            "/work",
            r#"{
                "name": "@acme/ui-kit",
                "version": "1.2.3",
                "tsumiki": {
                    "entry": "lib/index.js",
                    "outDir": "/tmp/out",
                    "aliases": ["kit", "uk"],
                    "watch": { "style": ["styles/*.scss"] },
                    "lint": { "jsCommand": [], "types": ["ui-kit.d.ts"] }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(project.base_name(), "ui-kit");
        assert_eq!(project.global_name, "UiKit");
        assert_eq!(project.entry, "/work/lib/index.js");
        assert_eq!(project.style, "/work/src/ui-kit.scss");
        assert_eq!(project.out_dir, "/tmp/out");
        assert_eq!(project.aliases, ["kit", "uk"]);
        assert_eq!(project.watch.js, vec!["src/**/*.js"]);
        assert_eq!(project.watch.style, vec!["styles/*.scss"]);
        assert!(project.lint.js_command.is_empty());
        assert_eq!(project.lint.style_command, vec!["stylelint"]);
        assert_eq!(project.lint.types, vec!["ui-kit.d.ts"]);
        assert_eq!(project.license, None);
    }

    #[test]
    fn test_aliases_come_in_pairs() {
        let err = Project::from_manifest("/work", r#"{ "name": "lib" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAliases));

        let err = Project::from_manifest(
            "/work",
            r#"{ "name": "lib", "tsumiki": { "aliases": ["only"] } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unusable_name() {
        let err = Project::from_manifest("/work", r#"{ "name": "123" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidName(_)));
    }

    #[test]
    fn test_load_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        assert!(matches!(Project::load(&root), Err(ConfigError::Read(..))));

        std::fs::write(
            root.join("package.json"),
            r#"{ "name": "lib", "tsumiki": { "aliases": ["lib", "l"] } }"#,
        )
        .unwrap();
        let project = Project::load(&root).unwrap();
        assert_eq!(project.root, root);
        assert_eq!(project.version, "");
    }
}
