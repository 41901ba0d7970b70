//! Artifact production.
//!
//! A [`Producer`] wraps each transformation service call with the naming and
//! versioning policy of the distribution: the version/license banner, the
//! global alias footer and the version stamp. Each method reads its inputs
//! from the session, calls exactly one service and commits exactly one
//! artifact. If the service fails, nothing is committed.

use std::borrow::Cow;
use std::sync::LazyLock;

use camino::Utf8PathBuf;
use regex::{Captures, Regex};
use tracing::debug;

use crate::blueprint::{TaskContext, TaskResult};
use crate::core::{Artifact, ArtifactKind, Variant};
use crate::error::{Service, TaskError, TransformationError};
use crate::project::Project;
use crate::service::{BundleConfig, Services};

/// `<object>.version = ''`, left behind in the source for the build to fill
/// in.
static VERSION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_$][\w$.]*)\.version\s*=\s*(?:''|"")"#)
        .expect("Error compiling version marker pattern")
});

/// Package identity stamped into generated script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub name: String,
    pub version: String,
    pub license: Option<String>,
    pub global_name: String,
    pub aliases: [String; 2],
}

impl Stamp {
    pub fn from_project(project: &Project) -> Self {
        Self {
            name: project.name.clone(),
            version: project.version.clone(),
            license: project.license.clone(),
            global_name: project.global_name.clone(),
            aliases: project.aliases.clone(),
        }
    }

    /// Preserved comment identifying the package, prepended to every script
    /// artifact.
    pub fn banner(&self) -> String {
        let mut banner = format!("/*!\n* {} v{}\n", self.name, self.version);
        if let Some(license) = &self.license {
            banner.push_str(&format!("* Released under the {license} License.\n"));
        }
        banner.push_str("*/\n");
        banner
    }

    /// Installs the global name under each alias, as long as there is a
    /// global namespace and the bundle actually defined the global.
    pub fn footer(&self) -> String {
        let global = &self.global_name;
        let [first, second] = &self.aliases;

        format!(
            "if (typeof window !== 'undefined' && window.{global}) \
             window.{first} = window.{second} = window.{global};\n"
        )
    }

    /// Fills in every empty `X.version = ''` marker with the package version.
    pub fn apply_version<'a>(&self, code: &'a str) -> Cow<'a, str> {
        VERSION_MARKER.replace_all(code, |caps: &Captures| {
            format!("{}.version = '{}'", &caps[1], self.version)
        })
    }
}

/// Runs the transformation services on behalf of the build tasks.
#[derive(Clone)]
pub struct Producer {
    services: Services,
    stamp: Stamp,
    entry: Utf8PathBuf,
    style: Utf8PathBuf,
}

impl Producer {
    pub fn new(project: &Project, services: Services) -> Self {
        Self {
            services,
            stamp: Stamp::from_project(project),
            entry: project.entry.clone(),
            style: project.style.clone(),
        }
    }

    pub fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    /// Bundles the entry module into the pretty script artifact.
    pub async fn bundle(&self, ctx: &TaskContext) -> TaskResult {
        let config = BundleConfig {
            global_name: self.stamp.global_name.clone(),
        };
        let code = self.services.bundler.bundle(&self.entry, &config).await?;
        let code = self.stamp.apply_version(&code);

        let mut content = self.stamp.banner();
        content.push_str(&code);
        if !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&self.stamp.footer());

        ctx.commit(Artifact::new(ArtifactKind::Js, Variant::Pretty, content, ctx.cycle))
            .await
    }

    /// Compiles the stylesheet into the pretty style artifact.
    pub async fn compile_style(&self, ctx: &TaskContext) -> TaskResult {
        let css = self.services.style.compile(&self.style).await?;
        ctx.commit(Artifact::new(ArtifactKind::Css, Variant::Pretty, css, ctx.cycle))
            .await
    }

    /// Derives the minified variant of `kind` from its pretty variant.
    pub async fn minify(&self, ctx: &TaskContext, kind: ArtifactKind) -> TaskResult {
        let pretty = ctx.input(kind, Variant::Pretty)?;

        let content = match kind {
            ArtifactKind::Js => {
                let banner = self.stamp.banner();
                let code = pretty.content.strip_prefix(&banner).unwrap_or(&pretty.content);
                let minified = self.services.js_minifier.minify(code).await?;
                banner + &minified
            }
            ArtifactKind::Css => self.services.css_minifier.minify(&pretty.content).await?,
            found => {
                return Err(TaskError::UnexpectedKind {
                    expected: ArtifactKind::Js,
                    found,
                });
            }
        };

        debug!(kind = %kind, from = pretty.len(), to = content.len(), "minified");
        ctx.commit(Artifact::new(kind, Variant::Minified, content, ctx.cycle))
            .await
    }

    /// Turns the style artifact of the given variant into injection code.
    pub async fn css_to_code(&self, ctx: &TaskContext, variant: Variant) -> TaskResult {
        let css = ctx.input(ArtifactKind::Css, variant)?;
        let code = self.services.css_to_code.css_to_code(&css.content);

        if code.is_empty() && !css.is_empty() {
            return Err(TransformationError::new(
                Service::CssToCode,
                anyhow::anyhow!("no code produced for a non-empty stylesheet"),
            )
            .into());
        }

        ctx.commit(Artifact::new(ArtifactKind::CssCode, variant, code, ctx.cycle))
            .await
    }

    /// Joins the script and style code of one variant into the standalone
    /// bundle.
    pub async fn standalone(&self, ctx: &TaskContext, variant: Variant) -> TaskResult {
        let js = ctx.input(ArtifactKind::Js, variant)?;
        let css_code = ctx.input(ArtifactKind::CssCode, variant)?;
        ctx.commit(compose(&js, &css_code, ctx.cycle)?).await
    }
}

/// Concatenates a script artifact and a style code artifact of the same
/// variant, byte for byte.
pub fn compose(js: &Artifact, css_code: &Artifact, cycle: u64) -> Result<Artifact, TaskError> {
    if js.kind != ArtifactKind::Js {
        return Err(TaskError::UnexpectedKind {
            expected: ArtifactKind::Js,
            found: js.kind,
        });
    }
    if css_code.kind != ArtifactKind::CssCode {
        return Err(TaskError::UnexpectedKind {
            expected: ArtifactKind::CssCode,
            found: css_code.kind,
        });
    }
    if js.variant != css_code.variant {
        return Err(TaskError::VariantMismatch {
            js: js.variant,
            css: css_code.variant,
        });
    }
    if js.cycle != css_code.cycle {
        return Err(TaskError::CycleMismatch {
            js: js.cycle,
            css: css_code.cycle,
        });
    }

    let mut content = String::with_capacity(js.len() + css_code.len());
    content.push_str(&js.content);
    content.push_str(&css_code.content);

    Ok(Artifact::new(ArtifactKind::Standalone, js.variant, content, cycle))
}
