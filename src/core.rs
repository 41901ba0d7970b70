use std::fmt;
use std::sync::Arc;

/// Atomic reference-counted string type used for identifiers.
pub type ArcStr = Arc<str>;

/// The two forms of every distributable artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variant {
    /// Human-readable output, straight from the transformation service.
    Pretty,
    /// Size-optimized output, derived from the pretty variant.
    Minified,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Pretty, Variant::Minified];

    /// Suffix inserted before the file extension, e.g. `.min`.
    pub fn suffix(self) -> &'static str {
        match self {
            Variant::Pretty => "",
            Variant::Minified => ".min",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Variant::Pretty => "pretty",
            Variant::Minified => "minified",
        })
    }
}

/// Logical identity of an artifact, independent of its variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    /// The module bundle produced by the bundler.
    Js,
    /// The compiled stylesheet.
    Css,
    /// The stylesheet turned into self-injecting script. Never persisted.
    CssCode,
    /// Module bundle followed by the style injection code, in one file.
    Standalone,
}

impl ArtifactKind {
    pub fn id(self) -> &'static str {
        match self {
            ArtifactKind::Js => "js-bundle",
            ArtifactKind::Css => "css-bundle",
            ArtifactKind::CssCode => "css-code",
            ArtifactKind::Standalone => "standalone",
        }
    }

    /// Output file name for this kind and variant, or `None` for artifacts
    /// that only live in memory.
    ///
    /// With base name `lib`: `lib.js`, `lib.min.js`, `lib.css`, `lib.min.css`,
    /// `lib.all.js`, `lib.all.min.js`.
    pub fn file_name(self, base: &str, variant: Variant) -> Option<String> {
        let suffix = variant.suffix();
        match self {
            ArtifactKind::Js => Some(format!("{base}{suffix}.js")),
            ArtifactKind::Css => Some(format!("{base}{suffix}.css")),
            ArtifactKind::CssCode => None,
            ArtifactKind::Standalone => Some(format!("{base}.all{suffix}.js")),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A produced output blob. Immutable: a later cycle supersedes it with a new
/// value rather than mutating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub variant: Variant,
    pub content: ArcStr,
    /// Build cycle in which this artifact was produced.
    pub cycle: u64,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, variant: Variant, content: impl Into<ArcStr>, cycle: u64) -> Self {
        Self {
            kind,
            variant,
            content: content.into(),
            cycle,
        }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}
