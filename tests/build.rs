use std::sync::Arc;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use tsumiki::service::{
    BundleConfig, Bundler, GrassCompiler, GrassMinifier, Minifier, Services, StyleInjector,
};
use tsumiki::{BuildOptions, Dist, Project, TransformationError};

/// Wraps the entry module in an IIFE bound to the global name.
struct Iife;

#[async_trait]
impl Bundler for Iife {
    async fn bundle(&self, entry: &Utf8Path, config: &BundleConfig) -> Result<String, TransformationError> {
        let source = std::fs::read_to_string(entry)
            .map_err(|err| TransformationError::new(tsumiki::Service::Bundler, err))?;

        Ok(format!(
            "var {} = (function () {{\n{}\n}})();\n",
            config.global_name,
            source.trim_end()
        ))
    }
}

/// Collapses every line into one.
struct Oneline;

#[async_trait]
impl Minifier for Oneline {
    async fn minify(&self, content: &str) -> Result<String, TransformationError> {
        Ok(content.lines().map(str::trim).collect::<Vec<_>>().join(""))
    }
}

fn setup() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

    std::fs::create_dir(root.join("src")).unwrap();
    std::fs::write(
        root.join("package.json"),
        r#"{ "name": "toast", "version": "2.1.0", "license": "MIT",
             "tsumiki": { "aliases": ["toaster", "tst"] } }"#,
    )
    .unwrap();
    std::fs::write(root.join("src/toast.js"), "return { show: function () {} };\n").unwrap();
    std::fs::write(root.join("src/toast.scss"), ".toast { color: red; }\n").unwrap();

    (dir, root)
}

fn services() -> Services {
    Services {
        bundler: Arc::new(Iife),
        style: Arc::new(GrassCompiler::default()),
        js_minifier: Arc::new(Oneline),
        css_minifier: Arc::new(GrassMinifier),
        css_to_code: Arc::new(StyleInjector),
        js_linter: None,
        style_linter: None,
        types_linter: None,
    }
}

#[tokio::test]
async fn test_build_distribution() {
    let (_dir, root) = setup();
    let project = Project::load(&root).unwrap();
    let out_dir = project.out_dir.clone();

    let dist = Dist::new(project, services(), &BuildOptions::default()).unwrap();
    let report = dist.build().await.unwrap();
    assert!(report.is_success());

    let mut written: Vec<_> = std::fs::read_dir(&out_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    written.sort();
    assert_eq!(
        written,
        [
            "toast.all.js",
            "toast.all.min.js",
            "toast.css",
            "toast.js",
            "toast.min.css",
            "toast.min.js",
        ]
    );

    let read = |name: &str| std::fs::read_to_string(out_dir.join(name)).unwrap();

    let js = read("toast.js");
    assert!(js.starts_with("/*!\n* toast v2.1.0\n* Released under the MIT License.\n*/\n"));
    assert!(js.contains("var Toast = (function () {"));
    assert!(js.ends_with(
        "if (typeof window !== 'undefined' && window.Toast) window.toaster = window.tst = window.Toast;\n"
    ));

    let standalone = read("toast.all.js");
    assert!(standalone.contains("var Toast ="));
    assert!(standalone.contains("color: red"));
    assert!(standalone.starts_with(&js));

    let standalone_min = read("toast.all.min.js");
    assert!(standalone_min.contains("var Toast ="));
    assert!(standalone_min.contains("color:red"));
    assert!(standalone_min.starts_with("/*!\n* toast v2.1.0\n"));

    assert_eq!(read("toast.min.css").trim(), ".toast{color:red}");
}

#[tokio::test]
async fn test_build_without_optional_variants() {
    let (_dir, root) = setup();
    let project = Project::load(&root).unwrap();
    let out_dir = project.out_dir.clone();

    let options = BuildOptions {
        minify: false,
        standalone: false,
        ..BuildOptions::default()
    };
    let dist = Dist::new(project, services(), &options).unwrap();
    dist.build().await.unwrap();

    let mut written: Vec<_> = std::fs::read_dir(&out_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    written.sort();
    assert_eq!(written, ["toast.css", "toast.js"]);
}

#[tokio::test]
async fn test_broken_stylesheet_keeps_scripts() {
    let (_dir, root) = setup();
    std::fs::write(root.join("src/toast.scss"), ".toast { color: ").unwrap();
    let project = Project::load(&root).unwrap();
    let out_dir = project.out_dir.clone();

    let dist = Dist::new(project, services(), &BuildOptions::default()).unwrap();
    let err = dist.build().await.unwrap_err();

    let report = err.report().unwrap();
    assert_eq!(report.failed(), vec![tsumiki::ArcStr::from("build:css")]);
    assert!(report.skipped().iter().any(|name| name.as_ref() == "build:standalone"));
    assert!(out_dir.join("toast.js").exists());
    assert!(out_dir.join("toast.min.js").exists());
    assert!(!out_dir.join("toast.all.js").exists());
}
