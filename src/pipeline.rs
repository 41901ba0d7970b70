//! The standard task set of a library distribution.
//!
//! | task                   | depends on                               |
//! |------------------------|------------------------------------------|
//! | `build:js`             |                                          |
//! | `build:js:min`         | `build:js`                               |
//! | `build:css`            |                                          |
//! | `build:css:min`        | `build:css`                              |
//! | `build:css-code`       | `build:css`                              |
//! | `build:css-code:min`   | `build:css:min`                          |
//! | `build:standalone`     | `build:js`, `build:css-code`             |
//! | `build:standalone:min` | `build:js:min`, `build:css-code:min`     |
//! | `build`                | every task above                         |
//! | `lint:js`, `lint:style`|                                          |
//! | `lint:ts`              |                                          |
//! | `lint`                 | every lint task above                    |
//!
//! Minified tasks only exist with minification enabled, standalone and
//! style code tasks only with standalone bundles enabled, and lint tasks
//! only for languages that have a linter.

use std::sync::Arc;

use camino::Utf8PathBuf;
use tracing::{debug, warn};

use crate::blueprint::{Blueprint, TaskContext, TaskGraph, TaskResult};
use crate::core::{ArcStr, ArtifactKind, Variant};
use crate::error::{GraphError, TaskError};
use crate::producer::Producer;
use crate::project::{BuildOptions, Project};
use crate::service::{Linter, Services};
use crate::watch::WatchRule;

pub const BUILD: &str = "build";
pub const BUILD_JS: &str = "build:js";
pub const BUILD_CSS: &str = "build:css";
pub const BUILD_CSS_CODE: &str = "build:css-code";
pub const BUILD_STANDALONE: &str = "build:standalone";
pub const LINT: &str = "lint";
pub const LINT_JS: &str = "lint:js";
pub const LINT_STYLE: &str = "lint:style";
pub const LINT_TS: &str = "lint:ts";

/// Name of the task producing `base` in the given variant.
pub fn task_name(base: &str, variant: Variant) -> String {
    match variant {
        Variant::Pretty => base.to_string(),
        Variant::Minified => format!("{base}:min"),
    }
}

/// Declares the standard task set.
pub fn declare(project: &Project, services: Services, options: &BuildOptions) -> Result<TaskGraph, GraphError> {
    let mut blueprint = Blueprint::new();
    let producer = Arc::new(Producer::new(project, services.clone()));

    let variants: &[Variant] = if options.minify {
        &Variant::ALL
    } else {
        &[Variant::Pretty]
    };

    let mut build = Vec::new();

    {
        let producer = producer.clone();
        blueprint.task(BUILD_JS).run(move |ctx| {
            let producer = producer.clone();
            async move { producer.bundle(&ctx).await }
        })?;
        build.push(BUILD_JS.to_string());
    }

    {
        let producer = producer.clone();
        blueprint.task(BUILD_CSS).run(move |ctx| {
            let producer = producer.clone();
            async move { producer.compile_style(&ctx).await }
        })?;
        build.push(BUILD_CSS.to_string());
    }

    if options.minify {
        for (base, kind) in [(BUILD_JS, ArtifactKind::Js), (BUILD_CSS, ArtifactKind::Css)] {
            let name = task_name(base, Variant::Minified);
            let producer = producer.clone();
            blueprint
                .task(name.as_str())
                .depends_on([base])
                .run(move |ctx| {
                    let producer = producer.clone();
                    async move { producer.minify(&ctx, kind).await }
                })?;
            build.push(name);
        }
    }

    if options.standalone {
        for &variant in variants {
            let css_code = task_name(BUILD_CSS_CODE, variant);
            let standalone = task_name(BUILD_STANDALONE, variant);

            let producer_code = producer.clone();
            blueprint
                .task(css_code.as_str())
                .depends_on([task_name(BUILD_CSS, variant)])
                .run(move |ctx| {
                    let producer = producer_code.clone();
                    async move { producer.css_to_code(&ctx, variant).await }
                })?;

            // Exactly the producers of its two inputs, so it can never see
            // a stale one.
            let producer_standalone = producer.clone();
            blueprint
                .task(standalone.as_str())
                .depends_on([task_name(BUILD_JS, variant), css_code.clone()])
                .run(move |ctx| {
                    let producer = producer_standalone.clone();
                    async move { producer.standalone(&ctx, variant).await }
                })?;

            build.push(css_code);
            build.push(standalone);
        }
    }

    blueprint.task(BUILD).depends_on(build).group()?;

    let mut lint = Vec::new();
    let linters = [
        (LINT_JS, services.js_linter, &project.lint.js),
        (LINT_STYLE, services.style_linter, &project.lint.style),
        (LINT_TS, services.types_linter, &project.lint.types),
    ];

    for (name, linter, sources) in linters {
        let Some(linter) = linter else {
            debug!(task = name, "no linter configured");
            continue;
        };

        let patterns: Arc<[String]> = sources.iter().map(|source| project.glob(source)).collect();
        let fatal = !options.continue_on_lint_error;

        blueprint.task(name).run(move |ctx| {
            let linter = linter.clone();
            let patterns = patterns.clone();
            async move { run_linter(ctx, linter, &patterns, fatal).await }
        })?;
        lint.push(name);
    }

    blueprint.task(LINT).depends_on(lint).group()?;

    blueprint.finish()
}

async fn run_linter(ctx: TaskContext, linter: Arc<dyn Linter>, patterns: &[String], fatal: bool) -> TaskResult {
    let mut paths = Vec::new();

    for pattern in patterns {
        for entry in glob::glob(pattern)? {
            match entry.map(Utf8PathBuf::try_from) {
                Ok(Ok(path)) => paths.push(path),
                Ok(Err(err)) => warn!(task = %ctx.name, "skipping non UTF-8 path {:?}", err.as_path()),
                Err(err) => warn!(task = %ctx.name, "{err}"),
            }
        }
    }

    paths.sort();
    paths.dedup();
    debug!(task = %ctx.name, files = paths.len(), "linting");

    let violations = linter.lint(&paths).await?;
    for violation in &violations {
        warn!(task = %ctx.name, "{violation}");
    }

    let count = violations.len();
    ctx.session.report_violations(violations);

    if fatal && count > 0 {
        return Err(TaskError::Lint(count));
    }

    Ok(())
}

/// Maps source globs to the tasks reading them. With `lint` set, source
/// changes also re-run the linters, and type declarations get watched for
/// their linter alone.
pub fn watch_rules(project: &Project, graph: &TaskGraph, lint: bool) -> Result<Vec<WatchRule>, glob::PatternError> {
    let mut rules = Vec::new();

    let mut add = |patterns: &[String], task: &str| -> Result<(), glob::PatternError> {
        if !graph.contains(task) {
            return Ok(());
        }
        for pattern in patterns {
            rules.push(WatchRule::new(&project.glob(pattern), [task])?);
        }
        Ok(())
    };

    add(&project.watch.js, BUILD_JS)?;
    add(&project.watch.style, BUILD_CSS)?;

    if lint {
        add(&project.watch.js, LINT_JS)?;
        add(&project.watch.style, LINT_STYLE)?;
        add(&project.watch.types, LINT_TS)?;
    }

    Ok(rules)
}

/// Every task writing a file, for callers wanting the default goal spelled
/// out.
pub fn outputs(graph: &TaskGraph) -> Vec<ArcStr> {
    let mut names: Vec<_> = graph
        .names()
        .filter(|name| name.starts_with("build:") && !name.starts_with(BUILD_CSS_CODE))
        .cloned()
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use camino::Utf8Path;

    use super::*;
    use crate::error::{BuildError, Service, TransformationError};
    use crate::executor::{BuildReport, Orchestrator};
    use crate::producer::tests::{stub_project, stub_services};
    use crate::service::{BundleConfig, Bundler, LintViolation};
    use crate::session::BuildSession;

    struct StubLinter(Vec<LintViolation>);

    #[async_trait::async_trait]
    impl Linter for StubLinter {
        async fn lint(&self, _: &[Utf8PathBuf]) -> Result<Vec<LintViolation>, TransformationError> {
            Ok(self.0.clone())
        }
    }

    fn complaint() -> LintViolation {
        LintViolation {
            file: Some("src/lib.js".into()),
            line: 1,
            column: 9,
            message: "Extra semicolon.".into(),
        }
    }

    fn project() -> Project {
        stub_project(Utf8Path::new("/work"))
    }

    #[test]
    fn test_full_task_set() {
        let graph = declare(&project(), stub_services(), &BuildOptions::default()).unwrap();

        assert_eq!(graph.len(), 10);
        assert_eq!(
            graph.dependencies("build:standalone:min").unwrap(),
            vec![ArcStr::from("build:css-code:min"), ArcStr::from("build:js:min")]
        );
        assert_eq!(
            graph.dependencies("build:css-code").unwrap(),
            vec![ArcStr::from("build:css")]
        );
        assert_eq!(graph.dependencies(BUILD).unwrap().len(), 8);
        assert!(graph.dependencies(LINT).unwrap().is_empty());

        let plan = graph.resolve_order([BUILD]).unwrap();
        assert_eq!(plan.wave_of(BUILD_JS), Some(0));
        assert_eq!(plan.wave_of("build:css-code:min"), Some(2));
        assert_eq!(plan.wave_of("build:standalone:min"), Some(3));
    }

    #[test]
    fn test_skip_minification() {
        let options = BuildOptions {
            minify: false,
            ..BuildOptions::default()
        };
        let graph = declare(&project(), stub_services(), &options).unwrap();

        assert!(graph.names().all(|name| !name.ends_with(":min")));
        assert!(graph.contains("build:standalone"));
        assert_eq!(outputs(&graph).len(), 3);
    }

    #[test]
    fn test_skip_standalone() {
        let options = BuildOptions {
            standalone: false,
            ..BuildOptions::default()
        };
        let graph = declare(&project(), stub_services(), &options).unwrap();

        assert!(!graph.contains("build:standalone"));
        assert!(!graph.contains("build:css-code"));
        assert_eq!(
            outputs(&graph),
            vec![
                ArcStr::from("build:css"),
                ArcStr::from("build:css:min"),
                ArcStr::from("build:js"),
                ArcStr::from("build:js:min")
            ]
        );
    }

    #[test]
    fn test_watch_rules() {
        let project = project();
        let services = Services {
            js_linter: Some(Arc::new(StubLinter(vec![]))),
            types_linter: Some(Arc::new(StubLinter(vec![]))),
            ..stub_services()
        };
        let graph = declare(&project, services, &BuildOptions::default()).unwrap();
        assert_eq!(
            graph.dependencies(LINT).unwrap(),
            vec![ArcStr::from(LINT_JS), ArcStr::from(LINT_TS)]
        );

        let rules = watch_rules(&project, &graph, false).unwrap();
        assert_eq!(rules.len(), 2);

        let rules = watch_rules(&project, &graph, true).unwrap();
        let tasks: Vec<&str> = rules.iter().flat_map(|rule| rule.tasks()).map(|t| &**t).collect();

        // No style linter, so no rule for it.
        assert_eq!(tasks, vec![BUILD_JS, BUILD_CSS, LINT_JS, LINT_TS]);
        assert!(rules[0].matches(Utf8Path::new("/work/src/util/dom.js")));
        assert!(!rules[0].matches(Utf8Path::new("/work/src/lib.scss")));

        // Declarations sit at the root and only concern their linter.
        let declarations = &rules[3];
        assert!(declarations.matches(Utf8Path::new("/work/lib.d.ts")));
        assert!(!declarations.matches(Utf8Path::new("/work/src/lib.js")));
        assert!(rules[..3].iter().all(|rule| !rule.matches(Utf8Path::new("/work/lib.d.ts"))));
    }

    async fn lint_with(continue_on_lint_error: bool) -> (Arc<BuildSession>, Result<BuildReport, BuildError>) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let project = stub_project(&root);

        let services = Services {
            js_linter: Some(Arc::new(StubLinter(vec![complaint()]))),
            style_linter: Some(Arc::new(StubLinter(vec![]))),
            ..stub_services()
        };
        let options = BuildOptions {
            continue_on_lint_error,
            ..BuildOptions::default()
        };

        let graph = declare(&project, services, &options).unwrap();
        let session = Arc::new(BuildSession::new(project.out_dir.clone(), "lib"));
        let result = Orchestrator::new(graph).run(&session, [LINT]).await;
        (session, result)
    }

    #[tokio::test]
    async fn test_lint_violations_are_fatal() {
        let (_, result) = lint_with(false).await;

        let Err(BuildError::Failed { failed, skipped, report }) = result else {
            panic!("expected the lint to fail");
        };
        assert_eq!(failed, vec![ArcStr::from(LINT_JS)]);
        assert_eq!(skipped, vec![ArcStr::from(LINT)]);
        assert_eq!(report.violations, vec![complaint()]);
    }

    #[tokio::test]
    async fn test_continue_on_lint_error() {
        let (session, result) = lint_with(true).await;
        let report = result.unwrap();

        assert!(report.is_success());
        assert_eq!(report.violations, vec![complaint()]);
        assert!(session.succeeded().contains(LINT));
    }

    /// Fails its second call, then bundles the next revision.
    struct Flaky(AtomicUsize);

    #[async_trait::async_trait]
    impl Bundler for Flaky {
        async fn bundle(&self, _: &Utf8Path, config: &BundleConfig) -> Result<String, TransformationError> {
            match self.0.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(format!("var {} = 'js-v1';\n", config.global_name)),
                1 => Err(TransformationError::new(Service::Bundler, anyhow::anyhow!("unexpected token"))),
                _ => Ok(format!("var {} = 'js-v2';\n", config.global_name)),
            }
        }
    }

    #[tokio::test]
    async fn test_rebuilt_standalone_never_mixes_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let project = stub_project(&root);

        let services = Services {
            bundler: Arc::new(Flaky(AtomicUsize::new(0))),
            ..stub_services()
        };
        let graph = declare(&project, services, &BuildOptions::default()).unwrap();
        let orchestrator = Orchestrator::new(graph);
        let session = Arc::new(BuildSession::new(project.out_dir.clone(), "lib"));

        orchestrator.run(&session, [BUILD]).await.unwrap();
        orchestrator.run_incremental(&session, [BUILD_JS]).await.unwrap_err();

        // Only the style changed, yet the standalone bundles must not pair
        // the script of the first cycle with the style code of this one.
        let report = orchestrator.run_incremental(&session, [BUILD_CSS]).await.unwrap();
        assert_eq!(report.cycle, 3);

        for variant in Variant::ALL {
            let js = session.artifact(ArtifactKind::Js, variant).unwrap();
            let code = session.artifact(ArtifactKind::CssCode, variant).unwrap();
            let standalone = session.artifact(ArtifactKind::Standalone, variant).unwrap();

            assert_eq!(js.cycle, 3);
            assert_eq!(code.cycle, 3);
            assert_eq!(standalone.cycle, 3);
        }

        let path = session.destination(ArtifactKind::Standalone, Variant::Pretty).unwrap();
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("js-v2"));
        assert!(!written.contains("js-v1"));
    }

    #[tokio::test]
    async fn test_standalone_is_exact_concatenation() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let project = stub_project(&root);

        let graph = declare(&project, stub_services(), &BuildOptions::default()).unwrap();
        let session = Arc::new(BuildSession::new(project.out_dir.clone(), "lib"));
        Orchestrator::new(graph).run(&session, [BUILD]).await.unwrap();

        let written: Vec<_> = std::fs::read_dir(&project.out_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(written.len(), 6);

        for variant in Variant::ALL {
            let js = session.artifact(ArtifactKind::Js, variant).unwrap();
            let code = session.artifact(ArtifactKind::CssCode, variant).unwrap();
            let path = session.destination(ArtifactKind::Standalone, variant).unwrap();

            let standalone = std::fs::read_to_string(path).unwrap();
            assert_eq!(standalone, format!("{}{}", js.content, code.content));
            assert_eq!(js.cycle, code.cycle);
        }
    }
}
