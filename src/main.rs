use std::time::Duration;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use console::style;
use tsumiki::service::Services;
use tsumiki::{BuildError, BuildOptions, BuildReport, Dist, Project};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    flags: Flags,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Produce every artifact once.
    Build {
        /// Print the task graph coloured by outcome once the build is done.
        #[arg(long)]
        mermaid: bool,
    },
    /// Build, then rebuild on every change to the sources.
    #[command(alias = "dev")]
    Watch {
        /// Serve the output directory over HTTP.
        #[arg(long, num_args = 0..=1, default_missing_value = "8080")]
        serve: Option<u16>,
        /// Command to keep running next to the watcher, e.g. a test runner.
        #[arg(long, value_name = "CMD")]
        test_runner: Option<String>,
    },
    /// Run the configured linters.
    Lint,
    /// Print the task graph as a Mermaid diagram.
    Graph,
}

#[derive(Args, Debug, Clone)]
struct Flags {
    /// Do not produce minified variants.
    #[arg(long, global = true)]
    skip_minification: bool,
    /// Do not produce standalone bundles.
    #[arg(long, global = true)]
    skip_standalone: bool,
    /// Report lint violations without failing the build.
    #[arg(long, global = true)]
    continue_on_lint_error: bool,
    /// Give up on a build cycle after this many seconds.
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,
    /// Directory containing the package manifest.
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<Utf8PathBuf>,
}

impl Flags {
    fn options(&self) -> BuildOptions {
        BuildOptions {
            minify: !self.skip_minification,
            standalone: !self.skip_standalone,
            continue_on_lint_error: self.continue_on_lint_error,
            timeout: self.timeout.map(Duration::from_secs),
        }
    }

    fn root(&self) -> anyhow::Result<Utf8PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => {
                let cwd = std::env::current_dir()?;
                Utf8PathBuf::try_from(cwd).context("working directory is not valid UTF-8")
            }
        }
    }
}

fn summarize(report: &BuildReport) {
    for (name, execution) in &report.executions {
        eprintln!("  {} {:?}", style(name).cyan(), execution.duration);
    }
    eprintln!(
        "{} {} task(s) in {:?}",
        style("done").green().bold(),
        report.succeeded().len(),
        report.duration
    );
}

fn finish(result: Result<BuildReport, BuildError>) -> anyhow::Result<()> {
    match result {
        Ok(report) => {
            summarize(&report);
            Ok(())
        }
        Err(err) => {
            for violation in err.report().map(|r| r.violations.as_slice()).unwrap_or_default() {
                eprintln!("  {violation}");
            }
            Err(err.into())
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tsumiki::init_logging();

    let mut options = cli.flags.options();
    if let Command::Watch { .. } = cli.command {
        options.continue_on_lint_error = true;
    }

    let project = Project::load(&cli.flags.root()?)?;
    let services = Services::standard(&project);
    let dist = Dist::new(project, services, &options)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Command::Build { mermaid } => {
            let result = rt.block_on(dist.build());
            if mermaid {
                let report = match &result {
                    Ok(report) => Some(report),
                    Err(err) => err.report(),
                };
                if let Some(report) = report {
                    println!("{}", dist.render(report));
                }
            }
            finish(result)
        }
        Command::Lint => finish(rt.block_on(dist.lint())),
        Command::Graph => {
            println!("{}", dist.graph());
            Ok(())
        }
        #[cfg(feature = "live")]
        Command::Watch { serve, test_runner } => {
            let options = tsumiki::WatchOptions {
                serve,
                test_runner: test_runner.map(|cmd| cmd.split_whitespace().map(String::from).collect()),
            };
            rt.block_on(dist.watch(options))?;
            Ok(())
        }
        #[cfg(not(feature = "live"))]
        Command::Watch { .. } => anyhow::bail!("built without the `live` feature, cannot watch"),
    }
}
