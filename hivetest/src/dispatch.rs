// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result},
    output::{OutputContext, OutputOpts},
    watch::{ChangeSource, PollingChangeSource},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hivetest_metadata::{AggregateResult, HivetestExitCode};
use hivetest_runner::{
    config::{HivetestConfig, HivetestProfile, WorkerCount},
    manifest::{ManifestStore, ManifestWindow},
    partition::Partitioner,
    reporter::render_totals,
    runner::{Orchestrator, RunOutcome},
    scheduler::RunOptions,
    tree::Registry,
    worker::{WORKER_ARG, serve_stdio},
};
use itertools::Itertools;
use owo_colors::{OwoColorize, Style, style};
use std::{
    io::{self, Write},
    time::Duration,
};
use tracing::info;

/// Runs suites of tests across worker processes.
#[derive(Debug, Parser)]
#[command(version, name = "hivetest")]
pub struct HivetestApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(flatten)]
    config_opts: ConfigOpts,

    #[command(subcommand)]
    command: Command,
}

impl HivetestApp {
    /// Initializes logging for this invocation.
    pub(crate) fn init_output(&self) -> OutputContext {
        self.output.init(matches!(self.command, Command::Worker))
    }

    /// Executes the app, returning the process exit code.
    pub(crate) fn exec(self, registry: &Registry, output: OutputContext) -> Result<i32> {
        match self.command {
            Command::List => {
                let mut stdout = io::stdout().lock();
                for path in registry.paths() {
                    writeln!(stdout, "{path}")
                        .map_err(|err| ExpectedError::WriteOutput { err })?;
                }
                Ok(HivetestExitCode::OK)
            }
            Command::Run(opts) => opts.exec(&self.config_opts, registry, output),
            Command::Worker => {
                serve_stdio(registry)?;
                Ok(HivetestExitCode::OK)
            }
        }
    }
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: base-dir/.config/hivetest.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Base directory for config, the manifest store and watched files [default: current
    /// directory]
    #[arg(long, global = true, value_name = "DIR")]
    base_dir: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn base_dir(&self) -> Result<Utf8PathBuf> {
        if let Some(base_dir) = &self.base_dir {
            return Ok(base_dir.clone());
        }
        let current_dir =
            std::env::current_dir().map_err(|err| ExpectedError::BaseDirError { err })?;
        Utf8PathBuf::from_path_buf(current_dir)
            .map_err(|path| ExpectedError::BaseDirInvalidUtf8 { path })
    }

    fn make_config(&self, base_dir: &Utf8Path) -> Result<HivetestConfig> {
        Ok(HivetestConfig::from_sources(
            base_dir,
            self.config_file.as_deref(),
        )?)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered test files
    List,

    /// Run tests
    ///
    /// Files are split across worker processes using timings from previous runs. With no file
    /// arguments, every registered file is run.
    Run(RunOpts),

    /// Run one assignment read from stdin, as a worker for `hivetest run`
    #[command(name = WORKER_ARG, hide = true)]
    Worker,
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Test files to run [default: all registered files]
    #[arg(value_name = "FILES")]
    files: Vec<Utf8PathBuf>,

    /// Config profile to use
    #[arg(long, short = 'P', env = "HIVETEST_PROFILE")]
    profile: Option<String>,

    /// Number of worker processes ("num-cpus", a count, or negative for fewer than the CPU
    /// count)
    #[arg(long, short = 'j', env = "HIVETEST_WORKERS", allow_negative_numbers = true)]
    workers: Option<WorkerCount>,

    /// Default time limit for hooks and tests, such as "2s" or "500ms" (0 disables)
    #[arg(long, short = 't', value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Stop at the first failure
    #[arg(long, short = 'b')]
    bail: bool,

    /// Stop each test at its first failed assertion
    #[arg(long)]
    assertive: bool,

    /// Only run tests whose dotted title matches this regex
    #[arg(long, short = 'g', value_name = "PATTERN")]
    grep: Option<String>,

    /// Skip tests whose dotted title matches this regex
    #[arg(long, value_name = "PATTERN")]
    ignore: Option<String>,

    /// Timing window used to balance files across workers
    #[arg(long, value_enum)]
    manifest_window: Option<ManifestWindowOpt>,

    /// Re-run whenever a test file changes
    ///
    /// Test definitions are compiled into this binary, so changes to them only take effect once
    /// it is rebuilt and restarted. Watching reruns the same definitions, which is useful when
    /// tests read the watched files at run time.
    #[arg(long, short = 'w')]
    watch: bool,

    /// How often to check for changes in watch mode
    #[arg(long, default_value = "500ms", value_parser = humantime::parse_duration)]
    watch_interval: Duration,
}

impl RunOpts {
    fn exec(
        self,
        config_opts: &ConfigOpts,
        registry: &Registry,
        output: OutputContext,
    ) -> Result<i32> {
        let base_dir = config_opts.base_dir()?;
        let config = config_opts.make_config(&base_dir)?;
        let profile = config.profile(
            self.profile
                .as_deref()
                .unwrap_or(HivetestConfig::DEFAULT_PROFILE),
        )?;

        let workers = self.workers.unwrap_or_else(|| profile.workers()).compute();
        let window = self
            .manifest_window
            .map_or_else(|| profile.manifest_window(), ManifestWindow::from);
        let options = self.run_options(&profile);
        let store = ManifestStore::new(profile.store_dir());

        let files: Vec<Utf8PathBuf> = if self.files.is_empty() {
            registry.paths().map(|path| path.to_owned()).collect()
        } else {
            self.files.clone()
        };

        let mut builder = Orchestrator::builder();
        builder
            .set_workers(workers)
            .set_options(options)
            .set_store(store.clone());
        let orchestrator = builder.build(registry)?;
        let partitioner = Partitioner::new(window);

        let mut change_source = self.watch.then(|| {
            PollingChangeSource::new(&base_dir, files.iter().cloned(), self.watch_interval)
        });

        loop {
            let outcome = run_once(&orchestrator, &partitioner, &store, &files, workers)?;
            write_summary(&outcome.result, output)
                .map_err(|err| ExpectedError::WriteOutput { err })?;

            let Some(change_source) = &mut change_source else {
                return Ok(outcome.exit_code());
            };
            info!("waiting for changes to {} files", files.len());
            let changed = change_source.wait_for_change();
            info!("changed: {}, running again", changed.iter().join(", "));
        }
    }

    fn run_options(&self, profile: &HivetestProfile<'_>) -> RunOptions {
        let mut options = profile.run_options();
        if let Some(timeout) = self.timeout {
            options.timeout = timeout;
        }
        options.bail |= self.bail;
        options.assertive |= self.assertive;
        options.grep.clone_from(&self.grep);
        options.ignore.clone_from(&self.ignore);
        options
    }
}

fn run_once(
    orchestrator: &Orchestrator<'_>,
    partitioner: &Partitioner,
    store: &ManifestStore,
    files: &[Utf8PathBuf],
    workers: usize,
) -> Result<RunOutcome> {
    // Trees, and the manifest, are rebuilt from scratch on every run.
    let mut manifest = store.load();
    let assignments = partitioner.partition(files, workers, &manifest);
    let mut stdout = io::stdout().lock();
    Ok(orchestrator.run_all(assignments, &mut manifest, &mut stdout)?)
}

fn write_summary(result: &AggregateResult, output: OutputContext) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout)?;
    for fragment in &result.outputs {
        write!(stdout, "\n{fragment}")?;
    }
    if !result.logs.is_empty() {
        writeln!(stdout, "\nlogs:")?;
        for line in &result.logs {
            writeln!(stdout, "  {line}")?;
        }
    }
    if output.verbose && !result.times.is_empty() {
        writeln!(stdout, "\nfile times:")?;
        for (file, ms) in result.times.iter().sorted_by(|a, b| b.1.cmp(a.1)) {
            writeln!(stdout, "  {ms:>6}ms {file}")?;
        }
    }

    let totals_style = if !output.colorize_stdout() {
        Style::new()
    } else if result.is_success() {
        style().green().bold()
    } else {
        style().red().bold()
    };
    write!(stdout, "\n{}", render_totals(result).style(totals_style))?;
    stdout.flush()
}

/// A clap-facing mirror of [`ManifestWindow`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ManifestWindowOpt {
    Latest,
    Short,
    Medium,
    Long,
}

impl From<ManifestWindowOpt> for ManifestWindow {
    fn from(opt: ManifestWindowOpt) -> Self {
        match opt {
            ManifestWindowOpt::Latest => ManifestWindow::Latest,
            ManifestWindowOpt::Short => ManifestWindow::Short,
            ManifestWindowOpt::Medium => ManifestWindow::Medium,
            ManifestWindowOpt::Long => ManifestWindow::Long,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn verify_app() {
        HivetestApp::command().debug_assert();
    }

    fn parse_run(args: &[&str]) -> RunOpts {
        let app = HivetestApp::try_parse_from(
            std::iter::once("hivetest").chain(args.iter().copied()),
        )
        .unwrap();
        match app.command {
            Command::Run(opts) => opts,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn run_flags_override_profile() {
        let opts = parse_run(&[
            "run",
            "-j",
            "3",
            "--timeout",
            "150ms",
            "--bail",
            "--grep",
            "adds",
            "--manifest-window",
            "medium",
            "tests/math.rs",
        ]);
        assert_eq!(opts.files, vec![Utf8PathBuf::from("tests/math.rs")]);
        assert_eq!(opts.workers, Some(WorkerCount::Count(3)));
        assert_eq!(opts.manifest_window, Some(ManifestWindowOpt::Medium));

        let config = HivetestConfig::default_config("/base").unwrap();
        let profile = config.profile(HivetestConfig::DEFAULT_PROFILE).unwrap();
        let options = opts.run_options(&profile);
        assert_eq!(
            options,
            RunOptions {
                timeout: Duration::from_millis(150),
                bail: true,
                assertive: false,
                grep: Some("adds".to_owned()),
                ignore: None,
            }
        );
    }

    #[test]
    fn run_defaults_come_from_profile() {
        let opts = parse_run(&["run", "--profile", "ci"]);
        let config = HivetestConfig::default_config("/base").unwrap();
        let profile = config.profile(opts.profile.as_deref().unwrap()).unwrap();
        assert_eq!(opts.run_options(&profile).timeout, Duration::from_secs(10));
        assert!(!opts.watch);
        assert_eq!(opts.watch_interval, Duration::from_millis(500));
    }

    #[test]
    fn negative_workers_are_accepted() {
        let opts = parse_run(&["run", "--workers", "-1"]);
        assert!(matches!(opts.workers, Some(WorkerCount::Count(_))));
    }

    #[test]
    fn worker_subcommand_is_hidden() {
        let app = HivetestApp::try_parse_from(["hivetest", WORKER_ARG]).unwrap();
        assert!(matches!(app.command, Command::Worker));

        let help = HivetestApp::command().render_help().to_string();
        assert!(!help.contains(WORKER_ARG), "help mentions the worker: {help}");
    }
}
