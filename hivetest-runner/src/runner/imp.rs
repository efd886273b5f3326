// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::process::{WorkerEvent, run_worker};
use crate::{
    config::get_num_cpus,
    errors::{DisplayErrorChain, OrchestratorBuildError, RunError},
    manifest::{Manifest, ManifestStore},
    partition::WorkAssignment,
    reporter::{PlainProgress, ResultAggregator},
    scheduler::{RunOptions, run_tree},
    time::stopwatch,
    tree::Registry,
    worker::{WORKER_ARG, WorkerRequest},
};
use camino::Utf8PathBuf;
use hivetest_metadata::{AggregateResult, HivetestExitCode, ResultRecord};
use std::{
    collections::BTreeMap,
    env,
    ffi::OsString,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, info, warn};

/// The program and arguments used to start a worker process.
#[derive(Clone, Debug)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    /// Creates a command for the given program, without arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Re-executes the current binary in worker mode.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(env::current_exe()?).arg(WORKER_ARG))
    }

    /// Appends an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Returns the program.
    pub fn program(&self) -> &Path {
        &self.program
    }

    pub(super) fn to_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Orchestrator options.
#[derive(Debug, Default)]
pub struct OrchestratorBuilder {
    workers: Option<usize>,
    worker_command: Option<WorkerCommand>,
    options: RunOptions,
    store: Option<ManifestStore>,
}

impl OrchestratorBuilder {
    /// Sets the number of workers. At most one runs everything in this process.
    pub fn set_workers(&mut self, workers: usize) -> &mut Self {
        self.workers = Some(workers);
        self
    }

    /// Sets the command used to start worker processes.
    ///
    /// Defaults to the current executable with the worker argument.
    pub fn set_worker_command(&mut self, command: WorkerCommand) -> &mut Self {
        self.worker_command = Some(command);
        self
    }

    /// Sets the options every worker runs with.
    pub fn set_options(&mut self, options: RunOptions) -> &mut Self {
        self.options = options;
        self
    }

    /// Sets the store the refreshed manifest is saved to after a run.
    pub fn set_store(&mut self, store: ManifestStore) -> &mut Self {
        self.store = Some(store);
        self
    }

    /// Creates a new orchestrator.
    pub fn build(self, registry: &Registry) -> Result<Orchestrator<'_>, OrchestratorBuildError> {
        // Reject bad patterns here rather than once per worker.
        self.options.title_filter()?;

        let workers = self.workers.unwrap_or_else(get_num_cpus);
        let worker_command = match self.worker_command {
            Some(command) => command,
            None => WorkerCommand::current_exe().map_err(OrchestratorBuildError::CurrentExe)?,
        };

        Ok(Orchestrator {
            registry,
            workers,
            worker_command,
            options: self.options,
            store: self.store,
        })
    }
}

/// Runs assignments and merges their results.
#[derive(Debug)]
pub struct Orchestrator<'a> {
    registry: &'a Registry,
    workers: usize,
    worker_command: WorkerCommand,
    options: RunOptions,
    store: Option<ManifestStore>,
}

impl Orchestrator<'_> {
    /// Returns a builder with default options.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Returns the number of workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Returns the options every worker runs with.
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs every assignment and returns the merged result.
    ///
    /// Progress is written to `output` as it arrives. Once every assignment has reported back,
    /// observed file times are folded into `manifest`, which is then saved if a store is set.
    /// A worker that fails never fails the run as a whole: it is reported as failures against
    /// its files instead.
    pub fn run_all(
        &self,
        assignments: Vec<WorkAssignment>,
        manifest: &mut Manifest,
        output: &mut dyn Write,
    ) -> Result<RunOutcome, RunError> {
        let start = stopwatch();
        let file_count: usize = assignments.iter().map(|a| a.files.len()).sum();
        info!(
            workers = self.workers,
            assignments = assignments.len(),
            files = file_count,
            "starting run"
        );

        let mut aggregator = ResultAggregator::new();
        let worker_failures = if self.workers <= 1 || assignments.len() <= 1 {
            self.run_in_process(assignments, &mut aggregator, output)?;
            0
        } else {
            self.run_workers(assignments, &mut aggregator, output)?
        };

        let result = aggregator.finish(start.snapshot().duration);
        info!(
            passed = result.passed,
            failed = result.failed,
            skipped = result.skipped,
            stubbed = result.stubbed,
            elapsed_ms = result.time.as_millis(),
            "run finished"
        );

        manifest.apply_times(&result.times);
        if let Some(store) = &self.store
            && let Err(error) = store.save(manifest)
        {
            warn!(error = %DisplayErrorChain::new(&error), "failed to save timing manifest");
        }

        Ok(RunOutcome {
            result,
            worker_failures,
        })
    }

    fn run_in_process(
        &self,
        assignments: Vec<WorkAssignment>,
        aggregator: &mut ResultAggregator,
        output: &mut dyn Write,
    ) -> Result<(), RunError> {
        let files: Vec<_> = assignments
            .into_iter()
            .flat_map(|assignment| assignment.files)
            .collect();
        debug!(files = files.len(), "running in process");

        let tree = self.registry.load(&files, &self.options)?;
        let mut progress = PlainProgress::new(&mut *output);
        let record = run_tree(tree, &self.options, &mut progress)?;
        aggregator.merge(record);
        Ok(())
    }

    fn run_workers(
        &self,
        assignments: Vec<WorkAssignment>,
        aggregator: &mut ResultAggregator,
        output: &mut dyn Write,
    ) -> Result<usize, RunError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("hivetest-orchestrator")
            .build()
            .map_err(RunError::RuntimeCreate)?;

        let (sender, mut receiver) = unbounded_channel();
        let mut pending: BTreeMap<usize, Vec<Utf8PathBuf>> = BTreeMap::new();
        for assignment in assignments {
            let slot = assignment.slot;
            debug!(
                slot,
                files = assignment.files.len(),
                expected_ms = assignment.expected_ms,
                "dispatching assignment"
            );
            pending.insert(slot, assignment.files.clone());

            let request = WorkerRequest {
                files: assignment.files,
                options: self.options.clone(),
            };
            let command = self.worker_command.clone();
            let sender = sender.clone();
            runtime.spawn(async move {
                let (record, worker_failed) =
                    match run_worker(&command, slot, &request, &sender).await {
                        Ok(record) => (record, false),
                        Err(error) => {
                            let message = DisplayErrorChain::new(&error).to_string();
                            warn!(slot, error = %message, "worker failed");
                            (ResultRecord::worker_failure(&request.files, &message), true)
                        }
                    };
                _ = sender.send(WorkerEvent::Finished {
                    slot,
                    record,
                    worker_failed,
                });
            });
        }
        // Only the worker tasks hold senders now, so the loop below ends once all are done.
        drop(sender);

        let mut worker_failures = 0;
        runtime.block_on(async {
            while let Some(event) = receiver.recv().await {
                match event {
                    WorkerEvent::Progress { text, .. } => {
                        output
                            .write_all(text.as_bytes())
                            .and_then(|()| output.flush())
                            .map_err(RunError::WriteOutput)?;
                    }
                    WorkerEvent::Finished {
                        slot,
                        record,
                        worker_failed,
                    } => {
                        debug!(slot, worker_failed, "worker finished");
                        pending.remove(&slot);
                        if worker_failed {
                            worker_failures += 1;
                        }
                        aggregator.merge(record);
                    }
                }
            }
            Ok::<_, RunError>(())
        })?;

        // A task that panicked drops its sender without reporting.
        for (slot, files) in pending {
            warn!(slot, "worker task ended without a result");
            worker_failures += 1;
            aggregator.merge(ResultRecord::worker_failure(
                &files,
                "worker task ended without a result",
            ));
        }

        Ok(worker_failures)
    }
}

/// The outcome of [`Orchestrator::run_all`].
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// The merged result.
    pub result: AggregateResult,

    /// The number of workers that never produced a record of their own.
    pub worker_failures: usize,
}

impl RunOutcome {
    /// Returns the process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        if !self.result.is_success() {
            HivetestExitCode::TEST_RUN_FAILED
        } else if self.result.passed + self.result.failed == 0 {
            HivetestExitCode::NO_TESTS_RUN
        } else {
            HivetestExitCode::OK
        }
    }
}
