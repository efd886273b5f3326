// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Done, Epoch, Signal, TestContext};
use crate::{
    errors::{RunError, TitlePatternError},
    reporter::{ProgressReporter, TestOutcome, render_summary},
    test_filter::TitleFilter,
    time::stopwatch,
    tree::{
        Body, HookSlot, Node, NodeError, NodeErrorKind, NodeId, NodeKind, NodeTree, Origin, Phase,
        TestFailure,
    },
};
use futures::FutureExt;
use hivetest_metadata::{RecordError, ResultRecord};
use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    time::Duration,
};
use swrite::{SWrite, swrite};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::LocalSet,
    time::Instant,
};
use tracing::{debug, info, warn};

/// Options for running a tree.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunOptions {
    /// The default time limit for every node. Zero disables time limits.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Stop the whole run at the first failure.
    #[serde(default)]
    pub bail: bool,

    /// Stop a test at its first failed assertion.
    #[serde(default)]
    pub assertive: bool,

    /// Only run nodes whose dotted title matches this pattern.
    #[serde(default)]
    pub grep: Option<String>,

    /// Never run nodes whose dotted title matches this pattern.
    #[serde(default)]
    pub ignore: Option<String>,
}

impl RunOptions {
    /// The time limit used when none is configured.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Compiles the grep and ignore patterns.
    pub fn title_filter(&self) -> Result<TitleFilter, TitlePatternError> {
        TitleFilter::new(self.grep.as_deref(), self.ignore.as_deref())
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
            bail: false,
            assertive: false,
            grep: None,
            ignore: None,
        }
    }
}

/// Runs a tree to completion on a fresh single-threaded runtime.
pub fn run_tree(
    tree: NodeTree,
    options: &RunOptions,
    reporter: &mut dyn ProgressReporter,
) -> Result<ResultRecord, RunError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(RunError::RuntimeCreate)?;
    let local = LocalSet::new();
    Ok(local.block_on(&runtime, Scheduler::new(tree, options, reporter).run()))
}

/// Walks a [`NodeTree`] and produces its [`ResultRecord`].
pub struct Scheduler<'a> {
    tree: NodeTree,
    bail: bool,
    assertive: bool,
    reporter: &'a mut dyn ProgressReporter,
    progress_failed: bool,
    sender: UnboundedSender<Signal>,
    receiver: UnboundedReceiver<Signal>,
    next_epoch: u64,
    settled: HashMap<Epoch, Settled>,
    logs: Rc<RefCell<Vec<String>>>,
    record: ResultRecord,
}

#[derive(Clone, Copy, Debug)]
struct Settled {
    node: NodeId,
    origin: Origin,
    reason: SettleReason,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SettleReason {
    Completed,
    TimedOut,
}

#[derive(Debug)]
enum Settlement {
    Completed(Result<(), TestFailure>),
    TimedOut(Duration),
}

enum Wake {
    Signal(Signal),
    Deadline,
}

impl<'a> Scheduler<'a> {
    /// Creates a new scheduler for this tree.
    pub fn new(
        tree: NodeTree,
        options: &RunOptions,
        reporter: &'a mut dyn ProgressReporter,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            tree,
            bail: options.bail,
            assertive: options.assertive,
            reporter,
            progress_failed: false,
            sender,
            receiver,
            next_epoch: 0,
            settled: HashMap::new(),
            logs: Rc::default(),
            record: ResultRecord::default(),
        }
    }

    /// Runs the tree. Must be polled from within a [`LocalSet`], since future bodies are
    /// spawned onto it.
    pub async fn run(mut self) -> ResultRecord {
        self.tree.prune();
        let root = self.tree.root();
        debug!(
            tests = self.tree.count_tests(root),
            only = self.tree.has_only(),
            "walking tree"
        );

        let mut cursor = Some(root);
        while let Some(id) = cursor {
            cursor = self.step(id).await;
        }
        self.finish()
    }

    /// Performs the work for the node's current phase, and returns the node to continue with.
    async fn step(&mut self, id: NodeId) -> Option<NodeId> {
        match self.tree[id].phase() {
            Phase::Wait => self.enter(id),
            Phase::Before => self.run_before(id).await,
            Phase::Run => self.run_body(id).await,
            Phase::Children => return self.next_child(id),
            Phase::After => self.run_after(id).await,
            Phase::End => return self.leave(id),
        }
        Some(id)
    }

    fn enter(&mut self, id: NodeId) {
        let node = self.tree.node_mut(id);
        node.started = Some(stopwatch());
        if let Some(file) = node.file().filter(|_| node.is_file_root()) {
            debug!(%file, "file started");
        }
        node.advance(Phase::Before);
    }

    async fn run_before(&mut self, id: NodeId) {
        let node = &self.tree[id];
        if !node.is_test() && node.error().is_some() {
            // The suite failed to define or load, so nothing beneath it runs.
            let count = self.tree.count_tests(id);
            self.skip_tests(count);
            self.tree.node_mut(id).advance(Phase::End);
            return;
        }

        let slot = if node.is_test() {
            HookSlot::BeforeEach
        } else {
            HookSlot::Before
        };
        self.run_hooks(id, slot, Origin::BeforeHook).await;
        self.tree.node_mut(id).advance(Phase::Run);
    }

    async fn run_body(&mut self, id: NodeId) {
        let node = &self.tree[id];
        let body = match &node.kind {
            NodeKind::Test { body: Some(body) } if node.error().is_none() => Some(body.clone()),
            _ => None,
        };
        if let Some(body) = body {
            self.invoke(id, &body, Origin::Body).await;
        }

        let next = if self.tree[id].is_test() {
            Phase::After
        } else {
            Phase::Children
        };
        self.tree.node_mut(id).advance(next);
    }

    fn next_child(&mut self, id: NodeId) -> Option<NodeId> {
        let node = &self.tree[id];
        if node.error().is_some() {
            // A failed `before` hook skips every child.
            let remaining = node.children()[node.step..]
                .iter()
                .map(|&child| self.tree.count_tests(child))
                .sum();
            self.skip_tests(remaining);
            self.tree.node_mut(id).advance(Phase::After);
            return Some(id);
        }

        let Some(&child_id) = node.children().get(node.step) else {
            self.tree.node_mut(id).advance(Phase::After);
            return Some(id);
        };
        self.tree.node_mut(id).step += 1;

        let child = &self.tree[child_id];
        // Nodes with their own errors stay visible in only-mode.
        let excluded_by_only = self.tree.has_only()
            && !child.has_only()
            && !child.within_only()
            && child.error().is_none();
        if child.skip() {
            debug!(title = child.title(), "skipping");
            let count = self.tree.count_tests(child_id);
            self.skip_tests(count);
        } else if child.is_stub() {
            self.record.stubbed += 1;
            self.report(TestOutcome::Stubbed);
        } else if excluded_by_only {
            debug!(title = child.title(), "skipping outside only-mode selection");
            let count = self.tree.count_tests(child_id);
            self.skip_tests(count);
        } else {
            return Some(child_id);
        }
        Some(id)
    }

    async fn run_after(&mut self, id: NodeId) {
        let slot = if self.tree[id].is_test() {
            HookSlot::AfterEach
        } else {
            HookSlot::After
        };
        self.run_hooks(id, slot, Origin::AfterHook).await;
        self.tree.node_mut(id).advance(Phase::End);
    }

    fn leave(&mut self, id: NodeId) -> Option<NodeId> {
        let node = self.tree.node_mut(id);
        let snapshot = node.started.as_ref().map(|started| started.snapshot());
        node.elapsed = snapshot.as_ref().map(|snapshot| snapshot.duration);

        if node.is_file_root()
            && let (Some(file), Some(snapshot)) = (node.file(), &snapshot)
        {
            debug!(
                %file,
                started_at = %snapshot.start_time,
                elapsed_ms = snapshot.millis(),
                "file finished"
            );
            self.record.times.insert(file.to_owned(), snapshot.millis());
        }

        let node = &self.tree[id];
        let failed = node.error().is_some();
        let is_test = node.is_test();
        let parent = node.parent();
        if failed {
            self.record.failed += 1;
            self.record.errors.push(record_error(node));
        } else if is_test {
            self.record.passed += 1;
        }
        if is_test {
            self.report(if failed {
                TestOutcome::Failed
            } else {
                TestOutcome::Passed
            });
        }

        if failed && self.bail {
            info!(title = self.tree[id].title(), "bailing after failure");
            self.record.bailed = true;
            return None;
        }
        parent
    }

    async fn run_hooks(&mut self, id: NodeId, slot: HookSlot, origin: Origin) {
        let hooks = self.tree.hooks_for(id, slot);
        for hook in &hooks {
            if self.invoke(id, hook, origin).await {
                break;
            }
        }
    }

    /// Runs a body or hook on behalf of a node, and returns true if it failed.
    ///
    /// The invocation's own failure is recorded before any queued stray signal, so it stays the
    /// node's first error.
    async fn invoke(&mut self, id: NodeId, body: &Body, origin: Origin) -> bool {
        let epoch = Epoch(self.next_epoch);
        self.next_epoch += 1;

        let node = &self.tree[id];
        debug!(title = node.title(), %origin, %epoch, "invoking");
        let cx = TestContext::new(
            node.title().to_owned(),
            epoch,
            self.assertive,
            node.time_limit(),
            self.sender.clone(),
            self.logs.clone(),
        );

        let settlement = match self.start(body, &cx, epoch) {
            Some(result) => {
                self.settle(epoch, id, origin, SettleReason::Completed);
                Settlement::Completed(result)
            }
            None => self.wait(id, origin, epoch).await,
        };

        let results = cx.take_results();
        let first_failed = results
            .iter()
            .find(|outcome| !outcome.passed)
            .map(|outcome| outcome.message.clone());
        let error = match settlement {
            Settlement::Completed(Ok(())) => {
                first_failed.map(|message| NodeError::new(NodeErrorKind::Assertion, origin, message))
            }
            Settlement::Completed(Err(failure)) => Some(NodeError::from_failure(origin, failure)),
            Settlement::TimedOut(limit) => Some(NodeError::timeout(origin, limit)),
        };
        let failed = error.is_some();
        let node = self.tree.node_mut(id);
        node.results.extend(results);
        if let Some(error) = error {
            node.record_error(error);
        }

        // Anything already queued, such as a second completion, is handled before the node
        // moves on.
        self.drain_signals();
        failed
    }

    /// Starts a body. Returns the result if the body finished synchronously.
    fn start(
        &self,
        body: &Body,
        cx: &TestContext,
        epoch: Epoch,
    ) -> Option<Result<(), TestFailure>> {
        match body {
            Body::Sync(f) => Some(
                panic::catch_unwind(AssertUnwindSafe(|| f(cx)))
                    .unwrap_or_else(|payload| Err(TestFailure::panic(payload))),
            ),
            Body::Callback(f) => {
                let done = Done::new(epoch, self.sender.clone());
                panic::catch_unwind(AssertUnwindSafe(|| f(cx, done)))
                    .err()
                    .map(|payload| Err(TestFailure::panic(payload)))
            }
            Body::Future(f) => match panic::catch_unwind(AssertUnwindSafe(|| f(cx.clone()))) {
                Ok(future) => {
                    let sender = self.sender.clone();
                    tokio::task::spawn_local(async move {
                        let result = AssertUnwindSafe(future)
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|payload| Err(TestFailure::panic(payload)));
                        _ = sender.send(Signal::Completed { epoch, result });
                    });
                    None
                }
                Err(payload) => Some(Err(TestFailure::panic(payload))),
            },
        }
    }

    /// Suspends until the invocation completes or its time limit elapses.
    async fn wait(&mut self, id: NodeId, origin: Origin, epoch: Epoch) -> Settlement {
        let mut limit = self.tree[id].time_limit();
        let sleep = tokio::time::sleep(limit);
        tokio::pin!(sleep);

        let settlement = loop {
            let wake = tokio::select! {
                biased;
                signal = self.receiver.recv() => signal.map_or(Wake::Deadline, Wake::Signal),
                () = &mut sleep, if !limit.is_zero() => Wake::Deadline,
            };

            match wake {
                Wake::Signal(Signal::Completed { epoch: got, result }) if got == epoch => {
                    break Settlement::Completed(result);
                }
                Wake::Signal(Signal::TimeLimitChanged { epoch: got, limit: new }) if got == epoch => {
                    debug!(title = self.tree[id].title(), limit = ?new, "time limit changed");
                    limit = new;
                    self.tree.node_mut(id).time_limit = new;
                    sleep.as_mut().reset(Instant::now() + new);
                }
                Wake::Signal(signal) => self.handle_stray(signal),
                Wake::Deadline => {
                    debug!(title = self.tree[id].title(), ?limit, "timed out");
                    break Settlement::TimedOut(limit);
                }
            }
        };

        let reason = match settlement {
            Settlement::Completed(_) => SettleReason::Completed,
            Settlement::TimedOut(_) => SettleReason::TimedOut,
        };
        self.settle(epoch, id, origin, reason);
        settlement
    }

    fn settle(&mut self, epoch: Epoch, node: NodeId, origin: Origin, reason: SettleReason) {
        self.settled.insert(
            epoch,
            Settled {
                node,
                origin,
                reason,
            },
        );
    }

    fn drain_signals(&mut self) {
        while let Ok(signal) = self.receiver.try_recv() {
            self.handle_stray(signal);
        }
    }

    /// Handles a signal for an invocation that has already settled.
    fn handle_stray(&mut self, signal: Signal) {
        match signal {
            Signal::Completed { epoch, result } => {
                let Some(settled) = self.settled.get(&epoch).copied() else {
                    warn!(%epoch, "completion signaled for an unknown invocation");
                    return;
                };
                let (kind, mut message) = match settled.reason {
                    SettleReason::Completed => (
                        NodeErrorKind::DuplicateCompletion,
                        "completion signaled more than once".to_owned(),
                    ),
                    SettleReason::TimedOut => (
                        NodeErrorKind::LateCompletion,
                        "completion signaled after timeout".to_owned(),
                    ),
                };
                if let Err(failure) = result {
                    swrite!(message, " (with error: {failure})");
                }
                self.record_stray(settled.node, NodeError::new(kind, settled.origin, message));
            }
            Signal::TimeLimitChanged { epoch, limit } => {
                // Changes from a finished invocation still apply while its node is running.
                if let Some(settled) = self.settled.get(&epoch) {
                    let node = self.tree.node_mut(settled.node);
                    if node.phase() < Phase::End {
                        node.time_limit = limit;
                    }
                }
            }
        }
    }

    fn record_stray(&mut self, id: NodeId, error: NodeError) {
        let node = self.tree.node_mut(id);
        if node.phase() < Phase::End {
            node.record_error(error);
            return;
        }
        warn!(title = node.title(), %error, "error signaled after node finished");
        self.record.errors.push(RecordError {
            title: display_title(node),
            trace: error.to_string(),
        });
    }

    fn skip_tests(&mut self, count: usize) {
        self.record.skipped += count;
        for _ in 0..count {
            self.report(TestOutcome::Skipped);
        }
    }

    fn report(&mut self, outcome: TestOutcome) {
        if let Err(error) = self.reporter.test_finished(outcome)
            && !self.progress_failed
        {
            warn!(%error, "failed to report progress");
            self.progress_failed = true;
        }
    }

    fn finish(mut self) -> ResultRecord {
        // Files cut short by bail never reach `leave`, so they report no time and keep their
        // previous manifest estimate.
        self.drain_signals();

        let mut record = self.record;
        record.has_only = self.tree.has_only();
        record.logs = self.logs.take();
        record.output = render_summary(&record);
        debug!(
            passed = record.passed,
            failed = record.failed,
            skipped = record.skipped,
            stubbed = record.stubbed,
            bailed = record.bailed,
            "tree finished"
        );
        record
    }
}

fn display_title(node: &Node) -> String {
    match node.file() {
        Some(file) if !node.is_file_root() => format!("{file}: {}", node.title()),
        _ => node.title().to_owned(),
    }
}

fn record_error(node: &Node) -> RecordError {
    let mut trace = node
        .error()
        .map(|error| error.to_string())
        .unwrap_or_default();
    for extra in node.extra_errors() {
        swrite!(trace, "\n{extra}");
    }
    RecordError {
        title: display_title(node),
        trace,
    }
}
