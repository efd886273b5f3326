// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Body, FailureKind, SuiteBuilder, TestFailure};
use crate::{test_filter::TitleFilter, time::StopwatchStart};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fmt,
    ops::Index,
    panic::{self, AssertUnwindSafe},
    time::Duration,
};
use tracing::debug;

/// An index into a [`NodeTree`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(usize);

/// The progress cursor of a node.
///
/// Phases only ever advance. Tests skip [`Phase::Children`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Phase {
    /// Not yet visited.
    Wait,
    /// Running `before` hooks (suites) or the `before_each` chain (tests).
    Before,
    /// Running the test body. Suites pass straight through.
    Run,
    /// Visiting children, suites only.
    Children,
    /// Running `after` hooks (suites) or the `after_each` chain (tests).
    After,
    /// Finished.
    End,
}

/// Where in a node's lifecycle an error was raised.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Origin {
    /// The file could not be loaded.
    Load,
    /// A suite's definition function.
    Definition,
    /// A `before` or `before_each` hook.
    BeforeHook,
    /// A test body.
    Body,
    /// An `after` or `after_each` hook.
    AfterHook,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Origin::Load => "load",
            Origin::Definition => "suite definition",
            Origin::BeforeHook => "before hook",
            Origin::Body => "test body",
            Origin::AfterHook => "after hook",
        })
    }
}

/// The kind of a [`NodeError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeErrorKind {
    /// An error returned by a body or passed to its completion handle.
    Failure,
    /// A failed assertion.
    Assertion,
    /// A panic caught at the node boundary.
    Panic,
    /// The body or hook did not complete within the node's time limit.
    Timeout,
    /// A completion handle was signaled more than once.
    DuplicateCompletion,
    /// A completion handle was signaled after the node had already timed out.
    LateCompletion,
    /// The file failed to load.
    Load,
}

impl fmt::Display for NodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeErrorKind::Failure => "failure",
            NodeErrorKind::Assertion => "assertion failed",
            NodeErrorKind::Panic => "panic",
            NodeErrorKind::Timeout => "timeout",
            NodeErrorKind::DuplicateCompletion => "duplicate completion",
            NodeErrorKind::LateCompletion => "late completion",
            NodeErrorKind::Load => "load failure",
        })
    }
}

/// An error attached to a node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeError {
    kind: NodeErrorKind,
    origin: Origin,
    message: String,
}

impl NodeError {
    pub(crate) fn new(kind: NodeErrorKind, origin: Origin, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            message: message.into(),
        }
    }

    pub(crate) fn from_failure(origin: Origin, failure: TestFailure) -> Self {
        let kind = match failure.kind() {
            FailureKind::Error => NodeErrorKind::Failure,
            FailureKind::Assertion => NodeErrorKind::Assertion,
            FailureKind::Panic => NodeErrorKind::Panic,
        };
        Self::new(kind, origin, failure.message())
    }

    pub(crate) fn timeout(origin: Origin, limit: Duration) -> Self {
        Self::new(
            NodeErrorKind::Timeout,
            origin,
            format!("timeout of {}ms exceeded", limit.as_millis()),
        )
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> NodeErrorKind {
        self.kind
    }

    /// Returns where the error was raised.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}: {}", self.kind, self.origin, self.message)
    }
}

/// The outcome of a single assertion made through a [`TestContext`](crate::scheduler::TestContext).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssertionOutcome {
    /// Whether the assertion held.
    pub passed: bool,
    /// The assertion's message.
    pub message: String,
}

#[derive(Debug, Default)]
pub(crate) struct Hooks {
    pub(crate) before: Vec<Body>,
    pub(crate) after: Vec<Body>,
    pub(crate) before_each: Vec<Body>,
    pub(crate) after_each: Vec<Body>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum HookSlot {
    Before,
    After,
    BeforeEach,
    AfterEach,
}

impl Hooks {
    pub(crate) fn slot_mut(&mut self, slot: HookSlot) -> &mut Vec<Body> {
        match slot {
            HookSlot::Before => &mut self.before,
            HookSlot::After => &mut self.after,
            HookSlot::BeforeEach => &mut self.before_each,
            HookSlot::AfterEach => &mut self.after_each,
        }
    }
}

#[derive(Debug)]
pub(crate) enum NodeKind {
    Suite {
        children: Vec<NodeId>,
        hooks: Hooks,
    },
    Test {
        body: Option<Body>,
    },
}

/// Flags requested when a node is registered.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Mark {
    pub(crate) only: bool,
    pub(crate) skip: bool,
}

/// A suite or a test.
#[derive(Debug)]
pub struct Node {
    name: String,
    title: String,
    file: Option<Utf8PathBuf>,
    file_root: bool,
    parent: Option<NodeId>,
    pub(crate) kind: NodeKind,
    pub(crate) time_limit: Duration,
    only: bool,
    skip: bool,
    within_only: bool,
    has_only: bool,
    has_matches: bool,
    ignored: bool,
    phase: Phase,
    // Index of the next hook or child within the current phase.
    pub(crate) step: usize,
    error: Option<NodeError>,
    extra_errors: Vec<NodeError>,
    pub(crate) results: Vec<AssertionOutcome>,
    pub(crate) started: Option<StopwatchStart>,
    pub(crate) elapsed: Option<Duration>,
}

impl Node {
    /// Returns the node's own name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the dotted title path below the file suite.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the file this node was defined in.
    pub fn file(&self) -> Option<&Utf8Path> {
        self.file.as_deref()
    }

    /// Returns the parent node, or `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Returns true if this node is a test.
    pub fn is_test(&self) -> bool {
        matches!(self.kind, NodeKind::Test { .. })
    }

    /// Returns true if this node is the top-level suite for a file.
    pub fn is_file_root(&self) -> bool {
        self.file_root
    }

    /// Returns true if this node is a test without a body.
    pub fn is_stub(&self) -> bool {
        matches!(self.kind, NodeKind::Test { body: None })
    }

    /// Returns the node's current time limit.
    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Returns true if this node is flagged `only`.
    pub fn only(&self) -> bool {
        self.only
    }

    /// Returns true if this node, or an ancestor at creation time, is flagged `skip`.
    pub fn skip(&self) -> bool {
        self.skip
    }

    /// Returns true if this node or any descendant is flagged `only`.
    pub fn has_only(&self) -> bool {
        self.has_only
    }

    /// Returns true if this node or an ancestor is flagged `only`.
    pub fn within_only(&self) -> bool {
        self.within_only
    }

    /// Returns true if this node or a descendant matched the grep filter.
    pub fn has_matches(&self) -> bool {
        self.has_matches
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the first error recorded against this node.
    pub fn error(&self) -> Option<&NodeError> {
        self.error.as_ref()
    }

    /// Returns errors recorded after the first one.
    pub fn extra_errors(&self) -> &[NodeError] {
        &self.extra_errors
    }

    /// Returns recorded assertion outcomes.
    pub fn results(&self) -> &[AssertionOutcome] {
        &self.results
    }

    /// Returns how long the node took, once it has ended.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    pub(crate) fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Suite { children, .. } => children,
            NodeKind::Test { .. } => &[],
        }
    }

    pub(crate) fn advance(&mut self, to: Phase) {
        debug_assert!(
            to > self.phase,
            "phase of `{}` must advance, but went from {:?} to {:?}",
            self.title,
            self.phase,
            to
        );
        self.phase = to;
        self.step = 0;
    }

    /// Records an error. Only the first error decides the node's outcome.
    pub(crate) fn record_error(&mut self, error: NodeError) {
        if self.error.is_none() {
            self.error = Some(error);
        } else {
            self.extra_errors.push(error);
        }
    }
}

/// An arena of nodes rooted at a single, nameless suite.
#[derive(Debug)]
pub struct NodeTree {
    nodes: Vec<Node>,
    filter: TitleFilter,
}

impl NodeTree {
    const ROOT: NodeId = NodeId(0);

    /// Creates a tree containing only the root suite.
    pub fn new(default_time_limit: Duration, filter: TitleFilter) -> Self {
        let root = Node {
            name: String::new(),
            title: String::new(),
            file: None,
            file_root: false,
            parent: None,
            kind: NodeKind::Suite {
                children: Vec::new(),
                hooks: Hooks::default(),
            },
            time_limit: default_time_limit,
            only: false,
            skip: false,
            within_only: false,
            has_only: false,
            has_matches: true,
            ignored: false,
            phase: Phase::Wait,
            step: 0,
            error: None,
            extra_errors: Vec::new(),
            results: Vec::new(),
            started: None,
            elapsed: None,
        };
        Self {
            nodes: vec![root],
            filter,
        }
    }

    /// Returns the root suite.
    pub fn root(&self) -> NodeId {
        Self::ROOT
    }

    /// Returns true if any node in the tree is flagged `only`.
    pub fn has_only(&self) -> bool {
        self.nodes[Self::ROOT.0].has_only
    }

    /// Returns the children of a node in registration order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self[id].children()
    }

    /// Returns the file suites directly under the root.
    pub fn files(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children(Self::ROOT).iter().copied()
    }

    /// Loads a file by evaluating its definition. A panicking definition is recorded as the
    /// file suite's error.
    pub fn add_file(
        &mut self,
        path: impl Into<Utf8PathBuf>,
        define: impl FnOnce(&mut SuiteBuilder<'_>),
    ) -> NodeId {
        let id = self.add_file_root(path.into());
        self.define_suite(id, define);
        id
    }

    /// Adds a synthetic failing suite for a file that could not be loaded.
    pub fn add_load_failure(
        &mut self,
        path: impl Into<Utf8PathBuf>,
        message: impl Into<String>,
    ) -> NodeId {
        let id = self.add_file_root(path.into());
        let node = self.node_mut(id);
        // Load failures must stay visible no matter the filter.
        node.has_matches = true;
        node.record_error(NodeError::new(NodeErrorKind::Load, Origin::Load, message));
        self.mark_matches(id);
        id
    }

    /// Returns the number of tests at or below this node.
    pub fn count_tests(&self, id: NodeId) -> usize {
        match &self[id].kind {
            NodeKind::Test { .. } => 1,
            NodeKind::Suite { children, .. } => {
                children.iter().map(|&child| self.count_tests(child)).sum()
            }
        }
    }

    /// Removes nodes which neither match the grep filter nor lead to a match, as well as any
    /// node matching the ignore filter.
    ///
    /// `has_only` is recomputed over the kept nodes, so an only-flagged node removed here no
    /// longer puts the tree into only-mode.
    pub fn prune(&mut self) {
        self.prune_children(Self::ROOT);
    }

    // Returns whether the node or a kept descendant is flagged only.
    fn prune_children(&mut self, id: NodeId) -> bool {
        let children = match &mut self.node_mut(id).kind {
            NodeKind::Suite { children, .. } => std::mem::take(children),
            NodeKind::Test { .. } => return self[id].only,
        };
        let kept: Vec<_> = children
            .into_iter()
            .filter(|&child| {
                let node = &self[child];
                let keep = node.has_matches && !node.ignored;
                if !keep {
                    debug!(title = node.title(), "pruning node");
                }
                keep
            })
            .collect();
        let mut has_only = self[id].only;
        for &child in &kept {
            has_only |= self.prune_children(child);
        }

        let node = self.node_mut(id);
        node.has_only = has_only;
        if let NodeKind::Suite { children, .. } = &mut node.kind {
            *children = kept;
        }
        has_only
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Returns the hooks of the given slot that apply to a node, in the order they run.
    ///
    /// For suites this is the suite's own `before` or `after` hooks. For tests this is the
    /// `before_each` chain from the outermost suite inwards, or the `after_each` chain from the
    /// innermost suite outwards.
    pub(crate) fn hooks_for(&self, id: NodeId, slot: HookSlot) -> Vec<Body> {
        match (&self[id].kind, slot) {
            (NodeKind::Suite { hooks, .. }, HookSlot::Before) => hooks.before.clone(),
            (NodeKind::Suite { hooks, .. }, HookSlot::After) => hooks.after.clone(),
            (NodeKind::Test { .. }, HookSlot::BeforeEach) => {
                let mut chain: Vec<_> = self.ancestors(id).collect();
                chain.reverse();
                chain
                    .into_iter()
                    .flat_map(|suite| self.suite_hooks(suite, HookSlot::BeforeEach))
                    .cloned()
                    .collect()
            }
            (NodeKind::Test { .. }, HookSlot::AfterEach) => self
                .ancestors(id)
                .flat_map(|suite| self.suite_hooks(suite, HookSlot::AfterEach))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn add_hook(&mut self, suite: NodeId, slot: HookSlot, hook: Body) {
        if let NodeKind::Suite { hooks, .. } = &mut self.node_mut(suite).kind {
            hooks.slot_mut(slot).push(hook);
        }
    }

    pub(crate) fn add_node(
        &mut self,
        parent: NodeId,
        name: String,
        kind: NodeKind,
        mark: Mark,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        // File suites are named by path, which the title filter never sees.
        let filterable = parent != Self::ROOT;
        let parent_node = &self[parent];
        let title = if parent_node.file_root || !filterable {
            name.clone()
        } else {
            format!("{}.{}", parent_node.title, name)
        };

        let node = Node {
            file: parent_node.file.clone(),
            file_root: false,
            parent: Some(parent),
            kind,
            time_limit: parent_node.time_limit,
            only: mark.only,
            skip: mark.skip || parent_node.skip,
            within_only: mark.only || parent_node.within_only,
            has_only: false,
            has_matches: !self.filter.has_grep(),
            ignored: filterable && self.filter.ignores(&title),
            phase: Phase::Wait,
            step: 0,
            error: None,
            extra_errors: Vec::new(),
            results: Vec::new(),
            started: None,
            elapsed: None,
            name,
            title,
        };
        let matches = filterable && self.filter.has_grep() && self.filter.matches(&node.title);
        self.nodes.push(node);

        if let NodeKind::Suite { children, .. } = &mut self.node_mut(parent).kind {
            children.push(id);
        }
        if mark.only {
            self.mark_only(id);
        }
        if matches {
            self.mark_matches(id);
        }
        id
    }

    pub(crate) fn define_suite(&mut self, id: NodeId, define: impl FnOnce(&mut SuiteBuilder<'_>)) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut builder = SuiteBuilder::new(self, id);
            define(&mut builder);
        }));
        if let Err(payload) = result {
            let failure = TestFailure::panic(payload);
            self.node_mut(id)
                .record_error(NodeError::from_failure(Origin::Definition, failure));
        }
    }

    fn add_file_root(&mut self, path: Utf8PathBuf) -> NodeId {
        let id = self.add_node(
            Self::ROOT,
            path.to_string(),
            NodeKind::Suite {
                children: Vec::new(),
                hooks: Hooks::default(),
            },
            Mark::default(),
        );
        let node = self.node_mut(id);
        node.file = Some(path);
        node.file_root = true;
        id
    }

    fn suite_hooks(&self, id: NodeId, slot: HookSlot) -> &[Body] {
        let NodeKind::Suite { hooks, .. } = &self[id].kind else {
            return &[];
        };
        match slot {
            HookSlot::Before => &hooks.before,
            HookSlot::After => &hooks.after,
            HookSlot::BeforeEach => &hooks.before_each,
            HookSlot::AfterEach => &hooks.after_each,
        }
    }

    fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self[id].parent, |&parent| self[parent].parent)
    }

    // Propagation happens eagerly so the invariant holds even if the run stops early.
    fn mark_only(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node_mut(node_id);
            node.has_only = true;
            current = node.parent;
        }
    }

    fn mark_matches(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node_mut(node_id);
            node.has_matches = true;
            current = node.parent;
        }
    }
}

impl Index<NodeId> for NodeTree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}
