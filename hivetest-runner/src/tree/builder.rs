// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Body, HookSlot, Hooks, Mark, NodeId, NodeKind, NodeTree};
use std::time::Duration;

/// Registers suites, tests and hooks inside one suite.
///
/// A builder is handed to every definition function. Nested suites get their own builder,
/// scoped to the nested suite, for the duration of their definition.
#[derive(Debug)]
pub struct SuiteBuilder<'a> {
    tree: &'a mut NodeTree,
    suite: NodeId,
}

impl<'a> SuiteBuilder<'a> {
    pub(crate) fn new(tree: &'a mut NodeTree, suite: NodeId) -> Self {
        Self { tree, suite }
    }

    /// Returns the suite this builder registers into.
    pub fn suite(&self) -> NodeId {
        self.suite
    }

    /// Defines a nested suite. The definition runs immediately.
    pub fn describe(
        &mut self,
        name: impl Into<String>,
        define: impl FnOnce(&mut SuiteBuilder<'_>),
    ) -> NodeId {
        self.add_suite(name.into(), Mark::default(), define)
    }

    /// Defines a nested suite which, along with everything under it, is exclusively selected.
    pub fn describe_only(
        &mut self,
        name: impl Into<String>,
        define: impl FnOnce(&mut SuiteBuilder<'_>),
    ) -> NodeId {
        let mark = Mark {
            only: true,
            skip: false,
        };
        self.add_suite(name.into(), mark, define)
    }

    /// Defines a nested suite whose tests are all skipped.
    pub fn describe_skip(
        &mut self,
        name: impl Into<String>,
        define: impl FnOnce(&mut SuiteBuilder<'_>),
    ) -> NodeId {
        let mark = Mark {
            only: false,
            skip: true,
        };
        self.add_suite(name.into(), mark, define)
    }

    /// Defines a test.
    pub fn it(&mut self, name: impl Into<String>, body: Body) -> NodeId {
        self.add_test(name.into(), Some(body), Mark::default())
    }

    /// Defines an exclusively selected test.
    pub fn it_only(&mut self, name: impl Into<String>, body: Body) -> NodeId {
        let mark = Mark {
            only: true,
            skip: false,
        };
        self.add_test(name.into(), Some(body), mark)
    }

    /// Defines a skipped test.
    pub fn it_skip(&mut self, name: impl Into<String>, body: Body) -> NodeId {
        let mark = Mark {
            only: false,
            skip: true,
        };
        self.add_test(name.into(), Some(body), mark)
    }

    /// Defines a test without a body, counted as stubbed.
    pub fn stub(&mut self, name: impl Into<String>) -> NodeId {
        self.add_test(name.into(), None, Mark::default())
    }

    /// Adds a hook which runs once before this suite's children.
    pub fn before(&mut self, hook: Body) -> &mut Self {
        self.tree.add_hook(self.suite, HookSlot::Before, hook);
        self
    }

    /// Adds a hook which runs once after this suite's children.
    pub fn after(&mut self, hook: Body) -> &mut Self {
        self.tree.add_hook(self.suite, HookSlot::After, hook);
        self
    }

    /// Adds a hook which runs before every test beneath this suite.
    pub fn before_each(&mut self, hook: Body) -> &mut Self {
        self.tree.add_hook(self.suite, HookSlot::BeforeEach, hook);
        self
    }

    /// Adds a hook which runs after every test beneath this suite.
    pub fn after_each(&mut self, hook: Body) -> &mut Self {
        self.tree.add_hook(self.suite, HookSlot::AfterEach, hook);
        self
    }

    /// Returns the time limit that new children of this suite inherit.
    pub fn time_limit(&self) -> Duration {
        self.tree[self.suite].time_limit
    }

    /// Sets the time limit for this suite. Children registered afterwards inherit it.
    pub fn set_time_limit(&mut self, limit: Duration) -> &mut Self {
        self.tree.node_mut(self.suite).time_limit = limit;
        self
    }

    fn add_suite(
        &mut self,
        name: String,
        mark: Mark,
        define: impl FnOnce(&mut SuiteBuilder<'_>),
    ) -> NodeId {
        let kind = NodeKind::Suite {
            children: Vec::new(),
            hooks: Hooks::default(),
        };
        let id = self.tree.add_node(self.suite, name, kind, mark);
        self.tree.define_suite(id, define);
        id
    }

    fn add_test(&mut self, name: String, body: Option<Body>, mark: Mark) -> NodeId {
        self.tree
            .add_node(self.suite, name, NodeKind::Test { body }, mark)
    }
}
