// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::tree::{AssertionOutcome, TestFailure};
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
    time::Duration,
};
use tokio::sync::mpsc::UnboundedSender;

/// Identifies one invocation of a hook or test body.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) struct Epoch(pub(crate) u64);

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message from a running body back to the scheduler.
#[derive(Debug)]
pub(crate) enum Signal {
    Completed {
        epoch: Epoch,
        result: Result<(), TestFailure>,
    },
    TimeLimitChanged {
        epoch: Epoch,
        limit: Duration,
    },
}

/// The context handed to every test body and hook.
///
/// Cloning a context is cheap; clones refer to the same invocation.
#[derive(Clone, Debug)]
pub struct TestContext {
    inner: Rc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    title: String,
    epoch: Epoch,
    assertive: bool,
    time_limit: Cell<Duration>,
    sender: UnboundedSender<Signal>,
    results: RefCell<Vec<AssertionOutcome>>,
    logs: Rc<RefCell<Vec<String>>>,
}

impl TestContext {
    pub(crate) fn new(
        title: String,
        epoch: Epoch,
        assertive: bool,
        time_limit: Duration,
        sender: UnboundedSender<Signal>,
        logs: Rc<RefCell<Vec<String>>>,
    ) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                title,
                epoch,
                assertive,
                time_limit: Cell::new(time_limit),
                sender,
                results: RefCell::new(Vec::new()),
                logs,
            }),
        }
    }

    pub(crate) fn take_results(&self) -> Vec<AssertionOutcome> {
        self.inner.results.take()
    }

    /// Returns the dotted title of the node being run.
    pub fn title(&self) -> &str {
        &self.inner.title
    }

    /// Returns the time limit currently in effect.
    pub fn time_limit(&self) -> Duration {
        self.inner.time_limit.get()
    }

    /// Changes the time limit of the running node, re-arming its timer from now.
    ///
    /// A zero limit disables the timer.
    pub fn set_time_limit(&self, limit: Duration) {
        self.inner.time_limit.set(limit);
        _ = self.inner.sender.send(Signal::TimeLimitChanged {
            epoch: self.inner.epoch,
            limit,
        });
    }

    /// Appends a message to the run's logs.
    pub fn log(&self, message: impl Into<String>) {
        self.inner.logs.borrow_mut().push(message.into());
    }

    /// Records an assertion.
    ///
    /// In assertive mode a failed assertion returns an error, so `?` stops the body. Otherwise
    /// the body keeps going and the first failed assertion fails the node once it completes.
    pub fn check(&self, condition: bool, message: impl Into<String>) -> Result<(), TestFailure> {
        let message = message.into();
        self.inner.results.borrow_mut().push(AssertionOutcome {
            passed: condition,
            message: message.clone(),
        });
        if !condition && self.inner.assertive {
            return Err(TestFailure::assertion(message));
        }
        Ok(())
    }

    /// Records an equality assertion.
    pub fn check_eq<T>(&self, expected: T, actual: T) -> Result<(), TestFailure>
    where
        T: PartialEq + fmt::Debug,
    {
        let passed = expected == actual;
        let message = if passed {
            format!("{actual:?} == {expected:?}")
        } else {
            format!("expected {expected:?}, got {actual:?}")
        };
        self.check(passed, message)
    }
}

/// The completion handle for a callback body.
///
/// Signaling more than once, or after the node has timed out, is recorded as an error.
#[derive(Clone, Debug)]
pub struct Done {
    epoch: Epoch,
    sender: UnboundedSender<Signal>,
}

impl Done {
    pub(crate) fn new(epoch: Epoch, sender: UnboundedSender<Signal>) -> Self {
        Self { epoch, sender }
    }

    /// Signals successful completion.
    pub fn ok(&self) {
        self.complete(Ok(()));
    }

    /// Signals completion with a failure.
    pub fn fail(&self, failure: impl Into<TestFailure>) {
        self.complete(Err(failure.into()));
    }

    /// Signals completion with the given result.
    pub fn complete(&self, result: Result<(), TestFailure>) {
        // The scheduler may already be gone, in which case there's nobody to tell.
        _ = self.sender.send(Signal::Completed {
            epoch: self.epoch,
            result,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn context(assertive: bool) -> (TestContext, mpsc::UnboundedReceiver<Signal>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cx = TestContext::new(
            "suite.test".to_owned(),
            Epoch(3),
            assertive,
            Duration::from_millis(10),
            sender,
            Rc::default(),
        );
        (cx, receiver)
    }

    #[test]
    fn assertive_check_stops() {
        let (cx, _receiver) = context(true);
        cx.check_eq(1, 1).unwrap();
        let err = cx.check_eq(1, 2).unwrap_err();
        assert_eq!(err.message(), "expected 1, got 2");

        let results = cx.take_results();
        assert_eq!(results.len(), 2);
        assert!(results[0].passed);
        assert!(!results[1].passed);
    }

    #[test]
    fn non_assertive_check_continues() {
        let (cx, _receiver) = context(false);
        cx.check(false, "first").unwrap();
        cx.check(true, "second").unwrap();
        assert_eq!(cx.take_results().len(), 2);
    }

    #[test]
    fn time_limit_change_is_signaled() {
        let (cx, mut receiver) = context(false);
        cx.set_time_limit(Duration::from_millis(20));
        assert_eq!(cx.time_limit(), Duration::from_millis(20));
        match receiver.try_recv().unwrap() {
            Signal::TimeLimitChanged { epoch, limit } => {
                assert_eq!(epoch, Epoch(3));
                assert_eq!(limit, Duration::from_millis(20));
            }
            other => panic!("unexpected signal {other:?}"),
        }
    }
}
