// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::DisplayErrorChain,
    scheduler::{Done, TestContext},
};
use futures::{FutureExt, future::LocalBoxFuture};
use std::{any::Any, error, fmt, future::Future, rc::Rc};

type SyncFn = dyn Fn(&TestContext) -> Result<(), TestFailure>;
type CallbackFn = dyn Fn(&TestContext, Done);
type FutureFn = dyn Fn(TestContext) -> LocalBoxFuture<'static, Result<(), TestFailure>>;

/// The code attached to a test or hook.
///
/// Authors pick the form explicitly; the scheduler never guesses whether a function is
/// asynchronous.
#[derive(Clone)]
pub enum Body {
    /// Runs to completion synchronously. A panic fails the node.
    Sync(Rc<SyncFn>),

    /// Receives a [`Done`] handle and is complete once the handle is signaled.
    Callback(Rc<CallbackFn>),

    /// Returns a future which is driven on the worker's local executor.
    Future(Rc<FutureFn>),
}

impl Body {
    /// Creates a synchronous body.
    pub fn sync(f: impl Fn(&TestContext) -> Result<(), TestFailure> + 'static) -> Self {
        Body::Sync(Rc::new(f))
    }

    /// Creates a completion-based body.
    pub fn callback(f: impl Fn(&TestContext, Done) + 'static) -> Self {
        Body::Callback(Rc::new(f))
    }

    /// Creates a future-returning body.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(TestContext) -> Fut + 'static,
        Fut: Future<Output = Result<(), TestFailure>> + 'static,
    {
        Body::Future(Rc::new(move |cx| f(cx).boxed_local()))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Sync(_) => f.write_str("Body::Sync"),
            Body::Callback(_) => f.write_str("Body::Callback"),
            Body::Future(_) => f.write_str("Body::Future"),
        }
    }
}

/// A failure reported by a test body or hook.
///
/// Any [`std::error::Error`] converts into a `TestFailure`, so `?` works inside bodies.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestFailure {
    kind: FailureKind,
    message: String,
}

/// The kind of a [`TestFailure`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// An error returned or passed to a completion handle.
    Error,

    /// A failed assertion.
    Assertion,

    /// A panic caught at the node boundary.
    Panic,
}

impl TestFailure {
    /// Creates a failure with the given message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Error,
            message: message.into(),
        }
    }

    pub(crate) fn assertion(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Assertion,
            message: message.into(),
        }
    }

    pub(crate) fn panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with a non-string payload".to_owned()
        };
        Self {
            kind: FailureKind::Panic,
            message,
        }
    }

    /// Returns the kind of failure.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E: error::Error> From<E> for TestFailure {
    fn from(error: E) -> Self {
        Self::msg(DisplayErrorChain::new(error).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_convert_with_their_chain() {
        fn parse() -> Result<(), TestFailure> {
            "nope".parse::<u32>()?;
            Ok(())
        }

        let failure = parse().unwrap_err();
        assert_eq!(failure.kind(), FailureKind::Error);
        assert_eq!(failure.message(), "invalid digit found in string");
    }

    #[test]
    fn panic_payloads() {
        let failure = std::panic::catch_unwind(|| panic!("boom {}", 42)).unwrap_err();
        assert_eq!(TestFailure::panic(failure).message(), "boom 42");

        let failure = TestFailure::panic(Box::new(7_u8));
        assert_eq!(failure.kind(), FailureKind::Panic);
        assert_eq!(failure.message(), "panic with a non-string payload");
    }
}
