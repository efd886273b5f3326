// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A worker binary with a fixed set of test files, used by the orchestrator's integration tests.

use hivetest_runner::{
    errors::DisplayErrorChain,
    tree::{Body, Registry, SuiteBuilder, TestFailure},
    worker::{WORKER_ARG, serve_stdio},
};
use std::time::Duration;

fn arithmetic(s: &mut SuiteBuilder<'_>) {
    s.describe("arithmetic", |s| {
        s.it("adds", Body::sync(|cx| cx.check_eq(4, 2 + 2)));
        s.it("subtracts", Body::sync(|cx| cx.check_eq(0, 2 - 2)));
        s.stub("multiplies");
    });
}

fn waiting(s: &mut SuiteBuilder<'_>) {
    s.it(
        "waits",
        Body::future(|_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        }),
    );
    s.it(
        "fails",
        Body::callback(|_, done| done.fail(TestFailure::msg("nope"))),
    );
}

fn focused(s: &mut SuiteBuilder<'_>) {
    s.it_only("focused", Body::sync(|_| Ok(())));
    s.it("unfocused", Body::sync(|_| Ok(())));
}

fn crashing(_: &mut SuiteBuilder<'_>) {
    std::process::exit(3);
}

fn main() {
    if std::env::args().nth(1).as_deref() != Some(WORKER_ARG) {
        eprintln!("usage: hivetest-fixture-worker {WORKER_ARG}");
        std::process::exit(2);
    }

    let mut registry = Registry::new();
    registry
        .register("arithmetic.rs", arithmetic)
        .register("waiting.rs", waiting)
        .register("focused.rs", focused)
        .register("crashing.rs", crashing);

    if let Err(error) = serve_stdio(&registry) {
        eprintln!("fixture worker: {}", DisplayErrorChain::new(error));
        std::process::exit(1);
    }
}
