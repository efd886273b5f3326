// Copyright (c) The hivetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A demonstration binary with a handful of registered files.

use hivetest_runner::tree::{Body, Registry, SuiteBuilder, TestFailure};
use std::time::Duration;

fn arithmetic(s: &mut SuiteBuilder<'_>) {
    s.describe("addition", |s| {
        s.it("adds small numbers", Body::sync(|cx| cx.check_eq(4, 2 + 2)));
        s.it(
            "wraps on overflow",
            Body::sync(|cx| cx.check_eq(0u8, 255u8.wrapping_add(1))),
        );
    });
    s.describe("division", |s| {
        s.it(
            "rejects zero",
            Body::sync(|_| match 10u32.checked_div(0) {
                None => Ok(()),
                Some(n) => Err(TestFailure::msg(format!("divided by zero and got {n}"))),
            }),
        );
        s.stub("rounds towards zero");
    });
}

fn timers(s: &mut SuiteBuilder<'_>) {
    s.set_time_limit(Duration::from_millis(500));
    s.before(Body::sync(|cx| {
        cx.log("timers: starting");
        Ok(())
    }));
    s.it(
        "sleeps",
        Body::future(|_| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }),
    );
    s.it(
        "completes from a callback",
        Body::callback(|_, done| {
            tokio::task::spawn_local(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                done.ok();
            });
        }),
    );
    s.it(
        "extends its own time limit",
        Body::future(|cx| async move {
            cx.set_time_limit(Duration::from_secs(1));
            tokio::time::sleep(Duration::from_millis(600)).await;
            Ok(())
        }),
    );
}

fn main() -> color_eyre::Result<()> {
    let mut registry = Registry::new();
    registry
        .register("demo/arithmetic.rs", arithmetic)
        .register("demo/timers.rs", timers);
    hivetest::main_with_registry(&registry)
}
