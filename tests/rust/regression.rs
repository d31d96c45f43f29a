// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use crate::common::Bench;
use ::anyhow::Result;
use ::cosim::{
    ensure_eq,
    Config,
    Event,
    Fail,
    FailKind,
    RegressionManager,
    SimulatorBackend,
    Task,
    TestCase,
    TestContext,
    TestOutcome,
    TestResult,
    TimeUnit,
};
use ::std::{
    cell::RefCell,
    rc::Rc,
};

//==============================================================================
// Helpers
//==============================================================================

fn manager(bench: &Bench, config: &str) -> Result<RegressionManager> {
    let config: Config = config.parse()?;
    Ok(RegressionManager::new(&bench.sched, &config)?)
}

fn verdicts(results: &[TestResult]) -> Vec<(String, String)> {
    results
        .iter()
        .map(|result| (result.name.clone(), result.outcome.to_string()))
        .collect()
}

fn failure_kind(result: &TestResult) -> Option<FailKind> {
    match &result.outcome {
        TestOutcome::Failed(e) => Some(e.kind),
        _ => None,
    }
}

async fn sleep(ctx: TestContext, ns: f64) -> Result<(), Fail> {
    ctx.sched.timer(ns, TimeUnit::Ns)?.await
}

//==============================================================================
// Unit Tests
//==============================================================================

#[test]
fn tests_run_in_order_and_are_judged() -> Result<()> {
    let bench: Bench = Bench::new();
    let manager: RegressionManager = manager(&bench, "cosim:\n  random_seed: 7\n")?;
    ensure_eq!(manager.seed(), 7);

    manager.add_test(TestCase::new("passes", |ctx: TestContext| sleep(ctx, 10.0)));
    manager.add_test(TestCase::new("fails", |_: TestContext| async {
        Err::<(), Fail>(Fail::user("boom"))
    }));
    manager.add_test(TestCase::new("skipped", |_: TestContext| async { Ok::<(), Fail>(()) }).skip(true));
    manager.add_test(
        TestCase::new("expects_timeout", |ctx: TestContext| sleep(ctx, 1000.0))
            .timeout(100.0, TimeUnit::Ns)
            .expect_error(FailKind::Timeout),
    );
    manager.add_test(TestCase::new("expects_failure", |_: TestContext| async {
        Err::<(), Fail>(Fail::user("expected"))
    })
    .expect_fail(true));
    manager.add_test(TestCase::new("sees_seed", |ctx: TestContext| async move {
        if ctx.seed != 7 || ctx.name != "sees_seed" {
            return Err(Fail::user("wrong context"));
        }
        Ok::<(), Fail>(())
    }));

    manager.start()?;
    bench.sim.run(None)?;
    let results: Vec<TestResult> = manager.finish();

    let expected: Vec<(String, String)> = [
        ("passes", "PASS"),
        ("fails", "FAIL"),
        ("skipped", "SKIP"),
        ("expects_timeout", "PASS"),
        ("expects_failure", "PASS"),
        ("sees_seed", "PASS"),
    ]
    .iter()
    .map(|(name, verdict)| (name.to_string(), verdict.to_string()))
    .collect();
    ensure_eq!(verdicts(&results), expected);
    ensure_eq!(failure_kind(&results[1]), Some(FailKind::User));
    ensure_eq!(results[0].sim_time_ns, 10.0);
    ensure_eq!(results[3].sim_time_ns, 100.0);
    ensure_eq!(bench.now_ns(), 110.0);
    Ok(())
}

#[test]
fn default_timeout_applies_to_every_test() -> Result<()> {
    let bench: Bench = Bench::new();
    let manager: RegressionManager = manager(
        &bench,
        "regression:\n  default_timeout:\n    time: 20\n    unit: ns\n",
    )?;
    manager.add_test(TestCase::new("hangs", |ctx: TestContext| sleep(ctx, 500.0)));
    manager.add_test(TestCase::new("quick", |ctx: TestContext| sleep(ctx, 5.0)));

    manager.start()?;
    bench.sim.run(None)?;
    let results: Vec<TestResult> = manager.finish();

    ensure_eq!(failure_kind(&results[0]), Some(FailKind::Timeout));
    ensure_eq!(results[1].outcome, TestOutcome::Passed);
    ensure_eq!(bench.now_ns(), 25.0);
    Ok(())
}

#[test]
fn testcase_filter_selects_tests() -> Result<()> {
    let bench: Bench = Bench::new();
    let manager: RegressionManager = manager(&bench, "regression:\n  testcase: [second]\n")?;
    manager.add_test(TestCase::new("first", |_: TestContext| async { Ok::<(), Fail>(()) }));
    manager.add_test(TestCase::new("second", |_: TestContext| async { Ok::<(), Fail>(()) }));

    manager.start()?;
    bench.sim.run(None)?;
    let results: Vec<TestResult> = manager.finish();

    ensure_eq!(verdicts(&results), vec![("second".to_string(), "PASS".to_string())]);
    Ok(())
}

#[test]
fn tasks_left_behind_by_a_test_are_cancelled() -> Result<()> {
    let bench: Bench = Bench::new();
    let manager: RegressionManager = manager(&bench, "")?;
    let leftover: Rc<RefCell<Option<Task<()>>>> = Rc::new(RefCell::new(None));

    let slot: Rc<RefCell<Option<Task<()>>>> = leftover.clone();
    manager.add_test(TestCase::new("spawner", move |ctx: TestContext| {
        let slot: Rc<RefCell<Option<Task<()>>>> = slot.clone();
        async move {
            let sched = ctx.sched.clone();
            let background: Task<()> = ctx
                .sched
                .start("background", async move { sched.timer(1000.0, TimeUnit::Ns)?.await })
                .await?;
            *slot.borrow_mut() = Some(background);
            Ok::<(), Fail>(())
        }
    }));
    manager.add_test(TestCase::new("next", |ctx: TestContext| sleep(ctx, 10.0)));

    manager.start()?;
    bench.sim.run(None)?;
    let results: Vec<TestResult> = manager.finish();

    ensure_eq!(verdicts(&results).len(), 2);
    ensure_eq!(results.iter().all(|r| r.outcome == TestOutcome::Passed), true);
    let background: Task<()> = match leftover.borrow().clone() {
        Some(task) => task,
        None => anyhow::bail!("spawner did not run"),
    };
    ensure_eq!(background.cancelled(), true);
    ensure_eq!(bench.now_ns(), 10.0);
    Ok(())
}

#[test]
fn simulator_failure_fails_current_and_remaining_tests() -> Result<()> {
    let bench: Bench = Bench::new();
    let manager: RegressionManager = manager(&bench, "")?;
    manager.add_test(TestCase::new("victim", |ctx: TestContext| sleep(ctx, 100.0)));
    manager.add_test(TestCase::new("never_run", |_: TestContext| async { Ok::<(), Fail>(()) }));

    let sim = bench.sim.clone();
    bench
        .sim
        .register_timed(50_000, Box::new(move || sim.fail("design crashed")))?;

    manager.start()?;
    ensure_eq!(bench.sim.run(None).map_err(|e| e.kind), Err(FailKind::SimFailure));
    let results: Vec<TestResult> = manager.finish();

    ensure_eq!(
        verdicts(&results),
        vec![
            ("victim".to_string(), "FAIL".to_string()),
            ("never_run".to_string(), "FAIL".to_string()),
        ]
    );
    ensure_eq!(failure_kind(&results[0]), Some(FailKind::SimFailure));
    ensure_eq!(failure_kind(&results[1]), Some(FailKind::SimFailure));
    ensure_eq!(bench.sched.num_tasks(), 0);
    Ok(())
}

#[test]
fn test_still_running_at_finish_fails() -> Result<()> {
    let bench: Bench = Bench::new();
    let manager: RegressionManager = manager(&bench, "")?;
    let never: Event = Event::new("never");
    manager.add_test(TestCase::new("stuck", move |_: TestContext| {
        let never: Event = never.clone();
        async move { never.wait().await }
    }));

    manager.start()?;
    bench.sim.run(None)?;
    let results: Vec<TestResult> = manager.finish();

    ensure_eq!(results.len(), 1);
    ensure_eq!(failure_kind(&results[0]), Some(FailKind::SimFailure));
    ensure_eq!(bench.sched.num_tasks(), 0);
    Ok(())
}
