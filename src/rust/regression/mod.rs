// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Sequential execution of test functions against one simulation.
//!
//! Each test runs as a task. When it finishes its result is recorded, every task it left behind is cancelled, and the
//! next test is started in the same event-loop pass. If the simulator fails, the current test fails and the remaining
//! ones are not run.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    config::Config,
    fail::{
        Fail,
        FailKind,
    },
    scheduler::{
        SharedScheduler,
        Task,
    },
    time::TimeUnit,
    waiters::{
        self,
        Awaitable,
    },
};
use ::async_trait::async_trait;
use ::rand::{
    rngs::SmallRng,
    SeedableRng,
};
use ::std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    future::Future,
    rc::Rc,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// What a test receives when it starts.
#[derive(Clone)]
pub struct TestContext {
    pub sched: SharedScheduler,
    pub name: String,
    pub seed: u64,
}

/// A test registered with the regression manager.
pub struct TestCase {
    name: String,
    func: Rc<dyn TestFunction>,
    skip: bool,
    expect_fail: bool,
    expect_error: Vec<FailKind>,
    timeout: Option<(f64, TimeUnit)>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TestOutcome {
    Passed,
    Failed(Fail),
    Skipped,
}

#[derive(Clone, Debug)]
pub struct TestResult {
    pub name: String,
    pub outcome: TestOutcome,
    /// Simulation time the test took, in nanoseconds.
    pub sim_time_ns: f64,
    pub real_time: Duration,
}

struct RunningTest {
    case: TestCase,
    task: Task<()>,
    start_sim_ns: f64,
    start_real: Instant,
}

struct RegressionState {
    queue: VecDeque<TestCase>,
    results: Vec<TestResult>,
    current: Option<RunningTest>,
    filter: Vec<String>,
    seed: u64,
    default_timeout: Option<(f64, TimeUnit)>,
    sim_failed: bool,
}

/// Runs registered tests one after the other.
#[derive(Clone)]
pub struct RegressionManager {
    sched: SharedScheduler,
    state: Rc<RefCell<RegressionState>>,
}

//======================================================================================================================
// Traits
//======================================================================================================================

/// Body of a test.
#[async_trait(?Send)]
pub trait TestFunction {
    async fn run(&self, ctx: TestContext) -> Result<(), Fail>;
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TestContext {
    /// Random number generator seeded with the regression seed.
    pub fn rng(&self) -> SmallRng {
        SmallRng::seed_from_u64(self.seed)
    }
}

impl TestCase {
    pub fn new<F: TestFunction + 'static>(name: &str, func: F) -> Self {
        Self {
            name: name.to_string(),
            func: Rc::new(func),
            skip: false,
            expect_fail: false,
            expect_error: Vec::new(),
            timeout: None,
        }
    }

    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// The test passes only if it fails with a user error.
    pub fn expect_fail(mut self, expect_fail: bool) -> Self {
        self.expect_fail = expect_fail;
        self
    }

    /// The test passes only if it fails with a failure of `kind`.
    pub fn expect_error(mut self, kind: FailKind) -> Self {
        self.expect_error.push(kind);
        self
    }

    pub fn timeout(mut self, time: f64, unit: TimeUnit) -> Self {
        self.timeout = Some((time, unit));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, result: Result<Option<()>, Fail>) -> TestOutcome {
        let expects_failure: bool = self.expect_fail || !self.expect_error.is_empty();
        match result {
            Ok(_) if expects_failure => TestOutcome::Failed(Fail::user("test passed but was expected to fail")),
            Ok(_) => TestOutcome::Passed,
            Err(e) if self.expect_error.contains(&e.kind) => TestOutcome::Passed,
            Err(e) if self.expect_fail && e.kind == FailKind::User => TestOutcome::Passed,
            Err(e) => TestOutcome::Failed(e),
        }
    }
}

impl RegressionManager {
    /// Creates a manager that reads its seed, test filter and default timeout from `config`.
    pub fn new(sched: &SharedScheduler, config: &Config) -> Result<Self, Fail> {
        let seed: u64 = match config.random_seed()? {
            Some(seed) => seed,
            None => ::rand::random(),
        };
        info!("new(): seeding tests with {}", seed);
        Ok(Self {
            sched: sched.clone(),
            state: Rc::new(RefCell::new(RegressionState {
                queue: VecDeque::new(),
                results: Vec::new(),
                current: None,
                filter: config.testcases()?,
                seed,
                default_timeout: config.default_timeout()?,
                sim_failed: false,
            })),
        })
    }

    /// Registers a test. Tests not selected by the configured filter are dropped.
    pub fn add_test(&self, test: TestCase) {
        let mut state = self.state.borrow_mut();
        if !state.filter.is_empty() && !state.filter.iter().any(|name| name == &test.name) {
            debug!("add_test(): {} is filtered out", test.name);
            return;
        }
        state.queue.push_back(test);
    }

    pub fn seed(&self) -> u64 {
        self.state.borrow().seed
    }

    /// Installs the simulator failure hook and starts the first test. Drive the simulator afterwards, then call
    /// [RegressionManager::finish].
    pub fn start(&self) -> Result<(), Fail> {
        let tests: usize = self.state.borrow().queue.len();
        if tests == 0 {
            warn!("start(): no tests to run");
        }
        info!("start(): running {} test(s)", tests);

        let manager: RegressionManager = self.clone();
        self.sched
            .sim()
            .set_failure_hook(Box::new(move |fail: Fail| manager.on_sim_failure(fail)));

        self.execute_next();
        self.sched.event_loop()
    }

    fn execute_next(&self) {
        loop {
            let next: Option<TestCase> = {
                let mut state = self.state.borrow_mut();
                if state.sim_failed {
                    return;
                }
                state.queue.pop_front()
            };
            let case: TestCase = match next {
                Some(case) => case,
                None => return,
            };
            if case.skip {
                info!("execute_next(): {} skipped", case.name);
                self.record(&case.name, TestOutcome::Skipped, 0.0, Duration::ZERO);
                continue;
            }
            self.start_test(case);
            return;
        }
    }

    fn start_test(&self, case: TestCase) {
        info!("start_test(): running {}", case.name);
        let (seed, default_timeout): (u64, Option<(f64, TimeUnit)>) = {
            let state = self.state.borrow();
            (state.seed, state.default_timeout)
        };
        let ctx: TestContext = TestContext {
            sched: self.sched.clone(),
            name: case.name.clone(),
            seed,
        };
        let func: Rc<dyn TestFunction> = case.func.clone();
        let body = async move { func.run(ctx).await };

        let task: Task<()> = match case.timeout.or(default_timeout) {
            Some((time, unit)) => {
                let sched: SharedScheduler = self.sched.clone();
                self.sched.start_soon(&case.name, async move {
                    waiters::with_timeout(&sched, Awaitable::coroutine(body), time, unit).await
                })
            },
            None => self.sched.start_soon(&case.name, body),
        };

        self.state.borrow_mut().current = Some(RunningTest {
            case,
            task: task.clone(),
            start_sim_ns: self.sched.sim_time(TimeUnit::Ns),
            start_real: Instant::now(),
        });
        let manager: RegressionManager = self.clone();
        task.add_done_callback(move || manager.test_completed());
    }

    fn test_completed(&self) {
        let running: RunningTest = match self.state.borrow_mut().current.take() {
            Some(running) => running,
            None => return,
        };
        let outcome: TestOutcome = running.case.evaluate(running.task.result());
        match &outcome {
            TestOutcome::Failed(e) => warn!("test_completed(): {} failed: {}", running.case.name, e),
            _ => info!("test_completed(): {} passed", running.case.name),
        }
        self.record(
            &running.case.name,
            outcome,
            self.sched.sim_time(TimeUnit::Ns) - running.start_sim_ns,
            running.start_real.elapsed(),
        );

        let leftover: usize = self.sched.cancel_all_tasks();
        if leftover > 0 {
            debug!("test_completed(): cancelled {} leftover task(s)", leftover);
        }
        self.execute_next();
    }

    /// Fails the running test and every test that has not run yet.
    fn on_sim_failure(&self, fail: Fail) {
        error!("on_sim_failure(): {}", fail);
        let sim_fail: Fail = Fail::wrap(FailKind::SimFailure, "simulator failed", fail);
        let (running, not_run): (Option<RunningTest>, Vec<TestCase>) = {
            let mut state = self.state.borrow_mut();
            state.sim_failed = true;
            (state.current.take(), state.queue.drain(..).collect())
        };
        if let Some(running) = running {
            self.record(
                &running.case.name,
                TestOutcome::Failed(sim_fail.clone()),
                self.sched.sim_time(TimeUnit::Ns) - running.start_sim_ns,
                running.start_real.elapsed(),
            );
        }
        for case in not_run {
            self.record(&case.name, TestOutcome::Failed(sim_fail.clone()), 0.0, Duration::ZERO);
        }
        self.sched.cancel_all_tasks();
        if let Err(e) = self.sched.event_loop() {
            error!("on_sim_failure(): {}", e);
        }
    }

    /// Wraps up after the simulator stopped and logs the summary. A test still running at this point never finished
    /// and is failed.
    pub fn finish(&self) -> Vec<TestResult> {
        let (running, not_run): (Option<RunningTest>, Vec<TestCase>) = {
            let mut state = self.state.borrow_mut();
            (state.current.take(), state.queue.drain(..).collect())
        };
        if let Some(running) = running {
            let fail: Fail = Fail::new(FailKind::SimFailure, "simulation ended before the test finished");
            self.record(
                &running.case.name,
                TestOutcome::Failed(fail),
                self.sched.sim_time(TimeUnit::Ns) - running.start_sim_ns,
                running.start_real.elapsed(),
            );
        }
        for case in not_run {
            let fail: Fail = Fail::new(FailKind::SimFailure, "simulation ended before the test started");
            self.record(&case.name, TestOutcome::Failed(fail), 0.0, Duration::ZERO);
        }
        self.sched.cancel_all_tasks();
        if let Err(e) = self.sched.event_loop() {
            error!("finish(): {}", e);
        }

        let results: Vec<TestResult> = self.results();
        log_summary(&results);
        results
    }

    pub fn results(&self) -> Vec<TestResult> {
        self.state.borrow().results.clone()
    }

    fn record(&self, name: &str, outcome: TestOutcome, sim_time_ns: f64, real_time: Duration) {
        self.state.borrow_mut().results.push(TestResult {
            name: name.to_string(),
            outcome,
            sim_time_ns,
            real_time,
        });
    }
}

fn log_summary(results: &[TestResult]) {
    let passed: usize = results.iter().filter(|r| r.outcome == TestOutcome::Passed).count();
    let skipped: usize = results.iter().filter(|r| r.outcome == TestOutcome::Skipped).count();
    let failed: usize = results.len() - passed - skipped;

    info!("{:<32} {:>6} {:>14} {:>10} {:>14}", "TEST", "STATUS", "SIM TIME (ns)", "REAL (s)", "RATIO (ns/s)");
    for result in results {
        let real: f64 = result.real_time.as_secs_f64();
        let ratio: f64 = if real > 0.0 { result.sim_time_ns / real } else { 0.0 };
        info!(
            "{:<32} {:>6} {:>14.2} {:>10.3} {:>14.2}",
            result.name, result.outcome, result.sim_time_ns, real, ratio
        );
    }
    info!("TESTS={} PASS={} FAIL={} SKIP={}", results.len(), passed, failed, skipped);
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

#[async_trait(?Send)]
impl<F, Fut> TestFunction for F
where
    F: Fn(TestContext) -> Fut,
    Fut: Future<Output = Result<(), Fail>> + 'static,
{
    async fn run(&self, ctx: TestContext) -> Result<(), Fail> {
        (self)(ctx).await
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => f.write_str("PASS"),
            TestOutcome::Failed(_) => f.write_str("FAIL"),
            TestOutcome::Skipped => f.write_str("SKIP"),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
