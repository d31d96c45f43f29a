// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![deny(clippy::all)]

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::clap::{
    Arg,
    ArgMatches,
    Command,
};
use ::cosim::{
    runtime::{
        logging,
        triggers::clock::clock_cycles,
    },
    Clock,
    Config,
    Edge,
    Event,
    Fail,
    FailKind,
    RegressionManager,
    SharedEventSimulator,
    SharedScheduler,
    SignalId,
    TestCase,
    TestContext,
    TestOutcome,
    TestResult,
    TimeUnit,
    Trigger,
};
use ::log::info;
use ::rand::Rng;
use ::std::rc::Rc;

//======================================================================================================================
// Constants
//======================================================================================================================

const CLOCK_PERIOD_NS: f64 = 10.0;

/// Width mask of the counter register.
const COUNTER_MASK: u64 = 0xff;

#[derive(Debug)]
pub struct ProgramArguments {
    config_path: Option<String>,
    log_spec: Option<String>,
    max_time_ns: Option<u64>,
}

impl ProgramArguments {
    pub fn new() -> Result<Self> {
        let matches: ArgMatches = Command::new("counter-regression")
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("PATH")
                    .help("Sets the YAML configuration file"),
            )
            .arg(
                Arg::new("log")
                    .long("log")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("SPEC")
                    .help("Sets the log specification"),
            )
            .arg(
                Arg::new("max-time")
                    .long("max-time")
                    .value_parser(clap::value_parser!(u64))
                    .required(false)
                    .value_name("NANOSECONDS")
                    .help("Stops the simulation after this much simulated time"),
            )
            .get_matches();

        Ok(Self {
            config_path: matches.get_one::<String>("config").cloned(),
            log_spec: matches.get_one::<String>("log").cloned(),
            max_time_ns: matches.get_one::<u64>("max-time").copied(),
        })
    }

    pub fn get_config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }

    pub fn get_log_spec(&self) -> Option<&str> {
        self.log_spec.as_deref()
    }

    pub fn get_max_time_ns(&self) -> Option<u64> {
        self.max_time_ns
    }
}

//======================================================================================================================
// Design
//======================================================================================================================

/// Signals of the counter design.
#[derive(Clone, Copy, Debug)]
struct Design {
    clk: SignalId,
    rst: SignalId,
    count: SignalId,
}

impl Design {
    fn new(sim: &SharedEventSimulator) -> Self {
        Self {
            clk: sim.add_signal("clk", 0),
            rst: sim.add_signal("rst", 1),
            count: sim.add_signal("count", 0),
        }
    }

    /// Starts the clock and the counter model. Both are torn down with the test that started them.
    fn bring_up(&self, sched: &SharedScheduler) -> Result<(), Fail> {
        Clock::new(sched, self.clk, CLOCK_PERIOD_NS, TimeUnit::Ns)?.start(sched);
        sched.start_soon("counter", counter_model(sched.clone(), *self));
        Ok(())
    }
}

/// Synchronous counter with an active-high reset.
async fn counter_model(sched: SharedScheduler, design: Design) -> Result<(), Fail> {
    let rising: Trigger = Trigger::rising_edge(design.clk);
    loop {
        rising.clone().await?;
        let next: u64 = if sched.read(design.rst)? & 1 == 1 {
            0
        } else {
            (sched.read(design.count)? + 1) & COUNTER_MASK
        };
        sched.write(design.count, next)?;
    }
}

/// Reads the counter once the current time step has settled.
async fn sample(sched: &SharedScheduler, design: Design) -> Result<u64, Fail> {
    sched.read_only().await?;
    sched.read(design.count)
}

//======================================================================================================================
// Tests
//======================================================================================================================

async fn reset_holds_counter(ctx: TestContext, design: Design) -> Result<(), Fail> {
    design.bring_up(&ctx.sched)?;
    clock_cycles(design.clk, 5, Edge::Rising).await?;
    match sample(&ctx.sched, design).await? {
        0 => Ok(()),
        count => Err(Fail::user(&format!("counter is {} while in reset", count))),
    }
}

async fn counter_follows_clock(ctx: TestContext, design: Design) -> Result<(), Fail> {
    let cycles: u64 = ctx.rng().gen_range(4..64);
    design.bring_up(&ctx.sched)?;
    clock_cycles(design.clk, 2, Edge::Rising).await?;
    ctx.sched.write(design.rst, 0)?;

    clock_cycles(design.clk, 1, Edge::Rising).await?;
    let first: u64 = sample(&ctx.sched, design).await?;
    clock_cycles(design.clk, cycles as u32, Edge::Rising).await?;
    let last: u64 = sample(&ctx.sched, design).await?;

    let expected: u64 = (first + cycles) & COUNTER_MASK;
    if last != expected {
        let cause: String = format!("counter is {} after {} cycles, expected {}", last, cycles, expected);
        return Err(Fail::user(&cause));
    }
    info!("counter_follows_clock(): {} cycles checked", cycles);
    Ok(())
}

async fn counter_wraps(ctx: TestContext, design: Design) -> Result<(), Fail> {
    design.bring_up(&ctx.sched)?;
    ctx.sched.write(design.rst, 0)?;
    let changed: Trigger = Trigger::value_change(design.count);
    let mut previous: u64 = ctx.sched.read(design.count)?;
    loop {
        changed.clone().await?;
        let count: u64 = ctx.sched.read(design.count)?;
        if count == 0 {
            break;
        }
        if count != previous + 1 {
            return Err(Fail::user(&format!("counter jumped from {} to {}", previous, count)));
        }
        previous = count;
    }
    match previous {
        COUNTER_MASK => Ok(()),
        _ => Err(Fail::user(&format!("counter wrapped from {}", previous))),
    }
}

async fn waits_forever(_: TestContext) -> Result<(), Fail> {
    Event::new("never set").wait().await
}

//======================================================================================================================
// Main
//======================================================================================================================

fn main() -> Result<()> {
    let args: ProgramArguments = ProgramArguments::new()?;
    let config: Config = match args.get_config_path() {
        Some(path) => Config::new(path)?,
        None => Config::default(),
    };
    let log_spec: String = match args.get_log_spec() {
        Some(spec) => spec.to_string(),
        None => config.log_level()?.unwrap_or_else(|| "info".to_string()),
    };
    logging::initialize(&log_spec);

    let sim: SharedEventSimulator = SharedEventSimulator::new(config.time_precision()?);
    let sched: SharedScheduler = SharedScheduler::with_round_mode(Rc::new(sim.clone()), config.timer_round_mode()?);
    let design: Design = Design::new(&sim);

    let manager: RegressionManager = RegressionManager::new(&sched, &config)?;
    manager.add_test(TestCase::new("reset_holds_counter", move |ctx: TestContext| {
        reset_holds_counter(ctx, design)
    }));
    manager.add_test(TestCase::new("counter_follows_clock", move |ctx: TestContext| {
        counter_follows_clock(ctx, design)
    }));
    manager.add_test(
        TestCase::new("counter_wraps", move |ctx: TestContext| counter_wraps(ctx, design)).timeout(5.0, TimeUnit::Us),
    );
    manager.add_test(
        TestCase::new("waits_forever", waits_forever)
            .timeout(100.0, TimeUnit::Ns)
            .expect_error(FailKind::Timeout),
    );

    manager.start()?;
    let until: Option<u64> = match args.get_max_time_ns() {
        Some(ns) => Some(cosim::runtime::time::get_sim_steps(
            ns as f64,
            TimeUnit::Ns,
            config.time_precision()?,
            Default::default(),
        )?),
        None => None,
    };
    if let Err(e) = sim.run(until) {
        println!("ERROR: simulation failed (error={:?})", e);
    }

    let results: Vec<TestResult> = manager.finish();
    let failed: usize = results
        .iter()
        .filter(|result| matches!(result.outcome, TestOutcome::Failed(_)))
        .count();
    if failed > 0 {
        anyhow::bail!("{} of {} test(s) failed", failed, results.len());
    }
    Ok(())
}
