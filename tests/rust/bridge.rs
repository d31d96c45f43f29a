// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use crate::common::Bench;
use ::anyhow::Result;
use ::cosim::{
    bridge,
    ensure_eq,
    BridgeContext,
    Fail,
    FailKind,
    SharedScheduler,
    Task,
    TimeUnit,
};
use ::std::thread;

//==============================================================================
// Unit Tests
//==============================================================================

#[test]
fn bridged_function_result_is_returned_to_the_task() -> Result<()> {
    let bench: Bench = Bench::new();
    let sched: SharedScheduler = bench.sched.clone();
    let task: Task<(u32, bool)> = bench.sched.start_soon("caller", async move {
        let caller: thread::ThreadId = thread::current().id();
        bridge(&sched, "adder", move |_: &BridgeContext| Ok((2 + 3, thread::current().id() != caller))).await
    });
    bench.run()?;

    ensure_eq!(task.result()?, Some((5, true)));
    ensure_eq!(bench.sim.now(), 0);
    Ok(())
}

#[test]
fn bridged_function_can_wait_on_simulation_time() -> Result<()> {
    let bench: Bench = Bench::new();
    let sched: SharedScheduler = bench.sched.clone();
    let task: Task<Vec<u64>> = bench.sched.start_soon("caller", async move {
        bridge(&sched, "sleeper", |ctx: &BridgeContext| {
            let mut times: Vec<u64> = Vec::new();
            for _ in 0..2 {
                let now: u64 = ctx.resume(|sched: SharedScheduler| async move {
                    sched.timer(10.0, TimeUnit::Ns)?.await?;
                    Ok::<u64, Fail>(sched.sim_steps())
                })?;
                times.push(now);
            }
            Ok(times)
        })
        .await
    });
    bench.run()?;

    ensure_eq!(task.result()?, Some(vec![10_000, 20_000]));
    ensure_eq!(bench.now_ns(), 20.0);
    Ok(())
}

#[test]
fn failure_of_a_resumed_coroutine_reaches_the_thread() -> Result<()> {
    let bench: Bench = Bench::new();
    let sched: SharedScheduler = bench.sched.clone();
    let task: Task<FailKind> = bench.sched.start_soon("caller", async move {
        bridge(&sched, "checker", |ctx: &BridgeContext| {
            let result: Result<(), Fail> = ctx.resume(|sched: SharedScheduler| async move {
                sched.timer(1.0, TimeUnit::Ns)?.await?;
                Err::<(), Fail>(Fail::user("bad value"))
            });
            match result {
                Err(e) => Ok(e.kind),
                Ok(()) => Err(Fail::user("resume did not fail")),
            }
        })
        .await
    });
    bench.run()?;

    ensure_eq!(task.result()?, Some(FailKind::User));
    Ok(())
}

#[test]
fn bridged_function_failure_is_raised_in_the_task() -> Result<()> {
    let bench: Bench = Bench::new();
    let sched: SharedScheduler = bench.sched.clone();
    let task: Task<u32> = bench.sched.start_soon("caller", async move {
        bridge(&sched, "refuser", |_: &BridgeContext| Err::<u32, Fail>(Fail::user("no"))).await
    });
    bench.run()?;

    ensure_eq!(task.result().map_err(|e| e.kind), Err(FailKind::User));
    Ok(())
}

#[test]
fn panic_in_the_bridged_function_becomes_a_failure() -> Result<()> {
    let bench: Bench = Bench::new();
    let sched: SharedScheduler = bench.sched.clone();
    let task: Task<u32> = bench.sched.start_soon("caller", async move {
        bridge(&sched, "panicker", |_: &BridgeContext| -> Result<u32, Fail> { panic!("bridge exploded") }).await
    });
    bench.run()?;

    let e: Fail = match task.result() {
        Err(e) => e,
        Ok(r) => anyhow::bail!("expected a failure, got {:?}", r),
    };
    ensure_eq!(e.kind, FailKind::User);
    ensure_eq!(e.cause.contains("bridge exploded"), true);
    Ok(())
}

#[test]
fn concurrent_tasks_keep_running_while_a_thread_waits() -> Result<()> {
    let bench: Bench = Bench::new();

    let sched: SharedScheduler = bench.sched.clone();
    let bridged: Task<u64> = bench.sched.start_soon("bridged", async move {
        bridge(&sched, "slow", |ctx: &BridgeContext| {
            ctx.resume(|sched: SharedScheduler| async move {
                sched.timer(30.0, TimeUnit::Ns)?.await?;
                Ok::<u64, Fail>(sched.sim_steps())
            })
        })
        .await
    });
    let sched: SharedScheduler = bench.sched.clone();
    let ticker: Task<u64> = bench.sched.start_soon("ticker", async move {
        let mut ticks: u64 = 0;
        for _ in 0..5 {
            sched.timer(5.0, TimeUnit::Ns)?.await?;
            ticks += 1;
        }
        Ok::<u64, Fail>(ticks)
    });
    bench.run()?;

    ensure_eq!(bridged.result()?, Some(30_000));
    ensure_eq!(ticker.result()?, Some(5));
    ensure_eq!(bench.now_ns(), 30.0);
    Ok(())
}
