// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use crate::common::{
    trace,
    Bench,
    Trace,
};
use ::anyhow::Result;
use ::cosim::{
    ensure_eq,
    runtime::waiters::{
        self,
        UtilityMethods,
    },
    Awaitable,
    Combine,
    Fail,
    FailKind,
    First,
    Outcome,
    ReturnWhen,
    SharedScheduler,
    Task,
    TimeUnit,
    Trigger,
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    rc::Rc,
};

//==============================================================================
// Helpers
//==============================================================================

/// Coroutine that returns `value` after `ns` nanoseconds.
fn after(sched: &SharedScheduler, ns: f64, value: u32) -> Awaitable<u32> {
    let sched: SharedScheduler = sched.clone();
    Awaitable::coroutine(async move {
        sched.timer(ns, TimeUnit::Ns)?.await?;
        Ok::<u32, Fail>(value)
    })
}

/// Coroutine that fails after `ns` nanoseconds.
fn fail_after(sched: &SharedScheduler, ns: f64) -> Awaitable<u32> {
    let sched: SharedScheduler = sched.clone();
    Awaitable::coroutine(async move {
        sched.timer(ns, TimeUnit::Ns)?.await?;
        Err::<u32, Fail>(Fail::user("boom"))
    })
}

/// Coroutine that sets `flag` after `ns` nanoseconds.
fn flag_after(sched: &SharedScheduler, ns: f64, flag: &Rc<Cell<bool>>) -> Awaitable<()> {
    let sched: SharedScheduler = sched.clone();
    let flag: Rc<Cell<bool>> = flag.clone();
    Awaitable::coroutine(async move {
        sched.timer(ns, TimeUnit::Ns)?.await?;
        flag.set(true);
        Ok::<(), Fail>(())
    })
}

//==============================================================================
// Unit Tests
//==============================================================================

#[test]
fn first_completed_cancels_the_rest() -> Result<()> {
    let bench: Bench = Bench::new();
    let children: Rc<RefCell<Vec<Task<()>>>> = Rc::new(RefCell::new(Vec::new()));

    let sched: SharedScheduler = bench.sched.clone();
    let out: Rc<RefCell<Vec<Task<()>>>> = children.clone();
    bench.sched.start_soon("waiter", async move {
        let awaitables: Vec<Awaitable<()>> = vec![
            sched.timer(5.0, TimeUnit::Ns)?.into(),
            sched.timer(10.0, TimeUnit::Ns)?.into(),
            sched.timer(15.0, TimeUnit::Ns)?.into(),
        ];
        *out.borrow_mut() = waiters::wait(&sched, awaitables, ReturnWhen::FirstCompleted).await?;
        Ok::<(), Fail>(())
    });
    bench.run()?;

    let children = children.borrow();
    ensure_eq!(children.len(), 3);
    ensure_eq!(children[0].done() && !children[0].cancelled(), true);
    ensure_eq!(children[1].cancelled(), true);
    ensure_eq!(children[2].cancelled(), true);
    ensure_eq!(bench.now_ns(), 5.0);
    Ok(())
}

#[test]
fn first_exception_returns_on_the_first_failure() -> Result<()> {
    let bench: Bench = Bench::new();
    let children: Rc<RefCell<Vec<Task<u32>>>> = Rc::new(RefCell::new(Vec::new()));

    let sched: SharedScheduler = bench.sched.clone();
    let out: Rc<RefCell<Vec<Task<u32>>>> = children.clone();
    bench.sched.start_soon("waiter", async move {
        let awaitables: Vec<Awaitable<u32>> = vec![after(&sched, 5.0, 1), fail_after(&sched, 10.0), after(&sched, 50.0, 3)];
        *out.borrow_mut() = waiters::wait(&sched, awaitables, ReturnWhen::FirstException).await?;
        Ok::<(), Fail>(())
    });
    bench.run()?;

    let children = children.borrow();
    ensure_eq!(children[0].result()?, Some(1));
    ensure_eq!(children[1].result().map_err(|e| e.kind), Err(FailKind::User));
    ensure_eq!(children[2].cancelled(), true);
    ensure_eq!(bench.now_ns(), 10.0);
    Ok(())
}

#[test]
fn select_returns_the_earliest_finisher() -> Result<()> {
    let bench: Bench = Bench::new();
    let sched: SharedScheduler = bench.sched.clone();
    let task: Task<(usize, u32)> = bench.sched.start_soon("selector", async move {
        waiters::select(&sched, vec![after(&sched, 20.0, 1), after(&sched, 10.0, 2), after(&sched, 30.0, 3)]).await
    });
    bench.run()?;

    ensure_eq!(task.result()?, Some((1, 2)));
    ensure_eq!(bench.now_ns(), 10.0);
    Ok(())
}

#[test]
fn select_follows_completion_order_within_a_pass() -> Result<()> {
    let bench: Bench = Bench::new();
    let order: Trace<u32> = trace();

    let sched: SharedScheduler = bench.sched.clone();
    let finished: Trace<u32> = order.clone();
    let task: Task<(usize, u32)> = bench.sched.start_soon("selector", async move {
        let yielding: Trace<u32> = finished.clone();
        let slower: Awaitable<u32> = Awaitable::coroutine(async move {
            Trigger::null().await?;
            yielding.borrow_mut().push(0);
            Ok::<u32, Fail>(0)
        });
        let immediate: Trace<u32> = finished.clone();
        let faster: Awaitable<u32> = Awaitable::coroutine(async move {
            immediate.borrow_mut().push(1);
            Ok::<u32, Fail>(1)
        });
        waiters::select(&sched, vec![slower, faster]).await
    });
    bench.run()?;

    ensure_eq!(*order.borrow(), vec![1, 0]);
    ensure_eq!(task.result()?, Some((1, 1)));
    ensure_eq!(bench.sim.now(), 0);
    Ok(())
}

#[test]
fn select_reports_a_failing_winner() -> Result<()> {
    let bench: Bench = Bench::new();
    let sched: SharedScheduler = bench.sched.clone();
    let task: Task<bool> = bench.sched.start_soon("selector", async move {
        let (i, outcome): (usize, Outcome<u32>) =
            waiters::select_outcome(&sched, vec![after(&sched, 20.0, 1), fail_after(&sched, 10.0)]).await?;
        Ok::<bool, Fail>(i == 1 && outcome.is_error())
    });
    bench.run()?;

    ensure_eq!(task.result()?, Some(true));
    Ok(())
}

#[test]
fn select_needs_an_awaitable() -> Result<()> {
    let bench: Bench = Bench::new();
    let sched: SharedScheduler = bench.sched.clone();
    let task: Task<(usize, u32)> = bench.sched.start_soon("selector", async move {
        waiters::select::<u32>(&sched, Vec::new()).await
    });
    bench.run()?;

    ensure_eq!(task.result().map_err(|e| e.kind), Err(FailKind::Usage));
    Ok(())
}

#[test]
fn gather_keeps_input_order() -> Result<()> {
    let bench: Bench = Bench::new();
    let sched: SharedScheduler = bench.sched.clone();
    let task: Task<Vec<u32>> = bench.sched.start_soon("gatherer", async move {
        waiters::gather(&sched, vec![after(&sched, 30.0, 1), after(&sched, 10.0, 2), after(&sched, 20.0, 3)]).await
    });
    bench.run()?;

    ensure_eq!(task.result()?, Some(vec![1, 2, 3]));
    ensure_eq!(bench.now_ns(), 30.0);
    Ok(())
}

#[test]
fn gather_outcomes_waits_for_every_child() -> Result<()> {
    let bench: Bench = Bench::new();
    let sched: SharedScheduler = bench.sched.clone();
    let task: Task<Vec<bool>> = bench.sched.start_soon("gatherer", async move {
        let outcomes: Vec<Outcome<u32>> =
            waiters::gather_outcomes(&sched, vec![fail_after(&sched, 5.0), after(&sched, 20.0, 7)]).await?;
        Ok::<Vec<bool>, Fail>(outcomes.iter().map(Outcome::is_error).collect())
    });
    bench.run()?;

    ensure_eq!(task.result()?, Some(vec![true, false]));
    ensure_eq!(bench.now_ns(), 20.0);
    Ok(())
}

#[test]
fn combine_failure_cancels_siblings() -> Result<()> {
    let bench: Bench = Bench::new();
    let sibling_finished: Rc<Cell<bool>> = Rc::new(Cell::new(false));

    let sched: SharedScheduler = bench.sched.clone();
    let flag: Rc<Cell<bool>> = sibling_finished.clone();
    let task: Task<()> = bench.sched.start_soon("combiner", async move {
        let failing: Awaitable<()> = {
            let sched: SharedScheduler = sched.clone();
            Awaitable::coroutine(async move {
                sched.timer(5.0, TimeUnit::Ns)?.await?;
                Err::<(), Fail>(Fail::user("boom"))
            })
        };
        Combine::new(&sched, vec![flag_after(&sched, 10.0, &flag), failing]).await
    });
    bench.run()?;

    ensure_eq!(task.result().map_err(|e| e.kind), Err(FailKind::User));
    ensure_eq!(sibling_finished.get(), false);
    ensure_eq!(bench.now_ns(), 5.0);
    Ok(())
}

#[test]
fn first_resolves_to_the_winning_value() -> Result<()> {
    let bench: Bench = Bench::new();
    let sched: SharedScheduler = bench.sched.clone();
    let task: Task<u32> = bench.sched.start_soon("first", async move {
        First::new(&sched, vec![after(&sched, 20.0, 1), after(&sched, 5.0, 2)]).await
    });
    bench.run()?;

    ensure_eq!(task.result()?, Some(2));
    ensure_eq!(bench.now_ns(), 5.0);
    Ok(())
}

#[test]
fn with_timeout_fails_when_the_timer_wins() -> Result<()> {
    let bench: Bench = Bench::new();
    let kinds: Trace<FailKind> = trace();

    let sched: SharedScheduler = bench.sched.clone();
    let recorded: Trace<FailKind> = kinds.clone();
    let task: Task<()> = bench.sched.start_soon("bounded", async move {
        let inner: SharedScheduler = sched.clone();
        let slow: Awaitable<()> = Awaitable::coroutine(async move {
            let result: Result<(), Fail> = inner.timer(1000.0, TimeUnit::Ns)?.await;
            if let Err(e) = &result {
                recorded.borrow_mut().push(e.kind);
            }
            result
        });
        waiters::with_timeout(&sched, slow, 100.0, TimeUnit::Ns).await
    });
    bench.run()?;

    let e: Fail = match task.result() {
        Err(e) => e,
        Ok(r) => anyhow::bail!("expected a timeout, got {:?}", r),
    };
    ensure_eq!(e.kind, FailKind::Timeout);
    ensure_eq!(*kinds.borrow(), vec![FailKind::Cancelled]);
    ensure_eq!(bench.now_ns(), 100.0);
    ensure_eq!(bench.sched.num_tasks(), 0);
    ensure_eq!(bench.sim.pending_callbacks(), 0);
    Ok(())
}

#[test]
fn with_timeout_passes_through_a_fast_result() -> Result<()> {
    let bench: Bench = Bench::new();
    let sched: SharedScheduler = bench.sched.clone();
    let task: Task<u32> = bench.sched.start_soon("bounded", async move {
        let fast: Awaitable<u32> = after(&sched, 10.0, 9);
        waiters::with_timeout(&sched, fast, 100.0, TimeUnit::Ns).await
    });
    bench.run()?;

    ensure_eq!(task.result()?, Some(9));
    ensure_eq!(bench.now_ns(), 10.0);
    ensure_eq!(bench.sim.pending_callbacks(), 0);
    Ok(())
}

#[test]
fn with_timeout_leaves_an_existing_task_running() -> Result<()> {
    let bench: Bench = Bench::new();
    let finished: Rc<Cell<bool>> = Rc::new(Cell::new(false));

    let sched: SharedScheduler = bench.sched.clone();
    let flag: Rc<Cell<bool>> = finished.clone();
    let worker: Task<()> = bench.sched.start_soon("worker", async move {
        sched.timer(50.0, TimeUnit::Ns)?.await?;
        flag.set(true);
        Ok::<(), Fail>(())
    });

    let kinds: Trace<FailKind> = trace();
    let sched: SharedScheduler = bench.sched.clone();
    let recorded: Trace<FailKind> = kinds.clone();
    let joined: Task<()> = worker.clone();
    bench.sched.start_soon("bounded", async move {
        if let Err(e) = waiters::with_timeout(&sched, Awaitable::Task(joined), 10.0, TimeUnit::Ns).await {
            recorded.borrow_mut().push(e.kind);
        }
        Ok::<(), Fail>(())
    });
    bench.run()?;

    ensure_eq!(*kinds.borrow(), vec![FailKind::Timeout]);
    ensure_eq!(worker.done(), true);
    ensure_eq!(worker.cancelled(), false);
    ensure_eq!(finished.get(), true);
    ensure_eq!(bench.now_ns(), 50.0);
    Ok(())
}

#[test]
fn futures_can_be_bounded_in_place() -> Result<()> {
    let bench: Bench = Bench::new();
    let sched: SharedScheduler = bench.sched.clone();
    let task: Task<u32> = bench.sched.start_soon("bounded", async move {
        let timer_sched: SharedScheduler = sched.clone();
        let slow = async move {
            timer_sched.timer(500.0, TimeUnit::Ns)?.await?;
            Ok::<u32, Fail>(1)
        };
        slow.with_timeout(&sched, 50.0, TimeUnit::Ns).await
    });
    bench.run()?;

    ensure_eq!(task.result().map_err(|e| e.kind), Err(FailKind::Timeout));
    ensure_eq!(bench.now_ns(), 50.0);
    Ok(())
}

#[test]
fn cancelling_the_waiter_cancels_its_children() -> Result<()> {
    let bench: Bench = Bench::new();
    let finished: Rc<Cell<bool>> = Rc::new(Cell::new(false));

    let sched: SharedScheduler = bench.sched.clone();
    let flag: Rc<Cell<bool>> = finished.clone();
    let waiter: Task<Vec<()>> = bench.sched.start_soon("waiter", async move {
        waiters::gather(&sched, vec![flag_after(&sched, 10.0, &flag), flag_after(&sched, 20.0, &flag)]).await
    });
    bench.sched.event_loop()?;
    waiter.cancel(None);
    bench.run()?;

    ensure_eq!(waiter.cancelled(), true);
    ensure_eq!(finished.get(), false);
    ensure_eq!(bench.sched.num_tasks(), 0);
    ensure_eq!(bench.sim.now(), 0);
    Ok(())
}
