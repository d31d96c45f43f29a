// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Waiting on several awaitables at once.
//!
//! Every input is run as a child task. The caller suspends on an [Event] that completion callbacks on the children set
//! once the requested completion condition holds. Children still running at that point are cancelled, and so are all
//! of them if the caller itself is cancelled while waiting.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::{
        Fail,
        FailKind,
    },
    outcome::Outcome,
    scheduler::{
        RawTask,
        SharedScheduler,
        Task,
    },
    time::TimeUnit,
    triggers::{
        event::Event,
        Trigger,
    },
};
use ::async_trait::async_trait;
use ::futures::future::LocalBoxFuture;
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    future::{
        Future,
        IntoFuture,
    },
    rc::{
        Rc,
        Weak,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// When an aggregate wait returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnWhen {
    /// As soon as any child finishes.
    FirstCompleted,
    /// As soon as any child fails, or when all have finished.
    FirstException,
    /// When every child has finished.
    AllCompleted,
}

/// Something that can take part in an aggregate wait.
pub enum Awaitable<T> {
    /// An existing task. It is joined, not taken over: cancelling the wait leaves it running.
    Task(Task<T>),
    /// A coroutine run as a new child task.
    Coroutine(LocalBoxFuture<'static, Result<T, Fail>>),
}

/// Waits for all of its awaitables. The first failure cancels the rest and is returned.
pub struct Combine {
    sched: SharedScheduler,
    awaitables: Vec<Awaitable<()>>,
}

/// Waits for the first of its awaitables and returns its result. The rest are cancelled.
pub struct First<T> {
    sched: SharedScheduler,
    awaitables: Vec<Awaitable<T>>,
}

/// Children of an aggregate wait. Cancelling them happens at most once.
struct Children {
    tasks: Vec<Rc<dyn RawTask>>,
    cancelled: Cell<bool>,
}

//======================================================================================================================
// Traits
//======================================================================================================================

#[async_trait(?Send)]
pub trait UtilityMethods<T: Clone + 'static>: Future<Output = Result<T, Fail>> + Sized + 'static {
    /// Transforms our current future to include a timeout. We either return the results of the future finishing or a
    /// Timeout error. Whichever happens first.
    async fn with_timeout(self, sched: &SharedScheduler, time: f64, unit: TimeUnit) -> Result<T, Fail> {
        with_timeout(sched, Awaitable::coroutine(self), time, unit).await
    }
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T: 'static> Awaitable<T> {
    pub fn coroutine<F: Future<Output = Result<T, Fail>> + 'static>(coroutine: F) -> Self {
        Awaitable::Coroutine(Box::pin(coroutine))
    }
}

impl Combine {
    pub fn new(sched: &SharedScheduler, awaitables: Vec<Awaitable<()>>) -> Self {
        Self {
            sched: sched.clone(),
            awaitables,
        }
    }
}

impl<T: Clone + 'static> First<T> {
    pub fn new(sched: &SharedScheduler, awaitables: Vec<Awaitable<T>>) -> Self {
        Self {
            sched: sched.clone(),
            awaitables,
        }
    }
}

impl Children {
    fn new(tasks: Vec<Rc<dyn RawTask>>) -> Self {
        Self {
            tasks,
            cancelled: Cell::new(false),
        }
    }

    fn cancel_remaining(&self, sched: &SharedScheduler) {
        if self.cancelled.replace(true) {
            return;
        }
        for task in &self.tasks {
            if !task.is_done() {
                sched.cancel_task(task.clone(), Some("aggregate wait finished"));
            }
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn spawn_child<T: Clone + 'static>(sched: &SharedScheduler, name: &str, awaitable: Awaitable<T>) -> Task<T> {
    match awaitable {
        Awaitable::Task(task) => {
            let name: String = format!("{} (join {})", name, task.name());
            sched.start_soon(&name, async move { task.join().await })
        },
        Awaitable::Coroutine(coroutine) => sched.start_soon(name, coroutine),
    }
}

/// Suspends until `children` satisfy `return_when`, then cancels the ones still running. Returns the indices of the
/// children in the order they finished.
async fn wait_tasks(
    sched: &SharedScheduler,
    children: Vec<Rc<dyn RawTask>>,
    return_when: ReturnWhen,
) -> Result<Vec<usize>, Fail> {
    if children.is_empty() {
        return Ok(Vec::new());
    }

    let done: Event = Event::new("aggregate wait");
    let remaining: Rc<Cell<usize>> = Rc::new(Cell::new(children.len()));
    let finish_order: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::with_capacity(children.len())));
    for (i, child) in children.iter().enumerate() {
        let done: Event = done.clone();
        let remaining: Rc<Cell<usize>> = remaining.clone();
        let finish_order: Rc<RefCell<Vec<usize>>> = finish_order.clone();
        let watched: Weak<dyn RawTask> = Rc::downgrade(child);
        child.add_done_callback(Box::new(move || {
            finish_order.borrow_mut().push(i);
            remaining.set(remaining.get() - 1);
            let failed: bool = watched.upgrade().map(|task| task.has_error()).unwrap_or(false);
            let finished: bool = match return_when {
                ReturnWhen::FirstCompleted => true,
                ReturnWhen::FirstException => failed || remaining.get() == 0,
                ReturnWhen::AllCompleted => remaining.get() == 0,
            };
            if finished {
                done.set();
            }
        }));
    }

    let children: Children = Children::new(children);
    let result: Result<(), Fail> = done.wait().await;
    children.cancel_remaining(sched);
    result?;
    let finish_order: Vec<usize> = finish_order.borrow().clone();
    Ok(finish_order)
}

/// Spawns the children of an aggregate wait and waits on them. Returns the children and the order they finished in.
async fn wait_children<T: Clone + 'static>(
    sched: &SharedScheduler,
    awaitables: Vec<Awaitable<T>>,
    return_when: ReturnWhen,
) -> Result<(Vec<Task<T>>, Vec<usize>), Fail> {
    let children: Vec<Task<T>> = awaitables
        .into_iter()
        .enumerate()
        .map(|(i, awaitable)| spawn_child(sched, &format!("wait[{}]", i), awaitable))
        .collect();
    let finish_order: Vec<usize> = wait_tasks(sched, children.iter().map(Task::raw).collect(), return_when).await?;
    Ok((children, finish_order))
}

/// Runs every awaitable as a child task and returns the children once `return_when` holds. Children still running are
/// cancelled before this returns.
pub async fn wait<T: Clone + 'static>(
    sched: &SharedScheduler,
    awaitables: Vec<Awaitable<T>>,
    return_when: ReturnWhen,
) -> Result<Vec<Task<T>>, Fail> {
    let (children, _): (Vec<Task<T>>, Vec<usize>) = wait_children(sched, awaitables, return_when).await?;
    Ok(children)
}

/// Returns the index and outcome of the first awaitable to finish. Awaitables that finish in the same scheduler pass
/// are ordered by when they finished, not by their position.
pub async fn select_outcome<T: Clone + 'static>(
    sched: &SharedScheduler,
    awaitables: Vec<Awaitable<T>>,
) -> Result<(usize, Outcome<T>), Fail> {
    if awaitables.is_empty() {
        return Err(Fail::new(FailKind::Usage, "select() needs at least one awaitable"));
    }
    let (children, finish_order): (Vec<Task<T>>, Vec<usize>) =
        wait_children(sched, awaitables, ReturnWhen::FirstCompleted).await?;
    match finish_order.first() {
        Some(&winner) => Ok((winner, Outcome::capture(child_value(&children[winner])))),
        None => Err(Fail::new(FailKind::Internal, "select() woke up without a finished awaitable")),
    }
}

/// Returns the index and value of the first awaitable to finish, or its failure.
pub async fn select<T: Clone + 'static>(
    sched: &SharedScheduler,
    awaitables: Vec<Awaitable<T>>,
) -> Result<(usize, T), Fail> {
    let (i, outcome): (usize, Outcome<T>) = select_outcome(sched, awaitables).await?;
    Ok((i, outcome.get()?))
}

/// Waits for every awaitable and returns their values in input order. The first failure cancels the rest and is
/// returned instead.
pub async fn gather<T: Clone + 'static>(
    sched: &SharedScheduler,
    awaitables: Vec<Awaitable<T>>,
) -> Result<Vec<T>, Fail> {
    let (children, finish_order): (Vec<Task<T>>, Vec<usize>) =
        wait_children(sched, awaitables, ReturnWhen::FirstException).await?;
    if let Some(e) = finish_order.iter().find_map(|&i| children[i].result().err()) {
        return Err(e);
    }
    children.iter().map(child_value).collect()
}

/// Waits for every awaitable and returns all outcomes in input order.
pub async fn gather_outcomes<T: Clone + 'static>(
    sched: &SharedScheduler,
    awaitables: Vec<Awaitable<T>>,
) -> Result<Vec<Outcome<T>>, Fail> {
    let children: Vec<Task<T>> = wait(sched, awaitables, ReturnWhen::AllCompleted).await?;
    Ok(children.iter().map(|child| Outcome::capture(child_value(child))).collect())
}

fn child_value<T: Clone + 'static>(child: &Task<T>) -> Result<T, Fail> {
    match child.result()? {
        Some(value) => Ok(value),
        None => {
            let cause: String = format!("task {} was cancelled before it started", child.name());
            Err(Fail::new(FailKind::InvalidState, &cause))
        },
    }
}

/// Races `awaitable` against a timer. Fails with [FailKind::Timeout] if the timer wins; the awaitable is cancelled.
pub async fn with_timeout<T: Clone + 'static>(
    sched: &SharedScheduler,
    awaitable: Awaitable<T>,
    time: f64,
    unit: TimeUnit,
) -> Result<T, Fail> {
    let timer: Trigger = sched.timer(time, unit)?;
    let work: Task<T> = spawn_child(sched, "with_timeout", awaitable);
    let timeout: Task<()> = sched.start_soon("with_timeout timer", async move { timer.await });
    let finish_order: Vec<usize> =
        wait_tasks(sched, vec![work.raw(), timeout.raw()], ReturnWhen::FirstCompleted).await?;

    if finish_order.first() == Some(&0) {
        return child_value(&work);
    }
    let cause: String = format!("timed out after {} {}", time, unit);
    debug!("with_timeout(): {}", cause);
    Err(Fail::new(FailKind::Timeout, &cause))
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<Trigger> for Awaitable<()> {
    fn from(trigger: Trigger) -> Self {
        Awaitable::coroutine(async move { trigger.await })
    }
}

impl<T> From<Task<T>> for Awaitable<T> {
    fn from(task: Task<T>) -> Self {
        Awaitable::Task(task)
    }
}

impl IntoFuture for Combine {
    type IntoFuture = LocalBoxFuture<'static, Result<(), Fail>>;
    type Output = Result<(), Fail>;

    fn into_future(self) -> Self::IntoFuture {
        let Combine { sched, awaitables } = self;
        Box::pin(async move { gather(&sched, awaitables).await.map(|_| ()) })
    }
}

impl<T: Clone + 'static> IntoFuture for First<T> {
    type IntoFuture = LocalBoxFuture<'static, Result<T, Fail>>;
    type Output = Result<T, Fail>;

    fn into_future(self) -> Self::IntoFuture {
        let First { sched, awaitables } = self;
        Box::pin(async move { select(&sched, awaitables).await.map(|(_, value)| value) })
    }
}

// Implement UtilityMethods for any coroutine that returns a result.
impl<T: Clone + 'static, F> UtilityMethods<T> for F where F: Future<Output = Result<T, Fail>> + 'static {}
