// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::{
        Fail,
        FailKind,
    },
    outcome::Outcome,
    scheduler::{
        scheduler::{
            Scheduler,
            SharedScheduler,
        },
        yielder::{
            YieldReport,
            Yielder,
        },
    },
    triggers::Trigger,
};
use ::futures::task::noop_waker_ref;
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    fmt,
    future::Future,
    mem,
    panic::{
        self,
        AssertUnwindSafe,
    },
    pin::Pin,
    rc::{
        Rc,
        Weak,
    },
    task::{
        Context,
        Poll,
    },
};

//==============================================================================
// Structures
//==============================================================================

/// Externally visible task identifier.
#[derive(Clone, Copy, Hash, PartialEq, Eq, Debug, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// Underlying coroutine of a task.
pub type Coroutine<T> = Pin<Box<dyn Future<Output = Result<T, Fail>>>>;

/// Callback run once when a task finishes.
pub type DoneCallback = Box<dyn FnOnce()>;

/// Result of advancing a task by one step.
pub(crate) enum Step {
    /// The task suspended on a trigger.
    Yielded(Trigger),
    /// The task finished and its outcome is recorded.
    Finished,
    /// The task suspended on something the scheduler cannot wait on.
    Invalid(Fail),
}

struct TaskState<T> {
    started: bool,
    outcome: Option<Outcome<T>>,
    /// Cancelled before it ever ran. Done, but without an outcome.
    abandoned: bool,
    /// Trigger the task is currently registered on.
    trigger: Option<Trigger>,
    cancel_requested: Option<Fail>,
    cancel_delivered: bool,
    /// Slot in the scheduler's task table.
    slot: Option<usize>,
}

pub(crate) struct TaskInner<T> {
    id: TaskId,
    name: String,
    coroutine: RefCell<Option<Coroutine<T>>>,
    state: RefCell<TaskState<T>>,
    finished: Rc<Cell<bool>>,
    join: Trigger,
    done_callbacks: RefCell<Vec<DoneCallback>>,
    scheduler: Weak<RefCell<Scheduler>>,
}

/// Handle to a coroutine scheduled on a [SharedScheduler]. The coroutine's result is stored for later retrieval.
pub struct Task<T>(Rc<TaskInner<T>>);

//==============================================================================
// Traits
//==============================================================================

/// Type-erased view of a task used by the scheduler.
pub(crate) trait RawTask {
    fn id(&self) -> TaskId;
    fn name(&self) -> &str;
    /// Polls the coroutine once, resuming it with `outcome`.
    fn advance(&self, outcome: Outcome<()>) -> Step;
    /// Finishes the task with `fail` without running it further.
    fn abort(&self, fail: Fail);
    /// Finishes a task that never started, leaving it without an outcome.
    fn abandon(&self);
    fn is_started(&self) -> bool;
    fn is_done(&self) -> bool;
    fn is_cancelled(&self) -> bool;
    /// Finished with a failure other than its own cancellation.
    fn has_error(&self) -> bool;
    fn trigger(&self) -> Option<Trigger>;
    fn set_trigger(&self, trigger: Option<Trigger>);
    /// Records a cancellation request. Returns false if one was already recorded.
    fn request_cancel(&self, cancel: Fail) -> bool;
    fn cancel_requested(&self) -> Option<Fail>;
    fn cancel_delivered(&self) -> bool;
    fn mark_cancel_delivered(&self);
    fn join_trigger(&self) -> Trigger;
    fn mark_finished(&self);
    fn add_done_callback(&self, callback: DoneCallback);
    fn take_done_callbacks(&self) -> Vec<DoneCallback>;
    fn slot(&self) -> Option<usize>;
    fn set_slot(&self, slot: Option<usize>);
}

//==============================================================================
// Associate Functions
//==============================================================================

impl<T: Clone + 'static> Task<T> {
    pub(crate) fn new(id: TaskId, name: &str, coroutine: Coroutine<T>, scheduler: Weak<RefCell<Scheduler>>) -> Self {
        let finished: Rc<Cell<bool>> = Rc::new(Cell::new(false));
        Self(Rc::new(TaskInner {
            id,
            name: name.to_string(),
            coroutine: RefCell::new(Some(coroutine)),
            state: RefCell::new(TaskState {
                started: false,
                outcome: None,
                abandoned: false,
                trigger: None,
                cancel_requested: None,
                cancel_delivered: false,
                slot: None,
            }),
            join: Trigger::join(finished.clone(), name),
            finished,
            done_callbacks: RefCell::new(Vec::new()),
            scheduler,
        }))
    }

    pub(crate) fn raw(&self) -> Rc<dyn RawTask> {
        self.0.clone()
    }

    pub fn id(&self) -> TaskId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn started(&self) -> bool {
        self.0.is_started()
    }

    pub fn done(&self) -> bool {
        self.0.is_done()
    }

    /// True if the task finished by unwinding with the cancellation it was sent.
    pub fn cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Returns the result of the coroutine.
    ///
    /// Fails with [FailKind::InvalidState] while the task is still running and with the task's own failure if it
    /// raised one. A task cancelled before it started has no result and yields `Ok(None)`.
    pub fn result(&self) -> Result<Option<T>, Fail> {
        let state = self.0.state.borrow();
        if state.abandoned {
            return Ok(None);
        }
        match &state.outcome {
            Some(Outcome::Value(value)) => Ok(Some(value.clone())),
            Some(Outcome::Error(e)) => Err(e.clone()),
            None => {
                let cause: String = format!("task {} is not done", self.0.name);
                Err(Fail::new(FailKind::InvalidState, &cause))
            },
        }
    }

    /// Returns the failure the task finished with, if any.
    pub fn exception(&self) -> Result<Option<Fail>, Fail> {
        let state = self.0.state.borrow();
        if state.abandoned {
            return Ok(None);
        }
        match &state.outcome {
            Some(Outcome::Value(_)) => Ok(None),
            Some(Outcome::Error(e)) if e.is_cancelled() && state.cancel_requested.is_some() => Err(e.clone()),
            Some(Outcome::Error(e)) => Ok(Some(e.clone())),
            None => {
                let cause: String = format!("task {} is not done", self.0.name);
                Err(Fail::new(FailKind::InvalidState, &cause))
            },
        }
    }

    /// Requests cancellation of this task. Returns false if the task is already done.
    pub fn cancel(&self, msg: Option<&str>) -> bool {
        match SharedScheduler::from_weak(&self.0.scheduler) {
            Some(scheduler) => scheduler.cancel_task(self.raw(), msg),
            None => false,
        }
    }

    /// Trigger that fires when the task finishes.
    pub fn join_trigger(&self) -> Trigger {
        self.0.join.clone()
    }

    /// Waits for the task to finish and returns its result.
    pub async fn join(&self) -> Result<T, Fail> {
        self.0.join.clone().await?;
        match self.result()? {
            Some(value) => Ok(value),
            None => {
                let cause: String = format!("task {} was cancelled before it started", self.0.name);
                Err(Fail::new(FailKind::InvalidState, &cause))
            },
        }
    }

    /// Runs `callback` once the task finishes, or right away if it already has.
    pub fn add_done_callback<F: FnOnce() + 'static>(&self, callback: F) {
        self.0.add_done_callback(Box::new(callback));
    }
}

impl<T> TaskInner<T> {
    fn complete(&self, result: Result<T, Fail>) {
        let mut state = self.state.borrow_mut();
        let outcome: Outcome<T> = match (state.cancel_requested.clone(), state.cancel_delivered) {
            (Some(cancel), true) => match result {
                Err(e) if e.is_cancelled() => Outcome::Error(e),
                Ok(_) => {
                    let cause: String = format!("task {} was cancelled but exited normally", self.name);
                    Outcome::Error(Fail::wrap(FailKind::CancellationProtocol, &cause, cancel))
                },
                Err(e) => {
                    let cause: String = format!("task {} was cancelled but raised a different error", self.name);
                    Outcome::Error(Fail::wrap(FailKind::CancellationProtocol, &cause, e))
                },
            },
            _ => Outcome::capture(result),
        };
        state.outcome = Some(outcome);
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({}, {:?})", self.0.name, self.0.id)
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TaskId> for u64 {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

impl<T: 'static> RawTask for TaskInner<T> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn advance(&self, outcome: Outcome<()>) -> Step {
        self.state.borrow_mut().started = true;

        let mut coroutine = self.coroutine.borrow_mut();
        let (poll, report): (Poll<Result<T, Fail>>, YieldReport) = {
            let future: &mut Coroutine<T> = match coroutine.as_mut() {
                Some(future) => future,
                None => return Step::Finished,
            };
            let yielder: Yielder = Yielder::install(outcome);
            let mut ctx: Context = Context::from_waker(noop_waker_ref());
            let poll: Poll<Result<T, Fail>> =
                match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut ctx))) {
                    Ok(poll) => poll,
                    Err(payload) => Poll::Ready(Err(Fail::from_panic(&format!("task {}", self.name), &*payload))),
                };
            (poll, yielder.finish())
        };

        match poll {
            Poll::Ready(result) => {
                *coroutine = None;
                drop(coroutine);
                self.complete(result);
                Step::Finished
            },
            Poll::Pending => {
                drop(coroutine);
                // A failure injected into the task that nothing picked up.
                if let Some(Err(e)) = report.undelivered {
                    self.abort(e);
                    return Step::Finished;
                }
                if report.extra_yields > 0 {
                    let cause: String = format!(
                        "task {} awaited {} triggers in a single step; combine them with First or Combine",
                        self.name,
                        report.extra_yields + 1
                    );
                    return Step::Invalid(Fail::new(FailKind::Usage, &cause));
                }
                match report.trigger {
                    Some(trigger) => Step::Yielded(trigger),
                    None => {
                        let cause: String = format!(
                            "task {} suspended on something other than a trigger, task or waiter",
                            self.name
                        );
                        Step::Invalid(Fail::new(FailKind::Usage, &cause))
                    },
                }
            },
        }
    }

    fn abort(&self, fail: Fail) {
        let coroutine: Option<Coroutine<T>> = self.coroutine.borrow_mut().take();
        drop(coroutine);
        self.state.borrow_mut().outcome = Some(Outcome::Error(fail));
    }

    fn abandon(&self) {
        let coroutine: Option<Coroutine<T>> = self.coroutine.borrow_mut().take();
        drop(coroutine);
        self.state.borrow_mut().abandoned = true;
    }

    fn is_started(&self) -> bool {
        self.state.borrow().started
    }

    fn is_done(&self) -> bool {
        let state = self.state.borrow();
        state.abandoned || state.outcome.is_some()
    }

    fn is_cancelled(&self) -> bool {
        let state = self.state.borrow();
        state.cancel_requested.is_some() && matches!(&state.outcome, Some(Outcome::Error(e)) if e.is_cancelled())
    }

    fn has_error(&self) -> bool {
        let failed: bool = matches!(&self.state.borrow().outcome, Some(Outcome::Error(_)));
        failed && !self.is_cancelled()
    }

    fn trigger(&self) -> Option<Trigger> {
        self.state.borrow().trigger.clone()
    }

    fn set_trigger(&self, trigger: Option<Trigger>) {
        self.state.borrow_mut().trigger = trigger;
    }

    fn request_cancel(&self, cancel: Fail) -> bool {
        let mut state = self.state.borrow_mut();
        if state.cancel_requested.is_some() {
            return false;
        }
        state.cancel_requested = Some(cancel);
        true
    }

    fn cancel_requested(&self) -> Option<Fail> {
        self.state.borrow().cancel_requested.clone()
    }

    fn cancel_delivered(&self) -> bool {
        self.state.borrow().cancel_delivered
    }

    fn mark_cancel_delivered(&self) {
        self.state.borrow_mut().cancel_delivered = true;
    }

    fn join_trigger(&self) -> Trigger {
        self.join.clone()
    }

    fn mark_finished(&self) {
        self.finished.set(true);
    }

    fn add_done_callback(&self, callback: DoneCallback) {
        if self.is_done() && self.finished.get() {
            callback();
        } else {
            self.done_callbacks.borrow_mut().push(callback);
        }
    }

    fn take_done_callbacks(&self) -> Vec<DoneCallback> {
        mem::take(&mut *self.done_callbacks.borrow_mut())
    }

    fn slot(&self) -> Option<usize> {
        self.state.borrow().slot
    }

    fn set_slot(&self, slot: Option<usize>) {
        self.state.borrow_mut().slot = slot;
    }
}
